//! Tolerant JSON decoding of a single log line
//!
//! Exported logs are not always clean JSONL. This accepts a few common
//! distortions before giving up on a line:
//!
//! - a leading byte-order mark
//! - an anti-hijacking prefix such as `)]}'` or `)]}',`
//! - array framing, where the file is one JSON array spread over lines
//!   (`[` / `]` / `],` alone on a line, elements followed by `,`)

use serde_json::Value;

/// Outcome of decoding one line.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonLine {
    /// A decoded JSON value
    Value(Value),
    /// Array framing token carrying no data
    Framing(String),
    /// Text that is not JSON, with the decoder's message
    Invalid(String),
}

const FRAMING_TOKENS: [&str; 3] = ["[", "]", "],"];

/// Decode one line. Never panics.
pub fn parse_json_line(line: &str) -> JsonLine {
    let text = line.strip_prefix('\u{FEFF}').unwrap_or(line);
    let text = strip_guard_prefix(text);
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return JsonLine::Invalid("empty line".to_string());
    }
    if FRAMING_TOKENS.contains(&trimmed) {
        return JsonLine::Framing(trimmed.to_string());
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => JsonLine::Value(value),
        Err(first) => {
            let relaxed = trimmed.trim_end_matches(|c: char| c == ',' || c.is_whitespace());
            if relaxed.len() == trimmed.len() || relaxed.is_empty() {
                return JsonLine::Invalid(first.to_string());
            }
            match serde_json::from_str::<Value>(relaxed) {
                Ok(value) => JsonLine::Value(value),
                Err(_) => JsonLine::Invalid(first.to_string()),
            }
        }
    }
}

/// True when the line is an array framing token.
pub fn is_framing_line(line: &str) -> bool {
    let text = line.strip_prefix('\u{FEFF}').unwrap_or(line);
    FRAMING_TOKENS.contains(&strip_guard_prefix(text).trim())
}

/// Strip `)]}` optionally followed by `'`, `,` and whitespace.
fn strip_guard_prefix(text: &str) -> &str {
    let Some(rest) = text.strip_prefix(")]}") else {
        return text;
    };
    let rest = rest.strip_prefix('\'').unwrap_or(rest);
    let rest = rest.strip_prefix(',').unwrap_or(rest);
    rest.trim_start()
}
