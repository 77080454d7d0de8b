//! Best-effort classification of which agent CLI wrote a log
//!
//! Only the head of the content is scanned. The result is used for badging,
//! never for choosing a parse path.

use crate::types::SessionOrigin;

/// Characters of content inspected.
pub const MAX_SCAN_LENGTH: usize = 8000;

/// Classify content as Codex or Gemini CLI output.
///
/// Empty content yields `default`. Content without Gemini markers yields
/// `default`, or Codex when no default is given.
pub fn detect_origin_from_content(
    content: &str,
    default: Option<SessionOrigin>,
) -> Option<SessionOrigin> {
    if content.is_empty() {
        return default;
    }
    let head: String = content
        .chars()
        .take(MAX_SCAN_LENGTH)
        .collect::<String>()
        .to_lowercase();

    let gemini = has_init_type(&head)
        || (head.contains("\"sessionid\"") && head.contains("\"projecthash\""))
        || (head.contains("\"tool_use\"") && head.contains("\"tool_result\""));

    if gemini {
        Some(SessionOrigin::GeminiCli)
    } else {
        Some(default.unwrap_or(SessionOrigin::Codex))
    }
}

/// Matches `"type"\s*:\s*"init"`.
fn has_init_type(head: &str) -> bool {
    head.match_indices("\"type\"").any(|(pos, key)| {
        let rest = head[pos + key.len()..].trim_start();
        rest.strip_prefix(':')
            .map(str::trim_start)
            .is_some_and(|value| value.starts_with("\"init\""))
    })
}

/// Fill in the origin of an item that has none.
pub fn ensure_origin(origin: &mut Option<SessionOrigin>, fallback: Option<SessionOrigin>) {
    if origin.is_none() {
        *origin = fallback;
    }
}
