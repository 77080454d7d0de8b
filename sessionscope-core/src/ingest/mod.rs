//! Ingestion of agent session logs
//!
//! Turns a raw log (JSONL, or a whole Gemini JSON document) into
//! [`SessionMeta`] plus a sequence of [`ResponseItem`]s.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌─────────────┐   ┌───────────────┐
//! │ LineReader │ → │ json_line  │ → │ normalize   │ → │ SessionStream │ → ParserItem
//! │ (decode)   │   │ (tolerant) │   │ (+ gemini)  │   │ (meta/index)  │
//! └────────────┘   └────────────┘   └─────────────┘   └───────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sessionscope_core::ingest::{parse_session_path, ParserOptions};
//!
//! let parsed = parse_session_path(Path::new("rollout.jsonl"), &ParserOptions::default());
//! println!("{} events, {} errors", parsed.events.len(), parsed.errors.len());
//! ```

mod gemini;
mod json_line;
mod lines;
mod normalize;
mod origin;
mod stream;

pub use gemini::{parse_document as parse_gemini_document, GeminiDocument, GEMINI_JSON_MAX_BYTES};
pub use json_line::{is_framing_line, parse_json_line, JsonLine};
pub use lines::{LineReader, TextEncoding};
pub use normalize::{
    annotate_code_like_output, normalize_event, normalize_type_name, parse_event_value,
    parse_meta_value, SchemaError,
};
pub(crate) use normalize::value_text;
pub use origin::{detect_origin_from_content, MAX_SCAN_LENGTH};
pub use stream::{apply_call_output, ParserItem, ParserOptions, SessionStream, MAX_PENDING_CALLS};

use crate::types::{ParserError, ResponseItem, SessionMeta, SessionSnapshot};
use serde::Serialize;
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};

/// Summary counters of a finished parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseStats {
    pub total_lines: usize,
    pub parsed_events: usize,
    pub failed_lines: usize,
    pub duration_ms: u64,
}

/// A fully drained parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedSession {
    pub meta: Option<SessionMeta>,
    pub events: Vec<ResponseItem>,
    pub errors: Vec<ParserError>,
    pub stats: ParseStats,
}

impl ParsedSession {
    fn failed(error: ParserError, started: Instant) -> Self {
        Self {
            meta: None,
            events: Vec::new(),
            errors: vec![error],
            stats: ParseStats {
                total_lines: 0,
                parsed_events: 0,
                failed_lines: 1,
                duration_ms: elapsed_ms(started.elapsed()),
            },
        }
    }

    /// Whole-input failure (unreadable file), as opposed to bad lines.
    pub fn is_fatal(&self) -> bool {
        self.errors.iter().any(|e| e.line < 0)
    }

    /// Terminal phase of this parse.
    pub fn phase(&self) -> ParsePhase {
        if self.errors.is_empty() {
            ParsePhase::Success
        } else {
            ParsePhase::Error
        }
    }

    /// Session ID from the metadata, else `fallback` (usually the file stem).
    pub fn session_id(&self, fallback: &str) -> String {
        self.meta
            .as_ref()
            .and_then(|m| m.id.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(fallback)
            .to_string()
    }

    /// Detector and context-builder input for this session.
    pub fn into_snapshot(self, fallback_id: &str) -> SessionSnapshot {
        let session_id = self.session_id(fallback_id);
        SessionSnapshot::new(session_id, self.meta, self.events)
    }
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

// ============================================
// Progress tracking
// ============================================

/// Lifecycle of a parse as seen by its consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParsePhase {
    #[default]
    Idle,
    Parsing,
    Success,
    Error,
}

/// Consumer-side counters for a [`SessionStream`].
///
/// The stream itself keeps no tallies. Feed every item to [`record`](Self::record)
/// and call [`finish`](Self::finish) when the stream ends.
#[derive(Debug, Clone, Default)]
pub struct ParseProgress {
    phase: ParsePhase,
    meta_seen: bool,
    events: usize,
    errors: usize,
    fatal: bool,
    started: Option<Instant>,
    elapsed: Duration,
}

impl ParseProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idle → Parsing. Restarting a finished tracker resets its counters.
    pub fn start(&mut self) {
        *self = Self {
            phase: ParsePhase::Parsing,
            started: Some(Instant::now()),
            ..Self::default()
        };
    }

    pub fn record(&mut self, item: &ParserItem) {
        if self.phase == ParsePhase::Idle {
            self.start();
        }
        match item {
            ParserItem::Meta(_) => self.meta_seen = true,
            ParserItem::Event(_) => self.events += 1,
            ParserItem::CallOutput { .. } => {}
            ParserItem::Error(error) => {
                self.errors += 1;
                if error.line < 0 {
                    self.fatal = true;
                }
            }
        }
    }

    /// Parsing → Success when no line failed, Error otherwise.
    ///
    /// The phase is a summary. Failed lines never stop accumulation.
    pub fn finish(&mut self) -> ParsePhase {
        if let Some(started) = self.started {
            self.elapsed = started.elapsed();
        }
        self.phase = if self.errors > 0 || self.fatal {
            ParsePhase::Error
        } else {
            ParsePhase::Success
        };
        self.phase
    }

    /// Force the Error phase, e.g. when the caller abandons the parse.
    pub fn fail(&mut self) {
        self.fatal = true;
        self.finish();
    }

    /// True when the whole input failed rather than individual lines.
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    pub fn phase(&self) -> ParsePhase {
        self.phase
    }

    pub fn events(&self) -> usize {
        self.events
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    pub fn has_meta(&self) -> bool {
        self.meta_seen
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

// ============================================
// Drain helpers
// ============================================

/// Drain a stream into arrays.
pub fn parse_session<R: Read>(reader: R, options: &ParserOptions) -> ParsedSession {
    let started = Instant::now();
    let mut stream = SessionStream::new(reader, *options);
    let mut parsed = ParsedSession::default();

    for item in stream.by_ref() {
        match item {
            ParserItem::Meta(meta) => parsed.meta = Some(meta),
            ParserItem::Event(event) => parsed.events.push(event),
            ParserItem::CallOutput { call_index, output } => {
                apply_call_output(&mut parsed.events, call_index, output);
            }
            ParserItem::Error(error) => parsed.errors.push(error),
        }
    }

    parsed.stats = ParseStats {
        total_lines: stream.lines_read(),
        parsed_events: parsed.events.len(),
        failed_lines: parsed.errors.len(),
        duration_ms: elapsed_ms(started.elapsed()),
    };
    parsed
}

/// Parse a session file. Never fails: unreadable input becomes one error with line -1.
///
/// Small UTF-8 files are first tried as a whole Gemini JSON document, then
/// parsed line by line.
pub fn parse_session_path(path: &Path, options: &ParserOptions) -> ParsedSession {
    let started = Instant::now();

    let file_len = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cannot stat session file");
            return ParsedSession::failed(
                ParserError::whole_input(format!("cannot read {}: {}", path.display(), e)),
                started,
            );
        }
    };

    let parsed = if options.encoding == TextEncoding::Utf8 && file_len <= GEMINI_JSON_MAX_BYTES {
        match std::fs::read(path) {
            Ok(bytes) => parse_small_file(&bytes, options, started),
            Err(e) => ParsedSession::failed(
                ParserError::whole_input(format!("cannot read {}: {}", path.display(), e)),
                started,
            ),
        }
    } else {
        match std::fs::File::open(path) {
            Ok(file) => parse_session(file, options),
            Err(e) => ParsedSession::failed(
                ParserError::whole_input(format!("cannot open {}: {}", path.display(), e)),
                started,
            ),
        }
    };

    tracing::info!(
        path = %path.display(),
        events = parsed.events.len(),
        errors = parsed.errors.len(),
        duration_ms = parsed.stats.duration_ms,
        "Parsed session"
    );
    parsed
}

fn parse_small_file(bytes: &[u8], options: &ParserOptions, started: Instant) -> ParsedSession {
    if let Ok(text) = std::str::from_utf8(bytes) {
        if let Some(document) = gemini::parse_document(text) {
            tracing::debug!(events = document.events.len(), "Read Gemini JSON document");
            let events: Vec<ResponseItem> = document
                .events
                .into_iter()
                .enumerate()
                .map(|(position, mut event)| {
                    event.index = Some(position);
                    event
                })
                .collect();
            return ParsedSession {
                meta: Some(document.meta),
                stats: ParseStats {
                    total_lines: text.lines().count(),
                    parsed_events: events.len(),
                    failed_lines: 0,
                    duration_ms: elapsed_ms(started.elapsed()),
                },
                events,
                errors: Vec::new(),
            };
        }
    }
    parse_session(bytes, options)
}
