//! Lazy, single-pass session parser
//!
//! [`SessionStream`] turns a byte source into [`ParserItem`]s one line at a
//! time. Nothing past the current line is buffered (except for UTF-16 input,
//! see [`LineReader`]), and a bad line never ends the stream: it becomes a
//! [`ParserItem::Error`] and parsing moves on.
//!
//! The first usable line decides the session shape. A metadata line yields
//! [`ParserItem::Meta`]; an event line instead yields a placeholder meta
//! followed by that event.
//!
//! A tool output whose call is still pending does not become an event of its
//! own. It comes out as [`ParserItem::CallOutput`] pointing at the call's
//! index, and [`apply_call_output`] folds it into that call.

use super::json_line::{is_framing_line, parse_json_line, JsonLine};
use super::lines::{LineReader, TextEncoding};
use super::normalize::{
    call_link, merge_call_output, parse_event_value, parse_meta_value, CallLink,
};
use super::origin::{detect_origin_from_content, ensure_origin};
use crate::types::{ParseFailureReason, ParserError, ResponseItem, SessionMeta, SessionOrigin};
use chrono::Utc;
use std::collections::HashMap;
use std::io::Read;

/// Calls kept waiting for their output before the oldest is forgotten.
pub const MAX_PENDING_CALLS: usize = 1024;

/// Tuning for a parse pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserOptions {
    /// End the stream once this many lines have failed
    pub max_errors: Option<usize>,
    pub encoding: TextEncoding,
}

/// One item of the parse stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ParserItem {
    Meta(SessionMeta),
    Event(ResponseItem),
    /// Output for the earlier event at `call_index`
    CallOutput {
        call_index: usize,
        output: ResponseItem,
    },
    Error(ParserError),
}

/// Iterator over the items of one session log.
pub struct SessionStream<R> {
    lines: LineReader<R>,
    options: ParserOptions,
    line_no: i64,
    meta_seen: bool,
    origin: Option<SessionOrigin>,
    queued: Option<ParserItem>,
    last_index: Option<usize>,
    pending_calls: HashMap<String, usize>,
    failures: usize,
    finished: bool,
}

impl<R: Read> SessionStream<R> {
    pub fn new(reader: R, options: ParserOptions) -> Self {
        Self {
            lines: LineReader::new(reader, options.encoding),
            options,
            line_no: 0,
            meta_seen: false,
            origin: None,
            queued: None,
            last_index: None,
            pending_calls: HashMap::new(),
            failures: 0,
            finished: false,
        }
    }

    /// Physical lines consumed so far, blank ones included.
    pub fn lines_read(&self) -> usize {
        usize::try_from(self.line_no).unwrap_or(0)
    }

    fn fail(&mut self, reason: ParseFailureReason, message: String, raw: String) -> ParserItem {
        tracing::debug!(line = self.line_no, reason = %reason, %message, "Skipping unparseable line");
        self.failures += 1;
        if self.options.max_errors.is_some_and(|max| self.failures >= max) {
            tracing::warn!(failures = self.failures, "Error limit reached, ending parse");
            self.finished = true;
        }
        ParserItem::Error(ParserError {
            line: self.line_no,
            reason,
            message,
            raw,
        })
    }

    /// Give the event an index that never goes backwards.
    fn sequence(&mut self, mut event: ResponseItem) -> ResponseItem {
        let index = match (event.index, self.last_index) {
            (Some(explicit), Some(prev)) if explicit < prev => prev,
            (Some(explicit), _) => explicit,
            (None, Some(prev)) => prev.saturating_add(1),
            (None, None) => 0,
        };
        event.index = Some(index);
        self.last_index = Some(index);
        ensure_origin(&mut event.origin, self.origin);
        event
    }

    /// Sequence an event, or route an output to its pending call.
    fn admit(&mut self, event: ResponseItem) -> ParserItem {
        let link = call_link(&event.kind);
        if let Some(CallLink::Output(call_id)) = &link {
            if let Some(call_index) = self.pending_calls.remove(call_id) {
                return ParserItem::CallOutput {
                    call_index,
                    output: event,
                };
            }
        }

        let event = self.sequence(event);
        if let (Some(CallLink::Call(call_id)), Some(index)) = (link, event.index) {
            self.remember_call(call_id, index);
        }
        ParserItem::Event(event)
    }

    fn remember_call(&mut self, call_id: String, index: usize) {
        if self.pending_calls.len() >= MAX_PENDING_CALLS {
            let oldest = self
                .pending_calls
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                self.pending_calls.remove(&oldest);
            }
        }
        self.pending_calls.insert(call_id, index);
    }

    fn first_line_origin(&mut self, line: &str, declared: Option<SessionOrigin>) {
        self.origin = declared.or_else(|| detect_origin_from_content(line, None));
    }
}

impl<R: Read> Iterator for SessionStream<R> {
    type Item = ParserItem;

    fn next(&mut self) -> Option<ParserItem> {
        if let Some(item) = self.queued.take() {
            return Some(item);
        }
        if self.finished {
            return None;
        }

        loop {
            let line = match self.lines.next() {
                None => {
                    self.finished = true;
                    return None;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, line = self.line_no, "Session read failed");
                    self.finished = true;
                    return Some(ParserItem::Error(ParserError::whole_input(format!(
                        "failed to read session: {}",
                        e
                    ))));
                }
                Some(Ok(line)) => line,
            };
            self.line_no += 1;

            if line.trim().is_empty() || is_framing_line(&line) {
                continue;
            }

            let value = match parse_json_line(&line) {
                JsonLine::Value(value) => value,
                JsonLine::Framing(_) => continue,
                JsonLine::Invalid(message) => {
                    return Some(self.fail(ParseFailureReason::InvalidJson, message, line));
                }
            };

            if !self.meta_seen {
                if let Some(mut meta) = parse_meta_value(&value) {
                    self.meta_seen = true;
                    self.first_line_origin(&line, meta.origin);
                    ensure_origin(&mut meta.origin, self.origin);
                    return Some(ParserItem::Meta(meta));
                }
                return match parse_event_value(&value) {
                    Ok(event) => {
                        self.meta_seen = true;
                        self.first_line_origin(&line, event.origin);
                        let mut meta = SessionMeta::placeholder(Utc::now());
                        meta.origin = self.origin;
                        self.queued = Some(self.admit(event));
                        Some(ParserItem::Meta(meta))
                    }
                    Err(e) => Some(self.fail(ParseFailureReason::InvalidSchema, e.message, line)),
                };
            }

            return match parse_event_value(&value) {
                Ok(event) => Some(self.admit(event)),
                Err(e) => Some(self.fail(ParseFailureReason::InvalidSchema, e.message, line)),
            };
        }
    }
}

/// Fold the output of a [`ParserItem::CallOutput`] into its call.
///
/// Returns `false` when no event at `call_index` carries the same call ID.
pub fn apply_call_output(
    events: &mut [ResponseItem],
    call_index: usize,
    output: ResponseItem,
) -> bool {
    let call_id = output.kind.call_id().map(str::to_owned);
    let target = events
        .iter_mut()
        .rev()
        .find(|e| e.index == Some(call_index) && e.kind.call_id() == call_id.as_deref());
    match target {
        Some(call) => {
            merge_call_output(&mut call.kind, output.kind);
            true
        }
        None => {
            tracing::debug!(call_index, call_id = ?call_id, "Output has no matching call");
            false
        }
    }
}
