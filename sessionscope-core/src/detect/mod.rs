//! Misalignment detection
//!
//! [`detect_misalignments`] scans the textual surface of every event for the
//! keywords of every rule. A rule that hits produces exactly one
//! [`MisalignmentRecord`] carrying one [`Evidence`] entry per matching event.
//! Different rules hitting the same event are separate records.
//!
//! ## Textual surface
//!
//! | Event | Scanned text |
//! |-------|--------------|
//! | `Message`, `Reasoning` | content |
//! | `LocalShellCall` | command, stdout, stderr |
//! | `FunctionCall` | name, args, result |
//! | `FunctionCallOutput` | output |
//! | `CustomToolCall` | tool name, input, output |
//! | `WebSearchCall` | query |
//! | `FileChange` | path, diff |
//! | `Other` | nothing |
//!
//! A snapshot without events falls back to its `flattened_text`.
//!
//! Detection is pure: the same snapshot, rules and `detected_at` always give
//! byte-identical output.

pub mod range;
pub mod severity;

pub use range::{clamp_event_range, slice_events_by_range, ClampedRange, RangeRequest};
pub use severity::{
    compare_records, pick_higher_severity, rank_records, select_primary_misalignment,
    severity_label,
};

use crate::ingest::value_text;
use crate::types::{
    AgentRule, EventKind, EventRange, Evidence, MisalignmentRecord, MisalignmentStatus,
    ResponseItem, SessionSnapshot, Severity,
};
use chrono::{DateTime, Utc};

/// Characters of context kept on each side of a match in evidence excerpts.
pub const EXCERPT_RADIUS: usize = 60;

const DEFAULT_SUMMARY: &str = "Misalignment detected";

/// One searchable piece of a session.
struct Surface<'a> {
    text: String,
    lowered: String,
    event: Option<(usize, &'a ResponseItem)>,
}

impl<'a> Surface<'a> {
    fn new(text: String, event: Option<(usize, &'a ResponseItem)>) -> Self {
        let lowered = text.to_lowercase();
        Self {
            text,
            lowered,
            event,
        }
    }

    /// First keyword hit as `(byte offset, byte length)` into `lowered`.
    fn find(&self, keywords: &[String]) -> Option<(usize, usize)> {
        keywords
            .iter()
            .filter(|k| !k.is_empty())
            .filter_map(|k| self.lowered.find(k.as_str()).map(|pos| (pos, k.len())))
            .min_by_key(|(pos, _)| *pos)
    }

    /// Text a hit at `[pos, pos + len)` of `lowered` can be cut from.
    ///
    /// Offsets carry over to `text` only when lowercasing kept byte lengths.
    fn display_text(&self, pos: usize, len: usize) -> &str {
        let aligned = self.lowered.len() == self.text.len()
            && self.text.is_char_boundary(pos)
            && self.text.is_char_boundary(pos + len);
        if aligned {
            &self.text
        } else {
            &self.lowered
        }
    }
}

/// Text a rule can match in one event.
pub fn event_surface(kind: &EventKind) -> String {
    let mut parts: Vec<String> = Vec::new();
    match kind {
        EventKind::Message { content, .. } => parts.push(content.as_text().into_owned()),
        EventKind::Reasoning { content } => parts.push(content.clone()),
        EventKind::LocalShellCall {
            command,
            stdout,
            stderr,
            ..
        } => {
            parts.push(command.clone());
            parts.extend(stdout.iter().cloned());
            parts.extend(stderr.iter().cloned());
        }
        EventKind::FunctionCall {
            name, args, result, ..
        } => {
            parts.push(name.clone());
            parts.extend(args.iter().map(value_text));
            parts.extend(result.iter().map(value_text));
        }
        EventKind::FunctionCallOutput { output, .. } => {
            parts.extend(output.iter().map(value_text));
        }
        EventKind::CustomToolCall {
            tool_name,
            input,
            output,
            ..
        } => {
            parts.push(tool_name.clone());
            parts.extend(input.iter().map(value_text));
            parts.extend(output.iter().map(value_text));
        }
        EventKind::WebSearchCall { query, .. } => parts.push(query.clone()),
        EventKind::FileChange { path, diff } => {
            parts.push(path.clone());
            parts.extend(diff.iter().cloned());
        }
        EventKind::Other { .. } => {}
    }
    parts.retain(|p| !p.trim().is_empty());
    parts.join("\n")
}

fn surfaces(snapshot: &SessionSnapshot) -> Vec<Surface<'_>> {
    let from_events: Vec<Surface<'_>> = snapshot
        .events
        .iter()
        .enumerate()
        .filter_map(|(position, event)| {
            let text = event_surface(&event.kind);
            (!text.is_empty()).then(|| Surface::new(text, Some((event.resolved_index(position), event))))
        })
        .collect();
    if !from_events.is_empty() {
        return from_events;
    }
    snapshot
        .flattened_text
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .map(|t| vec![Surface::new(t.to_string(), None)])
        .unwrap_or_default()
}

/// Detect rule violations in a session.
///
/// Informational rules and rules without keywords never match. Output is
/// ranked with [`rank_records`]; records of equal rank keep rule order.
pub fn detect_misalignments(
    snapshot: &SessionSnapshot,
    rules: &[AgentRule],
    detected_at: DateTime<Utc>,
) -> Vec<MisalignmentRecord> {
    let surfaces = surfaces(snapshot);
    let mut records = Vec::new();

    for rule in rules {
        if rule.severity == Severity::Info || rule.keywords.is_empty() {
            continue;
        }
        let keywords: Vec<String> = rule.keywords.iter().map(|k| k.to_lowercase()).collect();

        let mut evidence = Vec::new();
        let mut range: Option<EventRange> = None;
        for surface in &surfaces {
            let Some((pos, len)) = surface.find(&keywords) else {
                continue;
            };
            let text = surface.display_text(pos, len);
            let (index, event) = match surface.event {
                Some((index, event)) => (Some(index), Some(event)),
                None => (None, None),
            };
            evidence.push(Evidence {
                message: excerpt(text, pos, len),
                event_index: index,
                event_id: event.and_then(|e| e.id.clone()),
                highlight: text.get(pos..pos + len).map(String::from),
            });
            if let (Some(index), Some(event)) = (index, event) {
                range = Some(extend_range(range, index, event.at.as_deref()));
            }
        }

        if evidence.is_empty() {
            continue;
        }
        tracing::debug!(
            session = %snapshot.session_id,
            rule = %rule.id,
            hits = evidence.len(),
            "Rule matched session events"
        );
        let summary = if rule.summary.trim().is_empty() {
            DEFAULT_SUMMARY.to_string()
        } else {
            rule.summary.clone()
        };
        records.push(MisalignmentRecord {
            id: format!("mis-{}-{}", snapshot.session_id, rule.id),
            session_id: snapshot.session_id.clone(),
            rule_id: rule.id.clone(),
            title: rule.heading.clone(),
            summary,
            severity: rule.severity,
            status: MisalignmentStatus::New,
            event_range: range,
            evidence,
            created_at: detected_at,
            updated_at: detected_at,
        });
    }

    rank_records(&mut records);
    records
}

fn extend_range(range: Option<EventRange>, index: usize, at: Option<&str>) -> EventRange {
    match range {
        None => EventRange {
            start_index: index,
            end_index: index,
            start_at: at.map(String::from),
            end_at: at.map(String::from),
        },
        Some(mut range) => {
            if index < range.start_index {
                range.start_index = index;
                range.start_at = at.map(String::from).or(range.start_at);
            }
            if index >= range.end_index {
                range.end_index = index;
                range.end_at = at.map(String::from).or(range.end_at);
            }
            range
        }
    }
}

/// Whitespace-collapsed window of `text` around `[pos, pos + len)`.
fn excerpt(text: &str, pos: usize, len: usize) -> String {
    let mut start = pos.min(text.len());
    for _ in 0..EXCERPT_RADIUS {
        match text[..start].chars().next_back() {
            Some(c) => start -= c.len_utf8(),
            None => break,
        }
    }
    let mut end = (pos + len).min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }
    for _ in 0..EXCERPT_RADIUS {
        match text[end..].chars().next() {
            Some(c) => end += c.len_utf8(),
            None => break,
        }
    }

    let body = text[start..end].split_whitespace().collect::<Vec<_>>().join(" ");
    let lead = if start > 0 { "..." } else { "" };
    let tail = if end < text.len() { "..." } else { "" };
    format!("{}{}{}", lead, body, tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessageContent, Role};

    fn rule(id: &str, severity: Severity, keywords: &[&str]) -> AgentRule {
        AgentRule {
            id: id.into(),
            heading: id.to_uppercase(),
            level: 2,
            summary: format!("{} summary", id),
            body: String::new(),
            bullets: vec![],
            severity,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            source: None,
        }
    }

    fn message(index: usize, text: &str) -> ResponseItem {
        ResponseItem::new(EventKind::Message {
            role: Role::User,
            content: MessageContent::Text(text.into()),
            model: None,
        })
        .with_index(index)
        .with_id(format!("e{}", index))
    }

    fn shell(index: usize, command: &str) -> ResponseItem {
        ResponseItem::new(EventKind::LocalShellCall {
            command: command.into(),
            cwd: None,
            stdout: None,
            stderr: None,
            exit_code: None,
            duration_ms: None,
            call_id: None,
            stdout_format: None,
            stderr_format: None,
        })
        .with_index(index)
        .with_id(format!("e{}", index))
    }

    fn at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_one_record_per_rule_with_range() {
        let snapshot = SessionSnapshot::new(
            "s1",
            None,
            vec![
                message(0, "please run the tests"),
                shell(1, "git push --force origin main"),
                message(2, "ok"),
                shell(3, "GIT PUSH --FORCE again"),
            ],
        );
        let records = detect_misalignments(&snapshot, &[rule("git", Severity::High, &["git push --force"])], at());

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, "mis-s1-git");
        assert_eq!(record.status, MisalignmentStatus::New);
        assert_eq!(record.evidence.len(), 2);
        assert_eq!(record.evidence[1].highlight.as_deref(), Some("GIT PUSH --FORCE"));
        let range = record.event_range.as_ref().unwrap();
        assert_eq!((range.start_index, range.end_index), (1, 3));
        assert_eq!(record.created_at, at());
    }

    #[test]
    fn test_rules_on_same_event_stay_separate() {
        let snapshot = SessionSnapshot::new("s", None, vec![shell(0, "rm -rf node_modules && npm i")]);
        let rules = [
            rule("deps", Severity::Low, &["npm"]),
            rule("danger", Severity::Critical, &["rm -rf"]),
        ];
        let records = detect_misalignments(&snapshot, &rules, at());
        let ids: Vec<&str> = records.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["danger", "deps"]);
    }

    #[test]
    fn test_info_and_keywordless_rules_never_match() {
        let snapshot = SessionSnapshot::new("s", None, vec![message(0, "anything goes")]);
        let rules = [
            rule("fyi", Severity::Info, &["anything"]),
            rule("empty", Severity::High, &[]),
        ];
        assert!(detect_misalignments(&snapshot, &rules, at()).is_empty());
    }

    #[test]
    fn test_flattened_text_fallback() {
        let mut snapshot = SessionSnapshot::new("s", None, vec![]);
        snapshot.flattened_text = Some("we used useEffect to fetch".into());
        let records = detect_misalignments(&snapshot, &[rule("fx", Severity::Medium, &["useeffect"])], at());
        assert_eq!(records.len(), 1);
        assert!(records[0].event_range.is_none());
        assert_eq!(records[0].evidence[0].event_index, None);
    }

    #[test]
    fn test_deterministic_output() {
        let snapshot = SessionSnapshot::new(
            "s",
            None,
            vec![message(0, "sudo make install"), shell(1, "sudo rm x")],
        );
        let rules = [
            rule("a", Severity::Medium, &["sudo"]),
            rule("b", Severity::Medium, &["make"]),
        ];
        let first = serde_json::to_string(&detect_misalignments(&snapshot, &rules, at())).unwrap();
        let second = serde_json::to_string(&detect_misalignments(&snapshot, &rules, at())).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_excerpt_window() {
        let text = format!("{}needle{}", "a ".repeat(50), " b".repeat(50));
        let pos = text.find("needle").unwrap();
        let out = excerpt(&text, pos, 6);
        assert!(out.starts_with("..."));
        assert!(out.ends_with("..."));
        assert!(out.contains("needle"));

        assert_eq!(excerpt("short  text", 0, 5), "short text");
    }

    #[test]
    fn test_event_surface_covers_tool_fields() {
        let kind = EventKind::FileChange {
            path: "src/secret.env".into(),
            diff: Some("+API_KEY=1".into()),
        };
        assert_eq!(event_surface(&kind), "src/secret.env\n+API_KEY=1");
        assert_eq!(event_surface(&EventKind::Other { data: serde_json::json!({"a": 1}) }), "");
    }
}
