//! Chat-context builder
//!
//! Assembles the prompt handed to the chat assistant from a parsed session,
//! its misalignments, the chat history so far and the repository's rules.
//!
//! ## Sections
//!
//! | Id | Heading | Priority |
//! |----|---------|----------|
//! | `session-meta` | Session metadata | 1 |
//! | `misalignments` | Detected misalignments | 2 |
//! | `recent-events` | Recent events (latest N) | 3 |
//! | `chat-history` | Chat history | 4 |
//! | `agent-rules` | Relevant AGENT rules | 5 |
//! | anything else | caller supplied | 10 |
//!
//! ## Budget
//!
//! The input budget is `max_context_tokens - max_output_tokens`. While the
//! rendered prompt is over budget, the section with the largest priority
//! number is dropped (later sections first on ties). If the last remaining
//! section alone is too large, its content is cut to fit.
//!
//! Token counts come from [`estimate_tokens`], an approximation of four
//! characters per token. It is not a tokenizer and real counts will differ.

use crate::config::ChatConfig;
use crate::error::{Error, Result};
use crate::rules::format_rule_entry;
use crate::types::{
    AgentRule, ChatMessage, EventKind, MisalignmentRecord, ResponseItem, SessionSnapshot,
};
use serde::Serialize;

/// Longest message or reasoning excerpt in the events section.
const EVENT_TEXT_LIMIT: usize = 320;

/// One named block of the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptSection {
    pub id: String,
    pub heading: String,
    pub content: String,
}

impl PromptSection {
    pub fn new(id: impl Into<String>, heading: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            heading: heading.into(),
            content: content.into(),
        }
    }

    /// Lower numbers survive trimming longer.
    pub fn priority(&self) -> u8 {
        match self.id.as_str() {
            "session-meta" => 1,
            "misalignments" => 2,
            "recent-events" => 3,
            "chat-history" => 4,
            "agent-rules" => 5,
            _ => 10,
        }
    }
}

/// Inputs to [`build_chat_context`].
#[derive(Debug, Clone, Copy)]
pub struct ContextRequest<'a> {
    pub snapshot: &'a SessionSnapshot,
    pub misalignments: &'a [MisalignmentRecord],
    pub history: &'a [ChatMessage],
    pub rules: &'a [AgentRule],
    /// Appended after the built-in sections
    pub extra_sections: &'a [PromptSection],
}

impl<'a> ContextRequest<'a> {
    pub fn new(snapshot: &'a SessionSnapshot) -> Self {
        Self {
            snapshot,
            misalignments: &[],
            history: &[],
            rules: &[],
            extra_sections: &[],
        }
    }
}

/// A prompt that fits the configured budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatContext {
    pub prompt: String,
    pub sections: Vec<PromptSection>,
    /// Estimated tokens of `prompt`
    pub used_tokens: usize,
    /// Input budget the prompt was fitted to
    pub budget_tokens: usize,
    /// Dropped or shortened sections, in trimming order
    pub trimmed_section_ids: Vec<String>,
}

/// Approximate token count: characters / 4, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Render sections as markdown blocks: `# heading`, blank line, content.
pub fn render_prompt(sections: &[PromptSection]) -> String {
    sections
        .iter()
        .map(|s| format!("# {}\n\n{}\n", s.heading, s.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Build the prompt for a chat turn.
///
/// Fails with [`Error::Budget`] when the output reserve leaves no input budget.
pub fn build_chat_context(request: &ContextRequest<'_>, config: &ChatConfig) -> Result<ChatContext> {
    let budget = config
        .max_context_tokens
        .checked_sub(config.max_output_tokens)
        .filter(|b| *b > 0)
        .ok_or_else(|| {
            Error::Budget(format!(
                "max_output_tokens ({}) leaves no room in max_context_tokens ({})",
                config.max_output_tokens, config.max_context_tokens
            ))
        })?;

    let sections = collect_sections(request, config);
    let (sections, trimmed) = enforce_budget(sections, budget);
    let prompt = render_prompt(&sections);
    let used_tokens = estimate_tokens(&prompt);

    if !trimmed.is_empty() {
        tracing::debug!(
            session = %request.snapshot.session_id,
            trimmed = ?trimmed,
            used_tokens,
            budget,
            "Trimmed chat context to budget"
        );
    }

    Ok(ChatContext {
        prompt,
        sections,
        used_tokens,
        budget_tokens: budget,
        trimmed_section_ids: trimmed,
    })
}

fn enforce_budget(mut sections: Vec<PromptSection>, budget: usize) -> (Vec<PromptSection>, Vec<String>) {
    let mut trimmed = Vec::new();

    while sections.len() > 1 && estimate_tokens(&render_prompt(&sections)) > budget {
        let drop_at = sections
            .iter()
            .enumerate()
            .max_by_key(|(position, s)| (s.priority(), *position))
            .map(|(position, _)| position)
            .unwrap_or(sections.len() - 1);
        trimmed.push(sections.remove(drop_at).id);
    }

    if estimate_tokens(&render_prompt(&sections)) > budget {
        if let Some(mut last) = sections.pop() {
            trimmed.push(last.id.clone());
            if shorten_to_fit(&mut last, budget) {
                sections.push(last);
            }
        }
    }
    (sections, trimmed)
}

/// Cut a section's content until the rendered block fits `budget`.
///
/// Returns false when not even the heading fits.
fn shorten_to_fit(section: &mut PromptSection, budget: usize) -> bool {
    let overhead = render_prompt(&[PromptSection::new("", section.heading.clone(), "")])
        .chars()
        .count()
        + 2;
    let mut keep = (budget * 4).saturating_sub(overhead);
    loop {
        let content: String = section.content.trim().chars().take(keep).collect();
        let candidate = PromptSection::new(section.id.clone(), section.heading.clone(), content);
        if estimate_tokens(&render_prompt(std::slice::from_ref(&candidate))) <= budget {
            *section = candidate;
            return true;
        }
        if keep == 0 {
            return false;
        }
        keep -= 1;
    }
}

fn collect_sections(request: &ContextRequest<'_>, config: &ChatConfig) -> Vec<PromptSection> {
    [
        meta_section(request.snapshot),
        misalignment_section(request.misalignments),
        events_section(&request.snapshot.events, config.max_events),
        history_section(request.history, config.max_history),
        rules_section(request.rules, config.max_rules),
    ]
    .into_iter()
    .flatten()
    .chain(request.extra_sections.iter().cloned())
    .collect()
}

fn meta_section(snapshot: &SessionSnapshot) -> Option<PromptSection> {
    let meta = snapshot.meta.as_ref()?;
    let mut lines = vec![
        format!("Session ID: {}", snapshot.session_id),
        format!(
            "Timestamp: {}",
            if meta.timestamp.is_empty() { "unknown" } else { meta.timestamp.as_str() }
        ),
    ];
    if let Some(repo) = meta.git.as_ref().and_then(|g| g.repo.as_deref()) {
        let branch = meta
            .git
            .as_ref()
            .and_then(|g| g.branch.as_deref())
            .unwrap_or("unknown branch");
        lines.push(format!("Repo: {} ({})", repo, branch));
    }
    if let Some(instructions) = meta.instructions.as_deref().filter(|i| !i.trim().is_empty()) {
        lines.push(format!("Instructions: {}", instructions.trim()));
    }
    Some(PromptSection::new("session-meta", "Session metadata", lines.join("\n")))
}

fn misalignment_section(records: &[MisalignmentRecord]) -> Option<PromptSection> {
    let entries: Vec<String> = records
        .iter()
        .filter(|r| r.is_open())
        .enumerate()
        .map(|(i, r)| {
            let mut lines = vec![
                format!(
                    "{}. [{} | {}] {}",
                    i + 1,
                    r.severity.as_str().to_uppercase(),
                    r.status,
                    r.title
                ),
                format!("Summary: {}", r.summary),
            ];
            if !r.evidence.is_empty() {
                let messages: Vec<&str> = r.evidence.iter().map(|e| e.message.as_str()).collect();
                lines.push(format!("Evidence: {}", messages.join(" | ")));
            }
            if let Some(range) = &r.event_range {
                lines.push(format!(
                    "Events: {} - {} ({} → {})",
                    range.start_index,
                    range.end_index,
                    range.start_at.as_deref().unwrap_or("?"),
                    range.end_at.as_deref().unwrap_or("?")
                ));
            }
            lines.join("\n")
        })
        .collect();
    if entries.is_empty() {
        return None;
    }
    Some(PromptSection::new(
        "misalignments",
        "Detected misalignments",
        entries.join("\n\n"),
    ))
}

fn events_section(events: &[ResponseItem], max_events: usize) -> Option<PromptSection> {
    if events.is_empty() || max_events == 0 {
        return None;
    }
    let recent = &events[events.len().saturating_sub(max_events)..];
    let lines: Vec<String> = recent.iter().map(format_event_line).collect();
    Some(PromptSection::new(
        "recent-events",
        format!("Recent events (latest {})", recent.len()),
        lines.join("\n"),
    ))
}

fn history_section(history: &[ChatMessage], max_history: usize) -> Option<PromptSection> {
    if history.is_empty() || max_history == 0 {
        return None;
    }
    let recent = &history[history.len().saturating_sub(max_history)..];
    let lines: Vec<String> = recent
        .iter()
        .map(|m| format!("- [{}] {}", m.role.as_str(), m.content))
        .collect();
    Some(PromptSection::new("chat-history", "Chat history", lines.join("\n")))
}

fn rules_section(rules: &[AgentRule], max_rules: usize) -> Option<PromptSection> {
    if rules.is_empty() || max_rules == 0 {
        return None;
    }
    let entries: Vec<String> = rules
        .iter()
        .take(max_rules)
        .enumerate()
        .map(|(i, rule)| format_rule_entry(i + 1, rule))
        .collect();
    Some(PromptSection::new(
        "agent-rules",
        "Relevant AGENT rules",
        entries.join("\n\n"),
    ))
}

fn format_event_line(event: &ResponseItem) -> String {
    match &event.kind {
        EventKind::Message { role, content, .. } => {
            format!("- [{}] {}", role.as_str(), clip(&content.as_text(), EVENT_TEXT_LIMIT))
        }
        EventKind::Reasoning { content } => {
            format!("- [reasoning] {}", clip(content, EVENT_TEXT_LIMIT))
        }
        EventKind::LocalShellCall { command, .. } => format!("- [shell] {}", command),
        EventKind::FunctionCall {
            name, duration_ms, ..
        } => match duration_ms {
            Some(ms) => format!("- [fn:{}] duration {}ms", name, ms),
            None => format!("- [fn:{}] duration n/a", name),
        },
        other => format!("- [{}] event captured", other.type_name()),
    }
}

fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        ChatRole, GitInfo, MessageContent, MisalignmentStatus, Role, SessionMeta, Severity,
    };
    use chrono::Utc;

    fn snapshot(events: usize) -> SessionSnapshot {
        let mut meta = SessionMeta::placeholder(Utc::now());
        meta.id = Some("s1".into());
        meta.git = Some(GitInfo {
            repo: Some("owner/app".into()),
            branch: Some("main".into()),
            ..Default::default()
        });
        let events = (0..events)
            .map(|i| {
                ResponseItem::new(EventKind::Message {
                    role: Role::Assistant,
                    content: MessageContent::Text(format!("message number {}", i)),
                    model: None,
                })
                .with_index(i)
            })
            .collect();
        SessionSnapshot::new("s1", Some(meta), events)
    }

    fn rule(id: &str) -> AgentRule {
        AgentRule {
            id: id.into(),
            heading: format!("Rule {}", id),
            level: 2,
            summary: "Keep it tidy.".into(),
            body: String::new(),
            bullets: vec!["no stray files".into()],
            severity: Severity::Medium,
            keywords: vec![],
            source: None,
        }
    }

    fn record(status: MisalignmentStatus) -> MisalignmentRecord {
        let now = Utc::now();
        MisalignmentRecord {
            id: "mis-s1-r".into(),
            session_id: "s1".into(),
            rule_id: "r".into(),
            title: "Rule r".into(),
            summary: "tidy".into(),
            severity: Severity::High,
            status,
            event_range: None,
            evidence: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_render_prompt() {
        let sections = [
            PromptSection::new("a", "First", "  one \n"),
            PromptSection::new("b", "Second", "two"),
        ];
        assert_eq!(render_prompt(&sections), "# First\n\none\n\n# Second\n\ntwo");
    }

    #[test]
    fn test_sections_in_priority_layout() {
        let snapshot = snapshot(3);
        let rules = [rule("a")];
        let history = [ChatMessage::new("s1", ChatRole::User, "why?")];
        let records = [record(MisalignmentStatus::New)];
        let request = ContextRequest {
            misalignments: &records,
            history: &history,
            rules: &rules,
            ..ContextRequest::new(&snapshot)
        };
        let context = build_chat_context(&request, &ChatConfig::default()).unwrap();
        let ids: Vec<&str> = context.sections.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["session-meta", "misalignments", "recent-events", "chat-history", "agent-rules"]
        );
        assert!(context.prompt.contains("Repo: owner/app (main)"));
        assert!(context.prompt.contains("- [assistant] message number 2"));
        assert!(context.prompt.contains("- [user] why?"));
        assert!(context.trimmed_section_ids.is_empty());
        assert_eq!(context.used_tokens, estimate_tokens(&context.prompt));
    }

    #[test]
    fn test_dismissed_records_are_left_out() {
        let snapshot = snapshot(1);
        let records = [record(MisalignmentStatus::Dismissed)];
        let request = ContextRequest {
            misalignments: &records,
            ..ContextRequest::new(&snapshot)
        };
        let context = build_chat_context(&request, &ChatConfig::default()).unwrap();
        assert!(context.sections.iter().all(|s| s.id != "misalignments"));
    }

    #[test]
    fn test_lowest_priority_trimmed_first() {
        let snapshot = snapshot(40);
        let rules: Vec<AgentRule> = (0..15).map(|i| rule(&i.to_string())).collect();
        let request = ContextRequest {
            rules: &rules,
            ..ContextRequest::new(&snapshot)
        };
        let config = ChatConfig {
            max_context_tokens: 400,
            max_output_tokens: 100,
            ..Default::default()
        };
        let context = build_chat_context(&request, &config).unwrap();
        assert_eq!(context.trimmed_section_ids.first().map(String::as_str), Some("agent-rules"));
        assert!(context.used_tokens <= context.budget_tokens);
        assert_eq!(context.sections[0].id, "session-meta");
    }

    #[test]
    fn test_never_exceeds_budget() {
        let snapshot = snapshot(25);
        let extra = [PromptSection::new("notes", "Notes", "x".repeat(5000))];
        for budget in [1usize, 7, 30, 90, 300] {
            let request = ContextRequest {
                extra_sections: &extra,
                ..ContextRequest::new(&snapshot)
            };
            let config = ChatConfig {
                max_context_tokens: budget + 10,
                max_output_tokens: 10,
                ..Default::default()
            };
            let context = build_chat_context(&request, &config).unwrap();
            assert!(
                context.used_tokens <= budget,
                "budget {} used {}",
                budget,
                context.used_tokens
            );
        }
    }

    #[test]
    fn test_no_budget_is_an_error() {
        let snapshot = snapshot(1);
        let config = ChatConfig {
            max_context_tokens: 100,
            max_output_tokens: 100,
            ..Default::default()
        };
        let result = build_chat_context(&ContextRequest::new(&snapshot), &config);
        assert!(matches!(result, Err(Error::Budget(_))));
    }

    #[test]
    fn test_event_lines() {
        let long = ResponseItem::new(EventKind::Reasoning {
            content: "z".repeat(400),
        });
        let line = format_event_line(&long);
        assert!(line.ends_with("..."));
        assert_eq!(line.chars().count(), "- [reasoning] ".len() + 320);

        let call = ResponseItem::new(EventKind::FunctionCall {
            name: "read_file".into(),
            args: None,
            result: None,
            call_id: None,
            duration_ms: Some(12),
        });
        assert_eq!(format_event_line(&call), "- [fn:read_file] duration 12ms");
    }
}
