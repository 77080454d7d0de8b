//! Core domain types for sessionscope
//!
//! These types are the normalized model every session dialect is folded into.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Session** | One recorded transcript of a coding agent, one JSON object per line |
//! | **Event** | One timeline entry ([`ResponseItem`]): message, tool call, file change, ... |
//! | **Origin** | Which agent CLI wrote the log ([`SessionOrigin`]) |
//! | **Rule** | One section of an AGENTS-style governance document ([`AgentRule`]) |
//! | **Misalignment** | A detected case of events violating a rule ([`MisalignmentRecord`]) |
//!
//! Events form a closed tagged union ([`EventKind`]) serialized with a `type`
//! discriminator and camelCase fields, matching the strictest dialect the
//! parser accepts.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;

// ============================================
// Origin
// ============================================

/// Agent CLI that produced a session log. Used for badging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionOrigin {
    Codex,
    GeminiCli,
}

impl SessionOrigin {
    /// Returns the identifier used in serialized data
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOrigin::Codex => "codex",
            SessionOrigin::GeminiCli => "gemini-cli",
        }
    }

    /// Returns the display name for this origin
    pub fn display_name(&self) -> &'static str {
        match self {
            SessionOrigin::Codex => "Codex",
            SessionOrigin::GeminiCli => "Gemini CLI",
        }
    }
}

impl std::fmt::Display for SessionOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionOrigin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "codex" => Ok(SessionOrigin::Codex),
            "gemini-cli" | "gemini" => Ok(SessionOrigin::GeminiCli),
            _ => Err(Error::InvalidValue {
                kind: "session origin",
                value: s.to_string(),
            }),
        }
    }
}

// ============================================
// Session metadata
// ============================================

/// Git information attached to a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GitInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dirty: Option<bool>,
}

impl GitInfo {
    /// True when no field carries a value.
    pub fn is_empty(&self) -> bool {
        self.repo.as_deref().map_or(true, str::is_empty)
            && self.branch.as_deref().map_or(true, str::is_empty)
            && self.commit.as_deref().map_or(true, str::is_empty)
            && self.remote.as_deref().map_or(true, str::is_empty)
            && self.dirty.is_none()
    }
}

/// Per-session metadata, produced once at the start of a parse pass.
///
/// `instructions` holds the agent's system instructions. They are kept in
/// memory for prompt building but are never serialized, so they cannot leak
/// into exports or the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// ISO-8601 timestamp as written in the log
    pub timestamp: String,
    #[serde(default, skip_serializing)]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<SessionOrigin>,
}

impl SessionMeta {
    /// Metadata for logs that start directly with events.
    pub fn placeholder(timestamp: DateTime<Utc>) -> Self {
        Self {
            id: None,
            timestamp: timestamp.to_rfc3339(),
            instructions: None,
            cwd: None,
            git: None,
            version: None,
            origin: None,
        }
    }

    /// Schema version, defaulting to `"1"` when the log does not declare one.
    pub fn version_or_default(&self) -> &str {
        match self.version.as_deref() {
            Some(v) if !v.is_empty() => v,
            _ => "1",
        }
    }
}

// ============================================
// Events
// ============================================

/// Speaker of a [`EventKind::Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Map the role names found across dialects. Unknown roles read as assistant output.
    pub fn from_lossy(role: &str) -> Self {
        match role.trim().to_ascii_lowercase().as_str() {
            "user" | "human" => Role::User,
            "system" | "developer" => Role::System,
            _ => Role::Assistant,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One part of a multi-part message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePart {
    #[serde(rename = "type", default = "text_part_type")]
    pub kind: String,
    pub text: String,
}

fn text_part_type() -> String {
    "text".to_string()
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: text_part_type(),
            text: text.into(),
        }
    }
}

/// Message body: either plain text or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<MessagePart>),
}

impl MessageContent {
    /// Flatten to text, joining parts with newlines.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            MessageContent::Text(text) => Cow::Borrowed(text),
            MessageContent::Parts(parts) => Cow::Owned(
                parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
        }
    }
}

/// Rendering hint for shell output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Text,
    Code,
}

/// A single web search hit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSearchResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// Variant payload of a timeline event, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum EventKind {
    Message {
        role: Role,
        content: MessageContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    Reasoning {
        content: String,
    },
    FunctionCall {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, alias = "call_id", skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
    FunctionCallOutput {
        #[serde(default, alias = "call_id", skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },
    LocalShellCall {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stdout: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(default, alias = "call_id", skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stdout_format: Option<OutputFormat>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr_format: Option<OutputFormat>,
    },
    WebSearchCall {
        query: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        results: Vec<WebSearchResult>,
    },
    CustomToolCall {
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(default, alias = "call_id", skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
    },
    FileChange {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diff: Option<String>,
    },
    Other {
        data: Value,
    },
}

impl EventKind {
    /// The `type` discriminator for this variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::Message { .. } => "Message",
            EventKind::Reasoning { .. } => "Reasoning",
            EventKind::FunctionCall { .. } => "FunctionCall",
            EventKind::FunctionCallOutput { .. } => "FunctionCallOutput",
            EventKind::LocalShellCall { .. } => "LocalShellCall",
            EventKind::WebSearchCall { .. } => "WebSearchCall",
            EventKind::CustomToolCall { .. } => "CustomToolCall",
            EventKind::FileChange { .. } => "FileChange",
            EventKind::Other { .. } => "Other",
        }
    }

    /// Tool call ID linking a call to its output.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            EventKind::FunctionCall { call_id, .. }
            | EventKind::FunctionCallOutput { call_id, .. }
            | EventKind::LocalShellCall { call_id, .. }
            | EventKind::CustomToolCall { call_id, .. } => call_id.as_deref(),
            _ => None,
        }
    }
}

/// One timeline entry of a session.
///
/// `index` is the stable display key. Events coming out of the parser always
/// carry one and the sequence never decreases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<SessionOrigin>,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl ResponseItem {
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: None,
            index: None,
            at: None,
            origin: None,
            kind,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }

    /// Display index, falling back to the array position.
    pub fn resolved_index(&self, position: usize) -> usize {
        self.index.unwrap_or(position)
    }
}

// ============================================
// Parser errors
// ============================================

/// Why a line could not be turned into an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseFailureReason {
    InvalidJson,
    InvalidSchema,
    /// Anything else, including unreadable input
    Other,
}

impl ParseFailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseFailureReason::InvalidJson => "invalid_json",
            ParseFailureReason::InvalidSchema => "invalid_schema",
            ParseFailureReason::Other => "other",
        }
    }
}

impl std::fmt::Display for ParseFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line the parser could not use. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParserError {
    /// 1-based line number, or -1 when the whole input failed
    pub line: i64,
    pub reason: ParseFailureReason,
    pub message: String,
    /// Original line text
    pub raw: String,
}

impl ParserError {
    /// Terminal error for input that could not be read at all.
    pub fn whole_input(message: impl Into<String>) -> Self {
        Self {
            line: -1,
            reason: ParseFailureReason::Other,
            message: message.into(),
            raw: String::new(),
        }
    }
}

// ============================================
// Severity and misalignments
// ============================================

/// Rule and misalignment severity, ordered `info < low < medium < high < critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Info,
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    /// Numeric rank, strictly increasing with severity.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Info => 0,
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Severity::ALL
            .into_iter()
            .find(|sev| sev.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidValue {
                kind: "severity",
                value: s.to_string(),
            })
    }
}

/// Review status of a misalignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MisalignmentStatus {
    #[serde(alias = "open")]
    New,
    Acknowledged,
    Dismissed,
}

impl MisalignmentStatus {
    /// Statuses reachable from `self` in one step.
    pub fn allowed_transitions(&self) -> &'static [MisalignmentStatus] {
        use MisalignmentStatus::*;
        match self {
            New => &[Acknowledged, Dismissed],
            Acknowledged => &[Dismissed, New],
            Dismissed => &[Acknowledged, New],
        }
    }

    pub fn can_transition_to(&self, next: MisalignmentStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MisalignmentStatus::New => "new",
            MisalignmentStatus::Acknowledged => "acknowledged",
            MisalignmentStatus::Dismissed => "dismissed",
        }
    }
}

impl std::fmt::Display for MisalignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MisalignmentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" | "open" => Ok(MisalignmentStatus::New),
            "acknowledged" => Ok(MisalignmentStatus::Acknowledged),
            "dismissed" => Ok(MisalignmentStatus::Dismissed),
            _ => Err(Error::InvalidValue {
                kind: "misalignment status",
                value: s.to_string(),
            }),
        }
    }
}

/// Span of event indices a misalignment refers to (inclusive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRange {
    pub start_index: usize,
    pub end_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<String>,
}

/// One piece of evidence backing a misalignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    /// Short excerpt of the matching event text
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// The matched text as it appears in the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight: Option<String>,
}

/// A detected rule violation for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MisalignmentRecord {
    pub id: String,
    pub session_id: String,
    pub rule_id: String,
    pub title: String,
    pub summary: String,
    pub severity: Severity,
    pub status: MisalignmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_range: Option<EventRange>,
    pub evidence: Vec<Evidence>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MisalignmentRecord {
    /// Apply a status change allowed by the transition table.
    pub fn transition(&mut self, next: MisalignmentStatus, at: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = at;
        Ok(())
    }

    /// Open records are everything not dismissed.
    pub fn is_open(&self) -> bool {
        self.status != MisalignmentStatus::Dismissed
    }
}

// ============================================
// Rules
// ============================================

/// One rule extracted from a governance markdown document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRule {
    /// Slug of the heading, suffixed `-2`, `-3`, ... on collision
    pub id: String,
    pub heading: String,
    /// Markdown heading depth (1-6)
    pub level: u8,
    pub summary: String,
    pub body: String,
    pub bullets: Vec<String>,
    pub severity: Severity,
    /// Lowercased literals matched against session text
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

// ============================================
// Snapshots and chat
// ============================================

/// Parsed session handed to the detector and the context builder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<SessionMeta>,
    #[serde(default)]
    pub events: Vec<ResponseItem>,
    /// Precomputed text used when there are no events to scan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flattened_text: Option<String>,
}

impl SessionSnapshot {
    pub fn new(
        session_id: impl Into<String>,
        meta: Option<SessionMeta>,
        events: Vec<ResponseItem>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            meta,
            events,
            flattened_text: None,
        }
    }
}

/// Speaker in the chat assistant conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One turn of chat history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub role: ChatRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(session_id: impl Into<String>, role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: format!("chat-{}", uuid::Uuid::new_v4()),
            session_id: session_id.into(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ResponseItem::new(EventKind::LocalShellCall {
            command: "ls".to_string(),
            cwd: None,
            stdout: None,
            stderr: None,
            exit_code: Some(0),
            duration_ms: None,
            call_id: None,
            stdout_format: None,
            stderr_format: None,
        })
        .with_index(3);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "LocalShellCall");
        assert_eq!(value["exitCode"], 0);
        assert_eq!(value["index"], 3);

        let back: ResponseItem = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_instructions_never_serialized() {
        let mut meta = SessionMeta::placeholder(Utc::now());
        meta.instructions = Some("secret system prompt".to_string());
        let text = serde_json::to_string(&meta).unwrap();
        assert!(!text.contains("secret"));
    }

    #[test]
    fn test_severity_from_str() {
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert!("urgent".parse::<Severity>().is_err());
    }

    #[test]
    fn test_status_transitions() {
        use MisalignmentStatus::*;
        assert!(New.can_transition_to(Acknowledged));
        assert!(New.can_transition_to(Dismissed));
        assert!(!New.can_transition_to(New));
        assert!(Acknowledged.can_transition_to(New));
        assert!(Dismissed.can_transition_to(Acknowledged));
        assert!(!Dismissed.can_transition_to(Dismissed));
    }

    #[test]
    fn test_status_accepts_open_alias() {
        let status: MisalignmentStatus = serde_json::from_value(json!("open")).unwrap();
        assert_eq!(status, MisalignmentStatus::New);
        assert_eq!("open".parse::<MisalignmentStatus>().unwrap(), status);
    }

    #[test]
    fn test_record_transition_rejects_illegal_move() {
        let now = Utc::now();
        let mut record = MisalignmentRecord {
            id: "mis-s-r".to_string(),
            session_id: "s".to_string(),
            rule_id: "r".to_string(),
            title: "t".to_string(),
            summary: String::new(),
            severity: Severity::High,
            status: MisalignmentStatus::New,
            event_range: None,
            evidence: vec![],
            created_at: now,
            updated_at: now,
        };

        assert!(record.transition(MisalignmentStatus::New, now).is_err());
        record
            .transition(MisalignmentStatus::Dismissed, now)
            .unwrap();
        assert!(!record.is_open());
    }

    #[test]
    fn test_message_content_as_text() {
        let content = MessageContent::Parts(vec![MessagePart::text("a"), MessagePart::text("b")]);
        assert_eq!(content.as_text(), "a\nb");
    }
}
