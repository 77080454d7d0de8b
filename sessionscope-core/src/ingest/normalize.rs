//! Normalization of decoded JSON into [`SessionMeta`] and [`ResponseItem`]
//!
//! Agent CLIs and exporters disagree on nearly everything: field casing,
//! type spellings, and how many envelopes wrap the actual record. This module
//! peels envelopes and maps the known spellings onto [`EventKind`].
//!
//! # Envelopes
//!
//! | Shape | Handling |
//! |-------|----------|
//! | `{record_type: "meta", record\|data\|payload}` | inner object is the metadata |
//! | `{type: "session_meta", payload\|data\|record}` | inner object is the metadata |
//! | `{record_type: "event"\|"trace"\|"log"\|"response", record\|event\|payload\|data\|item}` | inner object is the event |
//! | `{record_type: "state", ...}` | kept whole as [`EventKind::Other`] |
//! | `{type: "response_item"\|"event_msg"\|"event", timestamp, payload}` | inner object is the event, wrapper timestamp becomes `at` |
//!
//! # Type names
//!
//! The type field (`type`, `eventType`, `event`, `kind`, `action` or
//! `category`) is lowercased, runs of `-` and whitespace become `_`, and
//! anything after `.`, `:` or `/` is dropped. Matching then ignores
//! underscores, so `FunctionCall`, `function_call` and `function-call` are one
//! type.
//!
//! Records with no recognizable type go through structural heuristics and
//! finally become [`EventKind::Other`]. Only a recognized type whose required
//! fields are missing is rejected.

use super::gemini;
use crate::types::{
    EventKind, GitInfo, MessageContent, MessagePart, OutputFormat, ResponseItem, Role,
    SessionMeta, SessionOrigin, WebSearchResult,
};
use serde_json::{Map, Value};

/// A recognized record that lacks what its type requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaError {
    pub message: String,
}

impl SchemaError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

// ============================================
// Field access
// ============================================

/// Read-only view over a JSON object that accepts camelCase and snake_case keys.
///
/// Keys are always given in camelCase; `get("callId")` also finds `call_id`.
#[derive(Clone, Copy)]
pub(crate) struct Fields<'a>(pub &'a Map<String, Value>);

impl<'a> Fields<'a> {
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        let found = self.0.get(key).filter(|v| !v.is_null());
        if found.is_some() {
            return found;
        }
        let snake = to_snake_case(key);
        if snake != key {
            return self.0.get(&snake).filter(|v| !v.is_null());
        }
        None
    }

    /// First non-null value among `keys`.
    pub fn first(&self, keys: &[&str]) -> Option<&'a Value> {
        keys.iter().find_map(|key| self.get(key))
    }

    pub fn str(&self, key: &str) -> Option<&'a str> {
        self.get(key).and_then(Value::as_str)
    }

    /// First string value among `keys`.
    pub fn first_str(&self, keys: &[&str]) -> Option<&'a str> {
        keys.iter().find_map(|key| self.str(key))
    }

    /// String value, or the JSON text of any other non-null value.
    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key).map(value_text)
    }

    pub fn object(&self, key: &str) -> Option<&'a Map<String, Value>> {
        self.get(key).and_then(Value::as_object)
    }

    /// First object value among `keys`.
    pub fn first_object(&self, keys: &[&str]) -> Option<&'a Map<String, Value>> {
        keys.iter().find_map(|key| self.object(key))
    }

    pub fn i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    pub fn u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
        })
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// String contents, or compact JSON text for anything else.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse JSON carried inside a string, keeping the string when it is not JSON.
pub(crate) fn parse_embedded_json(value: &Value) -> Value {
    match value {
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| value.clone()),
        other => other.clone(),
    }
}

/// Shell commands arrive as a string or an argv array.
pub(crate) fn command_text(value: &Value) -> String {
    match value {
        Value::Array(items) if items.iter().all(Value::is_string) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" "),
        other => value_text(other),
    }
}

/// Normalize a raw type name for matching.
pub fn normalize_type_name(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut in_sep = false;
    for c in lowered.chars() {
        if matches!(c, '.' | ':' | '/') {
            break;
        }
        if c == '-' || c.is_whitespace() {
            if !in_sep {
                out.push('_');
            }
            in_sep = true;
        } else {
            out.push(c);
            in_sep = false;
        }
    }
    out
}

fn compact(type_name: &str) -> String {
    type_name.replace('_', "")
}

const TYPE_KEYS: [&str; 6] = ["type", "eventType", "event", "kind", "action", "category"];

// ============================================
// Content helpers
// ============================================

/// Message content from a string, a list of parts, or any other value.
pub(crate) fn flatten_content(value: Option<&Value>) -> Option<MessageContent> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(MessageContent::Text(s.clone())),
        Value::Array(items) => Some(MessageContent::Parts(
            items
                .iter()
                .filter(|item| !item.is_null())
                .map(|item| match item.get("text") {
                    Some(text) => MessagePart::text(value_text(text)),
                    None => MessagePart::text(value_text(item)),
                })
                .collect(),
        )),
        other => Some(MessageContent::Text(value_text(other))),
    }
}

fn flatten_text(value: Option<&Value>) -> Option<String> {
    flatten_content(value).map(|content| content.as_text().into_owned())
}

fn reasoning_content(f: Fields<'_>) -> Option<String> {
    for key in ["content", "text", "summary", "description"] {
        if let Some(text) = flatten_text(f.get(key)) {
            if !text.trim().is_empty() {
                return Some(text);
            }
        }
    }
    if f.has("encryptedContent") {
        return Some("[encrypted]".to_string());
    }
    None
}

/// Text from a `response` object carrying `output_text` or `output[].content`.
fn message_from_response(response: Option<&Value>) -> Option<MessageContent> {
    let response = response?.as_object()?;
    if let Some(Value::Array(items)) = response.get("output_text") {
        if !items.is_empty() {
            let text = items.iter().map(value_text).collect::<Vec<_>>().join("\n");
            return Some(MessageContent::Text(text));
        }
    }
    if let Some(Value::Array(segments)) = response.get("output") {
        let parts: Vec<String> = segments
            .iter()
            .filter_map(|seg| seg.get("content").filter(|c| c.is_array()))
            .filter_map(|content| flatten_text(Some(content)))
            .filter(|text| !text.is_empty())
            .collect();
        if !parts.is_empty() {
            return Some(MessageContent::Text(parts.join("\n")));
        }
    }
    None
}

fn search_results(value: Option<&Value>) -> Vec<WebSearchResult> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_object)
        .map(|item| {
            let f = Fields(item);
            WebSearchResult {
                title: f.str("title").map(String::from),
                url: f.str("url").map(String::from),
                snippet: f.first_str(&["snippet", "summary"]).map(String::from),
            }
        })
        .collect()
}

fn exit_code(f: Fields<'_>) -> Option<i64> {
    f.i64("exitCode")
        .or_else(|| f.object("metadata").and_then(|m| Fields(m).i64("exitCode")))
}

fn duration_ms(f: Fields<'_>) -> Option<u64> {
    f.u64("durationMs").or_else(|| {
        f.object("metadata")
            .and_then(|m| m.get("duration_seconds"))
            .and_then(Value::as_f64)
            .filter(|secs| *secs >= 0.0)
            .map(|secs| (secs * 1000.0).round() as u64)
    })
}

/// Tool families recognized by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ToolClass {
    Shell,
    WebSearch,
    WebFetch,
    Other,
}

pub(crate) fn classify_tool(name: &str) -> ToolClass {
    let mut normalized = String::with_capacity(name.len());
    let mut in_sep = false;
    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            normalized.push(c);
            in_sep = false;
        } else if !in_sep {
            normalized.push('_');
            in_sep = true;
        }
    }
    match normalized.as_str() {
        "bash" | "shell" | "sh" | "command" | "local_shell" => ToolClass::Shell,
        "google_web_search" | "web_search" | "googlesearch" | "google_search" => {
            ToolClass::WebSearch
        }
        "webfetch" | "web_fetch" => ToolClass::WebFetch,
        _ => ToolClass::Other,
    }
}

// ============================================
// Metadata
// ============================================

/// Interpret a decoded line as session metadata.
///
/// Returns `None` when the value is not metadata-shaped: not an object, a
/// record with an event type, or no timestamp anywhere.
pub fn parse_meta_value(value: &Value) -> Option<SessionMeta> {
    let mut obj = value.as_object()?;
    let mut wrapper_ts = Fields(obj).str("timestamp");

    if let Some(record_type) = Fields(obj).first_str(&["recordType"]) {
        if !record_type.eq_ignore_ascii_case("meta") {
            return None;
        }
        if let Some(inner) = Fields(obj).first_object(&["record", "data", "payload"]) {
            obj = inner;
            wrapper_ts = Fields(obj).str("timestamp").or(wrapper_ts);
        }
    }

    if let Some(raw_type) = Fields(obj).str("type") {
        match normalize_type_name(raw_type).as_str() {
            "session_meta" => {
                if let Some(inner) = Fields(obj).first_object(&["payload", "data", "record"]) {
                    wrapper_ts = Fields(obj).str("timestamp").or(wrapper_ts);
                    obj = inner;
                }
            }
            "init" => return Some(gemini::meta_from_init(Fields(obj))),
            _ => return None,
        }
    }

    let f = Fields(obj);
    let timestamp = f.str("timestamp").or(wrapper_ts)?.to_string();

    let origin = f
        .first_str(&["origin", "originator"])
        .and_then(origin_from_label);

    Some(SessionMeta {
        id: f.first_str(&["id", "sessionId"]).map(String::from),
        timestamp,
        instructions: flatten_text(f.first(&["instructions", "userInstructions"])),
        cwd: f.str("cwd").map(|cwd| cwd.trim().to_string()),
        git: f.object("git").map(|git| git_info(Fields(git))),
        version: f.first(&["version", "cliVersion"]).map(value_text),
        origin,
    })
}

fn git_info(f: Fields<'_>) -> GitInfo {
    GitInfo {
        repo: f.first_str(&["repo", "repository"]).map(String::from),
        branch: f.str("branch").map(String::from),
        commit: f.first_str(&["commit", "commitHash", "sha"]).map(String::from),
        remote: f.first_str(&["remote", "repositoryUrl", "url"]).map(String::from),
        dirty: f.get("dirty").and_then(Value::as_bool),
    }
}

fn origin_from_label(label: &str) -> Option<SessionOrigin> {
    let lowered = label.to_ascii_lowercase();
    if lowered.contains("gemini") {
        Some(SessionOrigin::GeminiCli)
    } else if lowered.contains("codex") {
        Some(SessionOrigin::Codex)
    } else {
        None
    }
}

// ============================================
// Events
// ============================================

/// Interpret a decoded line as a timeline event.
pub fn parse_event_value(value: &Value) -> Result<ResponseItem, SchemaError> {
    let Some(mut obj) = value.as_object() else {
        return Err(SchemaError::new(format!(
            "expected a JSON object, found {}",
            json_kind(value)
        )));
    };
    let mut wrapper_at: Option<&str> = None;

    if let Some(record_type) = Fields(obj).str("recordType") {
        match record_type.to_ascii_lowercase().as_str() {
            "event" | "trace" | "log" | "response" => {
                if let Some(inner) =
                    Fields(obj).first_object(&["record", "event", "payload", "data", "item"])
                {
                    wrapper_at = Fields(obj).first_str(&["at", "timestamp"]);
                    obj = inner;
                }
            }
            "state" => {
                return Ok(base_item(
                    Fields(obj),
                    None,
                    EventKind::Other {
                        data: value.clone(),
                    },
                ));
            }
            _ => {}
        }
    }

    if let Some(raw_type) = Fields(obj).str("type") {
        if matches!(
            raw_type.to_ascii_lowercase().as_str(),
            "response_item" | "event_msg" | "event"
        ) {
            if let Some(inner) =
                Fields(obj).first_object(&["payload", "data", "record", "event", "item"])
            {
                wrapper_at = Fields(obj).str("timestamp").or(wrapper_at);
                obj = inner;
            }
        }
    }

    normalize_event(obj, wrapper_at)
}

/// Map one unwrapped event object onto [`ResponseItem`].
pub fn normalize_event(
    obj: &Map<String, Value>,
    wrapper_at: Option<&str>,
) -> Result<ResponseItem, SchemaError> {
    let f = Fields(obj);
    let type_name = TYPE_KEYS
        .iter()
        .find_map(|key| f.str(key))
        .map(normalize_type_name);

    let Some(type_name) = type_name else {
        let kind = infer_from_structure(f).unwrap_or_else(|| EventKind::Other {
            data: Value::Object(obj.clone()),
        });
        return Ok(finish(base_item(f, wrapper_at, kind)));
    };

    if gemini::owns_event(&type_name, f) {
        if let Some(item) = gemini::normalize_event(&type_name, f, wrapper_at) {
            return Ok(finish(item));
        }
    }

    let kind = match kind_for_type(&type_name, f)? {
        Some(kind) => kind,
        None => infer_from_structure(f).unwrap_or_else(|| EventKind::Other {
            data: Value::Object(obj.clone()),
        }),
    };

    let mut item = base_item(f, wrapper_at, kind);
    if let EventKind::LocalShellCall { call_id: Some(call_id), .. }
    | EventKind::FunctionCall { call_id: Some(call_id), .. }
    | EventKind::FunctionCallOutput { call_id: Some(call_id), .. } = &item.kind
    {
        item.id = Some(call_id.clone());
    }
    Ok(finish(item))
}

pub(crate) fn base_item(f: Fields<'_>, wrapper_at: Option<&str>, kind: EventKind) -> ResponseItem {
    ResponseItem {
        id: f.str("id").map(String::from),
        index: f.u64("index").and_then(|i| usize::try_from(i).ok()),
        at: f
            .first_str(&["at", "timestamp"])
            .or(wrapper_at)
            .map(String::from),
        origin: None,
        kind,
    }
}

fn finish(mut item: ResponseItem) -> ResponseItem {
    annotate_code_like_output(&mut item.kind);
    item
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// `Ok(None)` means the type is not one we know.
fn kind_for_type(type_name: &str, f: Fields<'_>) -> Result<Option<EventKind>, SchemaError> {
    let kind = match compact(type_name).as_str() {
        "agentreasoning" | "reasoning" => EventKind::Reasoning {
            content: reasoning_content(f)
                .ok_or_else(|| SchemaError::new(format!("{type_name} event has no content")))?,
        },
        "agentmessage" | "summarytext" => EventKind::Message {
            role: Role::Assistant,
            content: flatten_content(f.first(&["message", "text", "content"]))
                .ok_or_else(|| SchemaError::new(format!("{type_name} event has no text")))?,
            model: f.str("model").map(String::from),
        },
        "message" => {
            let content = flatten_content(f.get("content"))
                .or_else(|| message_from_response(f.get("response")))
                .or_else(|| flatten_content(f.get("text")))
                .ok_or_else(|| SchemaError::new("message event has no content"))?;
            EventKind::Message {
                role: f.str("role").map_or(Role::Assistant, Role::from_lossy),
                content,
                model: f.str("model").map(String::from),
            }
        }
        "assistantmessage" | "usermessage" | "systemmessage" | "assistant" | "user"
        | "system" => EventKind::Message {
            role: Role::from_lossy(type_name.trim_end_matches("_message")),
            content: flatten_content(f.first(&["content", "text", "message"]))
                .ok_or_else(|| SchemaError::new(format!("{type_name} event has no content")))?,
            model: f.str("model").map(String::from),
        },
        "toolcall" | "functioncall" => function_call(f),
        "toolcalloutput" | "functioncalloutput" | "toolresult" => function_output(f),
        "localshellcall" => {
            let command = f
                .get("command")
                .or_else(|| f.object("action").and_then(|a| a.get("command")))
                .map(command_text)
                .ok_or_else(|| SchemaError::new("shell call has no command"))?;
            shell_call(f, command)
        }
        "websearchcall" => EventKind::WebSearchCall {
            query: f
                .get("query")
                .or_else(|| f.object("action").and_then(|a| a.get("query")))
                .map(value_text)
                .ok_or_else(|| SchemaError::new("web search has no query"))?,
            provider: f.str("provider").map(String::from),
            results: search_results(f.get("results")),
        },
        "customtoolcall" => EventKind::CustomToolCall {
            tool_name: f
                .first_str(&["toolName", "name"])
                .unwrap_or("tool")
                .to_string(),
            input: f.get("input").cloned(),
            output: f.get("output").cloned(),
            call_id: f.str("callId").map(String::from),
        },
        "filechange" => EventKind::FileChange {
            path: f
                .str("path")
                .ok_or_else(|| SchemaError::new("file change has no path"))?
                .to_string(),
            diff: f.first(&["diff", "patch"]).map(value_text),
        },
        "filewrite" | "filewritten" | "fileupdate" | "fileupdated" | "patch" | "diff" => {
            EventKind::FileChange {
                path: f
                    .first_str(&["path", "file", "filename"])
                    .ok_or_else(|| SchemaError::new(format!("{type_name} event has no path")))?
                    .to_string(),
                diff: f
                    .first(&["diff", "patch", "output", "result"])
                    .map(value_text),
            }
        }
        "other" => EventKind::Other {
            data: f
                .get("data")
                .cloned()
                .unwrap_or_else(|| Value::Object(f.0.clone())),
        },
        _ => return Ok(None),
    };
    Ok(Some(kind))
}

fn function_call(f: Fields<'_>) -> EventKind {
    let call_id = f.str("callId").map(String::from);
    let name = f.first_str(&["tool", "name"]).unwrap_or("tool");
    let args = f.first(&["arguments", "args"]);

    if classify_tool(name) == ToolClass::Shell {
        let parsed = args.map(parse_embedded_json).unwrap_or(Value::Null);
        let arg_fields = parsed.as_object().map(Fields);
        let command = arg_fields
            .and_then(|a| a.get("command"))
            .map(command_text)
            .unwrap_or_default();
        let cwd = arg_fields
            .and_then(|a| a.first_str(&["cwd", "workdir"]))
            .map(String::from);
        return EventKind::LocalShellCall {
            command,
            cwd,
            stdout: None,
            stderr: None,
            exit_code: None,
            duration_ms: None,
            call_id,
            stdout_format: None,
            stderr_format: None,
        };
    }

    EventKind::FunctionCall {
        name: name.to_string(),
        args: args.cloned(),
        result: f.first(&["output", "result"]).cloned(),
        call_id,
        duration_ms: f.u64("durationMs"),
    }
}

fn function_output(f: Fields<'_>) -> EventKind {
    let call_id = f.str("callId").map(String::from);
    let name = f.first_str(&["tool", "name"]);
    let raw = f.first(&["output", "result"]);

    if name.map(classify_tool) == Some(ToolClass::Shell) {
        let parsed = raw.map(parse_embedded_json).unwrap_or(Value::Null);
        let mut wrapped = Map::new();
        let out = match parsed.as_object() {
            Some(obj) => obj,
            None => {
                if !parsed.is_null() {
                    wrapped.insert("stdout".to_string(), parsed.clone());
                }
                &wrapped
            }
        };
        let out = Fields(out);
        return EventKind::LocalShellCall {
            command: out.get("command").map(command_text).unwrap_or_default(),
            cwd: out.str("cwd").map(String::from),
            stdout: out.first(&["stdout", "output"]).map(value_text),
            stderr: out.get("stderr").map(value_text),
            exit_code: exit_code(out),
            duration_ms: duration_ms(out),
            call_id,
            stdout_format: None,
            stderr_format: None,
        };
    }

    let output = raw.map(|raw| {
        let parsed = parse_embedded_json(raw);
        match &parsed {
            Value::Array(items)
                if !items.is_empty() && items.iter().all(|item| item.get("text").is_some()) =>
            {
                Value::String(
                    items
                        .iter()
                        .filter_map(|item| item.get("text"))
                        .map(value_text)
                        .collect::<Vec<_>>()
                        .join("\n"),
                )
            }
            _ => parsed,
        }
    });

    EventKind::FunctionCallOutput {
        call_id,
        name: name.map(String::from),
        output,
    }
}

fn shell_call(f: Fields<'_>, command: String) -> EventKind {
    EventKind::LocalShellCall {
        command,
        cwd: f.first_str(&["cwd", "workdir"]).map(String::from),
        stdout: f.get("stdout").map(value_text),
        stderr: f.get("stderr").map(value_text),
        exit_code: exit_code(f),
        duration_ms: duration_ms(f),
        call_id: f.str("callId").map(String::from),
        stdout_format: None,
        stderr_format: None,
    }
}

/// Guess the variant from which fields are present.
fn infer_from_structure(f: Fields<'_>) -> Option<EventKind> {
    if let Some(path) = f.str("path") {
        if f.str("diff").is_some() || f.str("patch").is_some() {
            return Some(EventKind::FileChange {
                path: path.to_string(),
                diff: f.first_str(&["diff", "patch"]).map(String::from),
            });
        }
    }
    if let Some(command) = f.str("command") {
        return Some(shell_call(f, command.to_string()));
    }
    if let (Some(query), Some(Value::Array(_))) = (f.str("query"), f.get("results")) {
        return Some(EventKind::WebSearchCall {
            query: query.to_string(),
            provider: f.str("provider").map(String::from),
            results: search_results(f.get("results")),
        });
    }
    if let Some(name) = f.first_str(&["toolName", "name"]) {
        if f.has("args") || f.has("result") || f.has("output") {
            return Some(EventKind::FunctionCall {
                name: name.to_string(),
                args: f.get("args").cloned(),
                result: f.first(&["result", "output"]).cloned(),
                call_id: f.str("callId").map(String::from),
                duration_ms: f.u64("durationMs"),
            });
        }
    }
    if let Some(role) = f.str("role") {
        if let Some(content) = flatten_content(f.first(&["content", "text"])) {
            return Some(EventKind::Message {
                role: Role::from_lossy(role),
                content,
                model: f.str("model").map(String::from),
            });
        }
    }
    None
}

// ============================================
// Call / output pairing
// ============================================

/// How an event takes part in call/output pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CallLink {
    /// A call still waiting for its output
    Call(String),
    /// An output (or a result-only call record) for an earlier call
    Output(String),
}

pub(crate) fn call_link(kind: &EventKind) -> Option<CallLink> {
    match kind {
        EventKind::FunctionCall {
            call_id: Some(id),
            args,
            result,
            ..
        } => match (result, args) {
            (None, _) => Some(CallLink::Call(id.clone())),
            (Some(_), None) => Some(CallLink::Output(id.clone())),
            (Some(_), Some(_)) => None,
        },
        EventKind::LocalShellCall {
            call_id: Some(id),
            stdout,
            stderr,
            exit_code,
            duration_ms,
            ..
        } => {
            let has_output = stdout.is_some()
                || stderr.is_some()
                || exit_code.is_some()
                || duration_ms.is_some();
            Some(if has_output {
                CallLink::Output(id.clone())
            } else {
                CallLink::Call(id.clone())
            })
        }
        EventKind::FunctionCallOutput { call_id: Some(id), .. } => {
            Some(CallLink::Output(id.clone()))
        }
        _ => None,
    }
}

/// Fold an output record into the call it answers.
pub(crate) fn merge_call_output(call: &mut EventKind, output: EventKind) {
    match call {
        EventKind::LocalShellCall {
            stdout,
            stderr,
            exit_code,
            duration_ms,
            ..
        } => {
            let (out, err, code, took) = match output {
                EventKind::LocalShellCall {
                    stdout,
                    stderr,
                    exit_code,
                    duration_ms,
                    ..
                } => (stdout, stderr, exit_code, duration_ms),
                EventKind::FunctionCallOutput { output: Some(value), .. }
                | EventKind::FunctionCall { result: Some(value), .. } => shell_result(&value),
                _ => return,
            };
            if out.is_some() {
                *stdout = out;
            }
            if err.is_some() {
                *stderr = err;
            }
            if code.is_some() {
                *exit_code = code;
            }
            if took.is_some() {
                *duration_ms = took;
            }
        }
        EventKind::FunctionCall {
            result, duration_ms, ..
        } => match output {
            EventKind::FunctionCall {
                result: Some(value),
                duration_ms: took,
                ..
            } => {
                *result = Some(value);
                if took.is_some() {
                    *duration_ms = took;
                }
            }
            EventKind::FunctionCallOutput { output: Some(value), .. } => *result = Some(value),
            _ => {}
        },
        _ => {}
    }
    annotate_code_like_output(call);
}

type ShellResult = (Option<String>, Option<String>, Option<i64>, Option<u64>);

fn shell_result(value: &Value) -> ShellResult {
    let parsed = parse_embedded_json(value);
    match parsed.as_object() {
        Some(obj) => {
            let f = Fields(obj);
            (
                f.first(&["stdout", "output"]).map(value_text),
                f.get("stderr").map(value_text),
                exit_code(f),
                duration_ms(f),
            )
        }
        None if parsed.is_null() => (None, None, None, None),
        None => (Some(value_text(&parsed)), None, None, None),
    }
}

// ============================================
// Output annotation
// ============================================

/// Flag shell output that is a diff or patch so it can be shown as code.
pub fn annotate_code_like_output(kind: &mut EventKind) {
    let EventKind::LocalShellCall {
        command,
        stdout,
        stderr,
        stdout_format,
        stderr_format,
        ..
    } = kind
    else {
        return;
    };
    let command = command.to_lowercase();
    let stdout_text = stdout.as_deref().unwrap_or("");
    let stderr_text = stderr.as_deref().unwrap_or("");
    if !is_code_like(&command, stdout_text) && !is_code_like(&command, stderr_text) {
        return;
    }
    if !stdout_text.is_empty() {
        *stdout_format = Some(OutputFormat::Code);
    }
    if !stderr_text.is_empty() {
        *stderr_format = Some(OutputFormat::Code);
    }
}

fn is_code_like(command: &str, output: &str) -> bool {
    if output.is_empty() {
        return false;
    }
    command.contains("apply_patch")
        || command.contains("git diff")
        || command.contains("diff ")
        || (command.contains("cat ") && output.contains("*** Begin Patch"))
        || output.lines().any(|line| line.starts_with("diff --git"))
        || output.starts_with("@@")
}
