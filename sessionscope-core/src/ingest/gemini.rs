//! Gemini CLI session formats
//!
//! Gemini CLI writes two kinds of output:
//!
//! - a JSONL stream of `init`, `message`, `tool_use`, `tool_result`,
//!   `thought`, `result` and `error` records, handled line by line through
//!   [`normalize_event`]
//! - whole JSON documents, either a saved conversation
//!   (`{sessionId, startTime, messages: [...]}`) or a checkpoint
//!   (`[...]` or `{history: [...]}`), handled by [`parse_document`]
//!
//! Everything produced here is tagged with [`SessionOrigin::GeminiCli`].

use super::normalize::{
    base_item, classify_tool, command_text, merge_call_output, parse_embedded_json, value_text,
    Fields, ToolClass,
};
use crate::types::{
    EventKind, MessageContent, ResponseItem, Role, SessionMeta, SessionOrigin, WebSearchResult,
};
use chrono::Utc;
use serde_json::{Map, Value};

/// Documents larger than this are not tried as whole-file JSON.
pub const GEMINI_JSON_MAX_BYTES: u64 = 5 * 1024 * 1024;

/// Metadata and events recovered from a whole-document Gemini file.
#[derive(Debug, Clone, PartialEq)]
pub struct GeminiDocument {
    pub meta: SessionMeta,
    pub events: Vec<ResponseItem>,
}

/// Metadata from a stream `init` record.
pub(crate) fn meta_from_init(f: Fields<'_>) -> SessionMeta {
    SessionMeta {
        id: f.first_str(&["sessionId", "session_id"]).map(String::from),
        timestamp: f
            .str("timestamp")
            .map(String::from)
            .unwrap_or_else(|| Utc::now().to_rfc3339()),
        instructions: None,
        cwd: f.str("cwd").map(String::from),
        git: None,
        version: Some(f.str("model").unwrap_or("gemini-cli").to_string()),
        origin: Some(SessionOrigin::GeminiCli),
    }
}

/// True when a stream record is Gemini-specific rather than a generic spelling.
pub(crate) fn owns_event(type_name: &str, f: Fields<'_>) -> bool {
    match type_name {
        "tool_use" | "thought" | "result" | "error" => true,
        "tool_result" => f.has("toolName") || f.has("toolId"),
        "message" => f.has("delta"),
        _ => false,
    }
}

/// Normalize one Gemini stream record.
pub(crate) fn normalize_event(
    type_name: &str,
    f: Fields<'_>,
    wrapper_at: Option<&str>,
) -> Option<ResponseItem> {
    let kind = match type_name {
        "tool_use" => tool_use(f),
        "tool_result" => tool_result(f),
        "message" => EventKind::Message {
            role: f.str("role").map_or(Role::Assistant, Role::from_lossy),
            content: MessageContent::Text(gemini_text(f.first(&["content", "delta", "text"]))?),
            model: f.str("model").map(String::from),
        },
        "thought" | "reasoning" => EventKind::Reasoning {
            content: gemini_text(f.first(&["description", "text", "summary"]))?,
        },
        "result" | "error" => EventKind::Other {
            data: Value::Object(f.0.clone()),
        },
        _ => return None,
    };

    let mut item = base_item(f, wrapper_at, kind);
    if let Some(call_id) = f.first_str(&["toolId", "tool_id"]) {
        item.id = Some(call_id.to_string());
    }
    item.origin = Some(SessionOrigin::GeminiCli);
    Some(item)
}

fn call_id(f: Fields<'_>) -> Option<String> {
    f.first_str(&["toolId", "id"]).map(String::from)
}

fn tool_name<'a>(f: Fields<'a>) -> &'a str {
    f.first_str(&["toolName", "name"]).unwrap_or("tool")
}

fn tool_use(f: Fields<'_>) -> EventKind {
    let name = tool_name(f);
    let args = f
        .first(&["parameters", "args", "arguments"])
        .map(parse_embedded_json);
    let arg_fields = args.as_ref().and_then(Value::as_object).map(Fields);

    match classify_tool(name) {
        ToolClass::Shell => EventKind::LocalShellCall {
            command: arg_fields
                .and_then(|a| a.get("command"))
                .map(command_text)
                .unwrap_or_default(),
            cwd: arg_fields.and_then(|a| a.str("cwd")).map(String::from),
            stdout: None,
            stderr: None,
            exit_code: None,
            duration_ms: None,
            call_id: call_id(f),
            stdout_format: None,
            stderr_format: None,
        },
        ToolClass::WebSearch => EventKind::WebSearchCall {
            query: arg_fields.and_then(|a| a.text("query")).unwrap_or_default(),
            provider: Some("google".to_string()),
            results: Vec::new(),
        },
        ToolClass::WebFetch | ToolClass::Other => EventKind::FunctionCall {
            name: name.to_string(),
            args,
            result: None,
            call_id: call_id(f),
            duration_ms: None,
        },
    }
}

fn tool_result(f: Fields<'_>) -> EventKind {
    let name = tool_name(f);
    let output = f.first(&["output", "result"]).map(parse_embedded_json);
    let out = output.as_ref().and_then(Value::as_object).map(Fields);

    match classify_tool(name) {
        ToolClass::Shell => EventKind::LocalShellCall {
            command: out
                .and_then(|o| o.get("command"))
                .map(command_text)
                .unwrap_or_default(),
            cwd: out.and_then(|o| o.str("cwd")).map(String::from),
            stdout: match out {
                Some(o) => o.text("stdout"),
                None => output.as_ref().map(value_text),
            },
            stderr: out.and_then(|o| o.text("stderr")),
            exit_code: out.and_then(|o| o.i64("exitCode")),
            duration_ms: out.and_then(|o| o.u64("durationMs")),
            call_id: call_id(f),
            stdout_format: None,
            stderr_format: None,
        },
        ToolClass::WebSearch => EventKind::WebSearchCall {
            query: out.and_then(|o| o.text("query")).unwrap_or_default(),
            provider: Some(
                out.and_then(|o| o.str("provider"))
                    .unwrap_or("google")
                    .to_string(),
            ),
            results: out.map(|o| results(o.get("results"))).unwrap_or_default(),
        },
        ToolClass::WebFetch | ToolClass::Other => EventKind::FunctionCallOutput {
            call_id: call_id(f),
            name: Some(name.to_string()),
            output,
        },
    }
}

fn results(value: Option<&Value>) -> Vec<WebSearchResult> {
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

/// Join string or `{text}` items; empty results count as no content.
fn gemini_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<&str> = items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(obj) => obj.get("text").and_then(Value::as_str),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect();
            (!parts.is_empty()).then(|| parts.join("\n"))
        }
        Value::Object(obj) => gemini_text(obj.get("parts")),
        _ => None,
    }
}

// ============================================
// Whole documents
// ============================================

/// Try to read `text` as a conversation or checkpoint document.
///
/// Returns `None` for anything else, including JSONL, so the caller can fall
/// back to line parsing.
pub fn parse_document(text: &str) -> Option<GeminiDocument> {
    let trimmed = text.trim_start_matches('\u{FEFF}').trim();
    if !trimmed.starts_with('{') && !trimmed.starts_with('[') {
        return None;
    }
    let parsed: Value = serde_json::from_str(trimmed).ok()?;
    conversation(&parsed).or_else(|| checkpoint(&parsed))
}

fn conversation(source: &Value) -> Option<GeminiDocument> {
    let obj = source.as_object()?;
    let messages = obj.get("messages")?.as_array()?;
    let f = Fields(obj);

    let timestamp = f
        .str("startTime")
        .or_else(|| {
            messages
                .iter()
                .find_map(|m| m.get("timestamp").and_then(Value::as_str))
        })
        .map(String::from)
        .unwrap_or_else(|| Utc::now().to_rfc3339());

    let meta = SessionMeta {
        id: f.str("sessionId").map(String::from),
        timestamp,
        instructions: None,
        cwd: None,
        git: None,
        version: Some("gemini-cli".to_string()),
        origin: Some(SessionOrigin::GeminiCli),
    };

    let mut events = Vec::new();
    for message in messages.iter().filter_map(Value::as_object) {
        let m = Fields(message);
        let at = m.str("timestamp");

        if let Some(content) = gemini_text(m.get("content")) {
            events.push(tagged(ResponseItem {
                id: m.str("id").map(String::from),
                index: None,
                at: at.map(String::from),
                origin: None,
                kind: EventKind::Message {
                    role: role_for_message_type(m.str("type")),
                    content: MessageContent::Text(content),
                    model: m.str("model").map(String::from),
                },
            }));
        }

        for thought in m
            .get("thoughts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_object)
        {
            let t = Fields(thought);
            let Some(content) = thought_text(t) else {
                continue;
            };
            events.push(tagged(ResponseItem {
                id: t.str("id").map(String::from),
                index: None,
                at: t.str("timestamp").or(at).map(String::from),
                origin: None,
                kind: EventKind::Reasoning { content },
            }));
        }

        for call in m
            .get("toolCalls")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_object)
        {
            events.push(conversation_tool_call(call, at));
        }
    }

    Some(GeminiDocument { meta, events })
}

fn checkpoint(source: &Value) -> Option<GeminiDocument> {
    let history = match source {
        Value::Array(items) => items,
        Value::Object(obj) => obj.get("history")?.as_array()?,
        _ => return None,
    };

    let meta = SessionMeta {
        id: None,
        timestamp: Utc::now().to_rfc3339(),
        instructions: None,
        cwd: None,
        git: None,
        version: Some("gemini-checkpoint".to_string()),
        origin: Some(SessionOrigin::GeminiCli),
    };

    let events = history
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|entry| {
            let e = Fields(entry);
            let content = gemini_text(e.first(&["parts", "content", "text"]))?;
            Some(tagged(ResponseItem {
                id: e.str("id").map(String::from),
                index: None,
                at: e.str("timestamp").map(String::from),
                origin: None,
                kind: EventKind::Message {
                    role: e.str("role").map_or(Role::Assistant, Role::from_lossy),
                    content: MessageContent::Text(content),
                    model: None,
                },
            }))
        })
        .collect();

    Some(GeminiDocument { meta, events })
}

/// A saved tool call carries its result inline; fold it into one event.
fn conversation_tool_call(call: &Map<String, Value>, fallback_at: Option<&str>) -> ResponseItem {
    let c = Fields(call);
    let at = c.str("timestamp").or(fallback_at);

    let mut use_record = Map::new();
    use_record.insert("type".into(), "tool_use".into());
    if let Some(name) = c.get("name") {
        use_record.insert("tool_name".into(), name.clone());
    }
    if let Some(id) = c.get("id") {
        use_record.insert("tool_id".into(), id.clone());
    }
    if let Some(args) = c.get("args") {
        use_record.insert("parameters".into(), args.clone());
    }
    let mut kind = tool_use(Fields(&use_record));

    if let Some(result) = c.get("result") {
        let mut result_record = use_record.clone();
        result_record.insert("type".into(), "tool_result".into());
        result_record.insert("output".into(), result.clone());
        merge_result(&mut kind, tool_result(Fields(&result_record)));
    }

    let mut item = ResponseItem::new(kind);
    item.id = c.str("id").map(String::from);
    item.at = at.map(String::from);
    tagged(item)
}

fn merge_result(target: &mut EventKind, result: EventKind) {
    match (target, result) {
        (
            EventKind::WebSearchCall { results, .. },
            EventKind::WebSearchCall {
                results: found, ..
            },
        ) => {
            if !found.is_empty() {
                *results = found;
            }
        }
        (target, result) => merge_call_output(target, result),
    }
}

fn thought_text(t: Fields<'_>) -> Option<String> {
    let subject = t.str("subject").filter(|s| !s.is_empty());
    let description = gemini_text(t.first(&["description", "text"]));
    match (subject, description) {
        (Some(subject), Some(description)) => Some(format!("{subject}: {description}")),
        (None, Some(description)) => Some(description),
        (Some(subject), None) => Some(subject.to_string()),
        (None, None) => None,
    }
}

fn role_for_message_type(message_type: Option<&str>) -> Role {
    match message_type.map(str::to_ascii_lowercase).as_deref() {
        None | Some("gemini") | Some("assistant") | Some("model") => Role::Assistant,
        Some("user") => Role::User,
        Some(_) => Role::System,
    }
}

fn tagged(mut item: ResponseItem) -> ResponseItem {
    item.origin = Some(SessionOrigin::GeminiCli);
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::normalize::parse_event_value;
    use serde_json::json;

    fn conversation_json() -> String {
        json!({
            "sessionId": "session-123",
            "projectHash": "abc123",
            "startTime": "2025-01-01T00:00:00Z",
            "messages": [
                {"id": "m1", "type": "user", "timestamp": "2025-01-01T00:00:00Z", "content": "hello"},
                {
                    "id": "m2",
                    "type": "gemini",
                    "timestamp": "2025-01-01T00:00:05Z",
                    "content": "Hi there",
                    "toolCalls": [{
                        "id": "tool-1",
                        "name": "shell",
                        "args": {"command": "ls"},
                        "result": {"stdout": "file.txt", "exitCode": 0}
                    }]
                }
            ]
        })
        .to_string()
    }

    #[test]
    fn test_conversation_document() {
        let doc = parse_document(&conversation_json()).unwrap();
        assert_eq!(doc.meta.timestamp, "2025-01-01T00:00:00Z");
        assert_eq!(doc.meta.id.as_deref(), Some("session-123"));
        assert_eq!(doc.events.len(), 3);

        let shell = doc
            .events
            .iter()
            .find_map(|e| match &e.kind {
                EventKind::LocalShellCall {
                    command,
                    stdout,
                    exit_code,
                    ..
                } => Some((command.clone(), stdout.clone(), *exit_code)),
                _ => None,
            })
            .unwrap();
        assert_eq!(shell, ("ls".to_string(), Some("file.txt".to_string()), Some(0)));
        assert!(doc
            .events
            .iter()
            .all(|e| e.origin == Some(SessionOrigin::GeminiCli)));
    }

    #[test]
    fn test_checkpoint_array() {
        let text = json!([
            {"id": "c1", "role": "user", "parts": [{"text": "hello"}]},
            {"id": "c2", "role": "model", "parts": [{"text": "reply"}]}
        ])
        .to_string();
        let doc = parse_document(&text).unwrap();
        assert_eq!(doc.events.len(), 2);
        assert_eq!(doc.meta.version.as_deref(), Some("gemini-checkpoint"));
    }

    #[test]
    fn test_jsonl_is_not_a_document() {
        assert!(parse_document("{\"a\":1}\n{\"b\":2}").is_none());
        assert!(parse_document("plain text").is_none());
    }

    #[test]
    fn test_tool_use_shell() {
        let item = parse_event_value(&json!({
            "type": "tool_use",
            "tool_name": "shell",
            "tool_id": "call-123",
            "parameters": {"command": "pwd"}
        }))
        .unwrap();
        assert_eq!(item.origin, Some(SessionOrigin::GeminiCli));
        assert_eq!(item.id.as_deref(), Some("call-123"));
        match item.kind {
            EventKind::LocalShellCall { command, call_id, .. } => {
                assert_eq!(command, "pwd");
                assert_eq!(call_id.as_deref(), Some("call-123"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tool_result_web_search() {
        let item = parse_event_value(&json!({
            "type": "tool_result",
            "tool_name": "google_web_search",
            "tool_id": "call-456",
            "output": {"query": "foo", "results": [{"title": "Foo", "url": "https://foo.test", "snippet": "..."}]}
        }))
        .unwrap();
        match item.kind {
            EventKind::WebSearchCall { query, results, .. } => {
                assert_eq!(query, "foo");
                assert_eq!(results.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_init_is_meta() {
        let meta = crate::ingest::normalize::parse_meta_value(&json!({
            "type": "init",
            "session_id": "g-1",
            "model": "gemini-2.5-pro",
            "timestamp": "2025-02-02T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(meta.id.as_deref(), Some("g-1"));
        assert_eq!(meta.version.as_deref(), Some("gemini-2.5-pro"));
        assert_eq!(meta.origin, Some(SessionOrigin::GeminiCli));
    }

    #[test]
    fn test_thought_and_result() {
        let thought = parse_event_value(&json!({"type": "thought", "description": "check tests"})).unwrap();
        assert_eq!(thought.kind, EventKind::Reasoning { content: "check tests".into() });

        let result = parse_event_value(&json!({"type": "result", "status": "success"})).unwrap();
        assert_eq!(result.type_name(), "Other");
    }
}
