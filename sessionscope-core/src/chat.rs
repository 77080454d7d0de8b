//! Chat assistant client
//!
//! The model behind the assistant is a black box reached through
//! [`ChatClient`]. [`HttpChatClient`] talks to Ollama, Anthropic or OpenAI;
//! tests substitute their own implementation.

use crate::config::{ChatConfig, LlmConfig, LlmProvider};
use crate::context::{build_chat_context, ChatContext, ContextRequest};
use crate::error::{Error, Result};
use crate::types::{ChatMessage, ChatRole};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are a reviewer of AI coding agent sessions. Answer questions about the session using the provided context. When a question concerns the project's AGENT rules, cite the rule heading and the event numbers involved. Say so plainly when the context does not contain the answer.";

/// Completion interface for the chat assistant.
pub trait ChatClient: Send + Sync {
    /// Answer `question` given the prompt in `context`.
    fn complete(&self, context: &ChatContext, question: &str) -> Result<String>;
}

/// Create the HTTP-backed client for the configured provider.
pub fn create_chat_client(llm: &LlmConfig, chat: &ChatConfig) -> Result<Box<dyn ChatClient>> {
    Ok(Box::new(HttpChatClient::new(llm, chat)?))
}

/// One question and its answer.
#[derive(Debug, Clone)]
pub struct ChatExchange {
    pub context: ChatContext,
    pub question: ChatMessage,
    pub answer: ChatMessage,
}

/// Build the context for `request`, ask `question`, and record both turns.
pub fn ask(
    client: &dyn ChatClient,
    request: &ContextRequest<'_>,
    config: &ChatConfig,
    question: &str,
) -> Result<ChatExchange> {
    let question = question.trim();
    if question.is_empty() {
        return Err(Error::Llm("question is empty".to_string()));
    }
    let context = build_chat_context(request, config)?;
    let session_id = &request.snapshot.session_id;

    tracing::info!(
        session = %session_id,
        used_tokens = context.used_tokens,
        sections = context.sections.len(),
        "Asking chat assistant"
    );
    let answer = client.complete(&context, question)?;

    Ok(ChatExchange {
        question: ChatMessage::new(session_id.clone(), ChatRole::User, question),
        answer: ChatMessage::new(session_id.clone(), ChatRole::Assistant, answer.trim()),
        context,
    })
}

/// The user turn sent to the model: context prompt, then the question.
pub fn user_message(context: &ChatContext, question: &str) -> String {
    if context.prompt.is_empty() {
        return question.to_string();
    }
    format!("{}\n\n# Question\n\n{}", context.prompt, question)
}

/// JSON request body for a provider.
pub fn request_body(provider: LlmProvider, model: &str, max_tokens: usize, user: &str) -> Value {
    match provider {
        LlmProvider::Ollama => json!({
            "model": model,
            "system": SYSTEM_PROMPT,
            "prompt": user,
            "stream": false,
            "options": { "num_predict": max_tokens },
        }),
        LlmProvider::Claude => json!({
            "model": model,
            "max_tokens": max_tokens,
            "system": SYSTEM_PROMPT,
            "messages": [{ "role": "user", "content": user }],
        }),
        LlmProvider::OpenAI => json!({
            "model": model,
            "max_tokens": max_tokens,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user }
            ]
        }),
    }
}

/// Pull the answer text out of a provider response.
pub fn extract_answer(provider: LlmProvider, body: &Value) -> Result<String> {
    let (text, field) = match provider {
        LlmProvider::Ollama => (body.get("response").and_then(Value::as_str), "response"),
        LlmProvider::Claude => (
            body.get("content")
                .and_then(Value::as_array)
                .and_then(|blocks| {
                    blocks
                        .iter()
                        .find(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                        .or_else(|| blocks.first())
                })
                .and_then(|b| b.get("text"))
                .and_then(Value::as_str),
            "content[].text",
        ),
        LlmProvider::OpenAI => (
            body.pointer("/choices/0/message/content")
                .and_then(Value::as_str),
            "choices[0].message.content",
        ),
    };
    text.map(ToString::to_string)
        .ok_or_else(|| Error::Llm(format!("{} response missing {}", provider_name(provider), field)))
}

fn provider_name(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::Ollama => "ollama",
        LlmProvider::Claude => "claude",
        LlmProvider::OpenAI => "openai",
    }
}

/// Blocking HTTP client on a private current-thread runtime.
pub struct HttpChatClient {
    model: String,
    provider: LlmProvider,
    endpoint: String,
    api_key: Option<String>,
    max_output_tokens: usize,
    runtime: tokio::runtime::Runtime,
    http: reqwest::Client,
}

impl HttpChatClient {
    pub fn new(config: &LlmConfig, chat: &ChatConfig) -> Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| config.provider.default_endpoint().to_string());
        let api_key = config.api_key.clone().or_else(|| {
            config
                .provider
                .api_key_env()
                .and_then(|var| std::env::var(var).ok())
        });

        if let Some(var) = config.provider.api_key_env() {
            if api_key.is_none() {
                return Err(Error::Config(format!(
                    "llm.api_key (or {}) is required for {}",
                    var,
                    provider_name(config.provider)
                )));
            }
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Llm(format!("failed to build tokio runtime: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| Error::Llm(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            model: config.model.clone(),
            provider: config.provider,
            endpoint,
            api_key,
            max_output_tokens: chat.max_output_tokens,
            runtime,
            http,
        })
    }

    fn url(&self) -> String {
        let base = self.endpoint.trim_end_matches('/');
        match self.provider {
            LlmProvider::Ollama => format!("{}/api/generate", base),
            LlmProvider::Claude => format!("{}/v1/messages", base),
            LlmProvider::OpenAI => format!("{}/v1/chat/completions", base),
        }
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let key = self.api_key.as_deref().unwrap_or_default();
        match self.provider {
            LlmProvider::Ollama => {}
            LlmProvider::Claude => {
                headers.insert(
                    "x-api-key",
                    HeaderValue::from_str(key)
                        .map_err(|e| Error::Llm(format!("invalid claude api key header: {e}")))?,
                );
                headers.insert("anthropic-version", HeaderValue::from_static("2023-06-01"));
            }
            LlmProvider::OpenAI => {
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {}", key))
                        .map_err(|e| Error::Llm(format!("invalid auth header: {e}")))?,
                );
            }
        }
        Ok(headers)
    }
}

impl ChatClient for HttpChatClient {
    fn complete(&self, context: &ChatContext, question: &str) -> Result<String> {
        let name = provider_name(self.provider);
        let body = request_body(
            self.provider,
            &self.model,
            self.max_output_tokens,
            &user_message(context, question),
        );
        let headers = self.headers()?;

        self.runtime.block_on(async {
            let resp = self
                .http
                .post(self.url())
                .headers(headers)
                .json(&body)
                .send()
                .await
                .map_err(|e| Error::Llm(format!("{name} request failed: {e}")))?;
            let status = resp.status();
            let text = resp
                .text()
                .await
                .map_err(|e| Error::Llm(format!("{name} read body failed: {e}")))?;
            if !status.is_success() {
                return Err(Error::Llm(format!(
                    "{name} returned {}: {}",
                    status.as_u16(),
                    text
                )));
            }
            let json: Value = serde_json::from_str(&text)?;
            extract_answer(self.provider, &json)
        })
    }
}
