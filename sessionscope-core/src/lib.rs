//! # sessionscope-core
//!
//! Core library for sessionscope - a viewer and auditor for AI coding agent
//! session logs.
//!
//! This library provides:
//! - A tolerant, streaming parser for Codex and Gemini CLI session logs
//! - Repository label derivation from session metadata
//! - AGENTS-style rule documents parsed into checkable rules
//! - Misalignment detection of session events against those rules
//! - Prompt assembly for a chat assistant, within a token budget
//! - Configuration, logging and a local SQLite store
//!
//! ## Architecture
//!
//! Data flows through three stages:
//! - **Ingest:** raw log bytes → [`SessionMeta`] + [`ResponseItem`]s (+ per-line [`ParserError`]s)
//! - **Audit:** [`SessionSnapshot`] + [`AgentRule`]s → [`MisalignmentRecord`]s
//! - **Assist:** snapshot, records, rules and chat history → [`ChatContext`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use sessionscope_core::{detect_misalignments, parse_session_path, Config, RulesCache};
//! use std::path::Path;
//!
//! let config = Config::load().expect("failed to load config");
//! let parsed = parse_session_path(Path::new("rollout.jsonl"), &config.parser.options());
//! let snapshot = parsed.into_snapshot("rollout");
//!
//! let mut rules = RulesCache::new(config.rules.clone());
//! let loaded = rules.load(Path::new(".")).expect("failed to load rules");
//! let records = detect_misalignments(&snapshot, &loaded.rules, Utc::now());
//! ```

// Re-export commonly used items at the crate root
pub use chat::{ask, create_chat_client, ChatClient, ChatExchange, HttpChatClient};
pub use config::Config;
pub use context::{build_chat_context, estimate_tokens, render_prompt, ChatContext, ContextRequest, PromptSection};
pub use db::Database;
pub use detect::{
    clamp_event_range, detect_misalignments, pick_higher_severity, rank_records,
    select_primary_misalignment, slice_events_by_range,
};
pub use error::{Error, Result};
pub use ingest::{
    parse_session, parse_session_path, ParseProgress, ParsedSession, ParserItem, ParserOptions,
    SessionStream,
};
pub use repo::{derive_repo_details, derive_repo_details_from_line, RepoDetails};
pub use rules::{parse_agent_rules, truncate_rule_title, DuplicateCheck, InstructionIndex, RulesCache};
pub use types::*;

// Public modules
pub mod chat;
pub mod config;
pub mod context;
pub mod db;
pub mod detect;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod repo;
pub mod rules;
pub mod types;
