//! Error types for sessionscope-core
//!
//! Bad input lines are not errors: they surface as
//! [`ParserError`](crate::types::ParserError) items in the parse stream.
//! This enum covers storage, configuration and programming mistakes.

use thiserror::Error;

/// Main error type for the sessionscope-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// LLM provider error
    #[error("LLM error: {0}")]
    Llm(String),

    /// A value that should have been one of a closed set was not
    #[error("invalid {kind}: {value}")]
    InvalidValue { kind: &'static str, value: String },

    /// Misalignment status change not allowed by the transition table
    #[error("cannot move misalignment from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Prompt budget cannot be satisfied with the configured limits
    #[error("context budget error: {0}")]
    Budget(String),

    /// Session not found
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Misalignment not found
    #[error("misalignment not found: {0}")]
    MisalignmentNotFound(String),
}

/// Result type alias for sessionscope-core
pub type Result<T> = std::result::Result<T, Error>;
