//! Loading a session file for the CLI commands

use anyhow::{Context, Result};
use sessionscope_core::detect::{ClampedRange, RangeRequest};
use sessionscope_core::ingest::{ParsedSession, ParserOptions};
use sessionscope_core::{
    derive_repo_details, slice_events_by_range, ChatMessage, Config, Database, RepoDetails,
    SessionSnapshot,
};
use std::path::{Path, PathBuf};

/// A parsed session file plus what the CLI derives from it.
pub struct LoadedSession {
    pub path: PathBuf,
    pub parsed: ParsedSession,
    pub repo: RepoDetails,
}

impl LoadedSession {
    /// Parse `path`. Bad lines are kept as errors; only unreadable files fail.
    pub fn load(path: &Path, options: &ParserOptions) -> Result<Self> {
        let parsed = sessionscope_core::parse_session_path(path, options);
        if parsed.is_fatal() {
            let message = parsed
                .errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_default();
            anyhow::bail!("cannot parse {}: {}", path.display(), message);
        }

        let repo = parsed
            .meta
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .context("failed to encode session metadata")?
            .map(|value| derive_repo_details(&value))
            .unwrap_or_default();

        Ok(Self {
            path: path.to_path_buf(),
            parsed,
            repo,
        })
    }

    /// Fallback session ID: the file name without extension.
    pub fn file_stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "session".to_string())
    }

    pub fn session_id(&self) -> String {
        self.parsed.session_id(&self.file_stem())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.parsed.clone().into_snapshot(&self.file_stem())
    }

    /// Where to look for rules: the explicit root, else the session's
    /// working directory when it exists here, else the current directory.
    pub fn rules_root(&self, explicit: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(root) = explicit {
            if !root.is_dir() {
                anyhow::bail!("rules root {} is not a directory", root.display());
            }
            return Ok(root);
        }
        if let Some(cwd) = self.repo.workspace_root.as_deref().map(PathBuf::from) {
            if cwd.is_dir() {
                return Ok(cwd);
            }
        }
        std::env::current_dir().context("failed to read current directory")
    }
}

/// Snapshot limited to the requested event range.
pub fn restrict_to_range(
    snapshot: &SessionSnapshot,
    range: Option<RangeRequest>,
) -> (SessionSnapshot, ClampedRange) {
    let (events, clamped) = slice_events_by_range(&snapshot.events, range);
    let restricted = SessionSnapshot {
        events: events.into_iter().cloned().collect(),
        ..snapshot.clone()
    };
    (restricted, clamped)
}

/// Chat history saved for a session, empty when there is no database yet.
pub fn stored_history(session_id: &str) -> Result<Vec<ChatMessage>> {
    let db_path = Config::database_path();
    if !db_path.exists() {
        return Ok(Vec::new());
    }
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;
    Ok(db.list_chat_messages(session_id)?)
}
