//! Agent rules: markdown governance documents (`AGENTS.md` and friends)
//! parsed into [`AgentRule`](crate::types::AgentRule)s.
//!
//! | Module | Role |
//! |--------|------|
//! | [`parser`] | Markdown → rules, severity and keyword inference |
//! | [`format`] | Title truncation and display strings |
//! | [`cache`] | File discovery, duplicate detection, per-root cache |

pub mod cache;
pub mod format;
pub mod parser;

pub use cache::{
    content_hash, discover_instruction_files, DuplicateCheck, InstructionFile, InstructionIndex,
    LoadedRules, RulesCache,
};
pub use format::{format_rule_entry, truncate_rule_title, DEFAULT_TITLE_WIDTH};
pub use parser::{infer_severity, parse_agent_rules, SEVERITY_MARKERS};
