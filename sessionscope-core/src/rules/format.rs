//! Display helpers for rules and the misalignments raised against them

use crate::types::{AgentRule, MisalignmentRecord};
use std::path::Path;

/// Width used for rule titles in one-line summaries.
pub const DEFAULT_TITLE_WIDTH: usize = 70;

const ELLIPSIS: &str = "...";

/// Shorten a rule title to at most `max` characters, ending in `...` when cut.
///
/// Applying it twice with the same `max` gives the same string as applying it
/// once.
pub fn truncate_rule_title(title: &str, max: usize) -> String {
    if title.chars().count() <= max {
        return title.to_string();
    }
    if max < ELLIPSIS.len() {
        return title.chars().take(max).collect();
    }
    let kept: String = title.chars().take(max - ELLIPSIS.len()).collect();
    format!("{}{}", kept.trim_end(), ELLIPSIS)
}

/// Rule source relative to the repository root, `/`-separated.
///
/// Sources outside the root are returned unchanged.
pub fn relative_source(root: &Path, source: &str) -> String {
    match Path::new(source).strip_prefix(root) {
        Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
        Err(_) => source.to_string(),
    }
}

/// Numbered entry for prompts and terminal listings.
///
/// ```text
/// 2. Git hygiene [HIGH]
/// Keep history linear.
///   - Do not force push
/// ```
pub fn format_rule_entry(position: usize, rule: &AgentRule) -> String {
    let mut entry = format!(
        "{}. {} [{}]\n{}",
        position,
        rule.heading,
        rule.severity.as_str().to_uppercase(),
        rule.summary
    );
    for bullet in &rule.bullets {
        entry.push_str("\n  - ");
        entry.push_str(bullet);
    }
    entry.trim().to_string()
}

/// One-line label for a group of records flagged on the same event, e.g.
/// `HIGH severity: GIT-HYGIENE “Git hygiene”`.
pub fn format_flag_label(records: &[&MisalignmentRecord]) -> Option<String> {
    let top = records.iter().map(|r| r.severity).max()?;
    let entries: Vec<String> = records
        .iter()
        .map(|r| {
            format!(
                "{} “{}”",
                r.rule_id.to_uppercase(),
                truncate_rule_title(&r.title, DEFAULT_TITLE_WIDTH)
            )
        })
        .collect();
    Some(format!(
        "{} severity: {}",
        top.as_str().to_uppercase(),
        entries.join(", ")
    ))
}
