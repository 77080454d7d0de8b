//! Plain-text output for the CLI commands

use sessionscope_core::db::SnapshotSummary;
use sessionscope_core::detect::{select_primary_misalignment, severity_label, ClampedRange};
use sessionscope_core::ingest::ParsePhase;
use sessionscope_core::rules::format::{format_flag_label, relative_source};
use sessionscope_core::rules::{format_rule_entry, truncate_rule_title, LoadedRules, DEFAULT_TITLE_WIDTH};
use sessionscope_core::{AgentRule, MisalignmentRecord};
use std::collections::BTreeMap;

use crate::session::LoadedSession;

/// Errors listed before the rest are summarized as a count.
const MAX_LISTED_ERRORS: usize = 10;

pub fn print_parse_summary(loaded: &LoadedSession) {
    let parsed = &loaded.parsed;
    println!("Session:   {}", loaded.session_id());
    if let Some(meta) = &parsed.meta {
        println!("Started:   {}", meta.timestamp);
        if let Some(origin) = meta.origin {
            println!("Origin:    {}", origin.display_name());
        }
        println!("Version:   {}", meta.version_or_default());
    }
    if let Some(label) = &loaded.repo.repo_label {
        println!("Repo:      {}", label);
    }
    if let Some(root) = &loaded.repo.workspace_root {
        println!("Workspace: {}", root);
    }

    println!();
    println!("Lines:     {}", parsed.stats.total_lines);
    println!("Events:    {}", parsed.stats.parsed_events);
    println!("Failed:    {}", parsed.stats.failed_lines);
    println!("Phase:     {}", phase_name(parsed.phase()));

    let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
    for event in &parsed.events {
        *by_type.entry(event.type_name()).or_default() += 1;
    }
    if !by_type.is_empty() {
        println!("\nEvent types:");
        for (name, count) in &by_type {
            println!("  {:<20} {}", name, count);
        }
    }

    if !parsed.errors.is_empty() {
        println!("\nSkipped lines:");
        for error in parsed.errors.iter().take(MAX_LISTED_ERRORS) {
            println!("  line {}: {} ({})", error.line, error.reason, error.message);
        }
        if parsed.errors.len() > MAX_LISTED_ERRORS {
            println!("  ... and {} more", parsed.errors.len() - MAX_LISTED_ERRORS);
        }
    }
}

fn phase_name(phase: ParsePhase) -> &'static str {
    match phase {
        ParsePhase::Idle => "idle",
        ParsePhase::Parsing => "parsing",
        ParsePhase::Success => "success",
        ParsePhase::Error => "error",
    }
}

pub fn print_rules(loaded: &LoadedRules) {
    if loaded.files.is_empty() {
        println!("No instruction files under {}", loaded.root.display());
        return;
    }

    println!("Instruction files:");
    for file in &loaded.files {
        let path = relative_source(&loaded.root, &file.path.to_string_lossy());
        match &file.duplicate_of {
            Some(original) => println!(
                "  {} (duplicate of {})",
                path,
                relative_source(&loaded.root, &original.to_string_lossy())
            ),
            None => println!("  {} ({} rules)", path, file.rule_count),
        }
    }

    println!();
    for (i, rule) in loaded.rules.iter().enumerate() {
        println!("{}", format_rule_entry(i + 1, rule));
        if let Some(source) = &rule.source {
            println!("  from {}", relative_source(&loaded.root, source));
        }
        println!();
    }
}

pub fn print_check(
    session_id: &str,
    rules: &[AgentRule],
    records: &[MisalignmentRecord],
    range: ClampedRange,
) {
    let scope = if range.applied {
        format!("events {}-{}", range.start_index, range.end_index)
    } else {
        format!("{} events", range.total_events)
    };
    println!(
        "Checked {} ({}) against {} rule(s)",
        session_id,
        scope,
        rules.len()
    );

    if records.is_empty() {
        println!("No misalignments found.");
        return;
    }

    if let Some(primary) = select_primary_misalignment(records) {
        println!(
            "\n{} severity: {}",
            severity_label(primary.severity),
            truncate_rule_title(&primary.title, DEFAULT_TITLE_WIDTH)
        );
    }

    for record in records {
        println!(
            "\n[{}] {} ({})",
            record.severity.as_str().to_uppercase(),
            truncate_rule_title(&record.title, DEFAULT_TITLE_WIDTH),
            record.status
        );
        println!("  id:      {}", record.id);
        println!("  summary: {}", record.summary);
        if let Some(range) = &record.event_range {
            println!("  events:  {}-{}", range.start_index, range.end_index);
        }
        for evidence in &record.evidence {
            let at = evidence
                .event_index
                .map(|i| format!("#{} ", i))
                .unwrap_or_default();
            println!("  - {}{}", at, evidence.message);
        }
    }

    let flagged = flag_labels(records);
    if !flagged.is_empty() {
        println!("\nFlagged events:");
        for (index, label) in flagged {
            println!("  #{}: {}", index, label);
        }
    }
}

/// Per-event labels for every event some record points at.
fn flag_labels(records: &[MisalignmentRecord]) -> Vec<(usize, String)> {
    let mut by_event: BTreeMap<usize, Vec<&MisalignmentRecord>> = BTreeMap::new();
    for record in records.iter().filter(|r| r.is_open()) {
        for index in record.evidence.iter().filter_map(|e| e.event_index) {
            let entry = by_event.entry(index).or_default();
            if !entry.iter().any(|r| r.id == record.id) {
                entry.push(record);
            }
        }
    }
    by_event
        .into_iter()
        .filter_map(|(index, group)| format_flag_label(&group).map(|label| (index, label)))
        .collect()
}

pub fn print_sessions(sessions: &[SnapshotSummary]) {
    println!(
        "{:<40} {:<10} {:>7}  {}",
        "SESSION", "ORIGIN", "EVENTS", "UPDATED"
    );
    for session in sessions {
        println!(
            "{:<40} {:<10} {:>7}  {}",
            session.session_id,
            session.origin.map(|o| o.as_str()).unwrap_or("-"),
            session.event_count,
            session.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
}
