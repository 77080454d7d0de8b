//! Integration tests for the sessionscope ingest → audit → assist pipeline
//!
//! These tests use fixture files in `tests/fixtures/` to verify parsing,
//! rule loading, detection and storage end to end.

use chrono::{TimeZone, Utc};
use sessionscope_core::config::{ChatConfig, RulesConfig};
use sessionscope_core::db::Database;
use sessionscope_core::detect::RangeRequest;
use sessionscope_core::ingest::{parse_session, parse_session_path, ParserOptions};
use sessionscope_core::types::*;
use sessionscope_core::{
    build_chat_context, clamp_event_range, derive_repo_details, derive_repo_details_from_line,
    detect_misalignments, parse_agent_rules, pick_higher_severity, truncate_rule_title,
    ContextRequest, RulesCache,
};
use serde_json::json;
use std::path::PathBuf;
use tempfile::TempDir;

/// Get the path to a fixture file
fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn detected_at() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

// ============================================
// Parsing Tests
// ============================================

#[test]
fn test_parse_codex_rollout() {
    let parsed = parse_session_path(
        &fixture_path("codex/rollout-basic.jsonl"),
        &ParserOptions::default(),
    );

    assert!(parsed.errors.is_empty(), "unexpected errors: {:?}", parsed.errors);
    let meta = parsed.meta.as_ref().expect("meta line should be recognized");
    assert_eq!(meta.id.as_deref(), Some("sess-e2e"));
    assert_eq!(meta.origin, Some(SessionOrigin::Codex));
    assert_eq!(meta.instructions.as_deref(), Some("Follow AGENTS.md"));

    assert_eq!(parsed.events.len(), 2);
    assert_eq!(parsed.events[0].type_name(), "Message");
    assert_eq!(parsed.events[1].type_name(), "LocalShellCall");
    assert_eq!(parsed.events[1].id.as_deref(), Some("ev-2"));
    let indices: Vec<_> = parsed.events.iter().map(|e| e.index).collect();
    assert_eq!(indices, vec![Some(0), Some(1)]);
}

#[test]
fn test_instructions_never_serialized() {
    let parsed = parse_session_path(
        &fixture_path("codex/rollout-basic.jsonl"),
        &ParserOptions::default(),
    );
    let json = serde_json::to_string(&parsed).unwrap();
    assert!(!json.contains("Follow AGENTS.md"));
}

#[test]
fn test_malformed_lines_are_counted_not_fatal() {
    let parsed = parse_session_path(
        &fixture_path("codex/malformed.jsonl"),
        &ParserOptions::default(),
    );

    assert!(!parsed.is_fatal());
    assert_eq!(parsed.meta.as_ref().and_then(|m| m.id.as_deref()), Some("sess-bad"));
    assert_eq!(parsed.events.len(), 2);

    let reasons: Vec<_> = parsed.errors.iter().map(|e| (e.line, e.reason)).collect();
    assert_eq!(
        reasons,
        vec![
            (3, ParseFailureReason::InvalidJson),
            (4, ParseFailureReason::InvalidJson),
            (6, ParseFailureReason::InvalidSchema),
        ]
    );

    // Six non-empty lines: one meta, two events, three failures
    let source = std::fs::read_to_string(fixture_path("codex/malformed.jsonl")).unwrap();
    let non_empty = source.lines().filter(|l| !l.trim().is_empty()).count();
    let meta_lines = usize::from(parsed.meta.is_some());
    assert_eq!(meta_lines + parsed.events.len() + parsed.errors.len(), non_empty);
}

#[test]
fn test_single_bad_line_isolated() {
    let input = "{\"id\":\"s1\",\"timestamp\":\"2024-01-01T00:00:00Z\"}\n{not json}\n{\"type\":\"Message\",\"role\":\"user\",\"content\":\"hi\"}";
    let parsed = parse_session(input.as_bytes(), &ParserOptions::default());

    assert_eq!(parsed.meta.unwrap().id.as_deref(), Some("s1"));
    assert_eq!(parsed.errors.len(), 1);
    assert_eq!(parsed.errors[0].line, 2);
    assert_eq!(parsed.events.len(), 1);
    assert!(matches!(
        parsed.events[0].kind,
        EventKind::Message { role: Role::User, .. }
    ));
}

#[test]
fn test_shell_output_folds_into_its_call() {
    let parsed = parse_session_path(
        &fixture_path("codex/paired-calls.jsonl"),
        &ParserOptions::default(),
    );

    assert!(parsed.errors.is_empty(), "unexpected errors: {:?}", parsed.errors);
    assert_eq!(parsed.stats.total_lines, 4);
    assert_eq!(parsed.events.len(), 2);
    match &parsed.events[0].kind {
        EventKind::LocalShellCall {
            command,
            stdout,
            exit_code,
            duration_ms,
            call_id,
            ..
        } => {
            assert_eq!(command, "bash -lc cargo test");
            assert_eq!(stdout.as_deref(), Some("test result: ok"));
            assert_eq!(*exit_code, Some(0));
            assert_eq!(*duration_ms, Some(3500));
            assert_eq!(call_id.as_deref(), Some("call_1"));
        }
        other => panic!("expected shell call, got {:?}", other),
    }
    assert_eq!(parsed.events[1].type_name(), "Message");
    assert_eq!(parsed.events[1].index, Some(1));
}

#[test]
fn test_huge_explicit_index_is_not_fatal() {
    let input = format!(
        "{{\"timestamp\":\"2024-01-01T00:00:00Z\"}}\n\
         {{\"type\":\"Message\",\"role\":\"user\",\"content\":\"a\",\"index\":{}}}\n\
         {{\"type\":\"Message\",\"role\":\"user\",\"content\":\"b\"}}\n",
        u64::MAX
    );
    let parsed = parse_session(input.as_bytes(), &ParserOptions::default());

    assert!(parsed.errors.is_empty());
    assert_eq!(parsed.events.len(), 2);
    assert!(parsed.events[1].index >= parsed.events[0].index);
}

#[test]
fn test_parse_gemini_conversation_document() {
    let parsed = parse_session_path(
        &fixture_path("gemini/conversation.json"),
        &ParserOptions::default(),
    );

    assert!(parsed.errors.is_empty());
    let meta = parsed.meta.as_ref().unwrap();
    assert_eq!(meta.id.as_deref(), Some("gemini-42"));
    assert_eq!(meta.origin, Some(SessionOrigin::GeminiCli));

    let shell = parsed
        .events
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::LocalShellCall { command, .. } => Some(command.as_str()),
            _ => None,
        })
        .expect("tool call should become a shell event");
    assert_eq!(shell, "ls -la");
    assert!(parsed
        .events
        .iter()
        .all(|e| e.origin == Some(SessionOrigin::GeminiCli)));
}

#[test]
fn test_repo_label_from_meta_line() {
    let source = std::fs::read_to_string(fixture_path("codex/rollout-basic.jsonl")).unwrap();
    let first = source.lines().next().unwrap();
    let details = derive_repo_details_from_line(first);

    assert_eq!(details.repo_label.as_deref(), Some("acme/widgets"));
    assert_eq!(details.workspace_root.as_deref(), Some("/home/dev/widgets"));
    assert_eq!(
        details.repo_meta.and_then(|m| m.branch).as_deref(),
        Some("main")
    );
}

#[test]
fn test_numeric_repo_candidates_fall_through() {
    let details = derive_repo_details(&json!({
        "git": {"repo": "12345"},
        "source": {"repository_url": "https://github.com/acme/widgets.git"}
    }));
    assert_eq!(details.repo_label.as_deref(), Some("acme/widgets"));

    let details = derive_repo_details(&json!({
        "repoLabel": "998877",
        "cwd": "/home/u/widgets"
    }));
    assert_eq!(details.repo_label.as_deref(), Some("widgets"));
}

#[test]
fn test_repo_label_skips_nested_generic_dirs() {
    let details = derive_repo_details(&json!({"cwd": "/home/u/widgets/src/lib"}));
    assert_eq!(details.repo_label.as_deref(), Some("widgets"));
}

// ============================================
// Rules Tests
// ============================================

#[test]
fn test_rule_ids_unique_with_suffixed_heading() {
    let markdown = "# Data\n- keep `schema.sql` in sync\n\n\
                    # Data\n- never drop `users`\n\n\
                    # Data 2\n- back up `dumps/` first\n";
    let rules = parse_agent_rules(markdown, None);
    let ids: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();

    assert_eq!(ids.len(), 3);
    let unique: std::collections::HashSet<&str> = ids.iter().copied().collect();
    assert_eq!(unique.len(), 3, "ids collide: {:?}", ids);
    assert_eq!(ids[0], "data");
    assert_eq!(ids[1], "data-2");
}

#[test]
fn test_identical_rules_in_two_roots() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("first");
    let second = dir.path().join("second");
    for root in [&first, &second] {
        std::fs::create_dir_all(root).unwrap();
        std::fs::write(
            root.join("AGENTS.md"),
            "# No force deletes\n- Never run `rm -rf`.\n",
        )
        .unwrap();
    }

    let mut cache = RulesCache::new(RulesConfig::default());
    assert_eq!(cache.load(&first).unwrap().rules.len(), 1);

    let loaded = cache.load(&second).unwrap();
    assert_eq!(loaded.rules.len(), 1);
    assert!(loaded.files[0].duplicate_of.is_none());
    assert_eq!(loaded.files[0].rule_count, 1);
}

#[test]
fn test_rules_load_and_duplicate_detection() {
    let root = fixture_path("repo");
    let mut cache = RulesCache::new(RulesConfig::default());
    let loaded = cache.load(&root).unwrap();

    assert_eq!(loaded.files.len(), 2);
    assert!(loaded.files[0].duplicate_of.is_none());
    assert_eq!(
        loaded.files[1].duplicate_of.as_deref(),
        Some(root.join("AGENTS.md").as_path())
    );
    assert_eq!(loaded.files[1].rule_count, 0);

    let headings: Vec<_> = loaded.rules.iter().map(|r| r.heading.as_str()).collect();
    assert!(headings.contains(&"No force deletes"));
    let force = loaded
        .rules
        .iter()
        .find(|r| r.id == "no-force-deletes")
        .unwrap();
    assert_eq!(force.severity, Severity::High);
    assert_eq!(force.keywords, vec!["rm -rf"]);
}

#[test]
fn test_duplicate_check_by_content() {
    let dir = TempDir::new().unwrap();
    let a = dir.path().join("a.md");
    let b = dir.path().join("nested-b.md");
    let c = dir.path().join("c.md");
    std::fs::write(&a, "# Rules\n- be careful\n").unwrap();
    std::fs::write(&b, "# Rules\n- be careful\n").unwrap();
    std::fs::write(&c, "# Other rules\n").unwrap();

    let mut cache = RulesCache::new(RulesConfig::default());
    assert!(!cache.check_duplicate_file(&a).is_duplicate);

    let dup = cache.check_duplicate_file(&b);
    assert!(dup.is_duplicate);
    assert_eq!(dup.existing_path.as_deref(), Some(a.as_path()));

    assert!(!cache.check_duplicate_file(&c).is_duplicate);
}

#[test]
fn test_truncation_idempotent() {
    let long = "Always run the full integration suite before pushing changes to any shared branch";
    let once = truncate_rule_title(long, 70);
    assert!(once.chars().count() <= 70);
    assert_eq!(truncate_rule_title(&once, 70), once);
}

// ============================================
// Detection Tests
// ============================================

fn e2e_snapshot() -> SessionSnapshot {
    parse_session_path(
        &fixture_path("codex/rollout-basic.jsonl"),
        &ParserOptions::default(),
    )
    .into_snapshot("rollout-basic")
}

#[test]
fn test_end_to_end_single_misalignment() {
    sessionscope_core::logging::init_test();
    let snapshot = e2e_snapshot();
    let mut cache = RulesCache::new(RulesConfig::default());
    let rules = cache.load(&fixture_path("repo")).unwrap().rules.clone();

    let records = detect_misalignments(&snapshot, &rules, detected_at());
    assert_eq!(records.len(), 1, "records: {:?}", records);

    let record = &records[0];
    assert_eq!(record.id, "mis-sess-e2e-no-force-deletes");
    assert_eq!(record.status, MisalignmentStatus::New);
    let range = record.event_range.as_ref().unwrap();
    assert!(range.start_index <= 1 && range.end_index >= 1);
    assert!(record
        .evidence
        .iter()
        .any(|e| e.event_id.as_deref() == Some("ev-2")));
    assert_eq!(record.evidence[0].highlight.as_deref(), Some("rm -rf"));
}

#[test]
fn test_detector_is_deterministic() {
    let snapshot = e2e_snapshot();
    let mut cache = RulesCache::new(RulesConfig::default());
    let rules = cache.load(&fixture_path("repo")).unwrap().rules.clone();

    let first = serde_json::to_string(&detect_misalignments(&snapshot, &rules, detected_at())).unwrap();
    let second = serde_json::to_string(&detect_misalignments(&snapshot, &rules, detected_at())).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_range_clamp_examples() {
    let clamped = clamp_event_range(10, Some(RangeRequest::new(-5, 40)));
    assert_eq!((clamped.start_index, clamped.end_index), (0, 9));
    assert!(clamped.applied);

    let swapped = clamp_event_range(10, Some(RangeRequest::new(8, 2)));
    assert_eq!((swapped.start_index, swapped.end_index), (2, 8));
}

#[test]
fn test_severity_total_order() {
    for pair in Severity::ALL.windows(2) {
        assert!(pair[0].rank() < pair[1].rank());
    }
    for a in Severity::ALL {
        assert_eq!(pick_higher_severity(a, a), a);
        for b in Severity::ALL {
            assert_eq!(pick_higher_severity(a, b), pick_higher_severity(b, a));
        }
    }
}

// ============================================
// Storage and Context Tests
// ============================================

#[test]
fn test_store_detect_and_acknowledge() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("data.db")).unwrap();
    db.migrate().unwrap();

    let snapshot = e2e_snapshot();
    let mut cache = RulesCache::new(RulesConfig::default());
    let rules = cache.load(&fixture_path("repo")).unwrap().rules.clone();
    let records = detect_misalignments(&snapshot, &rules, detected_at());

    db.upsert_snapshot(&snapshot, Some(&fixture_path("codex/rollout-basic.jsonl")))
        .unwrap();
    db.upsert_misalignments(&records).unwrap();

    let stored = db.require_snapshot("sess-e2e").unwrap();
    assert!(stored.meta.unwrap().instructions.is_none());
    assert_eq!(stored.events.len(), 2);

    let updated = db
        .update_misalignment_status(&records[0].id, MisalignmentStatus::Acknowledged, Utc::now())
        .unwrap();
    assert_eq!(updated.status, MisalignmentStatus::Acknowledged);

    // Re-detection keeps the reviewed status
    db.upsert_misalignments(&detect_misalignments(&snapshot, &rules, Utc::now()))
        .unwrap();
    let listed = db.list_misalignments("sess-e2e").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, MisalignmentStatus::Acknowledged);
}

#[test]
fn test_context_includes_rules_and_misalignments() {
    let snapshot = e2e_snapshot();
    let mut cache = RulesCache::new(RulesConfig::default());
    let rules = cache.load(&fixture_path("repo")).unwrap().rules.clone();
    let records = detect_misalignments(&snapshot, &rules, detected_at());

    let mut request = ContextRequest::new(&snapshot);
    request.rules = &rules;
    request.misalignments = &records;
    let context = build_chat_context(&request, &ChatConfig::default()).unwrap();

    assert!(context.used_tokens <= context.budget_tokens);
    assert!(context.prompt.contains("No force deletes"));
    assert!(context.prompt.contains("rm -rf build"));
    assert!(context.trimmed_section_ids.is_empty());
}
