//! Severity ordering and record ranking

use crate::types::{MisalignmentRecord, Severity};
use std::cmp::Ordering;

/// The more severe of two severities. `a` wins ties.
pub fn pick_higher_severity(a: Severity, b: Severity) -> Severity {
    if a.rank() >= b.rank() {
        a
    } else {
        b
    }
}

/// Coarse three-level label shown on banners: critical and high read
/// "High", info reads "Low".
pub fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical | Severity::High => "High",
        Severity::Medium => "Medium",
        Severity::Low | Severity::Info => "Low",
    }
}

fn start_index(record: &MisalignmentRecord) -> usize {
    record
        .event_range
        .as_ref()
        .map(|r| r.start_index)
        .unwrap_or(usize::MAX)
}

/// Display order: severity descending, then earliest start index.
///
/// Records without a range sort after ranged records of the same severity.
pub fn compare_records(a: &MisalignmentRecord, b: &MisalignmentRecord) -> Ordering {
    b.severity
        .rank()
        .cmp(&a.severity.rank())
        .then_with(|| start_index(a).cmp(&start_index(b)))
}

/// Sort records into display order. The sort is stable, so records that
/// compare equal keep their input order.
pub fn rank_records(records: &mut [MisalignmentRecord]) {
    records.sort_by(compare_records);
}

/// The record a banner should lead with: highest severity, earliest start,
/// among records that are still open.
pub fn select_primary_misalignment(records: &[MisalignmentRecord]) -> Option<&MisalignmentRecord> {
    records
        .iter()
        .filter(|r| r.is_open())
        .reduce(|best, candidate| {
            if compare_records(candidate, best) == Ordering::Less {
                candidate
            } else {
                best
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventRange, MisalignmentStatus};
    use chrono::Utc;

    fn record(rule: &str, severity: Severity, start: Option<usize>) -> MisalignmentRecord {
        let now = Utc::now();
        MisalignmentRecord {
            id: format!("mis-s-{}", rule),
            session_id: "s".into(),
            rule_id: rule.into(),
            title: rule.into(),
            summary: String::new(),
            severity,
            status: MisalignmentStatus::New,
            event_range: start.map(|s| EventRange {
                start_index: s,
                end_index: s,
                start_at: None,
                end_at: None,
            }),
            evidence: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_rank_strictly_increasing() {
        for pair in Severity::ALL.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
    }

    #[test]
    fn test_pick_higher_commutative_and_idempotent() {
        for a in Severity::ALL {
            assert_eq!(pick_higher_severity(a, a), a);
            for b in Severity::ALL {
                assert_eq!(pick_higher_severity(a, b), pick_higher_severity(b, a));
            }
        }
        assert_eq!(
            pick_higher_severity(Severity::Low, Severity::Critical),
            Severity::Critical
        );
    }

    #[test]
    fn test_rank_records() {
        let mut records = vec![
            record("a", Severity::Low, Some(0)),
            record("b", Severity::High, Some(7)),
            record("c", Severity::High, Some(2)),
            record("d", Severity::High, None),
        ];
        rank_records(&mut records);
        let order: Vec<&str> = records.iter().map(|r| r.rule_id.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "d", "a"]);
    }

    #[test]
    fn test_primary_skips_dismissed() {
        let mut critical = record("crit", Severity::Critical, Some(4));
        critical.status = MisalignmentStatus::Dismissed;
        let records = vec![
            record("med", Severity::Medium, Some(1)),
            critical,
            record("high-late", Severity::High, Some(9)),
            record("high-early", Severity::High, Some(3)),
        ];
        let primary = select_primary_misalignment(&records).unwrap();
        assert_eq!(primary.rule_id, "high-early");

        assert!(select_primary_misalignment(&[]).is_none());
    }

    #[test]
    fn test_severity_label() {
        assert_eq!(severity_label(Severity::Critical), "High");
        assert_eq!(severity_label(Severity::Info), "Low");
    }
}
