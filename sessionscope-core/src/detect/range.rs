//! Event range selection over a session timeline

use crate::types::ResponseItem;
use serde::{Deserialize, Serialize};

/// Requested bounds. Either side may be missing or out of range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeRequest {
    #[serde(default)]
    pub start_index: Option<i64>,
    #[serde(default)]
    pub end_index: Option<i64>,
}

impl RangeRequest {
    pub fn new(start_index: i64, end_index: i64) -> Self {
        Self {
            start_index: Some(start_index),
            end_index: Some(end_index),
        }
    }
}

/// Bounds after clamping to `[0, total_events - 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClampedRange {
    pub start_index: usize,
    pub end_index: usize,
    pub total_events: usize,
    /// An explicit bound was given and there are events to apply it to
    pub applied: bool,
}

/// Clamp a requested range to a timeline of `total_events`.
///
/// Missing bounds default to the whole timeline; reversed bounds are swapped.
/// An empty timeline always yields `0..=0`, not applied.
pub fn clamp_event_range(total_events: usize, request: Option<RangeRequest>) -> ClampedRange {
    let request = request.unwrap_or_default();
    let max_index = total_events.saturating_sub(1);
    let clamp = |value: i64| -> usize {
        usize::try_from(value.max(0))
            .unwrap_or(usize::MAX)
            .min(max_index)
    };

    let mut start = request.start_index.map(clamp).unwrap_or(0);
    let mut end = request.end_index.map(clamp).unwrap_or(max_index);
    if start > end {
        std::mem::swap(&mut start, &mut end);
    }

    let explicit = request.start_index.is_some() || request.end_index.is_some();
    if total_events == 0 {
        return ClampedRange {
            start_index: 0,
            end_index: 0,
            total_events,
            applied: false,
        };
    }
    ClampedRange {
        start_index: start,
        end_index: end,
        total_events,
        applied: explicit,
    }
}

/// Events whose resolved index falls inside the clamped range.
///
/// When no bound applies, every event is returned.
pub fn slice_events_by_range<'a>(
    events: &'a [ResponseItem],
    request: Option<RangeRequest>,
) -> (Vec<&'a ResponseItem>, ClampedRange) {
    let range = clamp_event_range(events.len(), request);
    if !range.applied {
        return (events.iter().collect(), range);
    }
    let sliced = events
        .iter()
        .enumerate()
        .filter(|(position, event)| {
            let index = event.resolved_index(*position);
            index >= range.start_index && index <= range.end_index
        })
        .map(|(_, event)| event)
        .collect();
    (sliced, range)
}
