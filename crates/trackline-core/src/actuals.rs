//! Actual start/finish inference over an issue's status history.
//!
//! Each side is an ordered cascade of named strategies. The first strategy
//! that selects an event wins and its method is recorded with the timestamp;
//! later strategies are never evaluated.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calendar::{business_days, Timestamp};
use crate::history::StatusChangeEvent;

/// Status labels the cascades match against. Matching is exact and
/// case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusVocabulary {
    pub start_statuses: Vec<String>,
    pub finish_statuses: Vec<String>,
    pub in_progress_status: String,
    pub planning_status: String,
    pub deployed_status: String,
}

impl Default for StatusVocabulary {
    fn default() -> Self {
        Self {
            start_statuses: vec!["In Progress".to_string(), "Code review".to_string()],
            finish_statuses: vec!["Deployed AC".to_string(), "Ready for deployment".to_string()],
            in_progress_status: "In Progress".to_string(),
            planning_status: "Ready for planning".to_string(),
            deployed_status: "Deployed AC".to_string(),
        }
    }
}

impl StatusVocabulary {
    pub fn is_start_status(&self, status: &str) -> bool {
        self.start_statuses.iter().any(|s| s == status)
    }

    pub fn is_finish_status(&self, status: &str) -> bool {
        self.finish_statuses.iter().any(|s| s == status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StartMethod {
    #[serde(rename = "First development status")]
    FirstDevelopmentStatus,
    #[serde(rename = "First 'In Progress' after planning")]
    FirstInProgressAfterPlanning,
    #[serde(rename = "First status change")]
    FirstStatusChange,
}

impl StartMethod {
    pub const fn label(self) -> &'static str {
        match self {
            Self::FirstDevelopmentStatus => "First development status",
            Self::FirstInProgressAfterPlanning => "First 'In Progress' after planning",
            Self::FirstStatusChange => "First status change",
        }
    }
}

impl fmt::Display for StartMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FinishMethod {
    #[serde(rename = "Last development finish status")]
    LastDevelopmentFinishStatus,
    #[serde(rename = "Last 'Deployed AC' status")]
    LastDeployedStatus,
    #[serde(rename = "Last status change")]
    LastStatusChange,
}

impl FinishMethod {
    pub const fn label(self) -> &'static str {
        match self {
            Self::LastDevelopmentFinishStatus => "Last development finish status",
            Self::LastDeployedStatus => "Last 'Deployed AC' status",
            Self::LastStatusChange => "Last status change",
        }
    }
}

impl fmt::Display for FinishMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A timestamp together with the strategy that selected it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDate<M> {
    pub at: Timestamp,
    pub method: M,
}

/// Inferred actual dates. A side is either fully present (timestamp and
/// method) or fully absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ActualDateResult {
    pub start: Option<ResolvedDate<StartMethod>>,
    pub finish: Option<ResolvedDate<FinishMethod>>,
}

impl ActualDateResult {
    pub fn start(&self) -> Option<Timestamp> {
        self.start.map(|resolved| resolved.at)
    }

    pub fn start_method(&self) -> Option<StartMethod> {
        self.start.map(|resolved| resolved.method)
    }

    pub fn finish(&self) -> Option<Timestamp> {
        self.finish.map(|resolved| resolved.at)
    }

    pub fn finish_method(&self) -> Option<FinishMethod> {
        self.finish.map(|resolved| resolved.method)
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.finish.is_none()
    }

    /// Business days from actual start to actual finish.
    pub fn duration(&self) -> Option<f64> {
        Some(business_days(&self.start()?, &self.finish()?))
    }
}

type Selector = fn(&[StatusChangeEvent], &StatusVocabulary) -> Option<usize>;

struct Strategy<M> {
    method: M,
    select: Selector,
}

const START_CASCADE: [Strategy<StartMethod>; 3] = [
    Strategy {
        method: StartMethod::FirstDevelopmentStatus,
        select: first_development_status,
    },
    Strategy {
        method: StartMethod::FirstInProgressAfterPlanning,
        select: first_in_progress_after_planning,
    },
    Strategy {
        method: StartMethod::FirstStatusChange,
        select: first_status_change,
    },
];

const FINISH_CASCADE: [Strategy<FinishMethod>; 3] = [
    Strategy {
        method: FinishMethod::LastDevelopmentFinishStatus,
        select: last_development_finish_status,
    },
    Strategy {
        method: FinishMethod::LastDeployedStatus,
        select: last_deployed_status,
    },
    Strategy {
        method: FinishMethod::LastStatusChange,
        select: last_status_change,
    },
];

/// Resolve actual start and finish from a chronologically ordered history.
pub fn infer_actual_dates(
    events: &[StatusChangeEvent],
    vocabulary: &StatusVocabulary,
) -> ActualDateResult {
    let result = ActualDateResult {
        start: run_cascade("start", &START_CASCADE, events, vocabulary),
        finish: run_cascade("finish", &FINISH_CASCADE, events, vocabulary),
    };
    debug!(
        events = events.len(),
        start = ?result.start(),
        start_method = ?result.start_method(),
        finish = ?result.finish(),
        finish_method = ?result.finish_method(),
        "inferred actual dates"
    );
    result
}

fn run_cascade<M: Copy + fmt::Debug>(
    side: &'static str,
    cascade: &[Strategy<M>],
    events: &[StatusChangeEvent],
    vocabulary: &StatusVocabulary,
) -> Option<ResolvedDate<M>> {
    cascade.iter().find_map(|strategy| {
        let selected = (strategy.select)(events, vocabulary);
        debug!(side, method = ?strategy.method, selected = ?selected, "evaluated strategy");
        selected.map(|index| ResolvedDate {
            at: events[index].occurred_at,
            method: strategy.method,
        })
    })
}

fn first_development_status(events: &[StatusChangeEvent], vocabulary: &StatusVocabulary) -> Option<usize> {
    events
        .iter()
        .position(|event| vocabulary.is_start_status(&event.to_status))
}

fn first_in_progress_after_planning(
    events: &[StatusChangeEvent],
    vocabulary: &StatusVocabulary,
) -> Option<usize> {
    let planned = events
        .iter()
        .position(|event| event.to_status == vocabulary.planning_status)?;
    events
        .iter()
        .enumerate()
        .skip(planned + 1)
        .find(|(_, event)| event.to_status == vocabulary.in_progress_status)
        .map(|(index, _)| index)
}

fn first_status_change(events: &[StatusChangeEvent], _vocabulary: &StatusVocabulary) -> Option<usize> {
    (!events.is_empty()).then_some(0)
}

fn last_development_finish_status(
    events: &[StatusChangeEvent],
    vocabulary: &StatusVocabulary,
) -> Option<usize> {
    events
        .iter()
        .rposition(|event| vocabulary.is_finish_status(&event.to_status))
}

fn last_deployed_status(events: &[StatusChangeEvent], vocabulary: &StatusVocabulary) -> Option<usize> {
    events
        .iter()
        .rposition(|event| event.to_status == vocabulary.deployed_status)
}

fn last_status_change(events: &[StatusChangeEvent], _vocabulary: &StatusVocabulary) -> Option<usize> {
    events.len().checked_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::parse_timestamp;

    fn event(at: &str, from: Option<&str>, to: &str) -> StatusChangeEvent {
        StatusChangeEvent::new(parse_timestamp(at).expect("timestamp"), from, to)
    }

    fn ts(raw: &str) -> Timestamp {
        parse_timestamp(raw).expect("timestamp")
    }

    #[test]
    fn empty_history_resolves_nothing() {
        let result = infer_actual_dates(&[], &StatusVocabulary::default());
        assert_eq!(result, ActualDateResult::default());
        assert!(result.is_empty());
        assert_eq!(result.start_method(), None);
        assert_eq!(result.finish_method(), None);
        assert_eq!(result.duration(), None);
    }

    #[test]
    fn development_statuses_win_on_both_sides() {
        let events = [
            event("2024-03-04T09:00:00Z", Some("Open"), "In Progress"),
            event("2024-03-06T17:00:00Z", Some("In Progress"), "Deployed AC"),
        ];
        let result = infer_actual_dates(&events, &StatusVocabulary::default());

        assert_eq!(result.start(), Some(ts("2024-03-04T09:00:00Z")));
        assert_eq!(result.start_method(), Some(StartMethod::FirstDevelopmentStatus));
        assert_eq!(result.finish(), Some(ts("2024-03-06T17:00:00Z")));
        assert_eq!(
            result.finish_method().map(FinishMethod::label),
            Some("Last development finish status")
        );
        assert_eq!(result.duration(), Some(3.0));
    }

    #[test]
    fn earliest_start_status_beats_later_planning_pattern() {
        let events = [
            event("2024-03-01T09:00:00Z", None, "Code review"),
            event("2024-03-04T09:00:00Z", None, "Ready for planning"),
            event("2024-03-05T09:00:00Z", None, "In Progress"),
        ];
        let result = infer_actual_dates(&events, &StatusVocabulary::default());

        assert_eq!(result.start(), Some(ts("2024-03-01T09:00:00Z")));
        assert_eq!(result.start_method(), Some(StartMethod::FirstDevelopmentStatus));
    }

    #[test]
    fn planning_pattern_applies_when_in_progress_is_not_a_start_status() {
        let vocabulary = StatusVocabulary {
            start_statuses: vec!["Code review".to_string()],
            ..StatusVocabulary::default()
        };
        let events = [
            event("2024-03-01T15:00:00Z", Some("Open"), "Ready for planning"),
            event("2024-03-04T10:00:00Z", Some("Ready for planning"), "In Progress"),
        ];
        let result = infer_actual_dates(&events, &vocabulary);

        assert_eq!(result.start(), Some(ts("2024-03-04T10:00:00Z")));
        assert_eq!(
            result.start_method().map(StartMethod::label),
            Some("First 'In Progress' after planning")
        );
    }

    #[test]
    fn in_progress_before_planning_does_not_count() {
        let vocabulary = StatusVocabulary {
            start_statuses: Vec::new(),
            ..StatusVocabulary::default()
        };
        let events = [
            event("2024-03-01T09:00:00Z", None, "In Progress"),
            event("2024-03-04T09:00:00Z", None, "Ready for planning"),
        ];
        let result = infer_actual_dates(&events, &vocabulary);

        assert_eq!(result.start(), Some(ts("2024-03-01T09:00:00Z")));
        assert_eq!(result.start_method(), Some(StartMethod::FirstStatusChange));
    }

    #[test]
    fn unmatched_history_falls_back_to_first_and_last_events() {
        let events = [
            event("2024-03-01T09:00:00Z", Some("Open"), "Triage"),
            event("2024-03-04T09:00:00Z", Some("Triage"), "Blocked"),
            event("2024-03-05T09:00:00Z", Some("Blocked"), "Closed"),
        ];
        let result = infer_actual_dates(&events, &StatusVocabulary::default());

        assert_eq!(result.start(), Some(ts("2024-03-01T09:00:00Z")));
        assert_eq!(result.start_method(), Some(StartMethod::FirstStatusChange));
        assert_eq!(result.finish(), Some(ts("2024-03-05T09:00:00Z")));
        assert_eq!(result.finish_method(), Some(FinishMethod::LastStatusChange));
    }

    #[test]
    fn deployed_status_is_the_second_finish_strategy() {
        let vocabulary = StatusVocabulary {
            finish_statuses: vec!["Ready for deployment".to_string()],
            ..StatusVocabulary::default()
        };
        let events = [
            event("2024-03-04T09:00:00Z", None, "In Progress"),
            event("2024-03-05T09:00:00Z", None, "Deployed AC"),
            event("2024-03-06T09:00:00Z", None, "Closed"),
        ];
        let result = infer_actual_dates(&events, &vocabulary);

        assert_eq!(result.finish(), Some(ts("2024-03-05T09:00:00Z")));
        assert_eq!(result.finish_method(), Some(FinishMethod::LastDeployedStatus));
    }

    #[test]
    fn latest_finish_status_is_chosen_when_it_repeats() {
        let events = [
            event("2024-03-04T09:00:00Z", None, "In Progress"),
            event("2024-03-05T09:00:00Z", None, "Ready for deployment"),
            event("2024-03-06T09:00:00Z", None, "In Progress"),
            event("2024-03-08T09:00:00Z", None, "Ready for deployment"),
            event("2024-03-11T09:00:00Z", None, "Closed"),
        ];
        let result = infer_actual_dates(&events, &StatusVocabulary::default());

        assert_eq!(result.start(), Some(ts("2024-03-04T09:00:00Z")));
        assert_eq!(result.finish(), Some(ts("2024-03-08T09:00:00Z")));
        assert_eq!(result.finish_method(), Some(FinishMethod::LastDevelopmentFinishStatus));
        assert_eq!(result.duration(), Some(5.0));
    }

    #[test]
    fn label_follows_the_selected_strategy_even_when_timestamps_coincide() {
        // Both strategies 1 and 3 pick the same event; the label must still be strategy 1's.
        let events = [event("2024-03-04T09:00:00Z", None, "In Progress")];
        let result = infer_actual_dates(&events, &StatusVocabulary::default());

        assert_eq!(result.start_method(), Some(StartMethod::FirstDevelopmentStatus));
        assert_eq!(result.finish_method(), Some(FinishMethod::LastStatusChange));
    }

    #[test]
    fn matching_is_case_sensitive() {
        let events = [event("2024-03-04T09:00:00Z", None, "in progress")];
        let result = infer_actual_dates(&events, &StatusVocabulary::default());
        assert_eq!(result.start_method(), Some(StartMethod::FirstStatusChange));
    }

    #[test]
    fn inference_is_deterministic() {
        let events = [
            event("2024-03-01T09:00:00Z", None, "Ready for planning"),
            event("2024-03-04T09:00:00Z", None, "In Progress"),
            event("2024-03-06T09:00:00Z", None, "Deployed AC"),
        ];
        let vocabulary = StatusVocabulary::default();
        let first = infer_actual_dates(&events, &vocabulary);
        for _ in 0..5 {
            assert_eq!(infer_actual_dates(&events, &vocabulary), first);
        }
    }

    #[test]
    fn method_labels_serialize_as_display_text() {
        let json = serde_json::to_string(&StartMethod::FirstInProgressAfterPlanning).unwrap();
        assert_eq!(json, "\"First 'In Progress' after planning\"");
        assert_eq!(FinishMethod::LastDeployedStatus.to_string(), "Last 'Deployed AC' status");
    }
}
