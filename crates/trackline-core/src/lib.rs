//! Core domain model and actual-date inference for Trackline.

pub mod actuals;
pub mod calendar;
pub mod history;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub use actuals::{
    infer_actual_dates, ActualDateResult, FinishMethod, ResolvedDate, StartMethod, StatusVocabulary,
};
pub use calendar::{business_days, business_days_between, parse_timestamp, Timestamp};
pub use history::{extract_status_changes, StatusChangeEvent};

pub const CRATE_NAME: &str = "trackline-core";

/// Tracker custom-field ids carrying planned dates and the project ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerFieldIds {
    pub planned_start: String,
    pub planned_finish: String,
    pub project_ticket: String,
}

impl Default for TrackerFieldIds {
    fn default() -> Self {
        Self {
            planned_start: "customfield_15990".to_string(),
            planned_finish: "customfield_15994".to_string(),
            project_ticket: "customfield_11491".to_string(),
        }
    }
}

/// One issue as returned by a tracker search, before any history is fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueSummary {
    pub issue_key: String,
    pub summary: String,
    /// Lower-cased workflow status name.
    pub status: String,
    pub project_ticket: Option<String>,
    pub planned_start: Option<String>,
    pub planned_finish: Option<String>,
}

/// Planned and inferred actual dates for one issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueTimeline {
    pub planned_start: Option<Timestamp>,
    pub planned_finish: Option<Timestamp>,
    pub planned_duration: Option<f64>,
    pub status_changes: Vec<StatusChangeEvent>,
    pub actual: ActualDateResult,
    pub actual_duration: Option<f64>,
}

impl IssueTimeline {
    /// True when the history gave nothing to infer from.
    pub fn is_unresolved(&self) -> bool {
        self.actual.is_empty()
    }

    pub fn details_row(&self, issue_key: &str, updated_at: DateTime<Utc>) -> IssueDetailsRow {
        IssueDetailsRow {
            issue_key: issue_key.to_string(),
            actual_start: self.actual.start().map(|ts| ts.with_timezone(&Utc)),
            actual_finish: self.actual.finish().map(|ts| ts.with_timezone(&Utc)),
            actual_duration: self.actual_duration,
            details_updated_at: updated_at,
        }
    }
}

/// Run the extractor and inference engine over a raw issue payload and
/// pair the result with the planned dates held in its custom fields.
pub fn analyze_issue(
    issue: &JsonValue,
    vocabulary: &StatusVocabulary,
    fields: &TrackerFieldIds,
) -> IssueTimeline {
    let planned_start = field_str(issue, &fields.planned_start).and_then(parse_timestamp);
    let planned_finish = field_str(issue, &fields.planned_finish).and_then(parse_timestamp);
    let planned_duration = match (&planned_start, &planned_finish) {
        (Some(start), Some(finish)) => Some(business_days(start, finish)),
        _ => None,
    };

    let status_changes = extract_status_changes(issue);
    let actual = infer_actual_dates(&status_changes, vocabulary);
    let actual_duration = actual.duration();

    IssueTimeline {
        planned_start,
        planned_finish,
        planned_duration,
        status_changes,
        actual,
        actual_duration,
    }
}

fn field_str<'a>(issue: &'a JsonValue, field_id: &str) -> Option<&'a str> {
    issue
        .get("fields")
        .and_then(|fields| fields.get(field_id))
        .and_then(JsonValue::as_str)
}

/// Warehouse row written by the status refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueStatusRow {
    pub issue_key: String,
    pub summary: String,
    pub status: String,
    pub project_ticket: Option<String>,
    pub planned_dev_start: Option<DateTime<Utc>>,
    pub planned_dev_finish: Option<DateTime<Utc>>,
    pub planned_duration: Option<f64>,
    pub last_updated_at: DateTime<Utc>,
}

impl IssueStatusRow {
    pub fn from_summary(issue: &IssueSummary, updated_at: DateTime<Utc>) -> Self {
        Self {
            issue_key: issue.issue_key.clone(),
            summary: issue.summary.clone(),
            status: issue.status.clone(),
            project_ticket: issue.project_ticket.clone(),
            planned_dev_start: issue
                .planned_start
                .as_deref()
                .and_then(parse_timestamp)
                .map(|ts| ts.with_timezone(&Utc)),
            planned_dev_finish: issue
                .planned_finish
                .as_deref()
                .and_then(parse_timestamp)
                .map(|ts| ts.with_timezone(&Utc)),
            planned_duration: business_days_between(
                issue.planned_start.as_deref(),
                issue.planned_finish.as_deref(),
            ),
            last_updated_at: updated_at,
        }
    }
}

/// Warehouse row written by the detail collection jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueDetailsRow {
    pub issue_key: String,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_finish: Option<DateTime<Utc>>,
    pub actual_duration: Option<f64>,
    pub details_updated_at: DateTime<Utc>,
}
