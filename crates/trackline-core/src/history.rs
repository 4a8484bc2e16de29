//! Status-change extraction from a raw tracker issue payload.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::calendar::{parse_timestamp, Timestamp};

/// One recorded workflow transition of an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChangeEvent {
    pub occurred_at: Timestamp,
    pub from_status: Option<String>,
    pub to_status: String,
}

impl StatusChangeEvent {
    pub fn new(occurred_at: Timestamp, from_status: Option<&str>, to_status: &str) -> Self {
        Self {
            occurred_at,
            from_status: from_status.map(ToString::to_string),
            to_status: to_status.to_string(),
        }
    }
}

/// Walk `changelog.histories[].items[]` and keep every `status` item in the
/// order the tracker emitted it.
///
/// Missing sections, non-array values, histories without a parsable
/// `created` stamp and status items without a target status are skipped, so
/// a degenerate payload produces an empty sequence rather than an error.
pub fn extract_status_changes(issue: &JsonValue) -> Vec<StatusChangeEvent> {
    let Some(histories) = issue
        .get("changelog")
        .and_then(|changelog| changelog.get("histories"))
        .and_then(JsonValue::as_array)
    else {
        return Vec::new();
    };

    let mut events = Vec::new();
    for (index, history) in histories.iter().enumerate() {
        let Some(items) = history.get("items").and_then(JsonValue::as_array) else {
            continue;
        };
        let mut status_items = items
            .iter()
            .filter(|item| json_str(item, "field") == Some("status"))
            .peekable();
        if status_items.peek().is_none() {
            continue;
        }

        let Some(occurred_at) = json_str(history, "created").and_then(parse_timestamp) else {
            debug!(history = index, "skipping status history without a parsable timestamp");
            continue;
        };

        for item in status_items {
            let Some(to_status) = json_str(item, "toString") else {
                debug!(history = index, "skipping status item without a target status");
                continue;
            };
            events.push(StatusChangeEvent::new(
                occurred_at,
                json_str(item, "fromString"),
                to_status,
            ));
        }
    }
    events
}

fn json_str<'a>(value: &'a JsonValue, key: &str) -> Option<&'a str> {
    value.get(key).and_then(JsonValue::as_str)
}
