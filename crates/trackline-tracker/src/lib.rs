//! Issue-tracker source contract, the Jira REST client and a fixture-backed source.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;
use tracing::{debug, info, warn};
use trackline_core::{IssueSummary, TrackerFieldIds};
use trackline_storage::{FetchError, HttpFetcher, ResponseArchive};

pub const CRATE_NAME: &str = "trackline-tracker";

pub const SEARCH_PAGE_SIZE: usize = 100;

/// Base filter selecting project-type issues that carry a project ticket and
/// a scheduled window.
pub const DEFAULT_JQL_FILTER: &str = r#"project in (EI) AND issuetype = Project AND "Project ticket" is not EMPTY AND "Start Date" is not EMPTY AND "End date" is not EMPTY"#;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("issue {0} not found")]
    NotFound(String),
    #[error("malformed tracker response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[async_trait]
pub trait IssueSource: Send + Sync {
    fn source_name(&self) -> &str;

    /// All issues matching `jql`, across every result page.
    async fn search(&self, jql: &str) -> Result<Vec<IssueSummary>, TrackerError>;

    /// The raw issue payload with its changelog expanded.
    async fn fetch_issue(&self, issue_key: &str) -> Result<JsonValue, TrackerError>;
}

/// `<filter> AND (status = "a" OR status = "b")`, omitting empty parts.
pub fn build_status_jql(filter: &str, statuses: &[String]) -> String {
    let clause = statuses
        .iter()
        .map(|status| format!("status = \"{}\"", status.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(" OR ");
    let filter = filter.trim();
    match (filter.is_empty(), clause.is_empty()) {
        (true, true) => String::new(),
        (true, false) => format!("({clause})"),
        (false, true) => filter.to_string(),
        (false, false) => format!("{filter} AND ({clause})"),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
    pub issues: Vec<IssueSummary>,
    pub start_at: usize,
    pub total: usize,
}

impl SearchPage {
    pub fn is_last(&self) -> bool {
        self.issues.is_empty() || self.start_at + self.issues.len() >= self.total
    }
}

/// Decode one page of a `/rest/api/2/search` response.
pub fn parse_search_page(value: &JsonValue, fields: &TrackerFieldIds) -> Result<SearchPage, TrackerError> {
    let raw_issues = value
        .get("issues")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| TrackerError::Malformed("search response has no issues array".to_string()))?;
    let start_at = json_usize(value, "startAt").unwrap_or(0);

    let mut issues = Vec::with_capacity(raw_issues.len());
    for raw in raw_issues {
        let Some(issue_key) = raw.get("key").and_then(JsonValue::as_str) else {
            warn!("skipping search result without an issue key");
            continue;
        };
        let issue_fields = raw.get("fields").unwrap_or(&JsonValue::Null);
        issues.push(IssueSummary {
            issue_key: issue_key.to_string(),
            summary: field_text(issue_fields, "summary").unwrap_or_default(),
            status: issue_fields
                .get("status")
                .and_then(|status| status.get("name"))
                .and_then(JsonValue::as_str)
                .unwrap_or_default()
                .to_lowercase(),
            project_ticket: field_text(issue_fields, &fields.project_ticket),
            planned_start: field_text(issue_fields, &fields.planned_start),
            planned_finish: field_text(issue_fields, &fields.planned_finish),
        });
    }

    let total = json_usize(value, "total").unwrap_or(start_at + issues.len());
    Ok(SearchPage {
        issues,
        start_at,
        total,
    })
}

fn json_usize(value: &JsonValue, key: &str) -> Option<usize> {
    value
        .get(key)
        .and_then(JsonValue::as_u64)
        .and_then(|n| usize::try_from(n).ok())
}

/// Text of a field that may be a plain string or a select option object.
/// Blank values read as absent.
fn field_text(fields: &JsonValue, field_id: &str) -> Option<String> {
    let value = fields.get(field_id)?;
    let text = value
        .as_str()
        .or_else(|| value.get("value").and_then(JsonValue::as_str))
        .or_else(|| value.get("name").and_then(JsonValue::as_str))?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> anyhow::Result<T> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Jira REST API v2 client.
pub struct JiraClient {
    base_url: String,
    http: HttpFetcher,
    fields: TrackerFieldIds,
    archive: Option<ResponseArchive>,
}

impl JiraClient {
    pub fn new(base_url: impl Into<String>, http: HttpFetcher, fields: TrackerFieldIds) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            fields,
            archive: None,
        }
    }

    /// Keep a copy of every raw issue payload fetched.
    pub fn with_archive(mut self, archive: ResponseArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn search_fields(&self) -> Vec<&str> {
        vec![
            "summary",
            "status",
            "project",
            "issuetype",
            self.fields.project_ticket.as_str(),
            self.fields.planned_start.as_str(),
            self.fields.planned_finish.as_str(),
            "created",
            "updated",
        ]
    }
}

#[async_trait]
impl IssueSource for JiraClient {
    fn source_name(&self) -> &str {
        &self.base_url
    }

    async fn search(&self, jql: &str) -> Result<Vec<IssueSummary>, TrackerError> {
        let url = format!("{}/rest/api/2/search", self.base_url);
        let mut issues = Vec::new();
        let mut start_at = 0usize;

        loop {
            let payload = json!({
                "jql": jql,
                "startAt": start_at,
                "maxResults": SEARCH_PAGE_SIZE,
                "fields": self.search_fields(),
            });
            let page = parse_search_page(&self.http.post_json(&url, &payload).await?.json()?, &self.fields)?;
            debug!(start_at, received = page.issues.len(), total = page.total, "fetched search page");

            let last = page.is_last();
            start_at = page.start_at + page.issues.len();
            issues.extend(page.issues);
            if last {
                break;
            }
        }

        info!(count = issues.len(), "tracker search complete");
        Ok(issues)
    }

    async fn fetch_issue(&self, issue_key: &str) -> Result<JsonValue, TrackerError> {
        let url = format!("{}/rest/api/2/issue/{}?expand=changelog", self.base_url, issue_key);
        let response = self.http.get_json(&url).await.map_err(|err| {
            if err.is_not_found() {
                TrackerError::NotFound(issue_key.to_string())
            } else {
                TrackerError::Fetch(err)
            }
        })?;

        if let Some(archive) = &self.archive {
            let archived = archive.archive(Utc::now(), issue_key, &response.body).await?;
            debug!(
                issue_key,
                path = %archived.absolute_path.display(),
                deduplicated = archived.deduplicated,
                "archived raw issue response"
            );
        }

        Ok(response.json()?)
    }
}

/// Offline source over captured tracker responses: `search.json` holds one
/// search page and `issues/<KEY>.json` one issue payload each. The JQL is
/// not interpreted; every captured search result is returned.
#[derive(Debug, Clone)]
pub struct FixtureIssueSource {
    root: PathBuf,
    fields: TrackerFieldIds,
}

impl FixtureIssueSource {
    pub fn new(root: impl Into<PathBuf>, fields: TrackerFieldIds) -> Self {
        Self {
            root: root.into(),
            fields,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn issue_path(&self, issue_key: &str) -> Option<PathBuf> {
        let safe = !issue_key.is_empty()
            && issue_key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        safe.then(|| self.root.join("issues").join(format!("{issue_key}.json")))
    }
}

#[async_trait]
impl IssueSource for FixtureIssueSource {
    fn source_name(&self) -> &str {
        "fixtures"
    }

    async fn search(&self, _jql: &str) -> Result<Vec<IssueSummary>, TrackerError> {
        let path = self.root.join("search.json");
        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let value: JsonValue =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(parse_search_page(&value, &self.fields)?.issues)
    }

    async fn fetch_issue(&self, issue_key: &str) -> Result<JsonValue, TrackerError> {
        let Some(path) = self.issue_path(issue_key) else {
            return Err(TrackerError::NotFound(issue_key.to_string()));
        };
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(TrackerError::NotFound(issue_key.to_string()));
            }
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("reading {}", path.display()))
                    .into());
            }
        };
        let value = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(value)
    }
}
