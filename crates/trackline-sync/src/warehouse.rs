//! Warehouse persistence for status and detail rows.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;
use tracing::{debug, info};
use trackline_core::{IssueDetailsRow, IssueStatusRow};

pub const DEFAULT_WAREHOUSE_TABLE: &str = "issue_timelines";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
}

#[async_trait]
pub trait IssueWarehouse: Send + Sync {
    fn warehouse_name(&self) -> &str;

    /// Insert new issues and refresh the status columns of known ones.
    async fn upsert_status_rows(&self, rows: &[IssueStatusRow]) -> Result<UpsertCounts>;

    /// Overwrite actual-date columns of issues already present. Rows whose key
    /// is unknown are ignored. Returns the number of issues touched.
    async fn update_detail_rows(&self, rows: &[IssueDetailsRow]) -> Result<usize>;

    async fn issues_by_status(&self, status: &str) -> Result<Vec<String>>;

    /// Issues in any of `statuses` with at least one actual-date column empty.
    async fn issues_needing_details(&self, statuses: &[String]) -> Result<Vec<String>>;
}

/// `schema.table` or `table`, each part a plain SQL identifier.
pub fn validate_table_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("warehouse table name is empty");
    }
    for part in name.split('.') {
        let mut chars = part.chars();
        let head_ok = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        if !head_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            bail!("invalid warehouse table name: {name}");
        }
    }
    Ok(())
}

pub struct PgWarehouse {
    pool: PgPool,
    table: String,
}

impl PgWarehouse {
    pub fn new(pool: PgPool, table: &str) -> Result<Self> {
        validate_table_name(table)?;
        Ok(Self {
            pool,
            table: table.to_string(),
        })
    }

    pub async fn connect(database_url: &str, table: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("connecting to warehouse database")?;
        Self::new(pool, table)
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl IssueWarehouse for PgWarehouse {
    fn warehouse_name(&self) -> &str {
        "postgres"
    }

    async fn upsert_status_rows(&self, rows: &[IssueStatusRow]) -> Result<UpsertCounts> {
        let sql = format!(
            r#"
            INSERT INTO {table} (
                issue_key, summary, status, project_ticket,
                planned_dev_start, planned_dev_finish, planned_duration, last_updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (issue_key) DO UPDATE SET
                summary = EXCLUDED.summary,
                status = EXCLUDED.status,
                project_ticket = EXCLUDED.project_ticket,
                planned_dev_start = EXCLUDED.planned_dev_start,
                planned_dev_finish = EXCLUDED.planned_dev_finish,
                planned_duration = EXCLUDED.planned_duration,
                last_updated_at = EXCLUDED.last_updated_at
            RETURNING (xmax = 0) AS inserted
            "#,
            table = self.table
        );

        let mut tx = self.pool.begin().await.context("opening upsert transaction")?;
        let mut counts = UpsertCounts::default();
        for row in rows {
            let inserted: bool = sqlx::query(&sql)
                .bind(&row.issue_key)
                .bind(&row.summary)
                .bind(&row.status)
                .bind(row.project_ticket.as_deref())
                .bind(row.planned_dev_start)
                .bind(row.planned_dev_finish)
                .bind(row.planned_duration)
                .bind(row.last_updated_at)
                .fetch_one(&mut *tx)
                .await
                .with_context(|| format!("upserting status row {}", row.issue_key))?
                .try_get("inserted")?;
            if inserted {
                counts.inserted += 1;
            } else {
                counts.updated += 1;
            }
        }
        tx.commit().await.context("committing upsert transaction")?;

        info!(table = %self.table, inserted = counts.inserted, updated = counts.updated, "status rows merged");
        Ok(counts)
    }

    async fn update_detail_rows(&self, rows: &[IssueDetailsRow]) -> Result<usize> {
        let sql = format!(
            r#"
            UPDATE {table} SET
                actual_start = $2,
                actual_finish = $3,
                actual_duration = $4,
                details_updated_at = $5
            WHERE issue_key = $1
            "#,
            table = self.table
        );

        let mut tx = self.pool.begin().await.context("opening details transaction")?;
        let mut touched = 0usize;
        for row in rows {
            let result = sqlx::query(&sql)
                .bind(&row.issue_key)
                .bind(row.actual_start)
                .bind(row.actual_finish)
                .bind(row.actual_duration)
                .bind(row.details_updated_at)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("updating details for {}", row.issue_key))?;
            touched += result.rows_affected() as usize;
        }
        tx.commit().await.context("committing details transaction")?;

        info!(table = %self.table, updated = touched, "detail rows merged");
        Ok(touched)
    }

    async fn issues_by_status(&self, status: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT issue_key FROM {table} WHERE status = $1 ORDER BY issue_key",
            table = self.table
        );
        let rows = sqlx::query(&sql)
            .bind(status)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("querying issues in status {status}"))?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("issue_key").map_err(Into::into))
            .collect()
    }

    async fn issues_needing_details(&self, statuses: &[String]) -> Result<Vec<String>> {
        let sql = format!(
            r#"
            SELECT issue_key FROM {table}
            WHERE status = ANY($1)
              AND (actual_start IS NULL OR actual_finish IS NULL OR actual_duration IS NULL)
            ORDER BY issue_key
            "#,
            table = self.table
        );
        let rows = sqlx::query(&sql)
            .bind(statuses.to_vec())
            .fetch_all(&self.pool)
            .await
            .context("querying issues needing details")?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("issue_key").map_err(Into::into))
            .collect()
    }
}

/// One warehouse record, status and detail columns together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarehouseIssue {
    pub issue_key: String,
    pub summary: String,
    pub status: String,
    pub project_ticket: Option<String>,
    pub planned_dev_start: Option<DateTime<Utc>>,
    pub planned_dev_finish: Option<DateTime<Utc>>,
    pub planned_duration: Option<f64>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_finish: Option<DateTime<Utc>>,
    pub actual_duration: Option<f64>,
    pub last_updated_at: Option<DateTime<Utc>>,
    pub details_updated_at: Option<DateTime<Utc>>,
}

impl WarehouseIssue {
    fn from_status_row(row: &IssueStatusRow) -> Self {
        Self {
            issue_key: row.issue_key.clone(),
            summary: row.summary.clone(),
            status: row.status.clone(),
            project_ticket: row.project_ticket.clone(),
            planned_dev_start: row.planned_dev_start,
            planned_dev_finish: row.planned_dev_finish,
            planned_duration: row.planned_duration,
            actual_start: None,
            actual_finish: None,
            actual_duration: None,
            last_updated_at: Some(row.last_updated_at),
            details_updated_at: None,
        }
    }

    fn apply_status_row(&mut self, row: &IssueStatusRow) {
        self.summary = row.summary.clone();
        self.status = row.status.clone();
        self.project_ticket = row.project_ticket.clone();
        self.planned_dev_start = row.planned_dev_start;
        self.planned_dev_finish = row.planned_dev_finish;
        self.planned_duration = row.planned_duration;
        self.last_updated_at = Some(row.last_updated_at);
    }

    fn apply_details_row(&mut self, row: &IssueDetailsRow) {
        self.actual_start = row.actual_start;
        self.actual_finish = row.actual_finish;
        self.actual_duration = row.actual_duration;
        self.details_updated_at = Some(row.details_updated_at);
    }

    fn missing_details(&self) -> bool {
        self.actual_start.is_none() || self.actual_finish.is_none() || self.actual_duration.is_none()
    }
}

/// In-process warehouse used by `--dry-run` and tests.
#[derive(Default)]
pub struct MemoryWarehouse {
    rows: Mutex<BTreeMap<String, WarehouseIssue>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, issue_key: &str) -> Option<WarehouseIssue> {
        self.rows.lock().await.get(issue_key).cloned()
    }

    pub async fn snapshot(&self) -> Vec<WarehouseIssue> {
        self.rows.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl IssueWarehouse for MemoryWarehouse {
    fn warehouse_name(&self) -> &str {
        "memory"
    }

    async fn upsert_status_rows(&self, rows: &[IssueStatusRow]) -> Result<UpsertCounts> {
        let mut stored = self.rows.lock().await;
        let mut counts = UpsertCounts::default();
        for row in rows {
            match stored.get_mut(&row.issue_key) {
                Some(existing) => {
                    existing.apply_status_row(row);
                    counts.updated += 1;
                }
                None => {
                    stored.insert(row.issue_key.clone(), WarehouseIssue::from_status_row(row));
                    counts.inserted += 1;
                }
            }
        }
        Ok(counts)
    }

    async fn update_detail_rows(&self, rows: &[IssueDetailsRow]) -> Result<usize> {
        let mut stored = self.rows.lock().await;
        let mut touched = 0usize;
        for row in rows {
            match stored.get_mut(&row.issue_key) {
                Some(existing) => {
                    existing.apply_details_row(row);
                    touched += 1;
                }
                None => debug!(issue_key = %row.issue_key, "details for unknown issue ignored"),
            }
        }
        Ok(touched)
    }

    async fn issues_by_status(&self, status: &str) -> Result<Vec<String>> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .filter(|issue| issue.status == status)
            .map(|issue| issue.issue_key.clone())
            .collect())
    }

    async fn issues_needing_details(&self, statuses: &[String]) -> Result<Vec<String>> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .filter(|issue| statuses.contains(&issue.status) && issue.missing_details())
            .map(|issue| issue.issue_key.clone())
            .collect())
    }
}
