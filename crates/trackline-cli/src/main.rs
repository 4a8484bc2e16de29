use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde_json::Value as JsonValue;
use tracing::info;
use tracing_subscriber::EnvFilter;
use trackline_core::{analyze_issue, IssueTimeline};
use trackline_sync::{
    jira_client_from_config, load_status_vocabulary, IssueWarehouse, MemoryWarehouse,
    PgWarehouse, SyncConfig, SyncJob, SyncPipeline,
};
use trackline_tracker::{read_json_file, FixtureIssueSource, IssueSource};

#[derive(Debug, Parser)]
#[command(name = "trackline")]
#[command(about = "Trackline issue timeline sync")]
struct Cli {
    /// Read tracker data from captured responses instead of Jira.
    #[arg(long, global = true)]
    fixtures: Option<PathBuf>,

    /// Keep warehouse writes in memory.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Refresh status and planned dates of tracked issues.
    UpdateStatus,
    /// Fill in actual dates for closed issues that lack them.
    CollectClosed,
    /// Recompute actual dates for issues in acceptance.
    CollectAc,
    /// All three jobs in order.
    Sync,
    /// Print the status history and inferred dates of one issue.
    Analyze {
        issue_key: Option<String>,
        #[arg(long, conflicts_with = "issue_key")]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    let jobs: &[SyncJob] = match cli.command.unwrap_or(Commands::Sync) {
        Commands::UpdateStatus => &[SyncJob::UpdateStatus],
        Commands::CollectClosed => &[SyncJob::CollectClosedDetails],
        Commands::CollectAc => &[SyncJob::CollectAcDetails],
        Commands::Sync => &SyncJob::ALL,
        Commands::Analyze { issue_key, file } => {
            return analyze(&config, cli.fixtures, issue_key, file).await;
        }
    };

    let vocabulary = load_status_vocabulary(&config.status_config_path)?;
    let source = issue_source(&config, cli.fixtures)?;
    let warehouse: Arc<dyn IssueWarehouse> = if cli.dry_run {
        Arc::new(MemoryWarehouse::new())
    } else {
        Arc::new(PgWarehouse::connect(&config.database_url, &config.warehouse_table).await?)
    };

    let summary = SyncPipeline::new(config, vocabulary, source, warehouse)
        .run_with_reports(jobs)
        .await?;
    for run in &summary.jobs {
        println!(
            "{}: updated={} inserted={} errors={}",
            run.job.name(),
            run.outcome.updated_count,
            run.outcome.inserted_count,
            run.outcome.error_count
        );
        for error in &run.outcome.errors {
            println!("  - {error}");
        }
    }
    println!(
        "sync complete: run_id={} source={} warehouse={} reports={}",
        summary.run_id, summary.source, summary.warehouse, summary.reports_dir
    );
    Ok(())
}

fn issue_source(config: &SyncConfig, fixtures: Option<PathBuf>) -> Result<Arc<dyn IssueSource>> {
    Ok(match fixtures {
        Some(root) => {
            info!(root = %root.display(), "using fixture issue source");
            Arc::new(FixtureIssueSource::new(root, config.fields.clone()))
        }
        None => Arc::new(jira_client_from_config(config)?),
    })
}

async fn analyze(
    config: &SyncConfig,
    fixtures: Option<PathBuf>,
    issue_key: Option<String>,
    file: Option<PathBuf>,
) -> Result<()> {
    let raw: JsonValue = match (file, issue_key.as_deref()) {
        (Some(path), _) => read_json_file(path)?,
        (None, Some(key)) => issue_source(config, fixtures)?.fetch_issue(key).await?,
        (None, None) => bail!("give an issue key or --file"),
    };
    let vocabulary = load_status_vocabulary(&config.status_config_path)?;
    let timeline = analyze_issue(&raw, &vocabulary, &config.fields);

    let label = raw
        .get("key")
        .and_then(JsonValue::as_str)
        .or(issue_key.as_deref())
        .unwrap_or("<unknown>");
    print_timeline(label, &timeline);
    Ok(())
}

fn print_timeline(issue_key: &str, timeline: &IssueTimeline) {
    println!("{issue_key}");
    println!("status changes:");
    if timeline.status_changes.is_empty() {
        println!("  (none)");
    }
    for change in &timeline.status_changes {
        println!(
            "  {}  {} -> {}",
            change.occurred_at.to_rfc3339(),
            change.from_status.as_deref().unwrap_or("-"),
            change.to_status
        );
    }

    match timeline.actual.start {
        Some(start) => println!("actual start:  {} ({})", start.at.to_rfc3339(), start.method),
        None => println!("actual start:  -"),
    }
    match timeline.actual.finish {
        Some(finish) => println!("actual finish: {} ({})", finish.at.to_rfc3339(), finish.method),
        None => println!("actual finish: -"),
    }
    println!("actual duration:  {}", fmt_days(timeline.actual_duration));
    println!("planned duration: {}", fmt_days(timeline.planned_duration));
}

fn fmt_days(days: Option<f64>) -> String {
    days.map_or_else(|| "-".to_string(), |d| format!("{d:.2} business days"))
}
