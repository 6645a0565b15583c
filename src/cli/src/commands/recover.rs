//! Recovery commands: trigger a recovery pass and inspect attempt history.

use anyhow::Result;
use clap::Subcommand;
use serde_json::Value;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum RecoverCommands {
    /// Trigger a recovery pass for all unhealthy dependencies
    Run,

    /// Show recovery attempt statistics
    Stats,
}

#[derive(Tabled, serde::Serialize)]
struct AttemptRow {
    #[tabled(rename = "Dependency")]
    dependency: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Error")]
    error: String,
    #[tabled(rename = "Timestamp")]
    timestamp: String,
}

#[derive(Tabled, serde::Serialize)]
struct StatsRow {
    #[tabled(rename = "Dependency")]
    dependency: String,
    #[tabled(rename = "Total")]
    total: u64,
    #[tabled(rename = "Successful")]
    successful: u64,
    #[tabled(rename = "Failed")]
    failed: u64,
}

fn attempt_row(attempt: &Value) -> AttemptRow {
    let field = |name: &str| {
        attempt
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or("-")
            .to_string()
    };
    AttemptRow {
        dependency: field("dependency"),
        result: output::health_marker(
            attempt.get("success").and_then(Value::as_bool).unwrap_or(false),
        ),
        error: field("error"),
        timestamp: field("timestamp"),
    }
}

pub async fn execute(cmd: RecoverCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        RecoverCommands::Run => {
            let outcome: Value = client.post("/ops/recover").await?;

            match format {
                OutputFormat::Table => {
                    if !outcome
                        .get("attempted")
                        .and_then(Value::as_bool)
                        .unwrap_or(false)
                    {
                        output::print_info(
                            "Recovery not attempted (another run in flight or nothing to do)",
                        );
                        return Ok(());
                    }

                    let services: Vec<&str> = outcome
                        .get("services")
                        .and_then(Value::as_array)
                        .map(|s| s.iter().filter_map(Value::as_str).collect())
                        .unwrap_or_default();

                    if services.is_empty() {
                        output::print_success("Nothing to recover, all dependencies healthy");
                        return Ok(());
                    }

                    output::print_info(&format!(
                        "Recovery attempted for: {}",
                        services.join(", ")
                    ));

                    let rows: Vec<AttemptRow> = outcome
                        .get("results")
                        .and_then(Value::as_array)
                        .map(|results| results.iter().map(attempt_row).collect())
                        .unwrap_or_default();

                    output::print_list(&rows, OutputFormat::Table);
                }
                _ => output::print_item(&outcome, format),
            }
        }

        RecoverCommands::Stats => {
            let stats: Value = client.get("/ops/recovery-stats").await?;

            match format {
                OutputFormat::Table => {
                    let rows: Vec<StatsRow> = stats
                        .get("by_dependency")
                        .and_then(Value::as_object)
                        .map(|deps| {
                            deps.iter()
                                .map(|(name, s)| {
                                    let count = |key: &str| {
                                        s.get(key).and_then(Value::as_u64).unwrap_or(0)
                                    };
                                    StatsRow {
                                        dependency: name.clone(),
                                        total: count("total"),
                                        successful: count("successful"),
                                        failed: count("failed"),
                                    }
                                })
                                .collect()
                        })
                        .unwrap_or_default();

                    output::print_list(&rows, OutputFormat::Table);

                    let recent: Vec<AttemptRow> = stats
                        .get("recent")
                        .and_then(Value::as_array)
                        .map(|attempts| attempts.iter().map(attempt_row).collect())
                        .unwrap_or_default();

                    if !recent.is_empty() {
                        output::print_header("Recent Attempts");
                        output::print_list(&recent, OutputFormat::Table);
                    }
                }
                _ => output::print_item(&stats, format),
            }
        }
    }

    Ok(())
}
