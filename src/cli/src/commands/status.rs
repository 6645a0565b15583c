//! Service status command.
//!
//! Queries `/ops/status` and renders the per-dependency picture plus
//! the watchdog's view of the store.

use anyhow::Result;
use clap::Args;
use serde_json::Value;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct StatusArgs {
    /// Also query the liveness and readiness endpoints
    #[arg(short, long)]
    probes: bool,
}

#[derive(Tabled, serde::Serialize)]
struct ServiceRow {
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Health")]
    health: String,
    #[tabled(rename = "Latency (ms)")]
    latency_ms: u64,
    #[tabled(rename = "Problem")]
    problem: String,
}

pub async fn execute(args: StatusArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: Value = client.get("/ops/status").await?;

    match format {
        OutputFormat::Table => {
            let overall = status
                .get("overall_healthy")
                .and_then(Value::as_bool)
                .unwrap_or(false);

            output::print_header("Service Health");
            output::print_detail("API URL", client.base_url());
            output::print_detail("Overall", &output::health_marker(overall));
            if let Some(count) = status.get("open_incident_count").and_then(Value::as_u64) {
                output::print_detail("Open incidents", &count.to_string());
            }
            if let Some(updated) = status.get("last_updated").and_then(Value::as_str) {
                output::print_detail("Last updated", updated);
            }
            if let Some(phase) = status
                .pointer("/watchdog/phase")
                .and_then(Value::as_str)
            {
                output::print_detail("Watchdog", phase);
            }

            let rows: Vec<ServiceRow> = status
                .get("services")
                .and_then(Value::as_object)
                .map(|services| {
                    services
                        .iter()
                        .map(|(name, result)| ServiceRow {
                            service: name.clone(),
                            health: output::health_marker(
                                result.get("healthy").and_then(Value::as_bool).unwrap_or(false),
                            ),
                            latency_ms: result
                                .get("latency_ms")
                                .and_then(Value::as_u64)
                                .unwrap_or(0),
                            problem: result
                                .get("error")
                                .and_then(Value::as_str)
                                .unwrap_or("-")
                                .to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default();

            println!();
            output::print_list(&rows, OutputFormat::Table);

            if args.probes {
                let (live_status, _) = client.get_raw("/health/live").await?;
                let (ready_status, _) = client.get_raw("/health/ready").await?;
                output::print_header("Probes");
                output::print_detail("Liveness", &live_status.to_string());
                output::print_detail("Readiness", &ready_status.to_string());
            }

            if overall {
                output::print_success("All dependencies healthy");
            } else {
                output::print_error("One or more dependencies unhealthy");
            }
        }
        _ => output::print_item(&status, format),
    }

    Ok(())
}
