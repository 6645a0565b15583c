//! Force an immediate health check cycle.

use anyhow::Result;
use clap::Args;
use serde_json::Value;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct ChecksArgs {}

#[derive(Tabled, serde::Serialize)]
struct CheckRow {
    #[tabled(rename = "Service")]
    service: String,
    #[tabled(rename = "Health")]
    health: String,
    #[tabled(rename = "Latency (ms)")]
    latency_ms: u64,
    #[tabled(rename = "Category")]
    category: String,
}

pub async fn execute(_args: ChecksArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let results: Value = client.post("/ops/run-checks").await?;

    match format {
        OutputFormat::Table => {
            let rows: Vec<CheckRow> = results
                .as_object()
                .map(|services| {
                    services
                        .iter()
                        .map(|(name, result)| CheckRow {
                            service: name.clone(),
                            health: output::health_marker(
                                result.get("healthy").and_then(Value::as_bool).unwrap_or(false),
                            ),
                            latency_ms: result
                                .get("latency_ms")
                                .and_then(Value::as_u64)
                                .unwrap_or(0),
                            category: result
                                .get("category")
                                .and_then(Value::as_str)
                                .unwrap_or("-")
                                .to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default();

            output::print_list(&rows, OutputFormat::Table);
        }
        _ => output::print_item(&results, format),
    }

    Ok(())
}
