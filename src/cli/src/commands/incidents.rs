//! Incident management commands.

use anyhow::Result;
use clap::Subcommand;
use serde_json::Value;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum IncidentCommands {
    /// List incidents
    List {
        /// Filter by status (open, investigating, resolved)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Resolve an incident by id
    Resolve {
        /// Incident id
        id: String,
    },
}

#[derive(Tabled, serde::Serialize)]
struct IncidentRow {
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Dependency")]
    dependency: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Summary")]
    summary: String,
    #[tabled(rename = "Last Seen")]
    last_seen: String,
}

fn to_row(incident: &Value) -> IncidentRow {
    let field = |name: &str| {
        incident
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or("-")
            .to_string()
    };
    IncidentRow {
        id: field("id"),
        dependency: field("dependency"),
        severity: field("severity"),
        status: field("status"),
        summary: field("summary"),
        last_seen: field("last_seen_at"),
    }
}

pub async fn execute(
    cmd: IncidentCommands,
    client: &ApiClient,
    format: OutputFormat,
) -> Result<()> {
    match cmd {
        IncidentCommands::List { status } => {
            let path = match status {
                Some(s) => format!("/ops/incidents?status={}", s),
                None => "/ops/incidents".to_string(),
            };
            let incidents: Vec<Value> = client.get(&path).await?;

            match format {
                OutputFormat::Table => {
                    let rows: Vec<IncidentRow> = incidents.iter().map(to_row).collect();
                    output::print_list(&rows, OutputFormat::Table);
                }
                _ => output::print_item(&incidents, format),
            }
        }

        IncidentCommands::Resolve { id } => {
            let incident: Value = client
                .post(&format!("/ops/incidents/{}/resolve", id))
                .await?;

            match format {
                OutputFormat::Table => {
                    output::print_success(&format!(
                        "Incident {} resolved ({} / {})",
                        id,
                        incident.get("dependency").and_then(Value::as_str).unwrap_or("-"),
                        incident.get("summary").and_then(Value::as_str).unwrap_or("-"),
                    ));
                }
                _ => output::print_item(&incident, format),
            }
        }
    }

    Ok(())
}
