//! Health check command.
//!
//! Queries the `/health` endpoint and displays dependency status.

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct HealthArgs {
    /// Include per-dependency checks
    #[arg(short, long)]
    detailed: bool,
}

pub async fn execute(args: HealthArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (http_status, health) = client.get_raw(&["health"]).await?;

    if format != OutputFormat::Table {
        return output::print_item(&health, format);
    }

    let status = health
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");

    output::print_header("System Health");
    output::print_detail("Status", status);
    output::print_detail("API URL", client.base_url());

    if let Some(version) = health.get("version").and_then(|v| v.as_str()) {
        output::print_detail("Version", version);
    }
    if let Some(ts) = health.get("timestamp").and_then(|v| v.as_str()) {
        output::print_detail("Timestamp", ts);
    }

    if args.detailed {
        if let Some(checks) = health.get("checks").and_then(|v| v.as_object()) {
            output::print_header("Dependencies");
            for (name, check) in checks {
                let backend = check.get("backend").and_then(|v| v.as_str()).unwrap_or("?");
                let dep_status = check.get("status").and_then(|v| v.as_str()).unwrap_or("?");
                let line = match check.get("error").and_then(|v| v.as_str()) {
                    Some(error) => format!("{} ({}): {}", dep_status, backend, error),
                    None => format!("{} ({})", dep_status, backend),
                };
                output::print_detail(name, &line);
            }
        }
    }

    if http_status.is_success() && status == "healthy" {
        output::print_success("All systems operational");
        Ok(())
    } else {
        anyhow::bail!("System status: {} ({})", status, http_status)
    }
}
