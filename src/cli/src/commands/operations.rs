//! Operation registry listing and dry-run checks.

use anyhow::Result;
use clap::Args;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct CheckArgs {
    /// Operation name, e.g. posts.delete
    operation: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OperationList {
    pub strict: bool,
    pub operations: Vec<OperationInfo>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OperationInfo {
    pub operation: String,
    pub requirement: Requirement,
    #[serde(default)]
    pub minimum_level: Option<i32>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "kind", content = "levels", rename_all = "snake_case")]
pub enum Requirement {
    Public,
    Levels(Vec<i32>),
}

#[derive(Tabled)]
struct OperationRow {
    #[tabled(rename = "Operation")]
    operation: String,
    #[tabled(rename = "Levels")]
    levels: String,
    #[tabled(rename = "Minimum")]
    minimum: String,
}

impl From<&OperationInfo> for OperationRow {
    fn from(info: &OperationInfo) -> Self {
        let levels = match &info.requirement {
            Requirement::Public => "public".to_string(),
            Requirement::Levels(levels) => levels
                .iter()
                .map(i32::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        };
        Self {
            operation: info.operation.clone(),
            levels,
            minimum: info
                .minimum_level
                .map(|l| l.to_string())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CheckResult {
    pub operation: String,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_level: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_level: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

pub async fn list(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let list: OperationList = client.get(&["api", "v1", "operations"]).await?;

    if format == OutputFormat::Table {
        let mode = if list.strict { "strict" } else { "lenient" };
        output::print_info(&format!(
            "{} operations registered ({} registry)",
            list.operations.len(),
            mode
        ));
    }

    output::print_list(
        &list.operations,
        |ops| ops.iter().map(OperationRow::from).collect(),
        format,
    )
}

pub async fn check(args: CheckArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let result: CheckResult = client
        .post(
            &["api", "v1", "operations", args.operation.as_str(), "check"],
            &serde_json::json!({}),
        )
        .await?;

    if format != OutputFormat::Table {
        return output::print_item(&result, format);
    }

    println!("{} {}", output::verdict(result.allowed), result.operation);
    if let Some(level) = result.role_level {
        output::print_detail("Role level", &level.to_string());
    }
    if let Some(required) = result.required_level {
        output::print_detail("Required level", &required.to_string());
    }
    if let Some(source) = &result.source {
        output::print_detail("Decided from", source);
    }
    if let Some(reason) = &result.reason {
        output::print_detail("Reason", reason);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_server_listing() {
        let list: OperationList = serde_json::from_value(serde_json::json!({
            "strict": false,
            "operations": [
                {"operation": "operations.list", "requirement": {"kind": "public"}},
                {"operation": "users.ban", "requirement": {"kind": "levels", "levels": [1, 2]}, "minimum_level": 1}
            ]
        }))
        .unwrap();

        let rows: Vec<OperationRow> = list.operations.iter().map(OperationRow::from).collect();
        assert_eq!(rows[0].levels, "public");
        assert_eq!(rows[0].minimum, "-");
        assert_eq!(rows[1].levels, "1, 2");
        assert_eq!(rows[1].minimum, "1");
    }
}
