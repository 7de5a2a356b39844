//! Role assignment commands.

use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum RoleCommands {
    /// Set the role level on every session of an identity
    Assign {
        /// Identity whose sessions change
        identity: String,

        #[command(flatten)]
        level: LevelArgs,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Moderator,
    Member,
    Restricted,
}

/// A role level given either as a number or as a predefined role.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct LevelArgs {
    /// Numeric role level (lower is more privileged)
    #[arg(long, allow_hyphen_values = true)]
    level: Option<i32>,

    /// Predefined role
    #[arg(long, value_enum)]
    role: Option<Role>,
}

impl LevelArgs {
    /// The request fields the server expects for this choice.
    pub fn to_body(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut body = serde_json::Map::new();
        if let Some(level) = self.level {
            body.insert("role_level".into(), level.into());
        }
        if let Some(role) = self.role {
            body.insert("role".into(), serde_json::json!(role));
        }
        body
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct AssignResult {
    identity: String,
    role_level: i32,
    #[serde(default)]
    role: Option<String>,
    sessions_updated: u64,
}

pub async fn execute(cmd: RoleCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        RoleCommands::Assign { identity, level } => {
            let result: AssignResult = client
                .put(
                    &["api", "v1", "users", identity.as_str(), "role-level"],
                    &level.to_body(),
                )
                .await?;

            match format {
                OutputFormat::Table => {
                    let role = result
                        .role
                        .as_deref()
                        .map(|r| format!(" ({})", r))
                        .unwrap_or_default();
                    output::print_success(&format!(
                        "{} now at level {}{} on {} session(s)",
                        result.identity, result.role_level, role, result.sessions_updated
                    ));
                }
                _ => output::print_item(&result, format)?,
            }
        }
    }
    Ok(())
}
