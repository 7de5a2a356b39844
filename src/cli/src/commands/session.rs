//! Session management commands.
//!
//! Provides issue, list, revoke and revoke-all operations for sessions.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use super::role::LevelArgs;
use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Issue a session and print its access token
    Issue {
        /// Identity the session belongs to
        identity: String,

        #[command(flatten)]
        level: LevelArgs,
    },

    /// List the sessions of an identity
    List {
        identity: String,
    },

    /// Revoke one session
    Revoke {
        identity: String,
        session_code: String,
    },

    /// Revoke every session of an identity
    RevokeAll {
        identity: String,

        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

// ── API types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
struct IssuedSession {
    identity: String,
    session_code: String,
    role_level: i32,
    access_token: String,
    token_id: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Serialize)]
struct SessionSummary {
    session_code: String,
    role_level: i32,
    #[serde(default)]
    role: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "Session")]
    session_code: String,
    #[tabled(rename = "Level")]
    role_level: i32,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "Created")]
    created_at: String,
}

impl From<&SessionSummary> for SessionRow {
    fn from(s: &SessionSummary) -> Self {
        Self {
            session_code: s.session_code.clone(),
            role_level: s.role_level,
            role: s.role.clone().unwrap_or_else(|| "custom".to_string()),
            created_at: s.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct RevokeResult {
    identity: String,
    #[serde(default)]
    session_code: Option<String>,
    revoked: serde_json::Value,
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn execute(cmd: SessionCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        SessionCommands::Issue { identity, level } => {
            let mut body = level.to_body();
            body.insert("identity".into(), identity.into());

            let issued: IssuedSession = client.post(&["api", "v1", "sessions"], &body).await?;

            match format {
                OutputFormat::Table => {
                    output::print_success(&format!(
                        "Session issued for {} at level {}",
                        issued.identity, issued.role_level
                    ));
                    output::print_detail("Session", &issued.session_code);
                    output::print_detail("Expires", &issued.expires_at.to_rfc3339());
                    output::print_detail("Token", &issued.access_token);
                }
                _ => output::print_item(&issued, format)?,
            }
        }

        SessionCommands::List { identity } => {
            let sessions: Vec<SessionSummary> = client
                .get(&["api", "v1", "users", identity.as_str(), "sessions"])
                .await?;

            output::print_list(
                &sessions,
                |items| items.iter().map(SessionRow::from).collect(),
                format,
            )?;
        }

        SessionCommands::Revoke {
            identity,
            session_code,
        } => {
            let result: RevokeResult = client
                .delete(&[
                    "api",
                    "v1",
                    "users",
                    identity.as_str(),
                    "sessions",
                    session_code.as_str(),
                ])
                .await?;

            match format {
                OutputFormat::Table => output::print_success(&format!(
                    "Revoked session {} of {}",
                    session_code, result.identity
                )),
                _ => output::print_item(&result, format)?,
            }
        }

        SessionCommands::RevokeAll { identity, force } => {
            if !force {
                output::print_info(&format!(
                    "This will revoke every session of '{}'. Use --force to confirm.",
                    identity
                ));
                return Ok(());
            }

            let result: RevokeResult = client
                .delete(&["api", "v1", "users", identity.as_str(), "sessions"])
                .await?;

            match format {
                OutputFormat::Table => output::print_success(&format!(
                    "Revoked {} session(s) of {}",
                    result.revoked, result.identity
                )),
                _ => output::print_item(&result, format)?,
            }
        }
    }

    Ok(())
}
