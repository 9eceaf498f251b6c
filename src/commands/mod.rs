// src/commands/mod.rs
// CLI surface: the scheduled reconciliation commands. Each subcommand
// drives the orchestrator with one pass; `orchestrate` runs the full
// pipeline. Exit code 0 on completion even with per-account failures
// logged; 1 only on a top-level unexpected error.

use crate::config::Config;
use crate::domain::errors::{AppError, AppResult};
use crate::domain::models::UserExchange;
use crate::exchange::paper::PaperGatewayFactory;
use crate::ledger::InMemoryLedger;
use crate::recon::orchestrator::{Orchestrator, RunSummary};
use crate::recon::unit::Pass;
use clap::{Parser, Subcommand};
use std::sync::Arc;

/// Futures order/position reconciliation engine
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Restrict the run to one user id
    #[arg(long, global = true)]
    pub user: Option<i64>,

    /// Operate on demo credentials and demo ledger rows
    #[arg(long, global = true, default_value_t = false)]
    pub demo: bool,

    /// Accounts file (JSON array of exchange accounts)
    #[arg(long, global = true)]
    pub accounts: Option<String>,

    /// Configuration file (falls back to environment variables)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Set the verbosity level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub verbose: String,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Sync local order statuses and trades against exchange history
    Lifecycle,
    /// Enforce strict-mode policy on orders and positions
    Enforce,
    /// Ensure protective SL/TP orders exist for open trades
    SyncSltp,
    /// Run the full pipeline: lifecycle, enforcement, SL/TP sync
    Orchestrate,
}

impl Commands {
    pub fn pass(&self) -> Pass {
        match self {
            Commands::Lifecycle => Pass::Lifecycle,
            Commands::Enforce => Pass::Enforce,
            Commands::SyncSltp => Pass::SlTp,
            Commands::Orchestrate => Pass::Full,
        }
    }
}

/// Load the account roster the run operates on
fn load_accounts(path: Option<&str>) -> AppResult<Vec<UserExchange>> {
    let path = match path {
        Some(path) => path,
        None => {
            log::warn!("No accounts file given; nothing to reconcile");
            return Ok(Vec::new());
        }
    };
    let contents = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("Failed to read accounts file {}: {}", path, e)))?;
    let accounts: Vec<UserExchange> = serde_json::from_str(&contents)
        .map_err(|e| AppError::Config(format!("Failed to parse accounts file {}: {}", path, e)))?;
    Ok(accounts)
}

/// Build the wiring and run the requested command.
///
/// The in-memory ledger and paper gateways stand in where a deployment
/// would plug database-backed repositories and real exchange adapters.
pub async fn execute(cli: &Cli, config: &Config) -> AppResult<RunSummary> {
    let accounts = load_accounts(cli.accounts.as_deref())?;
    log::info!(
        "Starting {} run for {} account(s){}",
        match cli.command {
            Commands::Lifecycle => "lifecycle",
            Commands::Enforce => "enforce",
            Commands::SyncSltp => "sync-sltp",
            Commands::Orchestrate => "orchestrate",
        },
        accounts.len(),
        if cli.demo { " [demo]" } else { "" }
    );

    let ledger = Arc::new(InMemoryLedger::new());
    let factory = Arc::new(PaperGatewayFactory::new());

    let orchestrator = Orchestrator::new(
        accounts,
        factory,
        ledger.clone(),
        ledger,
        config.recon.clone(),
    );

    Ok(orchestrator.run(cli.command.pass(), cli.user, cli.demo).await)
}
