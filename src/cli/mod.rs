//! CLI module for API Metering
//!
//! - `serve`: metering API, usage event dispatcher and period scheduler
//! - `rollover`: one period reset pass, then exit

pub mod rollover;
pub mod serve;

use clap::{Parser, Subcommand};

use crate::config::AppConfig;

/// API Metering - usage metering and quota enforcement
#[derive(Parser)]
#[command(name = "api-metering")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the metering server with its background workers
    Serve,

    /// Run one period rollover pass against the configured storage
    Rollover(rollover::RolloverArgs),
}

/// Read `.env` and the layered config files
fn load_config() -> anyhow::Result<AppConfig> {
    dotenvy::dotenv().ok();

    AppConfig::load().map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}
