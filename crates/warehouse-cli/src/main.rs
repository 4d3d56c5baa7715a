//! Flag Warehouse - exploit runner
//!
//! The `warehouse` command runs every exploit in a directory against every
//! team, once per round, and uploads the flags they print to the warehouse
//! server.
//!
//! Fatal configuration problems (bad token, unreachable server, missing
//! exploit directory) are logged and end the process with status 0.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info, Level};
use warehouse_core::{component_span, init_tracing};
use warehouse_runner::{ExploitScheduler, SchedulerConfig, WarehouseClient};

#[derive(Parser, Debug)]
#[command(name = "warehouse")]
#[command(author = "Flag Warehouse Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run all the exploits in the specified directory against all the teams.", long_about = None)]
struct Cli {
    /// The URL of your warehouse server, protocol included
    #[arg(short, long, env = "WAREHOUSE_SERVER_URL", default_value = "http://localhost:5555")]
    server_url: String,

    /// Your username
    #[arg(short, long, env = "WAREHOUSE_USER")]
    user: String,

    /// The authorization token used for the warehouse server API
    #[arg(short, long, env = "WAREHOUSE_TOKEN")]
    token: String,

    /// The directory that holds all your exploits
    #[arg(short = 'd', long, env = "WAREHOUSE_EXPLOIT_DIR")]
    exploit_directory: PathBuf,

    /// Maximum number of exploits running at once
    #[arg(short = 'n', long, env = "WAREHOUSE_NUM_THREADS", default_value_t = 64)]
    num_threads: usize,

    /// Where the flag-id feed is written for exploits to read
    #[arg(long, env = "WAREHOUSE_FLAG_IDS_PATH", default_value = "flag_ids.json")]
    flag_ids_path: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        info!("Exiting...");
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    info!("Connecting to the warehouse server...");
    let client = WarehouseClient::new(&cli.server_url, &cli.token, &cli.user)?;
    let server = client
        .fetch_config()
        .await
        .with_context(|| format!("Could not configure from {}", cli.server_url))?;
    debug!("{}", serde_json::to_string_pretty(&server)?);
    info!("Client correctly configured.");

    let config = SchedulerConfig::new(cli.exploit_directory, cli.user.clone())
        .with_max_workers(cli.num_threads)
        .with_flag_ids_path(cli.flag_ids_path);
    let span = component_span("scheduler", &cli.user);
    let scheduler = ExploitScheduler::new(config, server, Arc::new(client), span)?;

    scheduler.run(interrupted()).await?;
    Ok(())
}

/// Resolves on Ctrl-C. If the handler cannot be installed, never resolves.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Cannot listen for interrupts");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from([
            "warehouse",
            "-u",
            "alice",
            "-t",
            "secret",
            "-d",
            "./exploits",
        ])
        .unwrap();

        assert_eq!(cli.server_url, "http://localhost:5555");
        assert_eq!(cli.num_threads, 64);
        assert_eq!(cli.flag_ids_path, PathBuf::from("flag_ids.json"));
        assert!(!cli.verbose);
    }

    #[test]
    fn test_required_options() {
        assert!(Cli::try_parse_from(["warehouse", "-u", "alice"]).is_err());
    }
}
