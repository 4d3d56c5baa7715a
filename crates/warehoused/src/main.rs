//! Flag Warehouse daemon: submits stored flags to the scoring service.
//!
//! Settings come from flags or the environment (a `.env` file is loaded
//! first when present). The store is selected with `WAREHOUSE_DB_URL`.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, Level};
use warehouse_core::{component_span, init_tracing};
use warehouse_state::{StoreConfig, SurrealFlagStore};
use warehouse_submit::{Dispatcher, DispatcherConfig};

#[derive(Parser, Debug)]
#[command(name = "warehoused")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Flag submission daemon", long_about = None)]
struct Cli {
    /// Submission protocol: dummy, http (ccit) or line (faust)
    #[arg(long, env = "WAREHOUSE_SUB_PROTOCOL", default_value = "http")]
    protocol: String,

    /// Scoring service endpoint
    #[arg(long, env = "WAREHOUSE_SUB_URL", default_value = "http://10.10.0.1:8080/flags")]
    submit_url: String,

    /// Team token for flag submission
    #[arg(long, env = "WAREHOUSE_TEAM_TOKEN", default_value = "")]
    team_token: String,

    /// Number of requests per interval
    #[arg(long, env = "WAREHOUSE_SUB_LIMIT", default_value_t = 1)]
    requests_per_interval: u32,

    /// Interval duration in seconds
    #[arg(long, env = "WAREHOUSE_SUB_INTERVAL", default_value_t = 20)]
    interval: u64,

    /// Maximum flags per request
    #[arg(long, env = "WAREHOUSE_SUB_PAYLOAD_SIZE", default_value_t = 500)]
    batch_size: usize,

    /// Seconds a flag stays worth submitting
    #[arg(long, env = "WAREHOUSE_FLAG_LIFETIME", default_value_t = 600)]
    flag_lifetime: u64,

    /// Seconds to wait before the first cycle
    #[arg(long, env = "WAREHOUSE_SUB_WARMUP", default_value_t = 5)]
    warmup: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            protocol: self.protocol.clone(),
            submit_url: self.submit_url.clone(),
            team_token: self.team_token.clone(),
            requests_per_interval: self.requests_per_interval,
            interval_secs: self.interval,
            batch_size: self.batch_size,
            flag_lifetime_secs: self.flag_lifetime,
            warmup_secs: self.warmup,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
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
    let config = cli.dispatcher_config();
    let store_config = StoreConfig::from_env();
    let store = SurrealFlagStore::connect(&store_config)
        .await
        .with_context(|| format!("Failed to connect to flag store at {}", store_config.endpoint))?;

    let span = component_span("dispatcher", &config.protocol);
    let dispatcher = Dispatcher::new(config, Arc::new(store), span)?;

    info!("warehoused started");
    dispatcher
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Cannot listen for interrupts");
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}
