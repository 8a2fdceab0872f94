use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use edsmq_common::observability::init_logging;
use edsmq_config::EdsmqConfigLoader;
use tracing::info;

mod host;
mod progress;

/// Query EDSM through a throttled background dispatcher.
#[derive(Debug, Parser)]
#[command(name = "edsmq", version)]
struct Cli {
    /// YAML configuration file; missing files fall back to defaults.
    #[arg(short, long, env = "EDSMQ_CONFIG", default_value = "edsmq.yaml")]
    config: PathBuf,

    /// Fetch the known bodies of this system (repeatable).
    #[arg(short, long = "system", value_name = "NAME")]
    systems: Vec<String>,

    /// Also ask for the game server status.
    #[arg(long)]
    status: bool,

    /// Exit after this many seconds without new results and an empty queue.
    /// Runs until Ctrl-C when omitted.
    #[arg(long, value_name = "SECS")]
    idle_exit: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // env wins over the file
    let cfg = EdsmqConfigLoader::new()
        .with_optional_file(&cli.config)
        .load()
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let log_path = init_logging(cfg.logging.to_log_config())?;
    info!(log = %log_path.display(), base_url = %cfg.dispatcher.base_url, "edsmq.starting");

    let host = host::build_from_config(&cfg)?;
    info!(
        throttle_ms = host.dispatcher().config().throttle.as_millis() as u64,
        subscribers = ?host.registry().names(),
        "edsmq.host.ready"
    );
    for system in &cli.systems {
        host.request_bodies(system);
    }
    if cli.status {
        host.request_server_status();
    }

    host.run(cli.idle_exit.map(Duration::from_secs)).await
}
