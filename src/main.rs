//! Process entry point: pick a workload, log to stderr, serve stdin/stdout.

use anyhow::Context;
use clap::Parser;
use jasper::{build_node, Workload};
use jasper_node::NodeConfigBuilder;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "jasper")]
#[command(about = "Distributed-systems test node speaking line-delimited JSON on stdin/stdout")]
#[command(version)]
struct Cli {
    /// Protocol to serve
    #[arg(long, value_enum, default_value_t = Workload::Echo)]
    workload: Workload,

    /// How long a service call waits for its reply
    #[arg(long, default_value_t = 5000)]
    rpc_timeout_ms: u64,

    /// Pause between broadcast re-send sweeps
    #[arg(long, default_value_t = 1000)]
    retry_interval_ms: u64,

    /// Pause between anti-entropy pushes
    #[arg(long, default_value_t = 5000)]
    replicate_interval_ms: u64,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log filter {:?}", level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install logger: {}", err))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    let config = NodeConfigBuilder::new()
        .rpc_timeout(cli.rpc_timeout_ms)
        .retry_interval(cli.retry_interval_ms)
        .replicate_interval(cli.replicate_interval_ms)
        .build();
    let node = build_node(cli.workload, config).context("failed to build node")?;

    info!(workload = ?cli.workload, "serving");
    node.run(tokio::io::stdin(), tokio::io::stdout())
        .await
        .context("node stopped with an error")?;
    info!("input closed, exiting");
    Ok(())
}
