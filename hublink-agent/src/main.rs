//! hublink agent — entry point.
//!
//! ```text
//! hublink-agent                      Run in the foreground
//! hublink-agent --config <path>      Load a custom config TOML
//! hublink-agent --gen-config         Write default config to stdout
//! hublink-agent --override away      Request a hub-wide override once connected
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hublink_agent::config::AgentConfig;
use hublink_agent::service::AgentService;
use hublink_core::OverrideMode;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "hublink-agent", about = "Keeps a supervised connection to a home-automation hub")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "hublink-agent.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Request a constant hub-wide override (normal, comfort, eco, away).
    #[arg(long = "override", value_name = "MODE")]
    override_mode: Option<OverrideMode>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&AgentConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config.
    let config = AgentConfig::load(&cli.config);

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("hublink-agent v{}", env!("CARGO_PKG_VERSION"));
    info!("hub: {}:{}", config.hub.host, config.hub.port);
    info!(
        "timing: read {}s, full scan {}s, backoff {}s",
        config.timing.io_timeout_secs,
        config.timing.full_scan_interval_secs,
        config.timing.retry_backoff_secs
    );

    let mut service = AgentService::new(config);
    if let Some(mode) = cli.override_mode {
        service = service.with_override(mode);
    }
    let stop = service.stop_handle();

    // Ctrl-C handler.
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received, shutting down");
        stop.store(false, std::sync::atomic::Ordering::SeqCst);
    });

    service.run().await?;

    Ok(())
}
