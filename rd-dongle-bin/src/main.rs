mod gateway;

use std::path::PathBuf;

use clap::Parser;
use rd_dongle_config::Settings;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// LAN gateway for Riden RD-series power supplies.
///
/// Exposes the PSU on the serial port as Modbus TCP, raw SCPI, VXI-11
/// and an HTTP status/control page.
#[derive(Parser)]
#[command(name = "rd-dongle", version, about)]
struct Cli {
    /// Settings file (TOML). Defaults apply when omitted.
    #[arg(short, long, env = "RD_DONGLE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    match gateway::run(settings).await? {
        Some(reason) => {
            // The hardware would reset here; as a process we exit and let
            // the supervisor restart us.
            info!(?reason, "restart required");
        }
        None => info!("stopped"),
    }
    Ok(())
}
