use clap::Parser;
use log::info;
use server::map;
use server::matchmaker::Matchmaker;
use server::registry::Registry;
use server::session::SessionConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Two-player snake game server")]
struct Args {
    /// Address to bind
    #[clap(long, default_value = "0.0.0.0")]
    host: String,

    /// TCP port to listen on
    #[clap(long, default_value_t = 1991)]
    port: u16,

    /// Level file; the built-in bordered arena is used when absent
    #[clap(long)]
    level: Option<PathBuf>,

    /// Simulation tick interval in milliseconds
    #[clap(long, default_value_t = shared::TICK_INTERVAL_MS)]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let map = Arc::new(map::load_or_default(args.level.as_deref()));
    info!(
        "Using level '{}' ({}x{})",
        map.name, map.width, map.height
    );

    let config = SessionConfig {
        tick_interval: Duration::from_millis(args.tick_ms),
        ..SessionConfig::default()
    };

    let registry = Registry::bind(&format!("{}:{}", args.host, args.port)).await?;
    let (arrivals_tx, arrivals_rx) = mpsc::unbounded_channel();
    let matchmaker = Matchmaker::new(map, config);

    tokio::select! {
        _ = registry.run(arrivals_tx) => {}
        _ = matchmaker.run(arrivals_rx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }
    Ok(())
}
