//! TraffiGuard alert server.
//!
//! Runs the WebSocket alert server until Ctrl-C. Logging goes through
//! `env_logger`; set `RUST_LOG=debug` for per-frame detail.

use anyhow::Context;
use clap::Parser;
use log::info;
use std::path::PathBuf;

use traffiguard_alerts::geo::DEFAULT_RADIUS_KM;
use traffiguard_alerts::server::{AlertServer, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "traffiguard-server")]
#[command(about = "Push accident alerts to nearby vehicles over WebSocket", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8000")]
    bind: String,

    /// Alert radius in kilometres
    #[arg(long, default_value_t = DEFAULT_RADIUS_KM)]
    radius_km: f64,

    /// Alerts buffered per connection
    #[arg(long, default_value_t = 64)]
    channel_capacity: usize,

    /// How long a delivery may wait on a full queue, in milliseconds
    #[arg(long, default_value_t = 500)]
    delivery_timeout_ms: u64,

    /// RocksDB directory; omit to keep everything in memory
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            bind_addr: args.bind,
            alert_radius_km: args.radius_km,
            channel_capacity: args.channel_capacity,
            delivery_timeout_ms: args.delivery_timeout_ms,
            storage_path: args.data_dir,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if !(args.radius_km.is_finite() && args.radius_km >= 0.0) {
        anyhow::bail!("--radius-km must be a non-negative number, got {}", args.radius_km);
    }
    if args.channel_capacity == 0 {
        anyhow::bail!("--channel-capacity must be at least 1");
    }

    let config = ServerConfig::from(args);
    match &config.storage_path {
        Some(path) => info!("Persisting to {}", path.display()),
        None => info!("No --data-dir given, accidents are kept in memory"),
    }

    let server = AlertServer::new(config).context("failed to start alert server")?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("alert server stopped")?;

    let stats = server.stats().await;
    info!(
        "Served {} connections, {} reports, {} alerts delivered",
        stats.connections.total_connections,
        stats.dispatch.reports_accepted,
        stats.dispatch.alerts_delivered
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_server_config() {
        let config = ServerConfig::from(Args::parse_from(["traffiguard-server"]));
        let default = ServerConfig::default();
        assert_eq!(config.bind_addr, default.bind_addr);
        assert_eq!(config.alert_radius_km, default.alert_radius_km);
        assert_eq!(config.channel_capacity, default.channel_capacity);
        assert_eq!(config.delivery_timeout_ms, default.delivery_timeout_ms);
        assert!(config.storage_path.is_none());
    }

    #[test]
    fn test_flags_map_to_config() {
        let config = ServerConfig::from(Args::parse_from([
            "traffiguard-server",
            "--bind",
            "0.0.0.0:9000",
            "--radius-km",
            "5.5",
            "--data-dir",
            "/var/lib/traffiguard",
        ]));
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.alert_radius_km, 5.5);
        assert_eq!(config.storage_path, Some(PathBuf::from("/var/lib/traffiguard")));
    }
}
