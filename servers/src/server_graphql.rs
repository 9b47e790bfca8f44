//! # Local GraphQL API Simulator Server
//!
//! Runs the simulator as a standalone process around the built-in demo todo
//! schema. Useful for poking at the operation endpoint and the realtime
//! subscription protocol with curl and any WebSocket client.
//!
//! ## Functionality:
//! - **Operation Endpoint**: `POST /graphql` executes queries and mutations
//!   against the demo resolvers.
//! - **Realtime Endpoint**: `GET /graphql/realtime` upgrades to the
//!   WebSocket subscription protocol; mutations fan out to subscribers.
//! - **Port Resolution**: Honors a requested port exactly, or scans the
//!   8900-9999 range when none is given.
//! - **Dynamic Configuration**: Merges defaults, a JSON config file, and
//!   environment/CLI overrides using `clap`.
//! - **Logging**: `fern` dispatch to stdout and a per-run log file.
//! - **Graceful Shutdown**: Ctrl-C or SIGTERM drains realtime connections
//!   before the HTTP listener closes.

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;

mod graphql_logic;
use graphql_logic::{config, demo, logger};

use lib_simulator::{ApiKeyValidator, Simulator, SimulatorConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config();
    let log_dir = config.log_dir.clone().unwrap_or_else(|| "./logs".into());
    let log_level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    logger::setup_logging(&log_dir, &log_level)?;

    let mut schema = demo::demo_schema();
    if let Some(key) = config.api_key.clone() {
        schema = schema.with_auth(Arc::new(ApiKeyValidator::new(key)));
    }

    let defaults = SimulatorConfig::default();
    let simulator_config = SimulatorConfig {
        port: config.port,
        host: config.host.clone().unwrap_or(defaults.host),
        connection_timeout_ms: config.connection_timeout_ms.unwrap_or(defaults.connection_timeout_ms),
        keepalive_interval_ms: config.keepalive_interval_ms.unwrap_or(defaults.keepalive_interval_ms),
        init_timeout_ms: config.init_timeout_ms.unwrap_or(defaults.init_timeout_ms),
    };

    let mut simulator = Simulator::new(schema, simulator_config);
    simulator.start().await?;
    if let Some(endpoint) = simulator.url() {
        println!("GraphQL endpoint:  {}", endpoint.graphql);
        println!("Realtime endpoint: {}", endpoint.realtime);
    }

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Could not install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    simulator.stop();
    log::info!("Shutdown complete.");
    Ok(())
}
