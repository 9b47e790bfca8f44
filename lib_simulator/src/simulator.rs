//! # Simulator Coordinator
//!
//! Composes the port allocator, the operation endpoint, the realtime
//! subscription server and the broker around one shared HTTP listener and
//! manages the start/stop lifecycle.
//!
//! Registries are explicit state constructed on `start()` and dropped on
//! `stop()`: the broker and the realtime shutdown channel live in the shared
//! [`AppState`] passed to the handlers, never in ambient globals.

use std::net::IpAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

use crate::core::broker::SubscriptionBroker;
use crate::core::ports::resolve_port;
use crate::errors::SimulatorError;
use crate::graphql::schema::SimulatorSchema;
use crate::http::operations::graphql_handler;
use crate::realtime::server::realtime_handler;

/// Timing knobs of the realtime protocol, as advertised to clients.
#[derive(Debug, Clone, Copy)]
pub struct RealtimeSettings {
    pub connection_timeout_ms: u64,
    pub keepalive_interval_ms: u64,
    pub init_timeout_ms: u64,
}

/// Inbound configuration for one simulator instance.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Preferred port. `None` scans the default 8900-9999 range; a concrete
    /// port is honored exactly or `start()` fails, never substituted.
    pub port: Option<u16>,
    /// Bind host. The default binds every interface, like the simulated
    /// service's local mock does.
    pub host: String,
    /// Keepalive grace window advertised in `connection_ack`.
    pub connection_timeout_ms: u64,
    /// How often `ka` frames are pushed to connected clients.
    pub keepalive_interval_ms: u64,
    /// How long a fresh connection may wait before sending `connection_init`.
    pub init_timeout_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            port: None,
            host: "0.0.0.0".to_string(),
            connection_timeout_ms: 300_000,
            keepalive_interval_ms: 60_000,
            init_timeout_ms: 3_000,
        }
    }
}

/// Shared state handed to the axum handlers.
pub struct AppState {
    pub schema: Arc<SimulatorSchema>,
    pub broker: Arc<SubscriptionBroker>,
    pub settings: RealtimeSettings,
    /// Closing every realtime connection goes through this channel.
    pub realtime_shutdown: broadcast::Sender<()>,
}

/// The reachable endpoints, valid once `start()` has resolved.
#[derive(Debug, Clone)]
pub struct SimulatorEndpoint {
    pub graphql: String,
    pub realtime: String,
}

struct Running {
    endpoint: SimulatorEndpoint,
    port: u16,
    realtime_shutdown: broadcast::Sender<()>,
    http_shutdown: oneshot::Sender<()>,
    _serve_handle: JoinHandle<()>,
}

pub struct Simulator {
    schema: Arc<SimulatorSchema>,
    config: SimulatorConfig,
    running: Option<Running>,
}

impl Simulator {
    pub fn new(schema: SimulatorSchema, config: SimulatorConfig) -> Self {
        Self {
            schema: Arc::new(schema),
            config,
            running: None,
        }
    }

    /// Resolve the port, attach both endpoints, bind the listener and record
    /// the reachable URL. Fails fast on port clashes; no listener is left
    /// behind on failure.
    pub async fn start(&mut self) -> Result<(), SimulatorError> {
        let port = resolve_port(&self.config.host, self.config.port).await?;

        let (realtime_shutdown, _) = broadcast::channel(1);
        let state = Arc::new(AppState {
            schema: self.schema.clone(),
            broker: Arc::new(SubscriptionBroker::new()),
            settings: RealtimeSettings {
                connection_timeout_ms: self.config.connection_timeout_ms,
                keepalive_interval_ms: self.config.keepalive_interval_ms,
                init_timeout_ms: self.config.init_timeout_ms,
            },
            realtime_shutdown: realtime_shutdown.clone(),
        });

        // The realtime upgrade route is part of the router before the
        // listener binds, so an early upgrade request can never arrive with
        // no handler registered.
        let app = Router::new()
            .route("/graphql", post(graphql_handler))
            .route("/graphql/realtime", get(realtime_handler))
            .with_state(state);

        // The probe released the port a moment ago; losing it to another
        // process in that window surfaces as the same port clash.
        let listener = TcpListener::bind((self.config.host.as_str(), port))
            .await
            .map_err(|e| bind_error(self.config.port, e))?;
        let bound_port = listener.local_addr().map_err(SimulatorError::Bind)?.port();

        let (http_shutdown_tx, http_shutdown_rx) = oneshot::channel::<()>();
        let serve_handle = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = http_shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                log::error!("HTTP listener terminated with error: {}", e);
            }
        });

        let host = url_host(&self.config.host);
        let endpoint = SimulatorEndpoint {
            graphql: format!("http://{host}:{bound_port}/graphql"),
            realtime: format!("ws://{host}:{bound_port}/graphql/realtime"),
        };
        log::info!("GraphQL simulator listening at {}", endpoint.graphql);

        self.running = Some(Running {
            endpoint,
            port: bound_port,
            realtime_shutdown,
            http_shutdown: http_shutdown_tx,
            _serve_handle: serve_handle,
        });
        Ok(())
    }

    /// Stop the realtime server first, so every live connection closes and
    /// unregisters its subscriptions, then close the HTTP listener.
    /// Intended to be called once, after a successful `start()`.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.realtime_shutdown.send(());
            let _ = running.http_shutdown.send(());
            log::info!("Simulator on port {} stopped", running.port);
        }
    }

    /// The reachable endpoints. `None` until `start()` has resolved.
    pub fn url(&self) -> Option<&SimulatorEndpoint> {
        self.running.as_ref().map(|running| &running.endpoint)
    }

    /// The bound port. `None` until `start()` has resolved.
    pub fn port(&self) -> Option<u16> {
        self.running.as_ref().map(|running| running.port)
    }
}

/// Classify a listener bind failure. Only an actual address clash on a
/// requested port earns the "kill the program using this port" message;
/// anything else (a privileged port, an unroutable host) stays an ordinary
/// bind error.
fn bind_error(requested: Option<u16>, e: std::io::Error) -> SimulatorError {
    match requested {
        Some(port) if e.kind() == std::io::ErrorKind::AddrInUse => {
            SimulatorError::PortUnavailable(port)
        }
        _ => SimulatorError::Bind(e),
    }
}

/// The host to advertise in URLs. A wildcard bind is reported as the local
/// interface address, the way the simulated service's mock does it.
fn url_host(bind_host: &str) -> String {
    if bind_host == "0.0.0.0" {
        match local_ip_address::local_ip() {
            Ok(IpAddr::V4(ip)) => ip.to_string(),
            _ => "127.0.0.1".to_string(),
        }
    } else {
        bind_host.to_string()
    }
}
