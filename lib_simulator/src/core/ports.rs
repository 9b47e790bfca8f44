use tokio::net::TcpListener;

use crate::errors::SimulatorError;

/// First port probed when no port was requested.
pub const BASE_PORT: u16 = 8900;
/// Last port probed when no port was requested.
pub const MAX_PORT: u16 = 9999;

/// Resolve the TCP port the simulator will listen on.
///
/// With `requested` set, exactly that port is probed; a clash is reported as
/// [`SimulatorError::PortUnavailable`] and no other port is tried. Without a
/// request, ports are probed ascending through `BASE_PORT..=MAX_PORT` and the
/// first one that binds is returned.
///
/// Probes bind and immediately release the port, so the caller must bind the
/// real listener soon after. No retries are attempted anywhere.
pub async fn resolve_port(host: &str, requested: Option<u16>) -> Result<u16, SimulatorError> {
    match requested {
        Some(port) => match TcpListener::bind((host, port)).await {
            Ok(probe) => {
                drop(probe);
                Ok(port)
            }
            Err(_) => Err(SimulatorError::PortUnavailable(port)),
        },
        None => {
            for port in BASE_PORT..=MAX_PORT {
                if let Ok(probe) = TcpListener::bind((host, port)).await {
                    drop(probe);
                    log::debug!("Resolved dynamic port {}", port);
                    return Ok(port);
                }
            }
            Err(SimulatorError::NoFreePort(BASE_PORT, MAX_PORT))
        }
    }
}
