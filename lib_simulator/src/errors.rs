use thiserror::Error;

/// Failures that abort `Simulator::start()`. Everything else in the simulator
/// is scoped to a single request or connection and never surfaces here.
#[derive(Debug, Error)]
pub enum SimulatorError {
    /// The caller asked for a specific port and it is occupied. There is no
    /// fallback: silently picking another port would surprise the user.
    #[error("Port {0} is already in use. Please kill the program using this port, or pick another one and restart the simulator.")]
    PortUnavailable(u16),

    /// The dynamic scan found no bindable port in the default range.
    #[error("no free port available in the {0}-{1} range")]
    NoFreePort(u16, u16),

    /// The listener could not be bound for a reason other than a port clash.
    #[error("failed to bind listener: {0}")]
    Bind(#[from] std::io::Error),
}
