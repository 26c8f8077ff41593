use std::io;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

/// Something arriving from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostMessage {
    /// One encoded event frame.
    Frame(String),

    /// The channel failed, and nothing more will arrive.
    Fault(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// The sending half of a connection to a host.
pub trait HostTransport: Send + Sync {
    /// Posts one encoded command frame. Never waits for the host.
    fn post(&self, frame: String) -> Result<(), TransportError>;

    /// Tears the host down. Further posts fail.
    fn shutdown(&self);
}

/// A freshly launched host: how to talk to it, and where its events arrive.
pub struct HostLink {
    pub transport: Box<dyn HostTransport>,
    pub events: UnboundedReceiver<HostMessage>,
}

/// Starts hosts for a [crate::Bridge]. Called once per initialization attempt.
pub trait HostLauncher: Send + Sync + 'static {
    fn launch(&self) -> io::Result<HostLink>;
}
