use std::{fmt::Display, time::Duration};

use micro4_core_emulator_protocol::ValidationError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("host initialization failed: {0}")]
    Initialization(InitFailure),

    #[error("{command} got no reply within {after:?}")]
    Timeout { command: &'static str, after: Duration },

    #[error("host reported an error: {message}")]
    HostReported { message: String, address: Option<u8> },

    #[error("host transport failed: {0}")]
    Transport(String),

    #[error("invalid command: {0}")]
    InvalidCommand(#[from] ValidationError),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("bridge has not been initialized")]
    NotReady,

    #[error("bridge has been terminated")]
    Terminated,
}

/// Why a host never became ready.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitFailure {
    #[error("could not launch host: {0}")]
    Launch(String),

    #[error("host reported an error while starting: {0}")]
    HostError(String),

    #[error("host did not become ready within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("host channel closed before it became ready")]
    ChannelClosed,

    #[error("host sent {0} before becoming ready")]
    Unexpected(&'static str),

    #[error("{0}")]
    Transport(String),
}

/// A failure delivered to error subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The emulated machine hit an error.
    Host { message: String, address: Option<u8> },

    /// The channel to the host broke.
    Transport(String),

    /// The host sent something which couldn't be understood.
    Protocol(String),
}

impl Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fault::Host { message, address: Some(address) } => write!(f, "{message} (at 0x{address:02X})"),
            Fault::Host { message, address: None } => f.write_str(message),
            Fault::Transport(reason) => write!(f, "transport failure: {reason}"),
            Fault::Protocol(reason) => write!(f, "protocol violation: {reason}"),
        }
    }
}
