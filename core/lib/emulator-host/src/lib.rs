//! The back-end half of the bridge: owns one emulated core and answers commands about it.
//!
//! [Dispatcher] is a pure state machine over decoded frames. [serve] drives it from a
//! channel of encoded commands, running the core in timed batches while a `RUN` is active.

mod dispatcher;
pub use dispatcher::*;

mod serve;
pub use serve::*;

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostConfig {
    /// Interval between run batches. Each batch is followed by one streamed snapshot.
    pub tick: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self { tick: Duration::from_millis(16) }
    }
}
