use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    /// How long to wait for the host to report that it's ready.
    /// Generous, since a host may have a lot of work to do before it can start.
    pub init_timeout: Duration,

    /// How long any one command waits for its reply.
    pub command_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(10),
        }
    }
}

impl BridgeConfig {
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}
