//! A typed, asynchronous facade over an emulator host running in its own execution context.
//!
//! The [Bridge] launches the host, waits for it to become ready, and then turns the
//! one-way message channel between them into awaitable commands plus three kinds of
//! subscription (state updates, halts and errors).

mod bridge;
pub use bridge::*;

mod config;
pub use config::*;

mod error;
pub use error::*;

mod relay;

mod subscribers;
pub use subscribers::*;

mod transport;
pub use transport::*;

mod thread_host;
pub use thread_host::*;

mod process_host;
pub use process_host::*;

#[cfg(test)]
mod test_utils;

pub use micro4_core_emulator_protocol::StateSnapshot;
