//! The wire contract between a bridge and the host running the emulator.
//!
//! Every message is one JSON document. Commands travel front-end to back-end inside a
//! [CommandFrame] carrying a correlation id; events travel back inside an [EventFrame]. An
//! event frame with `replyTo` set is the single answer to that command, and one without it
//! is part of a run's stream or otherwise spontaneous.

use serde::{Serialize, Deserialize};

mod codec;
pub use codec::*;

mod validate;
pub use validate::*;

pub use micro4_core_instructions::MEMORY_SIZE;

/// Fastest run speed a host accepts, in instructions per second.
pub const MAX_SPEED: u32 = 1_000_000;

/// Identifies a command so that the host's reply can be matched to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(pub u64);

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Describes the emulated machine at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub pc: u8,
    pub accumulator: u8,
    pub zero: bool,

    pub ir: u8,
    pub mar: u8,
    pub mdr: u8,

    pub halted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub cycles: u64,
    pub instructions: u64,

    /// Every memory cell, one nibble per element.
    pub memory: Vec<u8>,
}

/// Possible commands that could be sent from front-end to back-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    #[serde(rename_all = "camelCase")]
    LoadProgram {
        binary: Vec<u8>,
        start_address: u8,
    },
    Step,
    Run {
        speed: u32,
    },
    SetSpeed {
        speed: u32,
    },
    Stop,
    Reset,
    GetState,
}

impl Command {
    /// The wire tag of this command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::LoadProgram { .. } => "LOAD_PROGRAM",
            Command::Step => "STEP",
            Command::Run { .. } => "RUN",
            Command::SetSpeed { .. } => "SET_SPEED",
            Command::Stop => "STOP",
            Command::Reset => "RESET",
            Command::GetState => "GET_STATE",
        }
    }
}

/// Possible events that could be sent from back-end to front-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    HostReady,
    StateSnapshot {
        state: StateSnapshot,
    },
    Halted,
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<u8>,
    },
}

impl Event {
    /// The wire tag of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Event::HostReady => "HOST_READY",
            Event::StateSnapshot { .. } => "STATE_SNAPSHOT",
            Event::Halted => "HALTED",
            Event::Error { .. } => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub id: CommandId,
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<CommandId>,
    pub event: Event,
}

impl EventFrame {
    /// An event answering the command with the given id.
    pub fn reply(id: CommandId, event: Event) -> Self {
        Self { reply_to: Some(id), event }
    }

    /// An event which doesn't answer any command.
    pub fn stream(event: Event) -> Self {
        Self { reply_to: None, event }
    }
}
