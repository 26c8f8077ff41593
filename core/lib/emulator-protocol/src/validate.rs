use thiserror::Error;

use crate::{Command, StateSnapshot, MAX_SPEED, MEMORY_SIZE};

/// Payload problems which a well-formed frame can still have.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{len} nibbles starting at 0x{start:02X} run past the end of memory")]
    ImageOutOfRange { start: u8, len: usize },

    #[error("value 0x{value:X} at offset {offset} is not a nibble")]
    NotANibble { offset: usize, value: u8 },

    #[error("speed {speed} is outside 1..=1000000")]
    SpeedOutOfRange { speed: u32 },

    #[error("snapshot memory has {len} cells, expected 256")]
    MemorySize { len: usize },

    #[error("snapshot {register} holds 0x{value:X}, which is not a nibble")]
    RegisterOutOfRange { register: &'static str, value: u8 },
}

fn check_nibbles(nibbles: &[u8]) -> Result<(), ValidationError> {
    match nibbles.iter().position(|n| *n > 0xF) {
        Some(offset) => Err(ValidationError::NotANibble { offset, value: nibbles[offset] }),
        None => Ok(()),
    }
}

pub fn validate_speed(speed: u32) -> Result<(), ValidationError> {
    if (1..=MAX_SPEED).contains(&speed) {
        Ok(())
    } else {
        Err(ValidationError::SpeedOutOfRange { speed })
    }
}

impl Command {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Command::LoadProgram { binary, start_address } => {
                if *start_address as usize + binary.len() > MEMORY_SIZE {
                    return Err(ValidationError::ImageOutOfRange { start: *start_address, len: binary.len() })
                }
                check_nibbles(binary)
            }
            Command::Run { speed } | Command::SetSpeed { speed } => validate_speed(*speed),
            Command::Step | Command::Stop | Command::Reset | Command::GetState => Ok(()),
        }
    }
}

impl StateSnapshot {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.memory.len() != MEMORY_SIZE {
            return Err(ValidationError::MemorySize { len: self.memory.len() })
        }
        for (register, value) in [("accumulator", self.accumulator), ("mdr", self.mdr)] {
            if value > 0xF {
                return Err(ValidationError::RegisterOutOfRange { register, value })
            }
        }
        check_nibbles(&self.memory)
    }
}
