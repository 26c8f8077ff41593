//! A machine representation of the Micro4 instruction set.
//!
//! Each instruction starts with one byte (two nibbles): the opcode in the high nibble, and
//! an immediate in the low nibble which only `ldi` uses. Instructions which access memory
//! or branch are followed by one more byte holding the target address.

use strum::{AsRefStr, EnumDiscriminants, EnumIter};

mod encoding;
pub use encoding::*;

mod opcode;
pub use opcode::*;

mod assembly;
pub use assembly::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, EnumDiscriminants)]
#[strum_discriminants(name(InstructionOpcode))]
#[strum_discriminants(derive(AsRefStr, EnumIter, Hash))]
pub enum Instruction {
    // Core
    Hlt,

    // Memory
    Lda { addr: u8 },
    Sta { addr: u8 },

    // Arithmetic
    Add { addr: u8 },
    Sub { addr: u8 },

    // Branching
    Jmp { addr: u8 },
    Jz { addr: u8 },

    // Immediate Loads
    Ldi { imm: u8 },
}

impl Instruction {
    /// The number of nibbles this instruction occupies in memory.
    pub fn nibble_size(&self) -> u8 {
        self.opcode().nibble_size()
    }

    pub fn opcode(&self) -> InstructionOpcode {
        InstructionOpcode::from(self)
    }
}

pub enum AnyOperand {
    Address(u8),
    Immediate(u8),
}
