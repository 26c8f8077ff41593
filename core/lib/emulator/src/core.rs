use micro4_core_instructions::{decode_instruction_byte, InstructionOpcode, MEMORY_SIZE};
use thiserror::Error;

use crate::memory::Memory;

pub struct Core<M: Memory> {
    pub pc: u8,
    pub a: u8,
    pub z: bool,

    // Internal registers, only kept for inspection
    pub ir: u8,
    pub mar: u8,
    pub mdr: u8,

    pub halted: bool,
    pub fault: Option<ExecutionError>,

    pub cycles: u64,
    pub instructions: u64,

    pub memory: M,
}

/// The result of running a [Core] for a bounded number of instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub executed: u64,
    pub halted: bool,
}

impl<M: Memory> Core<M> {
    pub fn new(memory: M) -> Self {
        Self {
            pc: 0,
            a: 0,
            z: false,
            ir: 0,
            mar: 0,
            mdr: 0,
            halted: false,
            fault: None,
            cycles: 0,
            instructions: 0,
            memory,
        }
    }

    /// Clears every register, flag and counter. Memory is left untouched.
    pub fn reset(&mut self) {
        self.pc = 0;
        self.a = 0;
        self.z = false;
        self.ir = 0;
        self.mar = 0;
        self.mdr = 0;
        self.halted = false;
        self.fault = None;
        self.cycles = 0;
        self.instructions = 0;
    }

    /// Writes `nibbles` into memory starting at `start`.
    pub fn load(&mut self, start: u8, nibbles: &[u8]) -> Result<(), LoadError> {
        if start as usize + nibbles.len() > MEMORY_SIZE {
            return Err(LoadError::OutOfRange { start, len: nibbles.len() })
        }

        for (offset, nibble) in nibbles.iter().enumerate() {
            self.memory.write(start + offset as u8, *nibble);
        }
        Ok(())
    }

    pub fn step_until_halted(&mut self) -> Result<(), ExecutionError> {
        while !self.halted {
            self.step()?;
        }
        Ok(())
    }

    /// Executes up to `limit` instructions, stopping early if the core halts.
    pub fn run_for(&mut self, limit: u64) -> Result<RunOutcome, ExecutionError> {
        let mut executed = 0;
        while executed < limit && !self.halted {
            self.step()?;
            executed += 1;
        }
        Ok(RunOutcome { executed, halted: self.halted })
    }

    /// Executes one instruction, returning the number of cycles it took.
    /// A halted core does nothing and takes no cycles.
    pub fn step(&mut self) -> Result<u32, ExecutionError> {
        if self.halted {
            return Ok(0)
        }

        // Both nibbles of the instruction byte must be addressable
        if self.pc as usize >= MEMORY_SIZE - 1 {
            return Err(self.fail(ExecutionError::PcOutOfBounds { pc: self.pc }))
        }

        let address = self.pc;
        self.ir = self.fetch_byte();
        let mut cycles = 2;

        let Some((opcode, imm)) = decode_instruction_byte(self.ir) else {
            return Err(self.fail(ExecutionError::UnknownOpcode { opcode: self.ir >> 4, address }))
        };

        use InstructionOpcode::*;
        match opcode {
            Hlt => {
                self.halted = true;
                cycles += 1;
            }

            Ldi => {
                self.a = imm;
                self.z = self.a == 0;
                cycles += 1;
            }

            Lda | Add | Sub => {
                let addr = self.fetch_byte();
                self.mar = addr;
                self.mdr = self.memory.read(addr);
                self.a = match opcode {
                    Add => self.a.wrapping_add(self.mdr) & 0xF,
                    Sub => self.a.wrapping_sub(self.mdr) & 0xF,
                    _ => self.mdr,
                };
                self.z = self.a == 0;
                cycles += 3;
            }

            Sta => {
                let addr = self.fetch_byte();
                self.mar = addr;
                self.mdr = self.a;
                self.memory.write(addr, self.a);
                cycles += 3;
            }

            Jmp => {
                self.pc = self.fetch_byte();
                cycles += 2;
            }

            Jz => {
                let addr = self.fetch_byte();
                if self.z {
                    self.pc = addr;
                }
                cycles += 3;
            }
        }

        self.instructions += 1;
        self.cycles += cycles as u64;
        Ok(cycles)
    }

    /// Reads two nibbles at the program counter as one byte, high nibble first.
    fn fetch_byte(&mut self) -> u8 {
        let high = self.memory.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        let low = self.memory.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        high << 4 | low
    }

    fn fail(&mut self, error: ExecutionError) -> ExecutionError {
        self.halted = true;
        self.fault = Some(error.clone());
        error
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("unknown opcode 0x{opcode:X} at 0x{address:02X}")]
    UnknownOpcode { opcode: u8, address: u8 },

    #[error("program counter out of bounds: 0x{pc:02X}")]
    PcOutOfBounds { pc: u8 },
}

impl ExecutionError {
    /// The address the error relates to.
    pub fn address(&self) -> u8 {
        match self {
            Self::UnknownOpcode { address, .. } => *address,
            Self::PcOutOfBounds { pc } => *pc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("{len} nibbles starting at 0x{start:02X} do not fit in memory")]
    OutOfRange { start: u8, len: usize },
}
