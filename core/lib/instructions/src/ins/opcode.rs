use strum::IntoEnumIterator;

use crate::{AnyOperand, Instruction, InstructionOpcode};

/// The kind of operand an opcode expects, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    Address,
    Immediate,
}

impl InstructionOpcode {
    pub fn mnemonic(&self) -> String {
        self.as_ref().to_ascii_lowercase()
    }

    /// Looks up an opcode by its mnemonic, ignoring case.
    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        Self::iter().find(|op| op.as_ref().eq_ignore_ascii_case(mnemonic))
    }

    /// The value stored in the high nibble of the instruction byte.
    pub fn value(&self) -> u8 {
        match self {
            Self::Hlt => 0x0,
            Self::Lda => 0x1,
            Self::Sta => 0x2,
            Self::Add => 0x3,
            Self::Sub => 0x4,
            Self::Jmp => 0x5,
            Self::Jz => 0x6,
            Self::Ldi => 0x7,
        }
    }

    pub fn from_value(value: u8) -> Option<Self> {
        Self::iter().find(|op| op.value() == value)
    }

    pub fn operand_kind(&self) -> OperandKind {
        match self {
            Self::Hlt => OperandKind::None,
            Self::Ldi => OperandKind::Immediate,
            Self::Lda | Self::Sta | Self::Add | Self::Sub | Self::Jmp | Self::Jz
                => OperandKind::Address,
        }
    }

    pub fn nibble_size(&self) -> u8 {
        match self.operand_kind() {
            OperandKind::Address => 4,
            OperandKind::None | OperandKind::Immediate => 2,
        }
    }

    /// Builds an instruction from this opcode and a list of operands.
    /// Returns [None] if the operands don't fit the opcode.
    pub fn build(&self, operands: &[AnyOperand]) -> Option<Instruction> {
        use Instruction::*;

        let addr = || match operands {
            [AnyOperand::Address(a)] => Some(*a),
            _ => None,
        };

        Some(match self {
            Self::Hlt if operands.is_empty() => Hlt,
            Self::Hlt => return None,
            Self::Lda => Lda { addr: addr()? },
            Self::Sta => Sta { addr: addr()? },
            Self::Add => Add { addr: addr()? },
            Self::Sub => Sub { addr: addr()? },
            Self::Jmp => Jmp { addr: addr()? },
            Self::Jz => Jz { addr: addr()? },
            Self::Ldi => match operands {
                [AnyOperand::Immediate(imm)] if *imm <= 0xF => Ldi { imm: *imm },
                _ => return None,
            },
        })
    }
}

#[cfg(test)]
mod test {
    use crate::InstructionOpcode;

    #[test]
    fn test_mnemonic_lookup() {
        assert_eq!(Some(InstructionOpcode::Ldi), InstructionOpcode::from_mnemonic("LDI"));
        assert_eq!(Some(InstructionOpcode::Jz), InstructionOpcode::from_mnemonic("jz"));
        assert_eq!(None, InstructionOpcode::from_mnemonic("nop"));
        assert_eq!("sta", InstructionOpcode::Sta.mnemonic());
    }

    #[test]
    fn test_value_mirror() {
        for value in 0..=0xF {
            if let Some(op) = InstructionOpcode::from_value(value) {
                assert_eq!(value, op.value());
            } else {
                assert!(value >= 8);
            }
        }
    }
}
