use bitmatch::bitmatch;

use crate::{Encodable, Instruction, InstructionOpcode};

/// Splits an instruction byte into its opcode and low-nibble immediate.
/// Returns [None] for opcodes which don't exist.
#[bitmatch]
pub fn decode_instruction_byte(byte: u8) -> Option<(InstructionOpcode, u8)> {
    #[bitmatch]
    let "oooo_iiii" = byte;
    Some((InstructionOpcode::from_value(o)?, i))
}

impl Encodable for Instruction {
    fn encode(self) -> Vec<u8> {
        use Instruction::*;

        let op = self.opcode().value();
        match self {
            Hlt => vec![op, 0],
            Ldi { imm } => vec![op, imm & 0xF],
            Lda { addr } | Sta { addr } | Add { addr } | Sub { addr } | Jmp { addr } | Jz { addr }
                => vec![op, 0, addr >> 4, addr & 0xF],
        }
    }

    fn decode(nibbles: &[u8]) -> Option<Self> {
        use Instruction::*;

        let [high, low, rest @ ..] = nibbles else {
            return None
        };
        if *high > 0xF || *low > 0xF {
            return None
        }
        let (opcode, imm) = decode_instruction_byte(high << 4 | low)?;

        let addr = || match rest {
            [a_high, a_low, ..] if *a_high <= 0xF && *a_low <= 0xF => Some(a_high << 4 | a_low),
            _ => None,
        };

        Some(match opcode {
            InstructionOpcode::Hlt => Hlt,
            InstructionOpcode::Lda => Lda { addr: addr()? },
            InstructionOpcode::Sta => Sta { addr: addr()? },
            InstructionOpcode::Add => Add { addr: addr()? },
            InstructionOpcode::Sub => Sub { addr: addr()? },
            InstructionOpcode::Jmp => Jmp { addr: addr()? },
            InstructionOpcode::Jz => Jz { addr: addr()? },
            InstructionOpcode::Ldi => Ldi { imm },
        })
    }
}

#[cfg(test)]
mod test {
    use crate::{Instruction, Encodable, InstructionOpcode, decode_instruction_byte};

    #[test]
    fn test_encode() {
        assert_eq!(vec![0x7, 0x5], Instruction::Ldi { imm: 5 }.encode());
        assert_eq!(vec![0x0, 0x0], Instruction::Hlt.encode());
        assert_eq!(vec![0x3, 0x0, 0xA, 0x2], Instruction::Add { addr: 0xA2 }.encode());
    }

    #[test]
    fn test_instruction_byte() {
        assert_eq!(Some((InstructionOpcode::Ldi, 0x9)), decode_instruction_byte(0x79));
        assert_eq!(Some((InstructionOpcode::Hlt, 0x0)), decode_instruction_byte(0x00));
        assert_eq!(None, decode_instruction_byte(0x80));
        assert_eq!(None, decode_instruction_byte(0xFF));
    }

    #[test]
    fn test_decode_truncated() {
        assert_eq!(None, Instruction::decode(&[0x1, 0x0, 0x4]));
        assert_eq!(None, Instruction::decode(&[0x7]));
        assert_eq!(None, Instruction::decode(&[0x7, 0x10]));
    }

    #[test]
    fn test_brute_mirror_encode_decode() {
        for high in 0..=0xF {
            for low in 0..=0xF {
                for addr in [0x00, 0x5A, 0xFF] {
                    let nibbles = [high, low, addr >> 4, addr & 0xF];
                    if let Some(ins) = Instruction::decode(&nibbles) {
                        let reencoded = ins.encode();
                        assert_eq!(&nibbles[..reencoded.len()], &reencoded[..]);
                    }
                }
            }
        }
    }
}
