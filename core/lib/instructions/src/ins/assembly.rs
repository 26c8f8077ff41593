use crate::{ToAssembly, Instruction};

impl ToAssembly for Instruction {
    fn to_assembly(&self) -> String {
        use Instruction::*;

        let opcode = self.opcode().mnemonic();
        match self {
            Hlt => opcode,
            Ldi { imm } => format!("{opcode} {}", imm.to_assembly()),
            Lda { addr } | Sta { addr } | Add { addr } | Sub { addr } | Jmp { addr } | Jz { addr }
                => format!("{opcode} 0x{addr:02X}"),
        }
    }
}
