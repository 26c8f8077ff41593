use std::collections::HashMap;

use micro4_core_instructions::{AnyOperand, Encodable, Instruction, InstructionOpcode, OperandKind, MEMORY_SIZE};
use thiserror::Error;

use crate::{AssemblyItem, AssemblyItemKind, AssemblyOperand, Program};

impl AssemblyItem {
    /// The number of memory cells this item occupies.
    pub fn nibble_size(&self) -> u16 {
        match &self.kind {
            AssemblyItemKind::Instruction(opcode, _) => opcode.nibble_size() as u16,
            AssemblyItemKind::Origin(_) => 0,
            AssemblyItemKind::Nibbles(values) => values.len() as u16,
        }
    }
}

/// Converts [AssemblyItem]s into a [Program] by resolving labels and laying items out in memory.
#[derive(Debug, Clone, Default)]
pub struct Builder {
    /// Maps label names to the address where they are defined.
    label_addresses: HashMap<String, u16>,
}

impl Builder {
    pub fn build_once(items: &[AssemblyItem], origin: u8) -> Result<Program, Vec<BuildError>> {
        let mut builder = Builder::new();
        builder.build(items, origin)
    }

    pub fn new() -> Self {
        Self { label_addresses: HashMap::new() }
    }

    pub fn build(&mut self, items: &[AssemblyItem], origin: u8) -> Result<Program, Vec<BuildError>> {
        let mut errors = vec![];

        // First pass: find label definitions and save them
        let mut current_address = origin as u16;
        for item in items {
            if let AssemblyItemKind::Origin(address) = item.kind {
                current_address = address;
            }
            for label in &item.labels {
                if self.label_addresses.insert(label.clone(), current_address).is_some() {
                    errors.push(BuildError { line: item.line, kind: BuildErrorKind::DuplicateLabel(label.clone()) });
                }
            }
            current_address = current_address.saturating_add(item.nibble_size());
        }

        // Second pass: place each item's nibbles into the image
        let mut image = Image::new();
        current_address = origin as u16;
        for item in items {
            let placed = match &item.kind {
                AssemblyItemKind::Origin(address) => {
                    current_address = *address;
                    if *address as usize >= MEMORY_SIZE {
                        Err(BuildErrorKind::OriginOutOfRange(*address))
                    } else {
                        Ok(())
                    }
                }

                AssemblyItemKind::Instruction(opcode, operands) => self.resolve(*opcode, operands)
                    .and_then(|instr| image.place(current_address, &instr.encode())),

                AssemblyItemKind::Nibbles(values) => values.iter()
                    .map(|v| match u8::try_from(*v) {
                        Ok(nibble) if nibble <= 0xF => Ok(nibble),
                        _ => Err(BuildErrorKind::OperandOutOfRange { value: *v, max: 0xF }),
                    })
                    .collect::<Result<Vec<_>, _>>()
                    .and_then(|nibbles| image.place(current_address, &nibbles)),
            };
            if let Err(kind) = placed {
                errors.push(BuildError { line: item.line, kind });
            }
            current_address = current_address.saturating_add(item.nibble_size());
        }

        if errors.is_empty() {
            Ok(image.into_program(origin))
        } else {
            Err(errors)
        }
    }

    /// Resolves labels in an instruction's operands, and checks that they fit.
    fn resolve(&self, opcode: InstructionOpcode, operands: &[AssemblyOperand]) -> Result<Instruction, BuildErrorKind> {
        let kind = opcode.operand_kind();
        let expected = if kind == OperandKind::None { 0 } else { 1 };
        if operands.len() != expected {
            return Err(BuildErrorKind::WrongOperandCount { mnemonic: opcode.mnemonic(), expected, found: operands.len() })
        }

        let mut raw_operands = vec![];
        for op in operands {
            let value = match op {
                AssemblyOperand::Immediate(i) => *i,
                AssemblyOperand::Label(name) => match self.label_addresses.get(name) {
                    Some(a) => *a,
                    None => return Err(BuildErrorKind::UndefinedLabel(name.clone())),
                },
            };

            raw_operands.push(match kind {
                OperandKind::Immediate if value <= 0xF => AnyOperand::Immediate(value as u8),
                OperandKind::Immediate => return Err(BuildErrorKind::OperandOutOfRange { value, max: 0xF }),
                _ => match u8::try_from(value) {
                    Ok(address) => AnyOperand::Address(address),
                    Err(_) => return Err(BuildErrorKind::OperandOutOfRange { value, max: 0xFF }),
                },
            });
        }

        opcode.build(&raw_operands).ok_or(BuildErrorKind::InvalidOperands(opcode))
    }
}

/// Memory as laid out by the assembler. Cells not written by any item stay empty.
struct Image {
    cells: Vec<Option<u8>>,
}

impl Image {
    fn new() -> Self {
        Self { cells: vec![None; MEMORY_SIZE] }
    }

    fn place(&mut self, address: u16, nibbles: &[u8]) -> Result<(), BuildErrorKind> {
        for (offset, nibble) in nibbles.iter().enumerate() {
            let target = address as usize + offset;
            match self.cells.get_mut(target) {
                None => return Err(BuildErrorKind::ImageTooLarge(target)),
                Some(Some(_)) => return Err(BuildErrorKind::Overlap(target as u8)),
                Some(cell) => *cell = Some(*nibble),
            }
        }
        Ok(())
    }

    /// Takes the cells from the lowest to the highest written address, filling gaps with zero.
    fn into_program(self, origin: u8) -> Program {
        let first = self.cells.iter().position(Option::is_some);
        let last = self.cells.iter().rposition(Option::is_some);
        match (first, last) {
            (Some(first), Some(last)) => Program {
                origin: first as u8,
                nibbles: self.cells[first..=last].iter().map(|c| c.unwrap_or(0)).collect(),
            },
            _ => Program { origin, nibbles: vec![] },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("build error on line {line}: {kind}")]
pub struct BuildError {
    pub line: usize,
    pub kind: BuildErrorKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum BuildErrorKind {
    #[error("{mnemonic} takes {expected} operand(s), found {found}")]
    WrongOperandCount { mnemonic: String, expected: usize, found: usize },

    #[error("invalid operands for {}", .0.mnemonic())]
    InvalidOperands(InstructionOpcode),

    #[error("operand {value} is out of range (maximum {max})")]
    OperandOutOfRange { value: u16, max: u8 },

    #[error("origin 0x{0:X} is outside memory")]
    OriginOutOfRange(u16),

    #[error("undefined label {0}")]
    UndefinedLabel(String),

    #[error("label {0} is defined more than once")]
    DuplicateLabel(String),

    #[error("program runs past the end of memory at 0x{0:X}")]
    ImageTooLarge(usize),

    #[error("address 0x{0:02X} is written more than once")]
    Overlap(u8),
}
