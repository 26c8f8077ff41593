use std::collections::BTreeSet;

use crate::{Encodable, Instruction, ToAssembly, MEMORY_SIZE};

/// One decoded item of a nibble image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disassembled {
    pub address: u8,
    pub nibbles: Vec<u8>,
    pub item: DisassembledItem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisassembledItem {
    Instruction(Instruction),

    /// Nibbles which don't start a valid instruction, or a truncated one at the end.
    Data,
}

/// Decodes `nibbles`, which are placed at `origin`, item by item.
///
/// Anything which isn't a complete instruction is emitted as data: an instruction byte's
/// worth of nibbles at a time, or the single nibble left at the end. Nibbles past the end of
/// memory are ignored.
pub fn disassemble(nibbles: &[u8], origin: u8) -> Vec<Disassembled> {
    let nibbles = &nibbles[..nibbles.len().min(MEMORY_SIZE - origin as usize)];

    let mut items = vec![];
    let mut offset = 0;
    while offset < nibbles.len() {
        let rest = &nibbles[offset..];
        let (item, size) = match Instruction::decode(rest) {
            Some(ins) => (DisassembledItem::Instruction(ins), ins.nibble_size() as usize),
            None => (DisassembledItem::Data, rest.len().min(2)),
        };

        items.push(Disassembled {
            address: origin + offset as u8,
            nibbles: rest[..size].to_vec(),
            item,
        });
        offset += size;
    }
    items
}

/// Addresses which branch instructions in `items` jump to.
pub fn jump_targets(items: &[Disassembled]) -> BTreeSet<u8> {
    items.iter()
        .filter_map(|d| match d.item {
            DisassembledItem::Instruction(Instruction::Jmp { addr } | Instruction::Jz { addr }) => Some(addr),
            _ => None,
        })
        .collect()
}

impl Disassembled {
    /// Renders as assembler source. Branches to an address in `labels` use that label's name.
    pub fn to_source(&self, labels: &BTreeSet<u8>) -> String {
        match self.item {
            DisassembledItem::Instruction(ins @ (Instruction::Jmp { addr } | Instruction::Jz { addr }))
                if labels.contains(&addr) => format!("{} {}", ins.opcode().mnemonic(), label_name(addr)),
            DisassembledItem::Instruction(ins) => ins.to_assembly(),
            DisassembledItem::Data => {
                let values = self.nibbles.iter().map(|n| format!("0x{n:X}")).collect::<Vec<_>>();
                format!("db {}", values.join(", "))
            }
        }
    }
}

pub fn label_name(address: u8) -> String {
    format!("L_{address:02X}")
}

/// Options for [listing].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingOptions {
    /// Define a label at every branch target inside the listing, and branch to it by name.
    pub labels: bool,

    /// Prefix each line with its address and raw nibbles, as a comment.
    pub addresses: bool,
}

impl Default for ListingOptions {
    fn default() -> Self {
        Self { labels: true, addresses: false }
    }
}

/// Disassembles an image into source text which assembles back to the same image.
pub fn listing(nibbles: &[u8], origin: u8, options: ListingOptions) -> String {
    let items = disassemble(nibbles, origin);

    // Only branch targets which start an item can be labelled
    let labels = if options.labels {
        let starts = items.iter().map(|d| d.address).collect::<BTreeSet<_>>();
        jump_targets(&items).intersection(&starts).copied().collect()
    } else {
        BTreeSet::new()
    };

    let mut out = String::new();
    if origin != 0 {
        out.push_str(&format!("org 0x{origin:02X}\n"));
    }
    for item in &items {
        if labels.contains(&item.address) {
            out.push_str(&format!("{}:\n", label_name(item.address)));
        }

        out.push_str("    ");
        out.push_str(&item.to_source(&labels));
        if options.addresses {
            let raw = item.nibbles.iter().map(|n| format!("{n:X}")).collect::<String>();
            out.push_str(&format!(" ; [{:02X}] {raw}", item.address));
        }
        out.push('\n');
    }
    out
}
