use std::collections::BTreeSet;

use micro4_core_instructions::{disassemble, Encodable, Instruction, ToAssembly};
use micro4_core_emulator_protocol::StateSnapshot;

/// Names of the registers and flags which differ between two snapshots.
pub fn changes(old: &StateSnapshot, new: &StateSnapshot) -> Vec<String> {
    let mut changes = vec![];
    if old.pc != new.pc { changes.push("pc".to_string()); }
    if old.accumulator != new.accumulator { changes.push("a".to_string()); }
    if old.zero != new.zero { changes.push("z".to_string()); }
    if old.ir != new.ir { changes.push("ir".to_string()); }
    if old.mar != new.mar { changes.push("mar".to_string()); }
    if old.mdr != new.mdr { changes.push("mdr".to_string()); }
    if old.halted != new.halted { changes.push("halted".to_string()); }

    for (address, (old, new)) in old.memory.iter().zip(&new.memory).enumerate() {
        if old != new {
            changes.push(format!("[0x{address:02X}]"));
        }
    }
    changes
}

/// One line describing the registers, with a marker after each changed one.
pub fn registers(state: &StateSnapshot, changed: &[String]) -> String {
    let mark = |name: &str| if changed.iter().any(|c| c == name) { "*" } else { "" };

    let mut line = format!(
        "pc=0x{:02X}{} a=0x{:X}{} z={}{} ir=0x{:02X}{} mar=0x{:02X}{} mdr=0x{:X}{}  cycles={} instructions={}",
        state.pc, mark("pc"),
        state.accumulator, mark("a"),
        state.zero as u8, mark("z"),
        state.ir, mark("ir"),
        state.mar, mark("mar"),
        state.mdr, mark("mdr"),
        state.cycles, state.instructions,
    );
    if state.halted {
        line.push_str("  [halted]");
    }
    if let Some(error) = &state.error {
        line.push_str(&format!("  [{error}]"));
    }
    line
}

/// Disassembles the instruction at the program counter, if there is a valid one.
pub fn next_instruction(state: &StateSnapshot) -> Option<String> {
    let nibbles = state.memory.get(state.pc as usize..)?;
    Instruction::decode(nibbles).map(|i| i.to_assembly())
}

/// Memory as a 16x16 grid of nibbles, with the program counter's cell bracketed.
pub fn memory(state: &StateSnapshot) -> String {
    let mut out = String::from("     0 1 2 3 4 5 6 7 8 9 A B C D E F\n");
    for (row, cells) in state.memory.chunks(16).enumerate() {
        out.push_str(&format!("{:02X}: ", row * 16));
        for (column, cell) in cells.iter().enumerate() {
            let address = row * 16 + column;
            if address == state.pc as usize {
                out.push_str(&format!("[{cell:X}]"));
            } else if address == state.pc as usize + 1 {
                out.push_str(&format!("{cell:X}"));
            } else {
                out.push_str(&format!(" {cell:X}"));
            }
        }
        out.push('\n');
    }
    out
}

/// The cells from `start` to `end` inclusive, sixteen to a line.
pub fn memory_range(state: &StateSnapshot, start: u8, end: u8) -> String {
    let cells = state.memory.get(start as usize..=end as usize).unwrap_or_default();

    let mut out = String::new();
    for (line, chunk) in cells.chunks(16).enumerate() {
        let digits = chunk.iter().map(|cell| format!("{cell:X}")).collect::<Vec<_>>();
        out.push_str(&format!("{:02X}: {}\n", start as usize + line * 16, digits.join(" ")));
    }
    out
}

/// Disassembles the memory from `start` to `end` inclusive, one instruction per line.
/// The program counter's line is marked with `>`, and breakpoints with `*`.
pub fn disassembly(state: &StateSnapshot, start: u8, end: u8, breakpoints: &BTreeSet<u8>) -> String {
    let cells = state.memory.get(start as usize..=end as usize).unwrap_or_default();

    let mut out = String::new();
    for item in disassemble(cells, start) {
        let breakpoint = if breakpoints.contains(&item.address) { '*' } else { ' ' };
        let current = if item.address == state.pc { '>' } else { ' ' };
        out.push_str(&format!(
            "{breakpoint}{current} 0x{:02X}  {}\n",
            item.address,
            item.to_source(&BTreeSet::new()),
        ));
    }
    out
}
