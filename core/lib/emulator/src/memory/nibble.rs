use micro4_core_instructions::MEMORY_SIZE;

use super::Memory;

const NIBBLE_MASK: u8 = 0x0F;

pub struct NibbleMemory {
    pub data: [u8; MEMORY_SIZE],
}

impl Memory for NibbleMemory {
    fn read(&self, address: u8) -> u8 {
        self.data[address as usize] & NIBBLE_MASK
    }

    fn write(&mut self, address: u8, value: u8) {
        self.data[address as usize] = value & NIBBLE_MASK;
    }

    fn image(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    fn clear(&mut self) {
        self.data = [0; MEMORY_SIZE];
    }
}

impl NibbleMemory {
    pub fn new() -> Self {
        Self { data: [0; MEMORY_SIZE] }
    }

    /// Creates memory holding `nibbles` from address 0 onwards.
    /// Anything past the end of memory is discarded.
    pub fn with_content(nibbles: &[u8]) -> Self {
        let mut memory = Self::new();
        for (cell, nibble) in memory.data.iter_mut().zip(nibbles) {
            *cell = nibble & NIBBLE_MASK;
        }
        memory
    }
}

impl Default for NibbleMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use crate::memory::{Memory, NibbleMemory};

    #[test]
    fn test_masks_writes() {
        let mut memory = NibbleMemory::with_content(&[0x17, 0x2]);
        assert_eq!(0x7, memory.read(0));
        assert_eq!(0x2, memory.read(1));

        memory.write(0xFF, 0xAB);
        assert_eq!(0xB, memory.read(0xFF));

        memory.clear();
        assert!(memory.image().iter().all(|n| *n == 0));
    }
}
