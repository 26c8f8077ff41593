mod ins;
pub use ins::*;

mod asm;
pub use asm::*;

mod disasm;
pub use disasm::*;

/// Number of addressable nibbles in Micro4 main memory.
pub const MEMORY_SIZE: usize = 256;

pub trait Encodable: Sized {
    /// Encodes into a stream of nibbles, most significant first.
    fn encode(self) -> Vec<u8>;

    /// Decodes from the start of a nibble stream.
    /// Returns [None] if the stream doesn't begin with a complete, valid instruction.
    fn decode(nibbles: &[u8]) -> Option<Self>;
}
