mod nibble;

pub use nibble::*;

/// Nibble-addressed storage for a [crate::Core].
///
/// Every cell holds one 4-bit value; implementations must mask anything wider.
pub trait Memory {
    fn read(&self, address: u8) -> u8;
    fn write(&mut self, address: u8, value: u8);

    /// A copy of every cell, in address order.
    fn image(&self) -> Vec<u8>;

    /// Sets every cell to zero.
    fn clear(&mut self);
}
