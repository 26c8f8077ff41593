mod core;
pub use crate::core::*;

pub mod memory;
