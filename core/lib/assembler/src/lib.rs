//! A two-pass assembler for Micro4 programs.
//!
//! Source is tokenized, grouped into items by the [Parser], and then laid out by the
//! [Builder], which resolves labels once every item's address is known.

use std::fmt::Display;

use thiserror::Error;

mod tokenizer;
pub use tokenizer::*;

mod parser;
pub use parser::*;

mod operand;
pub use operand::*;

mod builder;
pub use builder::*;

/// An assembled image, ready to load into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    /// Address of the first nibble.
    pub origin: u8,

    /// One nibble per element.
    pub nibbles: Vec<u8>,
}

impl Program {
    /// Renders every nibble as a single hex digit.
    pub fn to_ascii_hex(&self) -> String {
        self.nibbles.iter().map(|n| format!("{n:X}")).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("{}", one_per_line(.0))]
    Parse(Vec<ParseError>),

    #[error("{}", one_per_line(.0))]
    Build(Vec<BuildError>),
}

fn one_per_line<T: Display>(errors: &[T]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n")
}

/// Assembles `source`, starting at address 0 unless it sets its own origin.
pub fn assemble(source: &str) -> Result<Program, AssemblyError> {
    assemble_at(source, 0)
}

pub fn assemble_at(source: &str, origin: u8) -> Result<Program, AssemblyError> {
    let tokens = Tokenizer::from_str(source).tokenize().map_err(AssemblyError::Parse)?;
    let items = Parser::from_tokens(tokens).parse().map_err(AssemblyError::Parse)?;
    Builder::build_once(&items, origin).map_err(AssemblyError::Build)
}
