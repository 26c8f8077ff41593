use std::{error::Error, fmt::Display};

/// An operand as found in a parsed assembly instruction.
/// 
/// This does not correspond to an operand as found in a core instruction, as labels are
/// still unresolved and values haven't been range-checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssemblyOperand {
    Immediate(u16),
    Label(String),
}

impl AssemblyOperand {
    /// Parse a single operand.
    pub fn parse(op: &str) -> Result<Self, ParseError> {
        // A leading `#` marks an immediate, but is optional
        let (marked, op) = match op.strip_prefix('#') {
            Some(rest) => (true, rest),
            None => (false, op),
        };

        let Some(first) = op.chars().next() else {
            return Err(ParseError::new("empty operand".to_string()))
        };

        // Check if number (either decimal, or start of 0x/0b prefix)
        if first.is_ascii_digit() {
            let lower = op.to_ascii_lowercase();
            let (numeral, radix) = if let Some(hex) = lower.strip_prefix("0x") {
                (hex, 16)
            } else if let Some(bin) = lower.strip_prefix("0b") {
                (bin, 2)
            } else {
                (lower.as_str(), 10)
            };

            return match u16::from_str_radix(numeral, radix) {
                Ok(i) => Ok(Self::Immediate(i)),
                Err(e) => Err(ParseError::new(format!("integer parse error in '{op}': {e}"))),
            }
        }

        if marked {
            return Err(ParseError::new(format!("expected a number after '#', found '{op}'")))
        }

        // Label usages are numbers, letters, or underscores, not starting with a number
        if let Some(invalid) = op.chars().find(|c| !(c.is_alphanumeric() || *c == '_')) {
            return Err(ParseError::new(format!("label name contains invalid character: {invalid}")))
        }
        Ok(Self::Label(op.to_string()))
    }
}

impl From<u16> for AssemblyOperand {
    fn from(value: u16) -> Self { AssemblyOperand::Immediate(value) }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseError {
    pub description: String,
    pub line: Option<usize>,
}

impl ParseError {
    pub fn new(description: String) -> Self {
        Self { description, line: None }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line.get_or_insert(line);
        self
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "parse error on line {line}: {}", self.description),
            None => write!(f, "parse error: {}", self.description),
        }
    }
}
impl Error for ParseError {}

#[cfg(test)]
mod test {
    use crate::AssemblyOperand;

    #[test]
    fn test_immediate_parse() {
        assert_eq!(
            Ok(AssemblyOperand::Immediate(200)),
            AssemblyOperand::parse("200"),
        );
        assert_eq!(
            Ok(AssemblyOperand::Immediate(0xAB)),
            AssemblyOperand::parse("0xAB"),
        );
        assert_eq!(
            Ok(AssemblyOperand::Immediate(0xC)),
            AssemblyOperand::parse("0XC"),
        );
        assert_eq!(
            Ok(AssemblyOperand::Immediate(0b1010)),
            AssemblyOperand::parse("0b1010"),
        );
        assert_eq!(
            Ok(AssemblyOperand::Immediate(7)),
            AssemblyOperand::parse("#7"),
        );

        assert!(AssemblyOperand::parse("0xZZ").is_err());
        assert!(AssemblyOperand::parse("99999").is_err());
    }

    #[test]
    fn test_label_parse() {
        assert_eq!(
            Ok(AssemblyOperand::Label("loop_2".to_string())),
            AssemblyOperand::parse("loop_2"),
        );

        assert!(AssemblyOperand::parse("#loop").is_err());
        assert!(AssemblyOperand::parse("has-dash").is_err());
    }
}
