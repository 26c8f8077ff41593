use std::{iter::Peekable, vec};

use micro4_core_instructions::InstructionOpcode;

use crate::{AssemblyOperand, ParseError, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyItem {
    pub labels: Vec<String>,
    pub kind: AssemblyItemKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyItemKind {
    Instruction(InstructionOpcode, Vec<AssemblyOperand>),

    /// Moves the address that following items are placed at.
    Origin(u16),

    /// Raw nibbles placed directly into the image.
    Nibbles(Vec<u16>),
}

/// Groups [Token]s into [AssemblyItem]s, one per line.
pub struct Parser {
    tokens: Peekable<vec::IntoIter<Token>>,
}

impl Parser {
    pub fn from_tokens(tokens: Vec<Token>) -> Self {
        Self { tokens: tokens.into_iter().peekable() }
    }

    pub fn parse(&mut self) -> Result<Vec<AssemblyItem>, Vec<ParseError>> {
        let mut items = vec![];
        let mut errors = vec![];

        // Labels apply to the next item, even if it's on a later line
        let mut labels = vec![];
        let mut last_line = 1;

        while let Some(token) = self.tokens.next() {
            last_line = token.line;
            let head = match token.kind {
                TokenKind::Newline => continue,
                TokenKind::Label(label) => {
                    labels.push(label);
                    continue;
                }
                TokenKind::Comma => {
                    errors.push(ParseError::new("unexpected comma".to_string()).at_line(token.line));
                    self.skip_line();
                    continue;
                }
                TokenKind::Directive(d) => Head::Directive(d),
                TokenKind::Atom(a) => Head::Atom(a),
            };

            let operands = match self.parse_operands() {
                Ok(o) => o,
                Err(e) => {
                    errors.push(e.at_line(token.line));
                    self.skip_line();
                    continue;
                }
            };

            match Self::build_item(head, operands) {
                Ok(kind) => items.push(AssemblyItem {
                    labels: std::mem::take(&mut labels),
                    kind,
                    line: token.line,
                }),
                Err(e) => errors.push(e.at_line(token.line)),
            }
        }

        // Labels at the very end mark the address after everything else
        if !labels.is_empty() {
            items.push(AssemblyItem { labels, kind: AssemblyItemKind::Nibbles(vec![]), line: last_line });
        }
    
        if errors.is_empty() {
            Ok(items)
        } else {
            Err(errors)
        }
    }

    /// Reads comma-separated operands up to the end of the line.
    fn parse_operands(&mut self) -> Result<Vec<AssemblyOperand>, ParseError> {
        let mut operands = vec![];
        loop {
            match self.tokens.peek().map(|t| &t.kind) {
                None | Some(TokenKind::Newline) => return Ok(operands),
                Some(TokenKind::Comma) if !operands.is_empty() => { self.tokens.next(); }
                Some(_) if !operands.is_empty() => {
                    return Err(ParseError::new("expected comma separating operands".to_string()))
                }
                _ => (),
            }

            let Some(token) = self.tokens.next() else {
                return Err(ParseError::new("expected operand, found: end of input".to_string()))
            };
            match token.kind {
                TokenKind::Atom(atom) => operands.push(AssemblyOperand::parse(&atom)?),
                other => return Err(ParseError::new(format!("expected operand, found: {}", other.describe()))),
            }
        }
    }

    fn build_item(head: Head, operands: Vec<AssemblyOperand>) -> Result<AssemblyItemKind, ParseError> {
        let directive = match head {
            Head::Directive(d) => d,
            Head::Atom(a) if a.eq_ignore_ascii_case("org") || a.eq_ignore_ascii_case("db") => a,
            Head::Atom(mnemonic) => return match InstructionOpcode::from_mnemonic(&mnemonic) {
                Some(opcode) => Ok(AssemblyItemKind::Instruction(opcode, operands)),
                None => Err(ParseError::new(format!("no instruction: {mnemonic}"))),
            },
        };

        match directive.to_ascii_lowercase().as_str() {
            "org" => match operands.as_slice() {
                [AssemblyOperand::Immediate(origin)] => Ok(AssemblyItemKind::Origin(*origin)),
                _ => Err(ParseError::new("org takes one numeric operand".to_string())),
            },

            "db" => {
                if operands.is_empty() {
                    return Err(ParseError::new("db takes at least one operand".to_string()))
                }
                let values = operands.into_iter()
                    .map(|op| match op {
                        AssemblyOperand::Immediate(i) => Ok(i),
                        AssemblyOperand::Label(l) => Err(ParseError::new(format!("db operands must be numbers, found label {l}"))),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(AssemblyItemKind::Nibbles(values))
            }

            _ => Err(ParseError::new(format!("unknown directive: {directive}"))),
        }
    }

    fn skip_line(&mut self) {
        while let Some(token) = self.tokens.peek() {
            if token.kind == TokenKind::Newline {
                break
            }
            self.tokens.next();
        }
    }
}

enum Head {
    Directive(String),
    Atom(String),
}
