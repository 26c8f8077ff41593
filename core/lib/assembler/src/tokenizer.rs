use std::{iter::Peekable, str::Chars};

use crate::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

impl Token {
    pub fn new(kind: TokenKind, line: usize) -> Self {
        Self { kind, line }
    }

    pub fn describe(&self) -> String {
        self.kind.describe()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// A mnemonic, bare directive, or operand.
    Atom(String),

    Label(String),
    Directive(String),
    Comma,
    Newline,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Atom(a) => format!("atom '{a}'"),
            TokenKind::Label(l) => format!("label '{l}'"),
            TokenKind::Directive(d) => format!("directive '{d}'"),
            TokenKind::Comma => "comma".to_string(),
            TokenKind::Newline => "newline".to_string(),
        }
    }
}

/// Converts lines of assembly into [Token]s.
pub struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn from_str(string: &'a str) -> Tokenizer<'a> {
        Self { chars: string.chars().peekable(), line: 1 }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, Vec<ParseError>> {
        let mut tokens = vec![];
        let mut errors = vec![];

        while self.chars.peek().is_some() {
            match self.tokenize_one() {
                Ok(Some(t)) => tokens.push(t),
                Ok(None) => break,
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            Ok(tokens)
        } else {
            Err(errors)
        }
    }

    pub fn tokenize_one(&mut self) -> Result<Option<Token>, ParseError> {
        match self.chars.peek() {
            // Comments
            Some(';') => {
                while let Some(c) = self.chars.peek() {
                    if *c == '\n' {
                        break;
                    }
                    self.chars.next();
                }
                self.tokenize_one()
            }

            // Spacing
            Some('\n') => {
                self.chars.next();
                let token = Token::new(TokenKind::Newline, self.line);
                self.line += 1;
                Ok(Some(token))
            }
            Some(c) if c.is_whitespace() => {
                self.chars.next();
                self.tokenize_one()
            }

            Some('.') => {
                self.chars.next();
                Ok(Some(Token::new(TokenKind::Directive(self.read_atom()?), self.line)))
            }

            Some(',') => {
                self.chars.next();
                Ok(Some(Token::new(TokenKind::Comma, self.line)))
            }

            // Immediate marker, kept on the atom for the operand parser
            Some('#') => {
                self.chars.next();
                Ok(Some(Token::new(TokenKind::Atom(format!("#{}", self.read_atom()?)), self.line)))
            }

            // Label/atom
            Some(c) if Self::is_valid_atom_char(*c) => {
                let atom = self.read_atom()?;
                if let Some(':') = self.chars.peek() {
                    self.chars.next();
                    Ok(Some(Token::new(TokenKind::Label(atom), self.line)))
                } else {
                    Ok(Some(Token::new(TokenKind::Atom(atom), self.line)))
                }
            }
            
            Some(c) => {
                let c = *c;
                self.chars.next();
                Err(ParseError::new(format!("unexpected character {c}")).at_line(self.line))
            }
            None => Ok(None),
        }
    }

    fn read_atom(&mut self) -> Result<String, ParseError> {
        let mut buffer = String::new();
        while let Some(c) = self.chars.peek() {
            if Self::is_valid_atom_char(*c) {
                buffer.push(*c);
                self.chars.next();
            } else {
                break;
            }
        }
    
        if buffer.is_empty() {
            let actually_found = self.describe_next();
            return Err(ParseError::new(format!("expected atom, found: {actually_found}")).at_line(self.line))
        }
    
        Ok(buffer)
    }
    
    fn is_valid_atom_char(c: char) -> bool {
        c.is_alphanumeric() || c == '_'
    }

    fn describe_next(&mut self) -> String {
        match self.chars.peek() {
            Some('\n') => "newline".to_string(),
            Some(c) => c.to_string(),
            None => "end of input".to_string(),
        }
    }
}
