//! Shared error surface of the interpreter.
//!
//! Each pipeline stage has its own error type; this module defines the
//! position type they all carry and the top-level [`BlochError`] the driver
//! consumes. Error categories form a closed set and every error is anchored
//! to a 1-based (line, column) in the source.

use std::{error::Error, fmt::Display};

use colored::Colorize;

/// A 1-based (line, column) anchor into the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LexError {
    pub message: String,
    pub position: Position,
}

pub type LexResult<T> = Result<T, LexError>;

impl Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.position, "lexical error".red(), self.message)
    }
}

impl Error for LexError {}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ParseError {
    pub message: String,
    pub position: Position,
}

pub type ParseResult<T> = Result<T, ParseError>;

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.position, "parse error".red(), self.message)
    }
}

impl Error for ParseError {}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SemanticError {
    pub message: String,
    pub position: Position,
}

pub type SemanticResult<T> = Result<T, SemanticError>;

impl Display for SemanticError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.position, "semantic error".red(), self.message)
    }
}

impl Error for SemanticError {}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RuntimeError {
    pub message: String,
    pub position: Position,
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

impl Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.position, "runtime error".red(), self.message)
    }
}

impl Error for RuntimeError {}

/// The error category, as reported to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Category {
    Lexical,
    Parse,
    Semantic,
    Runtime,
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Category::Lexical => "Lexical",
            Category::Parse => "Parse",
            Category::Semantic => "Semantic",
            Category::Runtime => "Runtime",
        };
        f.write_str(name)
    }
}

/// Top-level error handed to the driver: one of the four stage errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlochError {
    Lexical(LexError),
    Parse(ParseError),
    Semantic(SemanticError),
    Runtime(RuntimeError),
}

impl BlochError {
    pub fn category(&self) -> Category {
        match self {
            BlochError::Lexical(_) => Category::Lexical,
            BlochError::Parse(_) => Category::Parse,
            BlochError::Semantic(_) => Category::Semantic,
            BlochError::Runtime(_) => Category::Runtime,
        }
    }

    pub fn position(&self) -> Position {
        match self {
            BlochError::Lexical(e) => e.position,
            BlochError::Parse(e) => e.position,
            BlochError::Semantic(e) => e.position,
            BlochError::Runtime(e) => e.position,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            BlochError::Lexical(e) => &e.message,
            BlochError::Parse(e) => &e.message,
            BlochError::Semantic(e) => &e.message,
            BlochError::Runtime(e) => &e.message,
        }
    }
}

impl Display for BlochError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlochError::Lexical(e) => e.fmt(f),
            BlochError::Parse(e) => e.fmt(f),
            BlochError::Semantic(e) => e.fmt(f),
            BlochError::Runtime(e) => e.fmt(f),
        }
    }
}

impl Error for BlochError {}

impl From<LexError> for BlochError {
    fn from(value: LexError) -> Self {
        BlochError::Lexical(value)
    }
}

impl From<ParseError> for BlochError {
    fn from(value: ParseError) -> Self {
        BlochError::Parse(value)
    }
}

impl From<SemanticError> for BlochError {
    fn from(value: SemanticError) -> Self {
        BlochError::Semantic(value)
    }
}

impl From<RuntimeError> for BlochError {
    fn from(value: RuntimeError) -> Self {
        BlochError::Runtime(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_of_wrapped_errors() {
        let err = BlochError::from(LexError {
            message: "unterminated string literal".into(),
            position: Position::new(3, 7),
        });

        assert_eq!(err.category(), Category::Lexical);
        assert_eq!(err.position(), Position::new(3, 7));
    }

    #[test]
    fn test_display_carries_position() {
        let err = RuntimeError {
            message: "division by zero".into(),
            position: Position::new(1, 14),
        };

        assert!(err.to_string().starts_with("1:14"));
    }
}
