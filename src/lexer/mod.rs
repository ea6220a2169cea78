//! Lexical analysis for Bloch.
//!
//! A single forward pass over the source text with one character of primary
//! lookahead (two for `//` comments and multi-character operators). Every
//! token carries the 1-based position of its first character; the stream
//! always ends with an explicit [`TokenKind::Eof`] token.

mod token;

pub use token::*;

use std::{iter::Peekable, str::Chars};

use crate::error::{LexError, LexResult, Position};

pub struct Lexer<'a> {
    tokens: Vec<Token>,
    iterator: Peekable<Chars<'a>>,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            tokens: vec![],
            iterator: input.chars().peekable(),
            line: 1,
            col: 1,
        }
    }

    fn peek(&mut self) -> Option<&char> {
        self.iterator.peek()
    }

    /// Consume one character, advancing the position counters.
    fn advance(&mut self) -> Option<char> {
        let next = self.iterator.next()?;
        if next == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(next)
    }

    fn advance_if(&mut self, func: impl FnOnce(&char) -> bool) -> Option<char> {
        if self.peek().map(|c| func(c)).unwrap_or(false) {
            self.advance()
        } else {
            None
        }
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.col)
    }

    fn error(&self, message: impl Into<String>, position: Position) -> LexError {
        LexError {
            message: message.into(),
            position,
        }
    }

    fn push(&mut self, kind: TokenKind, lexeme: impl Into<String>, position: Position) {
        self.tokens.push(Token::new(kind, lexeme, position));
    }

    pub fn lex(mut self) -> LexResult<Vec<Token>> {
        loop {
            self.eat_whitespace_and_comments();

            let position = self.position();
            let Some(&next) = self.peek() else {
                self.push(TokenKind::Eof, "", position);
                return Ok(self.tokens);
            };

            match next {
                'a'..='z' | 'A'..='Z' | '_' => self.lex_identifier(position),
                '0'..='9' => self.lex_numeric(position)?,
                '"' => self.lex_string(position)?,
                '\'' => self.lex_char(position)?,
                _ => self.lex_operator(position)?,
            }
        }
    }

    fn eat_whitespace_and_comments(&mut self) {
        loop {
            while self.advance_if(|c| c.is_whitespace()).is_some() {}

            // two-character lookahead for `//`
            let mut clone = self.iterator.clone();
            if clone.next() == Some('/') && clone.next() == Some('/') {
                while self.advance_if(|c| *c != '\n').is_some() {}
                continue;
            }

            return;
        }
    }

    fn lex_identifier(&mut self, position: Position) {
        let mut lexeme = String::new();
        while let Some(c) = self.advance_if(|c| c.is_ascii_alphanumeric() || *c == '_') {
            lexeme.push(c);
        }

        match KEYWORDS.get(lexeme.as_str()) {
            Some(&kind) => self.push(kind, lexeme, position),
            None => self.push(TokenKind::Identifier, lexeme, position),
        }
    }

    fn lex_numeric(&mut self, position: Position) -> LexResult<()> {
        let mut digits = String::new();
        while let Some(c) = self.advance_if(|c| c.is_ascii_digit()) {
            digits.push(c);
        }

        match self.peek() {
            Some('.') => {
                self.advance();
                let mut lexeme = format!("{digits}.");
                while let Some(c) = self.advance_if(|c| c.is_ascii_digit()) {
                    lexeme.push(c);
                }
                // the `f` suffix is mandatory on float literals
                if self.advance_if(|c| *c == 'f').is_none() {
                    return Err(
                        self.error(format!("float literal '{lexeme}' is missing its 'f' suffix"), position)
                    );
                }
                self.push(TokenKind::FloatLiteral, lexeme, position);
            }
            Some('f') => {
                self.advance();
                self.push(TokenKind::FloatLiteral, digits, position);
            }
            Some('L') => {
                self.advance();
                self.push(TokenKind::LongLiteral, digits, position);
            }
            Some('b') => {
                self.advance();
                if digits != "0" && digits != "1" {
                    return Err(self.error(
                        format!("malformed bit literal '{digits}b'; only '0b' and '1b' are valid"),
                        position,
                    ));
                }
                self.push(TokenKind::BitLiteral, digits, position);
            }
            _ => self.push(TokenKind::IntLiteral, digits, position),
        }

        Ok(())
    }

    /// String literals may span lines; v1.x has no escape sequences.
    fn lex_string(&mut self, position: Position) -> LexResult<()> {
        self.advance();

        let mut value = String::new();
        loop {
            match self.advance() {
                Some('"') => break,
                Some(c) => value.push(c),
                None => return Err(self.error("unterminated string literal", position)),
            }
        }

        self.push(TokenKind::StringLiteral, value, position);
        Ok(())
    }

    fn lex_char(&mut self, position: Position) -> LexResult<()> {
        self.advance();

        let Some(value) = self.advance() else {
            return Err(self.error("unterminated char literal", position));
        };
        if value == '\'' {
            return Err(self.error("empty char literal", position));
        }
        if self.advance_if(|c| *c == '\'').is_none() {
            return Err(self.error("unterminated char literal", position));
        }

        self.push(TokenKind::CharLiteral, value.to_string(), position);
        Ok(())
    }

    fn lex_operator(&mut self, position: Position) -> LexResult<()> {
        let Some(first) = self.advance() else {
            return Ok(());
        };

        // multi-character operators need one extra character of lookahead
        let kind = match first {
            '+' if self.advance_if(|c| *c == '+').is_some() => TokenKind::PlusPlus,
            '+' => TokenKind::Plus,
            '-' if self.advance_if(|c| *c == '-').is_some() => TokenKind::MinusMinus,
            '-' if self.advance_if(|c| *c == '>').is_some() => TokenKind::Arrow,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '=' if self.advance_if(|c| *c == '=').is_some() => TokenKind::Equal,
            '=' => TokenKind::Assign,
            '!' if self.advance_if(|c| *c == '=').is_some() => TokenKind::NotEqual,
            '!' => TokenKind::Bang,
            '<' if self.advance_if(|c| *c == '=').is_some() => TokenKind::LessEqual,
            '<' => TokenKind::Less,
            '>' if self.advance_if(|c| *c == '=').is_some() => TokenKind::GreaterEqual,
            '>' => TokenKind::Greater,
            '&' if self.advance_if(|c| *c == '&').is_some() => TokenKind::AndAnd,
            '&' => TokenKind::Ampersand,
            '|' if self.advance_if(|c| *c == '|').is_some() => TokenKind::OrOr,
            '|' => TokenKind::Pipe,
            '^' => TokenKind::Caret,
            '~' => TokenKind::Tilde,
            '?' => TokenKind::Question,
            ':' => TokenKind::Colon,
            ';' => TokenKind::Semicolon,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '@' => TokenKind::At,
            other => {
                return Err(self.error(format!("unknown character '{other}'"), position));
            }
        };

        let lexeme = match kind {
            TokenKind::PlusPlus => "++",
            TokenKind::MinusMinus => "--",
            TokenKind::Arrow => "->",
            TokenKind::Equal => "==",
            TokenKind::NotEqual => "!=",
            TokenKind::LessEqual => "<=",
            TokenKind::GreaterEqual => ">=",
            TokenKind::AndAnd => "&&",
            TokenKind::OrOr => "||",
            _ => {
                self.push(kind, first.to_string(), position);
                return Ok(());
            }
        };

        self.push(kind, lexeme, position);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input)
            .lex()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_lex_identifier_and_keyword() {
        assert_eq!(
            kinds("int counter"),
            vec![TokenKind::Int, TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn test_lex_positions() {
        let tokens = Lexer::new("int x;\nx = 1;").lex().unwrap();

        assert_eq!(tokens[0].position, Position::new(1, 1));
        assert_eq!(tokens[1].position, Position::new(1, 5));
        assert_eq!(tokens[3].position, Position::new(2, 1));
    }

    #[test]
    fn test_lex_numeric_literals() {
        let tokens = Lexer::new("42 7L 3.14f 2f 0b 1b").lex().unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();

        assert_eq!(
            kinds,
            vec![
                TokenKind::IntLiteral,
                TokenKind::LongLiteral,
                TokenKind::FloatLiteral,
                TokenKind::FloatLiteral,
                TokenKind::BitLiteral,
                TokenKind::BitLiteral,
                TokenKind::Eof,
            ]
        );
        assert_eq!(tokens[2].lexeme, "3.14");
    }

    #[test]
    fn test_lex_rejects_float_without_suffix() {
        assert!(Lexer::new("float pi = 3.14;").lex().is_err());
    }

    #[test]
    fn test_lex_rejects_malformed_bit_literal() {
        assert!(Lexer::new("2b").lex().is_err());
        assert!(Lexer::new("10b").lex().is_err());
    }

    #[test]
    fn test_lex_multichar_operators() {
        assert_eq!(
            kinds("== != <= >= && || ++ -- ->"),
            vec![
                TokenKind::Equal,
                TokenKind::NotEqual,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::PlusPlus,
                TokenKind::MinusMinus,
                TokenKind::Arrow,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_skips_comments() {
        assert_eq!(
            kinds("1 // the rest is ignored\n2"),
            vec![TokenKind::IntLiteral, TokenKind::IntLiteral, TokenKind::Eof]
        );
    }

    #[test]
    fn test_lex_string_spans_lines() {
        let tokens = Lexer::new("\"a\nb\" x").lex().unwrap();

        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].lexeme, "a\nb");
        // the identifier after the literal sits on line 2
        assert_eq!(tokens[1].position.line, 2);
    }

    #[test]
    fn test_lex_unterminated_string() {
        let err = Lexer::new("\"abc").lex().unwrap_err();
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn test_lex_char_literal() {
        let tokens = Lexer::new("'x'").lex().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::CharLiteral);
        assert_eq!(tokens[0].lexeme, "x");
    }

    #[test]
    fn test_lex_unknown_character() {
        assert!(Lexer::new("#").lex().is_err());
    }

    #[test]
    fn test_lex_annotation_marker() {
        assert_eq!(
            kinds("@shots(1024)"),
            vec![
                TokenKind::At,
                TokenKind::Identifier,
                TokenKind::LParen,
                TokenKind::IntLiteral,
                TokenKind::RParen,
                TokenKind::Eof,
            ]
        );
    }
}
