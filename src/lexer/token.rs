use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::Position;

/// The closed set of token kinds produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum TokenKind {
    // literals
    IntLiteral,
    LongLiteral,
    FloatLiteral,
    BitLiteral,
    CharLiteral,
    StringLiteral,

    Identifier,

    // primitive type names
    Int,
    Long,
    Float,
    Bit,
    Char,
    String,
    Boolean,
    Qubit,
    Void,

    // control keywords
    Function,
    Return,
    If,
    Else,
    While,
    For,

    // class keywords
    Class,
    Extends,
    Abstract,
    Static,
    Virtual,
    Override,
    Final,
    New,
    This,
    Super,
    Constructor,
    Destructor,
    Default,

    // visibility keywords
    Public,
    Private,
    Protected,

    // statement keywords
    Echo,
    Measure,
    Reset,
    Destroy,
    Import,
    Package,

    // literal keywords
    True,
    False,
    Null,

    // operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    AndAnd,
    OrOr,
    Bang,
    Tilde,
    Ampersand,
    Pipe,
    Caret,
    PlusPlus,
    MinusMinus,
    Arrow,
    Question,

    // punctuation
    Colon,
    Semicolon,
    Comma,
    Dot,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    At,

    Eof,
}

impl TokenKind {
    /// Whether this kind names a primitive type.
    pub fn is_primitive_type(&self) -> bool {
        matches!(
            self,
            TokenKind::Int
                | TokenKind::Long
                | TokenKind::Float
                | TokenKind::Bit
                | TokenKind::Char
                | TokenKind::String
                | TokenKind::Boolean
                | TokenKind::Qubit
        )
    }
}

/// A single token: kind, the original lexeme, and the position of its first
/// character.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub position: Position,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, position: Position) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            position,
        }
    }
}

/// Fixed keyword table. Identifiers not present here lex as
/// [`TokenKind::Identifier`]; the built-in gate names stay identifiers and
/// are bound by the semantic analyser.
pub static KEYWORDS: Lazy<HashMap<&'static str, TokenKind>> = Lazy::new(|| {
    let mut m = HashMap::new();

    m.insert("int", TokenKind::Int);
    m.insert("long", TokenKind::Long);
    m.insert("float", TokenKind::Float);
    m.insert("bit", TokenKind::Bit);
    m.insert("char", TokenKind::Char);
    m.insert("string", TokenKind::String);
    m.insert("boolean", TokenKind::Boolean);
    m.insert("qubit", TokenKind::Qubit);
    m.insert("void", TokenKind::Void);

    m.insert("function", TokenKind::Function);
    m.insert("return", TokenKind::Return);
    m.insert("if", TokenKind::If);
    m.insert("else", TokenKind::Else);
    m.insert("while", TokenKind::While);
    m.insert("for", TokenKind::For);

    m.insert("class", TokenKind::Class);
    m.insert("extends", TokenKind::Extends);
    m.insert("abstract", TokenKind::Abstract);
    m.insert("static", TokenKind::Static);
    m.insert("virtual", TokenKind::Virtual);
    m.insert("override", TokenKind::Override);
    m.insert("final", TokenKind::Final);
    m.insert("new", TokenKind::New);
    m.insert("this", TokenKind::This);
    m.insert("super", TokenKind::Super);
    m.insert("constructor", TokenKind::Constructor);
    m.insert("destructor", TokenKind::Destructor);
    m.insert("default", TokenKind::Default);

    m.insert("public", TokenKind::Public);
    m.insert("private", TokenKind::Private);
    m.insert("protected", TokenKind::Protected);

    m.insert("echo", TokenKind::Echo);
    m.insert("measure", TokenKind::Measure);
    m.insert("reset", TokenKind::Reset);
    m.insert("destroy", TokenKind::Destroy);
    m.insert("import", TokenKind::Import);
    m.insert("package", TokenKind::Package);

    m.insert("true", TokenKind::True);
    m.insert("false", TokenKind::False);
    m.insert("null", TokenKind::Null);

    m
});
