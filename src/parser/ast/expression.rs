use crate::error::Position;

use super::{PrimitiveType, TypeNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinaryOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Modulo => "%",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::Less => "<",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::Greater => ">",
            BinaryOperator::GreaterEqual => ">=",
            BinaryOperator::And => "&&",
            BinaryOperator::Or => "||",
            BinaryOperator::BitAnd => "&",
            BinaryOperator::BitOr => "|",
            BinaryOperator::BitXor => "^",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum UnaryOperator {
    Negate,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PostfixOperator {
    Increment,
    Decrement,
}

/// Targets of an assignment expression.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum AssignTarget {
    Variable {
        name: String,
        position: Position,
    },
    Member {
        object: Box<Expression>,
        field: String,
        position: Position,
    },
    Index {
        array: Box<Expression>,
        index: Box<Expression>,
        position: Position,
    },
}

impl AssignTarget {
    pub fn position(&self) -> Position {
        match self {
            AssignTarget::Variable { position, .. }
            | AssignTarget::Member { position, .. }
            | AssignTarget::Index { position, .. } => *position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Expression {
    IntLiteral {
        value: i64,
        position: Position,
    },
    LongLiteral {
        value: i64,
        position: Position,
    },
    FloatLiteral {
        value: f64,
        position: Position,
    },
    BitLiteral {
        value: u8,
        position: Position,
    },
    CharLiteral {
        value: char,
        position: Position,
    },
    StringLiteral {
        value: String,
        position: Position,
    },
    BooleanLiteral {
        value: bool,
        position: Position,
    },
    NullLiteral {
        position: Position,
    },
    Variable {
        name: String,
        position: Position,
    },
    Binary {
        operator: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
        position: Position,
    },
    Unary {
        operator: UnaryOperator,
        operand: Box<Expression>,
        position: Position,
    },
    /// `++`/`--` on a plain variable.
    Postfix {
        operator: PostfixOperator,
        name: String,
        position: Position,
    },
    Cast {
        target: PrimitiveType,
        operand: Box<Expression>,
        position: Position,
    },
    Call {
        function: String,
        arguments: Vec<Expression>,
        position: Position,
    },
    MethodCall {
        object: Box<Expression>,
        method: String,
        arguments: Vec<Expression>,
        position: Position,
    },
    SuperMethodCall {
        method: String,
        arguments: Vec<Expression>,
        position: Position,
    },
    MemberAccess {
        object: Box<Expression>,
        field: String,
        position: Position,
    },
    Index {
        array: Box<Expression>,
        index: Box<Expression>,
        position: Position,
    },
    ArrayLiteral {
        elements: Vec<Expression>,
        position: Position,
    },
    Grouping {
        inner: Box<Expression>,
        position: Position,
    },
    Measure {
        qubit: Box<Expression>,
        position: Position,
    },
    Assignment {
        target: AssignTarget,
        value: Box<Expression>,
        position: Position,
    },
    New {
        class_name: String,
        /// Empty with `diamond == true` means `new Foo<>()`; the resolver
        /// fills the arguments in during semantic analysis.
        type_args: Vec<TypeNode>,
        diamond: bool,
        arguments: Vec<Expression>,
        position: Position,
    },
    This {
        position: Position,
    },
}

impl Expression {
    pub fn position(&self) -> Position {
        match self {
            Expression::IntLiteral { position, .. }
            | Expression::LongLiteral { position, .. }
            | Expression::FloatLiteral { position, .. }
            | Expression::BitLiteral { position, .. }
            | Expression::CharLiteral { position, .. }
            | Expression::StringLiteral { position, .. }
            | Expression::BooleanLiteral { position, .. }
            | Expression::NullLiteral { position }
            | Expression::Variable { position, .. }
            | Expression::Binary { position, .. }
            | Expression::Unary { position, .. }
            | Expression::Postfix { position, .. }
            | Expression::Cast { position, .. }
            | Expression::Call { position, .. }
            | Expression::MethodCall { position, .. }
            | Expression::SuperMethodCall { position, .. }
            | Expression::MemberAccess { position, .. }
            | Expression::Index { position, .. }
            | Expression::ArrayLiteral { position, .. }
            | Expression::Grouping { position, .. }
            | Expression::Measure { position, .. }
            | Expression::Assignment { position, .. }
            | Expression::New { position, .. }
            | Expression::This { position } => *position,
        }
    }
}
