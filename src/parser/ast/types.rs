use std::fmt::Display;

use crate::error::Position;

use super::Expression;

/// The primitive types of the language. `void` is spelled separately as
/// [`TypeNode::Void`] since it is only valid in return position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PrimitiveType {
    Int,
    Long,
    Float,
    Bit,
    Char,
    String,
    Boolean,
    Qubit,
}

impl PrimitiveType {
    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveType::Int => "int",
            PrimitiveType::Long => "long",
            PrimitiveType::Float => "float",
            PrimitiveType::Bit => "bit",
            PrimitiveType::Char => "char",
            PrimitiveType::String => "string",
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::Qubit => "qubit",
        }
    }
}

impl Display for PrimitiveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Size of an array type: absent (dynamic), a fixed literal, or a size
/// expression the resolver later folds to a literal when statically
/// derivable.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ArraySize {
    Fixed(usize),
    Expr(Box<Expression>),
}

/// A syntactic type reference.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum TypeNode {
    Primitive {
        primitive: PrimitiveType,
        position: Position,
    },
    Named {
        name: String,
        type_args: Vec<TypeNode>,
        position: Position,
    },
    Array {
        element: Box<TypeNode>,
        size: Option<ArraySize>,
        position: Position,
    },
    Void {
        position: Position,
    },
}

impl TypeNode {
    pub fn position(&self) -> Position {
        match self {
            TypeNode::Primitive { position, .. }
            | TypeNode::Named { position, .. }
            | TypeNode::Array { position, .. }
            | TypeNode::Void { position } => *position,
        }
    }
}

impl Display for TypeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TypeNode::Primitive { primitive, .. } => primitive.fmt(f),
            TypeNode::Named {
                name, type_args, ..
            } => {
                f.write_str(name)?;
                if !type_args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in type_args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        arg.fmt(f)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            TypeNode::Array { element, size, .. } => {
                element.fmt(f)?;
                match size {
                    Some(ArraySize::Fixed(n)) => write!(f, "[{n}]"),
                    Some(ArraySize::Expr(_)) => write!(f, "[..]"),
                    None => write!(f, "[]"),
                }
            }
            TypeNode::Void { .. } => f.write_str("void"),
        }
    }
}
