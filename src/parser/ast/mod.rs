//! AST node definitions.
//!
//! Three variant families (statements, expressions, types) plus the
//! declaration nodes that make up a [`Program`]. Every node carries the
//! 1-based position of its first token; children are exclusively owned by
//! their parent, so the tree is cycle-free by construction.

mod declaration;
mod expression;
mod statement;
mod types;

pub use declaration::*;
pub use expression::*;
pub use statement::*;
pub use types::*;
