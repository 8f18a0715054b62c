//! Owned syntax tree produced by the decompiler.
//!
//! Every node exclusively owns its children; a decompiled function is a
//! single [`FunctionDecl`] tree that can be mutated in place and dropped
//! as a unit.

pub mod expr;
pub mod ident;
pub mod stmt;
pub mod types;

pub use expr::{Expr, TableField};
pub use ident::is_identifier;
pub use stmt::{Block, FunctionDecl, IfClause, Stmt};
pub use types::{BinOp, Literal, UnOp};
