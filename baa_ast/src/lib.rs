//! Abstract syntax tree for the Baa language
//!
//! The parser and semantic analyzer hand this representation to IR lowering.

pub mod ast;

pub use ast::{BinOp, Decl, Expr, Param, Program, Stmt, UnaryOp};
