//! AST node definitions for the Baa language
//!
//! The front-end (preprocessor, lexer, parser, semantic analysis) produces
//! this tree; IR lowering consumes it. Identifiers are Arabic UTF-8 strings
//! and flow through the compiler unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    /// Whether this operator is a comparison producing a boolean.
    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }

    /// Whether this operator short-circuits (logical and/or).
    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        };
        write!(f, "{}", s)
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Integer literal (Arabic-Indic digits are already decoded by the lexer)
    Int { value: i64, line: u32, col: u32 },
    /// String literal
    Str { value: String, line: u32, col: u32 },
    /// Character literal (stored as its code point value)
    Char { value: i64, line: u32, col: u32 },
    /// Variable reference
    VarRef { name: String, line: u32, col: u32 },
    /// Unary operation
    Unary { op: UnaryOp, operand: Box<Expr>, line: u32, col: u32 },
    /// Binary operation
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr>, line: u32, col: u32 },
    /// Function call in expression position
    Call { name: String, args: Vec<Expr>, line: u32, col: u32 },
}

impl Expr {
    pub fn line(&self) -> u32 {
        match self {
            Expr::Int { line, .. }
            | Expr::Str { line, .. }
            | Expr::Char { line, .. }
            | Expr::VarRef { line, .. }
            | Expr::Unary { line, .. }
            | Expr::Binary { line, .. }
            | Expr::Call { line, .. } => *line,
        }
    }

    pub fn col(&self) -> u32 {
        match self {
            Expr::Int { col, .. }
            | Expr::Str { col, .. }
            | Expr::Char { col, .. }
            | Expr::VarRef { col, .. }
            | Expr::Unary { col, .. }
            | Expr::Binary { col, .. }
            | Expr::Call { col, .. } => *col,
        }
    }
}

/// Statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// Brace-delimited statement list
    Block { statements: Vec<Stmt>, line: u32, col: u32 },
    /// Local variable declaration with initializer
    VarDecl { name: String, init: Expr, line: u32, col: u32 },
    /// Assignment to an existing variable
    Assign { name: String, value: Expr, line: u32, col: u32 },
    /// Function call in statement position (result discarded)
    CallStmt { name: String, args: Vec<Expr>, line: u32, col: u32 },
    /// Return with value
    Return { value: Expr, line: u32, col: u32 },
    /// The built-in print statement (اطبع)
    Print { value: Expr, line: u32, col: u32 },
    /// Conditional without else
    If { condition: Expr, then_branch: Box<Stmt>, line: u32, col: u32 },
    /// While loop
    While { condition: Expr, body: Box<Stmt>, line: u32, col: u32 },
}

/// A function parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub line: u32,
    pub col: u32,
}

/// Top-level declarations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Decl {
    /// Function definition
    FuncDef { name: String, params: Vec<Param>, body: Stmt, line: u32, col: u32 },
    /// Global variable with optional constant initializer
    GlobalVar { name: String, init: Option<Expr>, line: u32, col: u32 },
}

/// A complete program: the list of top-level declarations of one source unit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub declarations: Vec<Decl>,
    pub source_name: String,
}

impl Program {
    pub fn new(source_name: impl Into<String>) -> Self {
        Self { declarations: Vec::new(), source_name: source_name.into() }
    }
}
