//! Shared utilities for the Baa compiler
//!
//! This crate provides the error type, source locations and diagnostic
//! collection used across the compiler pipeline.

pub mod diagnostics;
pub mod error;
pub mod span;

pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{BaaError, BaaResult};
pub use span::{Position, SourceLoc};
