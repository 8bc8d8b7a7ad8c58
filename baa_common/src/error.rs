//! Error handling utilities for the Baa compiler

use thiserror::Error;

/// The main error type for the Baa compiler core
#[derive(Error, Debug, Clone)]
pub enum BaaError {
    #[error("IR verification error: {message}")]
    VerifyError { message: String },

    #[error("SSA verification error: {message}")]
    SsaError { message: String },

    #[error("Optimization pass error in {pass}: {message}")]
    PassError { pass: String, message: String },

    #[error("Lowering error: {message}")]
    LoweringError { message: String },

    #[error("Code generation error: {message}")]
    CodegenError { message: String },

    #[error("Text IR error at line {line}: {message}")]
    TextError { line: usize, message: String },

    #[error("I/O error: {message}")]
    IoError { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

/// Result type alias for Baa compiler operations
pub type BaaResult<T> = Result<T, BaaError>;

impl BaaError {
    pub fn verify(message: impl Into<String>) -> Self {
        Self::VerifyError { message: message.into() }
    }

    pub fn ssa(message: impl Into<String>) -> Self {
        Self::SsaError { message: message.into() }
    }

    pub fn pass(pass: impl Into<String>, message: impl Into<String>) -> Self {
        Self::PassError { pass: pass.into(), message: message.into() }
    }

    pub fn lowering(message: impl Into<String>) -> Self {
        Self::LoweringError { message: message.into() }
    }

    pub fn codegen(message: impl Into<String>) -> Self {
        Self::CodegenError { message: message.into() }
    }

    pub fn text(line: usize, message: impl Into<String>) -> Self {
        Self::TextError { line, message: message.into() }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::IoError { message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError { message: message.into() }
    }
}

impl From<std::io::Error> for BaaError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError { message: err.to_string() }
    }
}
