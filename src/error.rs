//! Compiler error type.
//!
//! The public contract is a single error kind carrying a [`Stage`] label and
//! a message, mirroring the original implementation's
//! `OdlCompilationError(message, stage=...)`. Every stage raises its own
//! label on the first violation; the facade wraps anything unexpected under
//! [`Stage::Unknown`] without discarding the original cause.

use std::fmt;
use thiserror::Error;

/// Which pipeline stage raised a compilation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// The empty/blank-source guard, run before the parser.
    InputGuard,
    Parser,
    SyntaxRule,
    Expander,
    Resolver,
    WiringRule,
    Assembler,
    /// An unexpected failure with no stage-specific meaning of its own.
    Unknown,
}

impl Stage {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::InputGuard => "InputGuard",
            Stage::Parser => "Parser",
            Stage::SyntaxRule => "SyntaxRule",
            Stage::Expander => "Expander",
            Stage::Resolver => "Resolver",
            Stage::WiringRule => "WiringRule",
            Stage::Assembler => "Assembler",
            Stage::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single error type returned by every compiler entry point.
#[derive(Error, Debug)]
#[error("[{stage}] {message}")]
pub struct OdlCompilationError {
    pub stage: Stage,
    pub message: String,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl OdlCompilationError {
    #[must_use]
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        OdlCompilationError {
            stage,
            message: message.into(),
            cause: None,
        }
    }

    /// Wrap an unexpected, non-domain-specific failure as `Stage::Unknown`,
    /// preserving it as the source of the returned error.
    #[must_use]
    pub fn internal(cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        OdlCompilationError {
            stage: Stage::Unknown,
            message: format!("Internal compilation error: {cause}"),
            cause: Some(Box::new(cause)),
        }
    }
}

/// Convenience alias used throughout the pipeline modules.
pub type OdlResult<T> = Result<T, OdlCompilationError>;
