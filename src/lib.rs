//! # ODL Compiler
//!
//! Compiles Organizational Definition Language source into the typed IR a
//! downstream execution kernel runs. The compiler is a strictly linear,
//! single-threaded, pure pipeline: each stage either hands a transformed
//! tree to the next stage or fails with a [`Stage`]-labeled error, and the
//! same source always compiles to the same IR.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! ODL Source (YAML)
//!     ↓
//! [Parser]              → RawNode (normalized, dict-shaped tree)
//!     ↓
//! [Syntax Validator]    → required fields, lexical rules on names
//!     ↓
//! [Expander]            → sugar opcodes desugared, IDs + scopes stamped
//!     ↓
//! [Resolver]            → bare logical references → physical artifact IDs
//!     ↓
//! [Wiring Validator]    → reference visibility, no duplicate/forward refs
//!     ↓
//! [Assembler]           → IrComponent (typed, recursive IR tree)
//!     ↓
//! IrComponent
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `types` | Shared enums, reserved constants, and the IR schema |
//! | `error` | The single [`OdlCompilationError`] contract and its [`Stage`] tag |
//! | `ident` | Artifact-identifier grammar primitives (paths, scopes, IDs) |
//! | `parser` | ODL source (YAML) → [`types::RawNode`] |
//! | `rules` | Structural (pre-expansion) and wiring (post-resolution) validation |
//! | `pipeline` | Expansion, resolution, and assembly |
//! | `spec_io` | Round-trip IR ↔ the spec-file dict shape |
//! | `config` | Figment-based [`Config`] for ambient compiler knobs |
//!
//! ## Usage
//!
//! ```rust,ignore
//! use odl_compiler::compile;
//!
//! let ir = compile(r#"
//! serial:
//!   - worker:
//!       output: Draft
//!   - worker:
//!       inputs: [Draft]
//!       output: Final
//! "#)?;
//! ```

use std::fmt;

pub mod config;
pub mod error;
pub mod ident;
pub mod parser;
pub mod pipeline;
pub mod rules;
pub mod spec_io;
pub mod types;

pub use config::Config;
pub use error::{OdlCompilationError, OdlResult, Stage};
pub use ident::{is_review_artifact, parse_review_artifact};
pub use spec_io::{dump_ir_to_spec, load_ir_from_spec};
pub use types::IrComponent;

/// Compiles ODL `source` into its IR using the default [`Config`].
///
/// See [`compile_with_config`] to override ambient knobs such as the
/// expansion depth guard.
pub fn compile(source: &str) -> OdlResult<IrComponent> {
    compile_with_config(source, &Config::default())
}

/// Compiles ODL `source` into its IR, running every stage in order and
/// wrapping any panic-adjacent or unexpected failure as an
/// [`Stage::Unknown`]-tagged [`OdlCompilationError`] rather than letting it
/// escape untyped.
pub fn compile_with_config(source: &str, config: &Config) -> OdlResult<IrComponent> {
    if source.trim().is_empty() {
        return Err(OdlCompilationError::new(Stage::InputGuard, "ODL source must not be empty"));
    }

    // Known OdlCompilationErrors from a stage pass through unchanged; any
    // other failure (a panic from a stage's own internal logic bug) is
    // caught here and rewrapped as Stage::Unknown, the same role the
    // original's outermost `except Exception` catch-all plays around its
    // pipeline call.
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| run_pipeline(source, config)));

    match outcome {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(&payload);
            tracing::error!(stage = "unknown", %message, "compilation panicked");
            Err(OdlCompilationError::internal(PanicCause(message)))
        }
    }
}

fn run_pipeline(source: &str, config: &Config) -> OdlResult<IrComponent> {
    tracing::debug!(stage = "parser", "parsing ODL source");
    let raw = parser::parse(source)?;

    tracing::debug!(stage = "syntax", "validating structural rules");
    rules::validate_syntax(&raw)?;

    tracing::debug!(stage = "expander", max_expansion_depth = config.compiler.max_expansion_depth, "expanding sugar opcodes");
    let expanded = pipeline::expand(&raw, config.compiler.max_expansion_depth)?;

    tracing::debug!(stage = "resolver", "resolving artifact references");
    let resolved = pipeline::resolve(&expanded)?;

    tracing::debug!(stage = "wiring", "validating reference visibility");
    rules::validate_wiring(&resolved)?;

    tracing::debug!(stage = "assembler", "assembling typed IR");
    let ir = pipeline::assemble(&resolved)?;

    tracing::info!(stack_path = %ir.stack_path, "compilation succeeded");
    Ok(ir)
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Wraps a panic's string payload as a real [`std::error::Error`] so it can
/// serve as an [`OdlCompilationError`]'s `source()`.
#[derive(Debug)]
struct PanicCause(String);

impl fmt::Display for PanicCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for PanicCause {}
