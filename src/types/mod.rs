//! # ODL Type Vocabulary
//!
//! Shared enums, reserved constants, and the IR schema used across every
//! pipeline stage. Mirrors the original `odl.types` package: `enums`,
//! `constants`, and `ir` are kept as three small submodules here.

mod constants;
mod ir;
mod node;

pub use constants::{KEY_BRIEFING, KEY_ITERATION_BINDING, REVIEW_ARTIFACT_INFIX};
pub use ir::{IrComponent, WiringObject};
pub use node::{RawNode, RawWiring};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse behavioral classification of an [`OpCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    /// External-delegation: a worker waits on something outside the compiler.
    Action,
    /// Internal control-flow: spawns and manages children.
    Control,
    /// Internal logic: computed immediately, no external delegation.
    Logic,
}

/// The primitive ODL instruction set shared by the compiler and the
/// downstream execution kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpCode {
    // --- Atoms ---
    Worker,
    Dialogue,
    Approver,

    // --- Control structures ---
    Serial,
    Parallel,
    Loop,
    Iterate,

    // --- Logic / internal ---
    ScopeResolve,
    IteratorInit,
}

impl OpCode {
    /// Behavioral classification of this opcode.
    #[must_use]
    pub fn node_type(self) -> NodeType {
        match self {
            OpCode::Worker | OpCode::Dialogue | OpCode::Approver => NodeType::Action,
            OpCode::Serial | OpCode::Parallel | OpCode::Loop | OpCode::Iterate => {
                NodeType::Control
            }
            OpCode::ScopeResolve | OpCode::IteratorInit => NodeType::Logic,
        }
    }

    /// Parse an opcode from its lowercase wire form, if it names a
    /// primitive. Sugar opcodes (`fan_out`, `ensemble`, `generate_team`,
    /// `approval_gate`) are not primitives and return `None`.
    #[must_use]
    pub fn from_str_primitive(s: &str) -> Option<OpCode> {
        match s {
            "worker" => Some(OpCode::Worker),
            "dialogue" => Some(OpCode::Dialogue),
            "approver" => Some(OpCode::Approver),
            "serial" => Some(OpCode::Serial),
            "parallel" => Some(OpCode::Parallel),
            "loop" => Some(OpCode::Loop),
            "iterate" => Some(OpCode::Iterate),
            "scope_resolve" => Some(OpCode::ScopeResolve),
            "iterator_init" => Some(OpCode::IteratorInit),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OpCode::Worker => "worker",
            OpCode::Dialogue => "dialogue",
            OpCode::Approver => "approver",
            OpCode::Serial => "serial",
            OpCode::Parallel => "parallel",
            OpCode::Loop => "loop",
            OpCode::Iterate => "iterate",
            OpCode::ScopeResolve => "scope_resolve",
            OpCode::IteratorInit => "iterator_init",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four sugar opcodes, expanded away before resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SugarOpCode {
    FanOut,
    Ensemble,
    GenerateTeam,
    ApprovalGate,
}

impl SugarOpCode {
    #[must_use]
    pub fn from_str(s: &str) -> Option<SugarOpCode> {
        match s {
            "fan_out" => Some(SugarOpCode::FanOut),
            "ensemble" => Some(SugarOpCode::Ensemble),
            "generate_team" => Some(SugarOpCode::GenerateTeam),
            "approval_gate" => Some(SugarOpCode::ApprovalGate),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SugarOpCode::FanOut => "fan_out",
            SugarOpCode::Ensemble => "ensemble",
            SugarOpCode::GenerateTeam => "generate_team",
            SugarOpCode::ApprovalGate => "approval_gate",
        }
    }
}

/// A worker's execution mode, injected by the expander for synthesized
/// ensemble/generate_team members and defaulted for plain workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    Generate,
    Validate,
}

impl WorkerMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerMode::Generate => "generate",
            WorkerMode::Validate => "validate",
        }
    }
}
