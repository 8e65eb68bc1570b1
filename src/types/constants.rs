//! Reserved lexical constants shared across the pipeline.

/// Infix marking a system-generated feedback artifact:
/// `{TargetDoc}__Review_{AgentName}`.
pub const REVIEW_ARTIFACT_INFIX: &str = "__Review_";

/// Reserved `params` key under which ensemble/generate_team sugar accepts
/// per-agent or global context injected into every synthesized worker.
pub const KEY_BRIEFING: &str = "briefing";

/// Reserved token referring to the current iteration key/element inside a
/// `fan_out` block.
pub const KEY_ITERATION_BINDING: &str = "__key";
