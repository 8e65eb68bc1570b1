//! Whole-tree invariant checks: structural (pre-expansion) and wiring
//! (post-resolution) validation.

mod syntax;
mod wiring;

pub use syntax::validate as validate_syntax;
pub use wiring::validate as validate_wiring;
