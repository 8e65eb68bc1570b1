//! Wiring Validator.
//!
//! Operates on the resolved tree; fuses two global passes into one walk:
//! stack-path uniqueness, and reference visibility (forward-reference and
//! undefined-reference rejection, dynamic system-variable whitelisting).
//! Grounded on `examples/original_source/src/odl/compiler/rules/wiring.py`.

use std::collections::HashSet;

use crate::error::{OdlCompilationError, OdlResult, Stage};
use crate::ident::{construct_physical_id, is_private_local_name};
use crate::types::RawNode;

const ALLOWED_SYSTEM_VARS: [&str; 4] = ["$LOOP", "$KEY", "$PREV", "$HISTORY"];

fn err(message: impl Into<String>) -> OdlCompilationError {
    OdlCompilationError::new(Stage::WiringRule, message)
}

/// Validates the fully resolved tree rooted at `node`.
pub fn validate(node: &RawNode) -> OdlResult<()> {
    let mut seen_ids = HashSet::new();
    let visible = HashSet::new();
    validate_scope(node, &visible, &mut seen_ids)?;
    Ok(())
}

fn check_reference(reference: &str, visible: &HashSet<String>) -> OdlResult<()> {
    if reference.contains(':') {
        return Ok(());
    }
    if reference.contains('$') {
        if ALLOWED_SYSTEM_VARS.iter().any(|v| reference.contains(v)) {
            return Ok(());
        }
        return Err(err(format!(
            "Invalid system variable usage in '{reference}' (expected one of $LOOP, $KEY, $PREV, $HISTORY)"
        )));
    }
    if visible.contains(reference) {
        return Ok(());
    }
    Err(err(format!("Undefined Artifact ID referenced: '{reference}'")))
}

/// Validates `node` against the artifacts visible to it (`visible`),
/// records its `stack_path` in `seen_ids`, and returns the set of artifact
/// IDs this node (and, transitively, its subtree) makes visible to
/// whatever scope receives its `produced_outputs`.
fn validate_scope(
    node: &RawNode,
    visible: &HashSet<String>,
    seen_ids: &mut HashSet<String>,
) -> OdlResult<HashSet<String>> {
    let node_id = node.stack_path.as_deref().unwrap_or_default();
    if !node_id.is_empty() && !seen_ids.insert(node_id.to_string()) {
        return Err(err(format!("Duplicate ID found: {node_id}")));
    }

    for input in &node.wiring.inputs {
        check_reference(input, visible)?;
    }

    let mut produced_here = HashSet::new();
    if let Some(output) = &node.wiring.output {
        produced_here.insert(construct_physical_id(output, node_id));
    }
    if node.opcode == "scope_resolve" {
        if let Some(map_to) = node.param_str("map_to") {
            produced_here.insert(construct_physical_id(&map_to, node_id));
        }
    }

    match node.opcode.as_str() {
        "serial" => {
            let mut current_scope = visible.clone();
            for child in &node.children {
                let child_produced = validate_scope(child, &current_scope, seen_ids)?;
                current_scope.extend(child_produced.iter().cloned());
                produced_here.extend(child_produced);
            }
            // Private artifacts (single leading underscore) never escape the
            // serial block that produced them.
            produced_here.retain(|id| !is_private_local_name(id));
        }
        "parallel" => {
            for child in &node.children {
                let child_produced = validate_scope(child, visible, seen_ids)?;
                produced_here.extend(child_produced);
            }
        }
        _ => {
            if let Some(contents) = &node.contents {
                let child_produced = validate_scope(contents, visible, seen_ids)?;
                produced_here.extend(child_produced);
            } else if !node.children.is_empty() {
                let mut current_scope = visible.clone();
                for child in &node.children {
                    let child_produced = validate_scope(child, &current_scope, seen_ids)?;
                    current_scope.extend(child_produced.iter().cloned());
                    produced_here.extend(child_produced);
                }
            }
        }
    }

    Ok(produced_here)
}
