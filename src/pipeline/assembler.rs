//! Assembler.
//!
//! Converts a fully resolved, sugar-free [`RawNode`] tree into the typed
//! [`IrComponent`] tree a downstream execution kernel consumes: children
//! are assembled depth-first (post-order, so a malformed descendant is
//! reported before its ancestor), `contents` only if present, and every
//! `opcode` string is validated against the primitive [`OpCode`] set — a
//! sugar opcode or an unrecognized string reaching this stage is an
//! internal compiler defect, not a user error, since both the syntax
//! validator and the expander should have already ruled it out by now.
//! Grounded on `examples/original_source/src/odl/compiler/pipeline/assembler.py`.

use crate::error::{OdlCompilationError, OdlResult, Stage};
use crate::types::{IrComponent, OpCode, RawNode, WiringObject};

fn err(message: impl Into<String>) -> OdlCompilationError {
    OdlCompilationError::new(Stage::Assembler, message)
}

/// Assembles `node` and its entire subtree into a typed [`IrComponent`].
pub fn assemble(node: &RawNode) -> OdlResult<IrComponent> {
    let children = node
        .children
        .iter()
        .map(assemble)
        .collect::<OdlResult<Vec<_>>>()?;

    let contents = match &node.contents {
        Some(c) => Some(Box::new(assemble(c)?)),
        None => None,
    };

    let opcode = OpCode::from_str_primitive(&node.opcode)
        .ok_or_else(|| err(format!("unrecognized or un-expanded opcode '{}' reached assembly", node.opcode)))?;

    let stack_path = node
        .stack_path
        .clone()
        .ok_or_else(|| err("node is missing a 'stack_path' at assembly time"))?;

    let wiring = if node.wiring.inputs.is_empty() && node.wiring.output.is_none() {
        None
    } else {
        Some(WiringObject::new(node.wiring.inputs.clone(), node.wiring.output.clone()))
    };

    Ok(IrComponent {
        stack_path,
        opcode,
        wiring,
        params: node.params.clone(),
        children,
        contents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawWiring;

    #[test]
    fn assembles_a_minimal_worker() {
        let node = RawNode {
            stack_path: Some("root/serial_0/worker_0".to_string()),
            opcode: "worker".to_string(),
            wiring: RawWiring { inputs: vec![], output: Some("A#default".to_string()), extra: Default::default() },
            ..Default::default()
        };
        let ir = assemble(&node).unwrap();
        assert_eq!(ir.opcode, OpCode::Worker);
        assert_eq!(ir.wiring.unwrap().output.as_deref(), Some("A#default"));
    }

    #[test]
    fn assembles_children_post_order() {
        let child = RawNode {
            stack_path: Some("root/serial_0/worker_0".to_string()),
            opcode: "worker".to_string(),
            wiring: RawWiring { inputs: vec![], output: Some("A#default".to_string()), extra: Default::default() },
            ..Default::default()
        };
        let root = RawNode {
            stack_path: Some("root/serial_0".to_string()),
            opcode: "serial".to_string(),
            children: vec![child],
            ..Default::default()
        };
        let ir = assemble(&root).unwrap();
        assert_eq!(ir.opcode, OpCode::Serial);
        assert_eq!(ir.children.len(), 1);
        assert_eq!(ir.children[0].opcode, OpCode::Worker);
    }

    #[test]
    fn sugar_opcode_reaching_assembly_is_an_error() {
        let node = RawNode { opcode: "fan_out".to_string(), ..Default::default() };
        let result = assemble(&node);
        assert!(result.is_err());
    }

    #[test]
    fn missing_stack_path_is_an_error() {
        let node = RawNode { stack_path: None, opcode: "worker".to_string(), ..Default::default() };
        assert!(assemble(&node).is_err());
    }

    #[test]
    fn empty_wiring_becomes_none() {
        let node = RawNode {
            stack_path: Some("root/serial_0".to_string()),
            opcode: "serial".to_string(),
            ..Default::default()
        };
        let ir = assemble(&node).unwrap();
        assert!(ir.wiring.is_none());
    }
}
