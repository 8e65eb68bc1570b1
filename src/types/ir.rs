//! Post-assembly intermediate representation: the typed, recursive tree a
//! downstream execution kernel consumes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{NodeType, OpCode};

/// Input/output wiring for a node: an ordered list of input artifact
/// references and at most one output reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WiringObject {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl WiringObject {
    #[must_use]
    pub fn new(inputs: Vec<String>, output: Option<String>) -> Self {
        WiringObject { inputs, output }
    }
}

/// A single node of the compiled IR tree.
///
/// `children` and `contents` own their sub-trees exclusively: the tree is
/// strict, with no sharing and no back-edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrComponent {
    pub stack_path: String,
    pub opcode: OpCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wiring: Option<WiringObject>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<IrComponent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<Box<IrComponent>>,
}

impl IrComponent {
    /// Behavioral classification inherited from this node's opcode.
    #[must_use]
    pub fn node_type(&self) -> NodeType {
        self.opcode.node_type()
    }

    /// Depth-first iterator over this node and every descendant, in
    /// `children`-then-`contents` order.
    pub fn walk(&self) -> impl Iterator<Item = &IrComponent> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            for child in node.children.iter().rev() {
                stack.push(child);
            }
            if let Some(c) = &node.contents {
                stack.push(c);
            }
            Some(node)
        })
    }
}
