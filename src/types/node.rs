//! Pre-assembly node representation: the normalized dictionary shape that
//! flows through stages 1-5 (Parse, Syntax validation, Expansion,
//! Resolution, Wiring validation) before the Assembler turns it into a
//! typed [`crate::types::IrComponent`].

use serde_json::{Map, Value};

/// I/O specification for a [`RawNode`]. `extra` preserves any non-reserved
/// keys the parser moved into the wiring bucket (e.g. a user-defined
/// `retry` hint) so they survive expansion untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawWiring {
    pub inputs: Vec<String>,
    pub output: Option<String>,
    pub extra: Map<String, Value>,
}

impl RawWiring {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.output.is_none() && self.extra.is_empty()
    }
}

/// A node in the normalized pre-assembly tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawNode {
    pub stack_path: Option<String>,
    pub opcode: String,
    pub params: Map<String, Value>,
    pub wiring: RawWiring,
    pub children: Vec<RawNode>,
    pub contents: Option<Box<RawNode>>,
    pub description: Option<String>,
}

impl RawNode {
    #[must_use]
    pub fn new(opcode: impl Into<String>) -> Self {
        RawNode {
            opcode: opcode.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn param_str(&self, key: &str) -> Option<String> {
        match self.params.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn param_i64(&self, key: &str) -> Option<i64> {
        self.params.get(key).and_then(Value::as_i64)
    }

    #[must_use]
    pub fn param_str_list(&self, key: &str) -> Option<Vec<String>> {
        match self.params.get(key) {
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect(),
            ),
            _ => None,
        }
    }

    #[must_use]
    pub fn param_map(&self, key: &str) -> Option<Map<String, Value>> {
        match self.params.get(key) {
            Some(Value::Object(m)) => Some(m.clone()),
            _ => None,
        }
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.params.insert(key.into(), value.into());
    }
}
