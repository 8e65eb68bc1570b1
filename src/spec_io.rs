//! Round-trips an already-compiled [`IrComponent`] tree to and from the
//! same single-opcode-key dict shape ODL source itself uses, so a compiled
//! program can be saved as a readable spec file and reloaded later without
//! recompiling. Distinct from [`crate::parser::parse`]: this module moves
//! between two *typed* IR shapes (dict <-> struct), not source text.
//! Grounded on `examples/original_source/src/odl/utils.py`'s
//! `_ir_to_dict_recursive`/`_dict_to_ir_recursive`.

use serde_json::{Map, Value};

use crate::error::{OdlCompilationError, OdlResult, Stage};
use crate::types::{IrComponent, OpCode, WiringObject};

fn err(message: impl Into<String>) -> OdlCompilationError {
    OdlCompilationError::new(Stage::Unknown, message)
}

const RESERVED_KEYS: [&str; 6] = ["stack_path", "inputs", "output", "children", "contents", "description"];

/// Serializes `ir` into the spec dict shape: `{opcode: {stack_path, ...
/// flattened params, inputs?, output?, children?, contents?}}`.
#[must_use]
pub fn dump_ir_to_spec(ir: &IrComponent) -> Value {
    let mut body = Map::new();
    body.insert("stack_path".to_string(), Value::String(ir.stack_path.clone()));

    for (key, value) in &ir.params {
        body.insert(key.clone(), value.clone());
    }

    if let Some(wiring) = &ir.wiring {
        if !wiring.inputs.is_empty() {
            body.insert(
                "inputs".to_string(),
                Value::Array(wiring.inputs.iter().cloned().map(Value::String).collect()),
            );
        }
        if let Some(output) = &wiring.output {
            body.insert("output".to_string(), Value::String(output.clone()));
        }
    }

    if !ir.children.is_empty() {
        body.insert(
            "children".to_string(),
            Value::Array(ir.children.iter().map(dump_ir_to_spec).collect()),
        );
    }
    if let Some(contents) = &ir.contents {
        body.insert("contents".to_string(), dump_ir_to_spec(contents));
    }

    let mut top = Map::new();
    top.insert(ir.opcode.as_str().to_string(), Value::Object(body));
    Value::Object(top)
}

/// Deserializes `value` from the spec dict shape back into an
/// [`IrComponent`]. Every node must already carry a `stack_path` and a
/// primitive opcode — this is not a substitute for [`crate::compile`]; it
/// loads a tree that has already been through the full pipeline once.
pub fn load_ir_from_spec(value: &Value) -> OdlResult<IrComponent> {
    let obj = value
        .as_object()
        .ok_or_else(|| err("expected a single-key mapping at each IR node"))?;
    if obj.len() != 1 {
        return Err(err(format!(
            "expected exactly one opcode key per IR node, found {}",
            obj.len()
        )));
    }
    let (opcode_str, body_value) = obj.iter().next().expect("checked len == 1 above");

    let opcode = OpCode::from_str_primitive(opcode_str)
        .ok_or_else(|| err(format!("unknown opcode '{opcode_str}' in IR spec")))?;
    let body = body_value
        .as_object()
        .ok_or_else(|| err(format!("'{opcode_str}' node body must be a mapping")))?;

    let stack_path = body
        .get("stack_path")
        .and_then(Value::as_str)
        .ok_or_else(|| err(format!("'{opcode_str}' node is missing 'stack_path'")))?
        .to_string();

    let inputs = body
        .get("inputs")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect::<Vec<_>>())
        .unwrap_or_default();
    let output = body.get("output").and_then(Value::as_str).map(str::to_owned);
    let wiring = if inputs.is_empty() && output.is_none() {
        None
    } else {
        Some(WiringObject::new(inputs, output))
    };

    let children = match body.get("children").and_then(Value::as_array) {
        Some(items) => items.iter().map(load_ir_from_spec).collect::<OdlResult<Vec<_>>>()?,
        None => Vec::new(),
    };
    let contents = match body.get("contents") {
        Some(v) => Some(Box::new(load_ir_from_spec(v)?)),
        None => None,
    };

    let mut params = Map::new();
    for (key, value) in body {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        params.insert(key.clone(), value.clone());
    }

    Ok(IrComponent { stack_path, opcode, wiring, params, children, contents })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;

    #[test]
    fn round_trips_a_compiled_pipeline() {
        let source = r#"
serial:
  - worker:
      output: Draft
  - worker:
      inputs: [Draft]
      output: Final
"#;
        let ir = compile(source).unwrap();
        let dumped = dump_ir_to_spec(&ir);
        let reloaded = load_ir_from_spec(&dumped).unwrap();
        assert_eq!(ir, reloaded);
    }

    #[test]
    fn rejects_multi_key_node() {
        let value = serde_json::json!({"worker": {}, "serial": {}});
        assert!(load_ir_from_spec(&value).is_err());
    }

    #[test]
    fn rejects_unknown_opcode() {
        let value = serde_json::json!({"fan_out": {"stack_path": "root/serial_0"}});
        assert!(load_ir_from_spec(&value).is_err());
    }
}
