//! Parser / Normalizer.
//!
//! Deserializes ODL source text (YAML, via a safe non-code-executing
//! loader) and normalizes it into a [`RawNode`] tree: every node ends up
//! with an explicit `opcode`, and every non-structural field has been moved
//! into `params` or `wiring`. Grounded on
//! `examples/original_source/src/odl/compiler/pipeline/parser.py`.

use serde_json::Map;
use serde_yaml::{Mapping, Value};

use crate::error::{OdlCompilationError, OdlResult, Stage};
use crate::types::{RawNode, RawWiring};

const STRUCTURAL_KEYS: &[&str] = &[
    "stack_path",
    "opcode",
    "children",
    "contents",
    "description",
    "params",
    "wiring",
];
const WIRING_KEYS: &[&str] = &["inputs", "output"];

fn vkey(s: &str) -> Value {
    Value::String(s.to_string())
}

fn is_structural_key(key: &Value) -> bool {
    matches!(key.as_str(), Some(s) if STRUCTURAL_KEYS.contains(&s))
}

fn is_wiring_key(key: &Value) -> bool {
    matches!(key.as_str(), Some(s) if WIRING_KEYS.contains(&s))
}

fn parser_err(message: impl Into<String>) -> OdlCompilationError {
    OdlCompilationError::new(Stage::Parser, message)
}

/// Parses and normalizes an ODL source document into its root [`RawNode`].
pub fn parse(source: &str) -> OdlResult<RawNode> {
    let raw: Value = serde_yaml::from_str(source)
        .map_err(|e| parser_err(format!("YAML syntax error: {e}")))?;

    if raw.is_null() {
        return Err(parser_err("Empty ODL source"));
    }
    if !raw.is_mapping() {
        return Err(parser_err(format!(
            "Invalid ODL structure: Root must be a mapping, got {}",
            yaml_type_name(&raw)
        )));
    }

    let normalized = normalize_recursive(raw);
    mapping_to_raw_node(normalized)
}

fn yaml_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}

/// Recursively resolves the opcode-normalization surface forms (explicit
/// opcode, single-key-with-list-body, single-key-with-dict-body,
/// single-key-with-scalar-body) and restructures flat fields into
/// `params`/`wiring`. A multi-key mapping with no `opcode` field (Case C)
/// is ambiguous and passed through unchanged.
fn normalize_recursive(value: Value) -> Value {
    match value {
        Value::Sequence(items) => {
            Value::Sequence(items.into_iter().map(normalize_recursive).collect())
        }
        Value::Mapping(map) => {
            if map.contains_key(&vkey("opcode")) {
                let mut m = map;
                finish_node(&mut m);
                return Value::Mapping(m);
            }

            if map.len() == 1 {
                let mut iter = map.into_iter();
                let (opcode_value, body) = iter.next().expect("len == 1");
                let mut m = match body {
                    Value::Sequence(items) => {
                        let mut m = Mapping::new();
                        m.insert(vkey("children"), Value::Sequence(items));
                        m
                    }
                    Value::Mapping(body_map) => body_map,
                    Value::Null => Mapping::new(),
                    other => {
                        // A bare scalar body has no field names of its own; `params`
                        // is always a mapping (spec.md #3), so the scalar becomes
                        // the sole `value` entry rather than replacing the bucket.
                        let mut m = Mapping::new();
                        let mut params_map = Mapping::new();
                        params_map.insert(vkey("value"), other);
                        m.insert(vkey("params"), Value::Mapping(params_map));
                        m
                    }
                };
                m.insert(vkey("opcode"), opcode_value);
                finish_node(&mut m);
                return Value::Mapping(m);
            }

            // Case C: multi-key, no opcode - ambiguous, left untouched.
            Value::Mapping(map)
        }
        other => other,
    }
}

fn finish_node(m: &mut Mapping) {
    if let Some(children) = m.remove(&vkey("children")) {
        m.insert(vkey("children"), normalize_recursive(children));
    }
    if let Some(contents) = m.remove(&vkey("contents")) {
        m.insert(vkey("contents"), normalize_recursive(contents));
    }
    restructure_fields(m);
}

fn restructure_fields(node: &mut Mapping) {
    let mut params = match node.remove(&vkey("params")) {
        Some(Value::Mapping(m)) => m,
        _ => Mapping::new(),
    };
    let mut wiring = match node.remove(&vkey("wiring")) {
        Some(Value::Mapping(m)) => m,
        _ => Mapping::new(),
    };

    let keys: Vec<Value> = node.keys().cloned().collect();
    for key in keys {
        if is_structural_key(&key) {
            continue;
        }
        let value = node.remove(&key).expect("key observed above");
        if is_wiring_key(&key) {
            wiring.insert(key, value);
        } else {
            params.insert(key, value);
        }
    }

    if !params.is_empty() {
        node.insert(vkey("params"), Value::Mapping(params));
    }
    if !wiring.is_empty() {
        node.insert(vkey("wiring"), Value::Mapping(wiring));
    }
}

fn mapping_to_raw_node(value: Value) -> OdlResult<RawNode> {
    let Value::Mapping(map) = value else {
        return Err(parser_err("Invalid ODL structure: node must be a mapping"));
    };

    let opcode = match map.get(&vkey("opcode")) {
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(parser_err("'opcode' must be a string")),
        None => {
            let keys: Vec<String> = map
                .keys()
                .filter_map(|k| k.as_str().map(str::to_owned))
                .collect();
            return Err(parser_err(format!(
                "Invalid ODL structure: Missing 'opcode' field. Found keys: {keys:?}"
            )));
        }
    };

    let stack_path = match map.get(&vkey("stack_path")) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };
    let description = match map.get(&vkey("description")) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    };

    let params = match map.get(&vkey("params")) {
        Some(Value::Mapping(m)) => yaml_mapping_to_json_map(m)?,
        _ => Map::new(),
    };

    let wiring = match map.get(&vkey("wiring")) {
        Some(Value::Mapping(m)) => raw_wiring_from_mapping(m)?,
        _ => RawWiring::default(),
    };

    let children = match map.get(&vkey("children")) {
        Some(Value::Sequence(items)) => items
            .iter()
            .cloned()
            .map(mapping_to_raw_node)
            .collect::<OdlResult<Vec<_>>>()?,
        Some(_) => return Err(parser_err("'children' must be a sequence")),
        None => Vec::new(),
    };

    let contents = match map.get(&vkey("contents")) {
        Some(v) => Some(Box::new(mapping_to_raw_node(v.clone())?)),
        None => None,
    };

    Ok(RawNode {
        stack_path,
        opcode,
        params,
        wiring,
        children,
        contents,
        description,
    })
}

fn raw_wiring_from_mapping(map: &Mapping) -> OdlResult<RawWiring> {
    let mut wiring = RawWiring::default();
    for (k, v) in map {
        let Some(key_str) = k.as_str() else { continue };
        match key_str {
            "inputs" => {
                let Value::Sequence(items) = v else {
                    return Err(parser_err("'wiring.inputs' must be a sequence"));
                };
                wiring.inputs = items
                    .iter()
                    .map(|i| match i {
                        Value::String(s) => Ok(s.clone()),
                        other => Err(parser_err(format!(
                            "'wiring.inputs' entries must be strings, got {}",
                            yaml_type_name(other)
                        ))),
                    })
                    .collect::<OdlResult<Vec<_>>>()?;
            }
            "output" => {
                wiring.output = match v {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    other => {
                        return Err(parser_err(format!(
                            "'wiring.output' must be a string, got {}",
                            yaml_type_name(other)
                        )))
                    }
                };
            }
            _ => {
                wiring.extra.insert(key_str.to_string(), yaml_value_to_json(v));
            }
        }
    }
    Ok(wiring)
}

fn yaml_mapping_to_json_map(map: &Mapping) -> OdlResult<Map<String, serde_json::Value>> {
    let mut out = Map::new();
    for (k, v) in map {
        let key = match k {
            Value::String(s) => s.clone(),
            other => yaml_scalar_to_string(other),
        };
        out.insert(key, yaml_value_to_json(v));
    }
    Ok(out)
}

fn yaml_scalar_to_string(value: &Value) -> String {
    match value {
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

/// Converts a parsed YAML value into the `serde_json::Value` shape used by
/// `params`/`wiring.extra`. YAML tags (the only vector for
/// code-constructing deserialization in an unsafe loader) carry no special
/// meaning here: their payload is kept, the tag name is dropped, since
/// `serde_yaml` never executes them in the first place.
fn yaml_value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_json::Value::Number(i.into())
            } else if let Some(u) = n.as_u64() {
                serde_json::Value::Number(u.into())
            } else if let Some(f) = n.as_f64() {
                serde_json::Number::from_f64(f)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null)
            } else {
                serde_json::Value::Null
            }
        }
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Sequence(items) => {
            serde_json::Value::Array(items.iter().map(yaml_value_to_json).collect())
        }
        Value::Mapping(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                let key = match k {
                    Value::String(s) => s.clone(),
                    other => yaml_scalar_to_string(other),
                };
                out.insert(key, yaml_value_to_json(v));
            }
            serde_json::Value::Object(out)
        }
        Value::Tagged(tagged) => yaml_value_to_json(&tagged.value),
    }
}
