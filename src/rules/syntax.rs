//! Syntax Validator.
//!
//! Purely structural checks over the raw, pre-expansion tree: ignores
//! identifier *semantics* (that's the wiring validator's job, post
//! resolution) but enforces required fields per opcode, lexical rules on
//! declared output names, and the `fan_out`/`@prev`/`@history` contextual
//! rules. A pre-order walk; the first violation is raised. Grounded on
//! `examples/original_source/src/odl/compiler/rules/syntax.py`.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{OdlCompilationError, OdlResult, Stage};
use crate::types::{KEY_ITERATION_BINDING, RawNode};

static FORBIDDEN_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[:/{}@]").expect("static pattern"));

const SERIAL_ONLY_MODIFIERS: [&str; 2] = ["@prev", "@history"];

fn err(message: impl Into<String>) -> OdlCompilationError {
    OdlCompilationError::new(Stage::SyntaxRule, message)
}

/// Validates `node` and its entire subtree, starting with no ancestors and
/// outside any parallel `fan_out`.
pub fn validate(node: &RawNode) -> OdlResult<()> {
    validate_node(node, &[], false)
}

fn validate_node(node: &RawNode, parent_opcodes: &[String], inside_parallel_fanout: bool) -> OdlResult<()> {
    if node.opcode == "fan_out" && parent_opcodes.iter().any(|o| o == "fan_out") {
        return Err(err("'fan_out' may not be nested inside another 'fan_out'"));
    }

    if inside_parallel_fanout {
        for input in &node.wiring.inputs {
            if SERIAL_ONLY_MODIFIERS.iter().any(|m| input.contains(m)) {
                return Err(err(format!(
                    "'@prev'/'@history' modifiers are only valid under 'strategy: serial' fan-out, found in input '{input}'"
                )));
            }
        }
    }

    validate_required_fields(node)?;
    validate_output_name(node)?;
    validate_iteration_bindings(node)?;

    let mut next_parents = parent_opcodes.to_vec();
    next_parents.push(node.opcode.clone());

    let strategy_is_parallel = node.opcode == "fan_out"
        && node.param_str("strategy").as_deref() == Some("parallel");
    let next_inside_parallel = inside_parallel_fanout || strategy_is_parallel;

    for child in &node.children {
        validate_node(child, &next_parents, next_inside_parallel)?;
    }
    if let Some(contents) = &node.contents {
        validate_node(contents, &next_parents, next_inside_parallel)?;
    }

    Ok(())
}

fn validate_required_fields(node: &RawNode) -> OdlResult<()> {
    match node.opcode.as_str() {
        "loop" => {
            if node.contents.is_none() {
                return Err(err("'loop' requires 'contents'"));
            }
            if let Some(count) = node.params.get("count") {
                if !matches!(count, Value::Number(n) if n.is_i64() || n.is_u64()) {
                    return Err(err("'loop.params.count' must be an integer"));
                }
            }
        }
        "fan_out" => {
            if node.param_str("source").is_none() {
                return Err(err("'fan_out' requires 'source'"));
            }
            if node.param_str("item_key").is_none() {
                return Err(err("'fan_out' requires 'item_key'"));
            }
            if node.contents.is_none() {
                return Err(err("'fan_out' requires 'contents'"));
            }
        }
        "worker" => {
            // The reference implementation also rejects a worker whose wiring
            // omits 'inputs' entirely. `RawWiring.inputs` is a plain `Vec`, so
            // an omitted key and an explicit `inputs: []` both normalize to
            // the same empty vector by the time this check runs, and that
            // distinction is deliberately not tracked here; a worker with an
            // output but no inputs is accepted.
            if node.wiring.is_empty() {
                return Err(err("'worker' requires a non-empty 'wiring' block"));
            }
            if node.wiring.output.is_none() {
                return Err(err("'worker' requires 'wiring.output'"));
            }
        }
        "ensemble" => {
            if let Some(generators) = node.param_str_list("generators") {
                let mut seen = std::collections::HashSet::new();
                for g in &generators {
                    if !seen.insert(g) {
                        return Err(err(format!("'ensemble.generators' has duplicate entry '{g}'")));
                    }
                }
            }
        }
        "iterator_init" => {
            if node.param_str("source").is_none() {
                return Err(err("'iterator_init' requires 'source'"));
            }
            if node.param_str("item_key").is_none() {
                return Err(err("'iterator_init' requires 'item_key'"));
            }
        }
        "scope_resolve" => {
            for key in ["target", "from_scope", "strategy", "map_to"] {
                if node.param_str(key).is_none() {
                    return Err(err(format!("'scope_resolve' requires '{key}'")));
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn validate_output_name(node: &RawNode) -> OdlResult<()> {
    if let Some(output) = &node.wiring.output {
        validate_name(output)?;
    }
    if node.opcode == "scope_resolve" {
        if let Some(map_to) = node.param_str("map_to") {
            validate_name(&map_to)?;
        }
    }
    Ok(())
}

fn validate_name(name: &str) -> OdlResult<()> {
    let hash_count = name.matches('#').count();
    if hash_count > 1 {
        return Err(err(format!("'{name}' has more than one '#' separator")));
    }

    let local_name = if hash_count == 1 {
        let (local, scope) = name.split_once('#').expect("hash_count == 1");
        if local.is_empty() || scope.is_empty() {
            return Err(err(format!(
                "'{name}' must have a non-empty name on both sides of '#'"
            )));
        }
        local
    } else {
        name
    };

    if local_name.contains("__") {
        return Err(err(format!(
            "'{local_name}' contains a reserved '__' substring"
        )));
    }
    if local_name.starts_with('_') {
        return Err(err(format!(
            "'{local_name}' may not start with '_' in a user-declared name"
        )));
    }
    if FORBIDDEN_CHARS.is_match(name) {
        return Err(err(format!(
            "'{name}' contains a forbidden character (one of ': / {{ }} @')"
        )));
    }
    Ok(())
}

fn validate_iteration_bindings(node: &RawNode) -> OdlResult<()> {
    let suffix = format!(".{KEY_ITERATION_BINDING}");
    for input in &node.wiring.inputs {
        if input == KEY_ITERATION_BINDING {
            return Err(err(format!(
                "bare '{KEY_ITERATION_BINDING}' is not permitted, use '<LocalName>.{KEY_ITERATION_BINDING}'"
            )));
        }
        if let Some(local_name) = input.strip_suffix(&suffix) {
            if local_name.is_empty() {
                return Err(err(format!(
                    "'{input}' has an empty LocalName before '.{KEY_ITERATION_BINDING}'"
                )));
            }
            if FORBIDDEN_CHARS.is_match(local_name) {
                return Err(err(format!(
                    "'{input}' has a LocalName containing a forbidden character"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawWiring;

    fn worker(output: &str, inputs: Vec<&str>) -> RawNode {
        RawNode {
            opcode: "worker".to_string(),
            wiring: RawWiring {
                inputs: inputs.into_iter().map(str::to_string).collect(),
                output: Some(output.to_string()),
                extra: Default::default(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn worker_requires_output() {
        let mut node = worker("Doc", vec![]);
        node.wiring.output = None;
        assert!(validate(&node).is_err());
    }

    #[test]
    fn nested_fan_out_rejected() {
        let inner = RawNode {
            opcode: "fan_out".to_string(),
            contents: Some(Box::new(worker("Doc", vec![]))),
            params: serde_json::json!({"source": "x", "item_key": "k"})
                .as_object()
                .unwrap()
                .clone(),
            ..Default::default()
        };
        let outer = RawNode {
            opcode: "fan_out".to_string(),
            contents: Some(Box::new(inner)),
            params: serde_json::json!({"source": "x", "item_key": "k"})
                .as_object()
                .unwrap()
                .clone(),
            ..Default::default()
        };
        let result = validate(&outer);
        assert!(result.is_err());
    }

    #[test]
    fn bare_key_binding_rejected() {
        let node = worker("Doc", vec!["__key"]);
        assert!(validate(&node).is_err());
    }

    #[test]
    fn qualified_key_binding_accepted() {
        let node = worker("Doc", vec!["item.__key"]);
        assert!(validate(&node).is_ok());
    }

    #[test]
    fn reserved_double_underscore_output_rejected() {
        let node = worker("Doc__Thing", vec![]);
        assert!(validate(&node).is_err());
    }

    #[test]
    fn private_output_rejected_in_user_declaration() {
        let node = worker("_Doc", vec![]);
        assert!(validate(&node).is_err());
    }
}
