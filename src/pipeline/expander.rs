//! Expander — the heart of the compiler.
//!
//! Desugars `fan_out`/`ensemble`/`generate_team`/`approval_gate` into
//! primitive opcodes, mints every node's deterministic `stack_path`,
//! qualifies declared outputs into their scope, and injects the
//! feedback/self-reference wiring that makes loops and approval gates
//! observable to themselves. Grounded on
//! `examples/original_source/src/odl/compiler/pipeline/expander.py`
//! (verbatim for `fan_out` and all ID/scope primitives); the
//! `ensemble`/`generate_team`/`approval_gate` bodies, filtered from that
//! source, are implemented from spec.md #4.3.4 and cross-checked against
//! `tests/unit/compiler/pipeline/test_expander.py`'s expected shapes.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::{OdlCompilationError, OdlResult, Stage};
use crate::ident::{derive_self_output_id, extract_logical_name, generate_deterministic_id, join_path, shift_loop_depth};
use crate::types::{RawNode, RawWiring, SugarOpCode, WorkerMode, KEY_ITERATION_BINDING, REVIEW_ARTIFACT_INFIX};

fn err(message: impl Into<String>) -> OdlCompilationError {
    OdlCompilationError::new(Stage::Expander, message)
}

/// Expands `node` and its entire subtree, rooted at `parent_path = "root"`
/// and `output_scope_id = "default"`. `max_depth` bounds recursion so a
/// malformed or self-referential sugar tree fails loudly rather than
/// overflowing the stack.
pub fn expand(node: &RawNode, max_depth: usize) -> OdlResult<RawNode> {
    expand_recursive(node, "root", None, 0, Some("default".to_string()), 0, max_depth)
}

#[allow(clippy::too_many_arguments)]
fn expand_recursive(
    node: &RawNode,
    parent_path: &str,
    defined_id: Option<String>,
    sibling_index: usize,
    output_scope_id: Option<String>,
    depth: usize,
    max_depth: usize,
) -> OdlResult<RawNode> {
    if depth > max_depth {
        return Err(err(format!(
            "expansion exceeded the maximum tree depth ({max_depth}); likely a runaway or self-referential structure"
        )));
    }

    let physical_opcode = if SugarOpCode::from_str(&node.opcode).is_some() {
        "serial"
    } else {
        node.opcode.as_str()
    };

    let current_id =
        defined_id.unwrap_or_else(|| generate_deterministic_id(parent_path, physical_opcode, sibling_index));
    let current_output_scope = output_scope_id.unwrap_or_else(|| current_id.clone());

    let mut working = node.clone();
    working.stack_path = Some(current_id.clone());

    match node.opcode.as_str() {
        "fan_out" => expand_fan_out(&working, &current_id, &current_output_scope, depth, max_depth),
        "ensemble" => expand_ensemble(&working, &current_id, &current_output_scope),
        "generate_team" => expand_generate_team(&working, &current_id, &current_output_scope),
        "approval_gate" => expand_approval_gate(&working, &current_id, &current_output_scope, depth, max_depth),
        _ => process_standard_node(&working, &current_id, &current_output_scope, depth, max_depth),
    }
}

fn normalize_output(node: &mut RawNode, scope_id: &str) {
    if let Some(output) = &node.wiring.output {
        node.wiring.output = Some(derive_self_output_id(output, scope_id));
    }
}

fn process_standard_node(
    node: &RawNode,
    current_id: &str,
    output_scope_id: &str,
    depth: usize,
    max_depth: usize,
) -> OdlResult<RawNode> {
    let mut result = node.clone();
    normalize_output(&mut result, output_scope_id);

    if result.opcode == "worker" && result.params.get("mode").is_none() {
        result.set_param("mode", Value::String(WorkerMode::Generate.as_str().to_string()));
    }

    let (child_scope_id, child_path_base) = match result.opcode.as_str() {
        "loop" => (
            join_path(&shift_loop_depth(output_scope_id), "v{$LOOP}"),
            join_path(current_id, "v{$LOOP}"),
        ),
        "iterate" => (output_scope_id.to_string(), join_path(current_id, "{$KEY}")),
        _ => (output_scope_id.to_string(), current_id.to_string()),
    };

    let mut children = Vec::with_capacity(result.children.len());
    for (i, child) in result.children.iter().enumerate() {
        children.push(expand_recursive(
            child,
            current_id,
            None,
            i,
            Some(output_scope_id.to_string()),
            depth + 1,
            max_depth,
        )?);
    }
    result.children = children;

    if let Some(contents) = &result.contents {
        let expanded = expand_recursive(
            contents,
            &child_path_base,
            None,
            0,
            Some(child_scope_id),
            depth + 1,
            max_depth,
        )?;
        result.contents = Some(Box::new(expanded));
    }

    Ok(result)
}

// --- fan_out --------------------------------------------------------------

fn expand_fan_out(
    sugar_node: &RawNode,
    node_id: &str,
    output_scope_id: &str,
    depth: usize,
    max_depth: usize,
) -> OdlResult<RawNode> {
    let source = sugar_node
        .param_str("source")
        .ok_or_else(|| err("'fan_out' requires 'source'"))?;
    let item_key = sugar_node
        .param_str("item_key")
        .ok_or_else(|| err("'fan_out' requires 'item_key'"))?;
    let strategy = sugar_node.param_str("strategy").unwrap_or_else(|| "serial".to_string());
    let mut inner_contents = *sugar_node
        .contents
        .clone()
        .ok_or_else(|| err("'fan_out' requires 'contents'"))?;

    replace_variable_placeholders(&mut inner_contents, KEY_ITERATION_BINDING, "{$KEY}");
    if strategy == "serial" {
        replace_serial_modifiers(&mut inner_contents);
    }

    let mut iterator_init_source = Map::new();
    iterator_init_source.insert("source".to_string(), Value::String(source));
    iterator_init_source.insert("item_key".to_string(), Value::String(item_key));
    let iterator_init_raw = RawNode {
        opcode: "iterator_init".to_string(),
        params: iterator_init_source,
        ..Default::default()
    };
    let iterator_init = expand_recursive(
        &iterator_init_raw,
        node_id,
        None,
        0,
        Some(output_scope_id.to_string()),
        depth + 1,
        max_depth,
    )?;

    let iter_id = generate_deterministic_id(node_id, "iterate", 1);
    let iter_content_base = join_path(&iter_id, "{$KEY}");
    let inner_scope_id = join_path(output_scope_id, "{$KEY}");
    let expanded_contents = expand_recursive(
        &inner_contents,
        &iter_content_base,
        None,
        0,
        Some(inner_scope_id),
        depth + 1,
        max_depth,
    )?;

    let mut iterate_params = Map::new();
    iterate_params.insert("strategy".to_string(), Value::String(strategy));
    let iterate_node = RawNode {
        stack_path: Some(iter_id),
        opcode: "iterate".to_string(),
        params: iterate_params,
        contents: Some(Box::new(expanded_contents)),
        ..Default::default()
    };

    Ok(RawNode {
        stack_path: Some(node_id.to_string()),
        opcode: "serial".to_string(),
        params: sugar_node.params.clone(),
        wiring: sugar_node.wiring.clone(),
        description: sugar_node.description.clone(),
        children: vec![iterator_init, iterate_node],
        contents: None,
    })
}

/// Matches `<LocalName>.__key` (capturing `LocalName`) or bare `__key`.
fn item_binding_match(input: &str) -> Option<Option<&str>> {
    let suffix = format!(".{KEY_ITERATION_BINDING}");
    if let Some(local) = input.strip_suffix(&suffix) {
        Some(Some(local))
    } else if input == KEY_ITERATION_BINDING {
        Some(None)
    } else {
        None
    }
}

fn replace_variable_placeholders(node: &mut RawNode, target: &str, replacement: &str) {
    if target == KEY_ITERATION_BINDING {
        replace_item_binding_recursive(node, replacement);
    } else {
        replace_generic_recursive(node, target, replacement);
    }
}

fn replace_item_binding_recursive(node: &mut RawNode, replacement: &str) {
    for input in &mut node.wiring.inputs {
        if let Some(local) = item_binding_match(input) {
            *input = match local {
                Some(local_name) => format!("{local_name}.{replacement}"),
                None => replacement.to_string(),
            };
        }
    }
    for child in &mut node.children {
        replace_item_binding_recursive(child, replacement);
    }
    if let Some(contents) = &mut node.contents {
        replace_item_binding_recursive(contents, replacement);
    }
}

fn replace_generic_recursive(node: &mut RawNode, target: &str, replacement: &str) {
    for input in &mut node.wiring.inputs {
        if input.contains(target) {
            *input = input.replace(target, replacement);
        }
    }
    for child in &mut node.children {
        replace_generic_recursive(child, target, replacement);
    }
    if let Some(contents) = &mut node.contents {
        replace_generic_recursive(contents, target, replacement);
    }
}

fn replace_serial_modifiers(node: &mut RawNode) {
    for input in &mut node.wiring.inputs {
        if input.ends_with("@prev") {
            *input = input.replace("@prev", "#{$PREV}");
        } else if input.ends_with("@history") {
            *input = input.replace("@history", "#{$HISTORY}");
        }
    }
    for child in &mut node.children {
        replace_serial_modifiers(child);
    }
    if let Some(contents) = &mut node.contents {
        replace_serial_modifiers(contents);
    }
}

// --- briefing merge ---------------------------------------------------------

/// Splits a flat `briefing` mapping into global parameters (any key that
/// isn't one of `agent_names`) and per-agent override mappings (a key that
/// matches an agent name, whose value must itself be a mapping).
fn split_briefing(briefing: &Map<String, Value>, agent_names: &[String]) -> (Map<String, Value>, HashMap<String, Map<String, Value>>) {
    let mut global = Map::new();
    let mut per_agent = HashMap::new();
    for (k, v) in briefing {
        if agent_names.iter().any(|a| a == k) {
            if let Value::Object(m) = v {
                per_agent.insert(k.clone(), m.clone());
            }
        } else {
            global.insert(k.clone(), v.clone());
        }
    }
    (global, per_agent)
}

/// `global ∪ agent_specific ∪ system`, later terms winning. System
/// parameters (`agent`, `mode`) always win: this is the security invariant
/// that keeps a user briefing from hijacking a synthesized worker's
/// identity or role.
fn synthesize_worker_params(
    global: &Map<String, Value>,
    per_agent: &HashMap<String, Map<String, Value>>,
    agent: &str,
    mode: WorkerMode,
) -> Map<String, Value> {
    let mut params = global.clone();
    if let Some(specific) = per_agent.get(agent) {
        for (k, v) in specific {
            params.insert(k.clone(), v.clone());
        }
    }
    params.insert("agent".to_string(), Value::String(agent.to_string()));
    params.insert("mode".to_string(), Value::String(mode.as_str().to_string()));
    params
}

fn count_break_params(count: i64) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert("count".to_string(), Value::Number(count.into()));
    m.insert("break_on".to_string(), Value::String("success".to_string()));
    m
}

fn scope_resolve_for(target: &str, output_scope_id: &str, node_id: String) -> RawNode {
    let mut params = Map::new();
    params.insert("target".to_string(), Value::String(target.to_string()));
    params.insert("from_scope".to_string(), Value::String("loop".to_string()));
    params.insert("strategy".to_string(), Value::String("take_latest_success".to_string()));
    params.insert("map_to".to_string(), Value::String(derive_self_output_id(target, output_scope_id)));
    RawNode {
        stack_path: Some(node_id),
        opcode: "scope_resolve".to_string(),
        params,
        ..Default::default()
    }
}

// --- ensemble ---------------------------------------------------------------

fn expand_ensemble(node: &RawNode, node_id: &str, output_scope_id: &str) -> OdlResult<RawNode> {
    let generators = node
        .param_str_list("generators")
        .ok_or_else(|| err("'ensemble' requires 'generators'"))?;
    let samples = node.param_i64("samples").unwrap_or(1).max(1);
    let consolidator = node
        .param_str("consolidator")
        .ok_or_else(|| err("'ensemble' requires 'consolidator'"))?;
    let output = node
        .wiring
        .output
        .clone()
        .ok_or_else(|| err("'ensemble' requires 'output'"))?;
    let user_inputs = node.wiring.inputs.clone();
    let briefing = node.param_map("briefing").unwrap_or_default();

    let mut agent_names = generators.clone();
    agent_names.push(consolidator.clone());
    let (global_briefing, per_agent_briefing) = split_briefing(&briefing, &agent_names);

    let parallel_id = generate_deterministic_id(node_id, "parallel", 0);
    let mut parallel_children = Vec::new();
    let mut diverged_outputs = Vec::new();
    let mut child_index = 0usize;

    for agent in &generators {
        for sample in 1..=samples {
            let worker_id = generate_deterministic_id(&parallel_id, "worker", child_index);
            let private_output = format!("_{output}#{output_scope_id}/{agent}/{sample}");
            let mut inputs = user_inputs.clone();
            rewrite_ensemble_self_reference(&mut inputs, &output, output_scope_id, &private_output);
            let params = synthesize_worker_params(&global_briefing, &per_agent_briefing, agent, WorkerMode::Generate);
            parallel_children.push(RawNode {
                stack_path: Some(worker_id),
                opcode: "worker".to_string(),
                params,
                wiring: RawWiring {
                    inputs,
                    output: Some(private_output.clone()),
                    extra: Map::new(),
                },
                ..Default::default()
            });
            diverged_outputs.push(private_output);
            child_index += 1;
        }
    }

    let parallel_node = RawNode {
        stack_path: Some(parallel_id),
        opcode: "parallel".to_string(),
        children: parallel_children,
        ..Default::default()
    };

    let mut consolidator_inputs = user_inputs;
    consolidator_inputs.extend(diverged_outputs);
    let consolidator_params = synthesize_worker_params(&global_briefing, &per_agent_briefing, &consolidator, WorkerMode::Generate);
    let consolidator_id = generate_deterministic_id(node_id, "worker", 1);
    let consolidator_node = RawNode {
        stack_path: Some(consolidator_id),
        opcode: "worker".to_string(),
        params: consolidator_params,
        wiring: RawWiring {
            inputs: consolidator_inputs,
            output: Some(derive_self_output_id(&output, output_scope_id)),
            extra: Map::new(),
        },
        ..Default::default()
    };

    Ok(RawNode {
        stack_path: Some(node_id.to_string()),
        opcode: "serial".to_string(),
        description: node.description.clone(),
        children: vec![parallel_node, consolidator_node],
        ..Default::default()
    })
}

/// A generator referencing its own previous-loop output (e.g. `Name#scope/
/// v{$LOOP-1}` from an ensemble nested in a loop) is rewritten to point at
/// that specific generator's own diverged output from the prior iteration,
/// so each generator sees its own history rather than a sibling's.
fn rewrite_ensemble_self_reference(inputs: &mut [String], output: &str, output_scope_id: &str, private_output: &str) {
    let self_ref = derive_self_output_id(output, &format!("{output_scope_id}/v{{$LOOP-1}}"));
    for input in inputs.iter_mut() {
        if *input == self_ref {
            *input = format!("{private_output}/v{{$LOOP-1}}");
        }
    }
}

// --- generate_team ------------------------------------------------------------

fn expand_generate_team(node: &RawNode, node_id: &str, output_scope_id: &str) -> OdlResult<RawNode> {
    let generator = node
        .param_str("generator")
        .ok_or_else(|| err("'generate_team' requires 'generator'"))?;
    let validators = node.param_str_list("validators").unwrap_or_default();
    let loop_count = node.param_i64("loop").unwrap_or(1).max(1);
    let name = node
        .wiring
        .output
        .clone()
        .ok_or_else(|| err("'generate_team' requires 'output'"))?;
    let user_inputs = node.wiring.inputs.clone();
    let briefing = node.param_map("briefing").unwrap_or_default();
    let extra_inputs = node.param_str_list("_generator_extra_inputs").unwrap_or_default();

    let mut agent_names = vec![generator.clone()];
    agent_names.extend(validators.clone());
    let (global_briefing, per_agent_briefing) = split_briefing(&briefing, &agent_names);

    let loop_id = generate_deterministic_id(node_id, "loop", 0);
    let loop_contents_scope = join_path(&shift_loop_depth(output_scope_id), "v{$LOOP}");
    let loop_path_base = join_path(&loop_id, "v{$LOOP}");
    let inner_serial_id = generate_deterministic_id(&loop_path_base, "serial", 0);

    let mut generator_inputs: Vec<String> = user_inputs.iter().map(|i| shift_loop_depth(i)).collect();
    generator_inputs.extend(extra_inputs);
    generator_inputs.push(derive_self_output_id(&name, &format!("{output_scope_id}/v{{$LOOP-1}}")));
    for validator in &validators {
        generator_inputs.push(format!("{name}{REVIEW_ARTIFACT_INFIX}{validator}#{output_scope_id}/v{{$LOOP-1}}"));
    }

    let generator_params = synthesize_worker_params(&global_briefing, &per_agent_briefing, &generator, WorkerMode::Generate);
    let generator_id = generate_deterministic_id(&inner_serial_id, "worker", 0);
    let generator_node = RawNode {
        stack_path: Some(generator_id),
        opcode: "worker".to_string(),
        params: generator_params,
        wiring: RawWiring {
            inputs: generator_inputs,
            output: Some(derive_self_output_id(&name, &loop_contents_scope)),
            extra: Map::new(),
        },
        ..Default::default()
    };

    let validators_parallel_id = generate_deterministic_id(&inner_serial_id, "parallel", 1);
    let mut validator_children = Vec::new();
    for (idx, validator) in validators.iter().enumerate() {
        let validator_id = generate_deterministic_id(&validators_parallel_id, "worker", idx);
        let validator_params = synthesize_worker_params(&global_briefing, &per_agent_briefing, validator, WorkerMode::Validate);
        let validator_output = format!("{name}{REVIEW_ARTIFACT_INFIX}{validator}#{loop_contents_scope}");
        validator_children.push(RawNode {
            stack_path: Some(validator_id),
            opcode: "worker".to_string(),
            params: validator_params,
            wiring: RawWiring {
                inputs: vec![derive_self_output_id(&name, &loop_contents_scope)],
                output: Some(validator_output),
                extra: Map::new(),
            },
            ..Default::default()
        });
    }
    let validators_parallel = RawNode {
        stack_path: Some(validators_parallel_id),
        opcode: "parallel".to_string(),
        children: validator_children,
        ..Default::default()
    };

    let inner_serial = RawNode {
        stack_path: Some(inner_serial_id),
        opcode: "serial".to_string(),
        children: vec![generator_node, validators_parallel],
        ..Default::default()
    };

    let loop_node = RawNode {
        stack_path: Some(loop_id),
        opcode: "loop".to_string(),
        params: count_break_params(loop_count),
        contents: Some(Box::new(inner_serial)),
        ..Default::default()
    };

    let scope_resolve_id = generate_deterministic_id(node_id, "scope_resolve", 1);
    let scope_resolve_node = scope_resolve_for(&name, output_scope_id, scope_resolve_id);

    Ok(RawNode {
        stack_path: Some(node_id.to_string()),
        opcode: "serial".to_string(),
        description: node.description.clone(),
        children: vec![loop_node, scope_resolve_node],
        ..Default::default()
    })
}

// --- approval_gate --------------------------------------------------------------

fn expand_approval_gate(
    node: &RawNode,
    node_id: &str,
    output_scope_id: &str,
    depth: usize,
    max_depth: usize,
) -> OdlResult<RawNode> {
    let approver = node
        .param_str("approver")
        .ok_or_else(|| err("'approval_gate' requires 'approver'"))?;
    let target = node
        .param_str("target")
        .ok_or_else(|| err("'approval_gate' requires 'target'"))?;
    let mut inner_contents = *node
        .contents
        .clone()
        .ok_or_else(|| err("'approval_gate' requires 'contents'"))?;

    const APPROVAL_GATE_LOOP_COUNT: i64 = 10;

    let loop_id = generate_deterministic_id(node_id, "loop", 0);
    let loop_contents_scope = join_path(&shift_loop_depth(output_scope_id), "v{$LOOP}");
    let loop_path_base = join_path(&loop_id, "v{$LOOP}");
    let inner_serial_id = generate_deterministic_id(&loop_path_base, "serial", 0);

    let prev_feedback = format!("{target}{REVIEW_ARTIFACT_INFIX}{approver}#{output_scope_id}/v{{$LOOP-1}}");
    let prev_target_self = derive_self_output_id(&target, &format!("{output_scope_id}/v{{$LOOP-1}}"));

    inject_approval_feedback(&mut inner_contents, &target, &prev_feedback, &prev_target_self);

    let expanded_inner = expand_recursive(
        &inner_contents,
        &inner_serial_id,
        None,
        0,
        Some(loop_contents_scope.clone()),
        depth + 1,
        max_depth,
    )?;

    let approver_id = generate_deterministic_id(&inner_serial_id, "approver", 1);
    let mut approver_params = Map::new();
    approver_params.insert("agent".to_string(), Value::String(approver.clone()));
    let approver_node = RawNode {
        stack_path: Some(approver_id),
        opcode: "approver".to_string(),
        params: approver_params,
        wiring: RawWiring {
            inputs: vec![
                derive_self_output_id(&target, &loop_contents_scope),
                prev_target_self,
                prev_feedback,
            ],
            // The approver produces its own review comment for this
            // iteration, not a copy of the target's output — next
            // iteration's `prev_feedback` looks this exact ID up a $LOOP
            // depth shallower.
            output: Some(format!("{target}{REVIEW_ARTIFACT_INFIX}{approver}#{loop_contents_scope}")),
            extra: Map::new(),
        },
        ..Default::default()
    };

    let inner_serial = RawNode {
        stack_path: Some(inner_serial_id),
        opcode: "serial".to_string(),
        children: vec![expanded_inner, approver_node],
        ..Default::default()
    };

    let loop_node = RawNode {
        stack_path: Some(loop_id),
        opcode: "loop".to_string(),
        params: count_break_params(APPROVAL_GATE_LOOP_COUNT),
        contents: Some(Box::new(inner_serial)),
        ..Default::default()
    };

    let scope_resolve_id = generate_deterministic_id(node_id, "scope_resolve", 1);
    let scope_resolve_node = scope_resolve_for(&target, output_scope_id, scope_resolve_id);

    Ok(RawNode {
        stack_path: Some(node_id.to_string()),
        opcode: "serial".to_string(),
        description: node.description.clone(),
        children: vec![loop_node, scope_resolve_node],
        ..Default::default()
    })
}

/// Injects the approver's previous feedback (and, for plain worker/ensemble
/// generators, a self-reference) into every leaf generator in `node` whose
/// declared output's logical name matches `target`. `generate_team`
/// generators receive the self-reference as a private
/// `_generator_extra_inputs` side-channel instead, so it doesn't pollute
/// the team's public input contract until the team itself expands.
fn inject_approval_feedback(node: &mut RawNode, target: &str, prev_feedback: &str, prev_target_self: &str) {
    let produces_target = node
        .wiring
        .output
        .as_deref()
        .map(|o| extract_logical_name(o) == target)
        .unwrap_or(false);

    if produces_target && matches!(node.opcode.as_str(), "worker" | "ensemble" | "generate_team") {
        node.wiring.inputs.push(prev_feedback.to_string());
        if node.opcode == "generate_team" {
            let mut extra = node.param_str_list("_generator_extra_inputs").unwrap_or_default();
            extra.push(prev_target_self.to_string());
            node.set_param(
                "_generator_extra_inputs",
                Value::Array(extra.into_iter().map(Value::String).collect()),
            );
        } else {
            node.wiring.inputs.push(prev_target_self.to_string());
        }
    }

    for child in &mut node.children {
        inject_approval_feedback(child, target, prev_feedback, prev_target_self);
    }
    if let Some(contents) = &mut node.contents {
        inject_approval_feedback(contents, target, prev_feedback, prev_target_self);
    }
}


trait Walk {
    fn walk(&self) -> Vec<&RawNode>;
}

impl Walk for RawNode {
    fn walk(&self) -> Vec<&RawNode> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.walk());
        }
        if let Some(contents) = &self.contents {
            out.extend(contents.walk());
        }
        out
    }
}
