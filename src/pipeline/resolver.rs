//! Resolver.
//!
//! Walks the expanded tree and rewrites every bare logical-name reference
//! in `wiring.inputs` (and `iterator_init`/`scope_resolve`'s own
//! reference-shaped params) into the fully qualified physical ID of
//! whatever node actually produced it, following the scope-visibility
//! rules of spec.md #4.4: `serial` accrues its own children's outputs
//! progressively, `parallel` siblings never see each other, and
//! `loop`/`iterate` open a fresh child scope over their `contents`.
//!
//! A logical name may be bound to more than one physical ID at the same
//! scope level — e.g. every branch of a `parallel` block declaring the same
//! output name. Looking such a name up is a "Deep Collection": a single
//! bare input reference expands into one resolved entry per matching
//! producer (`tests/unit/compiler/pipeline/test_resolver.py`,
//! TC-RESOLVER-004), so `wiring.inputs` can grow longer than it started.
//!
//! By this stage every `stack_path` and declared `wiring.output` has
//! already been stamped by the expander with whatever `$LOOP`-depth
//! tokens its nesting requires (see `ident::shift_loop_depth`, applied at
//! expansion time when descending into a `loop`). The resolver itself adds
//! one more shift per `loop` scope boundary a lookup crosses to reach its
//! binding, so a reference to an outer loop's producer from inside a
//! nested loop reads `$LOOP^1` rather than the bare `$LOOP` the outer
//! loop's own contents would use (spec.md #4.4). A reference that already
//! carries `#`, `$`, or `:` is passed through untouched — it is already
//! explicit, dynamic, or external. A bare reference the resolver cannot
//! find is left as written (no error here): the wiring validator is the
//! sole place an undefined reference becomes a compilation failure.
//!
//! Grounded on `examples/original_source/src/odl/compiler/pipeline/resolver.py`
//! (body filtered from the retrieval pack; reconstructed from spec.md
//! #4.4's scope-chain description and cross-checked against the resolution
//! fixtures in `tests/unit/compiler/pipeline/test_resolver.py`,
//! TC-RESOLVER-001..006).

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use serde_json::Value;

use crate::error::OdlResult;
use crate::ident::{construct_physical_id, extract_logical_name, is_private_local_name, is_review_artifact, shift_loop_depth};
use crate::types::RawNode;

type Bindings = HashMap<String, Vec<String>>;

fn merge_bindings(dst: &mut Bindings, src: Bindings) {
    for (name, ids) in src {
        dst.entry(name).or_default().extend(ids);
    }
}

/// Recursively gathers every already-resolved `wiring.inputs` reference in
/// `node`'s subtree, in encounter order.
fn collect_consumed(node: &RawNode, out: &mut Vec<String>) {
    out.extend(node.wiring.inputs.iter().cloned());
    for child in &node.children {
        collect_consumed(child, out);
    }
    if let Some(contents) = &node.contents {
        collect_consumed(contents, out);
    }
}

/// Retroactively wires an `approver` child of a `serial` block with the
/// full context it needs to review: every externally-sourced reference
/// consumed anywhere in the block (the "context carry") and every artifact
/// this block produced strictly before the approver (the "audit trail"),
/// per spec.md #4.4. Existing inputs are preserved; duplicates skipped.
fn inject_approval_gate_context(approver: &mut RawNode, context_carry: &[String], audit_trail: &[String]) {
    let mut seen: HashSet<String> = approver.wiring.inputs.iter().cloned().collect();
    for extra in context_carry.iter().chain(audit_trail.iter()) {
        if seen.insert(extra.clone()) {
            approver.wiring.inputs.push(extra.clone());
        }
    }
}

struct ScopeFrame {
    parent: Option<Rc<ScopeFrame>>,
    bindings: Bindings,
    /// True if this frame was opened for a `loop`'s contents: any binding
    /// found by escalating past this frame to its parent refers to a
    /// producer one `$LOOP` depth shallower than the consumer, so every
    /// looked-up physical ID needs `shift_loop_depth` applied once per such
    /// crossing (spec.md #4.4: "if a parent hit crosses a loop boundary,
    /// every returned ID has its dynamic $LOOP depth shifted deeper").
    is_loop_boundary: bool,
}

impl ScopeFrame {
    fn root() -> Rc<ScopeFrame> {
        Rc::new(ScopeFrame { parent: None, bindings: Bindings::new(), is_loop_boundary: false })
    }

    fn child(parent: &Rc<ScopeFrame>, is_loop_boundary: bool) -> Rc<ScopeFrame> {
        Rc::new(ScopeFrame { parent: Some(Rc::clone(parent)), bindings: Bindings::new(), is_loop_boundary })
    }

    fn with_bindings(parent: &Rc<ScopeFrame>, bindings: Bindings) -> Rc<ScopeFrame> {
        Rc::new(ScopeFrame { parent: Some(Rc::clone(parent)), bindings, is_loop_boundary: false })
    }

    /// Looks up every physical ID bound to `name` at the nearest scope that
    /// binds it, together with how many loop boundaries were crossed to
    /// reach that scope.
    fn lookup_with_shift(&self, name: &str) -> Option<(Vec<String>, u32)> {
        if let Some(ids) = self.bindings.get(name) {
            return Some((ids.clone(), 0));
        }
        let (ids, shift) = self.parent.as_ref()?.lookup_with_shift(name)?;
        Some((ids, if self.is_loop_boundary { shift + 1 } else { shift }))
    }
}

/// Resolves `node` and its entire subtree against an empty root scope.
pub fn resolve(node: &RawNode) -> OdlResult<RawNode> {
    let root = ScopeFrame::root();
    let (resolved, _produced) = resolve_node(node, &root);
    Ok(resolved)
}

/// An external reference (`Namespace:Name`) with no explicit `@Version`
/// defaults to `@stable` (spec.md #3). `$`-bearing dynamic references never
/// reach here since the caller checks for `$` first.
fn normalize_external_reference(reference: &str) -> String {
    if reference.contains(':') && !reference.contains('@') {
        format!("{reference}@stable")
    } else {
        reference.to_string()
    }
}

/// Resolves a single reference into the physical IDs it expands to: one
/// entry for an already-explicit/dynamic/external reference or an
/// unresolvable bare name (left unchanged), or one entry per matching
/// producer for a name bound to several IDs in scope (Deep Collection).
fn resolve_reference(reference: &str, scope: &Rc<ScopeFrame>) -> Vec<String> {
    if reference.contains('$') {
        return vec![reference.to_string()];
    }
    if reference.contains(':') {
        return vec![normalize_external_reference(reference)];
    }
    if reference.contains('#') {
        return vec![reference.to_string()];
    }
    match scope.lookup_with_shift(reference) {
        Some((ids, shift)) => ids
            .into_iter()
            .map(|mut id| {
                for _ in 0..shift {
                    id = shift_loop_depth(&id);
                }
                id
            })
            .collect(),
        None => vec![reference.to_string()],
    }
}

/// Resolves a single scalar reference slot (`iterator_init.source`,
/// `scope_resolve.target`): takes the first Deep Collection match, since
/// these params hold exactly one reference rather than a list.
fn resolve_scalar(reference: &str, scope: &Rc<ScopeFrame>) -> String {
    resolve_reference(reference, scope).into_iter().next().unwrap_or_else(|| reference.to_string())
}

fn resolve_node(node: &RawNode, scope: &Rc<ScopeFrame>) -> (RawNode, Bindings) {
    let node_id = node.stack_path.clone().unwrap_or_default();
    let mut resolved = node.clone();

    resolved.wiring.inputs = node
        .wiring
        .inputs
        .iter()
        .flat_map(|input| resolve_reference(input, scope))
        .collect();

    if node.opcode == "iterator_init" {
        if let Some(source) = node.param_str("source") {
            resolved.set_param("source", Value::String(resolve_scalar(&source, scope)));
        }
    }
    if node.opcode == "scope_resolve" {
        if let Some(target) = node.param_str("target") {
            resolved.set_param("target", Value::String(resolve_scalar(&target, scope)));
        }
    }

    let mut produced: Bindings = Bindings::new();
    if let Some(output) = &node.wiring.output {
        produced
            .entry(extract_logical_name(output).to_string())
            .or_default()
            .push(construct_physical_id(output, &node_id));
    }
    if node.opcode == "scope_resolve" {
        if let Some(map_to) = node.param_str("map_to") {
            produced
                .entry(extract_logical_name(&map_to).to_string())
                .or_default()
                .push(construct_physical_id(&map_to, &node_id));
        }
    }

    match node.opcode.as_str() {
        "serial" => {
            let mut current_scope = Rc::clone(scope);
            let mut children = Vec::with_capacity(node.children.len());
            let mut child_produceds: Vec<Bindings> = Vec::with_capacity(node.children.len());
            for child in &node.children {
                let (resolved_child, child_produced) = resolve_node(child, &current_scope);
                children.push(resolved_child);
                if !child_produced.is_empty() {
                    current_scope = ScopeFrame::with_bindings(&current_scope, child_produced.clone());
                }
                child_produceds.push(child_produced.clone());
                merge_bindings(&mut produced, child_produced);
            }

            let block_produced_ids: HashSet<String> =
                produced.values().flatten().cloned().collect();
            let mut consumed_all: Vec<String> = Vec::new();
            for child in &children {
                collect_consumed(child, &mut consumed_all);
            }
            let context_carry: Vec<String> = consumed_all
                .into_iter()
                .filter(|r| {
                    !block_produced_ids.contains(r)
                        && !r.contains("$LOOP")
                        && !is_private_local_name(r)
                        && !is_review_artifact(r)
                })
                .collect();

            let mut audit_before: Vec<String> = Vec::new();
            for (i, child) in children.iter_mut().enumerate() {
                if child.opcode == "approver" {
                    inject_approval_gate_context(child, &context_carry, &audit_before);
                }
                for ids in child_produceds[i].values() {
                    for id in ids {
                        if !is_review_artifact(id) {
                            audit_before.push(id.clone());
                        }
                    }
                }
            }
            resolved.children = children;
            // Private artifacts (single leading underscore) never escape the
            // serial block that produced them (spec.md #3 invariants, #4.4).
            produced.retain(|name, _| !is_private_local_name(name));
        }
        "parallel" => {
            let mut children = Vec::with_capacity(node.children.len());
            for child in &node.children {
                let (resolved_child, child_produced) = resolve_node(child, scope);
                children.push(resolved_child);
                merge_bindings(&mut produced, child_produced);
            }
            resolved.children = children;
        }
        "loop" | "iterate" => {
            if let Some(contents) = &node.contents {
                let child_scope = ScopeFrame::child(scope, node.opcode == "loop");
                let (resolved_contents, child_produced) = resolve_node(contents, &child_scope);
                resolved.contents = Some(Box::new(resolved_contents));
                merge_bindings(&mut produced, child_produced);
            }
        }
        _ => {
            if let Some(contents) = &node.contents {
                let (resolved_contents, child_produced) = resolve_node(contents, scope);
                resolved.contents = Some(Box::new(resolved_contents));
                merge_bindings(&mut produced, child_produced);
            } else if !node.children.is_empty() {
                let mut current_scope = Rc::clone(scope);
                let mut children = Vec::with_capacity(node.children.len());
                for child in &node.children {
                    let (resolved_child, child_produced) = resolve_node(child, &current_scope);
                    children.push(resolved_child);
                    if !child_produced.is_empty() {
                        current_scope = ScopeFrame::with_bindings(&current_scope, child_produced.clone());
                    }
                    merge_bindings(&mut produced, child_produced);
                }
                resolved.children = children;
            }
        }
    }

    (resolved, produced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RawWiring;

    fn node(stack_path: &str, opcode: &str) -> RawNode {
        RawNode {
            stack_path: Some(stack_path.to_string()),
            opcode: opcode.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn sibling_reference_resolves_to_producer_physical_id() {
        let mut first = node("root/serial_0/worker_0", "worker");
        first.wiring.output = Some("A".to_string());
        let mut second = node("root/serial_0/worker_1", "worker");
        second.wiring = RawWiring { inputs: vec!["A".to_string()], output: Some("B".to_string()), extra: Default::default() };
        let root = RawNode {
            stack_path: Some("root/serial_0".to_string()),
            opcode: "serial".to_string(),
            children: vec![first, second],
            ..Default::default()
        };
        let resolved = resolve(&root).unwrap();
        assert_eq!(
            resolved.children[1].wiring.inputs,
            vec!["A#root/serial_0/worker_0".to_string()]
        );
    }

    #[test]
    fn parallel_siblings_cannot_see_each_other() {
        let mut first = node("root/parallel_0/worker_0", "worker");
        first.wiring.output = Some("A".to_string());
        let mut second = node("root/parallel_0/worker_1", "worker");
        second.wiring = RawWiring { inputs: vec!["A".to_string()], output: Some("B".to_string()), extra: Default::default() };
        let root = RawNode {
            stack_path: Some("root/parallel_0".to_string()),
            opcode: "parallel".to_string(),
            children: vec![first, second],
            ..Default::default()
        };
        let resolved = resolve(&root).unwrap();
        assert_eq!(resolved.children[1].wiring.inputs, vec!["A".to_string()]);
    }

    #[test]
    fn nested_serial_escalates_lookup_to_an_ancestor_scope() {
        let mut producer = node("root/serial_0/worker_0", "worker");
        producer.wiring.output = Some("A".to_string());
        let mut consumer = node("root/serial_0/serial_1/worker_0", "worker");
        consumer.wiring = RawWiring { inputs: vec!["A".to_string()], output: Some("B".to_string()), extra: Default::default() };
        let inner_serial = RawNode {
            stack_path: Some("root/serial_0/serial_1".to_string()),
            opcode: "serial".to_string(),
            children: vec![consumer],
            ..Default::default()
        };
        let root = RawNode {
            stack_path: Some("root/serial_0".to_string()),
            opcode: "serial".to_string(),
            children: vec![producer, inner_serial],
            ..Default::default()
        };
        let resolved = resolve(&root).unwrap();
        let inner = &resolved.children[1];
        assert_eq!(
            inner.children[0].wiring.inputs,
            vec!["A#root/serial_0/worker_0".to_string()]
        );
    }

    #[test]
    fn explicit_dynamic_and_external_references_pass_through() {
        let mut w = node("root/serial_0/worker_0", "worker");
        w.wiring.inputs = vec![
            "A#explicit/scope".to_string(),
            "$LOOP-1".to_string(),
            "github:Summarize@v2".to_string(),
        ];
        w.wiring.output = Some("Out".to_string());
        let resolved = resolve(&w).unwrap();
        assert_eq!(resolved.wiring.inputs, w.wiring.inputs);
    }

    #[test]
    fn external_reference_without_version_defaults_to_stable() {
        let mut w = node("root/serial_0/worker_0", "worker");
        w.wiring = RawWiring {
            inputs: vec!["github:Summarize".to_string()],
            output: Some("Out".to_string()),
            extra: Default::default(),
        };
        let resolved = resolve(&w).unwrap();
        assert_eq!(resolved.wiring.inputs, vec!["github:Summarize@stable".to_string()]);
    }

    #[test]
    fn reference_crossing_a_nested_loop_boundary_shifts_loop_depth_deeper() {
        let mut producer = node("root/loop_0/v{$LOOP}/serial_0/worker_0", "worker");
        producer.wiring.output = Some("A#default/v{$LOOP}".to_string());

        let mut consumer = node("root/loop_0/v{$LOOP}/serial_0/loop_1/v{$LOOP}/worker_0", "worker");
        consumer.wiring = RawWiring {
            inputs: vec!["A".to_string()],
            output: Some("Done#inner".to_string()),
            extra: Default::default(),
        };
        let inner_loop = RawNode {
            stack_path: Some("root/loop_0/v{$LOOP}/serial_0/loop_1".to_string()),
            opcode: "loop".to_string(),
            contents: Some(Box::new(consumer)),
            ..Default::default()
        };
        let inner_serial = RawNode {
            stack_path: Some("root/loop_0/v{$LOOP}/serial_0".to_string()),
            opcode: "serial".to_string(),
            children: vec![producer, inner_loop],
            ..Default::default()
        };
        let outer_loop = RawNode {
            stack_path: Some("root/loop_0".to_string()),
            opcode: "loop".to_string(),
            contents: Some(Box::new(inner_serial)),
            ..Default::default()
        };

        let resolved = resolve(&outer_loop).unwrap();
        let inner_serial = resolved.contents.as_ref().unwrap();
        let inner_loop = &inner_serial.children[1];
        let consumer = inner_loop.contents.as_ref().unwrap();
        assert_eq!(consumer.wiring.inputs, vec!["A#default/v{$LOOP^1}".to_string()]);
    }

    #[test]
    fn private_outputs_do_not_escape_their_producing_serial_block() {
        let mut private_producer = node("root/serial_0/serial_1/worker_0", "worker");
        private_producer.wiring.output = Some("_Priv".to_string());
        let inner_serial = RawNode {
            stack_path: Some("root/serial_0/serial_1".to_string()),
            opcode: "serial".to_string(),
            children: vec![private_producer],
            ..Default::default()
        };
        let mut sibling = node("root/serial_0/worker_2", "worker");
        sibling.wiring = RawWiring {
            inputs: vec!["_Priv".to_string()],
            output: Some("Done".to_string()),
            extra: Default::default(),
        };
        let root = RawNode {
            stack_path: Some("root/serial_0".to_string()),
            opcode: "serial".to_string(),
            children: vec![inner_serial, sibling],
            ..Default::default()
        };
        let resolved = resolve(&root).unwrap();
        // The private name never entered the outer scope, so the bare
        // reference is left unresolved (the wiring validator is what turns
        // this into a compile error).
        assert_eq!(resolved.children[1].wiring.inputs, vec!["_Priv".to_string()]);
    }

    #[test]
    fn deep_collection_gathers_every_parallel_producer_of_the_same_name() {
        let mut first = node("root/serial_0/parallel_0/worker_0", "worker");
        first.wiring.output = Some("Draft".to_string());
        let mut second = node("root/serial_0/parallel_0/worker_1", "worker");
        second.wiring.output = Some("Draft".to_string());
        let parallel = RawNode {
            stack_path: Some("root/serial_0/parallel_0".to_string()),
            opcode: "parallel".to_string(),
            children: vec![first, second],
            ..Default::default()
        };
        let mut consumer = node("root/serial_0/worker_2", "worker");
        consumer.wiring = RawWiring { inputs: vec!["Draft".to_string()], output: Some("Done".to_string()), extra: Default::default() };
        let root = RawNode {
            stack_path: Some("root/serial_0".to_string()),
            opcode: "serial".to_string(),
            children: vec![parallel, consumer],
            ..Default::default()
        };
        let resolved = resolve(&root).unwrap();
        let inputs = &resolved.children[1].wiring.inputs;
        assert_eq!(inputs.len(), 2);
        assert!(inputs.contains(&"Draft#root/serial_0/parallel_0/worker_0".to_string()));
        assert!(inputs.contains(&"Draft#root/serial_0/parallel_0/worker_1".to_string()));
    }

    #[test]
    fn scope_resolve_map_to_becomes_visible_to_later_siblings() {
        let loop_body = node("root/serial_0/loop_0/v{$LOOP}/worker_0", "worker");
        let mut loop_body = loop_body;
        loop_body.wiring.output = Some("Draft".to_string());
        let loop_node = RawNode {
            stack_path: Some("root/serial_0/loop_0".to_string()),
            opcode: "loop".to_string(),
            contents: Some(Box::new(loop_body)),
            ..Default::default()
        };
        let mut scope_resolve = node("root/serial_0/scope_resolve_1", "scope_resolve");
        scope_resolve.set_param("target", Value::String("Draft".to_string()));
        scope_resolve.set_param("map_to", Value::String("Draft".to_string()));
        let mut consumer = node("root/serial_0/worker_2", "worker");
        consumer.wiring = RawWiring { inputs: vec!["Draft".to_string()], output: Some("Done".to_string()), extra: Default::default() };
        let root = RawNode {
            stack_path: Some("root/serial_0".to_string()),
            opcode: "serial".to_string(),
            children: vec![loop_node, scope_resolve, consumer],
            ..Default::default()
        };
        let resolved = resolve(&root).unwrap();
        assert_eq!(
            resolved.children[2].wiring.inputs,
            vec!["Draft#root/serial_0/scope_resolve_1".to_string()]
        );
    }

    #[test]
    fn approver_receives_context_carry_and_audit_trail_from_its_block() {
        let mut base = node("root/serial_0/worker_0", "worker");
        base.wiring = RawWiring {
            inputs: vec!["Brief#external/seed".to_string()],
            output: Some("Draft".to_string()),
            extra: Default::default(),
        };
        let mut generator = node("root/serial_0/worker_1", "worker");
        generator.wiring = RawWiring {
            inputs: vec!["Draft".to_string()],
            output: Some("FinalDoc".to_string()),
            extra: Default::default(),
        };
        let mut approver = node("root/serial_0/approver_2", "approver");
        approver.wiring.output = Some("FinalDoc__Review_Boss".to_string());
        let root = RawNode {
            stack_path: Some("root/serial_0".to_string()),
            opcode: "serial".to_string(),
            children: vec![base, generator, approver],
            ..Default::default()
        };
        let resolved = resolve(&root).unwrap();
        let approver = &resolved.children[2];
        // context carry: the externally-sourced reference consumed by `base`.
        assert!(approver.wiring.inputs.contains(&"Brief#external/seed".to_string()));
        // audit trail: both earlier artifacts produced in this block.
        assert!(approver.wiring.inputs.contains(&"Draft#root/serial_0/worker_0".to_string()));
        assert!(approver.wiring.inputs.contains(&"FinalDoc#root/serial_0/worker_1".to_string()));
    }

    #[test]
    fn approver_context_carry_excludes_private_loop_and_review_artifacts() {
        let mut private_producer = node("root/serial_0/worker_0", "worker");
        private_producer.wiring = RawWiring {
            inputs: vec!["_Hidden#default".to_string(), "Doc#default/v{$LOOP-1}".to_string()],
            output: Some("_Private".to_string()),
            extra: Default::default(),
        };
        let mut reviewer = node("root/serial_0/worker_1", "worker");
        reviewer.wiring = RawWiring {
            inputs: vec!["FinalDoc__Review_Boss#default/v{$LOOP-1}".to_string()],
            output: Some("FinalDoc".to_string()),
            extra: Default::default(),
        };
        let mut approver = node("root/serial_0/approver_2", "approver");
        approver.wiring.output = Some("FinalDoc__Review_Boss".to_string());
        let root = RawNode {
            stack_path: Some("root/serial_0".to_string()),
            opcode: "serial".to_string(),
            children: vec![private_producer, reviewer, approver],
            ..Default::default()
        };
        let resolved = resolve(&root).unwrap();
        let approver = &resolved.children[2];
        assert!(!approver.wiring.inputs.iter().any(|i| i.contains("_Hidden")));
        assert!(!approver.wiring.inputs.iter().any(|i| i.contains("$LOOP")));
        assert!(!approver.wiring.inputs.iter().any(|i| i.contains("__Review_")));
    }
}
