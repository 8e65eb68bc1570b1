//! Artifact identifier primitives.
//!
//! All path/ID string manipulation used by the expander, resolver, and
//! wiring validator goes through this module rather than ad-hoc
//! concatenation, per the identifier-grammar design note: logical name,
//! explicit suffix, and scope segment are distinct concepts that happen to
//! be encoded as substrings of one string.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::REVIEW_ARTIFACT_INFIX;

static LOOP_DEPTH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$LOOP(?:\^(\d+))?").expect("static pattern"));

/// `f"{base}/{suffix}"` if `base` is non-empty, else just `suffix`.
#[must_use]
pub fn join_path(base: &str, suffix: &str) -> String {
    if base.is_empty() {
        suffix.to_string()
    } else {
        format!("{base}/{suffix}")
    }
}

/// Appends `suffix` to `base` under whichever separator is appropriate for
/// the position `base` is already in: `/` once a `#` scope has been opened,
/// `#` to open one. A `None`/empty `suffix` leaves `base` untouched.
#[must_use]
pub fn stack_id(base: &str, suffix: Option<&str>) -> String {
    match suffix {
        None => base.to_string(),
        Some(s) if s.is_empty() => base.to_string(),
        Some(s) if base.contains('#') => format!("{base}/{s}"),
        Some(s) => format!("{base}#{s}"),
    }
}

/// The literal scope segment `"default"` carries no information once it has
/// been consumed by a nested scope — strip it (and a leading `default/`
/// prefix) so appended segments don't read `#default/v{$LOOP}` when
/// `#v{$LOOP}` is what was meant.
#[must_use]
pub fn strip_default_from_scope(scope_id: &str) -> String {
    if scope_id == "default" {
        String::new()
    } else if let Some(rest) = scope_id.strip_prefix("default/") {
        rest.to_string()
    } else {
        scope_id.to_string()
    }
}

/// Derives the physical output ID a node's declared (possibly already
/// qualified) `wiring.output` resolves to under the given scope.
#[must_use]
pub fn derive_self_output_id(output_name: &str, scope_id: &str) -> String {
    if output_name.contains('#') {
        let stripped = strip_default_from_scope(scope_id);
        stack_id(output_name, Some(&stripped))
    } else {
        format!("{output_name}#{scope_id}")
    }
}

/// Qualifies a (possibly already-explicit) logical name into a physical
/// artifact ID scoped to the node that produced it: unchanged if it already
/// carries an explicit `#` suffix, `{logical_name}#{node_id}` otherwise.
#[must_use]
pub fn construct_physical_id(logical_name: &str, node_id: &str) -> String {
    if logical_name.contains('#') {
        logical_name.to_string()
    } else if !node_id.is_empty() {
        format!("{logical_name}#{node_id}")
    } else {
        logical_name.to_string()
    }
}

/// Splits a reference on its first `#` and returns the logical-name half.
#[must_use]
pub fn extract_logical_name(name: &str) -> &str {
    match name.split_once('#') {
        Some((logical, _)) => logical,
        None => name,
    }
}

/// Builds a system feedback artifact ID: `{target}__Review_{agent}`,
/// preserving any explicit scope suffix already present on `target_doc`.
#[must_use]
pub fn create_feedback_id(target_doc: &str, agent_name: &str) -> String {
    match target_doc.split_once('#') {
        Some((local, explicit)) => {
            format!("{local}{REVIEW_ARTIFACT_INFIX}{agent_name}#{explicit}")
        }
        None => format!("{target_doc}{REVIEW_ARTIFACT_INFIX}{agent_name}"),
    }
}

/// Rewrites every `$LOOP` / `$LOOP^k` token in `scope_id` one level deeper:
/// `$LOOP` -> `$LOOP^1`, `$LOOP^k` -> `$LOOP^(k+1)`. Used both when the
/// expander descends into a nested loop and when a resolver lookup crosses
/// a loop scope boundary.
#[must_use]
pub fn shift_loop_depth(scope_id: &str) -> String {
    LOOP_DEPTH_PATTERN
        .replace_all(scope_id, |caps: &regex::Captures| {
            let depth: u32 = caps
                .get(1)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            format!("$LOOP^{}", depth + 1)
        })
        .into_owned()
}

/// Rewrites every `$LOOP^k` / bare `$LOOP` token one level shallower, the
/// inverse of [`shift_loop_depth`]: `$LOOP^1` -> `$LOOP`, `$LOOP^k` ->
/// `$LOOP^(k-1)` (dropping the exponent entirely at `k=1`). Used when a
/// resolved reference escapes outward across a loop boundary.
#[must_use]
pub fn unshift_loop_depth(scope_id: &str) -> String {
    LOOP_DEPTH_PATTERN
        .replace_all(scope_id, |caps: &regex::Captures| {
            let depth: u32 = caps
                .get(1)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            if depth <= 1 {
                "$LOOP".to_string()
            } else {
                format!("$LOOP^{}", depth - 1)
            }
        })
        .into_owned()
}

/// The deterministic per-node ID formula: `{parent_path}/{opcode}_{index}`,
/// or just `{opcode}_{index}` at the tree root (empty `parent_path`).
#[must_use]
pub fn generate_deterministic_id(parent_path: &str, physical_opcode: &str, sibling_index: usize) -> String {
    join_path(parent_path, &format!("{physical_opcode}_{sibling_index}"))
}

/// True if `name` (a bare local name or a `Name#scope` physical ID) is
/// private: its logical-name part starts with a single underscore, not the
/// reserved `__` system-generated prefix. Private artifacts are invisible
/// outside the `serial` block that produced them.
#[must_use]
pub fn is_private_local_name(name: &str) -> bool {
    let logical = extract_logical_name(name);
    logical.starts_with('_') && !logical.starts_with("__")
}

/// True if `artifact_id`'s logical name contains the review-feedback infix.
#[must_use]
pub fn is_review_artifact(artifact_id: &str) -> bool {
    extract_logical_name(artifact_id).contains(REVIEW_ARTIFACT_INFIX)
}

/// Splits a feedback artifact ID into `(target, reviewer)`, or `None` if
/// `artifact_id` does not carry the review infix.
#[must_use]
pub fn parse_review_artifact(artifact_id: &str) -> Option<(String, String)> {
    let logical = extract_logical_name(artifact_id);
    let (target, reviewer) = logical.split_once(REVIEW_ARTIFACT_INFIX)?;
    Some((target.to_string(), reviewer.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_path_handles_empty_base() {
        assert_eq!(join_path("", "serial_0"), "serial_0");
        assert_eq!(join_path("root", "serial_0"), "root/serial_0");
    }

    #[test]
    fn stack_id_picks_separator_by_position() {
        assert_eq!(stack_id("Draft", Some("default")), "Draft#default");
        assert_eq!(stack_id("Draft#default", Some("v{$LOOP}")), "Draft#default/v{$LOOP}");
        assert_eq!(stack_id("Draft#default", None), "Draft#default");
    }

    #[test]
    fn derive_self_output_id_strips_default_scope() {
        assert_eq!(derive_self_output_id("A", "default"), "A#default");
        assert_eq!(
            derive_self_output_id("A#explicit", "default"),
            "A#explicit"
        );
        assert_eq!(
            derive_self_output_id("A#explicit", "default/v{$LOOP}"),
            "A#explicit/v{$LOOP}"
        );
    }

    #[test]
    fn shift_and_unshift_loop_depth_round_trip() {
        assert_eq!(shift_loop_depth("default/v{$LOOP}"), "default/v{$LOOP^1}");
        assert_eq!(shift_loop_depth("default/v{$LOOP^1}"), "default/v{$LOOP^2}");
        assert_eq!(unshift_loop_depth("default/v{$LOOP^1}"), "default/v{$LOOP}");
        assert_eq!(unshift_loop_depth("default/v{$LOOP^2}"), "default/v{$LOOP^1}");
    }

    #[test]
    fn create_feedback_id_preserves_explicit_scope() {
        assert_eq!(create_feedback_id("Draft", "ValA"), "Draft__Review_ValA");
        assert_eq!(
            create_feedback_id("Draft#default/v{$LOOP}", "ValA"),
            "Draft__Review_ValA#default/v{$LOOP}"
        );
    }

    #[test]
    fn private_local_name_detection() {
        assert!(is_private_local_name("_Idea#default/A/1"));
        assert!(is_private_local_name("_Idea"));
        assert!(!is_private_local_name("Idea#default"));
        assert!(!is_private_local_name("Draft__Review_ValA#default"));
    }

    #[test]
    fn review_artifact_predicates() {
        assert!(is_review_artifact("Draft__Review_ValA#default"));
        assert!(!is_review_artifact("Draft#default"));
        assert_eq!(
            parse_review_artifact("Draft__Review_ValA#default"),
            Some(("Draft".to_string(), "ValA".to_string()))
        );
        assert_eq!(parse_review_artifact("Draft#default"), None);
    }
}
