// SPDX-License-Identifier: MIT OR Apache-2.0
//! Seven-check semantic validator for candidate workflow JSON.
//!
//! Mirrors the split the teacher keeps between pure structural checking
//! (`abp-daemon::validation`) and I/O-bearing lookups: this crate takes a
//! raw `serde_json::Value` rather than an already-typed `Workflow`, because
//! the structural prechecks exist precisely to catch documents that would
//! fail to deserialize into the strict wire type.

#![deny(unsafe_code)]

use cp_core::{Severity, ValidationIssue, ValidationResult, COMBO_TYPE, UNKNOWN_TYPE};
use cp_registry::{OperatorRegistry, DEFAULT_SUGGEST_TOP_K};
use indexmap::IndexMap;
use serde_json::{Map, Value};

struct ValidNode<'a> {
    class_type: &'a str,
    inputs: &'a Map<String, Value>,
}

/// Validate `workflow` — a JSON object mapping node id to node — against
/// `registry`. If `registry` is `None`, only the structural prechecks run
/// and `validated_against_registry` is `false`.
pub fn validate(workflow: &Value, registry: Option<&OperatorRegistry>) -> ValidationResult {
    let Some(map) = workflow.as_object() else {
        return ValidationResult {
            issues: vec![issue_without_node(
                Severity::Error,
                "invalid_structure",
                "workflow is not a JSON object",
            )],
            node_count: 0,
            validated_against_registry: false,
        };
    };

    if map.is_empty() {
        return ValidationResult {
            issues: vec![issue_without_node(
                Severity::Error,
                "empty_workflow",
                "workflow has no nodes",
            )],
            node_count: 0,
            validated_against_registry: false,
        };
    }

    let node_count = map.len();
    let mut issues = Vec::new();
    let mut valid_nodes: IndexMap<&str, ValidNode> = IndexMap::new();

    for (node_id, entry) in map {
        let Some(obj) = entry.as_object() else {
            issues.push(ValidationIssue::error(
                "invalid_structure",
                node_id.clone(),
                format!("node \"{node_id}\" is not an object"),
            ));
            continue;
        };

        let class_type = obj
            .get("class_type")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());
        let Some(class_type) = class_type else {
            issues.push(ValidationIssue::error(
                "missing_class_type",
                node_id.clone(),
                format!("node \"{node_id}\" has no class_type"),
            ));
            continue;
        };

        let Some(inputs) = obj.get("inputs").and_then(Value::as_object) else {
            issues.push(ValidationIssue::error(
                "missing_inputs",
                node_id.clone(),
                format!("node \"{node_id}\" has no inputs"),
            ));
            continue;
        };

        valid_nodes.insert(node_id.as_str(), ValidNode { class_type, inputs });
    }

    let Some(registry) = registry else {
        return ValidationResult {
            issues,
            node_count,
            validated_against_registry: false,
        };
    };

    for (node_id, node) in &valid_nodes {
        if !registry.operator_exists(node.class_type) {
            let mut issue = ValidationIssue::error(
                "node_not_found",
                node_id.to_string(),
                format!("unknown operator class \"{}\"", node.class_type),
            );
            let suggestions = registry.suggest_similar(node.class_type, DEFAULT_SUGGEST_TOP_K);
            if let Some(best) = suggestions.first() {
                issue = issue.with_suggestion(format!("did you mean \"{best}\"?"));
            }
            issues.push(issue);
            continue;
        }

        let operator = registry
            .get_operator(node.class_type)
            .expect("existence just confirmed");

        for name in operator.required_inputs.keys() {
            if !node.inputs.contains_key(name) {
                issues.push(ValidationIssue::error(
                    "required_input_missing",
                    node_id.to_string(),
                    format!(
                        "node \"{node_id}\" ({}) is missing required input \"{name}\"",
                        node.class_type
                    ),
                ));
            }
        }

        for (input_name, value) in node.inputs {
            if let Some((source_id, slot)) = as_link(value) {
                let Some(source) = valid_nodes.get(source_id.as_str()) else {
                    issues.push(ValidationIssue::error(
                        "link_invalid",
                        node_id.to_string(),
                        format!(
                            "input \"{input_name}\" on node \"{node_id}\" references unknown node \"{source_id}\""
                        ),
                    ));
                    continue;
                };

                let Some(source_op) = registry.get_operator(source.class_type) else {
                    continue;
                };

                if slot as usize >= source_op.output_types.len() {
                    issues.push(ValidationIssue::error(
                        "output_slot_out_of_range",
                        node_id.to_string(),
                        format!(
                            "input \"{input_name}\" references output slot {slot} of node \"{source_id}\" ({}), which has {} output(s)",
                            source.class_type,
                            source_op.output_types.len()
                        ),
                    ));
                    continue;
                }

                let source_type = &source_op.output_types[slot as usize];
                if let Some((consumer_type, _required)) = operator.find_input(input_name).map(|(def, req)| (def.semantic_type.clone(), req)) {
                    let silent = source_type == UNKNOWN_TYPE || consumer_type == UNKNOWN_TYPE;
                    if !silent && source_type != &consumer_type {
                        issues.push(ValidationIssue::warning(
                            "type_mismatch",
                            node_id.to_string(),
                            format!(
                                "input \"{input_name}\" expects {consumer_type} but node \"{source_id}\" slot {slot} yields {source_type}"
                            ),
                        ));
                    }
                }
            } else if let Some((input_def, _required)) = operator.find_input(input_name) {
                if let Some(number) = value.as_f64() {
                    if (input_def.min_val.is_some() || input_def.max_val.is_some())
                        && !input_def.numeric_in_range(number)
                    {
                        issues.push(ValidationIssue::error(
                            "value_out_of_range",
                            node_id.to_string(),
                            format!(
                                "input \"{input_name}\" value {number} is outside the allowed range [{:?}, {:?}]",
                                input_def.min_val, input_def.max_val
                            ),
                        ));
                    }
                }

                if input_def.semantic_type == COMBO_TYPE
                    && input_def.options.is_some()
                    && !input_def.combo_contains(value)
                {
                    issues.push(ValidationIssue::warning(
                        "invalid_combo_value",
                        node_id.to_string(),
                        format!(
                            "input \"{input_name}\" value {value} is not among the known options for this operator"
                        ),
                    ));
                }
            }
        }
    }

    ValidationResult {
        issues,
        node_count,
        validated_against_registry: true,
    }
}

/// Recognize the wire encoding of a link: a two-element array of
/// `[source_node_id: string, output_slot: non-negative integer]`.
fn as_link(value: &Value) -> Option<(String, u64)> {
    let arr = value.as_array()?;
    if arr.len() != 2 {
        return None;
    }
    let source_id = arr[0].as_str()?.to_string();
    let slot = arr[1].as_u64()?;
    Some((source_id, slot))
}

fn issue_without_node(severity: Severity, check_id: &str, message: &str) -> ValidationIssue {
    ValidationIssue {
        check_id: check_id.to_string(),
        node_id: None,
        message: message.to_string(),
        suggestion: None,
        severity,
    }
}
