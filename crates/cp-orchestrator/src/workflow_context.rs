// SPDX-License-Identifier: MIT OR Apache-2.0
//! Render the user's current workflow into the system prompt (§4.6 step 2).
//!
//! Adapted from a by-position `widgets_values` dump (the legacy graph
//! export) to a by-name lookup over [`cp_core::Node::inputs`], since this
//! system's wire format keys inputs by name rather than positional widget
//! index. The per-operator-family dispatch table is the same shape.

use cp_core::workflow::{Literal, Value as WireValue};
use cp_core::{Node, Workflow};
use cp_knowledge::ContextMode;
use std::collections::BTreeMap;

const KSAMPLER_PARAMS: &[&str] = &["seed", "steps", "cfg", "sampler_name", "scheduler", "denoise"];
const LATENT_PARAMS: &[&str] = &["width", "height", "batch_size"];
const LORA_PARAMS: &[&str] = &["lora_name", "strength_model", "strength_clip"];
const CONTROLNET_PARAMS: &[&str] = &["strength", "start_percent", "end_percent"];
const PROMPT_CHAR_CAP: usize = 200;
const GENERIC_DUMP_LIMIT: usize = 5;

/// Render the workflow section of the system prompt. `mode` of `Minimal`
/// collapses the summary to a single operator-count tally; anything else
/// expands well-known operator families into labeled parameter lines.
pub fn build_workflow_context(workflow: &Workflow, mode: Option<ContextMode>) -> String {
    if workflow.is_empty() {
        return "## CURRENT WORKFLOW\n(Empty workflow)".to_string();
    }

    if mode == Some(ContextMode::Minimal) {
        return build_minimal_tally(workflow);
    }

    build_expanded_context(workflow)
}

fn tally_by_type(workflow: &Workflow) -> BTreeMap<&str, usize> {
    let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
    for node in workflow.values() {
        *by_type.entry(node.class_type.as_str()).or_insert(0) += 1;
    }
    by_type
}

fn build_minimal_tally(workflow: &Workflow) -> String {
    let by_type = tally_by_type(workflow);
    let tally = by_type
        .iter()
        .map(|(class_type, count)| format!("{class_type}×{count}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("## CURRENT WORKFLOW\n**{} node(s)**: {tally}", workflow.len())
}

fn build_expanded_context(workflow: &Workflow) -> String {
    let mut lines = vec![
        "## CURRENT WORKFLOW (user's active workflow)".to_string(),
        "The user has shared their current workflow. Reference specific node ids and parameter names when suggesting changes.".to_string(),
        String::new(),
        format!("**Node count**: {}", workflow.len()),
        String::new(),
        "**Nodes by type**:".to_string(),
    ];

    for (class_type, count) in tally_by_type(workflow) {
        lines.push(format!("- {class_type}: {count}"));
    }

    lines.push(String::new());
    lines.push("**Node details**:".to_string());

    for (id, node) in workflow {
        let detail_lines = describe_node(node);
        if detail_lines.is_empty() {
            continue;
        }
        let title = node
            .meta
            .as_ref()
            .and_then(|m| m.title.clone())
            .unwrap_or_else(|| node.class_type.clone());
        lines.push(format!("\n[{id}] {title} ({}):", node.class_type));
        lines.extend(detail_lines);
    }

    lines.push(String::new());
    lines.push("When suggesting modifications, give exact values to change (from → to).".to_string());
    lines.join("\n")
}

/// A node's named inputs, rendered as display text — `None` for links
/// (a wired connection, not a literal widget value).
fn render_value(value: &WireValue) -> Option<String> {
    match value {
        WireValue::Link(_) => None,
        WireValue::Literal(Literal::Text(s)) => Some(s.clone()),
        WireValue::Literal(Literal::Number(n)) => Some(n.to_string()),
        WireValue::Literal(Literal::Bool(b)) => Some(b.to_string()),
    }
}

fn named_params(node: &Node, params: &[&str]) -> Vec<String> {
    params
        .iter()
        .filter_map(|name| {
            let value = node.inputs.get(*name)?;
            let rendered = render_value(value)?;
            Some(format!("  {name}: {rendered}"))
        })
        .collect()
}

fn describe_prompt(node: &Node) -> Vec<String> {
    let Some(value) = node.inputs.get("text") else {
        return Vec::new();
    };
    let Some(mut text) = render_value(value) else {
        return Vec::new();
    };
    if text.chars().count() > PROMPT_CHAR_CAP {
        text = text.chars().take(PROMPT_CHAR_CAP).collect::<String>() + "...";
    }
    vec![format!("  prompt: \"{text}\"")]
}

fn describe_vae(node: &Node) -> Vec<String> {
    if !node.class_type.contains("Tiled") {
        return Vec::new();
    }
    named_params(node, &["tile_size"])
}

fn describe_video(node: &Node) -> Vec<String> {
    if node.class_type.contains("AnimateDiff") {
        return vec![format!("  (AnimateDiff node with {} parameters)", node.inputs.len())];
    }
    node.inputs
        .iter()
        .take(GENERIC_DUMP_LIMIT)
        .filter_map(|(name, value)| render_value(value).map(|rendered| format!("  {name}: {rendered}")))
        .collect()
}

fn generic_dump(node: &Node) -> Vec<String> {
    if node.inputs.len() > GENERIC_DUMP_LIMIT {
        return Vec::new();
    }
    let rendered: Vec<String> = node
        .inputs
        .iter()
        .filter_map(|(name, value)| render_value(value).map(|v| format!("{name}: {v}")))
        .collect();
    if rendered.is_empty() {
        return Vec::new();
    }
    vec![format!("  inputs: {}", rendered.join(", "))]
}

fn describe_node(node: &Node) -> Vec<String> {
    let class_type = node.class_type.as_str();
    if class_type.contains("KSampler") {
        named_params(node, KSAMPLER_PARAMS)
    } else if class_type.contains("EmptyLatentImage") {
        named_params(node, LATENT_PARAMS)
    } else if class_type.contains("CLIPTextEncode") || class_type.contains("CLIP") {
        describe_prompt(node)
    } else if class_type.contains("VAE") {
        describe_vae(node)
    } else if class_type.contains("CheckpointLoader") {
        named_params(node, &["ckpt_name"])
    } else if class_type.contains("LoraLoader") {
        named_params(node, LORA_PARAMS)
    } else if class_type.contains("ControlNet") {
        named_params(node, CONTROLNET_PARAMS)
    } else if class_type.contains("Video") || class_type.contains("AnimateDiff") {
        describe_video(node)
    } else {
        generic_dump(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn node(class_type: &str, inputs: IndexMap<String, WireValue>) -> Node {
        Node {
            class_type: class_type.to_string(),
            inputs,
            meta: None,
        }
    }

    #[test]
    fn empty_workflow_reports_empty() {
        let workflow = Workflow::new();
        assert_eq!(build_workflow_context(&workflow, None), "## CURRENT WORKFLOW\n(Empty workflow)");
    }

    #[test]
    fn minimal_mode_is_a_one_line_tally() {
        let mut workflow = Workflow::new();
        workflow.insert("1".into(), node("KSampler", IndexMap::new()));
        workflow.insert("2".into(), node("KSampler", IndexMap::new()));
        let text = build_workflow_context(&workflow, Some(ContextMode::Minimal));
        assert!(text.contains("KSampler×2"));
        assert!(!text.contains("Nodes by type"));
    }

    #[test]
    fn ksampler_params_are_named_not_positional() {
        let mut inputs = IndexMap::new();
        inputs.insert("seed".to_string(), 42.0.into());
        inputs.insert("steps".to_string(), 20.0.into());
        let mut workflow = Workflow::new();
        workflow.insert("1".into(), node("KSampler", inputs));
        let text = build_workflow_context(&workflow, None);
        assert!(text.contains("seed: 42"));
        assert!(text.contains("steps: 20"));
    }

    #[test]
    fn long_prompt_is_truncated() {
        let mut inputs = IndexMap::new();
        inputs.insert("text".to_string(), "a".repeat(250).into());
        let mut workflow = Workflow::new();
        workflow.insert("1".into(), node("CLIPTextEncode", inputs));
        let text = build_workflow_context(&workflow, None);
        assert!(text.contains("..."));
    }

    #[test]
    fn link_values_are_skipped_not_rendered() {
        let mut inputs = IndexMap::new();
        inputs.insert("model".to_string(), ("1".to_string(), 0u64).into());
        let mut workflow = Workflow::new();
        workflow.insert("2".into(), node("KSampler", inputs));
        let text = build_workflow_context(&workflow, None);
        assert!(!text.contains("model"));
    }
}
