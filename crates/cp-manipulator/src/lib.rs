// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structural editing primitives over a candidate workflow, plus recovery
//! of a workflow embedded in a model's free-form text response.
//!
//! Operates on raw `serde_json::Value` nodes rather than [`cp_core::Node`]:
//! a manipulator must be able to hold a malformed node (missing
//! `class_type`, missing `inputs`) so its own `validate()` can report on
//! it, the same way the source system's plain-dict editor could.

#![deny(unsafe_code)]

use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use thiserror::Error;

/// A workflow under construction: node id → raw node value.
pub type RawWorkflow = IndexMap<String, Value>;

/// Errors surfaced by [`Manipulator::from_json`].
#[derive(Debug, Error)]
pub enum ManipulatorError {
    /// The text was not valid JSON.
    #[error("invalid workflow JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// The JSON parsed but its top level was not an object.
    #[error("workflow JSON must be an object mapping node id to node")]
    NotAnObject,
}

/// Structural editor over a workflow, with node-id assignment and a cheap
/// pre-registry `validate()`.
#[derive(Debug, Clone, Default)]
pub struct Manipulator {
    workflow: RawWorkflow,
    next_node_id: u64,
}

impl Manipulator {
    /// An empty manipulator; the next `add_node` assigns id `"1"`.
    pub fn new() -> Self {
        Self {
            workflow: RawWorkflow::new(),
            next_node_id: 1,
        }
    }

    /// Wrap an existing workflow. The argument is copied; later mutation of
    /// the caller's value does not affect this manipulator.
    pub fn from_workflow(workflow: RawWorkflow) -> Self {
        let next_node_id = next_id_after(&workflow);
        Self {
            workflow,
            next_node_id,
        }
    }

    /// The current workflow.
    pub fn workflow(&self) -> &RawWorkflow {
        &self.workflow
    }

    /// Insert a new node with a freshly assigned id (`max(existing numeric
    /// ids, 0) + 1`), returning that id. `title` defaults to `class_type`.
    pub fn add_node(
        &mut self,
        class_type: impl Into<String>,
        inputs: Map<String, Value>,
        title: Option<String>,
    ) -> String {
        let class_type = class_type.into();
        let id = self.next_node_id.to_string();
        self.next_node_id += 1;

        let mut node = Map::new();
        node.insert("class_type".to_string(), Value::String(class_type.clone()));
        node.insert("inputs".to_string(), Value::Object(inputs));
        let mut meta = Map::new();
        meta.insert(
            "title".to_string(),
            Value::String(title.unwrap_or(class_type)),
        );
        node.insert("meta".to_string(), Value::Object(meta));

        self.workflow.insert(id.clone(), Value::Object(node));
        id
    }

    /// Remove a node, scrubbing every surviving node's inputs of links that
    /// pointed at it. Returns `false` if `id` was not present.
    pub fn remove_node(&mut self, id: &str) -> bool {
        if self.workflow.shift_remove(id).is_none() {
            return false;
        }
        for node in self.workflow.values_mut() {
            let Some(inputs) = node.get_mut("inputs").and_then(Value::as_object_mut) else {
                continue;
            };
            inputs.retain(|_, value| link_source(value) != Some(id));
        }
        true
    }

    /// Wire `dst_id`'s `input_name` to `[src_id, slot]`. Returns `false` if
    /// `dst_id` is not present (the source is not checked — a dangling link
    /// is a validator concern, not a construction-time one).
    pub fn connect(&mut self, src_id: &str, slot: u64, dst_id: &str, input_name: &str) -> bool {
        let Some(node) = self.workflow.get_mut(dst_id) else {
            return false;
        };
        let inputs = node
            .as_object_mut()
            .and_then(|obj| obj.entry("inputs").or_insert_with(|| Value::Object(Map::new())).as_object_mut());
        let Some(inputs) = inputs else { return false };
        inputs.insert(
            input_name.to_string(),
            Value::Array(vec![Value::String(src_id.to_string()), Value::from(slot)]),
        );
        true
    }

    /// Overwrite one input on an existing node. Returns `false` if the node
    /// is not present.
    pub fn modify_input(&mut self, id: &str, name: &str, value: Value) -> bool {
        let Some(node) = self.workflow.get_mut(id) else {
            return false;
        };
        let inputs = node
            .as_object_mut()
            .and_then(|obj| obj.entry("inputs").or_insert_with(|| Value::Object(Map::new())).as_object_mut());
        let Some(inputs) = inputs else { return false };
        inputs.insert(name.to_string(), value);
        true
    }

    /// Ids of every node whose `class_type` equals `class_type`.
    pub fn get_nodes_by_type(&self, class_type: &str) -> Vec<String> {
        self.workflow
            .iter()
            .filter(|(_, node)| node.get("class_type").and_then(Value::as_str) == Some(class_type))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// One node by id.
    pub fn get_node(&self, id: &str) -> Option<&Value> {
        self.workflow.get(id)
    }

    /// Serialize the workflow, preserving node and input insertion order.
    pub fn to_json(&self) -> String {
        let obj: Map<String, Value> = self
            .workflow
            .iter()
            .map(|(id, node)| (id.clone(), node.clone()))
            .collect();
        serde_json::to_string(&Value::Object(obj)).expect("workflow values are always serializable")
    }

    /// Replace the workflow with the one encoded in `text`.
    pub fn from_json(&mut self, text: &str) -> Result<(), ManipulatorError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(obj) = value else {
            return Err(ManipulatorError::NotAnObject);
        };
        let workflow: RawWorkflow = obj.into_iter().collect();
        self.next_node_id = next_id_after(&workflow);
        self.workflow = workflow;
        Ok(())
    }

    /// Cheap structural gate used before invoking the registry-aware
    /// validator: every node has `class_type` and `inputs`, and every
    /// link's source id is a key of this workflow. Returns `(valid,
    /// human-readable messages)`.
    pub fn validate(&self) -> (bool, Vec<String>) {
        let mut messages = Vec::new();

        for (id, node) in &self.workflow {
            let Some(obj) = node.as_object() else {
                messages.push(format!("node \"{id}\" is not an object"));
                continue;
            };

            let has_class_type = obj
                .get("class_type")
                .and_then(Value::as_str)
                .is_some_and(|s| !s.is_empty());
            if !has_class_type {
                messages.push(format!("node \"{id}\" is missing class_type"));
            }

            let Some(inputs) = obj.get("inputs") else {
                messages.push(format!("node \"{id}\" is missing inputs"));
                continue;
            };
            let Some(inputs) = inputs.as_object() else {
                messages.push(format!("node \"{id}\" inputs is not an object"));
                continue;
            };

            for (name, value) in inputs {
                if let Some(source_id) = link_source(value) {
                    if !self.workflow.contains_key(source_id) {
                        messages.push(format!(
                            "node \"{id}\" input \"{name}\" references unknown node \"{source_id}\""
                        ));
                    }
                }
            }
        }

        (messages.is_empty(), messages)
    }
}

fn next_id_after(workflow: &RawWorkflow) -> u64 {
    workflow
        .keys()
        .filter_map(|id| id.parse::<u64>().ok())
        .max()
        .map_or(1, |max| max + 1)
}

/// If `value` is the two-element `[source_id, slot]` link encoding, return
/// `source_id`.
fn link_source(value: &Value) -> Option<&str> {
    let arr = value.as_array()?;
    if arr.len() != 2 {
        return None;
    }
    arr[0].as_str()
}

fn fenced_code_blocks(text: &str) -> Vec<(String, String)> {
    static FENCE: OnceLock<regex::Regex> = OnceLock::new();
    let re = FENCE.get_or_init(|| {
        regex::Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[ \t]*\r?\n(.*?)```").expect("static pattern")
    });
    re.captures_iter(text)
        .map(|caps| {
            (
                caps[1].to_ascii_lowercase(),
                caps[2].to_string(),
            )
        })
        .collect()
}

/// A workflow-shaped candidate: a JSON object whose values are all objects
/// carrying a non-empty `class_type` string.
fn try_parse_candidate(text: &str) -> Option<RawWorkflow> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    let obj = value.as_object()?;
    for node in obj.values() {
        let node = node.as_object()?;
        node.get("class_type")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())?;
    }
    Some(obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

/// Recover a workflow embedded in free-form model output.
///
/// Priority: a `json`-tagged fenced block, then any untagged fenced block,
/// then the whole response — the first candidate at each tier whose every
/// value carries a `class_type` wins. Never panics; a response with no
/// embeddable workflow yields `None`.
pub fn extract_workflow_from_response(text: &str) -> Option<RawWorkflow> {
    let blocks = fenced_code_blocks(text);

    for (lang, body) in &blocks {
        if lang == "json" {
            if let Some(workflow) = try_parse_candidate(body) {
                return Some(workflow);
            }
        }
    }

    for (lang, body) in &blocks {
        if lang.is_empty() {
            if let Some(workflow) = try_parse_candidate(body) {
                return Some(workflow);
            }
        }
    }

    try_parse_candidate(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(class_type: &str, inputs: Value) -> Value {
        json!({"class_type": class_type, "inputs": inputs})
    }

    #[test]
    fn new_manipulator_is_empty_with_next_id_one() {
        let m = Manipulator::new();
        assert!(m.workflow().is_empty());
        assert_eq!(m.next_node_id, 1);
    }

    #[test]
    fn from_workflow_copies_and_computes_next_id() {
        let mut raw = RawWorkflow::new();
        raw.insert("3".into(), node("A", json!({})));
        raw.insert("7".into(), node("B", json!({})));
        raw.insert("1".into(), node("C", json!({})));
        let m = Manipulator::from_workflow(raw.clone());
        assert_eq!(m.next_node_id, 8);
        assert_eq!(m.workflow(), &raw);
    }

    #[test]
    fn add_node_assigns_sequential_ids_and_title() {
        let mut m = Manipulator::new();
        let n1 = m.add_node("KSampler", Map::new(), None);
        assert_eq!(n1, "1");
        assert_eq!(m.get_node("1").unwrap()["class_type"], "KSampler");
        assert_eq!(m.get_node("1").unwrap()["meta"]["title"], "KSampler");

        let n2 = m.add_node("CLIPTextEncode", Map::new(), Some("Positive Prompt".into()));
        assert_eq!(n2, "2");
        assert_eq!(m.get_node("2").unwrap()["meta"]["title"], "Positive Prompt");
    }

    #[test]
    fn remove_node_scrubs_references_but_keeps_other_inputs() {
        let mut raw = RawWorkflow::new();
        raw.insert("1".into(), node("A", json!({})));
        raw.insert(
            "2".into(),
            node("B", json!({"model": ["1", 0], "other": "keep"})),
        );
        let mut m = Manipulator::from_workflow(raw);
        assert!(m.remove_node("1"));
        assert!(!m.workflow().contains_key("1"));
        let remaining = m.get_node("2").unwrap();
        assert!(remaining["inputs"].get("model").is_none());
        assert_eq!(remaining["inputs"]["other"], "keep");
    }

    #[test]
    fn remove_nonexistent_node_is_false() {
        let mut m = Manipulator::new();
        assert!(!m.remove_node("99"));
    }

    #[test]
    fn connect_wires_a_link_and_fails_for_missing_target() {
        let mut raw = RawWorkflow::new();
        raw.insert("1".into(), node("A", json!({})));
        raw.insert("2".into(), node("B", json!({})));
        let mut m = Manipulator::from_workflow(raw);
        assert!(m.connect("1", 0, "2", "model"));
        assert_eq!(m.get_node("2").unwrap()["inputs"]["model"], json!(["1", 0]));
        assert!(!m.connect("1", 0, "99", "model"));
    }

    #[test]
    fn modify_input_overwrites_existing_value() {
        let mut raw = RawWorkflow::new();
        raw.insert("1".into(), node("KSampler", json!({"steps": 20})));
        let mut m = Manipulator::from_workflow(raw);
        assert!(m.modify_input("1", "steps", json!(30)));
        assert_eq!(m.get_node("1").unwrap()["inputs"]["steps"], 30);
        assert!(!m.modify_input("99", "x", json!(1)));
    }

    #[test]
    fn get_nodes_by_type_filters_correctly() {
        let mut raw = RawWorkflow::new();
        raw.insert("1".into(), node("CLIPTextEncode", json!({})));
        raw.insert("2".into(), node("CLIPTextEncode", json!({})));
        raw.insert("3".into(), node("KSampler", json!({})));
        let m = Manipulator::from_workflow(raw);
        let mut found = m.get_nodes_by_type("CLIPTextEncode");
        found.sort();
        assert_eq!(found, vec!["1".to_string(), "2".to_string()]);
        assert!(m.get_nodes_by_type("Z").is_empty());
    }

    #[test]
    fn json_roundtrip() {
        let mut m = Manipulator::new();
        m.from_json(r#"{"5": {"class_type": "B", "inputs": {"x": 1}}}"#).unwrap();
        assert_eq!(m.get_node("5").unwrap()["class_type"], "B");
        assert_eq!(m.next_node_id, 6);

        let mut raw = RawWorkflow::new();
        raw.insert("1".into(), node("A", json!({})));
        let m2 = Manipulator::from_workflow(raw.clone());
        let as_json = m2.to_json();
        let reparsed: Value = serde_json::from_str(&as_json).unwrap();
        assert_eq!(reparsed, Value::Object(raw.into_iter().collect()));
    }

    #[test]
    fn validate_reports_missing_class_type_and_inputs() {
        let mut raw = RawWorkflow::new();
        raw.insert("1".into(), json!({"inputs": {}}));
        let m = Manipulator::from_workflow(raw);
        let (valid, messages) = m.validate();
        assert!(!valid);
        assert!(messages.iter().any(|msg| msg.contains("class_type")));

        let mut raw = RawWorkflow::new();
        raw.insert("1".into(), json!({"class_type": "A"}));
        let m = Manipulator::from_workflow(raw);
        let (valid, messages) = m.validate();
        assert!(!valid);
        assert!(messages.iter().any(|msg| msg.contains("inputs")));
    }

    #[test]
    fn validate_reports_broken_link() {
        let mut raw = RawWorkflow::new();
        raw.insert("1".into(), node("A", json!({"model": ["99", 0]})));
        let m = Manipulator::from_workflow(raw);
        let (valid, messages) = m.validate();
        assert!(!valid);
        assert!(messages.iter().any(|msg| msg.contains("99")));
    }

    #[test]
    fn validate_passes_a_clean_workflow() {
        let mut raw = RawWorkflow::new();
        raw.insert("1".into(), node("A", json!({})));
        raw.insert("2".into(), node("B", json!({"model": ["1", 0]})));
        let m = Manipulator::from_workflow(raw);
        let (valid, messages) = m.validate();
        assert!(valid);
        assert!(messages.is_empty());
    }

    #[test]
    fn extracts_from_json_tagged_fence() {
        let response = "Here is the workflow:\n```json\n{\"1\": {\"class_type\": \"KSampler\", \"inputs\": {}}}\n```";
        let result = extract_workflow_from_response(response).unwrap();
        assert_eq!(result["1"]["class_type"], "KSampler");
    }

    #[test]
    fn extracts_from_untagged_fence() {
        let response = "Workflow:\n```\n{\"1\": {\"class_type\": \"A\", \"inputs\": {}}}\n```";
        assert!(extract_workflow_from_response(response).is_some());
    }

    #[test]
    fn extracts_raw_json_with_no_fence() {
        let response = r#"{"1": {"class_type": "A", "inputs": {}}}"#;
        assert!(extract_workflow_from_response(response).is_some());
    }

    #[test]
    fn plain_prose_yields_none() {
        let response = "I think you should increase the denoise to 0.7.";
        assert!(extract_workflow_from_response(response).is_none());
    }

    #[test]
    fn json_without_class_type_is_not_a_workflow() {
        let response = "```json\n{\"name\": \"not a workflow\"}\n```";
        assert!(extract_workflow_from_response(response).is_none());
    }

    #[test]
    fn invalid_json_in_fence_yields_none() {
        let response = "```json\n{invalid json}\n```";
        assert!(extract_workflow_from_response(response).is_none());
    }

    #[test]
    fn scans_past_a_non_workflow_block_to_find_the_workflow() {
        let response = "Here's some config:\n```json\n{\"key\": \"val\"}\n```\n\nAnd the workflow:\n```json\n{\"1\": {\"class_type\": \"A\", \"inputs\": {}}}\n```";
        let result = extract_workflow_from_response(response).unwrap();
        assert!(result.contains_key("1"));
    }
}
