// SPDX-License-Identifier: MIT OR Apache-2.0
//! Operator catalog types, as fetched from the execution host's registry.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The semantic type reported for inputs/outputs whose spec could not be
/// parsed, per §4.1 ("Missing or malformed specs produce an InputDefinition
/// with semantic_type=\"UNKNOWN\" rather than failing the registry load.").
pub const UNKNOWN_TYPE: &str = "UNKNOWN";

/// The semantic type used for `COMBO` inputs.
pub const COMBO_TYPE: &str = "COMBO";

/// Describes one named input accepted by an [`OperatorDefinition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDefinition {
    /// Input name, as it appears in a node's `inputs` map.
    pub name: String,
    /// Catalog token (`MODEL`, `INT`, `COMBO`, ...). `COMBO` iff `options.is_some()`.
    pub semantic_type: String,
    /// Whether this input must be supplied.
    pub required: bool,
    /// Default literal value, if the registry reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// Inclusive minimum for numeric inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_val: Option<f64>,
    /// Inclusive maximum for numeric inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_val: Option<f64>,
    /// Admissible values, present only for `COMBO` inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<serde_json::Value>>,
}

impl InputDefinition {
    /// Construct a minimal, required input of the given semantic type.
    pub fn new(name: impl Into<String>, semantic_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            semantic_type: semantic_type.into(),
            required: true,
            default: None,
            min_val: None,
            max_val: None,
            options: None,
        }
    }

    /// Construct an unparseable input: `semantic_type = "UNKNOWN"`.
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::new(name, UNKNOWN_TYPE)
    }

    /// `true` if `value` lies within `[min_val, max_val]` (any absent bound
    /// is treated as unbounded on that side).
    pub fn numeric_in_range(&self, value: f64) -> bool {
        let above_min = self.min_val.is_none_or(|min| value >= min);
        let below_max = self.max_val.is_none_or(|max| value <= max);
        above_min && below_max
    }

    /// `true` if `value` appears (by JSON equality) in `options`.
    pub fn combo_contains(&self, value: &serde_json::Value) -> bool {
        self.options
            .as_ref()
            .is_some_and(|opts| opts.contains(value))
    }
}

/// The full signature of one operator (`class_type`) as reported by the
/// execution host's `/object_info` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorDefinition {
    /// The `class_type` string nodes use to reference this operator.
    pub class_name: String,
    /// Grouping category reported by the host (e.g. `"sampling"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Human-readable display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Inputs that must be supplied.
    #[serde(default)]
    pub required_inputs: IndexMap<String, InputDefinition>,
    /// Inputs that may be omitted.
    #[serde(default)]
    pub optional_inputs: IndexMap<String, InputDefinition>,
    /// Semantic type of each output slot, in slot order.
    #[serde(default)]
    pub output_types: Vec<String>,
    /// Display name of each output slot, parallel to `output_types`.
    #[serde(default)]
    pub output_names: Vec<String>,
}

impl OperatorDefinition {
    /// Look up an input by name, searching required inputs before optional
    /// ones, per §4.1's `get_input_type` contract. Returns the definition
    /// and whether it came from the required set.
    pub fn find_input(&self, name: &str) -> Option<(&InputDefinition, bool)> {
        if let Some(def) = self.required_inputs.get(name) {
            return Some((def, true));
        }
        self.optional_inputs.get(name).map(|def| (def, false))
    }

    /// The semantic type produced at `slot`, or `None` if out of range.
    pub fn output_type_at(&self, slot: u64) -> Option<&str> {
        usize::try_from(slot)
            .ok()
            .and_then(|idx| self.output_types.get(idx))
            .map(String::as_str)
    }

    /// `true` if `slot` is a valid index into `output_types`.
    pub fn slot_in_range(&self, slot: u64) -> bool {
        usize::try_from(slot).is_ok_and(|idx| idx < self.output_types.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ksampler_seed() -> InputDefinition {
        InputDefinition {
            name: "seed".into(),
            semantic_type: "INT".into(),
            required: true,
            default: Some(serde_json::json!(0)),
            min_val: Some(0.0),
            max_val: Some(1.0e18),
            options: None,
        }
    }

    #[test]
    fn numeric_range_is_inclusive() {
        let input = ksampler_seed();
        assert!(input.numeric_in_range(0.0));
        assert!(input.numeric_in_range(1.0e18));
        assert!(!input.numeric_in_range(-1.0));
        assert!(!input.numeric_in_range(1.0e19));
    }

    #[test]
    fn unbounded_side_accepts_anything() {
        let input = InputDefinition {
            min_val: Some(1.0),
            max_val: None,
            ..InputDefinition::new("x", "FLOAT")
        };
        assert!(input.numeric_in_range(1_000_000.0));
        assert!(!input.numeric_in_range(0.0));
    }

    #[test]
    fn combo_membership() {
        let input = InputDefinition {
            options: Some(vec![serde_json::json!("euler"), serde_json::json!("heun")]),
            ..InputDefinition::new("sampler_name", COMBO_TYPE)
        };
        assert!(input.combo_contains(&serde_json::json!("euler")));
        assert!(!input.combo_contains(&serde_json::json!("dpmpp_2m")));
    }

    #[test]
    fn find_input_prefers_required_over_optional() {
        let mut op = OperatorDefinition {
            class_name: "Foo".into(),
            category: None,
            display_name: None,
            required_inputs: IndexMap::new(),
            optional_inputs: IndexMap::new(),
            output_types: vec![],
            output_names: vec![],
        };
        op.optional_inputs
            .insert("clip".into(), InputDefinition::new("clip", "CLIP"));
        let (_, is_required) = op.find_input("clip").unwrap();
        assert!(!is_required);

        op.required_inputs
            .insert("clip".into(), InputDefinition::new("clip", "CLIP"));
        let (_, is_required) = op.find_input("clip").unwrap();
        assert!(is_required);
    }

    #[test]
    fn slot_range_checks() {
        let op = OperatorDefinition {
            class_name: "CheckpointLoaderSimple".into(),
            category: None,
            display_name: None,
            required_inputs: IndexMap::new(),
            optional_inputs: IndexMap::new(),
            output_types: vec!["MODEL".into(), "CLIP".into(), "VAE".into()],
            output_names: vec!["MODEL".into(), "CLIP".into(), "VAE".into()],
        };
        assert!(op.slot_in_range(2));
        assert!(!op.slot_in_range(3));
        assert_eq!(op.output_type_at(1), Some("CLIP"));
        assert_eq!(op.output_type_at(3), None);
    }
}
