// SPDX-License-Identifier: MIT OR Apache-2.0
//! Parses `GET /object_info` responses into [`OperatorDefinition`]s.
//!
//! Centralizes all the defensive guessing in one place rather than letting
//! callers each re-derive "what does a malformed input spec mean" (§9,
//! "Free-form parsing of `object_info`").

use cp_core::{InputDefinition, OperatorDefinition};
use indexmap::IndexMap;
use serde_json::Value;

/// Parse a full `/object_info` response body into a catalog.
///
/// Entries that are not JSON objects are skipped; malformed input specs
/// within an otherwise-valid entry degrade to `semantic_type = "UNKNOWN"`
/// rather than dropping the whole operator.
pub fn parse_object_info(raw: &Value) -> IndexMap<String, OperatorDefinition> {
    let mut out = IndexMap::new();
    let Some(map) = raw.as_object() else {
        return out;
    };

    for (class_name, entry) in map {
        let Some(def) = parse_entry(class_name, entry) else {
            continue;
        };
        out.insert(class_name.clone(), def);
    }

    out
}

fn parse_entry(class_name: &str, entry: &Value) -> Option<OperatorDefinition> {
    let entry = entry.as_object()?;

    let input = entry.get("input").and_then(Value::as_object);
    let required_inputs = input
        .and_then(|i| i.get("required"))
        .and_then(Value::as_object)
        .map(parse_input_map)
        .unwrap_or_default();
    let optional_inputs = input
        .and_then(|i| i.get("optional"))
        .and_then(Value::as_object)
        .map(parse_input_map)
        .unwrap_or_default();

    let output_types = entry
        .get("output")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(value_as_string).collect())
        .unwrap_or_default();
    let output_names = entry
        .get("output_name")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(value_as_string).collect())
        .unwrap_or_default();

    let category = entry.get("category").and_then(value_as_string);
    let display_name = entry.get("display_name").and_then(value_as_string);

    Some(OperatorDefinition {
        class_name: class_name.to_string(),
        category,
        display_name,
        required_inputs,
        optional_inputs,
        output_types,
        output_names,
    })
}

fn parse_input_map(
    map: &serde_json::Map<String, Value>,
) -> IndexMap<String, InputDefinition> {
    map.iter()
        .map(|(name, spec)| (name.clone(), parse_input_spec(name, spec)))
        .collect()
}

/// Parse one `name: spec` entry from `input.required`/`input.optional`.
///
/// `spec` is a one- or two-element array. Element 0 is either a semantic
/// type string, or a nested array of COMBO options. Element 1, if present,
/// is a constraints object (`default`/`min`/`max`).
fn parse_input_spec(name: &str, spec: &Value) -> InputDefinition {
    let Some(arr) = spec.as_array() else {
        return InputDefinition::unknown(name);
    };
    let Some(first) = arr.first() else {
        return InputDefinition::unknown(name);
    };

    let mut def = if let Some(type_name) = first.as_str() {
        InputDefinition::new(name, type_name)
    } else if let Some(options) = first.as_array() {
        InputDefinition {
            options: Some(options.clone()),
            ..InputDefinition::new(name, cp_core::COMBO_TYPE)
        }
    } else {
        InputDefinition::unknown(name)
    };

    if let Some(constraints) = arr.get(1).and_then(Value::as_object) {
        def.default = constraints.get("default").cloned();
        def.min_val = constraints.get("min").and_then(Value::as_f64);
        def.max_val = constraints.get("max").and_then(Value::as_f64);
    }

    def
}

fn value_as_string(v: &Value) -> Option<String> {
    v.as_str().map(str::to_string)
}
