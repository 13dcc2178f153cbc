// SPDX-License-Identifier: MIT OR Apache-2.0
//! The workflow wire format: the canonical contract with the execution host.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A workflow: a mapping from node id (a string-encoded positive integer)
/// to [`Node`]. Iteration order follows JSON object key order, which this
/// crate preserves end-to-end via [`IndexMap`] so that `from_json(to_json(w))
/// == w` (§8).
pub type Workflow = IndexMap<String, Node>;

/// One vertex of a [`Workflow`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// The operator this node instantiates.
    pub class_type: String,
    /// Named input values (literals or links to another node's output).
    #[serde(default)]
    pub inputs: IndexMap<String, Value>,
    /// Optional display metadata. Ignored by the core (§6).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<NodeMeta>,
}

impl Node {
    /// Construct a node with no metadata.
    pub fn new(class_type: impl Into<String>, inputs: IndexMap<String, Value>) -> Self {
        Self {
            class_type: class_type.into(),
            inputs,
            meta: None,
        }
    }
}

/// Optional per-node display metadata.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeMeta {
    /// Human-readable title shown in the host's editor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// A reference to another node's output: `[source_node_id, output_slot]`.
///
/// Serializes as a two-element JSON array, matching the wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRef(pub String, pub u64);

impl LinkRef {
    /// The id of the node that produces the referenced output.
    pub fn source_node_id(&self) -> &str {
        &self.0
    }

    /// The output slot on the source node.
    pub fn output_slot(&self) -> u64 {
        self.1
    }
}

/// A literal value carried by a node input (as opposed to a [`LinkRef`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    /// A boolean literal. Tried before `Number` so JSON `true`/`false`
    /// deserialize as `Bool`, not as a failed numeric parse.
    Bool(bool),
    /// A numeric literal (integer or float).
    Number(f64),
    /// A text literal.
    Text(String),
}

/// The value of a node input: either a literal or a link to another node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// `[source_node_id, output_slot]`.
    Link(LinkRef),
    /// A literal scalar.
    Literal(Literal),
}

impl Value {
    /// Borrow the link payload, if this value is a link.
    pub fn as_link(&self) -> Option<&LinkRef> {
        match self {
            Value::Link(l) => Some(l),
            Value::Literal(_) => None,
        }
    }

    /// `true` if this value is a link rather than a literal.
    pub fn is_link(&self) -> bool {
        self.as_link().is_some()
    }

    /// Interpret this value as an `f64`, if it is a numeric literal.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Literal(Literal::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// Interpret this value as a text literal.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Literal(Literal::Text(s)) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Literal(Literal::Number(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Literal(Literal::Text(s.to_string()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Literal(Literal::Text(s))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Literal(Literal::Bool(b))
    }
}

impl From<(String, u64)> for Value {
    fn from((id, slot): (String, u64)) -> Self {
        Value::Link(LinkRef(id, slot))
    }
}
