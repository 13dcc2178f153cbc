// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared data model for comfy-pilot.
//!
//! This crate carries no I/O and no policy — it is the stable contract that
//! every other crate in the workspace builds on: conversation messages,
//! backend configuration, the workflow wire format, operator signatures,
//! and validation reports.

#![deny(unsafe_code)]

/// Conversation transcript types (`ConversationMessage`, `Role`).
pub mod message;
/// Per-query backend configuration (`BackendConfig`).
pub mod backend_config;
/// Operator catalog types (`InputDefinition`, `OperatorDefinition`).
pub mod operator;
/// Workflow wire format (`Workflow`, `Node`, `Value`).
pub mod workflow;
/// Validation report types (`ValidationIssue`, `ValidationResult`).
pub mod validation;
/// Knowledge document types (`KnowledgeDocument`, `Priority`).
pub mod knowledge;

pub use backend_config::BackendConfig;
pub use knowledge::{KnowledgeDocument, Priority, DEFAULT_CATEGORY, USER_CATEGORY};
pub use message::{ConversationMessage, Role};
pub use operator::{InputDefinition, OperatorDefinition, COMBO_TYPE, UNKNOWN_TYPE};
pub use validation::{Severity, ValidationIssue, ValidationResult};
pub use workflow::{Literal, LinkRef, Node, NodeMeta, Value, Workflow};
