// SPDX-License-Identifier: MIT OR Apache-2.0
//! Validation report types produced by the workflow validator.

use serde::{Deserialize, Serialize};

/// Severity of a single [`ValidationIssue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocks `ValidationResult::valid`.
    Error,
    /// Advisory only.
    Warning,
}

/// One finding produced by a single validation check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Identifier of the check that produced this issue (e.g. `"node_not_found"`).
    pub check_id: String,
    /// The node this issue concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Human-readable description.
    pub message: String,
    /// A suggested fix, when one could be computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Error or warning.
    pub severity: Severity,
}

impl ValidationIssue {
    /// Construct an error-severity issue.
    pub fn error(check_id: impl Into<String>, node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            check_id: check_id.into(),
            node_id: Some(node_id.into()),
            message: message.into(),
            suggestion: None,
            severity: Severity::Error,
        }
    }

    /// Construct a warning-severity issue.
    pub fn warning(check_id: impl Into<String>, node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            check_id: check_id.into(),
            node_id: Some(node_id.into()),
            message: message.into(),
            suggestion: None,
            severity: Severity::Warning,
        }
    }

    /// Attach a suggested fix.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// The outcome of validating one [`crate::Workflow`].
///
/// Issues are kept in the order the checks produced them (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    /// All issues found, in production order.
    pub issues: Vec<ValidationIssue>,
    /// Number of nodes in the workflow that was checked.
    pub node_count: usize,
    /// Whether registry-backed checks ran (`false` if the registry was unloaded).
    pub validated_against_registry: bool,
}

impl ValidationResult {
    /// `true` iff no issue has [`Severity::Error`].
    pub fn valid(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    /// Issues with [`Severity::Error`], in production order.
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    /// Issues with [`Severity::Warning`], in production order.
    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    /// Render this result as a deterministic, agent-consumable text block
    /// (§4.2 `format_for_agent`).
    pub fn format_for_agent(&self) -> String {
        let errors: Vec<&ValidationIssue> = self.errors().collect();
        let warnings: Vec<&ValidationIssue> = self.warnings().collect();

        if errors.is_empty() && warnings.is_empty() {
            return "PASSED: workflow has no validation errors or warnings.".to_string();
        }

        let mut out = String::new();

        if !errors.is_empty() {
            let noun = if errors.len() == 1 { "error" } else { "errors" };
            out.push_str(&format!(
                "VALIDATION FAILED: {} {noun} found.\n\n",
                errors.len()
            ));
            for issue in &errors {
                out.push_str(&format_issue_line(issue));
            }
        } else {
            out.push_str("VALIDATION PASSED with warnings.\n\n");
        }

        if !warnings.is_empty() {
            out.push_str("\nWarnings:\n");
            for issue in &warnings {
                out.push_str(&format_issue_line(issue));
            }
        }

        if !errors.is_empty() {
            out.push_str("\nPlease fix ALL errors and return the corrected workflow JSON.\n");
        }

        out
    }
}

fn format_issue_line(issue: &ValidationIssue) -> String {
    let location = issue
        .node_id
        .as_deref()
        .map(|id| format!(" [node {id}]"))
        .unwrap_or_default();
    match &issue.suggestion {
        Some(suggestion) => format!("- {}{}: {} (suggestion: {})\n", issue.check_id, location, issue.message, suggestion),
        None => format!("- {}{}: {}\n", issue.check_id, location, issue.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_result_is_valid() {
        let result = ValidationResult::default();
        assert!(result.valid());
        assert_eq!(result.errors().count(), 0);
        assert_eq!(result.warnings().count(), 0);
    }

    #[test]
    fn result_with_only_warnings_is_valid() {
        let result = ValidationResult {
            issues: vec![ValidationIssue::warning("type_mismatch", "1", "MODEL vs CLIP")],
            node_count: 1,
            validated_against_registry: true,
        };
        assert!(result.valid());
    }

    #[test]
    fn result_with_an_error_is_invalid() {
        let result = ValidationResult {
            issues: vec![ValidationIssue::error("node_not_found", "1", "unknown")],
            node_count: 1,
            validated_against_registry: true,
        };
        assert!(!result.valid());
    }

    #[test]
    fn format_for_agent_passed_line() {
        let result = ValidationResult::default();
        let text = result.format_for_agent();
        assert!(text.contains("PASSED"));
    }

    #[test]
    fn format_for_agent_pluralizes_errors() {
        let result = ValidationResult {
            issues: vec![
                ValidationIssue::error("a", "1", "bad"),
                ValidationIssue::error("b", "2", "also bad"),
            ],
            node_count: 2,
            validated_against_registry: true,
        };
        let text = result.format_for_agent();
        assert!(text.contains("2 errors found"));
        assert!(text.contains("fix ALL errors"));
    }

    #[test]
    fn format_for_agent_singular_error() {
        let result = ValidationResult {
            issues: vec![ValidationIssue::error("a", "1", "bad")],
            node_count: 1,
            validated_against_registry: true,
        };
        assert!(result.format_for_agent().contains("1 error found"));
    }

    #[test]
    fn format_for_agent_is_deterministic() {
        let result = ValidationResult {
            issues: vec![
                ValidationIssue::error("a", "1", "bad").with_suggestion("fix it"),
                ValidationIssue::warning("b", "2", "loose"),
            ],
            node_count: 2,
            validated_against_registry: true,
        };
        assert_eq!(result.format_for_agent(), result.format_for_agent());
    }
}
