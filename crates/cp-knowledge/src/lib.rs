// SPDX-License-Identifier: MIT OR Apache-2.0
//! Knowledge document store, selector, and prompt-budget derivation (§4.4).

#![deny(unsafe_code)]

mod frontmatter;
mod store;
mod trigger;

pub use store::{KnowledgeError, KnowledgeStore};

use serde::{Deserialize, Serialize};

/// Backend name the local-model size-token budget table applies to (§4.4:
/// "for the local-model backend, inspect model_identifier..."). Matches
/// `cp_backend_local`'s registered `Backend::name()`.
pub const LOCAL_MODEL_BACKEND_NAME: &str = "ollama";

/// Backend name that always gets the large-context budget (§4.4: "for the
/// large-context hosted backend, 30000"). Matches `cp_backend_hosted`'s
/// registered `Backend::name()`.
pub const HOSTED_BACKEND_NAME: &str = "claude_code";

const FALLBACK_BUDGET: u32 = 15_000;
const OLLAMA_SMALL_DEFAULT_BUDGET: u32 = 8_000;
const HOSTED_BUDGET: u32 = 30_000;

/// User-selectable override for the prompt context budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    Minimal,
    Standard,
    Verbose,
}

impl ContextMode {
    fn budget(self) -> u32 {
        match self {
            ContextMode::Minimal => 5_000,
            ContextMode::Standard => 15_000,
            ContextMode::Verbose => 30_000,
        }
    }
}

/// Derive the character budget for a prompt (§4.4 `budget_for`).
///
/// A `mode` override always wins. Otherwise the budget follows the
/// backend: the local-model backend scales with the model's apparent
/// parameter count, the hosted backend gets a flat large budget, and
/// anything else falls back to the standard budget.
pub fn budget_for(backend_name: &str, model_identifier: Option<&str>, mode: Option<ContextMode>) -> u32 {
    if let Some(mode) = mode {
        return mode.budget();
    }

    if backend_name == LOCAL_MODEL_BACKEND_NAME {
        let model_lower = model_identifier.unwrap_or_default().to_lowercase();
        return trigger::SIZE_BUDGETS
            .iter()
            .find(|(token, _)| model_lower.contains(token))
            .map(|(_, budget)| *budget)
            .unwrap_or(OLLAMA_SMALL_DEFAULT_BUDGET);
    }

    if backend_name == HOSTED_BACKEND_NAME {
        return HOSTED_BUDGET;
    }

    FALLBACK_BUDGET
}

/// Render the selected documents as the knowledge section of a system
/// prompt: `# {title}\n\n{content}` per document, joined by `\n\n---\n\n`.
/// Empty input yields an empty string.
pub fn build_knowledge_text(documents: &[cp_core::KnowledgeDocument]) -> String {
    documents
        .iter()
        .map(|doc| format!("# {}\n\n{}", doc.title, doc.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}
