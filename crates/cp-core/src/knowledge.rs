// SPDX-License-Identifier: MIT OR Apache-2.0
//! Markdown knowledge documents selected into a system prompt (§4.4).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Relative importance of a [`KnowledgeDocument`] during selection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Low,
    Medium,
    /// Always included, ahead of any budget or scoring pass.
    High,
}

/// Category assigned to documents with no frontmatter that were loaded
/// from outside the user subtree (§3: "category defaults to ... 'other'
/// otherwise").
pub const DEFAULT_CATEGORY: &str = "other";

/// Category assigned to documents with no frontmatter loaded from the user
/// subtree (§3: "'user' when loaded from the user subtree").
pub const USER_CATEGORY: &str = "user";

/// One parsed markdown knowledge file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: String,
    pub title: String,
    /// Always lowercased (§3 invariant).
    pub keywords: BTreeSet<String>,
    pub category: String,
    pub priority: Priority,
    pub content: String,
    pub character_count: usize,
}

impl KnowledgeDocument {
    /// Construct a document, lowercasing `keywords` and deriving
    /// `character_count` from `content`.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        keywords: impl IntoIterator<Item = String>,
        category: impl Into<String>,
        priority: Priority,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let character_count = content.chars().count();
        Self {
            id: id.into(),
            title: title.into(),
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
            category: category.into(),
            priority,
            content,
            character_count,
        }
    }

    /// `true` if `priority` is [`Priority::High`].
    pub fn is_high_priority(&self) -> bool {
        self.priority == Priority::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_are_lowercased() {
        let doc = KnowledgeDocument::new(
            "a",
            "A",
            vec!["LoRA".to_string(), "ControlNet".to_string()],
            "models",
            Priority::Low,
            "hello",
        );
        assert!(doc.keywords.contains("lora"));
        assert!(doc.keywords.contains("controlnet"));
    }

    #[test]
    fn character_count_matches_content() {
        let doc = KnowledgeDocument::new("a", "A", vec![], "other", Priority::Low, "hello world");
        assert_eq!(doc.character_count, 11);
    }

    #[test]
    fn priority_ordering_puts_high_last() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
    }
}
