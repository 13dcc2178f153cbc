// SPDX-License-Identifier: MIT OR Apache-2.0
//! Loads and selects markdown [`KnowledgeDocument`]s (§4.4).

use crate::frontmatter;
use crate::trigger::trigger_score;
use cp_core::{KnowledgeDocument, Priority, DEFAULT_CATEGORY, USER_CATEGORY};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors surfaced while scanning a knowledge directory.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("failed to read knowledge directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Loads markdown documents from a canonical directory and its `user`
/// subdirectory, and selects a budget-constrained subset for a prompt.
#[derive(Debug, Clone)]
pub struct KnowledgeStore {
    canonical_dir: PathBuf,
    user_dir: PathBuf,
    documents: Vec<KnowledgeDocument>,
    loaded: bool,
}

impl KnowledgeStore {
    /// A store rooted at `canonical_dir`, with documents additionally
    /// loaded from `canonical_dir/user`. Nothing is read from disk until
    /// [`Self::load_all`] is called.
    pub fn new(canonical_dir: impl Into<PathBuf>) -> Self {
        let canonical_dir = canonical_dir.into();
        let user_dir = canonical_dir.join("user");
        Self {
            canonical_dir,
            user_dir,
            documents: Vec::new(),
            loaded: false,
        }
    }

    /// `true` once [`Self::load_all`] has completed, even if it found zero
    /// documents.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// All documents currently held, canonical directory first, each
    /// directory sorted by filename ascending (§4.4).
    pub fn documents(&self) -> &[KnowledgeDocument] {
        &self.documents
    }

    /// Scan both directories and (re)populate the document list. A missing
    /// `user` subdirectory is not an error; a missing canonical directory
    /// is.
    pub fn load_all(&mut self) -> Result<(), KnowledgeError> {
        let mut documents = Vec::new();
        documents.extend(scan_directory(&self.canonical_dir, false)?);
        if self.user_dir.is_dir() {
            documents.extend(scan_directory(&self.user_dir, true)?);
        }
        self.documents = documents;
        self.loaded = true;
        Ok(())
    }

    /// Select documents relevant to `message` within `budget_chars`,
    /// optionally restricted to `allowed_categories`. See §4.4 for the
    /// mandatory-inclusion, scoring, and packing rules.
    pub fn select_relevant(
        &self,
        message: &str,
        budget_chars: u32,
        allowed_categories: Option<&HashSet<String>>,
    ) -> Vec<KnowledgeDocument> {
        let message_lower = message.to_lowercase();
        let mut selected = Vec::new();
        let mut scored: Vec<(usize, &KnowledgeDocument)> = Vec::new();
        let mut budget_used: u64 = 0;

        for doc in &self.documents {
            if let Some(allowed) = allowed_categories {
                if !allowed.contains(&doc.category) {
                    continue;
                }
            }

            if doc.is_high_priority() {
                selected.push(doc.clone());
                budget_used += doc.character_count as u64;
                continue;
            }

            let keyword_score: usize = doc
                .keywords
                .iter()
                .filter(|kw| message_lower.contains(kw.as_str()))
                .count();
            let score = keyword_score * 2 + trigger_score(&doc.category, &message_lower) * 3;

            if score > 0 {
                scored.push((score, doc));
            }
        }

        // Stable sort descending by score keeps ties in load order (§4.4).
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        for (_, doc) in scored {
            if budget_used + doc.character_count as u64 <= budget_chars as u64 {
                selected.push(doc.clone());
                budget_used += doc.character_count as u64;
            }
        }

        selected
    }

    /// Category name → titles of every document in that category, in load
    /// order (§6 `GET /comfy-pilot/knowledge-categories`).
    pub fn get_all_categories(&self) -> IndexMap<String, Vec<String>> {
        let mut categories: IndexMap<String, Vec<String>> = IndexMap::new();
        for doc in &self.documents {
            categories
                .entry(doc.category.clone())
                .or_default()
                .push(doc.title.clone());
        }
        categories
    }
}

fn scan_directory(dir: &Path, is_user_dir: bool) -> Result<Vec<KnowledgeDocument>, KnowledgeError> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|source| KnowledgeError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
        .collect();
    paths.sort();

    Ok(paths
        .into_iter()
        .filter_map(|path| match parse_file(&path, is_user_dir) {
            Ok(doc) => Some(doc),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable knowledge file");
                None
            }
        })
        .collect())
}

fn parse_file(path: &Path, is_user_dir: bool) -> std::io::Result<KnowledgeDocument> {
    let text = std::fs::read_to_string(path)?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string();

    let default_category = if is_user_dir { USER_CATEGORY } else { DEFAULT_CATEGORY };

    let Some((fm, body)) = frontmatter::split(&text) else {
        return Ok(KnowledgeDocument::new(
            stem.clone(),
            stem,
            Vec::new(),
            default_category,
            Priority::Low,
            text.trim().to_string(),
        ));
    };

    Ok(KnowledgeDocument::new(
        fm.id.unwrap_or_else(|| stem.clone()),
        fm.title.unwrap_or(stem),
        fm.keywords,
        fm.category.unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        fm.priority,
        body.to_string(),
    ))
}
