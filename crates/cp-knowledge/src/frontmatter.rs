// SPDX-License-Identifier: MIT OR Apache-2.0
//! Parses the simple key/value front-matter block described in §6:
//! "optional front-matter delimited by lines of exactly three dashes at
//! document start; body follows the closing delimiter. Front-matter is a
//! simple key/value block with keys id, title, keywords (sequence of
//! text), category, priority."

use cp_core::Priority;

/// One parsed front-matter block, with every field defaulted the way a
/// partially-specified block is expected to behave (§4.4 supplement: a
/// missing individual key falls back the same way a wholly-absent block
/// does for that key).
#[derive(Debug, Default)]
pub struct FrontMatter {
    pub id: Option<String>,
    pub title: Option<String>,
    pub keywords: Vec<String>,
    pub category: Option<String>,
    pub priority: Priority,
}

/// Split `text` into an optional front-matter block and the remaining body.
/// Returns `None` if `text` does not open with a `---` delimiter line.
pub fn split(text: &str) -> Option<(FrontMatter, &str)> {
    let mut lines = text.lines();
    let first = lines.next()?;
    if first.trim() != "---" {
        return None;
    }

    let rest = &text[first.len()..];
    let rest = rest.strip_prefix('\n').unwrap_or(rest);

    let close = find_closing_delimiter(rest)?;
    let (block, body) = rest.split_at(close);
    let body = body
        .strip_prefix("---")
        .map(|after| after.strip_prefix('\n').unwrap_or(after))
        .unwrap_or(body);

    Some((parse_block(block), body.trim()))
}

fn find_closing_delimiter(text: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_end_matches('\n').trim();
        if trimmed == "---" {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

fn parse_block(block: &str) -> FrontMatter {
    let mut fm = FrontMatter::default();

    for line in block.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        match key {
            "id" => fm.id = Some(unquote(value).to_string()),
            "title" => fm.title = Some(unquote(value).to_string()),
            "category" => fm.category = Some(unquote(value).to_string()),
            "priority" => {
                fm.priority = match value.to_ascii_lowercase().as_str() {
                    "high" => Priority::High,
                    "medium" => Priority::Medium,
                    _ => Priority::Low,
                };
            }
            "keywords" => fm.keywords = parse_sequence(value),
            _ => {}
        }
    }

    fm
}

/// Parse a bracketed (`[a, b, c]`) or bare comma-separated list.
fn parse_sequence(value: &str) -> Vec<String> {
    let value = value.strip_prefix('[').unwrap_or(value);
    let value = value.strip_suffix(']').unwrap_or(value);
    value
        .split(',')
        .map(str::trim)
        .map(unquote)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        let q = quote.to_string();
        if let Some(inner) = value.strip_prefix(&q).and_then(|v| v.strip_suffix(&q)) {
            return inner;
        }
    }
    value
}
