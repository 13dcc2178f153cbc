// SPDX-License-Identifier: MIT OR Apache-2.0
//! The trigger-phrase table and size-token budget table, ported verbatim
//! from the source knowledge manager's `_TRIGGER_PHRASES` and
//! `size_indicators` — `spec.md` describes both abstractly ("a closed set
//! mapping each core category to a list of domain phrases"; "size tokens
//! checked in descending order") but only the original names the concrete
//! entries, and the scoring/budget behavior only matches the described
//! system if these are carried rather than invented.

/// `(category, phrases)` — category here is the knowledge document
/// category a phrase's appearance boosts, not a UI grouping.
pub const TRIGGER_PHRASES: &[(&str, &[&str])] = &[
    (
        "video",
        &[
            "video", "wan", "hunyuan", "animatediff", "frames", "motion", "animate", "mochi",
            "cogvideo", "ltx", "svi", "interpolat",
        ],
    ),
    (
        "models",
        &[
            "model", "download", "checkpoint", "lora", "civitai", "huggingface", "pony", "flux",
            "sdxl", "nsfw", "vae",
        ],
    ),
    (
        "tuning",
        &[
            "blurry", "artifact", "denoise", "cfg", "steps", "sampler", "flickering", "quality",
            "fix", "issue", "problem", "wrong", "bad", "improve", "better",
        ],
    ),
    (
        "custom_nodes",
        &[
            "custom node", "install", "manager", "impact pack", "ipadapter", "controlnet",
            "reactor", "detailer",
        ],
    ),
    (
        "patterns",
        &["workflow", "template", "pattern", "txt2img", "img2img", "upscale", "controlnet"],
    ),
];

/// Count of trigger phrases for `category` that appear as substrings of
/// `message_lower` (already lowercased by the caller).
pub fn trigger_score(category: &str, message_lower: &str) -> usize {
    TRIGGER_PHRASES
        .iter()
        .find(|(name, _)| *name == category)
        .map(|(_, phrases)| {
            phrases
                .iter()
                .filter(|phrase| message_lower.contains(*phrase))
                .count()
        })
        .unwrap_or(0)
}

/// `(size token, char budget)`, in the order they must be tested — longest
/// tokens first so `"3b"` cannot shadow a match inside `"13b"`.
pub const SIZE_BUDGETS: &[(&str, u32)] = &[
    ("70b", 20_000),
    ("32b", 15_000),
    ("14b", 12_000),
    ("13b", 12_000),
    ("8b", 8_000),
    ("7b", 8_000),
    ("3b", 8_000),
    ("1b", 8_000),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_score_counts_phrase_hits() {
        assert_eq!(trigger_score("video", "a wan animatediff clip"), 2);
        assert_eq!(trigger_score("video", "a cat picture"), 0);
        assert_eq!(trigger_score("unknown-category", "wan video"), 0);
    }

    #[test]
    fn size_budgets_place_13b_before_3b() {
        let idx_13b = SIZE_BUDGETS.iter().position(|(t, _)| *t == "13b").unwrap();
        let idx_3b = SIZE_BUDGETS.iter().position(|(t, _)| *t == "3b").unwrap();
        assert!(idx_13b < idx_3b);
    }
}
