// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cached catalog of operator signatures fetched from the execution host.
//!
//! Modeled on the teacher's sidecar/health caching (`abp-host::registry`,
//! `abp-host::health`), but the shared mutation point — the cache
//! swap — uses `arc_swap::ArcSwap` for lock-free atomic publish (§5: "the
//! cache swap is the single shared mutation ... atomic ... concurrent
//! fetches may race and the last writer wins").

#![deny(unsafe_code)]

mod edit_distance;
mod parse;

use arc_swap::ArcSwap;
use cp_core::OperatorDefinition;
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Default number of suggestions returned by `suggest_similar`.
pub const DEFAULT_SUGGEST_TOP_K: usize = 3;

/// Maximum edit distance considered "similar enough" to suggest.
const SUGGEST_THRESHOLD: usize = 3;

/// Default cache lifetime between fetches.
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// HTTP timeout for a single registry fetch.
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

struct Snapshot {
    operators: IndexMap<String, OperatorDefinition>,
    loaded: bool,
    last_fetch_time: Option<Instant>,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            operators: IndexMap::new(),
            loaded: false,
            last_fetch_time: None,
        }
    }
}

/// Fetches and caches the execution host's operator catalog.
pub struct OperatorRegistry {
    client: reqwest::Client,
    base_url: String,
    cache_ttl: Duration,
    snapshot: ArcSwap<Snapshot>,
}

impl OperatorRegistry {
    /// Build a registry pointed at `base_url` (e.g. `http://127.0.0.1:8188`).
    /// Nothing is fetched until [`Self::fetch`] is called.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            cache_ttl: DEFAULT_CACHE_TTL,
            snapshot: ArcSwap::from_pointee(Snapshot::empty()),
        }
    }

    /// Override the cache lifetime (default 30s).
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Refresh the catalog from `GET {base_url}/object_info`.
    ///
    /// Idempotent: if already loaded and the cache has not expired, returns
    /// `true` without performing I/O. On any failure (connection error,
    /// non-2xx status, unparseable body) returns `false` and leaves the
    /// previous snapshot — if any — untouched.
    pub async fn fetch(&self) -> bool {
        let now = Instant::now();
        {
            let current = self.snapshot.load();
            if current.loaded {
                if let Some(last) = current.last_fetch_time {
                    if now.duration_since(last) < self.cache_ttl {
                        return true;
                    }
                }
            }
        }

        let url = format!("{}/object_info", self.base_url.trim_end_matches('/'));
        let response = match self
            .client
            .get(&url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                warn!(error = %err, url, "operator registry fetch failed");
                return false;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), url, "operator registry fetch returned non-2xx");
            return false;
        }

        let body: serde_json::Value = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                warn!(error = %err, "operator registry response was not valid JSON");
                return false;
            }
        };

        let operators = parse::parse_object_info(&body);
        self.snapshot.store(Arc::new(Snapshot {
            operators,
            loaded: true,
            last_fetch_time: Some(Instant::now()),
        }));
        true
    }

    /// `true` once at least one successful fetch has completed.
    pub fn is_loaded(&self) -> bool {
        self.snapshot.load().loaded
    }

    /// `true` if `class_name` is a known operator.
    pub fn operator_exists(&self, class_name: &str) -> bool {
        self.snapshot.load().operators.contains_key(class_name)
    }

    /// Fetch a copy of one operator's definition.
    pub fn get_operator(&self, class_name: &str) -> Option<OperatorDefinition> {
        self.snapshot.load().operators.get(class_name).cloned()
    }

    /// The semantic type produced at `slot_index` by `class_name`'s output,
    /// or `None` if the operator or slot is unknown.
    pub fn get_output_type(&self, class_name: &str, slot_index: u64) -> Option<String> {
        self.get_operator(class_name)?
            .output_type_at(slot_index)
            .map(str::to_string)
    }

    /// The semantic type and required-ness of an input, searching required
    /// inputs before optional ones.
    pub fn get_input_type(&self, class_name: &str, input_name: &str) -> Option<(String, bool)> {
        let op = self.get_operator(class_name)?;
        op.find_input(input_name)
            .map(|(def, required)| (def.semantic_type.clone(), required))
    }

    /// All known class names, in registry (insertion) order.
    pub fn all_class_names(&self) -> Vec<String> {
        self.snapshot.load().operators.keys().cloned().collect()
    }

    /// Up to `top_k` class names close to `name` by edit distance (≤ 3),
    /// nearest first, ties broken lexicographically. Empty if the registry
    /// is unloaded or nothing is close enough.
    pub fn suggest_similar(&self, name: &str, top_k: usize) -> Vec<String> {
        let current = self.snapshot.load();
        if !current.loaded {
            return vec![];
        }

        let mut candidates: Vec<(usize, &String)> = current
            .operators
            .keys()
            .map(|candidate| (edit_distance::levenshtein(name, candidate), candidate))
            .filter(|(distance, _)| *distance <= SUGGEST_THRESHOLD)
            .collect();

        candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        candidates
            .into_iter()
            .take(top_k)
            .map(|(_, name)| name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_object_info() -> serde_json::Value {
        serde_json::json!({
            "KSampler": {
                "input": {
                    "required": {
                        "model": ["MODEL"],
                        "seed": ["INT", {"default": 0, "min": 0, "max": 1e18}]
                    }
                },
                "output": ["LATENT"],
                "output_name": ["LATENT"],
                "category": "sampling"
            },
            "CLIPTextEncode": {
                "input": {"required": {"text": ["STRING"], "clip": ["CLIP"]}},
                "output": ["CONDITIONING"],
                "output_name": ["CONDITIONING"]
            }
        })
    }

    #[tokio::test]
    async fn fetch_populates_catalog_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/object_info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_object_info()))
            .mount(&server)
            .await;

        let registry = OperatorRegistry::new(server.uri());
        assert!(registry.fetch().await);
        assert!(registry.is_loaded());
        assert!(registry.operator_exists("KSampler"));
        assert!(!registry.operator_exists("KSamler"));
    }

    #[tokio::test]
    async fn fetch_returns_false_and_keeps_cache_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/object_info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_object_info()))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/object_info"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let registry = OperatorRegistry::new(server.uri()).with_cache_ttl(Duration::from_millis(0));
        assert!(registry.fetch().await);
        assert!(registry.operator_exists("KSampler"));

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!registry.fetch().await);
        // Prior snapshot retained.
        assert!(registry.operator_exists("KSampler"));
    }

    #[tokio::test]
    async fn fetch_within_ttl_skips_io() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/object_info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_object_info()))
            .expect(1)
            .mount(&server)
            .await;

        let registry = OperatorRegistry::new(server.uri()).with_cache_ttl(Duration::from_secs(60));
        assert!(registry.fetch().await);
        assert!(registry.fetch().await);
        // wiremock's .expect(1) asserts exactly one request on drop.
    }

    #[tokio::test]
    async fn connection_failure_returns_false_without_loading() {
        let registry = OperatorRegistry::new("http://127.0.0.1:1");
        assert!(!registry.fetch().await);
        assert!(!registry.is_loaded());
    }

    #[tokio::test]
    async fn input_and_output_queries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/object_info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_object_info()))
            .mount(&server)
            .await;
        let registry = OperatorRegistry::new(server.uri());
        registry.fetch().await;

        assert_eq!(
            registry.get_output_type("KSampler", 0),
            Some("LATENT".to_string())
        );
        assert_eq!(registry.get_output_type("KSampler", 1), None);
        assert_eq!(
            registry.get_input_type("KSampler", "seed"),
            Some(("INT".to_string(), true))
        );
        assert_eq!(registry.get_input_type("KSampler", "nope"), None);
    }

    #[tokio::test]
    async fn suggest_similar_finds_close_names() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/object_info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sample_object_info()))
            .mount(&server)
            .await;
        let registry = OperatorRegistry::new(server.uri());
        registry.fetch().await;

        let suggestions = registry.suggest_similar("KSamler", DEFAULT_SUGGEST_TOP_K);
        assert_eq!(suggestions, vec!["KSampler".to_string()]);
    }

    #[test]
    fn suggest_similar_on_unloaded_registry_is_empty() {
        let registry = OperatorRegistry::new("http://127.0.0.1:8188");
        assert!(registry.suggest_similar("KSampler", 3).is_empty());
    }
}
