//! Entity resolver: extracts and normalizes a candidate product name from a
//! query using stopword stripping, phrase windows and the shared synonym
//! table, then best-effort validates existence against the structured store.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::gateway::StructuredStore;
use crate::lexicon::Lexicon;

/// Resolution result: raw extracted phrase, canonical form, validation flag
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Resolved {
    pub raw: String,
    pub normalized: String,
    pub validated: bool,
}

pub struct EntityResolver {
    lexicon: Arc<Lexicon>,
    structured: Arc<dyn StructuredStore>,
    fuzzy_ratio: f32,
    /// Memoization per raw query string; resolution is a pure function of
    /// its input, so sharing across concurrent requests is safe.
    cache: Option<Mutex<LruCache<String, Option<Resolved>>>>,
}

impl EntityResolver {
    pub fn new(
        lexicon: Arc<Lexicon>,
        structured: Arc<dyn StructuredStore>,
        fuzzy_ratio: f32,
        cache_capacity: Option<usize>,
    ) -> Self {
        let cache = cache_capacity
            .and_then(NonZeroUsize::new)
            .map(|cap| Mutex::new(LruCache::new(cap)));
        Self {
            lexicon,
            structured,
            fuzzy_ratio,
            cache,
        }
    }

    /// Resolve a product entity from the query. Returns `None` when the
    /// query carries no candidate token at all.
    pub async fn resolve(&self, query: &str) -> Option<Resolved> {
        if let Some(cache) = &self.cache
            && let Ok(mut guard) = cache.lock()
            && let Some(hit) = guard.get(query)
        {
            return hit.clone();
        }

        let resolved = match self.extract(query) {
            Some(raw) => {
                let normalized = self
                    .lexicon
                    .canonical_for(&raw)
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| raw.clone());
                let validated = self.validate(&normalized).await;
                Some(Resolved {
                    raw,
                    normalized,
                    validated,
                })
            }
            None => None,
        };

        if let Some(cache) = &self.cache
            && let Ok(mut guard) = cache.lock()
        {
            guard.put(query.to_string(), resolved.clone());
        }
        resolved
    }

    /// Extract the raw entity phrase: 2-word windows matched (exactly or
    /// fuzzily) against the synonym table first, then the first remaining
    /// token. Statistics and generic product vocabulary are not entity
    /// candidates; a pure "tổng doanh thu theo tháng" query has no entity.
    pub fn extract(&self, query: &str) -> Option<String> {
        let tokens: Vec<String> = self
            .lexicon
            .content_tokens(query)
            .into_iter()
            .filter(|t| !self.lexicon.is_statistic_term(t) && !self.lexicon.is_product_term(t))
            .collect();
        if tokens.is_empty() {
            return None;
        }

        for window in tokens.windows(2) {
            let phrase = format!("{} {}", window[0], window[1]);
            if self.lexicon.canonical_for(&phrase).is_some()
                || self
                    .lexicon
                    .fuzzy_canonical_for(&phrase, self.fuzzy_ratio)
                    .is_some()
            {
                return Some(phrase);
            }
        }

        Some(tokens[0].clone())
    }

    /// Best-effort existence probe. A backend failure must never block the
    /// pipeline, so it resolves to "assume valid".
    async fn validate(&self, entity: &str) -> bool {
        match self.structured.any_product_like(entity).await {
            Ok(exists) => exists,
            Err(e) => {
                eprintln!("⚠️ Entity validation unavailable, assuming valid: {}", e);
                true
            }
        }
    }
}
