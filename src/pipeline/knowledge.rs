//! Knowledge retriever: the progressive fallback search chain for product
//! matches.
//!
//! Stage order is strict (structured exact, structured fuzzy, vector); a
//! later stage runs only when the previous one returned nothing. Post-
//! processing (dedupe, similarity floor, lexical relevance filter) applies
//! regardless of which stage produced the candidates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::cache::FifoCache;
use crate::config::RetrievalConfig;
use crate::gateway::{Embedder, ProductRow, StructuredStore, VectorHit, VectorIndex};
use crate::lexicon::Lexicon;
use crate::state::{MatchSource, ProductMatch, dedupe_by_max_similarity};

/// Metadata filter value marking product vectors in the shared index
const CONTENT_TYPE_PRODUCT: &str = "product";

pub struct KnowledgeRetriever {
    lexicon: Arc<Lexicon>,
    structured: Arc<dyn StructuredStore>,
    vector: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
    /// Bounded FIFO over normalized-query+category+top_k. Catalog data is
    /// close to static within a process lifetime, so staleness is fine.
    cache: Option<Mutex<FifoCache<String, Vec<ProductMatch>>>>,
    verbose: bool,
}

impl KnowledgeRetriever {
    pub fn new(
        lexicon: Arc<Lexicon>,
        structured: Arc<dyn StructuredStore>,
        vector: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
        cache_capacity: Option<usize>,
        verbose: bool,
    ) -> Self {
        let cache = cache_capacity.map(|cap| Mutex::new(FifoCache::new(cap)));
        Self {
            lexicon,
            structured,
            vector,
            embedder,
            config,
            cache,
            verbose,
        }
    }

    /// Text search through the full fallback chain.
    ///
    /// `original_query` is the user's untouched text; the lexical relevance
    /// filter and the vector-stage retry both work from it rather than from
    /// the (possibly sub-query-substituted) `query`.
    pub async fn search(
        &self,
        query: &str,
        original_query: &str,
        category_filter: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<ProductMatch>> {
        let normalized = self.lexicon.normalize(query);
        let cache_key = format!(
            "{}|{}|{}",
            normalized,
            category_filter.unwrap_or(""),
            top_k
        );
        if let Some(cache) = &self.cache
            && let Ok(guard) = cache.lock()
            && let Some(hit) = guard.get(&cache_key)
        {
            return Ok(hit);
        }

        let keywords = self.ranked_keywords(&normalized);

        let mut candidates = self.structured_exact(&keywords).await;
        if candidates.is_empty() {
            candidates = self.structured_fuzzy(&keywords).await;
        }
        if candidates.is_empty() {
            candidates = self
                .vector_stage(&normalized, original_query, category_filter, top_k)
                .await;
        }

        let results = self.post_process(candidates, original_query, top_k);

        if let Some(cache) = &self.cache
            && let Ok(mut guard) = cache.lock()
        {
            guard.put(cache_key, results.clone());
        }
        Ok(results)
    }

    /// Image search: vector-only, no lexical filter because there is no
    /// query text to filter against.
    pub async fn search_by_image(
        &self,
        image: &[u8],
        category_filter: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<ProductMatch>> {
        let embedding = match self.embedder.embed_image(image).await {
            Ok(v) => v,
            Err(e) => {
                eprintln!("⚠️ Image embedding failed: {}", e);
                return Ok(vec![]);
            }
        };
        let hits = self
            .vector_search(&embedding, category_filter, top_k)
            .await;
        let matches = hits
            .into_iter()
            .filter_map(|h| hit_to_match(h, MatchSource::ImageSearch))
            .collect();
        Ok(self.post_process(matches, "", top_k))
    }

    /// Keywords for the structured stages: the full entity phrase first,
    /// then single tokens, longest first.
    fn ranked_keywords(&self, normalized: &str) -> Vec<String> {
        let tokens = self.lexicon.content_tokens(normalized);
        let mut keywords = Vec::new();
        if tokens.len() > 1 {
            keywords.push(tokens.join(" "));
        }
        keywords.extend(tokens);
        keywords.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
        let mut seen = std::collections::HashSet::new();
        keywords.retain(|k| !k.is_empty() && seen.insert(k.clone()));
        keywords
    }

    /// Stage 1: substring match on product name. The first keyword that
    /// yields valid rows wins.
    async fn structured_exact(&self, keywords: &[String]) -> Vec<ProductMatch> {
        for keyword in keywords {
            let rows = match self.structured.products_matching(keyword).await {
                Ok(rows) => rows,
                Err(e) => {
                    eprintln!("⚠️ Structured exact stage unavailable: {}", e);
                    return vec![];
                }
            };
            let valid: Vec<ProductMatch> = rows
                .into_iter()
                .filter(|row| self.candidate_valid(keyword, &row.product_name))
                .map(|row| row_to_match(row, 1.0, MatchSource::SqlExactMatch))
                .collect();
            if !valid.is_empty() {
                if self.verbose {
                    println!("   🗄️ Exact match hit on '{}' ({})", keyword, valid.len());
                }
                return valid;
            }
        }
        vec![]
    }

    /// Stage 2: typo-tolerant match over name and description with a tiered
    /// relevance score (100/80/60/40 normalized to [0,1]).
    async fn structured_fuzzy(&self, keywords: &[String]) -> Vec<ProductMatch> {
        for keyword in keywords {
            let pattern = truncate_last_char(keyword);
            if pattern.is_empty() {
                continue;
            }
            let rows = match self.structured.products_matching_fuzzy(&pattern).await {
                Ok(rows) => rows,
                Err(e) => {
                    eprintln!("⚠️ Structured fuzzy stage unavailable: {}", e);
                    return vec![];
                }
            };
            let valid: Vec<ProductMatch> = rows
                .into_iter()
                .filter(|row| self.candidate_valid(keyword, &row.product_name))
                .map(|row| {
                    let score = self.fuzzy_tier(keyword, &pattern, &row);
                    row_to_match(row, score, MatchSource::SqlFuzzyMatch)
                })
                .collect();
            if !valid.is_empty() {
                if self.verbose {
                    println!("   🗄️ Fuzzy match hit on '{}' ({})", pattern, valid.len());
                }
                return valid;
            }
        }
        vec![]
    }

    /// Tiered relevance by which field/pattern matched
    fn fuzzy_tier(&self, keyword: &str, pattern: &str, row: &ProductRow) -> f32 {
        let name = self.lexicon.normalize(&row.product_name);
        let description = row
            .description
            .as_deref()
            .map(|d| self.lexicon.normalize(d))
            .unwrap_or_default();
        let score: f32 = if name.contains(keyword) {
            100.0
        } else if name.contains(pattern) {
            80.0
        } else if description.contains(keyword) || description.contains(pattern) {
            60.0
        } else {
            40.0
        };
        score / 100.0
    }

    /// Stage 3: vector nearest-neighbor, only reached when both structured
    /// stages came back empty. An empty first pass is retried once with an
    /// alternate extraction from the original query.
    async fn vector_stage(
        &self,
        normalized: &str,
        original_query: &str,
        category_filter: Option<&str>,
        top_k: usize,
    ) -> Vec<ProductMatch> {
        let mut matches = self
            .vector_text_search(normalized, category_filter, top_k)
            .await;

        if matches.is_empty() {
            let alternate = self.lexicon.content_tokens(original_query).join(" ");
            if !alternate.is_empty() && alternate != normalized {
                if self.verbose {
                    println!("   🔄 Vector retry with alternate extraction '{}'", alternate);
                }
                matches = self
                    .vector_text_search(&alternate, category_filter, top_k)
                    .await;
            }
        }
        matches
    }

    async fn vector_text_search(
        &self,
        text: &str,
        category_filter: Option<&str>,
        top_k: usize,
    ) -> Vec<ProductMatch> {
        let embedding = match self.embedder.embed_text(text).await {
            Ok(v) => v,
            Err(e) => {
                eprintln!("⚠️ Text embedding failed: {}", e);
                return vec![];
            }
        };
        self.vector_search(&embedding, category_filter, top_k)
            .await
            .into_iter()
            .filter_map(|h| hit_to_match(h, MatchSource::TextSearch))
            .collect()
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        category_filter: Option<&str>,
        top_k: usize,
    ) -> Vec<VectorHit> {
        let mut filter = HashMap::new();
        filter.insert("content_type".to_string(), CONTENT_TYPE_PRODUCT.to_string());
        if let Some(category) = category_filter {
            filter.insert("category_name".to_string(), category.to_string());
        }
        match self.vector.search(embedding, top_k, &filter).await {
            Ok(hits) => hits,
            Err(e) => {
                eprintln!("⚠️ Vector search unavailable: {}", e);
                vec![]
            }
        }
    }

    /// Synonym-aware + fuzzy validity check rejecting spurious substring hits
    fn candidate_valid(&self, needle: &str, product_name: &str) -> bool {
        let name_tokens = self.lexicon.tokens(product_name);
        if name_tokens.iter().any(|t| t == needle) {
            return true;
        }
        if needle.contains(' ') && self.lexicon.normalize(product_name).contains(needle) {
            return true;
        }
        if self.lexicon.synonym_match(needle, product_name) {
            return true;
        }
        self.lexicon
            .fuzzy_word_match(needle, product_name, self.config.fuzzy_ratio)
    }

    /// Merge, dedupe, floor, then the lexical relevance filter.
    ///
    /// When the lexical filter eliminates every remaining candidate the
    /// result set becomes empty instead of falling back to the unfiltered
    /// vector results. Returning a wrong-category product would be worse
    /// than under-returning; the empty set arms the orchestrator's hard
    /// guard.
    fn post_process(
        &self,
        candidates: Vec<ProductMatch>,
        original_query: &str,
        top_k: usize,
    ) -> Vec<ProductMatch> {
        let mut results = dedupe_by_max_similarity(candidates);
        results.retain(|m| m.similarity >= self.config.similarity_floor);

        let keywords = self.lexicon.content_tokens(original_query);
        if !keywords.is_empty() {
            let before = results.len();
            results.retain(|m| self.lexically_relevant(&keywords, m));
            if self.verbose && results.len() < before {
                println!(
                    "   🧹 Lexical filter kept {} of {} candidates",
                    results.len(),
                    before
                );
            }
        }

        results.truncate(top_k);
        results
    }

    /// A product survives when its name whole-word-matches a query keyword,
    /// matches via the synonym table, or fuzzy-matches a name word.
    fn lexically_relevant(&self, keywords: &[String], m: &ProductMatch) -> bool {
        let name_tokens = self.lexicon.tokens(&m.product_name);
        for keyword in keywords {
            if name_tokens.iter().any(|t| t == keyword) {
                return true;
            }
            if self.lexicon.synonym_match(keyword, &m.product_name) {
                return true;
            }
            if self
                .lexicon
                .fuzzy_word_match(keyword, &m.product_name, self.config.fuzzy_ratio)
            {
                return true;
            }
        }
        let phrase = keywords.join(" ");
        self.lexicon.synonym_match(&phrase, &m.product_name)
    }

    /// Human/LLM-readable context block for the retrieved products
    pub fn format_context(&self, matches: &[ProductMatch]) -> String {
        if matches.is_empty() {
            return String::new();
        }
        let mut context = String::from("Sản phẩm tìm thấy:\n");
        for (i, m) in matches.iter().enumerate() {
            context.push_str(&format!(
                "{}. {} (mã: {}, danh mục: {})",
                i + 1,
                m.product_name,
                m.product_id,
                m.category_name
            ));
            if let Some(price) = m.price {
                context.push_str(&format!(", giá: {:.0}đ", price));
            }
            context.push_str(&format!(" — độ liên quan {:.2}\n", m.similarity));
        }
        context
    }
}

fn truncate_last_char(keyword: &str) -> String {
    let mut chars: Vec<char> = keyword.chars().collect();
    if chars.len() > 1 {
        chars.pop();
    }
    chars.into_iter().collect()
}

fn row_to_match(row: ProductRow, similarity: f32, source: MatchSource) -> ProductMatch {
    ProductMatch {
        product_id: row.product_id,
        product_name: row.product_name,
        category_id: row.category_id,
        category_name: row.category_name,
        price: row.price,
        similarity,
        source,
    }
}

fn hit_to_match(hit: VectorHit, source: MatchSource) -> Option<ProductMatch> {
    let meta = &hit.metadata;
    let product_id = meta.get("product_id")?.clone();
    let product_name = meta.get("product_name")?.clone();
    Some(ProductMatch {
        product_id,
        product_name,
        category_id: meta.get("category_id").cloned().unwrap_or_default(),
        category_name: meta.get("category_name").cloned().unwrap_or_default(),
        price: meta.get("price").and_then(|p| p.parse().ok()),
        similarity: (1.0 - hit.distance).clamp(0.0, 1.0),
        source,
    })
}
