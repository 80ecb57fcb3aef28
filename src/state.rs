//! Shared pipeline state threaded through every agent stage.
//!
//! The state is created per incoming query, mutated additively by each
//! stage and discarded after the response is returned. An agent may read
//! keys written by earlier agents but must never silently erase fields it
//! does not own; the orchestrator detects such wipes via snapshots and
//! repairs them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Kind of the incoming query
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryType {
    #[serde(rename = "text")]
    #[default]
    Text,
    #[serde(rename = "image")]
    Image,
    #[serde(rename = "hybrid")]
    Hybrid,
    #[serde(rename = "chat")]
    Chat,
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryType::Text => write!(f, "text"),
            QueryType::Image => write!(f, "image"),
            QueryType::Hybrid => write!(f, "hybrid"),
            QueryType::Chat => write!(f, "chat"),
        }
    }
}

/// Classified purpose of a user query
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IntentKind {
    #[serde(rename = "product_search")]
    ProductSearch,
    #[serde(rename = "product_detail")]
    ProductDetail,
    #[serde(rename = "sales_statistics")]
    SalesStatistics,
    #[serde(rename = "order_status")]
    OrderStatus,
    #[serde(rename = "image_search")]
    ImageSearch,
    #[serde(rename = "greeting")]
    Greeting,
    #[serde(rename = "multi_intent")]
    MultiIntent,
    #[serde(rename = "unknown")]
    #[default]
    Unknown,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::ProductSearch => "product_search",
            IntentKind::ProductDetail => "product_detail",
            IntentKind::SalesStatistics => "sales_statistics",
            IntentKind::OrderStatus => "order_status",
            IntentKind::ImageSearch => "image_search",
            IntentKind::Greeting => "greeting",
            IntentKind::MultiIntent => "multi_intent",
            IntentKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One matched intent with its fixed confidence weight
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct ScoredIntent {
    pub kind: IntentKind,
    pub confidence: f32,
}

/// Intent classification result, single or multi-intent
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct IntentClassification {
    pub kind: IntentKind,
    pub confidence: f32,
    /// All intents that matched, highest confidence first
    pub matched: Vec<ScoredIntent>,
    pub primary_intent: Option<IntentKind>,
    pub secondary_intents: Vec<IntentKind>,
}

impl IntentClassification {
    pub fn is_multi(&self) -> bool {
        self.kind == IntentKind::MultiIntent
    }
}

/// Origin of a product match
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    #[serde(rename = "sql_exact_match")]
    SqlExactMatch,
    #[serde(rename = "sql_fuzzy_match")]
    SqlFuzzyMatch,
    #[serde(rename = "text_search")]
    TextSearch,
    #[serde(rename = "image_search")]
    ImageSearch,
}

/// One candidate product. `similarity` is comparable across sources:
/// structured matches carry a ceiling score, vector matches `1 - distance`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProductMatch {
    pub product_id: String,
    pub product_name: String,
    pub category_id: String,
    pub category_name: String,
    pub price: Option<f64>,
    pub similarity: f32,
    pub source: MatchSource,
}

/// Deduplicate by `product_id`, keeping the highest-similarity instance,
/// sorted descending by similarity.
pub fn dedupe_by_max_similarity(matches: Vec<ProductMatch>) -> Vec<ProductMatch> {
    let mut best: HashMap<String, ProductMatch> = HashMap::new();
    for m in matches {
        match best.get(&m.product_id) {
            Some(existing) if existing.similarity >= m.similarity => {}
            _ => {
                best.insert(m.product_id.clone(), m);
            }
        }
    }
    let mut merged: Vec<ProductMatch> = best.into_values().collect();
    merged.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    merged
}

/// A structured-data function invocation, typed instead of stringly-named
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(tag = "function", rename_all = "snake_case")]
pub enum ToolCall {
    MonthlyRevenueByProduct { product_id: String },
    MonthlyRevenueTotal,
    ProductDetail { product_id: String },
    OrderStatus { order_code: String },
}

impl ToolCall {
    pub fn function_name(&self) -> &'static str {
        match self {
            ToolCall::MonthlyRevenueByProduct { .. } => "monthly_revenue_by_product",
            ToolCall::MonthlyRevenueTotal => "monthly_revenue_total",
            ToolCall::ProductDetail { .. } => "product_detail",
            ToolCall::OrderStatus { .. } => "order_status",
        }
    }

    pub fn arguments(&self) -> Value {
        match self {
            ToolCall::MonthlyRevenueByProduct { product_id } => {
                serde_json::json!({ "product_id": product_id })
            }
            ToolCall::MonthlyRevenueTotal => serde_json::json!({}),
            ToolCall::ProductDetail { product_id } => {
                serde_json::json!({ "product_id": product_id })
            }
            ToolCall::OrderStatus { order_code } => {
                serde_json::json!({ "order_code": order_code })
            }
        }
    }
}

/// Result of one executed tool call
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ToolOutcome {
    pub call: ToolCall,
    pub result: Value,
}

/// Snapshot of `knowledge_results` taken around the tool and synthesis
/// stages, used for consistency repair.
#[derive(Debug, Clone)]
pub struct KnowledgeSnapshot {
    results: Vec<ProductMatch>,
}

impl KnowledgeSnapshot {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Shared pipeline state
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct PipelineState {
    pub request_id: Uuid,
    /// Current (possibly sub-query-substituted) query text
    pub query: String,
    /// Backup preserved during sub-query substitution
    pub original_query: String,
    pub query_type: QueryType,
    pub intent: IntentClassification,
    /// Decomposed per-intent query fragments, keyed by intent name
    pub sub_queries: HashMap<String, String>,
    pub resolved_entity: Option<String>,
    pub entity_normalized: Option<String>,
    pub entity_validated: bool,
    pub knowledge_results: Vec<ProductMatch>,
    pub knowledge_context: String,
    pub tool_results: Vec<ToolOutcome>,
    pub tool_context: String,
    pub reasoning_context: String,
    pub final_answer: String,
    pub answer_confidence: f32,
    pub critic_score: Option<f32>,
    pub has_hallucination: bool,
    pub final_answer_verified: Option<String>,
    pub entity_not_found: bool,
    pub early_return: bool,
    pub early_return_message: Option<String>,
    pub needs_knowledge_agent: bool,
    pub needs_tool_agent: bool,
    pub needs_reasoning: bool,
    pub error: Option<String>,
}

impl PipelineState {
    pub fn new(query: &str, query_type: QueryType) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            query: query.to_string(),
            original_query: query.to_string(),
            query_type,
            ..Default::default()
        }
    }

    /// Capture the current knowledge results for later repair checks
    pub fn snapshot_knowledge(&self) -> KnowledgeSnapshot {
        KnowledgeSnapshot {
            results: self.knowledge_results.clone(),
        }
    }

    /// Restore knowledge results from a snapshot (explicit, logged repair)
    pub fn restore_knowledge(&mut self, snapshot: &KnowledgeSnapshot) {
        self.knowledge_results = snapshot.results.clone();
    }

    pub fn max_similarity(&self) -> f32 {
        self.knowledge_results
            .iter()
            .map(|m| m.similarity)
            .fold(0.0, f32::max)
    }

    /// A product id visible in tool results even when knowledge_results is
    /// empty. Drives consistency repair #1.
    pub fn tool_visible_product_id(&self) -> Option<String> {
        for outcome in &self.tool_results {
            if let Some(id) = outcome.result.get("product_id").and_then(Value::as_str)
                && !id.is_empty()
            {
                return Some(id.to_string());
            }
            if let Some(id) = outcome
                .call
                .arguments()
                .get("product_id")
                .and_then(Value::as_str)
                && !id.is_empty()
            {
                return Some(id.to_string());
            }
        }
        None
    }

    /// Merge the parallel tool and reasoning branch states back into `self`.
    ///
    /// Deterministic order: the tool branch's fields are applied first, then
    /// the reasoning branch's. When both branches wrote the same field, the
    /// last-merged (reasoning) value wins.
    pub fn merge_parallel(&mut self, tool_branch: PipelineState, reasoning_branch: PipelineState) {
        self.tool_results = tool_branch.tool_results;
        self.tool_context = tool_branch.tool_context;
        if tool_branch.knowledge_results != self.knowledge_results {
            self.knowledge_results = tool_branch.knowledge_results;
        }
        self.reasoning_context = reasoning_branch.reasoning_context;
        if reasoning_branch.knowledge_results != self.knowledge_results {
            self.knowledge_results = reasoning_branch.knowledge_results;
        }
    }
}

/// One pipeline request, independent of transport
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct QueryRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_filter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_critic: Option<bool>,
}

impl QueryRequest {
    pub fn text(query: &str) -> Self {
        Self {
            query: query.to_string(),
            ..Default::default()
        }
    }

    pub fn query_type(&self) -> QueryType {
        match (self.image.is_some(), !self.query.trim().is_empty()) {
            (true, true) => QueryType::Hybrid,
            (true, false) => QueryType::Image,
            (false, _) => QueryType::Text,
        }
    }
}

/// The pipeline's answer plus supporting data
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QueryResponse {
    pub request_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub final_answer: String,
    pub query_type: QueryType,
    pub intent: IntentClassification,
    pub knowledge_results: Vec<ProductMatch>,
    pub tool_results: Vec<ToolOutcome>,
    pub answer_confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critic_score: Option<f32>,
    pub has_hallucination: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResponse {
    pub fn from_state(state: PipelineState) -> Self {
        Self {
            request_id: state.request_id,
            generated_at: Utc::now(),
            final_answer: state
                .final_answer_verified
                .clone()
                .unwrap_or(state.final_answer),
            query_type: state.query_type,
            intent: state.intent,
            knowledge_results: state.knowledge_results,
            tool_results: state.tool_results,
            answer_confidence: state.answer_confidence,
            critic_score: state.critic_score,
            has_hallucination: state.has_hallucination,
            error: state.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pm(id: &str, sim: f32, source: MatchSource) -> ProductMatch {
        ProductMatch {
            product_id: id.to_string(),
            product_name: format!("product {}", id),
            category_id: "C1".to_string(),
            category_name: "Hải sản".to_string(),
            price: Some(100_000.0),
            similarity: sim,
            source,
        }
    }

    #[test]
    fn test_dedupe_keeps_max_similarity() {
        let merged = dedupe_by_max_similarity(vec![
            pm("SP001", 0.6, MatchSource::TextSearch),
            pm("SP001", 0.9, MatchSource::SqlFuzzyMatch),
            pm("SP002", 0.7, MatchSource::TextSearch),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].product_id, "SP001");
        assert_eq!(merged[0].similarity, 0.9);
        assert_eq!(merged[1].product_id, "SP002");
    }

    #[test]
    fn test_dedupe_sorts_descending() {
        let merged = dedupe_by_max_similarity(vec![
            pm("a", 0.5, MatchSource::TextSearch),
            pm("b", 1.0, MatchSource::SqlExactMatch),
            pm("c", 0.7, MatchSource::TextSearch),
        ]);
        let sims: Vec<f32> = merged.iter().map(|m| m.similarity).collect();
        assert_eq!(sims, vec![1.0, 0.7, 0.5]);
    }

    #[test]
    fn test_snapshot_restore() {
        let mut state = PipelineState::new("cá hồi", QueryType::Text);
        state.knowledge_results = vec![
            pm("SP001", 1.0, MatchSource::SqlExactMatch),
            pm("SP002", 0.8, MatchSource::TextSearch),
            pm("SP003", 0.6, MatchSource::TextSearch),
        ];
        let snapshot = state.snapshot_knowledge();
        state.knowledge_results.clear();
        state.restore_knowledge(&snapshot);
        assert_eq!(state.knowledge_results.len(), 3);
        assert_eq!(state.knowledge_results[0].product_id, "SP001");
    }

    #[test]
    fn test_tool_visible_product_id() {
        let mut state = PipelineState::new("doanh thu", QueryType::Text);
        assert_eq!(state.tool_visible_product_id(), None);
        state.tool_results.push(ToolOutcome {
            call: ToolCall::MonthlyRevenueByProduct {
                product_id: "SP001".to_string(),
            },
            result: serde_json::json!({ "product_id": "SP001", "months": [] }),
        });
        assert_eq!(state.tool_visible_product_id(), Some("SP001".to_string()));
    }

    #[test]
    fn test_merge_parallel_order() {
        let mut base = PipelineState::new("q", QueryType::Text);
        base.knowledge_results = vec![pm("SP001", 1.0, MatchSource::SqlExactMatch)];

        let mut tool_branch = base.clone();
        tool_branch.tool_context = "tool".to_string();
        tool_branch.tool_results.push(ToolOutcome {
            call: ToolCall::MonthlyRevenueTotal,
            result: serde_json::json!({}),
        });

        let mut reasoning_branch = base.clone();
        reasoning_branch.reasoning_context = "reasoning".to_string();

        base.merge_parallel(tool_branch, reasoning_branch);
        assert_eq!(base.tool_context, "tool");
        assert_eq!(base.reasoning_context, "reasoning");
        assert_eq!(base.tool_results.len(), 1);
        assert_eq!(base.knowledge_results.len(), 1);
    }

    #[test]
    fn test_query_request_type() {
        assert_eq!(QueryRequest::text("hi").query_type(), QueryType::Text);
        let img = QueryRequest {
            query: String::new(),
            image: Some(vec![1, 2, 3]),
            ..Default::default()
        };
        assert_eq!(img.query_type(), QueryType::Image);
        let hybrid = QueryRequest {
            query: "cá hồi".to_string(),
            image: Some(vec![1]),
            ..Default::default()
        };
        assert_eq!(hybrid.query_type(), QueryType::Hybrid);
    }
}
