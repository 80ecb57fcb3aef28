//! Tool executor: plans and runs structured-data function calls.
//!
//! Planning is a deterministic decision table over the classified intent and
//! the state accumulated so far; execution isolates each call so one failing
//! tool never poisons the others.

use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use regex::Regex;
use serde_json::{Value, json};

use crate::cache::{TtlCache, hash_key};
use crate::gateway::{MonthlyRevenue, StructuredStore};
use crate::lexicon::Lexicon;
use crate::state::{IntentKind, PipelineState, ToolCall, ToolOutcome};

/// Order codes as customers type them: "DH123", "MDH00045", "#1234" or a
/// bare numeric id.
static ORDER_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b((?:dh|mdh|#)?\d{3,})\b").expect("valid order-code pattern")
});

/// Query vocabulary that justifies an aggregate revenue call when no
/// specific product is on the table.
const AGGREGATE_REVENUE_TERMS: &[&str] = &[
    "doanh thu",
    "doanh so",
    "thống kê",
    "thong ke",
    "tổng",
    "tong",
    "revenue",
    "sales",
];

pub struct ToolExecutor {
    lexicon: Arc<Lexicon>,
    structured: Arc<dyn StructuredStore>,
    /// TTL cache over call results; statistics queries repeat within a
    /// session and the underlying aggregates change slowly.
    cache: Option<Mutex<TtlCache<String, Value>>>,
    verbose: bool,
}

impl ToolExecutor {
    pub fn new(
        lexicon: Arc<Lexicon>,
        structured: Arc<dyn StructuredStore>,
        cache_ttl: Option<Duration>,
        verbose: bool,
    ) -> Self {
        let cache = cache_ttl.map(|ttl| Mutex::new(TtlCache::new(ttl)));
        Self {
            lexicon,
            structured,
            cache,
            verbose,
        }
    }

    /// Decision table mapping intent + accumulated state to tool calls.
    /// Returns an empty plan when nothing applies; the orchestrator treats
    /// that as "no tool stage needed".
    pub fn plan(&self, state: &PipelineState) -> Vec<ToolCall> {
        let mut calls = Vec::new();
        let knowledge_product = state.knowledge_results.first();

        if self.wants(state, IntentKind::SalesStatistics) {
            match knowledge_product {
                Some(product) => calls.push(ToolCall::MonthlyRevenueByProduct {
                    product_id: product.product_id.clone(),
                }),
                None => {
                    let normalized = self.lexicon.normalize(&state.query);
                    if AGGREGATE_REVENUE_TERMS
                        .iter()
                        .any(|t| normalized.contains(t))
                    {
                        calls.push(ToolCall::MonthlyRevenueTotal);
                    }
                }
            }
        }

        if self.wants(state, IntentKind::ProductDetail)
            && let Some(product) = knowledge_product
        {
            calls.push(ToolCall::ProductDetail {
                product_id: product.product_id.clone(),
            });
        }

        if self.wants(state, IntentKind::OrderStatus)
            && let Some(code) = extract_order_code(&state.original_query)
        {
            calls.push(ToolCall::OrderStatus { order_code: code });
        }

        calls
    }

    fn wants(&self, state: &PipelineState, kind: IntentKind) -> bool {
        state.intent.kind == kind
            || state.intent.primary_intent == Some(kind)
            || state.intent.secondary_intents.contains(&kind)
    }

    /// Execute a plan. A failed call is logged and excluded from the
    /// outcomes; the remaining calls still run.
    pub async fn execute(&self, calls: &[ToolCall]) -> Vec<ToolOutcome> {
        let mut outcomes = Vec::new();
        for call in calls {
            match self.execute_one(call).await {
                Ok(result) => outcomes.push(ToolOutcome {
                    call: call.clone(),
                    result,
                }),
                Err(e) => {
                    eprintln!("⚠️ Tool call {} failed, skipping: {}", call.function_name(), e);
                }
            }
        }
        outcomes
    }

    async fn execute_one(&self, call: &ToolCall) -> anyhow::Result<Value> {
        let cache_key = hash_key(&format!("{}:{}", call.function_name(), call.arguments()));
        if let Some(cache) = &self.cache
            && let Ok(mut guard) = cache.lock()
            && let Some(hit) = guard.get(&cache_key)
        {
            return Ok(hit);
        }
        if self.verbose {
            println!("   🔧 Running tool {}", call.function_name());
        }

        let result = match call {
            ToolCall::MonthlyRevenueByProduct { product_id } => {
                let months = self
                    .structured
                    .monthly_revenue_by_product(product_id)
                    .await?;
                json!({ "product_id": product_id, "months": months })
            }
            ToolCall::MonthlyRevenueTotal => {
                let months = self.structured.monthly_revenue_total().await?;
                json!({ "months": months })
            }
            ToolCall::ProductDetail { product_id } => {
                match self.structured.product_by_id(product_id).await? {
                    Some(row) => json!({
                        "found": true,
                        "product_id": row.product_id,
                        "product_name": row.product_name,
                        "category_name": row.category_name,
                        "price": row.price,
                        "description": row.description,
                    }),
                    None => json!({ "found": false, "product_id": product_id }),
                }
            }
            ToolCall::OrderStatus { order_code } => {
                match self.structured.order_status(order_code).await? {
                    Some(row) => json!({
                        "found": true,
                        "order_code": row.order_code,
                        "status": row.status,
                        "expected_delivery": row.expected_delivery,
                        "total": row.total,
                    }),
                    None => json!({ "found": false, "order_code": order_code }),
                }
            }
        };

        if let Some(cache) = &self.cache
            && let Ok(mut guard) = cache.lock()
        {
            guard.put(cache_key, result.clone());
        }
        Ok(result)
    }

    /// Render tool outcomes as context text for synthesis. Revenue series
    /// get a month-by-month table plus a best-month highlight.
    pub fn format_context(&self, outcomes: &[ToolOutcome]) -> String {
        let mut context = String::new();
        for outcome in outcomes {
            match &outcome.call {
                ToolCall::MonthlyRevenueByProduct { product_id } => {
                    context.push_str(&format!("Doanh thu theo tháng (mã {}):\n", product_id));
                    context.push_str(&render_months(&outcome.result));
                }
                ToolCall::MonthlyRevenueTotal => {
                    context.push_str("Tổng doanh thu theo tháng:\n");
                    context.push_str(&render_months(&outcome.result));
                }
                ToolCall::ProductDetail { .. } => {
                    if outcome.result["found"].as_bool().unwrap_or(false) {
                        context.push_str(&format!(
                            "Chi tiết sản phẩm {}: {}",
                            outcome.result["product_name"].as_str().unwrap_or(""),
                            outcome.result["description"].as_str().unwrap_or("(không có mô tả)"),
                        ));
                        if let Some(price) = outcome.result["price"].as_f64() {
                            context.push_str(&format!(", giá {:.0}đ", price));
                        }
                        context.push('\n');
                    } else {
                        context.push_str("Không tìm thấy chi tiết sản phẩm.\n");
                    }
                }
                ToolCall::OrderStatus { order_code } => {
                    if outcome.result["found"].as_bool().unwrap_or(false) {
                        context.push_str(&format!(
                            "Đơn hàng {}: {}",
                            order_code,
                            outcome.result["status"].as_str().unwrap_or("không rõ"),
                        ));
                        if let Some(eta) = outcome.result["expected_delivery"].as_str() {
                            context.push_str(&format!(", dự kiến giao {}", eta));
                        }
                        context.push('\n');
                    } else {
                        context.push_str(&format!("Không tìm thấy đơn hàng {}.\n", order_code));
                    }
                }
            }
        }
        context
    }
}

fn render_months(result: &Value) -> String {
    let months: Vec<MonthlyRevenue> = result
        .get("months")
        .and_then(|m| serde_json::from_value(m.clone()).ok())
        .unwrap_or_default();
    if months.is_empty() {
        return "  (chưa có dữ liệu doanh thu)\n".to_string();
    }
    let mut text = String::new();
    for m in &months {
        text.push_str(&format!(
            "  {}: {:.0}đ ({} đơn)\n",
            m.month, m.revenue, m.order_count
        ));
    }
    if let Some(best) = months.iter().max_by(|a, b| {
        a.revenue
            .partial_cmp(&b.revenue)
            .unwrap_or(std::cmp::Ordering::Equal)
    }) {
        text.push_str(&format!(
            "  Tháng cao nhất: {} với {:.0}đ\n",
            best.month, best.revenue
        ));
    }
    text
}

/// Pull an order code out of free text, normalizing away the "#" prefix
pub fn extract_order_code(query: &str) -> Option<String> {
    ORDER_CODE_RE
        .captures(query)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_start_matches('#').to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{OrderRow, ProductRow, StructuredError};
    use crate::state::{IntentClassification, MatchSource, ProductMatch, QueryType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StatsStore {
        revenue_calls: AtomicUsize,
        fail_order_lookup: bool,
    }

    #[async_trait]
    impl StructuredStore for StatsStore {
        async fn products_matching(&self, _: &str) -> Result<Vec<ProductRow>, StructuredError> {
            Ok(vec![])
        }
        async fn products_matching_fuzzy(
            &self,
            _: &str,
        ) -> Result<Vec<ProductRow>, StructuredError> {
            Ok(vec![])
        }
        async fn product_by_id(&self, id: &str) -> Result<Option<ProductRow>, StructuredError> {
            Ok(Some(ProductRow {
                product_id: id.to_string(),
                product_name: "Cá hồi phi lê".to_string(),
                category_id: "C1".to_string(),
                category_name: "Hải sản".to_string(),
                price: Some(250_000.0),
                description: Some("Cá hồi tươi".to_string()),
            }))
        }
        async fn monthly_revenue_by_product(
            &self,
            _: &str,
        ) -> Result<Vec<MonthlyRevenue>, StructuredError> {
            self.revenue_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                MonthlyRevenue {
                    month: "2025-01".to_string(),
                    revenue: 12_000_000.0,
                    order_count: 34,
                },
                MonthlyRevenue {
                    month: "2025-02".to_string(),
                    revenue: 18_500_000.0,
                    order_count: 51,
                },
            ])
        }
        async fn monthly_revenue_total(&self) -> Result<Vec<MonthlyRevenue>, StructuredError> {
            Ok(vec![MonthlyRevenue {
                month: "2025-01".to_string(),
                revenue: 90_000_000.0,
                order_count: 400,
            }])
        }
        async fn order_status(&self, code: &str) -> Result<Option<OrderRow>, StructuredError> {
            if self.fail_order_lookup {
                return Err(StructuredError::Connection("db down".into()));
            }
            Ok(Some(OrderRow {
                order_code: code.to_string(),
                status: "đang giao".to_string(),
                expected_delivery: Some("2025-03-02".to_string()),
                total: Some(450_000.0),
            }))
        }
        async fn any_product_like(&self, _: &str) -> Result<bool, StructuredError> {
            Ok(true)
        }
    }

    fn executor(store: Arc<StatsStore>, ttl: Option<Duration>) -> ToolExecutor {
        ToolExecutor::new(Arc::new(Lexicon::new()), store, ttl, false)
    }

    fn stats_state(query: &str, with_product: bool) -> PipelineState {
        let mut state = PipelineState::new(query, QueryType::Text);
        state.intent = IntentClassification {
            kind: IntentKind::SalesStatistics,
            confidence: 0.9,
            ..Default::default()
        };
        if with_product {
            state.knowledge_results.push(ProductMatch {
                product_id: "SP001".to_string(),
                product_name: "Cá hồi phi lê".to_string(),
                category_id: "C1".to_string(),
                category_name: "Hải sản".to_string(),
                price: Some(250_000.0),
                similarity: 1.0,
                source: MatchSource::SqlExactMatch,
            });
        }
        state
    }

    #[test]
    fn test_plan_revenue_by_product_when_knowledge_has_id() {
        let store = Arc::new(StatsStore {
            revenue_calls: AtomicUsize::new(0),
            fail_order_lookup: false,
        });
        let plan = executor(store, None).plan(&stats_state("doanh thu cá hồi theo tháng", true));
        assert_eq!(
            plan,
            vec![ToolCall::MonthlyRevenueByProduct {
                product_id: "SP001".to_string()
            }]
        );
    }

    #[test]
    fn test_plan_falls_back_to_total_revenue() {
        let store = Arc::new(StatsStore {
            revenue_calls: AtomicUsize::new(0),
            fail_order_lookup: false,
        });
        let plan = executor(store, None).plan(&stats_state("tổng doanh thu theo tháng", false));
        assert_eq!(plan, vec![ToolCall::MonthlyRevenueTotal]);
    }

    #[test]
    fn test_plan_order_status_extracts_code() {
        let store = Arc::new(StatsStore {
            revenue_calls: AtomicUsize::new(0),
            fail_order_lookup: false,
        });
        let mut state = PipelineState::new("đơn hàng DH123 giao chưa", QueryType::Text);
        state.intent.kind = IntentKind::OrderStatus;
        let plan = executor(store, None).plan(&state);
        assert_eq!(
            plan,
            vec![ToolCall::OrderStatus {
                order_code: "DH123".to_string()
            }]
        );
    }

    #[test]
    fn test_extract_order_code_variants() {
        assert_eq!(extract_order_code("đơn DH123"), Some("DH123".to_string()));
        assert_eq!(extract_order_code("mã #4567 ạ"), Some("4567".to_string()));
        assert_eq!(
            extract_order_code("mdh00045 tới chưa"),
            Some("MDH00045".to_string())
        );
        assert_eq!(extract_order_code("chưa có mã"), None);
    }

    #[tokio::test]
    async fn test_execute_isolates_failures() {
        let store = Arc::new(StatsStore {
            revenue_calls: AtomicUsize::new(0),
            fail_order_lookup: true,
        });
        let calls = vec![
            ToolCall::OrderStatus {
                order_code: "DH123".to_string(),
            },
            ToolCall::MonthlyRevenueTotal,
        ];
        let outcomes = executor(store, None).execute(&calls).await;
        // Failing order lookup excluded, revenue call still ran
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].call, ToolCall::MonthlyRevenueTotal);
    }

    #[tokio::test]
    async fn test_ttl_cache_skips_second_call() {
        let store = Arc::new(StatsStore {
            revenue_calls: AtomicUsize::new(0),
            fail_order_lookup: false,
        });
        let ex = executor(store.clone(), Some(Duration::from_secs(60)));
        let calls = vec![ToolCall::MonthlyRevenueByProduct {
            product_id: "SP001".to_string(),
        }];
        ex.execute(&calls).await;
        ex.execute(&calls).await;
        assert_eq!(store.revenue_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_format_context_highlights_best_month() {
        let store = Arc::new(StatsStore {
            revenue_calls: AtomicUsize::new(0),
            fail_order_lookup: false,
        });
        let ex = executor(store, None);
        let outcomes = ex
            .execute(&[ToolCall::MonthlyRevenueByProduct {
                product_id: "SP001".to_string(),
            }])
            .await;
        let context = ex.format_context(&outcomes);
        assert!(context.contains("2025-02"));
        assert!(context.contains("Tháng cao nhất: 2025-02"));
    }
}
