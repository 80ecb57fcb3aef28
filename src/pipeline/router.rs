//! Intent router: classifies a raw query into one or more intents,
//! decomposes multi-intent queries into per-intent sub-queries and decides
//! which downstream agents are needed.

use std::collections::HashMap;
use std::sync::Arc;

use crate::lexicon::Lexicon;
use crate::state::{IntentClassification, IntentKind, QueryType, ScoredIntent};

/// Ordered pattern rules. Each intent carries a fixed confidence weight;
/// earlier rules win ties through stable sorting.
const INTENT_RULES: &[(IntentKind, &[&str], f32)] = &[
    (
        IntentKind::Greeting,
        &["xin chào", "chào shop", "hello", "hi shop"],
        0.95,
    ),
    (
        IntentKind::OrderStatus,
        &[
            "đơn hàng",
            "don hang",
            "tình trạng đơn",
            "tinh trang don",
            "giao hàng",
            "giao hang",
            "theo dõi đơn",
            "order status",
            "tracking",
        ],
        0.9,
    ),
    (
        IntentKind::SalesStatistics,
        &[
            "doanh thu",
            "doanh so",
            "thống kê",
            "thong ke",
            "báo cáo",
            "bao cao",
            "theo tháng",
            "theo thang",
            "revenue",
            "sales report",
        ],
        0.9,
    ),
    (
        IntentKind::ProductDetail,
        &[
            "giá bao nhiêu",
            "gia bao nhieu",
            "bao nhiêu tiền",
            "thông tin sản phẩm",
            "thong tin san pham",
            "chi tiết",
            "chi tiet",
            "mô tả",
            "mo ta",
            "price",
        ],
        0.8,
    ),
    (
        IntentKind::ProductSearch,
        &[
            "mua",
            "tìm",
            "tim",
            "có bán",
            "co ban",
            "sản phẩm",
            "san pham",
            "còn hàng",
            "con hang",
            "buy",
            "find",
        ],
        0.85,
    ),
];

/// Weight assigned to a product-search intent inferred from a synonym-table
/// entity mention rather than an explicit keyword.
const ENTITY_MENTION_WEIGHT: f32 = 0.85;

/// Stats tokens naming the metric itself; the remaining stats tokens are
/// time/grouping qualifiers. Used to rebuild the statistics sub-query as
/// "<metric> <entity> <qualifiers>".
const METRIC_HEAD_TERMS: &[&str] = &[
    "doanh", "thu", "thống", "kê", "thong", "ke", "báo", "cáo", "bao", "cao", "tổng", "tong",
    "revenue", "sales", "total",
];

/// Connective words splitting a multi-intent query into fragments
const CONNECTIVE_TOKENS: &[&str] = &["và", "va", "của", "cua", "and"];

/// Which agents a query needs, and in which order
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingDecision {
    pub use_knowledge: bool,
    pub use_tool: bool,
    pub use_reasoning: bool,
    pub priority: Vec<AgentStage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStage {
    Knowledge,
    Tool,
    Reasoning,
}

/// Full routing output for one query
#[derive(Debug, Clone)]
pub struct RoutedIntent {
    pub classification: IntentClassification,
    pub sub_queries: HashMap<String, String>,
    pub decision: RoutingDecision,
}

pub struct IntentRouter {
    lexicon: Arc<Lexicon>,
}

impl IntentRouter {
    pub fn new(lexicon: Arc<Lexicon>) -> Self {
        Self { lexicon }
    }

    /// Classify and route. Never hard-fails: an unrecognized intent falls
    /// back to the "try knowledge retrieval + reasoning" default policy.
    pub fn route(&self, query: &str, query_type: QueryType) -> RoutedIntent {
        let classification = self.classify(query, query_type);
        let sub_queries = if classification.is_multi() {
            self.decompose(query, &classification)
        } else {
            HashMap::new()
        };
        let decision = self.decide(&classification, query_type);
        RoutedIntent {
            classification,
            sub_queries,
            decision,
        }
    }

    /// Apply the ordered pattern rules; two or more matches produce a
    /// multi-intent classification with a primary and secondaries.
    pub fn classify(&self, query: &str, query_type: QueryType) -> IntentClassification {
        let normalized = self.lexicon.normalize(query);
        let mut matched: Vec<ScoredIntent> = Vec::new();

        for (kind, keywords, weight) in INTENT_RULES {
            if keywords.iter().any(|kw| normalized.contains(kw)) {
                matched.push(ScoredIntent {
                    kind: *kind,
                    confidence: *weight,
                });
            }
        }

        // A bare product mention ("cá hồi tươi") is a product search even
        // without an explicit search keyword.
        if !matched.iter().any(|m| m.kind == IntentKind::ProductSearch)
            && self.mentions_product(query)
        {
            matched.push(ScoredIntent {
                kind: IntentKind::ProductSearch,
                confidence: ENTITY_MENTION_WEIGHT,
            });
        }

        if matches!(query_type, QueryType::Image) {
            matched.push(ScoredIntent {
                kind: IntentKind::ImageSearch,
                confidence: 0.9,
            });
        }

        matched.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        match matched.len() {
            0 => IntentClassification {
                kind: IntentKind::Unknown,
                confidence: 0.3,
                matched,
                primary_intent: None,
                secondary_intents: Vec::new(),
            },
            1 => IntentClassification {
                kind: matched[0].kind,
                confidence: matched[0].confidence,
                matched,
                primary_intent: None,
                secondary_intents: Vec::new(),
            },
            _ => {
                let primary = matched[0].kind;
                let secondary: Vec<IntentKind> =
                    matched[1..].iter().map(|m| m.kind).collect();
                IntentClassification {
                    kind: IntentKind::MultiIntent,
                    confidence: matched[0].confidence,
                    matched,
                    primary_intent: Some(primary),
                    secondary_intents: secondary,
                }
            }
        }
    }

    /// True when the query mentions a synonym-table product entity
    fn mentions_product(&self, query: &str) -> bool {
        let tokens = self.lexicon.content_tokens(query);
        let non_stat: Vec<&String> = tokens
            .iter()
            .filter(|t| !self.lexicon.is_statistic_term(t))
            .collect();
        for window in non_stat.windows(2) {
            let phrase = format!("{} {}", window[0], window[1]);
            if self.lexicon.canonical_for(&phrase).is_some() {
                return true;
            }
        }
        non_stat
            .iter()
            .any(|t| self.lexicon.canonical_for(t).is_some())
    }

    /// Decompose a multi-intent query into per-intent sub-queries.
    ///
    /// Connective words ("và", "của") split the query into fragments first;
    /// a fragment carrying no statistics keyword is taken as product text
    /// wholesale, so a product name containing a statistics token ("cá thu")
    /// survives. Without a connective, every token is classified into the
    /// product or statistics keyword family instead. The statistics
    /// sub-query is rebuilt as metric head + product entity + time
    /// qualifiers so the entity survives in both.
    pub fn decompose(
        &self,
        query: &str,
        classification: &IntentClassification,
    ) -> HashMap<String, String> {
        let normalized = self.lexicon.normalize(query);
        let fragments = split_on_connectives(&normalized);
        let split = fragments.len() > 1;

        let mut product_tokens: Vec<String> = Vec::new();
        let mut metric_tokens: Vec<String> = Vec::new();
        let mut qualifier_tokens: Vec<String> = Vec::new();

        for fragment in &fragments {
            if split && !is_statistics_fragment(fragment) {
                // Product fragment: statistics tokens stay, they are part
                // of the name
                for token in fragment.split_whitespace() {
                    if !self.lexicon.is_stopword(token) && !self.lexicon.is_product_term(token) {
                        product_tokens.push(token.to_string());
                    }
                }
                continue;
            }
            for token in fragment.split_whitespace() {
                if self.lexicon.is_statistic_term(token) {
                    if METRIC_HEAD_TERMS.contains(&token) {
                        metric_tokens.push(token.to_string());
                    } else {
                        qualifier_tokens.push(token.to_string());
                    }
                } else if !self.lexicon.is_stopword(token) && !self.lexicon.is_product_term(token)
                {
                    product_tokens.push(token.to_string());
                }
            }
        }

        let entity = product_tokens.join(" ");
        let mut sub_queries = HashMap::new();

        let wants = |kind: IntentKind| {
            classification.primary_intent == Some(kind)
                || classification.secondary_intents.contains(&kind)
        };

        if (wants(IntentKind::ProductSearch)
            || wants(IntentKind::ProductDetail)
            || wants(IntentKind::ImageSearch))
            && !entity.is_empty()
        {
            sub_queries.insert(IntentKind::ProductSearch.as_str().to_string(), entity.clone());
        }

        if wants(IntentKind::SalesStatistics) && !metric_tokens.is_empty() {
            let mut parts: Vec<String> = metric_tokens;
            if !entity.is_empty() {
                parts.push(entity);
            }
            parts.extend(qualifier_tokens);
            sub_queries.insert(
                IntentKind::SalesStatistics.as_str().to_string(),
                parts.join(" "),
            );
        }

        sub_queries
    }

    /// Routing decision by table lookup on intent type, with two forced
    /// overrides: image/hybrid queries always require knowledge retrieval
    /// and multi-intent always requires reasoning.
    pub fn decide(
        &self,
        classification: &IntentClassification,
        query_type: QueryType,
    ) -> RoutingDecision {
        let (mut use_knowledge, use_tool, mut use_reasoning) = match classification.kind {
            IntentKind::ProductSearch => (true, false, true),
            IntentKind::ProductDetail => (true, true, true),
            IntentKind::SalesStatistics => (true, true, true),
            IntentKind::OrderStatus => (false, true, true),
            IntentKind::ImageSearch => (true, false, true),
            IntentKind::Greeting => (false, false, true),
            IntentKind::MultiIntent => (true, true, true),
            // Default policy: try knowledge retrieval + reasoning
            IntentKind::Unknown => (true, false, true),
        };

        if matches!(query_type, QueryType::Image | QueryType::Hybrid) {
            use_knowledge = true;
        }
        if classification.is_multi() {
            use_reasoning = true;
        }

        let mut priority = Vec::new();
        if use_knowledge {
            priority.push(AgentStage::Knowledge);
        }
        if use_tool {
            priority.push(AgentStage::Tool);
        }
        if use_reasoning {
            priority.push(AgentStage::Reasoning);
        }

        RoutingDecision {
            use_knowledge,
            use_tool,
            use_reasoning,
            priority,
        }
    }
}

/// Split a normalized query on connective tokens, dropping empty fragments
fn split_on_connectives(normalized: &str) -> Vec<String> {
    let mut fragments: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for token in normalized.split_whitespace() {
        if CONNECTIVE_TOKENS.contains(&token) {
            if !current.is_empty() {
                fragments.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(token);
        }
    }
    if !current.is_empty() {
        fragments.push(current.join(" "));
    }
    fragments
}

/// True when the fragment carries a sales-statistics keyword phrase
fn is_statistics_fragment(fragment: &str) -> bool {
    INTENT_RULES
        .iter()
        .find(|(kind, _, _)| *kind == IntentKind::SalesStatistics)
        .map(|(_, keywords, _)| keywords.iter().any(|kw| fragment.contains(kw)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> IntentRouter {
        IntentRouter::new(Arc::new(Lexicon::new()))
    }

    #[test]
    fn test_single_intent_product_search() {
        let routed = router().route("tôi muốn mua cá hồi", QueryType::Text);
        assert_eq!(routed.classification.kind, IntentKind::ProductSearch);
        assert!(routed.decision.use_knowledge);
        assert!(!routed.decision.use_tool);
    }

    #[test]
    fn test_bare_entity_mention_is_product_search() {
        let routed = router().route("cá hồi tươi", QueryType::Text);
        assert_eq!(routed.classification.kind, IntentKind::ProductSearch);
    }

    #[test]
    fn test_sales_statistics_intent() {
        let routed = router().route("doanh thu theo tháng", QueryType::Text);
        assert_eq!(routed.classification.kind, IntentKind::SalesStatistics);
        assert!(routed.decision.use_tool);
    }

    #[test]
    fn test_multi_intent_primary_and_secondary() {
        let c = router().classify("hình ảnh cá hồi và doanh thu theo tháng", QueryType::Text);
        assert_eq!(c.kind, IntentKind::MultiIntent);
        assert_eq!(c.primary_intent, Some(IntentKind::SalesStatistics));
        assert!(c.secondary_intents.contains(&IntentKind::ProductSearch));
    }

    #[test]
    fn test_multi_intent_decomposition_scenario() {
        // "image of salmon and monthly revenue"
        let r = router();
        let c = r.classify("hình ảnh cá hồi và doanh thu theo tháng", QueryType::Text);
        let subs = r.decompose("hình ảnh cá hồi và doanh thu theo tháng", &c);
        assert_eq!(subs.get("product_search").unwrap(), "cá hồi");
        assert_eq!(
            subs.get("sales_statistics").unwrap(),
            "doanh thu cá hồi theo tháng"
        );
    }

    #[test]
    fn test_connective_split_keeps_statistics_token_in_product_name() {
        // "cá thu" contains the statistics token "thu"; the connective
        // split must keep it whole inside the product fragment.
        let r = router();
        let c = r.classify("mua cá thu và doanh thu theo tháng", QueryType::Text);
        assert!(c.is_multi());
        let subs = r.decompose("mua cá thu và doanh thu theo tháng", &c);
        assert_eq!(subs.get("product_search").unwrap(), "cá thu");
        assert_eq!(
            subs.get("sales_statistics").unwrap(),
            "doanh thu cá thu theo tháng"
        );
    }

    #[test]
    fn test_split_on_connectives() {
        assert_eq!(
            split_on_connectives("hình ảnh cá hồi và doanh thu theo tháng"),
            vec!["hình ảnh cá hồi", "doanh thu theo tháng"]
        );
        assert_eq!(split_on_connectives("mua cá hồi"), vec!["mua cá hồi"]);
        assert!(split_on_connectives("và").is_empty());
    }

    #[test]
    fn test_unknown_intent_default_policy() {
        let routed = router().route("xyzzy", QueryType::Text);
        assert_eq!(routed.classification.kind, IntentKind::Unknown);
        assert!(routed.decision.use_knowledge);
        assert!(routed.decision.use_reasoning);
        assert!(!routed.decision.use_tool);
    }

    #[test]
    fn test_image_query_forces_knowledge() {
        let r = router();
        let c = r.classify("", QueryType::Image);
        assert_eq!(c.kind, IntentKind::ImageSearch);
        let d = r.decide(&c, QueryType::Image);
        assert!(d.use_knowledge);
    }

    #[test]
    fn test_hybrid_override_on_greeting() {
        let r = router();
        let c = r.classify("xin chào", QueryType::Hybrid);
        let d = r.decide(&c, QueryType::Hybrid);
        assert!(d.use_knowledge, "hybrid queries always retrieve knowledge");
    }

    #[test]
    fn test_multi_intent_forces_reasoning() {
        let r = router();
        let c = r.classify("mua cá hồi và doanh thu theo tháng", QueryType::Text);
        assert!(c.is_multi());
        let d = r.decide(&c, QueryType::Text);
        assert!(d.use_reasoning);
        assert!(d.use_tool);
        assert!(d.use_knowledge);
    }

    #[test]
    fn test_order_status_intent() {
        let routed = router().route("đơn hàng DH123 giao chưa", QueryType::Text);
        assert_eq!(routed.classification.kind, IntentKind::OrderStatus);
        assert!(routed.decision.use_tool);
        assert!(!routed.decision.use_knowledge);
    }
}
