use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StructuredError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("all connection strategies failed: {0:?}")]
    AllStrategiesFailed(Vec<String>),
}

/// One product row from the structured store
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProductRow {
    pub product_id: String,
    pub product_name: String,
    pub category_id: String,
    pub category_name: String,
    pub price: Option<f64>,
    pub description: Option<String>,
}

/// Aggregated revenue for one month
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MonthlyRevenue {
    /// "YYYY-MM"
    pub month: String,
    pub revenue: f64,
    pub order_count: u64,
}

/// One order row from the structured store
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OrderRow {
    pub order_code: String,
    pub status: String,
    pub expected_delivery: Option<String>,
    pub total: Option<f64>,
}

/// Parameterized lookups/aggregations against relational product data.
///
/// Implementations acquire a scoped connection per call and release it when
/// done; the store is never held as a long-lived shared object.
#[async_trait]
pub trait StructuredStore: Send + Sync {
    /// Products whose name contains `pattern` (case-insensitive LIKE)
    async fn products_matching(&self, pattern: &str) -> Result<Vec<ProductRow>, StructuredError>;

    /// Broadened match over name and description, for typo-tolerant search
    async fn products_matching_fuzzy(
        &self,
        pattern: &str,
    ) -> Result<Vec<ProductRow>, StructuredError>;

    async fn product_by_id(&self, product_id: &str)
    -> Result<Option<ProductRow>, StructuredError>;

    async fn monthly_revenue_by_product(
        &self,
        product_id: &str,
    ) -> Result<Vec<MonthlyRevenue>, StructuredError>;

    async fn monthly_revenue_total(&self) -> Result<Vec<MonthlyRevenue>, StructuredError>;

    async fn order_status(&self, order_code: &str) -> Result<Option<OrderRow>, StructuredError>;

    /// Existence probe used by entity validation: any product name LIKE
    /// `%entity%`.
    async fn any_product_like(&self, entity: &str) -> Result<bool, StructuredError>;
}

/// Ordered list of connection strategies tried in sequence. The first
/// strategy that answers wins; failures are accumulated and returned typed
/// when every strategy is down.
pub struct StructuredFallback {
    strategies: Vec<Arc<dyn StructuredStore>>,
}

impl StructuredFallback {
    pub fn new(strategies: Vec<Arc<dyn StructuredStore>>) -> Self {
        Self { strategies }
    }

    async fn first_ok<'a, T, F>(&'a self, op: F) -> Result<T, StructuredError>
    where
        F: Fn(&'a dyn StructuredStore) -> BoxFuture<'a, Result<T, StructuredError>>,
    {
        let mut failures = Vec::new();
        for strategy in &self.strategies {
            match op(strategy.as_ref()).await {
                Ok(value) => return Ok(value),
                Err(e) => failures.push(e.to_string()),
            }
        }
        Err(StructuredError::AllStrategiesFailed(failures))
    }
}

#[async_trait]
impl StructuredStore for StructuredFallback {
    async fn products_matching(&self, pattern: &str) -> Result<Vec<ProductRow>, StructuredError> {
        self.first_ok(|s| Box::pin(s.products_matching(pattern)))
            .await
    }

    async fn products_matching_fuzzy(
        &self,
        pattern: &str,
    ) -> Result<Vec<ProductRow>, StructuredError> {
        self.first_ok(|s| Box::pin(s.products_matching_fuzzy(pattern)))
            .await
    }

    async fn product_by_id(
        &self,
        product_id: &str,
    ) -> Result<Option<ProductRow>, StructuredError> {
        self.first_ok(|s| Box::pin(s.product_by_id(product_id)))
            .await
    }

    async fn monthly_revenue_by_product(
        &self,
        product_id: &str,
    ) -> Result<Vec<MonthlyRevenue>, StructuredError> {
        self.first_ok(|s| Box::pin(s.monthly_revenue_by_product(product_id)))
            .await
    }

    async fn monthly_revenue_total(&self) -> Result<Vec<MonthlyRevenue>, StructuredError> {
        self.first_ok(|s| Box::pin(s.monthly_revenue_total())).await
    }

    async fn order_status(&self, order_code: &str) -> Result<Option<OrderRow>, StructuredError> {
        self.first_ok(|s| Box::pin(s.order_status(order_code)))
            .await
    }

    async fn any_product_like(&self, entity: &str) -> Result<bool, StructuredError> {
        self.first_ok(|s| Box::pin(s.any_product_like(entity)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingStore {
        calls: AtomicUsize,
    }

    struct HealthyStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl StructuredStore for FailingStore {
        async fn products_matching(&self, _: &str) -> Result<Vec<ProductRow>, StructuredError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StructuredError::Connection("driver A unavailable".into()))
        }
        async fn products_matching_fuzzy(
            &self,
            _: &str,
        ) -> Result<Vec<ProductRow>, StructuredError> {
            Err(StructuredError::Connection("driver A unavailable".into()))
        }
        async fn product_by_id(&self, _: &str) -> Result<Option<ProductRow>, StructuredError> {
            Err(StructuredError::Connection("driver A unavailable".into()))
        }
        async fn monthly_revenue_by_product(
            &self,
            _: &str,
        ) -> Result<Vec<MonthlyRevenue>, StructuredError> {
            Err(StructuredError::Connection("driver A unavailable".into()))
        }
        async fn monthly_revenue_total(&self) -> Result<Vec<MonthlyRevenue>, StructuredError> {
            Err(StructuredError::Connection("driver A unavailable".into()))
        }
        async fn order_status(&self, _: &str) -> Result<Option<OrderRow>, StructuredError> {
            Err(StructuredError::Connection("driver A unavailable".into()))
        }
        async fn any_product_like(&self, _: &str) -> Result<bool, StructuredError> {
            Err(StructuredError::Connection("driver A unavailable".into()))
        }
    }

    #[async_trait]
    impl StructuredStore for HealthyStore {
        async fn products_matching(&self, _: &str) -> Result<Vec<ProductRow>, StructuredError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }
        async fn products_matching_fuzzy(
            &self,
            _: &str,
        ) -> Result<Vec<ProductRow>, StructuredError> {
            Ok(vec![])
        }
        async fn product_by_id(&self, _: &str) -> Result<Option<ProductRow>, StructuredError> {
            Ok(None)
        }
        async fn monthly_revenue_by_product(
            &self,
            _: &str,
        ) -> Result<Vec<MonthlyRevenue>, StructuredError> {
            Ok(vec![])
        }
        async fn monthly_revenue_total(&self) -> Result<Vec<MonthlyRevenue>, StructuredError> {
            Ok(vec![])
        }
        async fn order_status(&self, _: &str) -> Result<Option<OrderRow>, StructuredError> {
            Ok(None)
        }
        async fn any_product_like(&self, _: &str) -> Result<bool, StructuredError> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_fallback_first_success_wins() {
        let failing = Arc::new(FailingStore {
            calls: AtomicUsize::new(0),
        });
        let healthy = Arc::new(HealthyStore {
            calls: AtomicUsize::new(0),
        });
        let fallback = StructuredFallback::new(vec![failing.clone(), healthy.clone()]);

        let rows = fallback.products_matching("cá").await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_accumulates_failures() {
        let fallback = StructuredFallback::new(vec![
            Arc::new(FailingStore {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(FailingStore {
                calls: AtomicUsize::new(0),
            }),
        ]);

        match fallback.products_matching("cá").await {
            Err(StructuredError::AllStrategiesFailed(failures)) => {
                assert_eq!(failures.len(), 2);
            }
            other => panic!("unexpected result: {:?}", other.map(|r| r.len())),
        }
    }
}
