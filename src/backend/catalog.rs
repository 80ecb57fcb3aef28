//! JSON-file catalog backend for the structured store.
//!
//! One strategy in the structured fallback chain. The whole catalog is
//! loaded once and queried in memory; lookups mirror the SQL LIKE
//! semantics the retriever expects.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::gateway::{MonthlyRevenue, OrderRow, ProductRow, StructuredError, StructuredStore};

/// One sales fact: revenue of a product in a calendar month
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SalesRecord {
    pub product_id: String,
    /// "YYYY-MM"
    pub month: String,
    pub revenue: f64,
    pub order_count: u64,
}

/// On-disk catalog document
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CatalogData {
    pub products: Vec<ProductRow>,
    #[serde(default)]
    pub monthly_sales: Vec<SalesRecord>,
    #[serde(default)]
    pub orders: Vec<OrderRow>,
}

pub struct JsonCatalogStore {
    data: CatalogData,
}

impl JsonCatalogStore {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read catalog file: {:?}", path))?;
        let data: CatalogData = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse catalog file: {:?}", path))?;
        println!(
            "✅ Catalog loaded: {} products, {} sales records, {} orders",
            data.products.len(),
            data.monthly_sales.len(),
            data.orders.len()
        );
        Ok(Self { data })
    }

    pub fn from_data(data: CatalogData) -> Self {
        Self { data }
    }

    pub fn products(&self) -> &[ProductRow] {
        &self.data.products
    }

    fn name_contains(product: &ProductRow, pattern: &str) -> bool {
        product.product_name.to_lowercase().contains(pattern)
    }

    fn description_contains(product: &ProductRow, pattern: &str) -> bool {
        product
            .description
            .as_deref()
            .unwrap_or("")
            .to_lowercase()
            .contains(pattern)
    }
}

#[async_trait]
impl StructuredStore for JsonCatalogStore {
    async fn products_matching(&self, pattern: &str) -> Result<Vec<ProductRow>, StructuredError> {
        let pattern = pattern.to_lowercase();
        Ok(self
            .data
            .products
            .iter()
            .filter(|p| Self::name_contains(p, &pattern))
            .cloned()
            .collect())
    }

    async fn products_matching_fuzzy(
        &self,
        pattern: &str,
    ) -> Result<Vec<ProductRow>, StructuredError> {
        let pattern = pattern.to_lowercase();
        Ok(self
            .data
            .products
            .iter()
            .filter(|p| Self::name_contains(p, &pattern) || Self::description_contains(p, &pattern))
            .cloned()
            .collect())
    }

    async fn product_by_id(&self, product_id: &str) -> Result<Option<ProductRow>, StructuredError> {
        Ok(self
            .data
            .products
            .iter()
            .find(|p| p.product_id == product_id)
            .cloned())
    }

    async fn monthly_revenue_by_product(
        &self,
        product_id: &str,
    ) -> Result<Vec<MonthlyRevenue>, StructuredError> {
        let mut months: Vec<MonthlyRevenue> = self
            .data
            .monthly_sales
            .iter()
            .filter(|s| s.product_id == product_id)
            .map(|s| MonthlyRevenue {
                month: s.month.clone(),
                revenue: s.revenue,
                order_count: s.order_count,
            })
            .collect();
        months.sort_by(|a, b| a.month.cmp(&b.month));
        Ok(months)
    }

    async fn monthly_revenue_total(&self) -> Result<Vec<MonthlyRevenue>, StructuredError> {
        let mut by_month: std::collections::BTreeMap<String, MonthlyRevenue> =
            std::collections::BTreeMap::new();
        for s in &self.data.monthly_sales {
            let entry = by_month
                .entry(s.month.clone())
                .or_insert_with(|| MonthlyRevenue {
                    month: s.month.clone(),
                    revenue: 0.0,
                    order_count: 0,
                });
            entry.revenue += s.revenue;
            entry.order_count += s.order_count;
        }
        Ok(by_month.into_values().collect())
    }

    async fn order_status(&self, order_code: &str) -> Result<Option<OrderRow>, StructuredError> {
        let code = order_code.to_uppercase();
        Ok(self
            .data
            .orders
            .iter()
            .find(|o| o.order_code.to_uppercase() == code)
            .cloned())
    }

    async fn any_product_like(&self, entity: &str) -> Result<bool, StructuredError> {
        let entity = entity.to_lowercase();
        Ok(self
            .data
            .products
            .iter()
            .any(|p| Self::name_contains(p, &entity) || Self::description_contains(p, &entity)))
    }
}
