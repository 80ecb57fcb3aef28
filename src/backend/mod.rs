//! Self-contained default backends: a JSON catalog store, a deterministic
//! feature-hash embedder and an in-memory vector index. Production
//! deployments swap these for real services behind the same gateway traits.

pub mod catalog;
pub mod embed;
pub mod index;

pub use catalog::{CatalogData, JsonCatalogStore, SalesRecord};
pub use embed::HashEmbedder;
pub use index::InMemoryVectorIndex;
