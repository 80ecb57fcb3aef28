//! Abstract contracts for the external collaborators the pipeline consumes:
//! text generation, embedding creation, vector search and structured
//! product/revenue/order lookups. Components depend on these traits only, so
//! tests can substitute scripted fakes and count calls.

pub mod embedding;
pub mod llm;
pub mod structured;
pub mod vector;

pub use embedding::{EmbedError, Embedder, Embedding};
pub use llm::{LlmError, LlmGateway};
pub use structured::{
    MonthlyRevenue, OrderRow, ProductRow, StructuredError, StructuredFallback, StructuredStore,
};
pub use vector::{VectorError, VectorHit, VectorIndex};
