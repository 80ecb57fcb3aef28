pub mod backend;
pub mod cache;
pub mod cli;
pub mod config;
pub mod gateway;
pub mod i18n;
pub mod lexicon;
pub mod llm;
pub mod pipeline;
pub mod state;

// Re-export commonly used types
pub use config::Config;
pub use pipeline::Orchestrator;
pub use state::{QueryRequest, QueryResponse};
