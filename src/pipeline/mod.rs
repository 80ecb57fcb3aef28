//! The multi-agent pipeline: routing, entity resolution, retrieval, tools,
//! synthesis, critique and the orchestrator that sequences them.

pub mod critic;
pub mod entity;
pub mod knowledge;
pub mod orchestrator;
pub mod reasoning;
pub mod router;
pub mod tools;

pub use orchestrator::Orchestrator;
