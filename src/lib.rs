//! BrainSpark - knowledge and memory core for marketing agents
//!
//! Ingests PDF and CSV sources into vector collections, recalls per-user
//! memories, persists conversation sessions, and runs agent turns that fold
//! retrieved context and tool results into a model call.
//!
//! # Layout
//!
//! - **knowledge**: readers, chunking strategies, knowledge base load/query
//! - **vector**: local, Qdrant and combined collections
//! - **embedding** / **model**: provider clients behind capability traits
//! - **memory** / **session**: durable per-agent JSON-lines stores
//! - **tools**: tool adapters and the toolbelt
//! - **agent**: profiles and the turn loop
//! - **wiring**: builds all of the above from configuration

pub mod agent;
pub mod config;
pub mod embedding;
pub mod errors;
pub mod knowledge;
pub mod memory;
pub mod model;
pub mod retry;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod tools;
pub mod vector;
pub mod wiring;

// Re-export commonly used types
pub use agent::{AgentProfile, AgentRuntime, TurnOutcome, TurnState};
pub use config::CoreConfig;
pub use errors::{AgentError, ErrorKind, Result};
pub use knowledge::{KnowledgeBase, KnowledgeSource, LoadReport};
pub use wiring::Wiring;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
