//! Maetrik - Natural-Language Questions over Data Sources
//!
//! Maetrik turns a question about a connected data source into a read-only SQL
//! query, runs it, and returns the rows.
//!
//! # Core Principles
//! - Connection ids are resolved across every configuration source; an id
//!   claimed twice is an error, never a silent pick
//! - Drivers are created fresh per operation and always shut down
//! - Capabilities are optional per driver and checked before use
//! - Generated SQL is untrusted until it passes the read-only validator
//!
//! # Module Organization
//! - [`error`] - Error types and handling
//! - [`capability`] - Capability flags and per-capability traits
//! - [`driver`] - Driver contract, schema and result types, built-in drivers
//! - [`registry`] - Data source factories keyed by type
//! - [`connections`] - Configuration sources, resolver and persisted store
//! - [`manager`] - Connection id to live driver
//! - [`semantic`] - Enriched schema and relationship inference
//! - [`llm`] - Completion backends
//! - [`query`] - Prompt building and translation
//! - [`safety`] - Read-only SQL validation
//! - [`ask`] - The question-to-rows pipeline
//! - [`config`] - Configuration loading
//! - [`app`] - Bootstrap wiring
//! - [`output`] - JSON output envelopes

pub mod app;
pub mod ask;
pub mod capability;
pub mod config;
pub mod connections;
pub mod driver;
pub mod error;
pub mod llm;
pub mod manager;
pub mod output;
pub mod query;
pub mod registry;
pub mod safety;
pub mod semantic;

#[cfg(test)]
mod testing;

// Re-export commonly used types for convenience
pub use ask::{dialect_for, AskResponse, AskService, QueryResponse};
pub use capability::{Capability, DataSourceCapabilities};
pub use config::MaetrikConfig;
pub use connections::{
    CompositeConnectionResolver, ConnectionConfigResolver, ConnectionConfigSource, ConnectionStore,
};
pub use driver::{DataSourceConfig, DataSourceDriver, QueryResult, SchemaDefinition};
pub use error::{MaetrikError, Result};
pub use llm::{CompletionBackend, CompletionOptions, CompletionResult};
pub use manager::DataSourceManager;
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use query::{QueryTranslator, TranslationContext, TranslationResult};
pub use registry::{DataSourceFactory, DataSourceRegistry};
pub use safety::is_select_only;
pub use semantic::{SemanticLayer, SemanticLayerCache};
