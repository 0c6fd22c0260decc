//! Connection Configuration Resolution
//!
//! A connection id can come from several configuration sources: the static
//! config file, the persisted connection store, or anything else implementing
//! [`ConnectionConfigSource`]. [`CompositeConnectionResolver`] merges them and
//! refuses to guess when two sources claim the same id: the conflict is
//! reported with every offending source named, never resolved by priority.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::driver::DataSourceConfig;
use crate::error::{MaetrikError, Result};

pub mod database;
pub mod file;
pub mod store;

pub use database::DatabaseConnectionConfigSource;
pub use file::FileConnectionConfigSource;
pub use store::{
    ConnectionRecord, ConnectionStore, CreateConnectionInput, JsonFileConnectionStore,
    MemoryConnectionStore, UpdateConnectionInput,
};

/// One origin of connection configurations
#[async_trait]
pub trait ConnectionConfigSource: Send + Sync {
    /// Stable source name used in conflict reports (`"file"`, `"database"`)
    fn name(&self) -> &str;

    async fn get(&self, id: &str) -> Result<Option<DataSourceConfig>>;

    async fn list(&self) -> Result<Vec<DataSourceConfig>>;

    async fn has(&self, id: &str) -> Result<bool>;
}

/// Resolves connection ids across all configured sources
#[async_trait]
pub trait ConnectionConfigResolver: Send + Sync {
    /// The single config for `id`; `NotFound` or `DuplicateConflict` otherwise
    async fn get(&self, id: &str) -> Result<DataSourceConfig>;

    /// Every config from every source; fails on the first id claimed twice
    async fn list(&self) -> Result<Vec<DataSourceConfig>>;

    /// Whether any source knows `id` (no conflict check)
    async fn has(&self, id: &str) -> Result<bool>;

    /// Whether a source other than `excluding_source` knows `id`
    async fn exists_in_other_sources(&self, id: &str, excluding_source: &str) -> Result<bool>;

    /// Names of the sources other than `excluding_source` that know `id`, in source order
    async fn other_sources_with(&self, id: &str, excluding_source: &str) -> Result<Vec<String>>;
}

/// Ordered list of sources merged with conflict detection
#[derive(Clone, Default)]
pub struct CompositeConnectionResolver {
    sources: Vec<Arc<dyn ConnectionConfigSource>>,
}

impl CompositeConnectionResolver {
    #[must_use]
    pub fn new(sources: Vec<Arc<dyn ConnectionConfigSource>>) -> Self {
        Self { sources }
    }

    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn ConnectionConfigSource>) -> Self {
        self.sources.push(source);
        self
    }

    #[must_use]
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }
}

#[async_trait]
impl ConnectionConfigResolver for CompositeConnectionResolver {
    async fn get(&self, id: &str) -> Result<DataSourceConfig> {
        let mut hits: Vec<(String, DataSourceConfig)> = Vec::new();
        for source in &self.sources {
            if let Some(config) = source.get(id).await? {
                hits.push((source.name().to_string(), config));
            }
        }

        match hits.len() {
            0 => Err(MaetrikError::not_found(id)),
            1 => {
                let (source, config) = hits.remove(0);
                debug!(connection = id, source = %source, "Resolved connection");
                Ok(config)
            }
            _ => {
                let sources = hits.into_iter().map(|(source, _)| source).collect();
                Err(MaetrikError::duplicate_conflict(id, sources))
            }
        }
    }

    async fn list(&self) -> Result<Vec<DataSourceConfig>> {
        let mut listed: Vec<(String, DataSourceConfig)> = Vec::new();
        for source in &self.sources {
            for config in source.list().await? {
                listed.push((source.name().to_string(), config));
            }
        }

        // First id (in encounter order) claimed by more than one source
        for (idx, (first_source, config)) in listed.iter().enumerate() {
            let others: Vec<&String> = listed[idx + 1..]
                .iter()
                .filter(|(_, other)| other.id == config.id)
                .map(|(source, _)| source)
                .collect();
            if !others.is_empty() {
                let mut sources = vec![first_source.clone()];
                sources.extend(others.into_iter().cloned());
                warn!(connection = %config.id, sources = ?sources, "Duplicate connection id");
                return Err(MaetrikError::duplicate_conflict(config.id.clone(), sources));
            }
        }

        Ok(listed.into_iter().map(|(_, config)| config).collect())
    }

    async fn has(&self, id: &str) -> Result<bool> {
        for source in &self.sources {
            if source.has(id).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn exists_in_other_sources(&self, id: &str, excluding_source: &str) -> Result<bool> {
        for source in self.sources.iter().filter(|s| s.name() != excluding_source) {
            if source.has(id).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn other_sources_with(&self, id: &str, excluding_source: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for source in self.sources.iter().filter(|s| s.name() != excluding_source) {
            if source.has(id).await? {
                names.push(source.name().to_string());
            }
        }
        Ok(names)
    }
}
