//! Application wiring
//!
//! Builds the object graph once from a loaded [`MaetrikConfig`]: registry,
//! persisted store, resolver sources (file first, then database), manager,
//! completion backend and ask service. Bootstrap ends with a full resolver
//! listing so duplicate ids abort startup instead of surfacing mid-request.

use std::sync::Arc;

use tracing::info;

use crate::ask::AskService;
use crate::config::MaetrikConfig;
use crate::connections::{
    CompositeConnectionResolver, ConnectionConfigSource, ConnectionStore,
    DatabaseConnectionConfigSource, FileConnectionConfigSource, JsonFileConnectionStore,
};
use crate::error::Result;
use crate::llm::backend_from_config;
use crate::manager::DataSourceManager;
use crate::query::QueryTranslator;
use crate::registry::DataSourceRegistry;

pub struct App {
    pub config: MaetrikConfig,
    pub store: Arc<dyn ConnectionStore>,
    pub resolver: Arc<CompositeConnectionResolver>,
    pub manager: Arc<DataSourceManager>,
    pub ask: AskService,
}

impl App {
    /// Wire the built-in drivers and the JSON connection store from `config`
    pub async fn bootstrap(config: MaetrikConfig) -> Result<Self> {
        let store = Arc::new(JsonFileConnectionStore::new(config.state_storage.resolved_path()?));
        Self::build(config, DataSourceRegistry::builtin()?, store).await
    }

    /// Wire an explicit registry and store
    pub async fn build(
        config: MaetrikConfig,
        registry: DataSourceRegistry,
        store: Arc<dyn ConnectionStore>,
    ) -> Result<Self> {
        let sources: Vec<Arc<dyn ConnectionConfigSource>> = vec![
            Arc::new(FileConnectionConfigSource::new(config.data_sources.clone())?),
            Arc::new(DatabaseConnectionConfigSource::new(Arc::clone(&store))),
        ];
        let resolver = Arc::new(CompositeConnectionResolver::new(sources));
        let manager = Arc::new(DataSourceManager::new(
            Arc::new(registry),
            Arc::clone(&resolver) as Arc<_>,
        ));

        let connections = manager.validate_configs().await?;

        let backend = backend_from_config(&config.llm)?;
        let ask = AskService::new(Arc::clone(&manager), QueryTranslator::new(backend))
            .with_store(Arc::clone(&store))
            .with_max_rows(config.query.max_rows);

        info!(
            connections,
            drivers = manager.registry().list().len(),
            llm = %config.llm.driver,
            "Maetrik initialized"
        );

        Ok(Self { config, store, resolver, manager, ask })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::{CreateConnectionInput, MemoryConnectionStore};
    use crate::driver::DataSourceConfig;
    use crate::testing::FakeFactory;

    fn registry() -> DataSourceRegistry {
        let mut registry = DataSourceRegistry::new();
        registry.register(Arc::new(FakeFactory::new("fake"))).unwrap();
        registry
    }

    fn config_with(ids: &[&str]) -> MaetrikConfig {
        MaetrikConfig {
            data_sources: ids
                .iter()
                .map(|id| DataSourceConfig::new(*id, "fake", Default::default()))
                .collect(),
            ..MaetrikConfig::default()
        }
    }

    #[tokio::test]
    async fn test_build_wires_sources_in_order() {
        let app = App::build(config_with(&["main"]), registry(), Arc::new(MemoryConnectionStore::new()))
            .await
            .unwrap();

        assert_eq!(app.resolver.source_names(), vec!["file", "database"]);
        assert!(app.manager.has_connection("main").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_id_aborts_startup() {
        let store = Arc::new(MemoryConnectionStore::new());
        store
            .create_connection(CreateConnectionInput {
                id: "main".to_string(),
                source_type: "fake".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let err = App::build(config_with(&["main"]), registry(), store).await.err().unwrap();
        assert_eq!(err.error_code(), "DUPLICATE_CONNECTION");
    }

    #[tokio::test]
    async fn test_unknown_llm_driver_is_config_error() {
        let mut config = config_with(&[]);
        config.llm.driver = "bard".to_string();

        let err = App::build(config, registry(), Arc::new(MemoryConnectionStore::new()))
            .await
            .err()
            .unwrap();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }
}
