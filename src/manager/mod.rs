//! Data Source Manager
//!
//! Thin facade between a connection id and a live driver:
//! resolve the config, look up the factory, create and initialize a fresh
//! driver. Nothing is cached; two calls for the same id yield two independent
//! instances, and whoever receives a driver owns its shutdown.
//!
//! [`DataSourceManager::with_connection`] is the scoped form: the driver is shut
//! down after the operation whether it succeeded or not.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::connections::{
    ConnectionConfigResolver, ConnectionRecord, ConnectionStore, CreateConnectionInput,
    DatabaseConnectionConfigSource,
};
use crate::driver::{DataSourceConfig, DataSourceDriver};
use crate::error::{MaetrikError, Result};
use crate::registry::DataSourceRegistry;

pub struct DataSourceManager {
    registry: Arc<DataSourceRegistry>,
    resolver: Arc<dyn ConnectionConfigResolver>,
}

impl DataSourceManager {
    #[must_use]
    pub fn new(registry: Arc<DataSourceRegistry>, resolver: Arc<dyn ConnectionConfigResolver>) -> Self {
        Self { registry, resolver }
    }

    #[must_use]
    pub fn registry(&self) -> &DataSourceRegistry {
        &self.registry
    }

    pub async fn get_config(&self, id: &str) -> Result<DataSourceConfig> {
        self.resolver.get(id).await
    }

    pub async fn list_configs(&self) -> Result<Vec<DataSourceConfig>> {
        self.resolver.list().await
    }

    pub async fn has_connection(&self, id: &str) -> Result<bool> {
        self.resolver.has(id).await
    }

    /// Create and initialize a new driver for `config`
    ///
    /// If `init` fails the half-built driver is shut down before the error is returned.
    pub async fn connect(&self, config: &DataSourceConfig) -> Result<Box<dyn DataSourceDriver>> {
        let factory = self
            .registry
            .get(&config.source_type)
            .ok_or_else(|| MaetrikError::driver_not_found(&config.source_type))?;

        let driver = factory.create();
        if let Err(err) = driver.init(config).await {
            if let Err(shutdown_err) = driver.shutdown().await {
                warn!(connection = %config.id, error = %shutdown_err, "Shutdown after failed init also failed");
            }
            return Err(err);
        }

        debug!(connection = %config.id, source_type = %config.source_type, "Data source connected");
        Ok(driver)
    }

    /// Resolve `id` and connect
    pub async fn connect_by_id(&self, id: &str) -> Result<Box<dyn DataSourceDriver>> {
        let config = self.resolver.get(id).await?;
        self.connect(&config).await
    }

    /// Run `operation` against a fresh driver for `id`, then shut it down
    ///
    /// The operation's result is returned as-is; a failed shutdown is logged.
    pub async fn with_connection<T, F, Fut>(&self, id: &str, operation: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn DataSourceDriver>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let driver: Arc<dyn DataSourceDriver> = Arc::from(self.connect_by_id(id).await?);
        let outcome = operation(Arc::clone(&driver)).await;

        if let Err(err) = driver.shutdown().await {
            warn!(connection = id, error = %err, "Failed to shut down data source");
        }
        outcome
    }

    /// Whether a new persisted entry may use `id`
    pub async fn can_add_to_database(&self, id: &str) -> Result<bool> {
        Ok(!self
            .resolver
            .exists_in_other_sources(id, DatabaseConnectionConfigSource::NAME)
            .await?)
    }

    /// Admission gate for new persisted connections
    pub async fn add_persisted_connection(
        &self,
        store: &dyn ConnectionStore,
        input: CreateConnectionInput,
    ) -> Result<ConnectionRecord> {
        let factory = self
            .registry
            .get(&input.source_type)
            .ok_or_else(|| MaetrikError::driver_not_found(&input.source_type))?;
        factory.validate_credentials(&input.credentials)?;

        let owners = self
            .resolver
            .other_sources_with(&input.id, DatabaseConnectionConfigSource::NAME)
            .await?;
        if !owners.is_empty() {
            return Err(MaetrikError::duplicate_conflict(input.id, owners));
        }
        if store.connection_exists(&input.id).await? {
            return Err(MaetrikError::ConnectionExists(input.id));
        }

        let record = store.create_connection(input).await?;
        info!(connection = %record.id, source_type = %record.source_type, "Persisted connection added");
        Ok(record)
    }

    /// Health probe; only resolution errors propagate
    pub async fn health_check(&self, id: &str) -> Result<bool> {
        let config = self.resolver.get(id).await?;
        let driver = match self.connect(&config).await {
            Ok(driver) => driver,
            Err(err) => {
                debug!(connection = id, error = %err, "Health check could not connect");
                return Ok(false);
            }
        };

        let healthy = driver.is_healthy().await;
        if let Err(err) = driver.shutdown().await {
            warn!(connection = id, error = %err, "Failed to shut down data source");
        }
        Ok(healthy)
    }

    /// Startup check: every configured id must resolve to exactly one source
    pub async fn validate_configs(&self) -> Result<usize> {
        let configs = self.resolver.list().await?;
        for config in &configs {
            if !self.registry.has(&config.source_type) {
                warn!(connection = %config.id, source_type = %config.source_type, "No driver registered for connection type");
            }
        }
        Ok(configs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::DataSourceCapabilities;
    use crate::connections::{
        CompositeConnectionResolver, ConnectionConfigSource, FileConnectionConfigSource,
        MemoryConnectionStore,
    };
    use crate::testing::FakeFactory;
    use serde_json::json;

    fn build(factory: FakeFactory, file_ids: &[(&str, &str)]) -> (DataSourceManager, Arc<MemoryConnectionStore>) {
        let mut registry = DataSourceRegistry::new();
        registry.register(Arc::new(factory)).unwrap();

        let configs = file_ids
            .iter()
            .map(|(id, ty)| DataSourceConfig::new(*id, *ty, Default::default()))
            .collect();
        let store = Arc::new(MemoryConnectionStore::new());
        let sources: Vec<Arc<dyn ConnectionConfigSource>> = vec![
            Arc::new(FileConnectionConfigSource::new(configs).unwrap()),
            Arc::new(DatabaseConnectionConfigSource::new(store.clone())),
        ];
        let resolver = Arc::new(CompositeConnectionResolver::new(sources));
        (DataSourceManager::new(Arc::new(registry), resolver), store)
    }

    #[tokio::test]
    async fn test_connect_returns_fresh_instances() {
        let factory = FakeFactory::new("fake");
        let probe = factory.probe();
        let (manager, _) = build(factory, &[("main", "fake")]);

        let first = manager.connect_by_id("main").await.ok().unwrap();
        let second = manager.connect_by_id("main").await.ok().unwrap();
        assert_eq!(probe.created(), 2);
        assert_eq!(probe.inits(), 2);

        first.shutdown().await.unwrap();
        assert_eq!(probe.shutdowns(), 1);
        assert!(second.is_healthy().await);

        second.shutdown().await.unwrap();
        assert_eq!(probe.shut_down_instances(), vec![0, 1]);
    }

    #[tokio::test]
    async fn test_unknown_type_is_driver_not_found() {
        let (manager, _) = build(FakeFactory::new("fake"), &[("legacy", "oracle")]);
        let err = manager.connect_by_id("legacy").await.err().unwrap();
        assert!(matches!(err, MaetrikError::DriverNotFound(ref t) if t == "oracle"));
    }

    #[tokio::test]
    async fn test_failed_init_shuts_driver_down() {
        let factory = FakeFactory::new("fake").failing_init();
        let probe = factory.probe();
        let (manager, _) = build(factory, &[("main", "fake")]);

        assert!(manager.connect_by_id("main").await.is_err());
        assert_eq!(probe.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_with_connection_shuts_down_on_error() {
        let factory = FakeFactory::new("fake");
        let probe = factory.probe();
        let (manager, _) = build(factory, &[("main", "fake")]);

        let result: Result<()> = manager
            .with_connection("main", |_driver| async { Err(MaetrikError::invalid_query("nope")) })
            .await;
        assert!(result.is_err());
        assert_eq!(probe.shutdowns(), 1);

        let rows = manager
            .with_connection("main", |driver| async move {
                let result = driver.require_queryable()?.execute("SELECT 1", &[]).await?;
                Ok(result.row_count)
            })
            .await
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(probe.shutdowns(), 2);
    }

    #[tokio::test]
    async fn test_can_add_to_database() {
        let (manager, store) = build(FakeFactory::new("fake"), &[("from_file", "fake")]);
        store
            .create_connection(CreateConnectionInput {
                id: "from_db".to_string(),
                source_type: "fake".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(!manager.can_add_to_database("from_file").await.unwrap());
        assert!(manager.can_add_to_database("from_db").await.unwrap());
        assert!(manager.can_add_to_database("brand_new").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_persisted_connection_gate() {
        let (manager, store) = build(FakeFactory::new("fake"), &[("from_file", "fake")]);

        let input = |id: &str, ty: &str| CreateConnectionInput {
            id: id.to_string(),
            source_type: ty.to_string(),
            ..Default::default()
        };

        let err = manager.add_persisted_connection(store.as_ref(), input("from_file", "fake")).await.unwrap_err();
        assert_eq!(err.error_code(), "DUPLICATE_CONNECTION");

        let err = manager.add_persisted_connection(store.as_ref(), input("x", "oracle")).await.unwrap_err();
        assert_eq!(err.error_code(), "DRIVER_NOT_FOUND");

        let mut bad = input("y", "fake");
        bad.credentials.insert("invalid".to_string(), json!(true));
        let err = manager.add_persisted_connection(store.as_ref(), bad).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CREDENTIALS");

        manager.add_persisted_connection(store.as_ref(), input("fresh", "fake")).await.unwrap();
        let err = manager.add_persisted_connection(store.as_ref(), input("fresh", "fake")).await.unwrap_err();
        assert_eq!(err.error_code(), "CONNECTION_EXISTS");
        assert!(manager.has_connection("fresh").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_persisted_connection_names_actual_owner() {
        let mut registry = DataSourceRegistry::new();
        registry.register(Arc::new(FakeFactory::new("fake"))).unwrap();
        let store = Arc::new(MemoryConnectionStore::new());
        let sources: Vec<Arc<dyn ConnectionConfigSource>> = vec![
            Arc::new(
                FileConnectionConfigSource::named("remote", vec![DataSourceConfig::new("shared", "fake", Default::default())])
                    .unwrap(),
            ),
            Arc::new(DatabaseConnectionConfigSource::new(store.clone())),
        ];
        let manager = DataSourceManager::new(Arc::new(registry), Arc::new(CompositeConnectionResolver::new(sources)));

        let input = CreateConnectionInput {
            id: "shared".to_string(),
            source_type: "fake".to_string(),
            ..Default::default()
        };
        match manager.add_persisted_connection(store.as_ref(), input).await.unwrap_err() {
            MaetrikError::DuplicateConflict { id, sources } => {
                assert_eq!(id, "shared");
                assert_eq!(sources, vec!["remote"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!store.connection_exists("shared").await.unwrap());
    }

    #[tokio::test]
    async fn test_health_check_downgrades_failures() {
        let (manager, _) = build(FakeFactory::new("fake").unhealthy(), &[("main", "fake")]);
        assert!(!manager.health_check("main").await.unwrap());

        let (manager, _) = build(FakeFactory::new("fake").failing_init(), &[("main", "fake")]);
        assert!(!manager.health_check("main").await.unwrap());

        let no_probe = DataSourceCapabilities { queryable: true, ..Default::default() };
        let (manager, _) = build(FakeFactory::new("fake").with_capabilities(no_probe), &[("main", "fake")]);
        assert!(!manager.health_check("main").await.unwrap());

        let factory = FakeFactory::new("fake");
        let probe = factory.probe();
        let (manager, _) = build(factory, &[("main", "fake")]);
        assert!(manager.health_check("main").await.unwrap());
        assert_eq!(probe.shutdowns(), 1);

        let err = manager.health_check("missing").await.unwrap_err();
        assert_eq!(err.error_code(), "CONNECTION_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_validate_configs_detects_conflicts() {
        let (manager, store) = build(FakeFactory::new("fake"), &[("main", "fake")]);
        assert_eq!(manager.validate_configs().await.unwrap(), 1);

        // Bypass the admission gate to simulate a store edited out of band
        store
            .create_connection(CreateConnectionInput {
                id: "main".to_string(),
                source_type: "fake".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let err = manager.validate_configs().await.unwrap_err();
        assert_eq!(err.message(), "Duplicate connection 'main' found in: file, database");
    }
}
