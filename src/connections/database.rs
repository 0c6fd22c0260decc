//! Connections persisted in a [`ConnectionStore`]

use std::sync::Arc;

use async_trait::async_trait;

use crate::connections::{ConnectionConfigSource, ConnectionStore};
use crate::driver::DataSourceConfig;
use crate::error::Result;

/// Adapts a connection store to the resolver's source contract
///
/// Disabled records are still reported here; refusing them is up to the caller.
pub struct DatabaseConnectionConfigSource {
    store: Arc<dyn ConnectionStore>,
}

impl DatabaseConnectionConfigSource {
    pub const NAME: &'static str = "database";

    #[must_use]
    pub fn new(store: Arc<dyn ConnectionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ConnectionConfigSource for DatabaseConnectionConfigSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn get(&self, id: &str) -> Result<Option<DataSourceConfig>> {
        Ok(self.store.get_connection(id).await?.map(|record| record.to_config()))
    }

    async fn list(&self) -> Result<Vec<DataSourceConfig>> {
        let records = self.store.list_connections().await?;
        Ok(records.iter().map(|record| record.to_config()).collect())
    }

    async fn has(&self, id: &str) -> Result<bool> {
        self.store.connection_exists(id).await
    }
}
