//! Connections declared in the application config file

use std::collections::HashMap;

use async_trait::async_trait;

use crate::connections::ConnectionConfigSource;
use crate::driver::DataSourceConfig;
use crate::error::{MaetrikError, Result};

/// Read-only source over the `dataSources` array of the config file
pub struct FileConnectionConfigSource {
    name: String,
    configs: Vec<DataSourceConfig>,
    index: HashMap<String, usize>,
}

impl FileConnectionConfigSource {
    pub const NAME: &'static str = "file";

    /// Build the source; an id declared twice in the file is a config error
    pub fn new(configs: Vec<DataSourceConfig>) -> Result<Self> {
        Self::named(Self::NAME, configs)
    }

    /// Same as [`new`](Self::new) with a custom source name
    pub fn named(name: impl Into<String>, configs: Vec<DataSourceConfig>) -> Result<Self> {
        let mut index = HashMap::with_capacity(configs.len());
        for (position, config) in configs.iter().enumerate() {
            if config.id.trim().is_empty() {
                return Err(MaetrikError::config_error("Data source id cannot be empty"));
            }
            if index.insert(config.id.clone(), position).is_some() {
                return Err(MaetrikError::config_error(format!(
                    "Data source '{}' is declared more than once",
                    config.id
                )));
            }
        }
        Ok(Self { name: name.into(), configs, index })
    }
}

#[async_trait]
impl ConnectionConfigSource for FileConnectionConfigSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, id: &str) -> Result<Option<DataSourceConfig>> {
        Ok(self.index.get(id).map(|&i| self.configs[i].clone()))
    }

    async fn list(&self) -> Result<Vec<DataSourceConfig>> {
        Ok(self.configs.clone())
    }

    async fn has(&self, id: &str) -> Result<bool> {
        Ok(self.index.contains_key(id))
    }
}
