//! Persisted Connection Store
//!
//! Connections added at runtime (as opposed to those declared in the config
//! file) live in a [`ConnectionStore`]. Two implementations ship:
//! - [`MemoryConnectionStore`]: process-local, for tests and embedding
//! - [`JsonFileConnectionStore`]: a pretty-printed JSON file, parent
//!   directories created on first write
//!
//! # File Format
//! ```json
//! {
//!   "connections": {
//!     "analytics": { "id": "analytics", "type": "postgres", "credentials": { ... }, ... }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::driver::{Credentials, DataSourceConfig};
use crate::error::{MaetrikError, Result};

const fn default_enabled() -> bool {
    true
}

/// One persisted connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub id: String,

    #[serde(rename = "type")]
    pub source_type: String,

    /// WARNING: may contain passwords, do not log
    #[serde(default)]
    pub credentials: Credentials,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConnectionRecord {
    #[must_use]
    pub fn to_config(&self) -> DataSourceConfig {
        DataSourceConfig::new(self.id.clone(), self.source_type.clone(), self.credentials.clone())
    }
}

/// Fields for a new persisted connection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConnectionInput {
    pub id: String,
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Partial update; credential keys present here replace the stored ones
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConnectionInput {
    #[serde(default)]
    pub credentials: Option<Credentials>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Storage contract for persisted connections
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Fails with `ConnectionExists` if the id is taken
    async fn create_connection(&self, input: CreateConnectionInput) -> Result<ConnectionRecord>;

    async fn get_connection(&self, id: &str) -> Result<Option<ConnectionRecord>>;

    /// All records, sorted by id
    async fn list_connections(&self) -> Result<Vec<ConnectionRecord>>;

    async fn connection_exists(&self, id: &str) -> Result<bool>;

    /// Fails with `NotFound` if the id is unknown
    async fn update_connection(&self, id: &str, input: UpdateConnectionInput) -> Result<ConnectionRecord>;

    /// `true` if a record was removed
    async fn delete_connection(&self, id: &str) -> Result<bool>;
}

/// In-memory table shared by both store implementations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConnectionTable {
    #[serde(default)]
    connections: BTreeMap<String, ConnectionRecord>,
}

impl ConnectionTable {
    fn create(&mut self, input: CreateConnectionInput) -> Result<ConnectionRecord> {
        if input.id.trim().is_empty() {
            return Err(MaetrikError::invalid_input("Connection id cannot be empty"));
        }
        if self.connections.contains_key(&input.id) {
            return Err(MaetrikError::ConnectionExists(input.id));
        }

        let now = Utc::now();
        let record = ConnectionRecord {
            id: input.id,
            source_type: input.source_type,
            credentials: input.credentials,
            name: input.name,
            description: input.description,
            enabled: true,
            created_at: now,
            updated_at: now,
        };
        self.connections.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn update(&mut self, id: &str, input: UpdateConnectionInput) -> Result<ConnectionRecord> {
        let record = self.connections.get_mut(id).ok_or_else(|| MaetrikError::not_found(id))?;

        if let Some(credentials) = input.credentials {
            record.credentials.extend(credentials);
        }
        if let Some(name) = input.name {
            record.name = Some(name);
        }
        if let Some(description) = input.description {
            record.description = Some(description);
        }
        if let Some(enabled) = input.enabled {
            record.enabled = enabled;
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    fn list(&self) -> Vec<ConnectionRecord> {
        self.connections.values().cloned().collect()
    }
}

/// Process-local store
#[derive(Default)]
pub struct MemoryConnectionStore {
    table: RwLock<ConnectionTable>,
}

impl MemoryConnectionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn create_connection(&self, input: CreateConnectionInput) -> Result<ConnectionRecord> {
        self.table.write().await.create(input)
    }

    async fn get_connection(&self, id: &str) -> Result<Option<ConnectionRecord>> {
        Ok(self.table.read().await.connections.get(id).cloned())
    }

    async fn list_connections(&self) -> Result<Vec<ConnectionRecord>> {
        Ok(self.table.read().await.list())
    }

    async fn connection_exists(&self, id: &str) -> Result<bool> {
        Ok(self.table.read().await.connections.contains_key(id))
    }

    async fn update_connection(&self, id: &str, input: UpdateConnectionInput) -> Result<ConnectionRecord> {
        self.table.write().await.update(id, input)
    }

    async fn delete_connection(&self, id: &str) -> Result<bool> {
        Ok(self.table.write().await.connections.remove(id).is_some())
    }
}

/// Store backed by a JSON file
///
/// Every call reads the file; writes rewrite it whole. Access within the
/// process is serialized.
pub struct JsonFileConnectionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileConnectionStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<ConnectionTable> {
        if !self.path.exists() {
            return Ok(ConnectionTable::default());
        }

        let contents = fs::read_to_string(&self.path)
            .map_err(|e| MaetrikError::store_error(format!("Could not read connection store: {e}")))?;
        if contents.trim().is_empty() {
            return Ok(ConnectionTable::default());
        }

        serde_json::from_str(&contents)
            .map_err(|e| MaetrikError::store_error(format!("Invalid connection store format: {e}")))
    }

    fn save(&self, table: &ConnectionTable) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                MaetrikError::store_error(format!("Could not create store directory: {e}"))
            })?;
        }

        let contents = serde_json::to_string_pretty(table)
            .map_err(|e| MaetrikError::store_error(format!("Could not serialize connections: {e}")))?;

        fs::write(&self.path, contents)
            .map_err(|e| MaetrikError::store_error(format!("Could not write connection store: {e}")))
    }
}

#[async_trait]
impl ConnectionStore for JsonFileConnectionStore {
    async fn create_connection(&self, input: CreateConnectionInput) -> Result<ConnectionRecord> {
        let _guard = self.lock.lock().await;
        let mut table = self.load()?;
        let record = table.create(input)?;
        self.save(&table)?;
        Ok(record)
    }

    async fn get_connection(&self, id: &str) -> Result<Option<ConnectionRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.load()?.connections.remove(id))
    }

    async fn list_connections(&self) -> Result<Vec<ConnectionRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.load()?.list())
    }

    async fn connection_exists(&self, id: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        Ok(self.load()?.connections.contains_key(id))
    }

    async fn update_connection(&self, id: &str, input: UpdateConnectionInput) -> Result<ConnectionRecord> {
        let _guard = self.lock.lock().await;
        let mut table = self.load()?;
        let record = table.update(id, input)?;
        self.save(&table)?;
        Ok(record)
    }

    async fn delete_connection(&self, id: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let mut table = self.load()?;
        let removed = table.connections.remove(id).is_some();
        if removed {
            self.save(&table)?;
        }
        Ok(removed)
    }
}
