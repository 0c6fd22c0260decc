//! Data Source Driver Contract and Core Types
//!
//! A driver is a live handle to one data source. Its lifecycle is
//! `create()` (by a factory) → [`init`](DataSourceDriver::init) → zero or more
//! capability operations → [`shutdown`](DataSourceDriver::shutdown). The owner
//! shuts the driver down exactly once; a second call is a no-op.
//!
//! # Driver Isolation
//! Each built-in driver (`sqlite`, `postgres`, `mysql`) is completely
//! independent and compiled behind its own cargo feature.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::{
    Capability, DataSourceCapabilities, HealthCheckable, Introspectable, Queryable, Transactional,
};
use crate::error::{MaetrikError, Result};

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

/// Opaque driver-specific credentials
///
/// WARNING: may contain passwords, do not log.
pub type Credentials = BTreeMap<String, Value>;

/// Resolved configuration for one connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Connection id, unique across all configuration sources
    pub id: String,

    /// Data source type, the registry key of its factory
    #[serde(rename = "type")]
    pub source_type: String,

    #[serde(default)]
    pub credentials: Credentials,
}

impl DataSourceConfig {
    #[must_use]
    pub fn new(id: impl Into<String>, source_type: impl Into<String>, credentials: Credentials) -> Self {
        Self { id: id.into(), source_type: source_type.into(), credentials }
    }
}

/// Deserialize credentials into a driver's typed credential struct
pub fn parse_credentials<T: DeserializeOwned>(source_type: &str, credentials: &Credentials) -> Result<T> {
    let object: serde_json::Map<String, Value> =
        credentials.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    serde_json::from_value(Value::Object(object))
        .map_err(|e| MaetrikError::invalid_credentials(source_type, e.to_string()))
}

/// Raw introspection output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub tables: Vec<SchemaTable>,
}

impl SchemaDefinition {
    /// Look up a table by name
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&SchemaTable> {
        self.tables.iter().find(|t| t.name == name)
    }
}

/// Table information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaTable {
    pub name: String,

    /// Schema name (for engines that support schemas)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub columns: Vec<SchemaColumn>,
}

/// Column information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaColumn {
    pub name: String,

    /// Column data type (engine-specific)
    #[serde(rename = "type")]
    pub data_type: String,

    pub nullable: bool,

    #[serde(default)]
    pub is_primary_key: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SchemaColumn {
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool, is_primary_key: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            is_primary_key,
            description: None,
        }
    }
}

/// Query execution result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Result rows (each row is a map of column name to value)
    pub rows: Vec<serde_json::Map<String, Value>>,

    /// Rows returned, or rows affected for statements without a result set
    pub row_count: u64,

    /// Result columns in select order
    pub fields: Vec<FieldInfo>,
}

/// Result column metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldInfo {
    pub name: String,

    /// Engine type identifier (PostgreSQL type OID)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type_id: Option<u32>,
}

impl FieldInfo {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), data_type_id: None }
    }
}

/// A live data source handle
///
/// Capability traits are reached through the `as_*` accessors. A driver must
/// return `Some` from every accessor whose flag it advertises in
/// [`capabilities`](DataSourceDriver::capabilities).
#[async_trait]
pub trait DataSourceDriver: Send + Sync {
    /// Human-readable driver name
    fn name(&self) -> &str;

    /// Registry key of the factory that created this driver
    fn source_type(&self) -> &str;

    fn capabilities(&self) -> DataSourceCapabilities;

    /// Open the connection described by `config`
    async fn init(&self, config: &DataSourceConfig) -> Result<()>;

    /// Release the connection. Calling it again is a no-op.
    async fn shutdown(&self) -> Result<()>;

    fn as_queryable(&self) -> Option<&dyn Queryable> {
        None
    }

    fn as_introspectable(&self) -> Option<&dyn Introspectable> {
        None
    }

    fn as_health_checkable(&self) -> Option<&dyn HealthCheckable> {
        None
    }

    fn as_transactional(&self) -> Option<&dyn Transactional> {
        None
    }

    fn require_queryable(&self) -> Result<&dyn Queryable> {
        self.as_queryable()
            .ok_or_else(|| MaetrikError::capability_not_supported(self.name(), Capability::Queryable))
    }

    fn require_introspectable(&self) -> Result<&dyn Introspectable> {
        self.as_introspectable()
            .ok_or_else(|| MaetrikError::capability_not_supported(self.name(), Capability::Introspectable))
    }

    fn require_health_checkable(&self) -> Result<&dyn HealthCheckable> {
        self.as_health_checkable()
            .ok_or_else(|| MaetrikError::capability_not_supported(self.name(), Capability::HealthCheckable))
    }

    fn require_transactional(&self) -> Result<&dyn Transactional> {
        self.as_transactional()
            .ok_or_else(|| MaetrikError::capability_not_supported(self.name(), Capability::Transactional))
    }

    /// Health probe that never fails: errors and a missing capability read as unhealthy
    async fn is_healthy(&self) -> bool {
        match self.as_health_checkable() {
            Some(probe) => probe.health_check().await.unwrap_or(false),
            None => false,
        }
    }
}
