//! Capability Model for Data Source Drivers
//!
//! Drivers advertise what they can do through [`DataSourceCapabilities`] and
//! expose each capability as its own narrow trait. Consumers never assume a
//! capability: they narrow a driver with `as_queryable()`, `as_introspectable()`
//! and friends, or use the checked `require_*` helpers on
//! [`DataSourceDriver`](crate::driver::DataSourceDriver), which fail with
//! [`MaetrikError::CapabilityNotSupported`](crate::error::MaetrikError).
//!
//! # Capabilities
//! - [`Queryable`]: execute a statement with positional parameters
//! - [`Introspectable`]: describe tables and columns
//! - [`HealthCheckable`]: cheap liveness probe
//! - [`Transactional`]: begin a [`Transaction`]

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::driver::{QueryResult, SchemaDefinition};
use crate::error::Result;

/// Capability flags advertised by a driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceCapabilities {
    pub queryable: bool,
    pub introspectable: bool,
    pub health_checkable: bool,
    pub transactional: bool,
}

impl DataSourceCapabilities {
    /// Every capability enabled (the SQL drivers)
    #[must_use]
    pub const fn all() -> Self {
        Self { queryable: true, introspectable: true, health_checkable: true, transactional: true }
    }

    /// Whether the given capability is advertised
    #[must_use]
    pub const fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::Queryable => self.queryable,
            Capability::Introspectable => self.introspectable,
            Capability::HealthCheckable => self.health_checkable,
            Capability::Transactional => self.transactional,
        }
    }
}

/// A single optional capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Queryable,
    Introspectable,
    HealthCheckable,
    Transactional,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Queryable => "queryable",
            Self::Introspectable => "introspectable",
            Self::HealthCheckable => "healthCheckable",
            Self::Transactional => "transactional",
        };
        f.write_str(name)
    }
}

/// Execute statements against a live data source
#[async_trait]
pub trait Queryable: Send + Sync {
    /// Execute `sql` with positional parameters
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;
}

/// Describe the tables and columns of a live data source
#[async_trait]
pub trait Introspectable: Send + Sync {
    async fn introspect(&self) -> Result<SchemaDefinition>;
}

/// Liveness probe
#[async_trait]
pub trait HealthCheckable: Send + Sync {
    /// `Ok(true)` when the data source answered
    async fn health_check(&self) -> Result<bool>;
}

/// Start transactions on a live data source
#[async_trait]
pub trait Transactional: Send + Sync {
    async fn begin_transaction<'a>(&'a self) -> Result<Box<dyn Transaction + 'a>>;
}

/// An open transaction
///
/// Callers should finish with [`commit`](Transaction::commit) or
/// [`rollback`](Transaction::rollback). A transaction dropped unfinished is
/// rolled back by its driver, at the latest before the driver's next statement.
#[async_trait]
pub trait Transaction: Send {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
