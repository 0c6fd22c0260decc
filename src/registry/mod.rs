//! Data Source Factory Registry
//!
//! Maps a data source type string (`"sqlite"`, `"postgres"`, ...) to the
//! factory that builds drivers for it. The registry is built once at startup,
//! then shared read-only behind an `Arc`. Registering the same type twice is an
//! error, never an overwrite.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::capability::DataSourceCapabilities;
use crate::driver::{Credentials, DataSourceDriver};
use crate::error::{MaetrikError, Result};

/// Builds uninitialized drivers for one data source type
pub trait DataSourceFactory: Send + Sync {
    /// Registry key
    fn source_type(&self) -> &str;

    fn display_name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    /// Capabilities every driver from this factory advertises
    fn capabilities(&self) -> DataSourceCapabilities;

    /// JSON Schema of the credentials object
    fn credentials_schema(&self) -> Value;

    /// Form fields for interactive credential entry
    fn credentials_fields(&self) -> Vec<CredentialField> {
        Vec::new()
    }

    /// Check credentials without connecting
    fn validate_credentials(&self, credentials: &Credentials) -> Result<()>;

    /// A new, independent, uninitialized driver
    fn create(&self) -> Box<dyn DataSourceDriver>;

    fn info(&self) -> FactoryInfo {
        FactoryInfo {
            source_type: self.source_type().to_string(),
            display_name: self.display_name().to_string(),
            description: self.description().map(str::to_string),
            capabilities: self.capabilities(),
            credentials_schema: self.credentials_schema(),
            credentials_fields: self.credentials_fields(),
        }
    }
}

/// Serializable description of a registered factory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactoryInfo {
    #[serde(rename = "type")]
    pub source_type: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub capabilities: DataSourceCapabilities,
    pub credentials_schema: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub credentials_fields: Vec<CredentialField>,
}

/// Input widget kind for a credential field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Password,
    Number,
    Boolean,
}

/// One credential field as presented to an operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialField {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help_text: Option<String>,
}

impl CredentialField {
    fn new(name: &str, label: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            kind,
            required: true,
            placeholder: None,
            help_text: None,
        }
    }

    #[must_use]
    pub fn text(name: &str, label: &str) -> Self {
        Self::new(name, label, FieldKind::Text)
    }

    #[must_use]
    pub fn password(name: &str, label: &str) -> Self {
        Self::new(name, label, FieldKind::Password)
    }

    #[must_use]
    pub fn number(name: &str, label: &str) -> Self {
        Self::new(name, label, FieldKind::Number)
    }

    #[must_use]
    pub fn boolean(name: &str, label: &str) -> Self {
        Self::new(name, label, FieldKind::Boolean)
    }

    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    #[must_use]
    pub fn placeholder(mut self, placeholder: &str) -> Self {
        self.placeholder = Some(placeholder.to_string());
        self
    }

    #[must_use]
    pub fn help(mut self, help_text: &str) -> Self {
        self.help_text = Some(help_text.to_string());
        self
    }
}

/// Type-keyed factory registry
#[derive(Default)]
pub struct DataSourceRegistry {
    factories: HashMap<String, Arc<dyn DataSourceFactory>>,
}

impl DataSourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every driver compiled into this build
    pub fn builtin() -> Result<Self> {
        #[allow(unused_mut)]
        let mut registry = Self::new();

        #[cfg(feature = "sqlite")]
        registry.register(Arc::new(crate::driver::sqlite::SqliteFactory))?;

        #[cfg(feature = "postgres")]
        registry.register(Arc::new(crate::driver::postgres::PostgresFactory))?;

        #[cfg(feature = "mysql")]
        registry.register(Arc::new(crate::driver::mysql::MySqlFactory))?;

        Ok(registry)
    }

    /// Register a factory under its type
    ///
    /// Fails with `DuplicateFactory` if the type is already taken.
    pub fn register(&mut self, factory: Arc<dyn DataSourceFactory>) -> Result<()> {
        let source_type = factory.source_type().to_string();
        if self.factories.contains_key(&source_type) {
            return Err(MaetrikError::DuplicateFactory(source_type));
        }
        debug!(source_type = %source_type, "Registered data source factory");
        self.factories.insert(source_type, factory);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, source_type: &str) -> Option<Arc<dyn DataSourceFactory>> {
        self.factories.get(source_type).cloned()
    }

    #[must_use]
    pub fn has(&self, source_type: &str) -> bool {
        self.factories.contains_key(source_type)
    }

    /// All factories, sorted by type
    #[must_use]
    pub fn list(&self) -> Vec<Arc<dyn DataSourceFactory>> {
        let mut factories: Vec<_> = self.factories.values().cloned().collect();
        factories.sort_by(|a, b| a.source_type().cmp(b.source_type()));
        factories
    }

    #[must_use]
    pub fn describe(&self) -> Vec<FactoryInfo> {
        self.list().iter().map(|f| f.info()).collect()
    }
}
