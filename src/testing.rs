//! In-crate test doubles: a configurable fake driver and a canned completion backend

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::capability::{DataSourceCapabilities, HealthCheckable, Introspectable, Queryable};
use crate::driver::{
    Credentials, DataSourceConfig, DataSourceDriver, FieldInfo, QueryResult, SchemaColumn,
    SchemaDefinition, SchemaTable,
};
use crate::error::{MaetrikError, Result};
use crate::llm::{CompletionBackend, CompletionOptions, CompletionResult};
use crate::registry::DataSourceFactory;

/// Counters shared by every driver a [`FakeFactory`] creates
#[derive(Default)]
pub(crate) struct DriverProbe {
    pub created: AtomicUsize,
    pub inits: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub introspections: AtomicUsize,
    pub executed: Mutex<Vec<String>>,
    pub shut_down_instances: Mutex<Vec<usize>>,
}

impl DriverProbe {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn introspections(&self) -> usize {
        self.introspections.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// Creation index of every driver shut down so far, in order
    pub fn shut_down_instances(&self) -> Vec<usize> {
        self.shut_down_instances.lock().unwrap().clone()
    }
}

/// `users(id uuid pk, email varchar)` and `orders(id, user_id, total)`
pub(crate) fn shop_schema() -> SchemaDefinition {
    SchemaDefinition {
        tables: vec![
            SchemaTable {
                name: "users".to_string(),
                schema: Some("public".to_string()),
                description: None,
                columns: vec![
                    SchemaColumn::new("id", "uuid", false, true),
                    SchemaColumn::new("email", "varchar", true, false),
                ],
            },
            SchemaTable {
                name: "orders".to_string(),
                schema: Some("public".to_string()),
                description: Some("Customer orders".to_string()),
                columns: vec![
                    SchemaColumn::new("id", "integer", false, true),
                    SchemaColumn::new("user_id", "uuid", false, false),
                    SchemaColumn::new("total", "numeric", true, false),
                ],
            },
        ],
    }
}

#[derive(Clone)]
pub(crate) struct FakeFactory {
    source_type: String,
    capabilities: DataSourceCapabilities,
    schema: SchemaDefinition,
    result: QueryResult,
    fail_init: bool,
    init_delay: Option<Duration>,
    healthy: bool,
    probe: Arc<DriverProbe>,
}

impl FakeFactory {
    pub fn new(source_type: &str) -> Self {
        Self {
            source_type: source_type.to_string(),
            capabilities: DataSourceCapabilities {
                queryable: true,
                introspectable: true,
                health_checkable: true,
                transactional: false,
            },
            schema: shop_schema(),
            result: QueryResult {
                rows: vec![json!({"count": 42}).as_object().cloned().unwrap_or_default()],
                row_count: 1,
                fields: vec![FieldInfo::named("count")],
            },
            fail_init: false,
            init_delay: None,
            healthy: true,
            probe: Arc::new(DriverProbe::default()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: DataSourceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Each driver's `init` sleeps this long before succeeding
    pub fn slow_init(mut self, delay: Duration) -> Self {
        self.init_delay = Some(delay);
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn probe(&self) -> Arc<DriverProbe> {
        Arc::clone(&self.probe)
    }
}

impl DataSourceFactory for FakeFactory {
    fn source_type(&self) -> &str {
        &self.source_type
    }

    fn display_name(&self) -> &str {
        "Fake"
    }

    fn capabilities(&self) -> DataSourceCapabilities {
        self.capabilities
    }

    fn credentials_schema(&self) -> Value {
        json!({"type": "object"})
    }

    fn validate_credentials(&self, credentials: &Credentials) -> Result<()> {
        if credentials.contains_key("invalid") {
            return Err(MaetrikError::invalid_credentials(&self.source_type, "rejected"));
        }
        Ok(())
    }

    fn create(&self) -> Box<dyn DataSourceDriver> {
        let instance = self.probe.created.fetch_add(1, Ordering::SeqCst);
        Box::new(FakeDriver { factory: self.clone(), instance })
    }
}

pub(crate) struct FakeDriver {
    factory: FakeFactory,
    instance: usize,
}

#[async_trait]
impl DataSourceDriver for FakeDriver {
    fn name(&self) -> &str {
        "Fake"
    }

    fn source_type(&self) -> &str {
        &self.factory.source_type
    }

    fn capabilities(&self) -> DataSourceCapabilities {
        self.factory.capabilities
    }

    async fn init(&self, _config: &DataSourceConfig) -> Result<()> {
        self.factory.probe.inits.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.factory.init_delay {
            tokio::time::sleep(delay).await;
        }
        if self.factory.fail_init {
            return Err(MaetrikError::connection_failed("fake init failure"));
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.factory.probe.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.factory.probe.shut_down_instances.lock().unwrap().push(self.instance);
        Ok(())
    }

    fn as_queryable(&self) -> Option<&dyn Queryable> {
        self.factory.capabilities.queryable.then_some(self as &dyn Queryable)
    }

    fn as_introspectable(&self) -> Option<&dyn Introspectable> {
        self.factory.capabilities.introspectable.then_some(self as &dyn Introspectable)
    }

    fn as_health_checkable(&self) -> Option<&dyn HealthCheckable> {
        self.factory.capabilities.health_checkable.then_some(self as &dyn HealthCheckable)
    }
}

#[async_trait]
impl Queryable for FakeDriver {
    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        self.factory.probe.executed.lock().unwrap().push(sql.to_string());
        Ok(self.factory.result.clone())
    }
}

#[async_trait]
impl Introspectable for FakeDriver {
    async fn introspect(&self) -> Result<SchemaDefinition> {
        self.factory.probe.introspections.fetch_add(1, Ordering::SeqCst);
        Ok(self.factory.schema.clone())
    }
}

#[async_trait]
impl HealthCheckable for FakeDriver {
    async fn health_check(&self) -> Result<bool> {
        if self.factory.healthy {
            Ok(true)
        } else {
            Err(MaetrikError::query_failed("fake probe failure"))
        }
    }
}

/// Completion backend answering every prompt with the same text
pub(crate) struct StaticCompletion {
    content: String,
    pub prompts: Mutex<Vec<(String, CompletionOptions)>>,
}

impl StaticCompletion {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into(), prompts: Mutex::new(Vec::new()) }
    }

    pub fn last_prompt(&self) -> Option<(String, CompletionOptions)> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CompletionBackend for StaticCompletion {
    fn name(&self) -> &str {
        "static"
    }

    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> Result<CompletionResult> {
        self.prompts.lock().unwrap().push((prompt.to_string(), options.clone()));
        Ok(CompletionResult { content: self.content.clone(), usage: None })
    }
}
