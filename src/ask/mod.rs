//! Ask Pipeline
//!
//! Question in, rows out: resolve the connection, build (or reuse) its semantic
//! layer, translate the question, refuse anything that is not a read-only
//! `SELECT`, execute, and shut the driver down.
//!
//! Every operation acquires its driver through
//! [`DataSourceManager::with_connection`], so the driver is released on every
//! exit path.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::connections::ConnectionStore;
use crate::driver::{QueryResult, SchemaDefinition};
use crate::error::{MaetrikError, Result};
use crate::manager::DataSourceManager;
use crate::query::{QueryTranslator, TranslationContext, DEFAULT_MAX_ROWS};
use crate::safety::ensure_select_only;
use crate::semantic::SemanticLayerCache;

/// SQL dialect name shown to the model for a data source type
#[must_use]
pub fn dialect_for(source_type: &str) -> &str {
    match source_type {
        "postgres" => "postgresql",
        "mysql" => "mysql",
        "sqlite" => "sqlite",
        "mssql" => "mssql",
        other => other,
    }
}

/// Rows plus column names, as returned to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryData {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub row_count: u64,
}

impl From<QueryResult> for QueryData {
    fn from(result: QueryResult) -> Self {
        Self {
            columns: result.fields.into_iter().map(|f| f.name).collect(),
            rows: result.rows,
            row_count: result.row_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskMeta {
    pub question: String,
    pub sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub confidence: f64,
    pub tables: Vec<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AskResponse {
    pub data: QueryData,
    pub meta: AskMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMeta {
    pub sql: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub data: QueryData,
    pub meta: QueryMeta,
}

pub struct AskService {
    manager: Arc<DataSourceManager>,
    store: Option<Arc<dyn ConnectionStore>>,
    translator: QueryTranslator,
    semantic: SemanticLayerCache,
    max_rows: usize,
}

impl AskService {
    #[must_use]
    pub fn new(manager: Arc<DataSourceManager>, translator: QueryTranslator) -> Self {
        Self {
            manager,
            store: None,
            translator,
            semantic: SemanticLayerCache::new(),
            max_rows: DEFAULT_MAX_ROWS,
        }
    }

    /// Persisted store consulted for the `enabled` flag
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ConnectionStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    #[must_use]
    pub fn manager(&self) -> &DataSourceManager {
        &self.manager
    }

    #[must_use]
    pub fn semantic(&self) -> &SemanticLayerCache {
        &self.semantic
    }

    /// Answer `question` against `connection`
    pub async fn ask(&self, connection: &str, question: &str) -> Result<AskResponse> {
        let started = Instant::now();
        let question = question.trim();
        if question.is_empty() {
            return Err(MaetrikError::invalid_input("Missing required field: question"));
        }
        self.ensure_usable(connection).await?;

        self.manager
            .with_connection(connection, |driver| async move {
                let queryable = driver.require_queryable()?;
                driver.require_introspectable()?;

                let layer = self.semantic.get_or_introspect(connection, driver.as_ref()).await?;
                let context = TranslationContext {
                    schema: layer.to_schema_definition(),
                    dialect: dialect_for(driver.source_type()).to_string(),
                    max_rows: Some(self.max_rows),
                };

                let translation = self.translator.translate(question, &context).await?;
                ensure_select_only(&translation.sql)?;
                debug!(connection, sql = %translation.sql, "Executing generated query");

                let result = queryable.execute(&translation.sql, &[]).await?;
                let duration_ms = elapsed_ms(started);
                info!(connection, rows = result.row_count, duration_ms, "Question answered");

                Ok(AskResponse {
                    data: result.into(),
                    meta: AskMeta {
                        question: question.to_string(),
                        sql: translation.sql,
                        explanation: translation.explanation,
                        confidence: translation.confidence,
                        tables: translation.suggested_tables,
                        duration_ms,
                    },
                })
            })
            .await
    }

    /// Run caller-supplied SQL under the same read-only rule
    ///
    /// The statement is checked before any connection is opened.
    pub async fn run_query(&self, connection: &str, sql: &str, params: &[Value]) -> Result<QueryResponse> {
        let started = Instant::now();
        ensure_select_only(sql)?;
        self.ensure_usable(connection).await?;

        self.manager
            .with_connection(connection, |driver| async move {
                let result = driver.require_queryable()?.execute(sql, params).await?;
                Ok(QueryResponse {
                    data: result.into(),
                    meta: QueryMeta { sql: sql.to_string(), duration_ms: elapsed_ms(started) },
                })
            })
            .await
    }

    /// Fresh raw schema for `connection`; the semantic cache is refreshed too
    pub async fn introspect(&self, connection: &str) -> Result<SchemaDefinition> {
        self.ensure_usable(connection).await?;

        let schema = self
            .manager
            .with_connection(connection, |driver| async move {
                driver.require_introspectable()?.introspect().await
            })
            .await?;

        self.semantic.invalidate(connection).await;
        Ok(schema)
    }

    async fn ensure_usable(&self, connection: &str) -> Result<()> {
        if !self.manager.has_connection(connection).await? {
            return Err(MaetrikError::not_found(connection));
        }
        if let Some(store) = &self.store {
            if let Some(record) = store.get_connection(connection).await? {
                if !record.enabled {
                    return Err(MaetrikError::ConnectionDisabled(connection.to_string()));
                }
            }
        }
        Ok(())
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::DataSourceCapabilities;
    use crate::connections::{
        CompositeConnectionResolver, ConnectionConfigSource, CreateConnectionInput,
        DatabaseConnectionConfigSource, FileConnectionConfigSource, MemoryConnectionStore,
        UpdateConnectionInput,
    };
    use crate::driver::DataSourceConfig;
    use crate::registry::DataSourceRegistry;
    use crate::testing::{FakeFactory, StaticCompletion};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    const ANSWER: &str = r#"{"sql":"SELECT COUNT(*) AS count FROM users","explanation":"Counts users","confidence":0.92,"tables":["users"]}"#;

    struct Fixture {
        service: AskService,
        store: Arc<MemoryConnectionStore>,
        completion: Arc<StaticCompletion>,
    }

    fn fixture(factory: FakeFactory, answer: &str) -> Fixture {
        let mut registry = DataSourceRegistry::new();
        registry.register(Arc::new(factory)).unwrap();

        let store = Arc::new(MemoryConnectionStore::new());
        let file = vec![DataSourceConfig::new("main", "postgres", Default::default())];
        let sources: Vec<Arc<dyn ConnectionConfigSource>> = vec![
            Arc::new(FileConnectionConfigSource::new(file).unwrap()),
            Arc::new(DatabaseConnectionConfigSource::new(store.clone())),
        ];
        let manager = DataSourceManager::new(
            Arc::new(registry),
            Arc::new(CompositeConnectionResolver::new(sources)),
        );

        let completion = Arc::new(StaticCompletion::new(answer));
        let service = AskService::new(Arc::new(manager), QueryTranslator::new(completion.clone()))
            .with_store(store.clone());
        Fixture { service, store, completion }
    }

    #[test]
    fn test_dialects() {
        assert_eq!(dialect_for("postgres"), "postgresql");
        assert_eq!(dialect_for("mysql"), "mysql");
        assert_eq!(dialect_for("sqlite"), "sqlite");
        assert_eq!(dialect_for("mssql"), "mssql");
        assert_eq!(dialect_for("clickhouse"), "clickhouse");
    }

    #[tokio::test]
    async fn test_duration_includes_connect_time() {
        let fx = fixture(FakeFactory::new("postgres").slow_init(Duration::from_millis(30)), ANSWER);

        let asked = fx.service.ask("main", "How many users?").await.unwrap();
        assert!(asked.meta.duration_ms >= 30, "ask took {}ms", asked.meta.duration_ms);

        let queried = fx.service.run_query("main", "SELECT 1", &[]).await.unwrap();
        assert!(queried.meta.duration_ms >= 30, "query took {}ms", queried.meta.duration_ms);
    }

    #[tokio::test]
    async fn test_ask_end_to_end() {
        let factory = FakeFactory::new("postgres");
        let probe = factory.probe();
        let fx = fixture(factory, ANSWER);

        let response = fx.service.ask("main", "How many users?").await.unwrap();
        assert_eq!(response.data.columns, vec!["count".to_string()]);
        assert_eq!(response.data.rows[0]["count"], json!(42));
        assert_eq!(response.data.row_count, 1);
        assert_eq!(response.meta.sql, "SELECT COUNT(*) AS count FROM users");
        assert_eq!(response.meta.tables, vec!["users".to_string()]);
        assert_eq!(response.meta.confidence, 0.92);

        let (prompt, _) = fx.completion.last_prompt().unwrap();
        assert!(prompt.contains("postgresql SQL queries"));
        assert!(prompt.contains("Add LIMIT 1000 unless"));

        assert_eq!(probe.executed(), vec!["SELECT COUNT(*) AS count FROM users".to_string()]);
        assert_eq!(probe.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_semantic_layer_reused_across_questions() {
        let factory = FakeFactory::new("postgres");
        let probe = factory.probe();
        let fx = fixture(factory, ANSWER);

        fx.service.ask("main", "first").await.unwrap();
        fx.service.ask("main", "second").await.unwrap();
        assert_eq!(probe.introspections(), 1);
        assert_eq!(probe.created(), 2);
        assert_eq!(probe.shutdowns(), 2);

        let layer = fx.service.semantic().get("main").await.unwrap();
        assert!(layer.relationships_inferred());
    }

    #[tokio::test]
    async fn test_generated_write_is_refused_and_driver_released() {
        let factory = FakeFactory::new("postgres");
        let probe = factory.probe();
        let fx = fixture(factory, r#"{"sql":"DELETE FROM users","confidence":0.99,"tables":["users"]}"#);

        let err = fx.service.ask("main", "Remove all users").await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_QUERY");
        assert!(probe.executed().is_empty());
        assert_eq!(probe.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_translation_releases_driver() {
        let factory = FakeFactory::new("postgres");
        let probe = factory.probe();
        let fx = fixture(factory, "no idea");

        let err = fx.service.ask("main", "?").await.unwrap_err();
        assert_eq!(err.error_code(), "TRANSLATION_PARSE_ERROR");
        assert_eq!(probe.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_missing_capability_is_not_supported() {
        let caps = DataSourceCapabilities { queryable: true, ..Default::default() };
        let factory = FakeFactory::new("postgres").with_capabilities(caps);
        let probe = factory.probe();
        let fx = fixture(factory, ANSWER);

        let err = fx.service.ask("main", "How many users?").await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_SUPPORTED");
        assert!(fx.completion.last_prompt().is_none());
        assert_eq!(probe.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_unknown_connection_and_empty_question() {
        let factory = FakeFactory::new("postgres");
        let probe = factory.probe();
        let fx = fixture(factory, ANSWER);

        let err = fx.service.ask("nope", "How many users?").await.unwrap_err();
        assert_eq!(err.error_code(), "CONNECTION_NOT_FOUND");

        let err = fx.service.ask("main", "   ").await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");
        assert_eq!(probe.created(), 0);
    }

    #[tokio::test]
    async fn test_disabled_connection_refused() {
        let factory = FakeFactory::new("postgres");
        let probe = factory.probe();
        let fx = fixture(factory, ANSWER);

        fx.store
            .create_connection(CreateConnectionInput {
                id: "archive".to_string(),
                source_type: "postgres".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        fx.store
            .update_connection("archive", UpdateConnectionInput { enabled: Some(false), ..Default::default() })
            .await
            .unwrap();

        let err = fx.service.ask("archive", "How many users?").await.unwrap_err();
        assert_eq!(err.error_code(), "CONNECTION_DISABLED");
        assert_eq!(probe.created(), 0);
    }

    #[tokio::test]
    async fn test_run_query_validates_before_connecting() {
        let factory = FakeFactory::new("postgres");
        let probe = factory.probe();
        let fx = fixture(factory, ANSWER);

        let err = fx.service.run_query("main", "DROP TABLE users", &[]).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_QUERY");
        assert_eq!(probe.created(), 0);

        let response = fx.service.run_query("main", "SELECT 1", &[json!(1)]).await.unwrap();
        assert_eq!(response.meta.sql, "SELECT 1");
        assert_eq!(response.data.row_count, 1);
        assert_eq!(probe.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_introspect_refreshes_cache() {
        let factory = FakeFactory::new("postgres");
        let probe = factory.probe();
        let fx = fixture(factory, ANSWER);

        fx.service.ask("main", "warm the cache").await.unwrap();
        assert!(fx.service.semantic().get("main").await.is_some());

        let schema = fx.service.introspect("main").await.unwrap();
        assert_eq!(schema.tables.len(), 2);
        assert!(fx.service.semantic().get("main").await.is_none());
        assert_eq!(probe.shutdowns(), 2);
    }

    #[tokio::test]
    async fn test_response_serializes_camel_case() {
        let fx = fixture(FakeFactory::new("postgres"), ANSWER);
        let response = fx.service.ask("main", "How many users?").await.unwrap();
        let value = serde_json::to_value(&response).unwrap();

        assert_eq!(value["data"]["rowCount"], json!(1));
        assert!(value["meta"]["durationMs"].is_u64());
        assert_eq!(value["meta"]["explanation"], json!("Counts users"));
    }
}
