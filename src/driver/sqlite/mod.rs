//! `SQLite` Data Source Driver
//!
//! # Features
//! - File-based connections (`/path/to/db.sqlite`)
//! - In-memory connections (`:memory:`)
//! - Schema introspection via `sqlite_master` and `PRAGMA table_info`
//! - Positional parameters (`?`) bound from JSON values
//! - Transactions via `BEGIN` / `COMMIT` / `ROLLBACK`
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver, calls are short and run inline)
//! - The connection sits behind a `std::sync::Mutex`, never held across `.await`
//! - BLOB data is Base64-encoded for JSON safety

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OpenFlags, Row};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::capability::{
    DataSourceCapabilities, HealthCheckable, Introspectable, Queryable, Transaction, Transactional,
};
use crate::driver::{
    parse_credentials, Credentials, DataSourceConfig, DataSourceDriver, FieldInfo, QueryResult,
    SchemaColumn, SchemaDefinition, SchemaTable,
};
use crate::error::{MaetrikError, Result};
use crate::registry::{CredentialField, DataSourceFactory};

const ENGINE: &str = "sqlite";

/// `SQLite` credentials
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SqliteCredentials {
    /// Database file path, or `:memory:`
    pub file: PathBuf,

    /// Open the file read-only
    #[serde(default)]
    pub readonly: bool,
}

/// Factory for [`SqliteDriver`]
pub struct SqliteFactory;

impl DataSourceFactory for SqliteFactory {
    fn source_type(&self) -> &str {
        ENGINE
    }

    fn display_name(&self) -> &str {
        "SQLite"
    }

    fn description(&self) -> Option<&str> {
        Some("Local SQLite database file")
    }

    fn capabilities(&self) -> DataSourceCapabilities {
        DataSourceCapabilities::all()
    }

    fn credentials_schema(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(SqliteCredentials)).unwrap_or_default()
    }

    fn credentials_fields(&self) -> Vec<CredentialField> {
        vec![
            CredentialField::text("file", "Database file").placeholder("./data/app.db"),
            CredentialField::boolean("readonly", "Read-only").optional(),
        ]
    }

    fn validate_credentials(&self, credentials: &Credentials) -> Result<()> {
        let creds: SqliteCredentials = parse_credentials(ENGINE, credentials)?;
        if creds.file.as_os_str().is_empty() {
            return Err(MaetrikError::invalid_credentials(ENGINE, "'file' cannot be empty"));
        }
        Ok(())
    }

    fn create(&self) -> Box<dyn DataSourceDriver> {
        Box::new(SqliteDriver::new())
    }
}

/// Live `SQLite` handle
#[derive(Default)]
pub struct SqliteDriver {
    conn: Mutex<Option<Connection>>,
}

impl SqliteDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|_| MaetrikError::engine_error(ENGINE, "Connection lock poisoned"))
    }

    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.lock()?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| MaetrikError::connection_failed("SQLite driver is not initialized"))?;
        f(conn)
    }
}

#[async_trait]
impl DataSourceDriver for SqliteDriver {
    fn name(&self) -> &str {
        "SQLite"
    }

    fn source_type(&self) -> &str {
        ENGINE
    }

    fn capabilities(&self) -> DataSourceCapabilities {
        DataSourceCapabilities::all()
    }

    async fn init(&self, config: &DataSourceConfig) -> Result<()> {
        let creds: SqliteCredentials = parse_credentials(ENGINE, &config.credentials)?;
        let path_str = creds.file.to_str().ok_or_else(|| {
            MaetrikError::invalid_credentials(ENGINE, "file path contains invalid UTF-8 characters")
        })?;
        let conn = open_connection(path_str, creds.readonly)?;
        *self.lock()? = Some(conn);
        debug!(connection = %config.id, readonly = creds.readonly, "Opened SQLite database");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let conn = self.lock()?.take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| {
                MaetrikError::engine_error(ENGINE, format!("Failed to close database: {e}"))
            })?;
        }
        Ok(())
    }

    fn as_queryable(&self) -> Option<&dyn Queryable> {
        Some(self)
    }

    fn as_introspectable(&self) -> Option<&dyn Introspectable> {
        Some(self)
    }

    fn as_health_checkable(&self) -> Option<&dyn HealthCheckable> {
        Some(self)
    }

    fn as_transactional(&self) -> Option<&dyn Transactional> {
        Some(self)
    }
}

#[async_trait]
impl Queryable for SqliteDriver {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.with_connection(|conn| execute_query(conn, sql, params))
    }
}

#[async_trait]
impl Introspectable for SqliteDriver {
    async fn introspect(&self) -> Result<SchemaDefinition> {
        self.with_connection(introspect_schema)
    }
}

#[async_trait]
impl HealthCheckable for SqliteDriver {
    async fn health_check(&self) -> Result<bool> {
        self.with_connection(|conn| {
            let one: i64 = conn
                .query_row("SELECT 1", [], |row| row.get(0))
                .map_err(|e| MaetrikError::query_failed(format!("Health check failed: {e}")))?;
            Ok(one == 1)
        })
    }
}

#[async_trait]
impl Transactional for SqliteDriver {
    async fn begin_transaction<'a>(&'a self) -> Result<Box<dyn Transaction + 'a>> {
        self.with_connection(|conn| run_batch(conn, "BEGIN"))?;
        Ok(Box::new(SqliteTransaction { driver: self, finished: false }))
    }
}

/// Open transaction on a [`SqliteDriver`]; rolled back on drop if unfinished
struct SqliteTransaction<'a> {
    driver: &'a SqliteDriver,
    finished: bool,
}

impl SqliteTransaction<'_> {
    fn finish(&mut self, statement: &str) -> Result<()> {
        self.driver.with_connection(|conn| run_batch(conn, statement))?;
        self.finished = true;
        Ok(())
    }
}

#[async_trait]
impl Transaction for SqliteTransaction<'_> {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.driver.with_connection(|conn| execute_query(conn, sql, params))
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.finish("COMMIT")
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK")
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.driver.with_connection(|conn| run_batch(conn, "ROLLBACK")) {
                warn!(error = %e, "Failed to roll back abandoned SQLite transaction");
            }
        }
    }
}

/// Open `SQLite` connection with appropriate flags
fn open_connection(path: &str, read_only: bool) -> Result<Connection> {
    let flags = if read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
    };

    Connection::open_with_flags(path, flags)
        .map_err(|e| MaetrikError::connection_failed(format!("Failed to open SQLite database: {e}")))
}

fn run_batch(conn: &Connection, statement: &str) -> Result<()> {
    conn.execute_batch(statement)
        .map_err(|e| MaetrikError::query_failed(format!("{statement} failed: {e}")))
}

fn introspect_schema(conn: &Connection) -> Result<SchemaDefinition> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table'
             AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .map_err(|e| MaetrikError::engine_error(ENGINE, format!("Failed to query tables: {e}")))?;

    let table_names: Vec<String> = stmt
        .query_map([], |row| row.get(0))
        .and_then(Iterator::collect)
        .map_err(|e| MaetrikError::engine_error(ENGINE, format!("Failed to fetch table names: {e}")))?;

    let tables = table_names
        .into_iter()
        .map(|name| introspect_table(conn, name))
        .collect::<Result<Vec<_>>>()?;

    Ok(SchemaDefinition { tables })
}

fn introspect_table(conn: &Connection, table_name: String) -> Result<SchemaTable> {
    let quoted = table_name.replace('"', "\"\"");
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{quoted}\")")).map_err(|e| {
        MaetrikError::engine_error(ENGINE, format!("Failed to prepare table_info for {table_name}: {e}"))
    })?;

    // table_info: cid, name, type, notnull, dflt_value, pk
    let columns: Vec<SchemaColumn> = stmt
        .query_map([], |row| {
            let is_primary_key = row.get::<_, i32>(5)? > 0;
            let not_null = row.get::<_, i32>(3)? != 0;
            Ok(SchemaColumn::new(
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                !not_null && !is_primary_key,
                is_primary_key,
            ))
        })
        .and_then(Iterator::collect)
        .map_err(|e| {
            MaetrikError::engine_error(ENGINE, format!("Failed to query columns for {table_name}: {e}"))
        })?;

    Ok(SchemaTable { name: table_name, schema: Some("main".to_string()), description: None, columns })
}

/// Execute a statement and return `QueryResult`
fn execute_query(conn: &Connection, query: &str, params: &[Value]) -> Result<QueryResult> {
    let mut stmt = conn
        .prepare(query)
        .map_err(|e| MaetrikError::query_failed(format!("Failed to prepare query: {e}")))?;

    let column_names: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();
    let bound: Vec<SqlValue> = params.iter().map(json_to_sqlite).collect();

    if column_names.is_empty() {
        // No result set (INSERT, UPDATE, DELETE, DDL)
        let changed = stmt
            .execute(params_from_iter(bound.iter()))
            .map_err(|e| MaetrikError::query_failed(format!("Failed to execute query: {e}")))?;
        return Ok(QueryResult { rows: Vec::new(), row_count: changed as u64, fields: Vec::new() });
    }

    let rows = stmt
        .query(params_from_iter(bound.iter()))
        .map_err(|e| MaetrikError::query_failed(format!("Failed to execute query: {e}")))?;

    let rows: Vec<serde_json::Map<String, Value>> = rows
        .mapped(|row| row_to_json(&column_names, row))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| MaetrikError::query_failed(format!("Failed to fetch row: {e}")))?;

    Ok(QueryResult {
        row_count: rows.len() as u64,
        rows,
        fields: column_names.into_iter().map(FieldInfo::named).collect(),
    })
}

/// Convert a `SQLite` row to a JSON object keyed by column name
fn row_to_json(
    column_names: &[String],
    row: &Row,
) -> std::result::Result<serde_json::Map<String, Value>, rusqlite::Error> {
    let mut object = serde_json::Map::with_capacity(column_names.len());
    for (idx, name) in column_names.iter().enumerate() {
        object.insert(name.clone(), sqlite_value_to_json(row, idx)?);
    }
    Ok(object)
}

/// Convert `SQLite` value to JSON value
fn sqlite_value_to_json(row: &Row, idx: usize) -> std::result::Result<Value, rusqlite::Error> {
    use rusqlite::types::ValueRef;

    Ok(match row.get_ref(idx)? {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(s) => {
            let text = std::str::from_utf8(s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
            })?;
            Value::String(text.to_string())
        }
        ValueRef::Blob(b) => {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
    })
}

/// Convert a JSON parameter to a bindable `SQLite` value
fn json_to_sqlite(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}
