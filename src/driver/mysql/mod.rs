//! MySQL Data Source Driver
//!
//! # Features
//! - Client-server connections via TCP (MySQL and MariaDB)
//! - Schema introspection via `information_schema` for the connected database
//! - Positional parameters (`?`) bound from JSON values
//!
//! # Implementation Notes
//! - Uses `mysql_async`; the connection needs `&mut`, so it lives behind a
//!   `tokio::sync::Mutex` and an open transaction holds the lock
//! - Column metadata is read from the result set header, so empty results keep their fields
//! - Binary data is Base64-encoded for JSON safety

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use mysql_async::prelude::{Protocol, Queryable as _};
use mysql_async::{Conn, OptsBuilder, Params, QueryResult as MyQueryResult, Row, Value as MyValue};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
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

const ENGINE: &str = "mysql";

const INTROSPECT_SQL: &str = "
    SELECT table_schema, table_name, column_name, data_type, is_nullable, column_key
    FROM information_schema.columns
    WHERE table_schema = DATABASE()
    ORDER BY table_name, ordinal_position";

const fn default_port() -> u16 {
    3306
}

/// MySQL credentials
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MySqlCredentials {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub database: String,

    #[serde(default)]
    pub user: Option<String>,

    /// WARNING: Sensitive data, do not log or include in error messages
    #[serde(default)]
    pub password: Option<String>,
}

impl MySqlCredentials {
    fn to_opts(&self) -> Result<OptsBuilder> {
        if self.host.trim().is_empty() {
            return Err(MaetrikError::invalid_credentials(ENGINE, "'host' cannot be empty"));
        }
        Ok(OptsBuilder::default()
            .ip_or_hostname(self.host.clone())
            .tcp_port(self.port)
            .user(self.user.clone())
            .pass(self.password.clone())
            .db_name(Some(self.database.clone())))
    }
}

/// Factory for [`MySqlDriver`]
pub struct MySqlFactory;

impl DataSourceFactory for MySqlFactory {
    fn source_type(&self) -> &str {
        ENGINE
    }

    fn display_name(&self) -> &str {
        "MySQL"
    }

    fn description(&self) -> Option<&str> {
        Some("MySQL or MariaDB server over TCP")
    }

    fn capabilities(&self) -> DataSourceCapabilities {
        DataSourceCapabilities::all()
    }

    fn credentials_schema(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(MySqlCredentials)).unwrap_or_default()
    }

    fn credentials_fields(&self) -> Vec<CredentialField> {
        vec![
            CredentialField::text("host", "Host").placeholder("localhost"),
            CredentialField::number("port", "Port").optional().placeholder("3306"),
            CredentialField::text("database", "Database"),
            CredentialField::text("user", "User").optional(),
            CredentialField::password("password", "Password").optional(),
        ]
    }

    fn validate_credentials(&self, credentials: &Credentials) -> Result<()> {
        let creds: MySqlCredentials = parse_credentials(ENGINE, credentials)?;
        creds.to_opts().map(|_| ())
    }

    fn create(&self) -> Box<dyn DataSourceDriver> {
        Box::new(MySqlDriver::new())
    }
}

/// Live MySQL handle
#[derive(Default)]
pub struct MySqlDriver {
    conn: Mutex<Option<Conn>>,
    /// Set when a transaction is dropped unfinished; cleared by the next `ROLLBACK`
    rollback_pending: AtomicBool,
}

impl MySqlDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock(&self) -> Result<MutexGuard<'_, Option<Conn>>> {
        let mut guard = self.conn.lock().await;
        let conn = connection(&mut guard)?;
        if self.rollback_pending.swap(false, Ordering::SeqCst) {
            debug!("Rolling back abandoned MySQL transaction");
            run_statement(conn, "ROLLBACK").await?;
        }
        Ok(guard)
    }
}

fn connection<'g>(guard: &'g mut MutexGuard<'_, Option<Conn>>) -> Result<&'g mut Conn> {
    guard
        .as_mut()
        .ok_or_else(|| MaetrikError::connection_failed("MySQL driver is not initialized"))
}

#[async_trait]
impl DataSourceDriver for MySqlDriver {
    fn name(&self) -> &str {
        "MySQL"
    }

    fn source_type(&self) -> &str {
        ENGINE
    }

    fn capabilities(&self) -> DataSourceCapabilities {
        DataSourceCapabilities::all()
    }

    async fn init(&self, config: &DataSourceConfig) -> Result<()> {
        let creds: MySqlCredentials = parse_credentials(ENGINE, &config.credentials)?;
        let conn = Conn::new(creds.to_opts()?).await.map_err(|e| {
            MaetrikError::connection_failed(format!("Failed to connect to MySQL: {e}"))
        })?;
        *self.conn.lock().await = Some(conn);
        self.rollback_pending.store(false, Ordering::SeqCst);
        debug!(connection = %config.id, host = %creds.host, "Connected to MySQL");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let conn = self.conn.lock().await.take();
        self.rollback_pending.store(false, Ordering::SeqCst);
        if let Some(conn) = conn {
            conn.disconnect().await.map_err(|e| {
                MaetrikError::engine_error(ENGINE, format!("Failed to disconnect: {e}"))
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
impl Queryable for MySqlDriver {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let mut guard = self.lock().await?;
        execute_query(connection(&mut guard)?, sql, params).await
    }
}

#[async_trait]
impl Introspectable for MySqlDriver {
    async fn introspect(&self) -> Result<SchemaDefinition> {
        let mut guard = self.lock().await?;
        let rows: Vec<(String, String, String, String, String, String)> =
            connection(&mut guard)?.query(INTROSPECT_SQL).await.map_err(|e| {
                MaetrikError::engine_error(ENGINE, format!("Failed to query columns: {e}"))
            })?;

        let mut tables: Vec<SchemaTable> = Vec::new();
        for (schema, table, column, data_type, is_nullable, column_key) in rows {
            let column = SchemaColumn::new(column, data_type, is_nullable == "YES", column_key == "PRI");
            match tables.last_mut() {
                Some(last) if last.name == table => last.columns.push(column),
                _ => tables.push(SchemaTable {
                    name: table,
                    schema: Some(schema),
                    description: None,
                    columns: vec![column],
                }),
            }
        }

        Ok(SchemaDefinition { tables })
    }
}

#[async_trait]
impl HealthCheckable for MySqlDriver {
    async fn health_check(&self) -> Result<bool> {
        let mut guard = self.lock().await?;
        connection(&mut guard)?
            .ping()
            .await
            .map(|()| true)
            .map_err(|e| MaetrikError::query_failed(format!("Health check failed: {e}")))
    }
}

#[async_trait]
impl Transactional for MySqlDriver {
    async fn begin_transaction<'a>(&'a self) -> Result<Box<dyn Transaction + 'a>> {
        let mut guard = self.lock().await?;
        run_statement(connection(&mut guard)?, "START TRANSACTION").await?;
        Ok(Box::new(MySqlTransaction { guard, rollback_pending: &self.rollback_pending, finished: false }))
    }
}

/// Open transaction; holds the connection lock until finished
///
/// If dropped unfinished, the driver rolls it back before its next statement.
struct MySqlTransaction<'a> {
    guard: MutexGuard<'a, Option<Conn>>,
    rollback_pending: &'a AtomicBool,
    finished: bool,
}

impl MySqlTransaction<'_> {
    async fn finish(&mut self, statement: &str) -> Result<()> {
        run_statement(connection(&mut self.guard)?, statement).await?;
        self.finished = true;
        Ok(())
    }
}

#[async_trait]
impl Transaction for MySqlTransaction<'_> {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        execute_query(connection(&mut self.guard)?, sql, params).await
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for MySqlTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("MySQL transaction dropped without commit or rollback; rolling back on next use");
            self.rollback_pending.store(true, Ordering::SeqCst);
        }
    }
}

async fn run_statement(conn: &mut Conn, statement: &str) -> Result<()> {
    conn.query_drop(statement)
        .await
        .map_err(|e| MaetrikError::query_failed(format!("{statement} failed: {e}")))
}

async fn execute_query(conn: &mut Conn, query: &str, params: &[Value]) -> Result<QueryResult> {
    if params.is_empty() {
        let result = conn.query_iter(query).await.map_err(query_failed)?;
        collect_result(result).await
    } else {
        let bound: Vec<MyValue> = params.iter().map(json_to_mysql).collect();
        let result = conn.exec_iter(query, Params::Positional(bound)).await.map_err(query_failed)?;
        collect_result(result).await
    }
}

/// Read the first result set; column metadata is taken before any row
async fn collect_result<P: Protocol>(mut result: MyQueryResult<'_, 'static, P>) -> Result<QueryResult> {
    let fields: Vec<FieldInfo> = result.columns_ref().iter().map(|c| FieldInfo::named(c.name_str())).collect();
    let rows: Vec<Row> = result.collect().await.map_err(query_failed)?;
    let affected = result.affected_rows();
    result.drop_result().await.map_err(query_failed)?;

    // No columns means a statement without a result set
    if fields.is_empty() {
        return Ok(QueryResult { rows: Vec::new(), row_count: affected, fields });
    }

    let rows = rows.iter().map(row_to_json).collect::<Result<Vec<_>>>()?;
    Ok(QueryResult { row_count: rows.len() as u64, rows, fields })
}

fn query_failed(err: mysql_async::Error) -> MaetrikError {
    MaetrikError::query_failed(format!("Failed to execute query: {err}"))
}

/// Convert a MySQL row to a JSON object keyed by column name
fn row_to_json(row: &Row) -> Result<serde_json::Map<String, Value>> {
    let mut object = serde_json::Map::with_capacity(row.len());
    for (idx, column) in row.columns_ref().iter().enumerate() {
        object.insert(column.name_str().to_string(), mysql_value_to_json(row, idx)?);
    }
    Ok(object)
}

/// Convert MySQL value to JSON value
fn mysql_value_to_json(row: &Row, idx: usize) -> Result<Value> {
    let value = row
        .as_ref(idx)
        .ok_or_else(|| MaetrikError::query_failed(format!("Failed to get value at index {idx}")))?;

    Ok(match value {
        MyValue::NULL => Value::Null,
        MyValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => Value::String(s.to_string()),
            Err(_) => {
                use base64::Engine;
                Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
            }
        },
        MyValue::Int(i) => Value::from(*i),
        MyValue::UInt(u) => Value::from(*u),
        MyValue::Float(f) => serde_json::Number::from_f64(f64::from(*f)).map_or(Value::Null, Value::Number),
        MyValue::Double(d) => serde_json::Number::from_f64(*d).map_or(Value::Null, Value::Number),
        MyValue::Date(year, month, day, hour, minute, second, micro) => Value::String(format!(
            "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{micro:06}"
        )),
        MyValue::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if *is_negative { "-" } else { "" };
            let total_hours = days * 24 + u32::from(*hours);
            Value::String(format!("{sign}{total_hours}:{minutes:02}:{seconds:02}.{micros:06}"))
        }
    })
}

/// Convert a JSON parameter to a bindable MySQL value
fn json_to_mysql(value: &Value) -> MyValue {
    match value {
        Value::Null => MyValue::NULL,
        Value::Bool(b) => MyValue::Int(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                MyValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                MyValue::UInt(u)
            } else {
                MyValue::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => MyValue::Bytes(s.as_bytes().to_vec()),
        other => MyValue::Bytes(other.to_string().into_bytes()),
    }
}
