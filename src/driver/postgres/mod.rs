//! `PostgreSQL` Data Source Driver
//!
//! # Features
//! - Client-server connections via TCP
//! - Schema introspection via `information_schema` (all non-system schemas)
//! - Positional parameters (`$1`, `$2`, ...) coerced from JSON to the types
//!   the server inferred for the prepared statement
//! - Rich type mapping (JSON/JSONB, timestamps, UUID, NUMERIC, BYTEA)
//!
//! # Implementation Notes
//! - Uses `tokio-postgres` with `NoTls`; `ssl: true` is rejected up front
//! - The connection future runs on its own task for the life of the client
//! - BYTEA data is Base64-encoded, NUMERIC is rendered as an exact decimal string

use std::error::Error as StdError;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{RwLock, RwLockReadGuard};
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row};
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

const ENGINE: &str = "postgres";

const INTROSPECT_SQL: &str = "
    SELECT c.table_schema, c.table_name, c.column_name, c.data_type, c.is_nullable,
           EXISTS (
               SELECT 1
               FROM information_schema.table_constraints tc
               JOIN information_schema.key_column_usage kcu
                 ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
                AND tc.table_name = kcu.table_name
               WHERE tc.constraint_type = 'PRIMARY KEY'
                 AND tc.table_schema = c.table_schema
                 AND tc.table_name = c.table_name
                 AND kcu.column_name = c.column_name
           ) AS is_primary_key
    FROM information_schema.columns c
    JOIN information_schema.tables t
      ON t.table_schema = c.table_schema AND t.table_name = c.table_name
    WHERE c.table_schema NOT IN ('pg_catalog', 'information_schema')
      AND t.table_type = 'BASE TABLE'
    ORDER BY c.table_schema, c.table_name, c.ordinal_position";

const fn default_port() -> u16 {
    5432
}

/// `PostgreSQL` credentials
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PostgresCredentials {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub database: String,

    /// Defaults to `postgres`
    #[serde(default)]
    pub user: Option<String>,

    /// WARNING: Sensitive data, do not log or include in error messages
    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub ssl: bool,
}

impl PostgresCredentials {
    fn to_pg_config(&self) -> Result<Config> {
        if self.ssl {
            return Err(MaetrikError::invalid_credentials(ENGINE, "TLS connections are not supported"));
        }
        if self.host.trim().is_empty() {
            return Err(MaetrikError::invalid_credentials(ENGINE, "'host' cannot be empty"));
        }

        let mut pg_config = Config::new();
        pg_config
            .host(&self.host)
            .port(self.port)
            .user(self.user.as_deref().unwrap_or("postgres"))
            .dbname(&self.database);
        if let Some(password) = &self.password {
            pg_config.password(password);
        }
        Ok(pg_config)
    }
}

/// Factory for [`PostgresDriver`]
pub struct PostgresFactory;

impl DataSourceFactory for PostgresFactory {
    fn source_type(&self) -> &str {
        ENGINE
    }

    fn display_name(&self) -> &str {
        "PostgreSQL"
    }

    fn description(&self) -> Option<&str> {
        Some("PostgreSQL server over TCP")
    }

    fn capabilities(&self) -> DataSourceCapabilities {
        DataSourceCapabilities::all()
    }

    fn credentials_schema(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(PostgresCredentials)).unwrap_or_default()
    }

    fn credentials_fields(&self) -> Vec<CredentialField> {
        vec![
            CredentialField::text("host", "Host").placeholder("localhost"),
            CredentialField::number("port", "Port").optional().placeholder("5432"),
            CredentialField::text("database", "Database"),
            CredentialField::text("user", "User").optional().placeholder("postgres"),
            CredentialField::password("password", "Password").optional(),
        ]
    }

    fn validate_credentials(&self, credentials: &Credentials) -> Result<()> {
        let creds: PostgresCredentials = parse_credentials(ENGINE, credentials)?;
        creds.to_pg_config().map(|_| ())
    }

    fn create(&self) -> Box<dyn DataSourceDriver> {
        Box::new(PostgresDriver::new())
    }
}

/// Live `PostgreSQL` handle
#[derive(Default)]
pub struct PostgresDriver {
    client: RwLock<Option<Client>>,
    /// Set when a transaction is dropped unfinished; cleared by the next `ROLLBACK`
    rollback_pending: AtomicBool,
}

impl PostgresDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self) -> Result<ClientGuard<'_>> {
        let guard = ClientGuard(self.client.read().await);
        let client = guard.get()?;
        if self.rollback_pending.swap(false, Ordering::SeqCst) {
            debug!("Rolling back abandoned PostgreSQL transaction");
            batch(client, "ROLLBACK").await?;
        }
        Ok(guard)
    }
}

/// Read guard over an initialized client
struct ClientGuard<'a>(RwLockReadGuard<'a, Option<Client>>);

impl ClientGuard<'_> {
    fn get(&self) -> Result<&Client> {
        self.0
            .as_ref()
            .ok_or_else(|| MaetrikError::connection_failed("PostgreSQL driver is not initialized"))
    }
}

#[async_trait]
impl DataSourceDriver for PostgresDriver {
    fn name(&self) -> &str {
        "PostgreSQL"
    }

    fn source_type(&self) -> &str {
        ENGINE
    }

    fn capabilities(&self) -> DataSourceCapabilities {
        DataSourceCapabilities::all()
    }

    async fn init(&self, config: &DataSourceConfig) -> Result<()> {
        let creds: PostgresCredentials = parse_credentials(ENGINE, &config.credentials)?;
        let pg_config = creds.to_pg_config()?;

        let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
            MaetrikError::connection_failed(format!("Failed to connect to PostgreSQL: {e}"))
        })?;

        // Connection errors are not logged to prevent credential leakage
        tokio::spawn(async move {
            let _ = connection.await;
        });

        *self.client.write().await = Some(client);
        self.rollback_pending.store(false, Ordering::SeqCst);
        debug!(connection = %config.id, host = %creds.host, "Connected to PostgreSQL");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        // Dropping the client ends the connection task and any open transaction
        self.client.write().await.take();
        self.rollback_pending.store(false, Ordering::SeqCst);
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
impl Queryable for PostgresDriver {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let guard = self.client().await?;
        execute_query(guard.get()?, sql, params).await
    }
}

#[async_trait]
impl Introspectable for PostgresDriver {
    async fn introspect(&self) -> Result<SchemaDefinition> {
        let guard = self.client().await?;
        let rows = guard.get()?.query(INTROSPECT_SQL, &[]).await.map_err(|e| {
            MaetrikError::engine_error(ENGINE, format!("Failed to query columns: {e}"))
        })?;

        let mut tables: Vec<SchemaTable> = Vec::new();
        for row in rows {
            let schema: String = row.get(0);
            let table: String = row.get(1);
            let column = SchemaColumn::new(
                row.get::<_, String>(2),
                row.get::<_, String>(3),
                row.get::<_, String>(4) == "YES",
                row.get::<_, bool>(5),
            );

            match tables.last_mut() {
                Some(last) if last.name == table && last.schema.as_deref() == Some(schema.as_str()) => {
                    last.columns.push(column);
                }
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
impl HealthCheckable for PostgresDriver {
    async fn health_check(&self) -> Result<bool> {
        let guard = self.client().await?;
        let client = guard.get()?;
        if client.is_closed() {
            return Ok(false);
        }
        client
            .simple_query("SELECT 1")
            .await
            .map(|_| true)
            .map_err(|e| MaetrikError::query_failed(format!("Health check failed: {e}")))
    }
}

#[async_trait]
impl Transactional for PostgresDriver {
    async fn begin_transaction<'a>(&'a self) -> Result<Box<dyn Transaction + 'a>> {
        let guard = self.client().await?;
        batch(guard.get()?, "BEGIN").await?;
        Ok(Box::new(PostgresTransaction { guard, rollback_pending: &self.rollback_pending, finished: false }))
    }
}

/// Open transaction on a [`PostgresDriver`]
///
/// Statements issued through the driver itself while a transaction is open
/// run inside it. If dropped unfinished, the driver rolls it back before its
/// next statement.
struct PostgresTransaction<'a> {
    guard: ClientGuard<'a>,
    rollback_pending: &'a AtomicBool,
    finished: bool,
}

impl PostgresTransaction<'_> {
    async fn finish(&mut self, statement: &str) -> Result<()> {
        batch(self.guard.get()?, statement).await?;
        self.finished = true;
        Ok(())
    }
}

#[async_trait]
impl Transaction for PostgresTransaction<'_> {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        execute_query(self.guard.get()?, sql, params).await
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PostgresTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("PostgreSQL transaction dropped without commit or rollback; rolling back on next use");
            self.rollback_pending.store(true, Ordering::SeqCst);
        }
    }
}

async fn batch(client: &Client, statement: &str) -> Result<()> {
    client
        .batch_execute(statement)
        .await
        .map_err(|e| MaetrikError::query_failed(format!("{statement} failed: {e}")))
}

async fn execute_query(client: &Client, query: &str, params: &[Value]) -> Result<QueryResult> {
    let stmt = client
        .prepare(query)
        .await
        .map_err(|e| MaetrikError::query_failed(format!("Failed to prepare query: {e}")))?;

    if stmt.params().len() != params.len() {
        return Err(MaetrikError::invalid_input(format!(
            "Query expects {} parameters, got {}",
            stmt.params().len(),
            params.len()
        )));
    }

    let bound = params
        .iter()
        .zip(stmt.params())
        .map(|(value, ty)| json_to_pg_param(value, ty))
        .collect::<Result<Vec<_>>>()?;
    let refs: Vec<&(dyn ToSql + Sync)> =
        bound.iter().map(|p| p.as_ref() as &(dyn ToSql + Sync)).collect();

    if stmt.columns().is_empty() {
        // No result set (INSERT, UPDATE, DELETE, DDL)
        let affected = client
            .execute(&stmt, &refs)
            .await
            .map_err(|e| MaetrikError::query_failed(format!("Failed to execute query: {e}")))?;
        return Ok(QueryResult { rows: Vec::new(), row_count: affected, fields: Vec::new() });
    }

    let rows = client
        .query(&stmt, &refs)
        .await
        .map_err(|e| MaetrikError::query_failed(format!("Failed to execute query: {e}")))?;

    let rows = rows.iter().map(row_to_json).collect::<Result<Vec<_>>>()?;
    let fields = stmt
        .columns()
        .iter()
        .map(|c| FieldInfo { name: c.name().to_string(), data_type_id: Some(c.type_().oid()) })
        .collect();

    Ok(QueryResult { row_count: rows.len() as u64, rows, fields })
}

type PgParam = Box<dyn ToSql + Sync + Send>;

/// Bind a JSON value as `Option<T>` so SQL NULL works for every type
fn typed<T>(value: &Value, ty: &Type, extract: impl FnOnce(&Value) -> Option<T>) -> Result<PgParam>
where
    T: ToSql + Sync + Send + 'static,
{
    if value.is_null() {
        return Ok(Box::new(None::<T>));
    }
    extract(value).map(|v| Box::new(Some(v)) as PgParam).ok_or_else(|| {
        MaetrikError::invalid_input(format!(
            "Parameter {value} is not compatible with PostgreSQL type {}",
            ty.name()
        ))
    })
}

fn json_to_pg_param(value: &Value, ty: &Type) -> Result<PgParam> {
    match *ty {
        Type::BOOL => typed(value, ty, Value::as_bool),
        Type::INT2 => typed(value, ty, |v| v.as_i64().and_then(|i| i16::try_from(i).ok())),
        Type::INT4 => typed(value, ty, |v| v.as_i64().and_then(|i| i32::try_from(i).ok())),
        Type::INT8 => typed(value, ty, Value::as_i64),
        #[allow(clippy::cast_possible_truncation)]
        Type::FLOAT4 => typed(value, ty, |v| v.as_f64().map(|f| f as f32)),
        Type::FLOAT8 => typed(value, ty, Value::as_f64),
        Type::JSON | Type::JSONB => typed(value, ty, |v| Some(v.clone())),
        Type::UUID => typed(value, ty, |v| v.as_str().and_then(|s| uuid::Uuid::parse_str(s).ok())),
        _ => typed(value, ty, |v| match v {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }),
    }
}

/// Convert a `PostgreSQL` row to a JSON object keyed by column name
fn row_to_json(row: &Row) -> Result<serde_json::Map<String, Value>> {
    let mut object = serde_json::Map::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        object.insert(column.name().to_string(), postgres_value_to_json(row, idx)?);
    }
    Ok(object)
}

fn column<'a, T: FromSql<'a>>(row: &'a Row, idx: usize, what: &str) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(idx)
        .map_err(|e| MaetrikError::query_failed(format!("Failed to get {what} value: {e}")))
}

fn float_to_json(f: f64) -> Value {
    serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
}

/// Convert `PostgreSQL` value to JSON value
fn postgres_value_to_json(row: &Row, idx: usize) -> Result<Value> {
    use base64::Engine;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    let col_type = row.columns()[idx].type_();

    let value = match *col_type {
        Type::BOOL => column::<bool>(row, idx, "boolean")?.map(Value::Bool),
        Type::INT2 => column::<i16>(row, idx, "i16")?.map(Value::from),
        Type::INT4 => column::<i32>(row, idx, "i32")?.map(Value::from),
        Type::INT8 => column::<i64>(row, idx, "i64")?.map(Value::from),
        Type::OID => column::<u32>(row, idx, "oid")?.map(Value::from),
        Type::FLOAT4 => column::<f32>(row, idx, "f32")?.map(|v| float_to_json(f64::from(v))),
        Type::FLOAT8 => column::<f64>(row, idx, "f64")?.map(float_to_json),
        Type::NUMERIC => column::<NumericText>(row, idx, "numeric")?.map(|n| Value::String(n.0)),
        Type::JSON | Type::JSONB => column::<Value>(row, idx, "JSON")?,
        Type::BYTEA => column::<Vec<u8>>(row, idx, "bytea")?
            .map(|v| Value::String(base64::engine::general_purpose::STANDARD.encode(v))),
        Type::TIMESTAMP => column::<NaiveDateTime>(row, idx, "timestamp")?
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => {
            column::<DateTime<Utc>>(row, idx, "timestamptz")?.map(|v| Value::String(v.to_rfc3339()))
        }
        Type::DATE => column::<NaiveDate>(row, idx, "date")?
            .map(|v| Value::String(v.format("%Y-%m-%d").to_string())),
        Type::TIME => column::<NaiveTime>(row, idx, "time")?
            .map(|v| Value::String(v.format("%H:%M:%S%.f").to_string())),
        Type::UUID => column::<uuid::Uuid>(row, idx, "UUID")?.map(|v| Value::String(v.to_string())),
        _ => row.try_get::<_, Option<String>>(idx).map_err(|e| {
            MaetrikError::query_failed(format!(
                "Failed to convert PostgreSQL type '{}' to JSON: {e}",
                col_type.name()
            ))
        })?
        .map(Value::String),
    };

    Ok(value.unwrap_or(Value::Null))
}

/// NUMERIC rendered as an exact decimal string
struct NumericText(String);

impl<'a> FromSql<'a> for NumericText {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, Box<dyn StdError + Sync + Send>> {
        decode_numeric(raw).map(NumericText)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Decode the binary NUMERIC wire format (base-10000 digit groups)
fn decode_numeric(raw: &[u8]) -> std::result::Result<String, Box<dyn StdError + Sync + Send>> {
    const NEGATIVE: u16 = 0x4000;
    const NAN: u16 = 0xC000;
    const POSITIVE_INFINITY: u16 = 0xD000;
    const NEGATIVE_INFINITY: u16 = 0xF000;

    let word = |i: usize| u16::from_be_bytes([raw[i], raw[i + 1]]);
    if raw.len() < 8 {
        return Err("numeric value too short".into());
    }

    let ndigits = usize::from(word(0));
    let weight = i32::from(word(2) as i16);
    let sign = word(4);
    let dscale = usize::from(word(6));

    match sign {
        NAN => return Ok("NaN".to_string()),
        POSITIVE_INFINITY => return Ok("Infinity".to_string()),
        NEGATIVE_INFINITY => return Ok("-Infinity".to_string()),
        _ => {}
    }
    if raw.len() < 8 + ndigits * 2 {
        return Err("numeric value truncated".into());
    }

    let digits: Vec<u16> = (0..ndigits).map(|i| word(8 + i * 2)).collect();
    let digit_at = |pos: i32| usize::try_from(pos).ok().and_then(|p| digits.get(p).copied()).unwrap_or(0);

    let mut out = String::new();
    if sign == NEGATIVE {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        for pos in 0..=weight {
            if pos == 0 {
                out.push_str(&digit_at(pos).to_string());
            } else {
                out.push_str(&format!("{:04}", digit_at(pos)));
            }
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut pos = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit_at(pos)));
            pos += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Ok(out)
}
