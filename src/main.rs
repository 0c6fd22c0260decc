//! Maetrik CLI Entry Point
//!
//! Subcommands:
//! - `datasources` - registered data source types and their credential forms
//! - `connections` - list, add, remove and health-check connections
//! - `introspect` - raw schema of a connection
//! - `query` - read-only SQL against a connection
//! - `ask` - natural-language question against a connection
//!
//! All output to stdout is a single JSON envelope. Logs go to stderr.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dialoguer::{Confirm, Input, Password};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::prelude::*;

use maetrik::app::App;
use maetrik::config::MaetrikConfig;
use maetrik::connections::{
    ConnectionConfigResolver, ConnectionStore, CreateConnectionInput,
    DatabaseConnectionConfigSource, FileConnectionConfigSource,
};
use maetrik::driver::Credentials;
use maetrik::output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
use maetrik::registry::{CredentialField, FieldKind};
use maetrik::MaetrikError;

/// Maetrik - ask questions of your data sources in plain language
#[derive(Parser)]
#[command(name = "maetrik")]
#[command(about = "Natural-language questions over your data sources, executed read-only")]
#[command(version)]
struct Cli {
    /// Config file (otherwise MAETRIK_CONFIG, .maetrik/config.json, ~/.config/maetrik/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level for maetrik when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered data source types
    Datasources,

    /// Manage connections
    Connections {
        #[command(subcommand)]
        action: ConnectionsAction,
    },

    /// Introspect a connection's schema
    Introspect {
        connection: String,
    },

    /// Execute a read-only SQL query
    Query {
        connection: String,
        sql: String,
        /// Positional parameters as a JSON array
        #[arg(long)]
        params: Option<String>,
    },

    /// Ask a question in natural language
    Ask {
        connection: String,
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ConnectionsAction {
    /// List connections from every source
    List,

    /// Persist a new connection
    Add {
        id: String,
        /// Data source type (see `maetrik datasources`)
        #[arg(long = "type")]
        source_type: String,
        /// Credentials as a JSON object; prompted for when omitted
        #[arg(long)]
        credentials: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },

    /// Remove a persisted connection
    Remove {
        id: String,
    },

    /// Connect and run the health probe
    Check {
        id: String,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Datasources => "datasources",
            Self::Connections { .. } => "connections",
            Self::Introspect { .. } => "introspect",
            Self::Query { .. } => "query",
            Self::Ask { .. } => "ask",
        }
    }

    fn connection(&self) -> Option<&str> {
        match self {
            Self::Introspect { connection } | Self::Query { connection, .. } | Self::Ask { connection, .. } => {
                Some(connection)
            }
            Self::Connections { action } => match action {
                ConnectionsAction::Add { id, .. }
                | ConnectionsAction::Remove { id }
                | ConnectionsAction::Check { id } => Some(id),
                ConnectionsAction::List => None,
            },
            Self::Datasources => None,
        }
    }
}

/// One row of `connections list`; credentials are never printed
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionSummary {
    id: String,
    #[serde(rename = "type")]
    source_type: String,
    source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    enabled: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level)?;

    let command = cli.command.name();
    let connection = cli.command.connection().map(str::to_string);

    match run(cli).await {
        Ok(output) => {
            println!("{output}");
            Ok(())
        }
        Err(err) => {
            let info = match err.downcast_ref::<MaetrikError>() {
                Some(maetrik_err) => ErrorInfo::from(maetrik_err),
                None => ErrorInfo::new("INTERNAL_ERROR", format!("{err:#}"), 500),
            };
            let envelope = ErrorEnvelope::new(command, connection.as_deref(), info);
            println!("{}", serde_json::to_string(&envelope)?);
            std::process::exit(1);
        }
    }
}

fn init_tracing(log_level: &str) -> anyhow::Result<()> {
    // RUST_LOG wins; otherwise only our own crate logs at the requested level
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::try_from_default_env().context("Invalid RUST_LOG environment variable")?
    } else {
        tracing_subscriber::EnvFilter::new(format!("maetrik={log_level},reqwest=warn,hyper=warn"))
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed to set global default subscriber")
}

async fn run(cli: Cli) -> anyhow::Result<String> {
    let (config, _) = MaetrikConfig::load(cli.config.as_deref())?;
    let app = App::bootstrap(config).await?;
    let started = Instant::now();

    match cli.command {
        Commands::Datasources => {
            let infos = app.manager.registry().describe();
            let meta = Metadata::with_count(elapsed_ms(started), infos.len());
            render(&SuccessEnvelope::new("datasources", None, infos, meta))
        }

        Commands::Connections { action } => run_connections(&app, action, started).await,

        Commands::Introspect { connection } => {
            let schema = app.ask.introspect(&connection).await?;
            let meta = Metadata::with_count(elapsed_ms(started), schema.tables.len());
            render(&SuccessEnvelope::new("introspect", Some(&connection), schema, meta))
        }

        Commands::Query { connection, sql, params } => {
            let params = parse_params(params.as_deref())?;
            let response = app.ask.run_query(&connection, &sql, &params).await?;
            render(&SuccessEnvelope::new("query", Some(&connection), response.data, response.meta))
        }

        Commands::Ask { connection, question } => {
            let question = question.join(" ");
            let response = app.ask.ask(&connection, &question).await?;
            render(&SuccessEnvelope::new("ask", Some(&connection), response.data, response.meta))
        }
    }
}

async fn run_connections(app: &App, action: ConnectionsAction, started: Instant) -> anyhow::Result<String> {
    match action {
        ConnectionsAction::List => {
            let configs = app.resolver.list().await?;
            let mut summaries = Vec::with_capacity(configs.len());
            for config in configs {
                let record = app.store.get_connection(&config.id).await?;
                summaries.push(ConnectionSummary {
                    source: if record.is_some() {
                        DatabaseConnectionConfigSource::NAME
                    } else {
                        FileConnectionConfigSource::NAME
                    },
                    name: record.as_ref().and_then(|r| r.name.clone()),
                    enabled: record.map_or(true, |r| r.enabled),
                    id: config.id,
                    source_type: config.source_type,
                });
            }
            let meta = Metadata::with_count(elapsed_ms(started), summaries.len());
            render(&SuccessEnvelope::new("connections", None, summaries, meta))
        }

        ConnectionsAction::Add { id, source_type, credentials, name, description } => {
            let factory = app
                .manager
                .registry()
                .get(&source_type)
                .ok_or_else(|| MaetrikError::driver_not_found(&source_type))?;

            let credentials = match credentials {
                Some(text) => serde_json::from_str::<Credentials>(&text)
                    .map_err(|e| MaetrikError::invalid_input(format!("--credentials must be a JSON object: {e}")))?,
                None => prompt_credentials(&factory.credentials_fields())?,
            };

            let input = CreateConnectionInput { id, source_type, credentials, name, description };
            let record = app.manager.add_persisted_connection(app.store.as_ref(), input).await?;
            let summary = ConnectionSummary {
                id: record.id.clone(),
                source_type: record.source_type.clone(),
                source: DatabaseConnectionConfigSource::NAME,
                name: record.name.clone(),
                enabled: record.enabled,
            };
            render(&SuccessEnvelope::new("connections", Some(&record.id), summary, Metadata::new(elapsed_ms(started))))
        }

        ConnectionsAction::Remove { id } => {
            if app.resolver.exists_in_other_sources(&id, DatabaseConnectionConfigSource::NAME).await? {
                return Err(MaetrikError::invalid_input(format!(
                    "Connection '{id}' is defined in the config file and cannot be removed here"
                ))
                .into());
            }
            if !app.store.delete_connection(&id).await? {
                return Err(MaetrikError::not_found(&id).into());
            }
            app.ask.semantic().invalidate(&id).await;
            let data = serde_json::json!({ "id": id, "removed": true });
            render(&SuccessEnvelope::new("connections", Some(&id), data, Metadata::new(elapsed_ms(started))))
        }

        ConnectionsAction::Check { id } => {
            let healthy = app.manager.health_check(&id).await?;
            let data = serde_json::json!({ "id": id, "healthy": healthy });
            render(&SuccessEnvelope::new("connections", Some(&id), data, Metadata::new(elapsed_ms(started))))
        }
    }
}

/// Ask for each declared credential field on the terminal
fn prompt_credentials(fields: &[CredentialField]) -> anyhow::Result<Credentials> {
    let mut credentials = Credentials::new();

    for field in fields {
        let mut label = field.label.clone();
        if let Some(placeholder) = &field.placeholder {
            label = format!("{label} (e.g. {placeholder})");
        }
        if !field.required {
            label = format!("{label} [optional]");
        }

        let value = match field.kind {
            FieldKind::Boolean => Some(Value::Bool(Confirm::new().with_prompt(label).default(false).interact()?)),
            FieldKind::Password => {
                let secret = Password::new()
                    .with_prompt(label)
                    .allow_empty_password(!field.required)
                    .interact()?;
                (!secret.is_empty()).then_some(Value::String(secret))
            }
            FieldKind::Text | FieldKind::Number => {
                let text = Input::<String>::new()
                    .with_prompt(label)
                    .allow_empty(!field.required)
                    .interact_text()?;
                let text = text.trim();
                if text.is_empty() {
                    None
                } else if field.kind == FieldKind::Number {
                    Some(parse_number(&field.name, text)?)
                } else {
                    Some(Value::String(text.to_string()))
                }
            }
        };

        if let Some(value) = value {
            credentials.insert(field.name.clone(), value);
        }
    }

    Ok(credentials)
}

fn parse_number(field: &str, text: &str) -> Result<Value, MaetrikError> {
    if let Ok(integer) = text.parse::<i64>() {
        return Ok(Value::from(integer));
    }
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| MaetrikError::invalid_input(format!("'{field}' must be a number, got '{text}'")))
}

fn parse_params(params: Option<&str>) -> Result<Vec<Value>, MaetrikError> {
    match params {
        None => Ok(Vec::new()),
        Some(text) => serde_json::from_str::<Vec<Value>>(text)
            .map_err(|e| MaetrikError::invalid_input(format!("--params must be a JSON array: {e}"))),
    }
}

fn render<T: Serialize>(envelope: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string(envelope)?)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
