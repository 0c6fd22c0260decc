//! Natural Language to SQL Translation
//!
//! [`QueryTranslator`] renders the schema into a prompt, asks the completion
//! backend for a JSON answer and parses it into a [`TranslationResult`]. The
//! SQL it returns is untrusted; callers run it through
//! [`crate::safety::ensure_select_only`] before execution.

pub mod prompts;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::driver::SchemaDefinition;
use crate::error::{MaetrikError, Result};
use crate::llm::{CompletionBackend, CompletionOptions};

pub use prompts::{build_schema_context, build_translation_prompt};

pub const DEFAULT_MAX_ROWS: usize = 1000;

const TRANSLATION_TEMPERATURE: f32 = 0.1;
const TRANSLATION_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Clone)]
pub struct TranslationContext {
    pub schema: SchemaDefinition,
    /// SQL dialect name as shown to the model, e.g. `postgresql`
    pub dialect: String,
    pub max_rows: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    pub sql: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Model's own estimate in `[0, 1]`
    pub confidence: f64,
    pub suggested_tables: Vec<String>,
}

#[derive(Deserialize)]
struct ModelAnswer {
    #[serde(default)]
    sql: String,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    tables: Option<Vec<String>>,
}

pub struct QueryTranslator {
    backend: Arc<dyn CompletionBackend>,
}

impl QueryTranslator {
    #[must_use]
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self { backend }
    }

    #[must_use]
    pub fn backend(&self) -> &dyn CompletionBackend {
        self.backend.as_ref()
    }

    pub async fn translate(&self, question: &str, context: &TranslationContext) -> Result<TranslationResult> {
        let schema_context = build_schema_context(&context.schema);
        let max_rows = context.max_rows.unwrap_or(DEFAULT_MAX_ROWS);
        let prompt = build_translation_prompt(question, &schema_context, &context.dialect, max_rows);

        let options = CompletionOptions {
            temperature: Some(TRANSLATION_TEMPERATURE),
            max_tokens: Some(TRANSLATION_MAX_TOKENS),
            stop_sequences: Vec::new(),
        };
        let response = self.backend.complete(&prompt, &options).await?;
        debug!(
            backend = self.backend.name(),
            tokens = response.usage.map(|u| u.total_tokens),
            "Translation completed"
        );

        parse_translation_response(&response.content)
    }
}

/// Parse the model's answer
///
/// Accepts bare JSON, JSON inside a fenced block, or JSON surrounded by prose.
/// Any failure carries the untouched response text.
pub fn parse_translation_response(raw: &str) -> Result<TranslationResult> {
    let body = strip_code_fence(raw);
    let answer = serde_json::from_str::<ModelAnswer>(body)
        .ok()
        .or_else(|| outer_object(body).and_then(|span| serde_json::from_str(span).ok()));

    let Some(answer) = answer else {
        warn!(response_len = raw.len(), "Completion was not valid translation JSON");
        return Err(MaetrikError::translation_parse(raw));
    };

    let sql = answer.sql.trim().to_string();
    if sql.is_empty() {
        return Err(MaetrikError::translation_parse(raw));
    }

    let confidence = match answer.confidence {
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
        _ => 0.0,
    };

    Ok(TranslationResult {
        sql,
        explanation: answer.explanation.filter(|e| !e.trim().is_empty()),
        confidence,
        suggested_tables: answer.tables.unwrap_or_default(),
    })
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest);
    match rest.find("```") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    }
}

/// `{` through the last `}`
fn outer_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
