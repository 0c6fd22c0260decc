//! Semantic Layer
//!
//! Wraps a raw [`SchemaDefinition`] with human meaning: descriptions, synonyms,
//! example values, metric flags and relationships between tables. Enrichment
//! never destroys raw data; [`SemanticLayer::to_schema_definition`] reproduces
//! the raw shape with enriched descriptions folded in.
//!
//! # Mutators
//! Every mutator silently does nothing when the named table or column does not
//! exist. Synonyms and examples are deduplicated; relationships are appended
//! as given.
//!
//! # Relationship Inference
//! A non-key column `<prefix>_id` points at table `<prefix>s` when that table
//! exists and has a primary key. Inference runs once per layer.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::driver::{DataSourceDriver, SchemaColumn, SchemaDefinition, SchemaTable};
use crate::error::Result;

/// Cardinality of a table relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RelationshipKind {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRelationship {
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
    #[serde(rename = "type")]
    pub kind: RelationshipKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnEnrichment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_metric: Option<bool>,
    /// Display format for metrics (`currency`, `percent`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableEnrichment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<TableRelationship>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedColumn {
    #[serde(flatten)]
    pub column: SchemaColumn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<ColumnEnrichment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedTable {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub columns: Vec<EnrichedColumn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<TableEnrichment>,
}

impl EnrichedTable {
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&EnrichedColumn> {
        self.columns.iter().find(|c| c.column.name == name)
    }

    fn column_mut(&mut self, name: &str) -> Option<&mut EnrichedColumn> {
        self.columns.iter_mut().find(|c| c.column.name == name)
    }

    fn enrichment_mut(&mut self) -> &mut TableEnrichment {
        self.enrichment.get_or_insert_with(TableEnrichment::default)
    }

    /// Relationships recorded on this table
    #[must_use]
    pub fn relationships(&self) -> &[TableRelationship] {
        self.enrichment.as_ref().map_or(&[][..], |e| e.relationships.as_slice())
    }
}

impl EnrichedColumn {
    fn enrichment_mut(&mut self) -> &mut ColumnEnrichment {
        self.enrichment.get_or_insert_with(ColumnEnrichment::default)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichedSchema {
    pub tables: Vec<EnrichedTable>,
}

impl EnrichedSchema {
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&EnrichedTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    fn table_mut(&mut self, name: &str) -> Option<&mut EnrichedTable> {
        self.tables.iter_mut().find(|t| t.name == name)
    }
}

fn push_unique(values: &mut Vec<String>, value: &str) {
    if !values.iter().any(|v| v == value) {
        values.push(value.to_string());
    }
}

/// Enriched view over one connection's schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticLayer {
    schema: EnrichedSchema,
    #[serde(default)]
    relationships_inferred: bool,
}

impl SemanticLayer {
    /// Wrap a raw schema; the input is copied, not consumed
    #[must_use]
    pub fn new(raw: &SchemaDefinition) -> Self {
        let tables = raw
            .tables
            .iter()
            .map(|table| EnrichedTable {
                name: table.name.clone(),
                schema: table.schema.clone(),
                description: table.description.clone(),
                columns: table
                    .columns
                    .iter()
                    .map(|column| EnrichedColumn { column: column.clone(), enrichment: None })
                    .collect(),
                enrichment: None,
            })
            .collect();

        Self { schema: EnrichedSchema { tables }, relationships_inferred: false }
    }

    #[must_use]
    pub fn get_schema(&self) -> &EnrichedSchema {
        &self.schema
    }

    #[must_use]
    pub const fn relationships_inferred(&self) -> bool {
        self.relationships_inferred
    }

    pub fn set_table_description(&mut self, table: &str, description: &str) {
        if let Some(t) = self.schema.table_mut(table) {
            t.enrichment_mut().description = Some(description.to_string());
        }
    }

    pub fn add_table_synonym(&mut self, table: &str, synonym: &str) {
        if let Some(t) = self.schema.table_mut(table) {
            push_unique(&mut t.enrichment_mut().synonyms, synonym);
        }
    }

    pub fn add_table_relationship(&mut self, table: &str, relationship: TableRelationship) {
        if let Some(t) = self.schema.table_mut(table) {
            t.enrichment_mut().relationships.push(relationship);
        }
    }

    fn column_mut(&mut self, table: &str, column: &str) -> Option<&mut EnrichedColumn> {
        self.schema.table_mut(table).and_then(|t| t.column_mut(column))
    }

    pub fn set_column_description(&mut self, table: &str, column: &str, description: &str) {
        if let Some(c) = self.column_mut(table, column) {
            c.enrichment_mut().description = Some(description.to_string());
        }
    }

    pub fn add_column_synonym(&mut self, table: &str, column: &str, synonym: &str) {
        if let Some(c) = self.column_mut(table, column) {
            push_unique(&mut c.enrichment_mut().synonyms, synonym);
        }
    }

    pub fn add_column_example(&mut self, table: &str, column: &str, example: &str) {
        if let Some(c) = self.column_mut(table, column) {
            push_unique(&mut c.enrichment_mut().examples, example);
        }
    }

    pub fn set_column_metric(&mut self, table: &str, column: &str, is_metric: bool, format: Option<&str>) {
        if let Some(c) = self.column_mut(table, column) {
            let enrichment = c.enrichment_mut();
            enrichment.is_metric = Some(is_metric);
            enrichment.format = format.map(str::to_string);
        }
    }

    /// Add many-to-one relationships implied by `<prefix>_id` columns
    ///
    /// Returns how many were added. Only the first call does any work.
    pub fn infer_relationships(&mut self) -> usize {
        if self.relationships_inferred {
            return 0;
        }

        let mut found: Vec<(String, TableRelationship)> = Vec::new();
        for table in &self.schema.tables {
            for column in &table.columns {
                let column = &column.column;
                if column.is_primary_key {
                    continue;
                }
                let Some(prefix) = column.name.strip_suffix("_id") else {
                    continue;
                };

                let target_name = format!("{prefix}s");
                let target_pk = self
                    .schema
                    .table(&target_name)
                    .and_then(|target| target.columns.iter().find(|c| c.column.is_primary_key));

                if let Some(pk) = target_pk {
                    found.push((
                        table.name.clone(),
                        TableRelationship {
                            source_column: column.name.clone(),
                            target_table: target_name,
                            target_column: pk.column.name.clone(),
                            kind: RelationshipKind::ManyToOne,
                        },
                    ));
                }
            }
        }

        let added = found.len();
        for (table, relationship) in found {
            self.add_table_relationship(&table, relationship);
        }
        self.relationships_inferred = true;
        debug!(relationships = added, "Inferred table relationships");
        added
    }

    /// Flatten back to the raw shape; enriched descriptions win
    #[must_use]
    pub fn to_schema_definition(&self) -> SchemaDefinition {
        let tables = self
            .schema
            .tables
            .iter()
            .map(|table| SchemaTable {
                name: table.name.clone(),
                schema: table.schema.clone(),
                description: table
                    .enrichment
                    .as_ref()
                    .and_then(|e| e.description.clone())
                    .or_else(|| table.description.clone()),
                columns: table
                    .columns
                    .iter()
                    .map(|c| SchemaColumn {
                        description: c
                            .enrichment
                            .as_ref()
                            .and_then(|e| e.description.clone())
                            .or_else(|| c.column.description.clone()),
                        ..c.column.clone()
                    })
                    .collect(),
            })
            .collect();

        SchemaDefinition { tables }
    }
}

/// Semantic layers keyed by connection id
///
/// Layers are shared as `Arc`; [`update`](Self::update) replaces the entry
/// with an edited copy so readers never see a half-applied change.
#[derive(Default)]
pub struct SemanticLayerCache {
    layers: RwLock<HashMap<String, Arc<SemanticLayer>>>,
}

impl SemanticLayerCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, connection: &str) -> Option<Arc<SemanticLayer>> {
        self.layers.read().await.get(connection).cloned()
    }

    pub async fn insert(&self, connection: &str, layer: SemanticLayer) -> Arc<SemanticLayer> {
        let layer = Arc::new(layer);
        self.layers.write().await.insert(connection.to_string(), Arc::clone(&layer));
        layer
    }

    /// Cached layer, or introspect `driver`, wrap, infer and cache
    pub async fn get_or_introspect(
        &self,
        connection: &str,
        driver: &dyn DataSourceDriver,
    ) -> Result<Arc<SemanticLayer>> {
        if let Some(layer) = self.get(connection).await {
            return Ok(layer);
        }

        let raw = driver.require_introspectable()?.introspect().await?;
        let mut layer = SemanticLayer::new(&raw);
        layer.infer_relationships();
        debug!(connection, tables = raw.tables.len(), "Built semantic layer");

        // Another request may have raced us; keep whichever landed first
        let mut layers = self.layers.write().await;
        let entry = layers.entry(connection.to_string()).or_insert_with(|| Arc::new(layer));
        Ok(Arc::clone(entry))
    }

    /// Apply `edit` to a copy of the cached layer; `false` if nothing is cached
    pub async fn update(&self, connection: &str, edit: impl FnOnce(&mut SemanticLayer)) -> bool {
        let mut layers = self.layers.write().await;
        match layers.get_mut(connection) {
            Some(layer) => {
                edit(Arc::make_mut(layer));
                true
            }
            None => false,
        }
    }

    pub async fn invalidate(&self, connection: &str) -> bool {
        self.layers.write().await.remove(connection).is_some()
    }
}
