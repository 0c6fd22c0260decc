//! Prompt text for SQL generation

use crate::driver::SchemaDefinition;

/// Plain-text rendering of `schema` for the model
///
/// ```text
/// Available tables and columns:
///
/// Table: users
///   - id: uuid (PK) NOT NULL
///   - email: varchar
/// ```
#[must_use]
pub fn build_schema_context(schema: &SchemaDefinition) -> String {
    let mut lines = vec!["Available tables and columns:".to_string()];

    for table in &schema.tables {
        lines.push(format!("\nTable: {}", table.name));
        if let Some(description) = table.description.as_deref().filter(|d| !d.is_empty()) {
            lines.push(format!("Description: {description}"));
        }
        for column in &table.columns {
            let pk = if column.is_primary_key { " (PK)" } else { "" };
            let not_null = if column.nullable { "" } else { " NOT NULL" };
            lines.push(format!("  - {}: {}{pk}{not_null}", column.name, column.data_type));
        }
    }

    lines.join("\n")
}

#[must_use]
pub fn build_translation_prompt(
    question: &str,
    schema_context: &str,
    dialect: &str,
    max_rows: usize,
) -> String {
    format!(
        r#"You are a SQL query generator. Your task is to convert natural language questions into {dialect} SQL queries.

{schema_context}

Rules:
1. Generate ONLY SELECT queries - never INSERT, UPDATE, DELETE, or DDL statements
2. Use proper {dialect} syntax
3. Add LIMIT {max_rows} unless the user explicitly asks for all results
4. Use table and column names exactly as shown in the schema
5. Use appropriate JOINs when data from multiple tables is needed
6. Handle NULL values appropriately
7. Use aggregation functions (COUNT, SUM, AVG, etc.) when the question implies summary

Question: {question}

Respond in this exact JSON format (no markdown, no code blocks):
{{
  "sql": "YOUR SQL QUERY HERE",
  "explanation": "Brief explanation of what this query does",
  "confidence": 0.95,
  "tables": ["table1", "table2"]
}}

Only output the JSON, nothing else."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{SchemaColumn, SchemaTable};
    use crate::testing::shop_schema;

    fn users_only() -> SchemaDefinition {
        SchemaDefinition {
            tables: vec![SchemaTable {
                name: "users".to_string(),
                schema: None,
                description: None,
                columns: vec![
                    SchemaColumn::new("id", "uuid", false, true),
                    SchemaColumn::new("email", "varchar", true, false),
                ],
            }],
        }
    }

    #[test]
    fn test_schema_context() {
        insta::assert_snapshot!(build_schema_context(&shop_schema()), @r"
        Available tables and columns:

        Table: users
          - id: uuid (PK) NOT NULL
          - email: varchar

        Table: orders
        Description: Customer orders
          - id: integer (PK) NOT NULL
          - user_id: uuid NOT NULL
          - total: numeric
        ");
    }

    #[test]
    fn test_empty_schema_context() {
        assert_eq!(
            build_schema_context(&SchemaDefinition::default()),
            "Available tables and columns:"
        );
    }

    #[test]
    fn test_translation_prompt() {
        let context = build_schema_context(&users_only());
        let prompt = build_translation_prompt("How many users signed up?", &context, "postgresql", 1000);
        insta::assert_snapshot!(prompt, @r#"
        You are a SQL query generator. Your task is to convert natural language questions into postgresql SQL queries.

        Available tables and columns:

        Table: users
          - id: uuid (PK) NOT NULL
          - email: varchar

        Rules:
        1. Generate ONLY SELECT queries - never INSERT, UPDATE, DELETE, or DDL statements
        2. Use proper postgresql syntax
        3. Add LIMIT 1000 unless the user explicitly asks for all results
        4. Use table and column names exactly as shown in the schema
        5. Use appropriate JOINs when data from multiple tables is needed
        6. Handle NULL values appropriately
        7. Use aggregation functions (COUNT, SUM, AVG, etc.) when the question implies summary

        Question: How many users signed up?

        Respond in this exact JSON format (no markdown, no code blocks):
        {
          "sql": "YOUR SQL QUERY HERE",
          "explanation": "Brief explanation of what this query does",
          "confidence": 0.95,
          "tables": ["table1", "table2"]
        }

        Only output the JSON, nothing else.
        "#);
    }
}
