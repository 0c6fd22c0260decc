//! Read-Only Query Validation
//!
//! Every generated statement passes through [`is_select_only`] before it
//! reaches a driver. The check is textual and conservative:
//! - the statement must start with `SELECT` or `WITH` (leading whitespace and
//!   comments are skipped for this check only)
//! - none of the write/DDL/privilege keywords may appear as a whole word
//!   anywhere, including inside comments and string literals
//!
//! A legitimate query that mentions e.g. `'delete'` in a literal is rejected.
//! That false positive is accepted; a false negative is not.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{MaetrikError, Result};

/// Keywords that disqualify a statement
pub const FORBIDDEN_KEYWORDS: [&str; 11] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "GRANT", "REVOKE", "EXEC",
    "EXECUTE",
];

static FORBIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(r"(?i)\b({})\b", FORBIDDEN_KEYWORDS.join("|"));
    Regex::new(&pattern).expect("Invalid forbidden keyword pattern")
});

/// `true` if `sql` is a single read-only `SELECT`/`WITH` statement by the rules above
#[must_use]
pub fn is_select_only(sql: &str) -> bool {
    check(sql).is_ok()
}

/// Same check, reporting why a statement was refused
pub fn ensure_select_only(sql: &str) -> Result<()> {
    check(sql).map_err(MaetrikError::invalid_query)
}

/// The first forbidden keyword in `sql`, uppercased
#[must_use]
pub fn forbidden_keyword(sql: &str) -> Option<String> {
    FORBIDDEN.find(sql).map(|m| m.as_str().to_uppercase())
}

fn check(sql: &str) -> std::result::Result<(), String> {
    let head = skip_leading_comments(sql).to_uppercase();
    if head.is_empty() {
        return Err("Query cannot be empty".to_string());
    }
    if !(head.starts_with("SELECT") || head.starts_with("WITH")) {
        return Err("Only SELECT queries are allowed".to_string());
    }
    if let Some(keyword) = forbidden_keyword(sql) {
        return Err(format!("Query contains forbidden keyword {keyword}"));
    }
    Ok(())
}

/// Strip whitespace and `--` / `/* */` comments from the front of `sql`
fn skip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.find('\n').map_or("", |i| &after[i + 1..]).trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.find("*/").map_or("", |i| &after[i + 2..]).trim_start();
        } else {
            return rest;
        }
    }
}
