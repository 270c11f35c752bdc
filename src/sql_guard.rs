//! Read-only guard for agent-issued SQL.
//!
//! The model writes the SQL, so nothing it sends is trusted. A statement passes
//! only if, once comments, string literals and bracketed identifiers are
//! masked out, it is a single `SELECT`/`WITH` statement with no write, DDL or
//! execution keyword anywhere in it.

use crate::error::{Error, Result};
use fancy_regex::Regex;
use std::sync::LazyLock;

static LEADING_READ: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(SELECT|WITH)\b").ok());

static BLOCKED: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|MERGE|DROP|CREATE|ALTER|TRUNCATE|EXEC|EXECUTE|GRANT|REVOKE|DENY|BACKUP|RESTORE|SHUTDOWN|DBCC|BULK|OPENROWSET|OPENDATASOURCE|OPENQUERY|WAITFOR|INTO)\b",
    )
    .ok()
});

/// Reject anything that is not a single read-only statement.
pub fn validate_read_only(sql: &str) -> Result<()> {
    let masked = mask(sql);
    let statement = masked.trim().trim_end_matches(';').trim_end();

    if statement.is_empty() {
        return Err(Error::query("empty SQL statement"));
    }
    if statement.contains(';') {
        return Err(Error::query("only a single SQL statement is allowed"));
    }

    let (Some(leading), Some(blocked)) = (LEADING_READ.as_ref(), BLOCKED.as_ref()) else {
        return Err(Error::query("SQL guard patterns failed to compile"));
    };

    if !leading.is_match(statement).unwrap_or(false) {
        return Err(Error::query(
            "only read-only SELECT or WITH queries are allowed",
        ));
    }

    match blocked.captures(statement) {
        Ok(Some(caps)) => {
            let keyword = caps.get(1).map(|m| m.as_str().to_uppercase()).unwrap_or_default();
            Err(Error::query(format!(
                "read-only mode: {keyword} is not allowed"
            )))
        }
        Ok(None) => Ok(()),
        Err(e) => Err(Error::query(format!("SQL guard failed: {e}"))),
    }
}

/// Replace comments with a space, string literals with `''` and quoted or
/// bracketed identifiers with `x`, so keyword checks only see SQL structure.
fn mask(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
                out.push(' ');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            '\'' => {
                // '' inside a literal is an escaped quote
                loop {
                    match chars.next() {
                        Some('\'') if chars.peek() == Some(&'\'') => {
                            chars.next();
                        }
                        Some('\'') | None => break,
                        Some(_) => {}
                    }
                }
                out.push_str("''");
            }
            '"' | '[' => {
                let close = if c == '"' { '"' } else { ']' };
                // a doubled closing character is an escape
                loop {
                    match chars.next() {
                        Some(next) if next == close && chars.peek() == Some(&close) => {
                            chars.next();
                        }
                        Some(next) if next == close => break,
                        None => break,
                        Some(_) => {}
                    }
                }
                out.push('x');
            }
            _ => out.push(c),
        }
    }
    out
}
