//! SQL Server access for the agent's tools.
//!
//! Each call opens its own `tiberius` connection; the agent issues a handful
//! of queries per run, so there is no pool.

use crate::config::{DatabaseAuth, DatabaseConfig};
use crate::error::{Error, Result};
use crate::sql_guard::validate_read_only;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures_util::stream::TryStreamExt;
use serde::Serialize;
use std::time::Instant;
use tiberius::numeric::Numeric;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, QueryItem, Row, Uuid};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

pub type Connection = Client<Compat<TcpStream>>;

/// The SQL operations the agent's tools are built on.
#[async_trait]
pub trait SqlBackend: Send + Sync {
    /// Fully qualified (`schema.table`) names of every base table.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Column layout of one table (`schema.table` or bare `table`, default `dbo`).
    async fn describe_table(&self, table: &str) -> Result<QueryResult>;

    /// Run a read-only query, keeping at most `limit` rows.
    async fn run_query(&self, sql: &str, limit: usize) -> Result<QueryResult>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub truncated: bool,
    pub elapsed_ms: u64,
}

impl QueryResult {
    /// Render as a markdown table with a row-count footer.
    pub fn to_markdown_table(&self) -> String {
        if self.columns.is_empty() {
            return "Query executed successfully. No results returned.".to_string();
        }

        let mut output = String::new();
        output.push_str("| ");
        output.push_str(&self.columns.join(" | "));
        output.push_str(" |\n|");
        for col in &self.columns {
            output.push_str(&format!(" {} |", "-".repeat(col.len().max(3))));
        }
        output.push('\n');

        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(|v| v.replace('|', "\\|")).collect();
            output.push_str("| ");
            output.push_str(&cells.join(" | "));
            output.push_str(" |\n");
        }

        output.push_str(&format!("\n_{} row(s)_", self.rows.len()));
        if self.truncated {
            output.push_str(" _(truncated)_");
        }
        output
    }
}

/// SQL Server backend driven by [`DatabaseConfig`].
pub struct SqlServer {
    config: DatabaseConfig,
}

impl SqlServer {
    /// Fails with a config error when the settings can never produce a login,
    /// so a bad setup stops the process at startup.
    pub fn new(config: DatabaseConfig) -> Result<Self> {
        let server = Self { config };
        server.client_config()?;
        Ok(server)
    }

    fn client_config(&self) -> Result<Config> {
        let db = &self.config;
        let mut config = Config::new();
        config.host(&db.host);
        config.port(db.port);
        if let Some(database) = &db.database {
            config.database(database);
        }
        if db.encrypt {
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::Off);
        }
        if db.trust_server_certificate {
            config.trust_cert();
        }
        config.application_name(&db.application_name);

        match &db.auth {
            DatabaseAuth::SqlServer { username, password } => {
                config.authentication(AuthMethod::sql_server(username, password));
            }
            DatabaseAuth::Trusted => {
                #[cfg(all(windows, feature = "windows-auth"))]
                config.authentication(AuthMethod::Integrated);

                #[cfg(not(all(windows, feature = "windows-auth")))]
                return Err(Error::config(
                    "trusted SQL Server connections need a Windows build with the \
                     'windows-auth' feature; set SQLSERVER_TRUSTED_CONNECTION=no and \
                     provide SQLSERVER_USERNAME/SQLSERVER_PASSWORD",
                ));
            }
        }
        Ok(config)
    }

    async fn connect(&self) -> Result<Connection> {
        let config = self.client_config()?;
        let address = format!("{}:{}", self.config.host, self.config.port);
        debug!(%address, "connecting to SQL Server");

        let tcp = TcpStream::connect(&address)
            .await
            .map_err(|e| Error::query(format!("failed to connect to {address}: {e}")))?;
        tcp.set_nodelay(true)?;

        Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| Error::query(format!("SQL Server login failed: {e}")))
    }

    async fn fetch(&self, sql: &str, limit: usize) -> Result<QueryResult> {
        let start = Instant::now();
        let mut conn = self.connect().await?;
        let mut stream = conn.simple_query(sql).await?;

        let mut result = QueryResult::default();
        while let Some(item) = stream.try_next().await? {
            match item {
                // only the first result set is reported
                QueryItem::Metadata(meta) => {
                    if meta.result_index() == 0 {
                        result.columns = meta.columns().iter().map(|c| c.name().to_string()).collect();
                    }
                }
                QueryItem::Row(row) => {
                    if row.result_index() != 0 {
                        continue;
                    }
                    if result.rows.len() >= limit {
                        result.truncated = true;
                        continue;
                    }
                    result.rows.push(row_to_strings(&row));
                }
            }
        }

        result.elapsed_ms = start.elapsed().as_millis() as u64;
        debug!(rows = result.rows.len(), elapsed_ms = result.elapsed_ms, "query complete");
        Ok(result)
    }
}

#[async_trait]
impl SqlBackend for SqlServer {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let result = self
            .fetch(
                "SELECT TABLE_SCHEMA + '.' + TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_TYPE = 'BASE TABLE' ORDER BY TABLE_SCHEMA, TABLE_NAME",
                usize::MAX,
            )
            .await?;
        Ok(result
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .collect())
    }

    async fn describe_table(&self, table: &str) -> Result<QueryResult> {
        let (schema, name) = split_table_name(table);
        let sql = format!(
            "SELECT COLUMN_NAME, DATA_TYPE, CHARACTER_MAXIMUM_LENGTH, IS_NULLABLE \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = {} AND TABLE_NAME = {} ORDER BY ORDINAL_POSITION",
            quote_literal(schema),
            quote_literal(name)
        );
        let result = self.fetch(&sql, usize::MAX).await?;
        if result.rows.is_empty() {
            return Err(Error::query(format!("table not found: {schema}.{name}")));
        }
        Ok(result)
    }

    async fn run_query(&self, sql: &str, limit: usize) -> Result<QueryResult> {
        validate_read_only(sql)?;
        info!(limit, "running agent query");
        self.fetch(sql, limit).await
    }
}

/// Split `[db.]schema.table` on dots outside `[...]` or `"..."` and keep the
/// last two parts; bare names (or an empty schema) default to `dbo`.
pub fn split_table_name(table: &str) -> (&str, &str) {
    fn strip(s: &str) -> &str {
        let s = s.trim();
        s.strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .or_else(|| s.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
            .unwrap_or(s)
    }

    let mut parts = Vec::new();
    let mut start = 0;
    let mut close: Option<char> = None;
    let mut chars = table.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match (close, c) {
            (None, '[') => close = Some(']'),
            (None, '"') => close = Some('"'),
            (None, '.') => {
                parts.push(&table[start..i]);
                start = i + 1;
            }
            (Some(end), c) if c == end => {
                // doubled closing character stays inside the identifier
                if chars.peek().map(|&(_, n)| n) == Some(end) {
                    chars.next();
                } else {
                    close = None;
                }
            }
            _ => {}
        }
    }
    parts.push(&table[start..]);

    match parts.as_slice() {
        &[.., schema, name] if !strip(schema).is_empty() => (strip(schema), strip(name)),
        &[.., name] => ("dbo", strip(name)),
        &[] => ("dbo", strip(table)),
    }
}

/// Quote a value as an N'...' literal, doubling embedded quotes.
fn quote_literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}

fn row_to_strings(row: &Row) -> Vec<String> {
    (0..row.len()).map(|idx| cell_to_string(row, idx)).collect()
}

/// Try the column as each supported type in turn; NULLs and unsupported
/// types render as `NULL`.
fn cell_to_string(row: &Row, idx: usize) -> String {
    if let Some(v) = row.try_get::<&str, _>(idx).ok().flatten() {
        return v.to_string();
    }
    if let Some(v) = row.try_get::<i32, _>(idx).ok().flatten() {
        return v.to_string();
    }
    if let Some(v) = row.try_get::<i64, _>(idx).ok().flatten() {
        return v.to_string();
    }
    if let Some(v) = row.try_get::<i16, _>(idx).ok().flatten() {
        return v.to_string();
    }
    if let Some(v) = row.try_get::<u8, _>(idx).ok().flatten() {
        return v.to_string();
    }
    if let Some(v) = row.try_get::<f64, _>(idx).ok().flatten() {
        return v.to_string();
    }
    if let Some(v) = row.try_get::<f32, _>(idx).ok().flatten() {
        return v.to_string();
    }
    if let Some(v) = row.try_get::<Numeric, _>(idx).ok().flatten() {
        return v.to_string();
    }
    if let Some(v) = row.try_get::<bool, _>(idx).ok().flatten() {
        return v.to_string();
    }
    if let Some(v) = row.try_get::<Uuid, _>(idx).ok().flatten() {
        return v.to_string();
    }
    if let Some(v) = row.try_get::<NaiveDateTime, _>(idx).ok().flatten() {
        return v.to_string();
    }
    if let Some(v) = row.try_get::<DateTime<Utc>, _>(idx).ok().flatten() {
        return v.to_rfc3339();
    }
    if let Some(v) = row.try_get::<NaiveDate, _>(idx).ok().flatten() {
        return v.to_string();
    }
    if let Some(v) = row.try_get::<NaiveTime, _>(idx).ok().flatten() {
        return v.to_string();
    }
    if let Some(v) = row.try_get::<&[u8], _>(idx).ok().flatten() {
        return format!("0x{}", v.iter().map(|b| format!("{b:02X}")).collect::<String>());
    }
    "NULL".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_split_with_default_schema() {
        assert_eq!(split_table_name("Orders"), ("dbo", "Orders"));
        assert_eq!(split_table_name("sales.Orders"), ("sales", "Orders"));
        assert_eq!(split_table_name("[sales].[Order Lines]"), ("sales", "Order Lines"));
        assert_eq!(split_table_name("mydb.sales.Orders"), ("sales", "Orders"));
        assert_eq!(split_table_name("[Order.Lines]"), ("dbo", "Order.Lines"));
        assert_eq!(split_table_name("sales.\"Order.Lines\""), ("sales", "Order.Lines"));
        assert_eq!(split_table_name("[a]].b].c"), ("a]].b", "c"));
        assert_eq!(split_table_name("mydb..Orders"), ("dbo", "Orders"));
    }

    #[test]
    fn literals_escape_quotes() {
        assert_eq!(quote_literal("Orders"), "N'Orders'");
        assert_eq!(quote_literal("x'; DROP TABLE t --"), "N'x''; DROP TABLE t --'");
    }

    #[test]
    fn markdown_table_renders_rows_and_footer() {
        let result = QueryResult {
            columns: vec!["id".into(), "name".into()],
            rows: vec![
                vec!["1".into(), "Ada".into()],
                vec!["2".into(), "a|b".into()],
            ],
            truncated: true,
            elapsed_ms: 4,
        };
        let table = result.to_markdown_table();
        assert!(table.starts_with("| id | name |\n| --- | ---- |\n"));
        assert!(table.contains("| 1 | Ada |"));
        assert!(table.contains("a\\|b"));
        assert!(table.contains("_2 row(s)_ _(truncated)_"));
    }

    #[test]
    fn empty_result_has_message() {
        assert!(QueryResult::default().to_markdown_table().contains("No results"));
    }

    fn make_config(auth: DatabaseAuth) -> DatabaseConfig {
        DatabaseConfig {
            host: "127.0.0.1".into(),
            port: 1,
            database: None,
            auth,
            encrypt: false,
            trust_server_certificate: true,
            application_name: "test".into(),
        }
    }

    #[cfg(not(all(windows, feature = "windows-auth")))]
    #[test]
    fn trusted_connection_fails_at_construction() {
        let err = SqlServer::new(make_config(DatabaseAuth::Trusted))
            .err()
            .unwrap();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("SQLSERVER_TRUSTED_CONNECTION=no"));
    }

    #[tokio::test]
    async fn run_query_rejects_writes_before_connecting() {
        let backend = SqlServer::new(make_config(DatabaseAuth::SqlServer {
            username: "sa".into(),
            password: "x".into(),
        }))
        .unwrap();
        let err = backend.run_query("DROP TABLE Orders", 10).await.unwrap_err();
        assert!(matches!(err, Error::Query(_)));
        assert!(err.to_string().contains("read-only"));
    }
}
