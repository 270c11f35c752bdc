//! Tools the SQL agent can call against the database.
//!
//! Three tools: `list_tables`, `describe_table` and `run_sql_query`. Results
//! come back as text for the model; failures are reported as tool errors so
//! the model can correct itself instead of aborting the run.

use crate::database::SqlBackend;
use crate::llm::ToolDef;
use serde_json::{Value, json};
use tracing::debug;

/// Max chars returned from any single tool invocation.
const MAX_RESULT_CHARS: usize = 8000;

/// Build the tool definitions sent to the model.
pub fn tool_definitions() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "list_tables".into(),
            description: "List every base table in the database as schema.table. \
                          Call this first to discover what data is available."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolDef {
            name: "describe_table".into(),
            description: "Show the columns of a table with their data types, maximum \
                          length and nullability."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "table": {
                        "type": "string",
                        "description": "Table name, optionally schema-qualified (e.g. 'sales.Orders'). Defaults to the dbo schema."
                    }
                },
                "required": ["table"]
            }),
        },
        ToolDef {
            name: "run_sql_query".into(),
            description: "Execute a single read-only T-SQL SELECT (or WITH ... SELECT) \
                          statement and return the rows as a markdown table. Writes, DDL \
                          and stored procedure calls are rejected."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The SELECT statement to run."
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum rows to return. Capped by the server limit."
                    }
                },
                "required": ["query"]
            }),
        },
    ]
}

/// Execute a tool call. Returns the result text and whether it is an error.
pub async fn dispatch(
    backend: &dyn SqlBackend,
    tool_name: &str,
    arguments: &str,
    max_rows: usize,
) -> (String, bool) {
    let input: Value = if arguments.trim().is_empty() {
        json!({})
    } else {
        match serde_json::from_str(arguments) {
            Ok(v) => v,
            Err(e) => return (format!("Invalid tool arguments: {e}"), true),
        }
    };

    debug!(tool = tool_name, "dispatching tool");
    let (text, is_error) = match tool_name {
        "list_tables" => handle_list_tables(backend).await,
        "describe_table" => handle_describe_table(backend, &input).await,
        "run_sql_query" => handle_run_sql_query(backend, &input, max_rows).await,
        _ => (format!("Unknown tool: {tool_name}"), true),
    };
    (truncate(text), is_error)
}

fn truncate(s: String) -> String {
    if s.len() <= MAX_RESULT_CHARS {
        return s;
    }
    let mut end = MAX_RESULT_CHARS;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = s[..end].to_string();
    out.push_str("\n... [truncated]");
    out
}

async fn handle_list_tables(backend: &dyn SqlBackend) -> (String, bool) {
    match backend.list_tables().await {
        Ok(tables) if tables.is_empty() => ("No tables found.".into(), false),
        Ok(tables) => (
            format!("{} table(s):\n{}", tables.len(), tables.join("\n")),
            false,
        ),
        Err(e) => (format!("Error listing tables: {e}"), true),
    }
}

async fn handle_describe_table(backend: &dyn SqlBackend, input: &Value) -> (String, bool) {
    let Some(table) = input["table"].as_str().filter(|t| !t.trim().is_empty()) else {
        return ("Missing required 'table' argument".into(), true);
    };
    match backend.describe_table(table).await {
        Ok(result) => (result.to_markdown_table(), false),
        Err(e) => (format!("Error describing {table}: {e}"), true),
    }
}

async fn handle_run_sql_query(
    backend: &dyn SqlBackend,
    input: &Value,
    max_rows: usize,
) -> (String, bool) {
    let Some(query) = input["query"].as_str().filter(|q| !q.trim().is_empty()) else {
        return ("Missing required 'query' argument".into(), true);
    };
    let max_rows = max_rows.max(1);
    let limit = input["limit"]
        .as_u64()
        .map(|l| (l as usize).clamp(1, max_rows))
        .unwrap_or(max_rows);

    match backend.run_query(query, limit).await {
        Ok(result) => (result.to_markdown_table(), false),
        Err(e) => (format!("Query failed: {e}"), true),
    }
}
