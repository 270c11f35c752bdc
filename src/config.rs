//! Configuration loaded once from the environment.
//!
//! `main` loads `.env` with `dotenvy` and calls [`Config::from_env`]; everything
//! downstream receives the resulting immutable struct. Tests use
//! [`Config::from_lookup`] with a map instead of touching process state.

use crate::error::{Error, Result};
use crate::llm::Provider;
use std::path::PathBuf;

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_AZURE_MODEL: &str = "gpt-4.1";
pub const DEFAULT_AZURE_DEPLOYMENT: &str = "gpt-4.1_2025-04-14";
pub const DEFAULT_AZURE_API_VERSION: &str = "2025-01-01-preview";
pub const DEFAULT_AZURE_ENDPOINT: &str =
    "https://api.uhg.com/api/cloud/api-management/ai-gateway/1.0";
pub const DEFAULT_TOKEN_URL: &str = "https://api.uhg.com/oauth2/token";
pub const DEFAULT_TOKEN_SCOPE: &str = "https://api.uhg.com/.default";
pub const DEFAULT_SESSION_DB: &str = "agno_sessions.db";
pub const DEFAULT_PORT: u16 = 7777;

#[derive(Debug, Clone)]
pub struct Config {
    pub model: ModelConfig,
    pub database: DatabaseConfig,
    pub session_db_file: PathBuf,
    pub port: u16,
    pub agent: AgentSettings,
}

/// Per-provider model settings. Required fields stay optional here and are
/// checked by the model selector, so a missing key is reported against the
/// provider that needs it.
#[derive(Debug, Clone)]
pub enum ModelConfig {
    OpenAi(OpenAiSettings),
    Azure(AzureSettings),
}

impl ModelConfig {
    pub fn provider(&self) -> Provider {
        match self {
            Self::OpenAi(_) => Provider::OpenAi,
            Self::Azure(_) => Provider::Azure,
        }
    }

    pub fn model_id(&self) -> &str {
        match self {
            Self::OpenAi(s) => &s.model_id,
            Self::Azure(s) => &s.model_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    pub model_id: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct AzureSettings {
    pub project_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub model_id: String,
    pub deployment: String,
    pub api_version: String,
    pub endpoint: String,
    pub token_url: String,
    pub scope: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub auth: DatabaseAuth,
    pub encrypt: bool,
    pub trust_server_certificate: bool,
    pub application_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseAuth {
    /// Integrated security of the running process.
    Trusted,
    SqlServer { username: String, password: String },
}

/// Behaviour of the SQL agent itself.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub name: String,
    pub instructions: Vec<String>,
    pub num_history_runs: usize,
    pub add_datetime_to_context: bool,
    pub max_turns: u32,
    pub max_tokens: u32,
    /// Row cap applied to every query the agent runs.
    pub max_rows: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: "SQL Assistant".into(),
            instructions: default_instructions(),
            num_history_runs: 10,
            add_datetime_to_context: true,
            max_turns: 10,
            max_tokens: 4096,
            max_rows: 100,
        }
    }
}

fn default_instructions() -> Vec<String> {
    [
        "You are an expert SQL Server database analyst.",
        "Always explain your SQL queries before executing them.",
        "For large datasets, use the TOP clause to restrict results.",
        "Provide clear insights and actionable recommendations.",
        "Focus on read-only analysis; never suggest UPDATE, DELETE, or INSERT operations.",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Config {
    /// Load configuration from process environment variables.
    ///
    /// ## Model
    /// - `MODEL_PROVIDER`: `openai` (default) or `azure`
    /// - `OPENAI_API_KEY`, `OPENAI_MODEL_ID`, `OPENAI_BASE_URL`
    /// - `AZURE_CLIENT_ID`, `AZURE_CLIENT_SECRET`, `AZURE_PROJECT_ID`,
    ///   `AZURE_MODEL_ID`, `AZURE_DEPLOYMENT`, `AZURE_API_VERSION`,
    ///   `AZURE_ENDPOINT`, `AZURE_TOKEN_URL`, `AZURE_TOKEN_SCOPE`
    ///
    /// ## Database
    /// - `SQLSERVER_HOST` (required, `host` or `host,port`), `SQLSERVER_DATABASE`
    /// - `SQLSERVER_TRUSTED_CONNECTION`: `yes` (default) or `no`
    /// - `SQLSERVER_USERNAME`, `SQLSERVER_PASSWORD`: required when not trusted
    /// - `SQLSERVER_ENCRYPT` (default false), `SQLSERVER_TRUST_CERT` (default true)
    ///
    /// ## Runtime
    /// - `SESSION_DB_FILE` (default `agno_sessions.db`), `AGNO_OS_PORT` (default 7777)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Empty values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let provider: Provider = get("MODEL_PROVIDER")
            .unwrap_or_else(|| "openai".into())
            .parse()?;

        let model = match provider {
            Provider::OpenAi => ModelConfig::OpenAi(OpenAiSettings {
                api_key: get("OPENAI_API_KEY"),
                model_id: or("OPENAI_MODEL_ID", DEFAULT_OPENAI_MODEL),
                base_url: or("OPENAI_BASE_URL", DEFAULT_OPENAI_BASE_URL),
            }),
            Provider::Azure => ModelConfig::Azure(AzureSettings {
                project_id: get("AZURE_PROJECT_ID"),
                client_id: get("AZURE_CLIENT_ID"),
                client_secret: get("AZURE_CLIENT_SECRET"),
                model_id: or("AZURE_MODEL_ID", DEFAULT_AZURE_MODEL),
                deployment: or("AZURE_DEPLOYMENT", DEFAULT_AZURE_DEPLOYMENT),
                api_version: or("AZURE_API_VERSION", DEFAULT_AZURE_API_VERSION),
                endpoint: or("AZURE_ENDPOINT", DEFAULT_AZURE_ENDPOINT),
                token_url: or("AZURE_TOKEN_URL", DEFAULT_TOKEN_URL),
                scope: or("AZURE_TOKEN_SCOPE", DEFAULT_TOKEN_SCOPE),
            }),
        };

        let raw_host = get("SQLSERVER_HOST")
            .ok_or_else(|| Error::config("SQLSERVER_HOST environment variable is required"))?;
        let (host, port) = split_host_port(&raw_host)?;

        let auth = if parse_flag(get("SQLSERVER_TRUSTED_CONNECTION").as_deref(), true) {
            DatabaseAuth::Trusted
        } else {
            match (get("SQLSERVER_USERNAME"), get("SQLSERVER_PASSWORD")) {
                (Some(username), Some(password)) => DatabaseAuth::SqlServer { username, password },
                _ => {
                    return Err(Error::config(
                        "SQLSERVER_USERNAME and SQLSERVER_PASSWORD are required when \
                         SQLSERVER_TRUSTED_CONNECTION is not 'yes'",
                    ));
                }
            }
        };

        let port_number = match get("AGNO_OS_PORT") {
            Some(p) => p
                .parse()
                .map_err(|_| Error::config(format!("AGNO_OS_PORT is not a valid port: {p}")))?,
            None => DEFAULT_PORT,
        };

        Ok(Config {
            model,
            database: DatabaseConfig {
                host,
                port,
                database: get("SQLSERVER_DATABASE"),
                auth,
                encrypt: parse_flag(get("SQLSERVER_ENCRYPT").as_deref(), false),
                trust_server_certificate: parse_flag(get("SQLSERVER_TRUST_CERT").as_deref(), true),
                application_name: "sql-agent".into(),
            },
            session_db_file: PathBuf::from(or("SESSION_DB_FILE", DEFAULT_SESSION_DB)),
            port: port_number,
            agent: AgentSettings::default(),
        })
    }
}

/// Accepts `host` or the SQL Server style `host,port`.
fn split_host_port(raw: &str) -> Result<(String, u16)> {
    match raw.split_once(',') {
        Some((host, port)) => {
            let port = port
                .trim()
                .parse()
                .map_err(|_| Error::config(format!("invalid port in SQLSERVER_HOST: {raw}")))?;
            Ok((host.trim().to_string(), port))
        }
        None => Ok((raw.to_string(), 1433)),
    }
}

fn parse_flag(value: Option<&str>, default: bool) -> bool {
    match value.map(str::to_lowercase).as_deref() {
        Some("yes" | "true" | "1" | "on") => true,
        Some("no" | "false" | "0" | "off") => false,
        _ => default,
    }
}
