use anyhow::{Context, Result};
use clap::Parser;
use sql_agent::auth::credential_provider;
use sql_agent::config::Config;
use sql_agent::database::SqlServer;
use sql_agent::http::HttpClient;
use sql_agent::manager::{AgentManager, SqlAgentBuilder};
use sql_agent::session::SessionStore;
use sql_agent::{cli, server};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "sql-agent",
    version,
    about = "Ask questions about a SQL Server database in plain language"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Interactive question/answer loop (default)
    Chat,

    /// Serve the HTTP API
    Serve {
        /// Port to listen on (overrides AGNO_OS_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Answer a single question and exit
    Ask {
        /// The question to ask
        #[arg(default_value = "Show me all available tables in the database")]
        query: String,
    },
}

async fn build_manager(config: &Config) -> Result<Arc<AgentManager>> {
    let http = HttpClient::new(concat!("sql-agent/", env!("CARGO_PKG_VERSION")))?;
    let credentials = credential_provider(&config.model, http.clone())?;
    let backend = Arc::new(SqlServer::new(config.database.clone())?);
    let sessions = SessionStore::open(&config.session_db_file).with_context(|| {
        format!(
            "failed to open session store {}",
            config.session_db_file.display()
        )
    })?;

    let builder = SqlAgentBuilder::new(
        config.model.clone(),
        config.agent.clone(),
        http,
        backend,
        Some(Arc::new(sessions)),
    );
    let manager = AgentManager::new(credentials, Arc::new(builder))
        .await
        .context("failed to build agent")?;
    Ok(Arc::new(manager))
}

#[tokio::main]
async fn main() -> Result<()> {
    // logs go to stderr so the chat transcript on stdout stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sql_agent=info")),
        )
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    info!(
        provider = %config.model.provider(),
        model = config.model.model_id(),
        host = %config.database.host,
        "configuration loaded"
    );

    let manager = build_manager(&config).await?;
    let session_id = Uuid::new_v4().to_string();

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => {
            let stdin = std::io::stdin();
            let mut stdout = std::io::stdout();
            cli::run_repl(&manager, &session_id, stdin.lock(), &mut stdout).await?;
        }
        Command::Serve { port } => {
            server::serve(manager, port.unwrap_or(config.port)).await?;
        }
        Command::Ask { query } => {
            let mut stdout = std::io::stdout();
            manager.print_response(&query, &session_id, &mut stdout).await?;
        }
    }

    Ok(())
}
