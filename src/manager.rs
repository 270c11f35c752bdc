//! Keeps one live agent bound to a usable credential.
//!
//! Staleness is checked lazily at the start of every call. When the credential
//! is within the margin of its expiry, the whole agent is rebuilt: fetch a new
//! credential, select the model, construct the agent. Rebuilds are
//! single-flight; callers that queue behind one reuse its result.

use crate::agent::{QueryAgent, RunOutput, SqlAgent};
use crate::auth::{Credential, CredentialProvider};
use crate::config::{AgentSettings, ModelConfig};
use crate::database::SqlBackend;
use crate::error::Result;
use crate::http::HttpClient;
use crate::model::select_model;
use crate::render::render_markdown;
use crate::session::SessionStore;
use chrono::{DateTime, Duration, Utc};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Refresh this long before the credential actually expires.
pub const DEFAULT_REFRESH_MARGIN_SECS: i64 = 5 * 60;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Constructs an agent bound to a credential.
pub trait AgentBuilder: Send + Sync {
    fn build(&self, credential: &Credential) -> Result<Arc<dyn QueryAgent>>;
}

/// Builds [`SqlAgent`]s for the configured model provider.
pub struct SqlAgentBuilder {
    model: ModelConfig,
    settings: AgentSettings,
    http: HttpClient,
    backend: Arc<dyn SqlBackend>,
    sessions: Option<Arc<SessionStore>>,
}

impl SqlAgentBuilder {
    pub fn new(
        model: ModelConfig,
        settings: AgentSettings,
        http: HttpClient,
        backend: Arc<dyn SqlBackend>,
        sessions: Option<Arc<SessionStore>>,
    ) -> Self {
        Self {
            model,
            settings,
            http,
            backend,
            sessions,
        }
    }
}

impl AgentBuilder for SqlAgentBuilder {
    fn build(&self, credential: &Credential) -> Result<Arc<dyn QueryAgent>> {
        let client = select_model(
            &self.model,
            credential,
            self.settings.max_tokens,
            self.http.clone(),
        )?;
        Ok(Arc::new(SqlAgent::new(
            self.settings.clone(),
            Box::new(client),
            self.backend.clone(),
            self.sessions.clone(),
        )))
    }
}

struct Live {
    agent: Arc<dyn QueryAgent>,
    credential: Credential,
}

pub struct AgentManager {
    credentials: Arc<dyn CredentialProvider>,
    builder: Arc<dyn AgentBuilder>,
    clock: Arc<dyn Clock>,
    margin: Duration,
    live: RwLock<Live>,
    rebuild: Mutex<()>,
}

impl AgentManager {
    /// Fetch the first credential and build the first agent.
    pub async fn new(
        credentials: Arc<dyn CredentialProvider>,
        builder: Arc<dyn AgentBuilder>,
    ) -> Result<Self> {
        let credential = credentials.fetch_token().await?;
        let agent = builder.build(&credential)?;
        info!(agent = agent.name(), "agent ready");

        Ok(Self {
            credentials,
            builder,
            clock: Arc::new(SystemClock),
            margin: Duration::seconds(DEFAULT_REFRESH_MARGIN_SECS),
            live: RwLock::new(Live { agent, credential }),
            rebuild: Mutex::new(()),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    pub async fn agent_name(&self) -> String {
        self.live.read().await.agent.name().to_string()
    }

    pub async fn credential(&self) -> Credential {
        self.live.read().await.credential.clone()
    }

    /// Answer `query`, rebuilding the agent first if its credential is stale.
    pub async fn run(&self, query: &str, session_id: &str) -> Result<RunOutput> {
        let agent = self.current_agent().await?;
        agent.run(query, session_id).await
    }

    /// Like [`run`](Self::run), writing the answer to `out` rendered for a
    /// terminal.
    pub async fn print_response<W: Write>(
        &self,
        query: &str,
        session_id: &str,
        out: &mut W,
    ) -> Result<()> {
        let output = self.run(query, session_id).await?;
        writeln!(out, "{}", render_markdown(&output.content))?;
        out.flush()?;
        Ok(())
    }

    async fn current_agent(&self) -> Result<Arc<dyn QueryAgent>> {
        if let Some(agent) = self.fresh_agent().await {
            return Ok(agent);
        }

        let _guard = self.rebuild.lock().await;
        // another caller may have rebuilt while we waited
        if let Some(agent) = self.fresh_agent().await {
            return Ok(agent);
        }

        info!("credential near expiry, rebuilding agent");
        let credential = self.credentials.fetch_token().await?;
        let agent = self.builder.build(&credential)?;
        if credential.is_stale(self.clock.now(), self.margin) {
            warn!(
                expires_at = ?credential.expires_at,
                "new credential is already inside the refresh margin"
            );
        }

        let mut live = self.live.write().await;
        *live = Live {
            agent: agent.clone(),
            credential,
        };
        Ok(agent)
    }

    async fn fresh_agent(&self) -> Option<Arc<dyn QueryAgent>> {
        let live = self.live.read().await;
        if live.credential.is_stale(self.clock.now(), self.margin) {
            None
        } else {
            Some(live.agent.clone())
        }
    }
}
