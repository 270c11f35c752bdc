//! Agent manager staleness and rebuild behaviour, driven by a manual clock.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use sql_agent::agent::{QueryAgent, RunOutput};
use sql_agent::auth::{Credential, CredentialProvider};
use sql_agent::manager::{AgentBuilder, AgentManager, Clock};
use sql_agent::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    fn new(now: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(now)))
    }

    fn set(&self, now: DateTime<Utc>) {
        *self.0.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock()
    }
}

/// Hands out `token-N` credentials; the Nth is issued N-1 hours after
/// `issued_at` and lives one hour.
struct CountingProvider {
    issued_at: DateTime<Utc>,
    expiring: bool,
    fetches: AtomicUsize,
    fail: AtomicBool,
}

impl CountingProvider {
    fn expiring(issued_at: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            issued_at,
            expiring: true,
            fetches: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }

    fn non_expiring() -> Arc<Self> {
        Arc::new(Self {
            issued_at: Utc::now(),
            expiring: false,
            fetches: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        })
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for CountingProvider {
    async fn fetch_token(&self) -> Result<Credential> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::auth("token endpoint returned 401"));
        }
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        // widen the race window for concurrent callers
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let token = format!("token-{n}");
        Ok(if self.expiring {
            let issued_at = self.issued_at + Duration::hours(n as i64 - 1);
            Credential::expiring(token, issued_at, Duration::hours(1))
        } else {
            Credential::non_expiring(token)
        })
    }
}

/// Agent that answers with the token it was built with.
struct EchoAgent {
    token: String,
}

#[async_trait]
impl QueryAgent for EchoAgent {
    fn name(&self) -> &str {
        "SQL Assistant"
    }

    async fn run(&self, input: &str, _session_id: &str) -> Result<RunOutput> {
        Ok(RunOutput {
            content: format!("{}:{input}", self.token),
            ..RunOutput::default()
        })
    }
}

#[derive(Default)]
struct EchoBuilder {
    builds: AtomicUsize,
}

impl AgentBuilder for EchoBuilder {
    fn build(&self, credential: &Credential) -> Result<Arc<dyn QueryAgent>> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(EchoAgent {
            token: credential.token.clone(),
        }))
    }
}

async fn make_manager(
    provider: Arc<CountingProvider>,
    clock: Arc<ManualClock>,
) -> (AgentManager, Arc<EchoBuilder>) {
    let builder = Arc::new(EchoBuilder::default());
    let manager = AgentManager::new(provider, builder.clone())
        .await
        .unwrap()
        .with_clock(clock);
    (manager, builder)
}

#[tokio::test]
async fn construction_performs_initial_build() {
    let t0 = Utc::now();
    let provider = CountingProvider::expiring(t0);
    let (manager, builder) = make_manager(provider.clone(), ManualClock::new(t0)).await;

    assert_eq!(provider.fetches(), 1);
    assert_eq!(builder.builds.load(Ordering::SeqCst), 1);
    assert_eq!(manager.agent_name().await, "SQL Assistant");
}

#[tokio::test]
async fn static_credential_is_fetched_once() {
    let t0 = Utc::now();
    let clock = ManualClock::new(t0);
    let provider = CountingProvider::non_expiring();
    let (manager, _) = make_manager(provider.clone(), clock.clone()).await;

    for days in [0, 1, 30, 365] {
        clock.set(t0 + Duration::days(days));
        let out = manager.run("q", "s").await.unwrap();
        assert_eq!(out.content, "token-1:q");
    }
    assert_eq!(provider.fetches(), 1);
}

#[tokio::test]
async fn fresh_credential_passes_through() {
    let t0 = Utc::now();
    let clock = ManualClock::new(t0);
    let provider = CountingProvider::expiring(t0);
    let (manager, _) = make_manager(provider.clone(), clock.clone()).await;

    // expiry at t0+60m, margin 5m: one second before the threshold is fresh
    clock.set(t0 + Duration::minutes(55) - Duration::seconds(1));
    let out = manager.run("q", "s").await.unwrap();
    assert_eq!(out.content, "token-1:q");
    assert_eq!(provider.fetches(), 1);
}

#[tokio::test]
async fn stale_credential_rebuilds_before_forwarding() {
    let t0 = Utc::now();
    let clock = ManualClock::new(t0);
    let provider = CountingProvider::expiring(t0);
    let (manager, builder) = make_manager(provider.clone(), clock.clone()).await;

    clock.set(t0 + Duration::minutes(55) + Duration::seconds(1));
    let out = manager.run("q", "s").await.unwrap();
    assert_eq!(out.content, "token-2:q");
    assert_eq!(provider.fetches(), 2);
    assert_eq!(builder.builds.load(Ordering::SeqCst), 2);
    assert_eq!(manager.credential().await.token, "token-2");
}

#[tokio::test]
async fn exactly_at_margin_counts_as_stale() {
    let t0 = Utc::now();
    let clock = ManualClock::new(t0);
    let provider = CountingProvider::expiring(t0);
    let (manager, _) = make_manager(provider.clone(), clock.clone()).await;

    clock.set(t0 + Duration::minutes(55));
    manager.run("q", "s").await.unwrap();
    assert_eq!(provider.fetches(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_refresh() {
    let t0 = Utc::now();
    let clock = ManualClock::new(t0);
    let provider = CountingProvider::expiring(t0);
    let builder = Arc::new(EchoBuilder::default());
    let manager = Arc::new(
        AgentManager::new(provider.clone(), builder.clone())
            .await
            .unwrap()
            .with_clock(clock.clone()),
    );

    clock.set(t0 + Duration::minutes(58));
    let handles: Vec<_> = (0..16)
        .map(|i| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.run(&format!("q{i}"), "s").await })
        })
        .collect();

    for handle in handles {
        let out = handle.await.unwrap().unwrap();
        assert!(out.content.starts_with("token-2:"), "got {}", out.content);
    }
    assert_eq!(provider.fetches(), 2);
    assert_eq!(builder.builds.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failed_rebuild_keeps_previous_agent_and_retries() {
    let t0 = Utc::now();
    let clock = ManualClock::new(t0);
    let provider = CountingProvider::expiring(t0);
    let (manager, _) = make_manager(provider.clone(), clock.clone()).await;

    clock.set(t0 + Duration::minutes(58));
    provider.fail.store(true, Ordering::SeqCst);
    let err = manager.run("q", "s").await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
    assert_eq!(manager.credential().await.token, "token-1");

    provider.fail.store(false, Ordering::SeqCst);
    let out = manager.run("q", "s").await.unwrap();
    assert_eq!(out.content, "token-2:q");
}

#[tokio::test]
async fn print_response_writes_answer() {
    let t0 = Utc::now();
    let (manager, _) = make_manager(CountingProvider::expiring(t0), ManualClock::new(t0)).await;

    let mut out = Vec::new();
    manager.print_response("hello", "s", &mut out).await.unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "token-1:hello\n");
}
