/*!
Per-pair connection lifecycle: authenticate, heartbeat, degrade, logout.

Each (credential, egress path) pair owns one `PairConnection`. The session
(`accountId`, `browserId`), connection state, retry counter and last
heartbeat instant are fields of that value and are never shared with other
pairs; the only shared collaborators are the `Transport` and the
`SessionStore`.

## Transitions

| From                          | Event                             | To            |
|-------------------------------|-----------------------------------|---------------|
| NotConnected                  | auth ok (uid present)             | NotConnected  |
| NotConnected                  | auth fails / Forbidden            | NotConnected, session cleared, pair fails |
| any                           | heartbeat code 0                  | Connected, retries = 0 |
| any                           | heartbeat Forbidden / code 403    | NotConnected, session cleared, pair fails |
| any                           | heartbeat other failure           | Disconnected, retries += 1 |

The retry counter is advisory: it is published and logged but never ends
the pair. Exhausted transport retries whose failures all point at a dead
proxy end the pair with `ProxyDead` so the orchestrator can swap the path.
*/

use crate::core::keeper::debug_logger::get_logger;
use crate::core::keeper::session_store::SessionStore;
use crate::core::keeper::transport::{Endpoint, Transport, TransportError};
use crate::core::keeper::types::{
    ConnectionState, PairKey, PairStatus, Session, SessionKey, SessionScope,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use uuid::Uuid;

/// Clock abstraction for dependency injection and testing
pub trait ClockTrait: Send + Sync {
    fn now(&self) -> Instant;
}

/// Production clock backed by the tokio clock (pausable in tests)
#[derive(Default)]
pub struct SystemClock;

impl ClockTrait for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Remote endpoints used by every pair
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub session: Endpoint,
    pub ping: Endpoint,
}

/// Per-pair cadence and payload settings
#[derive(Debug, Clone)]
pub struct HeartbeatSettings {
    pub ping_interval: Duration,
    pub client_version: String,
    pub session_scope: SessionScope,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(180),
            client_version: "2.2.7".to_string(),
            session_scope: SessionScope::Pair,
        }
    }
}

/// Collaborators shared by all pair lifecycles
pub struct PairContext {
    pub transport: Arc<Transport>,
    pub store: Arc<SessionStore>,
    pub clock: Arc<dyn ClockTrait>,
    pub endpoints: Endpoints,
    pub settings: HeartbeatSettings,
}

/// Why a pair lifecycle ended
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PairFailure {
    #[error("authentication rejected: {0}")]
    AuthRejected(String),
    #[error("heartbeat forbidden, authorization revoked")]
    HeartbeatForbidden,
    #[error("egress path dead: {0}")]
    ProxyDead(String),
    #[error("no session, authentication required")]
    NotAuthenticated,
    #[error("lifecycle task panicked: {0}")]
    Panicked(String),
}

impl PairFailure {
    pub fn is_proxy_dead(&self) -> bool {
        matches!(self, PairFailure::ProxyDead(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            PairFailure::AuthRejected(_) => "auth_rejected",
            PairFailure::HeartbeatForbidden => "heartbeat_forbidden",
            PairFailure::ProxyDead(_) => "proxy_dead",
            PairFailure::NotAuthenticated => "not_authenticated",
            PairFailure::Panicked(_) => "panicked",
        }
    }
}

/// Result of a successful `authenticate` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Reused a persisted session, no network call made
    Cached,
    /// Authenticated over the network and persisted the session
    Fresh,
}

/// Result of a heartbeat call that did not end the pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Too soon after the previous heartbeat; nothing sent
    Skipped,
    Connected,
    Disconnected,
}

pub struct PairConnection {
    key: PairKey,
    session_key: SessionKey,
    session: Option<Session>,
    state: ConnectionState,
    retries: u32,
    last_heartbeat: Option<Instant>,
    context: Arc<PairContext>,
    status: watch::Sender<PairStatus>,
}

impl PairConnection {
    pub fn new(key: PairKey, context: Arc<PairContext>) -> (Self, watch::Receiver<PairStatus>) {
        let (status, receiver) = watch::channel(PairStatus::default());
        let session_key = SessionKey::for_pair(context.settings.session_scope, &key);
        let connection = Self {
            key,
            session_key,
            session: None,
            state: ConnectionState::NotConnected,
            retries: 0,
            last_heartbeat: None,
            context,
            status,
        };
        (connection, receiver)
    }

    pub fn key(&self) -> &PairKey {
        &self.key
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_key(&self) -> &SessionKey {
        &self.session_key
    }

    /// Establish a session for this pair
    ///
    /// A cached session is reused as-is without any network call. Otherwise a
    /// fresh browser id is generated and the auth endpoint is called with an
    /// empty payload; the returned `uid` becomes the account id.
    ///
    /// # Errors
    ///
    /// Any failure performs a forced logout first. Returns `ProxyDead` when the
    /// transport blamed the egress path, `AuthRejected` otherwise.
    pub async fn authenticate(&mut self) -> Result<AuthOutcome, PairFailure> {
        let logger = get_logger();

        if let Some(cached) = self.context.store.load(&self.session_key).await {
            self.session = Some(cached);
            logger.auth_result(&self.key, true, "ok");
            return Ok(AuthOutcome::Cached);
        }

        let browser_id = Uuid::new_v4();
        let result = self
            .context
            .transport
            .send(
                &self.context.endpoints.session,
                &serde_json::json!({}),
                &self.key.path,
                &self.key.credential,
            )
            .await;

        let failure = match result {
            Ok(envelope) => match envelope.uid() {
                Some(uid) => {
                    let session = Session {
                        account_id: uid.to_string(),
                        browser_id,
                    };
                    if let Err(e) = self.context.store.save(&self.session_key, session.clone()).await {
                        logger.error(
                            "Connection",
                            &format!("Failed to persist session for {}: {}", self.key, e),
                        );
                    }
                    self.session = Some(session);
                    logger.auth_result(&self.key, false, "ok");
                    return Ok(AuthOutcome::Fresh);
                }
                None => PairFailure::AuthRejected(format!("no uid in response (code {})", envelope.code)),
            },
            Err(e) if e.is_proxy_dead() => PairFailure::ProxyDead(e.to_string()),
            Err(e) => PairFailure::AuthRejected(e.to_string()),
        };

        logger.auth_result(&self.key, false, failure.label());
        self.forced_logout(&failure.to_string()).await;
        Err(failure)
    }

    /// Send one heartbeat and apply the resulting transition
    ///
    /// Skipped (no state change, no network) when the previous heartbeat was
    /// less than the ping interval ago.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` without a session, `HeartbeatForbidden` after a
    /// forced logout, `ProxyDead` when the egress path is unusable.
    pub async fn heartbeat(&mut self) -> Result<HeartbeatOutcome, PairFailure> {
        let session = match &self.session {
            Some(session) => session.clone(),
            None => return Err(PairFailure::NotAuthenticated),
        };

        let now = self.context.clock.now();
        if let Some(last) = self.last_heartbeat {
            if now.saturating_duration_since(last) < self.context.settings.ping_interval {
                get_logger().debug(
                    "Connection",
                    &format!("Skipping heartbeat for {}, interval not elapsed", self.key),
                );
                return Ok(HeartbeatOutcome::Skipped);
            }
        }
        self.last_heartbeat = Some(now);

        let payload = serde_json::json!({
            "id": session.account_id,
            "browser_id": session.browser_id.to_string(),
            "timestamp": chrono::Utc::now().timestamp(),
            "version": self.context.settings.client_version,
        });

        let result = self
            .context
            .transport
            .send(
                &self.context.endpoints.ping,
                &payload,
                &self.key.path,
                &self.key.credential,
            )
            .await;

        match result {
            Ok(envelope) if envelope.is_success() => {
                self.state = ConnectionState::Connected;
                self.retries = 0;
                self.publish();
                get_logger().heartbeat_result(&self.key, self.state, self.retries, "ok");
                Ok(HeartbeatOutcome::Connected)
            }
            Ok(envelope) if envelope.is_forbidden() => {
                self.forced_logout("heartbeat returned code 403").await;
                Err(PairFailure::HeartbeatForbidden)
            }
            Ok(envelope) => {
                self.mark_disconnected(&format!("code {}", envelope.code));
                Ok(HeartbeatOutcome::Disconnected)
            }
            Err(TransportError::Forbidden) => {
                self.forced_logout("heartbeat returned HTTP 403").await;
                Err(PairFailure::HeartbeatForbidden)
            }
            Err(e) if e.is_proxy_dead() => {
                self.mark_disconnected(&e.to_string());
                Err(PairFailure::ProxyDead(e.to_string()))
            }
            Err(e) => {
                self.mark_disconnected(&e.to_string());
                Ok(HeartbeatOutcome::Disconnected)
            }
        }
    }

    /// Authenticate, then heartbeat every ping interval until the pair fails
    ///
    /// Only returns on failure; cancellation happens by aborting the task.
    pub async fn run(mut self) -> PairFailure {
        if let Err(failure) = self.authenticate().await {
            return failure;
        }

        let interval = self.context.settings.ping_interval;
        loop {
            if let Err(failure) = self.heartbeat().await {
                return failure;
            }
            tokio::time::sleep(interval).await;
        }
    }

    fn mark_disconnected(&mut self, detail: &str) {
        self.state = ConnectionState::Disconnected;
        self.retries = self.retries.saturating_add(1);
        self.publish();
        get_logger().heartbeat_result(&self.key, self.state, self.retries, detail);
    }

    async fn forced_logout(&mut self, reason: &str) {
        self.state = ConnectionState::NotConnected;
        self.session = None;
        if let Err(e) = self.context.store.clear(&self.session_key).await {
            get_logger().error(
                "Connection",
                &format!("Failed to clear session for {}: {}", self.key, e),
            );
        }
        self.publish();
        get_logger().forced_logout(&self.key, reason);
    }

    fn publish(&self) {
        // Receivers may be gone when the orchestrator already dropped the handle
        let _ = self.status.send(PairStatus {
            state: self.state,
            retries: self.retries,
            last_heartbeat: self.last_heartbeat,
        });
    }
}
