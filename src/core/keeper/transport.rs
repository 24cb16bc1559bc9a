/*!
Outbound request execution for authentication and heartbeat calls.

`Transport` performs one logical call against the remote service: it attaches
bearer auth, optionally runs a capability probe (`OPTIONS`), then POSTs the
JSON payload with a bounded number of attempts and exponential backoff. Every
successful attempt is decoded into an [`Envelope`] and validated.

## Outcomes

- `Ok(Envelope)`: a well-formed envelope with a non-negative `code`
- `ProbeFailed`: the pre-flight probe did not return 2xx (never retried)
- `Forbidden`: HTTP 403, terminal for this call
- `ExhaustedRetries`: every attempt failed on network, status or envelope
  validation; flagged `proxy_dead` when all failures happened at connection
  level through a proxy

## Dependencies

- `isahc`: HTTP client with per-request proxy and timeout
- `async-trait`: object-safe client seam for tests
- `tokio`: backoff sleeps
*/

use crate::core::keeper::debug_logger::get_logger;
use crate::core::keeper::types::{Credential, EgressPath, Envelope, KeeperError};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use isahc::config::{Configurable, RedirectPolicy};
use isahc::{AsyncReadResponseExt, HttpClient};

/// HTTP method subset used by the keeper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

/// One outbound HTTP exchange
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Proxy URL; `None` means direct with any environment proxy disabled
    pub proxy: Option<String>,
    pub timeout: Duration,
}

/// Raw HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Coarse classification of a failed exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    /// Could not reach the peer (refused, unreachable, DNS, proxy handshake)
    Connect,
    Other,
}

/// Network-level failure of an exchange (no HTTP status was received)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct HttpFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl HttpFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// HTTP client abstraction for dependency injection and testing
#[async_trait::async_trait]
pub trait HttpClientTrait: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpFailure>;
}

/// Production HTTP client implementation using isahc
pub struct IsahcHttpClient {
    client: HttpClient,
}

impl IsahcHttpClient {
    pub fn new() -> Result<Self, KeeperError> {
        let client = HttpClient::builder()
            .redirect_policy(RedirectPolicy::Limit(3))
            .build()
            .map_err(|e| KeeperError::HttpClient(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn classify(error: &isahc::Error) -> FailureKind {
        use isahc::error::ErrorKind;
        match error.kind() {
            ErrorKind::Timeout => FailureKind::Timeout,
            ErrorKind::ConnectionFailed | ErrorKind::NameResolution => FailureKind::Connect,
            _ => FailureKind::Other,
        }
    }
}

#[async_trait::async_trait]
impl HttpClientTrait for IsahcHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, HttpFailure> {
        let proxy = match &request.proxy {
            Some(url) => Some(url.parse::<isahc::http::Uri>().map_err(|e| {
                HttpFailure::new(FailureKind::Connect, format!("Invalid proxy address {}: {}", url, e))
            })?),
            None => None,
        };

        let mut builder = isahc::Request::builder()
            .method(request.method.as_str())
            .uri(request.url.as_str())
            .timeout(request.timeout)
            .proxy(proxy);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let http_request = builder
            .body(request.body)
            .map_err(|e| HttpFailure::new(FailureKind::Other, format!("Request creation failed: {}", e)))?;

        let mut response = self
            .client
            .send_async(http_request)
            .await
            .map_err(|e| HttpFailure::new(Self::classify(&e), format!("Request failed: {}", e)))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| HttpFailure::new(FailureKind::Other, format!("Failed to read body: {}", e)))?;

        Ok(HttpResponse { status, body })
    }
}

/// Remote endpoint and whether it needs a capability probe first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub preflight: bool,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            preflight: false,
        }
    }

    pub fn with_preflight(mut self, preflight: bool) -> Self {
        self.preflight = preflight;
        self
    }
}

/// Retry bound, backoff and per-request timeout
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay between attempt `attempt` and `attempt + 1` (0-based): `base * 2^attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Header values attached to every call
#[derive(Debug, Clone)]
pub struct RequestProfile {
    pub user_agent: String,
    pub accept_language: String,
    pub referer: Option<String>,
    pub origin: Option<String>,
}

impl Default for RequestProfile {
    fn default() -> Self {
        Self {
            user_agent: format!("pulsekeeper/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "en-US,en;q=0.5".to_string(),
            referer: None,
            origin: None,
        }
    }
}

/// Reason a single attempt did not produce a usable envelope
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AttemptFailure {
    #[error("network error: {0}")]
    Network(HttpFailure),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
}

impl AttemptFailure {
    /// True when the failure points at the egress path rather than the service
    pub fn is_connection_level(&self) -> bool {
        match self {
            AttemptFailure::Network(failure) => {
                failure.kind == FailureKind::Connect
                    || dead_proxy_marker().is_some_and(|marker| marker.is_match(&failure.message))
            }
            AttemptFailure::Status(status) => *status == 407,
            AttemptFailure::InvalidEnvelope(_) => false,
        }
    }
}

/// Final outcome of a failed call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("capability probe failed ({0})")]
    ProbeFailed(String),
    #[error("authorization denied (HTTP 403)")]
    Forbidden,
    #[error("gave up after {attempts} attempts, last failure: {last}")]
    ExhaustedRetries {
        attempts: u32,
        last: AttemptFailure,
        proxy_dead: bool,
    },
    #[error("payload encoding failed: {0}")]
    Encode(String),
}

impl TransportError {
    pub fn is_proxy_dead(&self) -> bool {
        matches!(self, TransportError::ExhaustedRetries { proxy_dead: true, .. })
    }
}

fn dead_proxy_marker() -> Option<&'static Regex> {
    static MARKER: OnceLock<Option<Regex>> = OnceLock::new();
    MARKER
        .get_or_init(|| {
            Regex::new(r"(?i)proxy|tunnel|socks|connection refused|connection reset|couldn't connect").ok()
        })
        .as_ref()
}

/// Performs single logical calls with retry, backoff and envelope validation
pub struct Transport {
    client: Arc<dyn HttpClientTrait>,
    policy: RetryPolicy,
    profile: RequestProfile,
}

impl Transport {
    pub fn new(client: Arc<dyn HttpClientTrait>) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
            profile: RequestProfile::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_profile(mut self, profile: RequestProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Send `payload` to `endpoint` through `egress` on behalf of `credential`
    pub async fn send(
        &self,
        endpoint: &Endpoint,
        payload: &serde_json::Value,
        egress: &EgressPath,
        credential: &Credential,
    ) -> Result<Envelope, TransportError> {
        let headers = self.headers(credential);

        if endpoint.preflight {
            self.preflight(endpoint, egress, &headers).await?;
        }

        let body = serde_json::to_vec(payload).map_err(|e| TransportError::Encode(e.to_string()))?;
        let max_attempts = self.policy.max_attempts.max(1);
        let logger = get_logger();

        let mut all_connection_level = true;
        let mut last_failure = None;

        for attempt in 0..max_attempts {
            let request = HttpRequest {
                method: HttpMethod::Post,
                url: endpoint.url.clone(),
                headers: headers.clone(),
                body: body.clone(),
                proxy: egress.proxy_url().map(str::to_string),
                timeout: self.policy.timeout,
            };

            let failure = match self.client.execute(request).await {
                Ok(response) if response.status == 403 => {
                    logger.warn(
                        "Transport",
                        &format!(
                            "403 Forbidden from {} via {} on attempt {}",
                            endpoint.url,
                            egress,
                            attempt + 1
                        ),
                    );
                    return Err(TransportError::Forbidden);
                }
                Ok(response) if (200..300).contains(&response.status) => {
                    match Envelope::decode(&response.body) {
                        Ok(envelope) => return Ok(envelope),
                        Err(reason) => AttemptFailure::InvalidEnvelope(reason),
                    }
                }
                Ok(response) => AttemptFailure::Status(response.status),
                Err(failure) => AttemptFailure::Network(failure),
            };

            logger.transport_attempt_failed(
                &endpoint.url,
                egress.identity(),
                attempt + 1,
                max_attempts,
                &failure.to_string(),
            );
            all_connection_level &= failure.is_connection_level();
            last_failure = Some(failure);

            if attempt + 1 < max_attempts {
                tokio::time::sleep(self.policy.backoff(attempt)).await;
            }
        }

        let last = last_failure
            .unwrap_or_else(|| AttemptFailure::InvalidEnvelope("no attempt made".to_string()));
        logger.error(
            "Transport",
            &format!(
                "Failed call to {} after {} attempts via {}",
                endpoint.url, max_attempts, egress
            ),
        );

        Err(TransportError::ExhaustedRetries {
            attempts: max_attempts,
            last,
            proxy_dead: egress.is_proxy() && all_connection_level,
        })
    }

    /// Capability probe; any non-2xx status or network error short-circuits
    async fn preflight(
        &self,
        endpoint: &Endpoint,
        egress: &EgressPath,
        headers: &[(String, String)],
    ) -> Result<(), TransportError> {
        let request = HttpRequest {
            method: HttpMethod::Options,
            url: endpoint.url.clone(),
            headers: headers.to_vec(),
            body: Vec::new(),
            proxy: egress.proxy_url().map(str::to_string),
            timeout: self.policy.timeout,
        };

        match self.client.execute(request).await {
            Ok(response) if (200..300).contains(&response.status) => Ok(()),
            Ok(response) => Err(TransportError::ProbeFailed(format!("HTTP {}", response.status))),
            Err(failure) => Err(TransportError::ProbeFailed(failure.to_string())),
        }
    }

    fn headers(&self, credential: &Credential) -> Vec<(String, String)> {
        let mut headers = vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", credential.expose()),
            ),
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
            (
                "Accept-Language".to_string(),
                self.profile.accept_language.clone(),
            ),
            ("User-Agent".to_string(), self.profile.user_agent.clone()),
        ];
        if let Some(referer) = &self.profile.referer {
            headers.push(("Referer".to_string(), referer.clone()));
        }
        if let Some(origin) = &self.profile.origin {
            headers.push(("Origin".to_string(), origin.clone()));
        }
        headers
    }
}
