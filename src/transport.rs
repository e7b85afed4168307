//! HTTP transport boundary.
//!
//! The engine hands a fully interpolated [`ResolvedRequest`] to a
//! [`Transport`] and gets a [`Response`] back. [`HttpTransport`] is the
//! reqwest-backed implementation; tests substitute scripted ones.

use crate::error::{ExtractionError, TransportError};
use crate::model::{AuthConfig, Backoff, RetryConfig};
use async_trait::async_trait;
use reqwest::redirect::Policy;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

/// Request payload after interpolation.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Text(String),
}

impl RequestBody {
    /// Wire text of the body, as recorded in step results.
    pub fn to_text(&self) -> String {
        match self {
            Self::Json(value) => value.to_string(),
            Self::Text(text) => text.clone(),
        }
    }
}

/// Everything needed to send one request.
#[derive(Debug, Clone)]
pub struct ResolvedRequest {
    pub method: String,
    /// Absolute URL, or a path joined onto `base_url`.
    pub url: String,
    pub base_url: Option<String>,
    pub headers: HashMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Option<RequestBody>,
    pub auth: Option<AuthConfig>,
    pub cookies: BTreeMap<String, String>,
    pub timeout: Duration,
    pub verify_ssl: bool,
    pub follow_redirects: bool,
}

impl ResolvedRequest {
    /// Final URL with the base applied and query parameters appended.
    /// Only `http://` and `https://` URLs bypass the base.
    pub fn full_url(&self) -> Result<Url, TransportError> {
        let joined = match &self.base_url {
            Some(base) if !is_absolute(&self.url) && !base.is_empty() => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                self.url.trim_start_matches('/')
            ),
            _ => self.url.clone(),
        };

        let mut url = Url::parse(&joined).map_err(|source| TransportError::InvalidUrl {
            url: joined.clone(),
            source,
        })?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        Ok(url)
    }
}

fn is_absolute(url: &str) -> bool {
    ["http://", "https://"].iter().any(|scheme| {
        url.get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}

/// Response as seen by captures and assertions.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: u16,
    /// Header names are stored lowercase.
    pub headers: HashMap<String, Vec<String>>,
    pub body: Vec<u8>,
    pub body_text: String,
    pub elapsed: Duration,
    pub size: u64,
}

impl Response {
    /// Build a response from text, mostly for tests and scripted transports.
    pub fn from_text(status: u16, body: impl Into<String>) -> Self {
        let body_text = body.into();
        Self {
            status,
            headers: HashMap::new(),
            body: body_text.as_bytes().to_vec(),
            size: body_text.len() as u64,
            body_text,
            elapsed: Duration::ZERO,
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    /// First value of `name`, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .or_else(|| {
                self.headers
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, values)| values)
            })
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Body parsed as JSON.
    pub fn json(&self) -> Result<Value, ExtractionError> {
        serde_json::from_str(&self.body_text)
            .map_err(|e| ExtractionError::InvalidJson(e.to_string()))
    }

    /// Flattened headers (first value each), as recorded in step results.
    pub fn header_summary(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .filter_map(|(name, values)| values.first().map(|v| (name.clone(), v.clone())))
            .collect()
    }
}

/// Sends resolved requests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &ResolvedRequest) -> Result<Response, TransportError>;
}

/// reqwest-backed transport. Clients are cached per TLS/redirect policy.
#[derive(Default)]
pub struct HttpTransport {
    clients: Mutex<HashMap<(bool, bool), reqwest::Client>>,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self, verify_ssl: bool, follow_redirects: bool) -> Result<reqwest::Client, TransportError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&(verify_ssl, follow_redirects)) {
            return Ok(client.clone());
        }

        let redirect = if follow_redirects {
            Policy::default()
        } else {
            Policy::none()
        };
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!verify_ssl)
            .redirect(redirect)
            .build()
            .map_err(TransportError::Client)?;
        clients.insert((verify_ssl, follow_redirects), client.clone());
        Ok(client)
    }
}

fn apply_auth(
    builder: reqwest::RequestBuilder,
    auth: &AuthConfig,
) -> Result<reqwest::RequestBuilder, TransportError> {
    match auth.kind.as_str() {
        "basic" => Ok(builder.basic_auth(
            auth.username.clone().unwrap_or_default(),
            auth.password.clone(),
        )),
        "bearer" => Ok(builder.bearer_auth(auth.token.clone().unwrap_or_default())),
        "api_key" => {
            let header = auth
                .config
                .get("header")
                .and_then(Value::as_str)
                .unwrap_or("Authorization");
            Ok(builder.header(header, auth.token.clone().unwrap_or_default()))
        }
        other => Err(TransportError::UnsupportedAuth(other.to_string())),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &ResolvedRequest) -> Result<Response, TransportError> {
        let url = request.full_url()?;
        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| TransportError::InvalidMethod(request.method.clone()))?;
        let client = self.client(request.verify_ssl, request.follow_redirects)?;

        let mut builder = client.request(method, url.clone()).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(auth) = &request.auth {
            builder = apply_auth(builder, auth)?;
        }
        if !request.cookies.is_empty() {
            let cookie = request
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            builder = builder.header(reqwest::header::COOKIE, cookie);
        }

        let has_content_type = request
            .headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case("content-type"));
        builder = match &request.body {
            Some(RequestBody::Json(value)) if has_content_type => {
                builder.body(serde_json::to_vec(value)?)
            }
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Text(text)) => builder.body(text.clone()),
            None => builder,
        };

        debug!(method = %request.method, %url, "sending request");
        let start = Instant::now();
        let response = builder.send().await.map_err(TransportError::Send)?;
        let status = response.status().as_u16();

        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in response.headers() {
            headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        let body = response.bytes().await.map_err(TransportError::Read)?.to_vec();
        let elapsed = start.elapsed();
        debug!(status, elapsed_ms = elapsed.as_millis() as u64, "received response");

        Ok(Response {
            status,
            headers,
            body_text: String::from_utf8_lossy(&body).into_owned(),
            size: body.len() as u64,
            body,
            elapsed,
        })
    }
}

/// How transport failures are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Wait before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Linear => self.delay.saturating_mul(attempt),
            Backoff::Exponential => self
                .delay
                .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1))),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            retries: config.count,
            delay: Duration::from_millis(config.delay_ms),
            backoff: config.backoff,
        }
    }
}

/// Execute `request`, retrying transport failures only. Any received
/// response, whatever its status, is returned as is.
pub async fn execute_with_retry(
    transport: &dyn Transport,
    request: &ResolvedRequest,
    policy: RetryPolicy,
) -> Result<Response, TransportError> {
    let mut attempt = 0;
    loop {
        match transport.execute(request).await {
            Ok(response) => return Ok(response),
            Err(e) if attempt < policy.retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                warn!(
                    error = %e,
                    attempt,
                    url = %request.url,
                    "transport error, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
