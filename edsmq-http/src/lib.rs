//! Minimal JSON-over-HTTP client for the EDSM web API.
//!
//! - Base URL anchoring: `{base}/{api}/{endpoint}`
//! - `GET` parameters travel as a query string, `POST` parameters as a
//!   urlencoded form body
//! - Per-request timeout and a fixed `User-Agent`
//! - One attempt per call; retry policy belongs to the caller
//! - Secret-looking parameters (`apiKey`, `token`, ...) are redacted in logs
//! - Optional *raw* request/response logging via `EDSMQ_HTTP_RAW=1`
//!
//! ```no_run
//! # async fn demo() -> Result<(), edsmq_http::HttpError> {
//! let client = edsmq_http::HttpClient::new("https://www.edsm.net")?;
//! let params = vec![("systemName".to_string(), "Sol".to_string())];
//! let _bodies: serde_json::Value = client
//!     .get_json("api-system-v1/bodies", &params)
//!     .await?;
//! # Ok(()) }
//! ```
//!
//! Observability: structured `tracing` events are emitted for request start,
//! response headers, body snippets (trace), final errors, and (optionally)
//! raw request/response lines under target `http.raw`.

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Method, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::env;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

/// `User-Agent` sent when the caller does not configure one.
pub const DEFAULT_USER_AGENT: &str = concat!("edsmq/", env!("CARGO_PKG_VERSION"));

// ==============================
// Raw logging toggles
// ==============================

const RAW_ENV: &str = "EDSMQ_HTTP_RAW";
const RAW_MAX_BODY: usize = 64 * 1024;
const SNIPPET_MAX: usize = 500;

fn raw_enabled() -> bool {
    matches!(
        env::var(RAW_ENV).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}

/// Render a curl command for repro/debug. The URL and body must already be
/// redacted by the caller.
fn make_curl(method: &Method, url: &str, user_agent: &str, body: Option<&str>) -> String {
    let mut parts = vec!["curl".to_string(), format!("-X{}", method)];
    parts.push(format!("-A '{}'", user_agent.replace('\'', r"'\''")));
    if let Some(body) = body {
        let mut s = body.to_string();
        if s.len() > RAW_MAX_BODY {
            s.truncate(RAW_MAX_BODY);
            s.push_str("...");
        }
        parts.push(format!("-d '{}'", s.replace('\'', r"'\''")));
    }
    parts.push(format!("'{}'", url));
    parts.join(" ")
}

// ==============================
// Errors
// ==============================

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("invalid URL: {0}")]
    Url(String),
    #[error("request build failed: {0}")]
    Build(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("decode error: {0}, body_snippet: {1}")]
    Decode(String, String),
    #[error("server returned error {status}: {message}")]
    Api { status: StatusCode, message: String },
}

impl HttpError {
    /// Whether the failure came from the HTTP status rather than the transport.
    pub fn is_status(&self) -> bool {
        matches!(self, HttpError::Api { .. })
    }
}

// ==============================
// Client
// ==============================

#[derive(Clone, Debug)]
pub struct HttpClient {
    base: Url,
    inner: Client,
    user_agent: String,
    pub default_timeout: Duration,
}

impl HttpClient {
    /// Construct a client anchored to a base URL.
    ///
    /// The base is treated as a directory: `http://host/edsm` and
    /// `http://host/edsm/` both resolve `api-status-v1/elite-server` to
    /// `http://host/edsm/api-status-v1/elite-server`.
    ///
    /// ```
    /// use edsmq_http::{HttpClient, HttpError};
    /// use std::time::Duration;
    ///
    /// let client = HttpClient::new("https://www.edsm.net")?;
    /// assert_eq!(client.default_timeout, Duration::from_secs(10));
    /// assert_eq!(client.user_agent(), edsmq_http::DEFAULT_USER_AGENT);
    /// # Ok::<(), HttpError>(())
    /// ```
    pub fn new(base: &str) -> Result<Self, HttpError> {
        let mut base = Url::parse(base).map_err(|e| HttpError::Url(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(HttpError::Url(format!("{base} cannot be used as a base URL")));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let inner = build_client(DEFAULT_USER_AGENT)?;
        Ok(Self {
            base,
            inner,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            default_timeout: Duration::from_secs(10),
        })
    }

    /// Override the per-request timeout.
    ///
    /// ```
    /// use edsmq_http::{HttpClient, HttpError};
    /// use std::time::Duration;
    ///
    /// let client = HttpClient::new("https://www.edsm.net")?
    ///     .with_timeout(Duration::from_secs(2));
    /// assert_eq!(client.default_timeout, Duration::from_secs(2));
    /// # Ok::<(), HttpError>(())
    /// ```
    pub fn with_timeout(mut self, dur: Duration) -> Self {
        self.default_timeout = dur;
        self
    }

    /// Replace the `User-Agent` header sent with every request.
    pub fn with_user_agent(mut self, user_agent: &str) -> Result<Self, HttpError> {
        HeaderValue::from_str(user_agent)
            .map_err(|e| HttpError::Build(format!("invalid User-Agent: {e}")))?;
        self.inner = build_client(user_agent)?;
        self.user_agent = user_agent.to_string();
        Ok(self)
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Resolve `path` against the base URL.
    ///
    /// ```
    /// use edsmq_http::HttpClient;
    ///
    /// let client = HttpClient::new("http://localhost:8080/edsm").unwrap();
    /// let url = client.url_for("api-system-v1/bodies").unwrap();
    /// assert_eq!(url.as_str(), "http://localhost:8080/edsm/api-system-v1/bodies");
    /// ```
    pub fn url_for(&self, path: &str) -> Result<Url, HttpError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| HttpError::Url(e.to_string()))
    }

    /// GET `path` with `params` as the query string and decode the JSON reply.
    pub async fn get_json<T>(&self, path: &str, params: &[(String, String)]) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        self.request_json_internal(Method::GET, path, params).await
    }

    /// POST `params` as a urlencoded form body to `path` and decode the JSON reply.
    pub async fn post_form<T>(&self, path: &str, params: &[(String, String)]) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        self.request_json_internal(Method::POST, path, params).await
    }

    // ==============================
    // Core request implementation
    // ==============================

    async fn request_json_internal<T>(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
    ) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
    {
        let url = self.url_for(path)?;
        let timeout = self.default_timeout;
        let is_get = method == Method::GET;

        let mut rb = self.inner.request(method.clone(), url.clone()).timeout(timeout);
        if is_get {
            if !params.is_empty() {
                rb = rb.query(params);
            }
        } else {
            let encoded = encode_form(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            rb = rb
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(encoded);
        }

        let req_id = Uuid::new_v4().simple().to_string();
        let redacted = redact_params(params);

        tracing::debug!(
            req_id=%req_id,
            method=%method,
            host_path=%format!("{}{}", url.host_str().unwrap_or("-"), url.path()),
            params=?redacted,
            timeout_ms=timeout.as_millis() as u64,
            "http.request.start"
        );

        if raw_enabled() {
            let redacted_pairs = redacted.iter().map(|(k, v)| (k.as_str(), v.as_str()));
            let (shown_url, shown_body) = if is_get {
                let mut shown = url.clone();
                if !redacted.is_empty() {
                    shown.query_pairs_mut().extend_pairs(redacted_pairs);
                }
                (shown.to_string(), None)
            } else {
                (url.to_string(), Some(encode_form(redacted_pairs)))
            };
            let curl = make_curl(&method, &shown_url, &self.user_agent, shown_body.as_deref());
            tracing::debug!(target: "http.raw", %req_id, %curl, "request");
        }

        // ----- Send -----
        let t0 = Instant::now();
        let resp = rb.send().await.map_err(|err| {
            let mapped = classify_send_error(&err, timeout);
            tracing::warn!(req_id=%req_id, error=%mapped, "http.network_error.send");
            mapped
        })?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = resp.bytes().await.map_err(|err| {
            let mapped = classify_send_error(&err, timeout);
            tracing::warn!(req_id=%req_id, error=%mapped, "http.network_error.body");
            mapped
        })?;
        let dur_ms = t0.elapsed().as_millis() as u64;

        tracing::debug!(
            req_id=%req_id,
            %status,
            duration_ms=dur_ms,
            body_len=content_len(&headers, bytes.len()),
            "http.response.headers"
        );

        if raw_enabled() {
            let mut body_snip = bytes.to_vec();
            let truncated = body_snip.len() > RAW_MAX_BODY;
            if truncated {
                body_snip.truncate(RAW_MAX_BODY);
            }
            let text = String::from_utf8_lossy(&body_snip);
            tracing::info!(
                target: "http.raw",
                %req_id,
                status=%status,
                duration_ms=dur_ms,
                body=%text,
                truncated
            );
        }

        let snippet = snip_body(&bytes);
        tracing::trace!(req_id=%req_id, body_snippet=%snippet, "http.response.body_snippet");

        if status.is_success() {
            return serde_json::from_slice::<T>(&bytes).map_err(|e| {
                tracing::warn!(
                    req_id=%req_id,
                    serde_line=%e.line(),
                    serde_col=%e.column(),
                    serde_err=%e,
                    body_snippet=%snippet,
                    "http.response.decode_error"
                );
                HttpError::Decode(e.to_string(), snippet)
            });
        }

        let message = extract_error_message(&bytes);
        tracing::warn!(
            req_id=%req_id,
            %status,
            message=%message,
            body_snippet=%snippet,
            "http.error"
        );
        Err(HttpError::Api { status, message })
    }
}

// ==============================
// Helpers
// ==============================

fn build_client(user_agent: &str) -> Result<Client, HttpError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .user_agent(user_agent)
        .build()
        .map_err(|e| HttpError::Build(e.to_string()))
}

fn classify_send_error(err: &reqwest::Error, timeout: Duration) -> HttpError {
    if err.is_timeout() {
        HttpError::Timeout(timeout)
    } else if err.is_builder() {
        HttpError::Build(err.to_string())
    } else {
        HttpError::Network(err.to_string())
    }
}

fn encode_form<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

fn is_secret_param(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "apikey"
            | "api_key"
            | "access_token"
            | "authorization"
            | "auth"
            | "key"
            | "token"
            | "secret"
            | "client_secret"
            | "password"
    )
}

fn redact_params(params: &[(String, String)]) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(k, v)| {
            let shown = if is_secret_param(k) {
                "<redacted>".to_string()
            } else {
                v.clone()
            };
            (k.clone(), shown)
        })
        .collect()
}

/// EDSM reports failures as `{"msgnum":..,"msg":".."}`; fall back to the
/// generic shapes and finally to a body snippet.
fn extract_error_message(body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct Msg {
        #[serde(default)]
        msg: String,
        #[serde(default)]
        message: String,
        #[serde(default)]
        error: String,
    }

    if let Ok(m) = serde_json::from_slice::<Msg>(body) {
        for candidate in [m.msg, m.message, m.error] {
            if !candidate.is_empty() {
                return candidate;
            }
        }
    }
    snip_body(body)
}

fn snip_body(body: &[u8]) -> String {
    let mut snip = String::from_utf8_lossy(body).to_string();
    if snip.len() > SNIPPET_MAX {
        let mut cut = SNIPPET_MAX;
        while !snip.is_char_boundary(cut) {
            cut -= 1;
        }
        snip.truncate(cut);
        snip.push_str("...");
    }
    snip
}

fn content_len(headers: &HeaderMap, body_len: usize) -> usize {
    headers
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<usize>().ok())
        .unwrap_or(body_len)
}
