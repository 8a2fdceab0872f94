use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque JSON document returned by the remote API.
pub type Reply = serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

/// One queued API call. Built by value and never mutated after enqueueing.
///
/// Parameters keep their insertion order; setting an existing name replaces
/// its value in place.
///
/// ```
/// use edsmq_dispatch::{Method, Request};
///
/// let req = Request::get("api-system-v1", "bodies")
///     .with_param("systemName", "Sol")
///     .with_param("systemName", "Achenar");
/// assert_eq!(req.method(), Method::Get);
/// assert_eq!(req.path(), "api-system-v1/bodies");
/// assert_eq!(req.param("systemName"), Some("Achenar"));
/// assert_eq!(req.params().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    api: String,
    endpoint: String,
    method: Method,
    params: Vec<(String, String)>,
}

impl Request {
    pub fn new(api: impl Into<String>, endpoint: impl Into<String>, method: Method) -> Self {
        Self {
            api: api.into(),
            endpoint: endpoint.into(),
            method,
            params: Vec::new(),
        }
    }

    pub fn get(api: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::new(api, endpoint, Method::Get)
    }

    pub fn post(api: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::new(api, endpoint, Method::Post)
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.params.push((name, value)),
        }
        self
    }

    pub fn with_params<I, K, V>(self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        params
            .into_iter()
            .fold(self, |req, (k, v)| req.with_param(k, v))
    }

    pub fn api(&self) -> &str {
        &self.api
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Path relative to the API base URL: `{api}/{endpoint}`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.api, self.endpoint)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.method, self.api, self.endpoint)
    }
}

/// A completed call: the request as enqueued and the decoded reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEntry {
    pub request: Request,
    pub reply: Reply,
}
