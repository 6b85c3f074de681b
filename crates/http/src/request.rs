//! Request and response value types for the HTTP client.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use breakwater_common::{AppError, AppResult};

/// HTTP methods the client issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A single outgoing request, before client-level processing.
///
/// Fields are public so request interceptors can rewrite any part of the
/// request before it is sent. The `url` is joined to the client's base URL;
/// with an empty base it is used verbatim and may be absolute.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    /// Per-request headers; these override the client-level defaults
    /// (content type, authorization) on name collision.
    pub headers: Option<HashMap<String, String>>,
    /// JSON body, serialized as-is.
    pub body: Option<Value>,
    /// When set, interceptors, response observers, and the automatic token
    /// refresh are all bypassed for this request.
    pub skip_interceptors: bool,
}

impl HttpRequest {
    fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self { method, url: url.into(), headers: None, body: None, skip_interceptors: false }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, url)
    }

    /// Add a per-request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.get_or_insert_with(HashMap::new).insert(name.into(), value.into());
        self
    }

    /// Serialize `body` as the JSON request body.
    pub fn json<B: Serialize>(mut self, body: &B) -> AppResult<Self> {
        let value = serde_json::to_value(body).map_err(|err| {
            AppError::validation("Failed to serialize request body").with_cause(err)
        })?;
        self.body = Some(value);
        Ok(self)
    }

    /// Use a pre-built JSON value as the request body.
    #[must_use]
    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Bypass interceptors, observers, and token refresh for this request.
    #[must_use]
    pub fn skip_interceptors(mut self) -> Self {
        self.skip_interceptors = true;
        self
    }
}

/// A successful response: the decoded body plus the status that carried it.
#[derive(Debug, Clone)]
pub struct HttpResponse<T> {
    pub status: u16,
    pub data: T,
}
