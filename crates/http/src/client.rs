//! The HTTP client: header merging, token injection, interception, typed
//! error mapping, and one-shot token refresh on 401.
//!
//! The client is a thin policy layer over [`reqwest::Client`]. Every request
//! flows through the same pipeline: interceptors rewrite the request, the
//! token provider supplies the bearer token, headers are merged (per-request
//! headers win), the response is observed, and failures are mapped into the
//! [`AppError`] taxonomy. A 401 triggers at most one refresh-and-resend;
//! interceptors and the token provider are not consulted again for the
//! resend, and a request marked `skip_interceptors` bypasses the refresh
//! entirely.
//!
//! Retry policies and circuit breakers are deliberately not baked in here;
//! callers compose them around [`HttpClient::request`] with the decorators
//! from `breakwater-common`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use breakwater_common::{AppError, AppResult, ErrorKind};

use crate::request::{HttpMethod, HttpRequest, HttpResponse};

/// Supplies the current bearer token, if one is available.
pub type TokenProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Rewrites an outgoing request before it is sent. Interceptors run in
/// registration order and each receives the previous one's output.
pub type RequestInterceptor = Arc<dyn Fn(HttpRequest) -> HttpRequest + Send + Sync>;

/// Observes completed exchanges; must not fail and cannot alter the response.
pub type ResponseObserver = Arc<dyn Fn(&ResponseEvent) + Send + Sync>;

/// Obtains a fresh token after a 401. Returning `None` means the refresh
/// failed and the original unauthorized error stands.
pub type TokenRefresher = Arc<dyn Fn() -> BoxFuture<'static, Option<String>> + Send + Sync>;

/// What a response observer sees about a completed exchange.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub method: HttpMethod,
    pub url: String,
    pub status: u16,
    pub elapsed: Duration,
}

/// Builder for [`HttpClient`].
pub struct HttpClientBuilder {
    base_url: String,
    timeout: Option<Duration>,
    token_provider: Option<TokenProvider>,
    interceptors: Vec<RequestInterceptor>,
    observers: Vec<ResponseObserver>,
    token_refresher: Option<TokenRefresher>,
}

impl HttpClientBuilder {
    fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            timeout: None,
            token_provider: None,
            interceptors: Vec::new(),
            observers: Vec::new(),
            token_refresher: None,
        }
    }

    /// Overall request timeout. Unset means no client-side deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Source of the bearer token attached to authenticated requests.
    pub fn token_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> Option<String> + Send + Sync + 'static,
    {
        self.token_provider = Some(Arc::new(provider));
        self
    }

    /// Register a request interceptor. Interceptors run in registration order.
    pub fn interceptor<F>(mut self, interceptor: F) -> Self
    where
        F: Fn(HttpRequest) -> HttpRequest + Send + Sync + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Register a response observer.
    pub fn observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&ResponseEvent) + Send + Sync + 'static,
    {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Hook invoked once after a 401 to obtain a fresh token.
    pub fn token_refresher<F, Fut>(mut self, refresher: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<String>> + Send + 'static,
    {
        self.token_refresher =
            Some(Arc::new(move || Box::pin(refresher()) as BoxFuture<'static, Option<String>>));
        self
    }

    pub fn build(self) -> AppResult<HttpClient> {
        let mut builder = reqwest::Client::builder().no_proxy();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let inner = builder
            .build()
            .map_err(|err| AppError::unknown("Failed to build HTTP client").with_cause(err))?;

        Ok(HttpClient {
            base_url: self.base_url,
            inner,
            token_provider: self.token_provider,
            interceptors: self.interceptors,
            observers: self.observers,
            token_refresher: self.token_refresher,
        })
    }
}

/// HTTP client with bearer-token injection, interception, and typed errors.
///
/// Cheap to clone; clones share the underlying connection pool and hooks.
#[derive(Clone)]
pub struct HttpClient {
    base_url: String,
    inner: reqwest::Client,
    token_provider: Option<TokenProvider>,
    interceptors: Vec<RequestInterceptor>,
    observers: Vec<ResponseObserver>,
    token_refresher: Option<TokenRefresher>,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("interceptors", &self.interceptors.len())
            .field("observers", &self.observers.len())
            .field("has_token_provider", &self.token_provider.is_some())
            .field("has_token_refresher", &self.token_refresher.is_some())
            .finish()
    }
}

impl HttpClient {
    /// Start building a client rooted at `base_url` (trailing slash ignored).
    /// An empty base URL is valid; request URLs are then used verbatim, so
    /// descriptors can carry absolute URLs.
    pub fn builder(base_url: impl Into<String>) -> HttpClientBuilder {
        HttpClientBuilder::new(base_url)
    }

    /// Base URL all request paths are joined to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> AppResult<HttpResponse<T>> {
        self.request(HttpRequest::get(path)).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> AppResult<HttpResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        self.request(HttpRequest::post(path).json(body)?).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> AppResult<HttpResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        self.request(HttpRequest::put(path).json(body)?).await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> AppResult<HttpResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        self.request(HttpRequest::patch(path).json(body)?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> AppResult<HttpResponse<T>> {
        self.request(HttpRequest::delete(path)).await
    }

    /// Send a request through the full pipeline.
    ///
    /// Interceptors run once, before the first attempt; the refresh resend
    /// reuses the already-intercepted request with the fresh token injected
    /// explicitly.
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn request<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
    ) -> AppResult<HttpResponse<T>> {
        let request = if request.skip_interceptors {
            request
        } else {
            self.interceptors.iter().fold(request, |req, interceptor| interceptor(req))
        };

        let token = self.token_provider.as_ref().and_then(|provider| provider());
        let outcome = self.send_attempt(&request, token.as_deref()).await;

        if request.skip_interceptors {
            return outcome;
        }
        let Some(refresher) = self.token_refresher.as_ref() else {
            return outcome;
        };
        if !matches!(&outcome, Err(error) if error.kind() == ErrorKind::Unauthorized) {
            return outcome;
        }

        debug!("received 401, attempting token refresh");
        match refresher().await {
            Some(fresh) => self.send_attempt(&request, Some(&fresh)).await,
            None => {
                warn!("token refresh yielded no token, keeping original failure");
                outcome
            }
        }
    }

    /// One wire exchange: merge headers, send, observe, classify.
    async fn send_attempt<T: DeserializeOwned>(
        &self,
        request: &HttpRequest,
        token: Option<&str>,
    ) -> AppResult<HttpResponse<T>> {
        let url = format!("{}{}", self.base_url, request.url);
        let headers = merge_headers(request, token)?;

        let mut builder = self.inner.request(request.method.into(), &url).headers(headers);
        if let Some(body) = &request.body {
            let bytes = serde_json::to_vec(body).map_err(|err| {
                AppError::validation("Failed to serialize request body").with_cause(err)
            })?;
            builder = builder.body(bytes);
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(|err| {
            if err.is_builder() {
                AppError::validation("Invalid request").with_cause(err)
            } else {
                AppError::network("Network error").with_cause(err)
            }
        })?;

        let status = response.status().as_u16();
        if !request.skip_interceptors {
            let event = ResponseEvent {
                method: request.method,
                url: request.url.clone(),
                status,
                elapsed: started.elapsed(),
            };
            for observer in &self.observers {
                observer(&event);
            }
        }

        if !response.status().is_success() {
            return Err(classify_status(status));
        }

        let value = read_body(response).await?;
        let data = serde_json::from_value(value).map_err(|err| {
            AppError::unknown("Failed to decode response body").with_cause(err)
        })?;
        Ok(HttpResponse { status, data })
    }
}

/// Build the final header map. Client defaults first, bearer token next,
/// per-request headers last so they win on collision.
fn merge_headers(request: &HttpRequest, token: Option<&str>) -> AppResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|err| AppError::validation("Invalid bearer token").with_cause(err))?;
        headers.insert(AUTHORIZATION, value);
    }

    if let Some(extra) = &request.headers {
        for (name, value) in extra {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                AppError::validation(format!("Invalid header name: {name}")).with_cause(err)
            })?;
            let value = HeaderValue::from_str(value).map_err(|err| {
                AppError::validation(format!("Invalid header value for {name}")).with_cause(err)
            })?;
            headers.insert(name, value);
        }
    }

    Ok(headers)
}

/// Map a non-success status onto the error taxonomy.
fn classify_status(status: u16) -> AppError {
    match status {
        401 => AppError::unauthorized("Unauthorized").with_status(401),
        409 => AppError::conflict("Conflict").with_status(409),
        code => AppError::unknown(format!("Request failed with status {code}")).with_status(code),
    }
}

/// Read the response body as a JSON value. Non-JSON bodies come back as a
/// JSON string; an empty body (204 and friends) decodes as null.
async fn read_body(response: reqwest::Response) -> AppResult<Value> {
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("application/json"));

    let text = response
        .text()
        .await
        .map_err(|err| AppError::network("Network error").with_cause(err))?;

    if text.is_empty() {
        return Ok(Value::Null);
    }
    if !is_json {
        return Ok(Value::String(text));
    }
    serde_json::from_str(&text)
        .map_err(|err| AppError::unknown("Failed to decode response body").with_cause(err))
}
