//! Resilient HTTP client for talking to JSON APIs.
//!
//! [`HttpClient`] wraps [`reqwest`] with the policies a backend-facing client
//! needs but a bare transport does not provide:
//!
//! - every failure is mapped into the closed `AppError` taxonomy from
//!   `breakwater-common` (401 -> Unauthorized, 409 -> Conflict, transport
//!   failures -> Network, other non-success -> Unknown);
//! - a token provider injects the bearer token and a 401 triggers at most
//!   one token refresh and resend;
//! - request interceptors and response observers give callers a seam for
//!   cross-cutting concerns without touching call sites.
//!
//! Retry and circuit breaking compose around [`HttpClient::request`] using
//! the decorators in `breakwater-common`; see that crate's `resilience`
//! module.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod client;
pub mod request;

pub use breakwater_common::{AppError, AppResult, ErrorKind};
pub use client::{
    HttpClient, HttpClientBuilder, RequestInterceptor, ResponseEvent, ResponseObserver,
    TokenProvider, TokenRefresher,
};
pub use request::{HttpMethod, HttpRequest, HttpResponse};
