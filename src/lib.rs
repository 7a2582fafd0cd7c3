//! `registry-http` is a mirror-aware HTTP request engine for container
//! registries: given a logical request against a named registry, it
//! selects among the registry and its configured mirrors, handles
//! authentication challenges, applies per-host rate pacing and
//! concurrency throttling, backs off failing hosts with a shared budget,
//! and exposes the response body as a resumable, seekable reader that
//! transparently retries interrupted transfers over HTTP Range requests.
//!
//! ```no_run
//! use registry_http::{ClientBuilder, Request, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = ClientBuilder::default().client()?;
//!     let mut response = client
//!         .send(
//!             Request::builder()
//!                 .host("registry.example.com")
//!                 .repository("library/alpine")
//!                 .path("manifests/latest")
//!                 .build(),
//!         )
//!         .await?;
//!     let manifest = response.bytes().await?;
//!     println!("{} bytes from {}", manifest.len(), response.mirror());
//!     response.close()?;
//!     Ok(())
//! }
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]
#![allow(clippy::module_name_repetitions)]

#[cfg(test)]
#[macro_use]
pub mod test_utils;

mod auth;
mod client;
mod host;
mod request;
mod response;
mod throttle;
mod tls;
mod types;
mod warning;

#[doc(inline)]
pub use crate::{
    auth::{AuthContext, AuthFactory, AuthHandler, Credential, CredentialSource},
    // Constants get exposed so that callers can use the same defaults as
    // the engine
    client::{
        Client, ClientBuilder, HostConfigSource, DEFAULT_DELAY_INIT, DEFAULT_DELAY_MAX,
        DEFAULT_RETRY_LIMIT, DEFAULT_USER_AGENT,
    },
    host::config::{HostConfig, TlsMode, DEFAULT_REQ_CONCURRENT},
    request::{Request, RequestBody, RequestKind},
    response::Response,
    throttle::{SemaphoreThrottle, Throttle, ThrottleData, ThrottlePermit},
    types::{http_error, ErrorKind, Result},
    warning::WarningHandler,
};
