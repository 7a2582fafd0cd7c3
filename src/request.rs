//! Logical requests against a named registry.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, Method};
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;
use url::Url;

use crate::types::Result;

/// What a request is for; a hint for priority-aware throttles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum RequestKind {
    /// Unclassified request
    #[default]
    Unknown,
    /// Existence probe
    Head,
    /// Listing or small metadata query
    Query,
    /// Manifest read or write
    Manifest,
    /// Blob transfer
    Blob,
}

/// The body of an outgoing request.
///
/// A request may be sent several times (mirror failover, auth retries,
/// resumption), so the body must be restartable: either a byte buffer or
/// a factory producing a fresh stream per attempt. One-shot streams are
/// deliberately not representable.
#[derive(Clone, Default)]
pub enum RequestBody {
    /// No body
    #[default]
    Empty,
    /// An in-memory body, restartable by cloning
    Bytes(Bytes),
    /// A streaming body with a known length
    Stream {
        /// Content length sent with the request
        len: u64,
        /// Called once per attempt to produce a fresh stream
        factory: Arc<dyn Fn() -> Result<reqwest::Body> + Send + Sync>,
    },
}

impl RequestBody {
    /// Length of the body in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::Stream { len, .. } => *len,
        }
    }

    /// Whether there is no body to send.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty) || self.len() == 0
    }

    /// Produces the body for one attempt.
    pub(crate) fn for_attempt(&self) -> Result<Option<(reqwest::Body, u64)>> {
        match self {
            Self::Empty => Ok(None),
            Self::Bytes(bytes) => Ok(Some((
                reqwest::Body::from(bytes.clone()),
                bytes.len() as u64,
            ))),
            Self::Stream { len, factory } => Ok(Some((factory()?, *len))),
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream { len, .. } => f.debug_struct("Stream").field("len", len).finish(),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes.into())
    }
}

/// A request to send to a registry.
///
/// The `host` names a configured registry; its mirrors are looked up from
/// the host configuration. The request URL is assembled as
/// `<scheme>://<hostname>/v2[/prefix][/repository]/<path>?<query>`
/// unless `direct_url` overrides it.
///
/// ```no_run
/// use registry_http::{Request, RequestKind};
///
/// let request = Request::builder()
///     .kind(RequestKind::Manifest)
///     .host("registry.example.com")
///     .repository("library/alpine")
///     .path("manifests/latest")
///     .build();
/// ```
#[derive(Debug, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
pub struct Request {
    /// Kind of request, forwarded to the throttle
    pub kind: RequestKind,
    /// Registry name; hostname and mirrors come from host configuration
    #[builder(!default)]
    pub host: String,
    /// HTTP method
    #[builder(default = Method::GET)]
    pub method: Method,
    /// Fully formed URL, overriding repository, path, and query
    pub direct_url: Option<Url>,
    /// Repository to scope the request (and its auth token)
    pub repository: String,
    /// Path of the request within the repository
    pub path: String,
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// Request body
    pub body: RequestBody,
    /// Additional headers
    pub headers: HeaderMap,
    /// Expected size of the response body; enables resumption
    pub expect_len: u64,
    /// Size of the overall transaction, forwarded to the throttle
    pub transact_len: u64,
    /// Do not insert the host's path prefix
    pub no_prefix: bool,
    /// Do not send the request to a mirror
    pub no_mirrors: bool,
    /// Do not let failures of this request trigger host backoffs
    pub ignore_err: bool,
    /// Cancels the request at any blocking point
    pub cancel: CancellationToken,
}
