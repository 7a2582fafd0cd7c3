//! Authentication handler contract.
//!
//! Token negotiation itself (parsing `WWW-Authenticate`, fetching Bearer
//! tokens, caching them per scope) lives outside the engine. The engine
//! drives a handler through three calls: register the scopes a request
//! needs, sign the outgoing request, and feed back any 401 challenge so
//! the handler can refresh its state before the retry.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::types::Result;

/// Signs requests for one host and digests its challenges.
///
/// Handlers are shared across requests: the engine keeps one handler per
/// host (or per repository when repository-scoped auth is enabled) and
/// calls it from multiple tasks concurrently.
#[async_trait]
pub trait AuthHandler: Send + Sync {
    /// Records an access scope (e.g. `repository:library/alpine:pull`)
    /// to be requested with the next token.
    fn add_scope(&self, hostname: &str, scope: &str);

    /// Installs the `Authorization` header on an outgoing request.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::HttpUnauthorized`](crate::ErrorKind::HttpUnauthorized)
    /// when the credentials are known to be rejected; any other error is
    /// treated as transient by the engine.
    async fn update_request(&self, request: &mut reqwest::Request) -> Result<()>;

    /// Digests the challenge carried by a 401 response.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::EmptyChallenge`](crate::ErrorKind::EmptyChallenge) when
    /// the response carries no challenge,
    /// [`ErrorKind::NoNewChallenge`](crate::ErrorKind::NoNewChallenge) when
    /// the challenge was already answered, or any other error when the
    /// challenge cannot be processed. On success the engine retries the
    /// same host immediately.
    async fn handle_response(&self, response: &reqwest::Response) -> Result<()>;
}

/// A set of login credentials for a host.
#[derive(Debug, Clone, Default)]
pub struct Credential {
    /// Username for basic auth or token requests
    pub user: Option<String>,
    /// Password or personal access token
    pub password: Option<SecretString>,
    /// Pre-issued identity token
    pub token: Option<SecretString>,
}

/// Callback producing the current credentials for a host.
///
/// Looked up on every token negotiation so rotated credentials are picked
/// up without rebuilding the client.
#[derive(Clone)]
pub struct CredentialSource(Arc<dyn Fn() -> Credential + Send + Sync>);

impl CredentialSource {
    /// Wraps a credential callback.
    pub fn new(get: impl Fn() -> Credential + Send + Sync + 'static) -> Self {
        Self(Arc::new(get))
    }

    /// Fetches the current credentials.
    #[must_use]
    pub fn get(&self) -> Credential {
        (self.0)()
    }
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialSource(..)")
    }
}

/// Everything a handler needs to negotiate tokens for one host: the
/// host's transport (so token requests share its TLS settings), its
/// credentials, and the client identifier sent to token endpoints.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Transport of the host the handler authenticates against
    pub http: reqwest::Client,
    /// Credential lookup for the host
    pub credentials: CredentialSource,
    /// Client identifier (the engine passes its user agent)
    pub client_id: String,
}

/// Constructor for [`AuthHandler`]s, invoked once per host (or per
/// repository with repository-scoped auth).
pub type AuthFactory = Arc<dyn Fn(AuthContext) -> Arc<dyn AuthHandler> + Send + Sync>;
