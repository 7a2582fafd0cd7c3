use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use secrecy::SecretString;
use serde::Deserialize;

use crate::auth::CredentialSource;
use crate::throttle::Throttle;

/// Default number of concurrent requests admitted per host.
pub const DEFAULT_REQ_CONCURRENT: usize = 3;

/// TLS behavior for a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Verified TLS (the default)
    #[default]
    Enabled,
    /// TLS without certificate verification
    Insecure,
    /// Plain HTTP
    Disabled,
}

/// Configuration of a single registry host, as provided by the host
/// lookup callback.
///
/// `name` is the canonical (normalized) name the engine keys its state
/// by; `hostname` is what actually goes on the wire and may carry a
/// port. Fields that cannot be represented in serialized configuration
/// (the throttle and the credential callback) are skipped by serde and
/// can be attached programmatically.
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    /// Canonical name of the host
    pub name: String,
    /// Hostname (and optional port) requests are sent to
    pub hostname: String,
    /// TLS mode
    pub tls: TlsMode,
    /// Names of mirrors serving the same content, tried before this host
    pub mirrors: Vec<String>,
    /// Mirror preference; lower sorts first
    pub priority: u32,
    /// Maximum request rate; `0` disables pacing
    pub req_per_sec: f64,
    /// Concurrent request limit for the default throttle
    pub req_concurrent: usize,
    /// Path inserted between `/v2` and the repository, for registries
    /// mounted under a sub-path
    pub path_prefix: String,
    /// Keep a separate authentication handler per repository
    pub repo_auth: bool,
    /// API quirks, e.g. `disableHead`
    pub api_opts: HashMap<String, String>,
    /// Inline PEM root certificate for this host
    pub reg_cert: String,
    /// Client certificate (PEM) for mutual TLS
    pub client_cert: String,
    /// Client key (PEM) for mutual TLS
    pub client_key: String,
    /// Username for authentication
    pub user: Option<String>,
    /// Password for authentication
    pub pass: Option<SecretString>,
    /// Pre-issued identity token
    pub token: Option<SecretString>,
    /// Concurrency limiter override; the engine builds a semaphore from
    /// `req_concurrent` when unset
    #[serde(skip)]
    pub throttle: Option<Arc<dyn Throttle>>,
    /// Credential lookup override; the engine reads `user`/`pass`/`token`
    /// when unset
    #[serde(skip)]
    pub credentials: Option<CredentialSource>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            hostname: String::new(),
            tls: TlsMode::default(),
            mirrors: Vec::new(),
            priority: 0,
            req_per_sec: 0.0,
            req_concurrent: DEFAULT_REQ_CONCURRENT,
            path_prefix: String::new(),
            repo_auth: false,
            api_opts: HashMap::new(),
            reg_cert: String::new(),
            client_cert: String::new(),
            client_key: String::new(),
            user: None,
            pass: None,
            token: None,
            throttle: None,
            credentials: None,
        }
    }
}

impl HostConfig {
    /// Synthesizes a configuration for a host the lookup knows nothing
    /// about: the name doubles as the hostname, everything else is
    /// defaults.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            hostname: name.to_string(),
            ..Self::default()
        }
    }

    /// Whether HEAD requests are disabled through `api_opts`.
    #[must_use]
    pub fn head_disabled(&self) -> bool {
        self.api_opts
            .get("disableHead")
            .is_some_and(|value| parse_bool(value) == Some(true))
    }

    pub(crate) fn has_client_pair(&self) -> bool {
        !self.client_cert.is_empty() && !self.client_key.is_empty()
    }
}

impl fmt::Debug for HostConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostConfig")
            .field("name", &self.name)
            .field("hostname", &self.hostname)
            .field("tls", &self.tls)
            .field("mirrors", &self.mirrors)
            .field("priority", &self.priority)
            .field("req_per_sec", &self.req_per_sec)
            .field("req_concurrent", &self.req_concurrent)
            .field("path_prefix", &self.path_prefix)
            .field("repo_auth", &self.repo_auth)
            .field("api_opts", &self.api_opts)
            .finish_non_exhaustive()
    }
}

/// Lenient boolean parsing for `api_opts` values.
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
