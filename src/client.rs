//! Handler of registry request operations.
//!
//! This module defines two structs, [`Client`] and [`ClientBuilder`].
//! `Client` resolves a logical request against a named registry into a
//! series of HTTP attempts across the registry and its mirrors, and
//! returns a [`Response`] whose body can be read, resumed, and sought.
//! `ClientBuilder` exposes the configuration knobs for building a
//! `Client`.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::header::HeaderValue;
use log::warn;
use typed_builder::TypedBuilder;

use crate::auth::{AuthContext, AuthFactory, Credential, CredentialSource};
use crate::host::config::{HostConfig, TlsMode};
use crate::host::{BoundAuthFactory, HostState};
use crate::request::Request;
use crate::response::Response;
use crate::tls::{client_identity, make_root_certs};
use crate::types::{ErrorKind, Result};
use crate::warning::WarningHandler;

/// Default number of failures a host accumulates before it is dropped, 3.
pub const DEFAULT_RETRY_LIMIT: usize = 3;
/// Default initial delay between retries, 1 second (doubled per failure).
pub const DEFAULT_DELAY_INIT: Duration = Duration::from_secs(1);
/// Default upper bound for the retry delay, 30 seconds.
pub const DEFAULT_DELAY_MAX: Duration = Duration::from_secs(30);
/// Default user agent, `registry-http/<PKG_VERSION>`.
pub const DEFAULT_USER_AGENT: &str = concat!("registry-http/", env!("CARGO_PKG_VERSION"));

/// Callback resolving a registry name to its configuration. Returning
/// `None` makes the engine synthesize a default configuration from the
/// name.
pub type HostConfigSource = Arc<dyn Fn(&str) -> Option<HostConfig> + Send + Sync>;

/// Builder for [`Client`].
///
/// See crate-level documentation for a usage example.
#[derive(TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
pub struct ClientBuilder {
    /// Root CA certificates as raw PEM blocks, added to every host's
    /// trust pool.
    certs: Vec<Vec<u8>>,
    /// Directories checked for host-specific certificates: every
    /// `<dir>/<hostname>/*.crt` file is added to that host's trust pool.
    cert_dirs: Vec<PathBuf>,
    /// Root CA certificates by file name, read at build time. Unreadable
    /// files are logged and skipped.
    cert_files: Vec<PathBuf>,
    /// Initial delay between retries, doubled with each failure of a
    /// host.
    delay_init: Option<Duration>,
    /// Upper bound for the retry delay. Defaults to 30 times the initial
    /// delay and is never smaller than it.
    delay_max: Option<Duration>,
    /// Failures a host may accumulate before it is dropped from the
    /// candidate list.
    #[builder(default = DEFAULT_RETRY_LIMIT)]
    retry_limit: usize,
    /// User agent sent when the request does not carry one.
    #[builder(default_code = "String::from(DEFAULT_USER_AGENT)")]
    user_agent: String,
    /// Response timeout per request attempt.
    timeout: Option<Duration>,
    /// Host configuration lookup.
    host_config: Option<HostConfigSource>,
    /// Constructor for per-host authentication handlers. Without one,
    /// 401 responses drop the host instead of triggering a challenge
    /// round-trip.
    auth_factory: Option<AuthFactory>,
    /// Sink for registry `Warning` headers; defaults to the log.
    warning_handler: Option<WarningHandler>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("cert_dirs", &self.cert_dirs)
            .field("cert_files", &self.cert_files)
            .field("delay_init", &self.delay_init)
            .field("delay_max", &self.delay_max)
            .field("retry_limit", &self.retry_limit)
            .field("user_agent", &self.user_agent)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ClientBuilder {
    /// Instantiates a [`Client`].
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the user agent is not a valid header value or
    /// the underlying request client cannot be created.
    pub fn client(self) -> Result<Client> {
        let mut certs = self.certs;
        for file in &self.cert_files {
            match std::fs::read(file) {
                Ok(pem) => certs.push(pem),
                Err(e) => warn!("failed to read certificate file {}: {e}", file.display()),
            }
        }

        let delay_init = self.delay_init.unwrap_or(DEFAULT_DELAY_INIT);
        let delay_max = match self.delay_max {
            Some(max) if max > delay_init => max,
            Some(_) => delay_init,
            None => delay_init.saturating_mul(30),
        };

        let user_agent_value =
            HeaderValue::from_str(&self.user_agent).map_err(ErrorKind::InvalidHeader)?;

        let mut builder = reqwest::Client::builder().use_rustls_tls();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(ErrorKind::BuildRequestClient)?;

        Ok(Client {
            inner: Arc::new(ClientInner {
                http,
                hosts: Mutex::new(HashMap::new()),
                root_ca_pems: certs,
                cert_dirs: self.cert_dirs,
                retry_limit: self.retry_limit,
                delay_init,
                delay_max,
                user_agent: self.user_agent,
                user_agent_value,
                timeout: self.timeout,
                host_config: self.host_config,
                auth_factory: self.auth_factory,
                warning_handler: self.warning_handler,
            }),
        })
    }
}

/// Sends logical requests to registries, handling mirrors, retries,
/// backoff delays, rate pacing, authentication, and TLS settings.
///
/// Cloning is cheap; all clones share the per-host state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    /// Template transport, shared by hosts without TLS customization
    http: reqwest::Client,
    /// Host state keyed by normalized name, created lazily
    hosts: Mutex<HashMap<String, Arc<HostState>>>,
    root_ca_pems: Vec<Vec<u8>>,
    cert_dirs: Vec<PathBuf>,
    retry_limit: usize,
    delay_init: Duration,
    delay_max: Duration,
    user_agent: String,
    user_agent_value: HeaderValue,
    timeout: Option<Duration>,
    host_config: Option<HostConfigSource>,
    auth_factory: Option<AuthFactory>,
    warning_handler: Option<WarningHandler>,
}

impl Client {
    /// Runs a request, returning the response of the first attempt that
    /// succeeded on the registry or one of its mirrors.
    ///
    /// # Errors
    ///
    /// Returns the classified error of the last failing attempt once all
    /// candidate hosts are exhausted, [`ErrorKind::Canceled`] when the
    /// request's cancellation token fires, or
    /// [`ErrorKind::AllRequestsFailed`] when no attempt produced a more
    /// specific error.
    pub async fn send(&self, request: Request) -> Result<Response> {
        let mut response = Response::new(self.clone(), request);
        response.next_attempt().await?;
        Ok(response)
    }

    /// Returns the state for a host, materializing it on first use.
    pub(crate) fn get_host(&self, name: &str) -> Arc<HostState> {
        let mut hosts = self.inner.hosts.lock().unwrap();
        if let Some(host) = hosts.get(name) {
            return Arc::clone(host);
        }

        let config = self
            .inner
            .host_config
            .as_ref()
            .and_then(|lookup| lookup(name))
            .unwrap_or_else(|| HostConfig::new(name));

        // the lookup may normalize the name; re-check the map under the
        // canonical key before building new state
        let key = config.name.clone();
        if key != name {
            if let Some(host) = hosts.get(&key) {
                return Arc::clone(host);
            }
        }

        let http = self.host_transport(&config);
        let auth_factory = self.bind_auth_factory(&config, &http);
        let host = Arc::new(HostState::new(config, http, auth_factory));
        hosts.insert(key, Arc::clone(&host));
        host
    }

    /// Returns the state for a host only if it already exists.
    pub(crate) fn host_named(&self, name: &str) -> Option<Arc<HostState>> {
        self.inner.hosts.lock().unwrap().get(name).cloned()
    }

    /// Builds the transport for one host. Hosts without TLS customization
    /// share the template client; otherwise a dedicated client carries
    /// the composed trust pool, insecure mode, and client identity.
    /// Assembly failures are logged and skipped so the request can still
    /// proceed.
    fn host_transport(&self, config: &HostConfig) -> reqwest::Client {
        let inner = &self.inner;
        let needs_custom = config.tls == TlsMode::Insecure
            || !inner.root_ca_pems.is_empty()
            || !inner.cert_dirs.is_empty()
            || !config.reg_cert.is_empty()
            || config.has_client_pair();
        if !needs_custom {
            return inner.http.clone();
        }

        let mut builder = reqwest::Client::builder().use_rustls_tls();
        if let Some(timeout) = inner.timeout {
            builder = builder.timeout(timeout);
        }
        if config.tls == TlsMode::Insecure {
            builder = builder.danger_accept_invalid_certs(true);
        } else {
            match make_root_certs(
                &inner.root_ca_pems,
                &inner.cert_dirs,
                &config.hostname,
                &config.reg_cert,
            ) {
                Ok(certs) => {
                    for cert in certs {
                        builder = builder.add_root_certificate(cert);
                    }
                }
                Err(e) => warn!("failed to setup ca pool for {}: {e}", config.name),
            }
        }
        if config.has_client_pair() {
            match client_identity(&config.client_cert, &config.client_key) {
                Ok(identity) => builder = builder.identity(identity),
                Err(e) => warn!("failed to configure client certs for {}: {e}", config.name),
            }
        }
        match builder.build() {
            Ok(client) => client,
            Err(e) => {
                warn!("failed to build transport for {}: {e}", config.name);
                inner.http.clone()
            }
        }
    }

    /// Binds the client's auth factory to one host: its transport, its
    /// credentials, and the user agent as client ID.
    fn bind_auth_factory(
        &self,
        config: &HostConfig,
        http: &reqwest::Client,
    ) -> Option<BoundAuthFactory> {
        let factory = Arc::clone(self.inner.auth_factory.as_ref()?);
        let http = http.clone();
        let credentials = credential_source(config);
        let client_id = self.inner.user_agent.clone();
        Some(Box::new(move || {
            factory(AuthContext {
                http: http.clone(),
                credentials: credentials.clone(),
                client_id: client_id.clone(),
            })
        }))
    }

    pub(crate) fn retry_limit(&self) -> usize {
        self.inner.retry_limit
    }

    pub(crate) fn delay_init(&self) -> Duration {
        self.inner.delay_init
    }

    pub(crate) fn delay_max(&self) -> Duration {
        self.inner.delay_max
    }

    pub(crate) fn user_agent_value(&self) -> HeaderValue {
        self.inner.user_agent_value.clone()
    }

    pub(crate) fn warning_handler(&self) -> Option<&WarningHandler> {
        self.inner.warning_handler.as_ref()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("retry_limit", &self.inner.retry_limit)
            .field("delay_init", &self.inner.delay_init)
            .field("delay_max", &self.inner.delay_max)
            .field("user_agent", &self.inner.user_agent)
            .finish_non_exhaustive()
    }
}

fn credential_source(config: &HostConfig) -> CredentialSource {
    if let Some(source) = &config.credentials {
        return source.clone();
    }
    let user = config.user.clone();
    let pass = config.pass.clone();
    let token = config.token.clone();
    CredentialSource::new(move || Credential {
        user: user.clone(),
        password: pass.clone(),
        token: token.clone(),
    })
}
