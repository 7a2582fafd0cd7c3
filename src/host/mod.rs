//! Per-host state.
//!
//! The engine keeps one [`HostState`] per normalized host name, created
//! lazily on first use and kept for the lifetime of the client. It holds
//! the host's transport (TLS-customized when the configuration demands
//! it), its authentication handlers, the request pacer, the failure
//! backoff, and the concurrency throttle.

pub(crate) mod backoff;
pub mod config;
pub(crate) mod mirror;
pub(crate) mod pacer;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::auth::AuthHandler;
use crate::host::backoff::Backoff;
use crate::host::config::HostConfig;
use crate::host::pacer::Pacer;
use crate::throttle::{SemaphoreThrottle, Throttle};
use crate::types::Result;

pub(crate) type BoundAuthFactory = Box<dyn Fn() -> Arc<dyn AuthHandler> + Send + Sync>;

pub(crate) struct HostState {
    pub(crate) config: HostConfig,
    pub(crate) http: reqwest::Client,
    pub(crate) throttle: Arc<dyn Throttle>,
    /// Handlers keyed by repository, or by `""` when repository-scoped
    /// auth is disabled
    auth: Mutex<HashMap<String, Arc<dyn AuthHandler>>>,
    auth_factory: Option<BoundAuthFactory>,
    pacer: Option<Pacer>,
    backoff: Mutex<Backoff>,
}

impl HostState {
    pub(crate) fn new(
        config: HostConfig,
        http: reqwest::Client,
        auth_factory: Option<BoundAuthFactory>,
    ) -> Self {
        let throttle = config
            .throttle
            .clone()
            .unwrap_or_else(|| Arc::new(SemaphoreThrottle::new(config.req_concurrent.max(1))));
        let pacer = (config.req_per_sec > 0.0)
            .then(|| Pacer::new(Duration::from_secs_f64(1.0 / config.req_per_sec)));
        Self {
            config,
            http,
            throttle,
            auth: Mutex::new(HashMap::new()),
            auth_factory,
            pacer,
            backoff: Mutex::new(Backoff::default()),
        }
    }

    /// Returns the authentication handler for a repository, creating it
    /// on first use. Without `repo_auth` all repositories share the
    /// handler stored under the empty key.
    pub(crate) fn get_auth(&self, repository: &str) -> Option<Arc<dyn AuthHandler>> {
        let factory = self.auth_factory.as_ref()?;
        let key = if self.config.repo_auth { repository } else { "" };
        let mut auth = self.auth.lock().unwrap();
        Some(Arc::clone(
            auth.entry(key.to_string()).or_insert_with(|| factory()),
        ))
    }

    pub(crate) async fn pace(&self) {
        if let Some(pacer) = &self.pacer {
            pacer.pace().await;
        }
    }

    pub(crate) fn backoff_until(&self) -> Option<Instant> {
        self.backoff.lock().unwrap().until()
    }

    pub(crate) fn backoff_set(
        &self,
        delay_init: Duration,
        delay_max: Duration,
        retry_limit: usize,
        retry_after: Option<Duration>,
    ) -> Result<()> {
        self.backoff
            .lock()
            .unwrap()
            .set(delay_init, delay_max, retry_limit, retry_after)
    }

    pub(crate) fn backoff_clear(&self, retry_limit: usize) {
        self.backoff.lock().unwrap().clear(retry_limit);
    }

    pub(crate) fn backoff_current(&self) -> usize {
        self.backoff.lock().unwrap().current()
    }
}

impl fmt::Debug for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostState")
            .field("config", &self.config)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}
