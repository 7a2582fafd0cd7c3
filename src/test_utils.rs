//! Shared helpers for the in-crate test suites.

use std::collections::HashMap;
use std::sync::Arc;

use crate::client::HostConfigSource;
use crate::host::config::{HostConfig, TlsMode};

#[macro_export]
/// Creates a mock web server, which responds with a predefined status when
/// handling a matching request
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method("GET")).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Host configuration pointing `name` at a mock server, over plain HTTP.
pub(crate) fn host_for(server: &wiremock::MockServer, name: &str) -> HostConfig {
    let mut config = HostConfig::new(name);
    config.hostname = server.address().to_string();
    config.tls = TlsMode::Disabled;
    config
}

/// Host lookup backed by a fixed set of configurations.
pub(crate) fn lookup(configs: Vec<HostConfig>) -> HostConfigSource {
    let map: HashMap<String, HostConfig> = configs
        .into_iter()
        .map(|config| (config.name.clone(), config))
        .collect();
    Arc::new(move |name: &str| map.get(name).cloned())
}
