//! Forwarding of registry `Warning` headers.
//!
//! Registries surface operational notices (deprecations, upcoming rate
//! limit changes) through `Warning: 299 - "<text>"` headers. Matching
//! values are handed to the configured sink, or logged when none is set.

use std::sync::{Arc, LazyLock};

use http::header::WARNING;
use http::HeaderMap;
use regex::Regex;

static WARNING_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^299\s+-\s+"([^"]+)""#).expect("valid warning pattern"));

/// Callback receiving the text of each registry warning.
pub type WarningHandler = Arc<dyn Fn(&str) + Send + Sync>;

pub(crate) fn forward_warnings(headers: &HeaderMap, handler: Option<&WarningHandler>) {
    for value in headers.get_all(WARNING) {
        let Ok(text) = value.to_str() else { continue };
        let Some(captures) = WARNING_PATTERN.captures(text) else {
            continue;
        };
        let message = &captures[1];
        match handler {
            Some(handler) => handler(message),
            None => log::warn!("registry warning: {message}"),
        }
    }
}
