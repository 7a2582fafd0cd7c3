use std::path::PathBuf;

use http::StatusCode;
use thiserror::Error;

/// How many bytes of a failed response body are kept as diagnostic context.
const BODY_EXCERPT_LEN: usize = 512;

/// Kinds of request errors.
/// Note: The error messages can change over time, so don't match on the output
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The request was canceled through its cancellation token
    #[error("request canceled")]
    Canceled,

    /// Every candidate host was exhausted without a more specific error
    #[error("all requests failed")]
    AllRequestsFailed,

    /// A host accumulated too many consecutive failures
    #[error("backoff limit reached: backoffs {0}")]
    BackoffLimit(usize),

    /// The resource does not exist (HTTP 404), or a response was expected
    /// but none is available
    #[error("not found")]
    NotFound,

    /// The server rejected the credentials (HTTP 401 or 403)
    #[error("unauthorized [http {status}]: {body}")]
    HttpUnauthorized {
        /// Status code returned by the server
        status: StatusCode,
        /// Excerpt of the response body
        body: String,
    },

    /// The server applied rate limiting (HTTP 429)
    #[error("rate limited [http {status}]: {body}")]
    HttpRateLimit {
        /// Status code returned by the server
        status: StatusCode,
        /// Excerpt of the response body
        body: String,
    },

    /// Any other non-2xx response
    #[error("request failed: {status}: {body}")]
    HttpStatus {
        /// Status code returned by the server
        status: StatusCode,
        /// Excerpt of the response body
        body: String,
    },

    /// The host does not support the requested API
    #[error("head requests disabled for host \"{0}\"")]
    UnsupportedApi(String),

    /// The server answered 401 without a usable challenge
    #[error("empty challenge from server")]
    EmptyChallenge,

    /// The server repeated a challenge that was already answered
    #[error("no new challenge from server")]
    NoNewChallenge,

    /// A 401 was received but no authentication handler is configured
    #[error("authentication handler unavailable")]
    AuthUnavailable,

    /// A challenge was accepted and the request will be retried with
    /// fresh credentials
    #[error("authentication required")]
    AuthRequired,

    /// The Content-Length header disagrees with the expected body size
    #[error("unexpected content-length, expected {expected}, received {received}")]
    ContentLengthMismatch {
        /// Size the caller expected
        expected: u64,
        /// Size the server announced
        received: u64,
    },

    /// A range request was answered without a Content-Range header
    #[error("range request not supported by server")]
    MissingContentRange,

    /// A transfer cannot be resumed when the caller supplied its own
    /// Range header
    #[error("unable to resume a connection within a range request")]
    RangeInRange,

    /// Seeking from the end requires a known content length
    #[error("seek from end is not supported without a known length")]
    SeekEndUnsupported,

    /// The seek target lies before the start of the body
    #[error("seek past beginning of the file is not supported")]
    SeekBeforeStart,

    /// Network error while handling the request.
    /// This does not include erroneous status codes; the `Http*` kinds
    /// are used in that case.
    #[error("network error")]
    NetworkRequest(#[source] reqwest::Error),

    /// The HTTP request could not be constructed
    #[error("error building request")]
    BuildRequest(#[source] reqwest::Error),

    /// The network client required for making requests cannot be created
    #[error("error creating request client: {0}")]
    BuildRequestClient(#[source] reqwest::Error),

    /// A certificate in the configured root CA pool cannot be parsed
    #[error("failed to load ca certificate: {0}")]
    InvalidCertificate(String),

    /// A host certificate directory exists but cannot be read
    #[error("cannot read certificate path `{1}`")]
    ReadCertDir(#[source] std::io::Error, PathBuf),

    /// The inline certificate configured for a host cannot be parsed
    #[error("failed to load host specific ca (registry: {hostname}): {reason}")]
    InvalidHostCertificate {
        /// Host the certificate was configured for
        hostname: String,
        /// Parser diagnostic
        reason: String,
    },

    /// The throttle rejected or aborted the acquisition
    #[error("throttle error: {0}")]
    Throttle(String),

    /// A URL could not be constructed for the request
    #[error("cannot parse url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A header value could not be constructed
    #[error("header could not be parsed")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
}

impl ErrorKind {
    /// Whether the engine may keep trying other hosts after this error.
    ///
    /// When a non-retryable error follows an earlier failure, the engine
    /// reports the earlier failure since it describes the true cause.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::UnsupportedApi(_))
    }
}

/// Maps a non-2xx status code to an [`ErrorKind`], attaching an excerpt
/// of the response body as diagnostic context.
#[must_use]
pub fn http_error(status: StatusCode, body: &[u8]) -> ErrorKind {
    let body = body_excerpt(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ErrorKind::HttpUnauthorized { status, body }
        }
        StatusCode::NOT_FOUND => ErrorKind::NotFound,
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::HttpRateLimit { status, body },
        _ => ErrorKind::HttpStatus { status, body },
    }
}

fn body_excerpt(body: &[u8]) -> String {
    let end = body.len().min(BODY_EXCERPT_LEN);
    String::from_utf8_lossy(&body[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_mapping() {
        assert!(matches!(
            http_error(StatusCode::UNAUTHORIZED, b""),
            ErrorKind::HttpUnauthorized { .. }
        ));
        assert!(matches!(
            http_error(StatusCode::FORBIDDEN, b""),
            ErrorKind::HttpUnauthorized { .. }
        ));
        assert!(matches!(
            http_error(StatusCode::NOT_FOUND, b""),
            ErrorKind::NotFound
        ));
        assert!(matches!(
            http_error(StatusCode::TOO_MANY_REQUESTS, b""),
            ErrorKind::HttpRateLimit { .. }
        ));
        assert!(matches!(
            http_error(StatusCode::BAD_GATEWAY, b""),
            ErrorKind::HttpStatus { .. }
        ));
    }

    #[test]
    fn test_body_excerpt_truncates() {
        let long = vec![b'x'; 2048];
        let ErrorKind::HttpStatus { body, .. } = http_error(StatusCode::BAD_GATEWAY, &long) else {
            panic!("expected HttpStatus");
        };
        assert_eq!(body.len(), 512);
    }

    #[test]
    fn test_retryable() {
        assert!(!ErrorKind::UnsupportedApi("example.com".into()).is_retryable());
        assert!(ErrorKind::NotFound.is_retryable());
        assert!(ErrorKind::AllRequestsFailed.is_retryable());
    }
}
