//! Request execution and the resumable response body.
//!
//! [`Response`] owns the retry/mirror state machine: every call to
//! [`next_attempt`](Response::next_attempt) walks the candidate hosts
//! (mirrors first, upstream last), acquiring the host throttle, waiting
//! out backoff windows, pacing, signing, sending, and classifying the
//! outcome. Reads from the body may re-enter the same loop to resume an
//! interrupted transfer with an HTTP Range request, invisibly to the
//! caller.

use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, Bytes, BytesMut};
use http::{header, HeaderMap, Method, StatusCode};
use log::{debug, warn};
use url::Url;

use crate::auth::AuthHandler;
use crate::client::Client;
use crate::host::config::{HostConfig, TlsMode};
use crate::host::mirror::sort_candidates;
use crate::host::HostState;
use crate::request::Request;
use crate::throttle::{ThrottleData, ThrottlePermit};
use crate::types::{http_error, ErrorKind, Result};
use crate::warning::forward_warnings;

/// Per-attempt outcome routing: penalize the host, drop it from the
/// candidate list, or retry it immediately.
#[derive(Debug, Default)]
struct AttemptFlags {
    backoff: bool,
    drop_host: bool,
    retry_host: bool,
}

/// The result of a request: a handle on the winning host's HTTP response
/// whose body reads transparently across interrupted transfers.
pub struct Response {
    client: Client,
    request: Request,
    /// Name of the host that served the current response
    mirror: String,
    http: Option<reqwest::Response>,
    /// Unconsumed remainder of the current body chunk
    pending: Bytes,
    read_cur: u64,
    read_max: u64,
    done: bool,
    permit: Option<ThrottlePermit>,
    /// Retry-After of the most recent response, honored by backoff
    last_retry_after: Option<Duration>,
}

impl Response {
    pub(crate) fn new(client: Client, request: Request) -> Self {
        let read_max = request.expect_len;
        Self {
            client,
            request,
            mirror: String::new(),
            http: None,
            pending: Bytes::new(),
            read_cur: 0,
            read_max,
            done: false,
            permit: None,
            last_retry_after: None,
        }
    }

    /// Sends the request to candidate hosts until one responds or all of
    /// them fail.
    pub(crate) async fn next_attempt(&mut self) -> Result<()> {
        let upstream = self.client.get_host(&self.request.host);
        let mut hosts: Vec<Arc<HostState>> =
            Vec::with_capacity(1 + upstream.config.mirrors.len());
        if !self.request.no_mirrors {
            for mirror in &upstream.config.mirrors {
                hosts.push(self.client.get_host(mirror));
            }
        }
        hosts.push(Arc::clone(&upstream));
        sort_candidates(&mut hosts, &upstream.config.name);

        let cancel = self.request.cancel.clone();
        let mut cur = 0;
        let mut prev_err: Option<ErrorKind> = None;
        loop {
            if hosts.is_empty() {
                return Err(prev_err.unwrap_or(ErrorKind::AllRequestsFailed));
            }
            if cur >= hosts.len() {
                cur = 0;
            }
            let host = Arc::clone(&hosts[cur]);
            self.mirror = host.config.name.clone();

            if cancel.is_cancelled() {
                return Err(ErrorKind::Canceled);
            }
            // wait for other concurrent requests to this host
            let data = ThrottleData {
                kind: self.request.kind,
                size: self.request.body.len()
                    + self.request.expect_len
                    + self.request.transact_len,
            };
            let permit = tokio::select! {
                () = cancel.cancelled() => return Err(ErrorKind::Canceled),
                permit = host.throttle.acquire(data) => permit?,
            };

            let mut flags = AttemptFlags::default();
            match self.attempt(&host, &mut flags).await {
                Ok(()) => {
                    self.permit = Some(permit);
                    return Ok(());
                }
                Err(err) => {
                    drop(permit);
                    if flags.backoff {
                        if self.request.ignore_err {
                            // never penalize shared state for errors the
                            // caller asked to ignore
                            flags.drop_host = true;
                        } else if self.host_backoff_set(&host).is_err() {
                            flags.drop_host = true;
                        }
                    }
                    // a non-retryable error aborts with the previous error,
                    // which describes the true cause
                    if prev_err.is_some() && !err.is_retryable() {
                        return Err(prev_err.unwrap());
                    }
                    prev_err = Some(err);
                    if flags.drop_host {
                        hosts.remove(cur);
                    } else if !flags.retry_host {
                        cur += 1;
                    }
                }
            }
        }
    }

    /// One attempt against one host.
    async fn attempt(&mut self, host: &Arc<HostState>, flags: &mut AttemptFlags) -> Result<()> {
        if self.request.method == Method::HEAD && host.config.head_disabled() {
            flags.drop_host = true;
            return Err(ErrorKind::UnsupportedApi(host.config.name.clone()));
        }

        let url = match &self.request.direct_url {
            Some(url) => url.clone(),
            None => build_url(&host.config, &self.request)?,
        };

        // drop any previous response before the new attempt
        self.http = None;
        self.pending = Bytes::new();

        // wait out an active backoff window
        if let Some(until) = host.backoff_until() {
            let now = Instant::now();
            if until > now {
                let sleep = until - now;
                warn!(
                    "sleeping {:.1}s for backoff on host {}",
                    sleep.as_secs_f64(),
                    host.config.name
                );
                tokio::select! {
                    () = self.request.cancel.cancelled() => return Err(ErrorKind::Canceled),
                    () = tokio::time::sleep(sleep) => {}
                }
            }
        }

        let mut builder = host.http.request(self.request.method.clone(), url.clone());
        match self.request.body.for_attempt() {
            Ok(Some((body, len))) => {
                builder = builder.header(header::CONTENT_LENGTH, len).body(body);
            }
            Ok(None) => {}
            Err(e) => {
                flags.drop_host = true;
                return Err(e);
            }
        }

        let mut headers = self.request.headers.clone();
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(header::USER_AGENT, self.client.user_agent_value());
        }
        if self.read_cur > 0 && self.read_max > 0 {
            if headers.contains_key(header::RANGE) {
                flags.drop_host = true;
                return Err(ErrorKind::RangeInRange);
            }
            let range = format!("bytes={}-{}", self.read_cur, self.read_max);
            headers.insert(header::RANGE, range.parse()?);
        }
        let ranged = headers.contains_key(header::RANGE);
        builder = builder.headers(headers);

        let mut http_req = match builder.build() {
            Ok(request) => request,
            Err(e) => {
                flags.drop_host = true;
                return Err(ErrorKind::BuildRequest(e));
            }
        };

        let auth = host.get_auth(&self.request.repository);
        if let Some(auth) = &auth {
            // register docker-style scopes to emulate docker clients
            if !self.request.repository.is_empty() {
                let mut scope = format!("repository:{}:pull", self.request.repository);
                if self.request.method != Method::HEAD && self.request.method != Method::GET {
                    scope.push_str(",push");
                }
                auth.add_scope(&host.config.hostname, &scope);
            }
            if let Err(e) = auth.update_request(&mut http_req).await {
                if matches!(e, ErrorKind::HttpUnauthorized { .. }) {
                    flags.drop_host = true;
                } else {
                    flags.backoff = true;
                }
                return Err(e);
            }
        }

        host.pace().await;

        debug!(
            "http req: url={url} method={} with_auth={}",
            self.request.method,
            http_req.headers().contains_key(header::AUTHORIZATION)
        );
        let response = tokio::select! {
            () = self.request.cancel.cancelled() => return Err(ErrorKind::Canceled),
            result = host.http.execute(http_req) => match result {
                Ok(response) => response,
                Err(e) => {
                    debug!("request failed: url={url} err={e}");
                    flags.backoff = true;
                    return Err(ErrorKind::NetworkRequest(e));
                }
            },
        };

        forward_warnings(response.headers(), self.client.warning_handler());
        self.last_retry_after = parse_retry_after(response.headers());

        let status = response.status();
        if !status.is_success() {
            return Err(classify_failure(&auth, response, &url, flags).await);
        }

        let content_length = parse_content_length(response.headers());
        let has_content_range = response.headers().contains_key(header::CONTENT_RANGE);
        self.http = Some(response);
        self.done = false;
        if self.read_cur == 0 {
            if let Some(received) = content_length {
                if self.read_max > 0 {
                    if self.read_max != received {
                        return Err(ErrorKind::ContentLengthMismatch {
                            expected: self.read_max,
                            received,
                        });
                    }
                } else {
                    self.read_max = received;
                }
            }
        }
        // a range request answered without Content-Range would silently
        // restart from byte zero; never expose that body
        if ranged && !has_content_range {
            flags.drop_host = true;
            self.http = None;
            return Err(ErrorKind::MissingContentRange);
        }
        Ok(())
    }

    /// Reads from the response body.
    ///
    /// `Ok(0)` signals the end of the body. A transfer that breaks off
    /// before the expected length is resumed transparently with a Range
    /// request, re-entering the host selection loop; the caller observes
    /// an uninterrupted byte stream.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotFound`] when no response is available,
    /// [`ErrorKind::Canceled`] on cancellation, or the error of an
    /// unrecoverable transfer interruption.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if self.done {
                return Ok(0);
            }
            if self.http.is_none() {
                return Err(ErrorKind::NotFound);
            }
            if !self.pending.is_empty() {
                let n = buf.len().min(self.pending.len());
                buf[..n].copy_from_slice(&self.pending[..n]);
                self.pending.advance(n);
                self.read_cur += n as u64;
                return Ok(n);
            }

            let cancel = self.request.cancel.clone();
            let chunk = {
                let http = self.http.as_mut().expect("presence checked above");
                tokio::select! {
                    () = cancel.cancelled() => return Err(ErrorKind::Canceled),
                    chunk = http.chunk() => chunk,
                }
            };
            match chunk {
                Ok(Some(bytes)) => {
                    self.pending = bytes;
                }
                end => {
                    if self.request.method == Method::HEAD || self.read_cur >= self.read_max {
                        self.finish();
                        return Ok(0);
                    }
                    // short read; resume from the current offset
                    debug!(
                        "eof before reading all content, retrying: cur={} max={}",
                        self.read_cur, self.read_max
                    );
                    let resumed = match self.backoff_set_current() {
                        Ok(()) => self.next_attempt().await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = resumed {
                        warn!("failed to recover from short read: {e}");
                        self.permit = None;
                        self.done = true;
                        return match end {
                            Ok(_) => Ok(0),
                            Err(interrupt) => Err(ErrorKind::NetworkRequest(interrupt)),
                        };
                    }
                    // resumed; keep serving from the fresh body
                }
            }
        }
    }

    /// Reads the remaining body to its end.
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read).
    pub async fn bytes(&mut self) -> Result<Bytes> {
        let hint = usize::try_from(self.read_max.saturating_sub(self.read_cur)).unwrap_or(0);
        let mut out = BytesMut::with_capacity(hint.min(1 << 20));
        let mut buf = [0u8; 8192];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(out.freeze());
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    /// Moves the read position, re-issuing the request when it changes.
    ///
    /// Seeking from the end requires a known content length. The returned
    /// offset is the new read position.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::SeekEndUnsupported`], [`ErrorKind::SeekBeforeStart`],
    /// or any error of the re-issued request.
    pub async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let new_offset = match pos {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(delta) => {
                let target = i128::from(self.read_cur) + i128::from(delta);
                u64::try_from(target).map_err(|_| ErrorKind::SeekBeforeStart)?
            }
            SeekFrom::End(delta) => {
                if self.read_max == 0 {
                    return Err(ErrorKind::SeekEndUnsupported);
                }
                let target = i128::from(self.read_max) + i128::from(delta);
                u64::try_from(target).map_err(|_| ErrorKind::SeekBeforeStart)?
            }
        };
        if new_offset != self.read_cur {
            self.read_cur = new_offset;
            // rerun the request to restart from the new offset
            self.next_attempt().await?;
        }
        Ok(self.read_cur)
    }

    /// Releases the throttle slot and closes the body. A response closed
    /// before its body completed does not count as a host success.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::NotFound`] when there is no response to close.
    pub fn close(&mut self) -> Result<()> {
        self.permit = None;
        if self.http.is_none() {
            return Err(ErrorKind::NotFound);
        }
        if !self.done {
            self.backoff_clear_current();
        }
        self.done = true;
        self.http = None;
        self.pending = Bytes::new();
        Ok(())
    }

    /// Status of the current HTTP response.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.http.as_ref().map(reqwest::Response::status)
    }

    /// Headers of the current HTTP response.
    #[must_use]
    pub fn headers(&self) -> Option<&HeaderMap> {
        self.http.as_ref().map(reqwest::Response::headers)
    }

    /// The underlying HTTP response, when one is available.
    #[must_use]
    pub fn http_response(&self) -> Option<&reqwest::Response> {
        self.http.as_ref()
    }

    /// Name of the host that served the current response.
    #[must_use]
    pub fn mirror(&self) -> &str {
        &self.mirror
    }

    /// Terminal read bookkeeping: the transfer completed, so the host
    /// recovers one backoff step and the throttle slot is returned.
    fn finish(&mut self) {
        self.backoff_clear_current();
        self.done = true;
        self.permit = None;
    }

    fn host_backoff_set(&self, host: &HostState) -> Result<()> {
        host.backoff_set(
            self.client.delay_init(),
            self.client.delay_max(),
            self.client.retry_limit(),
            self.last_retry_after,
        )
    }

    fn backoff_set_current(&self) -> Result<()> {
        match self.client.host_named(&self.mirror) {
            Some(host) => self.host_backoff_set(&host),
            None => Ok(()),
        }
    }

    fn backoff_clear_current(&self) {
        if let Some(host) = self.client.host_named(&self.mirror) {
            host.backoff_clear(self.client.retry_limit());
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("mirror", &self.mirror)
            .field("status", &self.status())
            .field("read_cur", &self.read_cur)
            .field("read_max", &self.read_max)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

/// Assembles the request URL for one host:
/// `<scheme>://<hostname>/v2[/prefix][/repository]/<path>?<query>`.
fn build_url(config: &HostConfig, request: &Request) -> Result<Url> {
    let scheme = if config.tls == TlsMode::Disabled {
        "http"
    } else {
        "https"
    };
    let mut url = Url::parse(&format!("{scheme}://{}", config.hostname))?;
    let mut path = String::from("/v2");
    if !config.path_prefix.is_empty() && !request.no_prefix {
        path.push('/');
        path.push_str(&config.path_prefix);
    }
    if !request.repository.is_empty() {
        path.push('/');
        path.push_str(&request.repository);
    }
    path.push('/');
    path.push_str(&request.path);
    url.set_path(&path);
    if !request.query.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(request.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }
    Ok(url)
}

/// Routes a non-2xx response: auth challenges retry the same host,
/// missing content drops the mirror, overload statuses back off, and
/// everything else does both.
async fn classify_failure(
    auth: &Option<Arc<dyn AuthHandler>>,
    response: reqwest::Response,
    url: &Url,
    flags: &mut AttemptFlags,
) -> ErrorKind {
    let status = response.status();
    match status {
        StatusCode::UNAUTHORIZED => {
            let handled = match auth {
                Some(auth) => auth.handle_response(&response).await,
                None => Err(ErrorKind::AuthUnavailable),
            };
            match handled {
                Ok(()) => {
                    flags.retry_host = true;
                    ErrorKind::AuthRequired
                }
                Err(e) => {
                    match &e {
                        ErrorKind::EmptyChallenge
                        | ErrorKind::NoNewChallenge
                        | ErrorKind::HttpUnauthorized { .. } => {
                            debug!("failed to handle auth request: url={url} err={e}");
                        }
                        _ => warn!("failed to handle auth request: url={url} err={e}"),
                    }
                    flags.drop_host = true;
                    e
                }
            }
        }
        StatusCode::NOT_FOUND | StatusCode::RANGE_NOT_SATISFIABLE => {
            // drop the mirror for this request; other requests to the
            // host need no backoff
            flags.drop_host = true;
            failure_error(status, response, url).await
        }
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::GATEWAY_TIMEOUT
        | StatusCode::INTERNAL_SERVER_ERROR => {
            // server is likely overloaded, back off but still retry
            flags.backoff = true;
            failure_error(status, response, url).await
        }
        _ => {
            flags.backoff = true;
            flags.drop_host = true;
            failure_error(status, response, url).await
        }
    }
}

/// Reads the body of a failed response for diagnostics and maps the
/// status to an error kind.
async fn failure_error(status: StatusCode, response: reqwest::Response, url: &Url) -> ErrorKind {
    debug!("request failed: url={url} status={status}");
    let body = response.bytes().await.unwrap_or_default();
    http_error(status, &body)
}

fn parse_content_length(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(header::CONTENT_LENGTH)?;
    let text = value.to_str().ok()?;
    match text.trim().parse() {
        Ok(length) => Some(length),
        Err(e) => {
            debug!("failed to parse content-length header {text:?}: {e}");
            None
        }
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(header::RETRY_AFTER)?;
    let seconds: u64 = value.to_str().ok()?.trim().parse().ok()?;
    Some(Duration::from_secs(seconds))
}
