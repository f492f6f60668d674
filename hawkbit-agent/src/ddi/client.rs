//! HTTP client for the DDI endpoints.
//!
//! REST traffic and bundle downloads against hawkBit, with the retry and
//! resume behavior the protocol layer relies on:
//!
//! - 200 is the sole REST success code; 409/429 are retried with a fixed
//!   1 s spacing, all other statuses surface to the caller.
//! - Binary downloads accept 200 (full body), 206 (resumed) and 416 (range
//!   not satisfiable, treated as end-of-file when resuming).
//! - Transfers slower than `low_speed_rate` bytes/s over a `low_speed_time`
//!   window are aborted.

use futures::StreamExt;
use reqwest::header;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::feedback::Feedback;
use super::types::{BaseResource, CancelResource, DeploymentBase};
use super::DdiApi;
use crate::config::{AgentConfig, AuthMethod};

/// User agent sent on every request.
const USER_AGENT: &str = "rauc-hawkbit-c-agent/1.0";
/// Maximum retries for HTTP 409/429 responses.
const CONFLICT_RETRY_LIMIT: u32 = 10;
/// Delay between 409/429 retries.
const CONFLICT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Classified transport failure kinds.
///
/// The resumable subset mirrors the transfer errors a partial download can
/// recover from; everything else aborts the download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Resolve,
    Connect,
    PartialFile,
    Send,
    Recv,
    Http2Framing,
    Http2Stream,
    Tls,
    LowSpeed,
    Other,
}

impl TransportErrorKind {
    /// Whether a download interrupted by this error may be resumed.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            TransportErrorKind::Timeout
                | TransportErrorKind::Resolve
                | TransportErrorKind::Connect
                | TransportErrorKind::PartialFile
                | TransportErrorKind::Send
                | TransportErrorKind::Recv
                | TransportErrorKind::Http2Framing
                | TransportErrorKind::Http2Stream
        )
    }
}

/// A transport-level failure with its classified kind.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_resumable(&self) -> bool {
        self.kind.is_resumable()
    }
}

/// Errors returned by the DDI client.
#[derive(Debug, Error)]
pub enum DdiError {
    /// Connection-level failure (carrying the classified kind)
    #[error("HTTP request failed: {0}")]
    Transport(TransportError),

    /// Non-success HTTP status
    #[error("HTTP request failed with status {0}")]
    Http(u16),

    /// Response body could not be parsed
    #[error("failed to parse JSON response body: {0}")]
    Json(#[from] serde_json::Error),

    /// Local file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DdiError {
    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            DdiError::Http(status) => Some(*status),
            _ => None,
        }
    }
}

/// Result of a completed binary download.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    /// Average transfer speed in bytes per second (0 for an empty transfer)
    pub bytes_per_sec: f64,
    /// Lowercase hex sha1 of the whole destination file, when requested
    pub sha1: Option<String>,
}

/// Authenticated HTTP client for one hawkBit controller.
pub struct DdiClient {
    http: reqwest::Client,
    base_url: String,
    tenant: String,
    controller_id: String,
    auth_header: Option<String>,
    send_download_authentication: bool,
    request_timeout: Duration,
    low_speed_time: Duration,
    low_speed_rate: u64,
}

impl DdiClient {
    /// Build a client from the agent configuration.
    ///
    /// Reads the client key/cert when certificate authentication is
    /// configured, so this can fail with an I/O error.
    pub fn from_config(config: &AgentConfig) -> Result<Self, DdiError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.connect_timeout())
            .tcp_keepalive(Duration::from_secs(30));

        if !config.ssl_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let AuthMethod::ClientCert { key, cert, engine } = &config.auth {
            if let Some(engine) = engine {
                warn!(
                    "ssl_engine '{}' configured, but engines are not supported \
                     by the TLS backend; using the key file directly",
                    engine
                );
            }
            let cert_pem = std::fs::read(cert)?;
            let key_pem = std::fs::read(key)?;
            let identity = reqwest::Identity::from_pkcs8_pem(&cert_pem, &key_pem)
                .map_err(|e| DdiError::Transport(classify(&e)))?;
            builder = builder.identity(identity);
        }

        let http = builder
            .build()
            .map_err(|e| DdiError::Transport(classify(&e)))?;

        let scheme = if config.ssl { "https" } else { "http" };

        Ok(Self {
            http,
            base_url: format!("{}://{}", scheme, config.hawkbit_server),
            tenant: config.tenant_id.clone(),
            controller_id: config.controller_id.clone(),
            auth_header: config.auth.header_value(),
            send_download_authentication: config.send_download_authentication,
            request_timeout: config.request_timeout(),
            low_speed_time: Duration::from_secs(config.low_speed_time),
            low_speed_rate: config.low_speed_rate,
        })
    }

    /// Build `{scheme}://{host}/{tenant}/controller/v1/{controllerId}[/{suffix}]`.
    pub fn controller_url(&self, suffix: Option<&str>) -> String {
        let base = format!(
            "{}/{}/controller/v1/{}",
            self.base_url, self.tenant, self.controller_id
        );
        match suffix {
            Some(suffix) => format!("{base}/{suffix}"),
            None => base,
        }
    }

    /// Perform a REST request against a DDI endpoint.
    ///
    /// Returns the parsed response body, or `None` for an empty body.
    async fn rest(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>, DdiError> {
        let mut attempts = 0u32;
        loop {
            let mut request = self
                .http
                .request(method.clone(), url)
                .timeout(self.request_timeout)
                .header(header::ACCEPT, "application/json;charset=UTF-8");
            if let Some(auth) = &self.auth_header {
                request = request.header(header::AUTHORIZATION, auth);
            }
            if let Some(body) = body {
                request = request
                    .header(header::CONTENT_TYPE, "application/json;charset=UTF-8")
                    .body(serde_json::to_vec(body)?);
            }

            let response = request
                .send()
                .await
                .map_err(|e| DdiError::Transport(classify(&e)))?;
            let status = response.status();

            if status == StatusCode::CONFLICT || status == StatusCode::TOO_MANY_REQUESTS {
                attempts += 1;
                if attempts <= CONFLICT_RETRY_LIMIT {
                    debug!(status = status.as_u16(), url, "retrying REST request");
                    tokio::time::sleep(CONFLICT_RETRY_DELAY).await;
                    continue;
                }
                return Err(DdiError::Http(status.as_u16()));
            }
            if status != StatusCode::OK {
                return Err(DdiError::Http(status.as_u16()));
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| DdiError::Transport(classify(&e)))?;
            if bytes.is_empty() {
                return Ok(None);
            }
            return Ok(Some(serde_json::from_slice(&bytes)?));
        }
    }

    async fn rest_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> Result<T, DdiError> {
        let value = self.rest(method, url, body).await?.unwrap_or(Value::Null);
        Ok(serde_json::from_value(value)?)
    }

    /// Stream a binary artifact to `dest`.
    ///
    /// With `resume_from > 0` a `Range` request is issued and the file is
    /// appended; 416 means the file already covers the range and counts as
    /// success with no bytes transferred. The sha1, when requested, is
    /// always computed over the whole destination file afterwards, never
    /// incrementally across a resume.
    async fn download_binary(
        &self,
        url: &str,
        dest: &Path,
        resume_from: u64,
        compute_sha1: bool,
    ) -> Result<DownloadOutcome, DdiError> {
        let mut request = self
            .http
            .get(url)
            .header(header::ACCEPT, "application/octet-stream");
        if self.send_download_authentication {
            if let Some(auth) = &self.auth_header {
                request = request.header(header::AUTHORIZATION, auth);
            }
        }
        if resume_from > 0 {
            request = request.header(header::RANGE, format!("bytes={resume_from}-"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| DdiError::Transport(classify(&e)))?;

        let append = match response.status().as_u16() {
            200 => false,
            206 => true,
            // the partial file already covers the full artifact
            416 => {
                return finalize_download(dest, 0, Duration::ZERO, compute_sha1).await;
            }
            status => return Err(DdiError::Http(status)),
        };

        let expected = response.content_length();
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(dest)
            .await?;

        let started = Instant::now();
        let mut written: u64 = 0;
        let mut window_started = Instant::now();
        let mut window_bytes: u64 = 0;
        let low_speed_enabled = !self.low_speed_time.is_zero();
        let stall_limit = if low_speed_enabled {
            self.low_speed_time
        } else {
            Duration::from_secs(24 * 3600)
        };

        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::time::timeout(stall_limit, stream.next())
                .await
                .map_err(|_| {
                    DdiError::Transport(TransportError::new(
                        TransportErrorKind::Timeout,
                        format!("transfer stalled for {} seconds", stall_limit.as_secs()),
                    ))
                })?;
            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Err(DdiError::Transport(classify(&e))),
                None => break,
            };

            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            window_bytes += chunk.len() as u64;

            if low_speed_enabled && window_started.elapsed() >= self.low_speed_time {
                let elapsed = window_started.elapsed().as_secs_f64();
                let rate = window_bytes as f64 / elapsed;
                if rate < self.low_speed_rate as f64 {
                    return Err(DdiError::Transport(TransportError::new(
                        TransportErrorKind::LowSpeed,
                        format!(
                            "transfer rate {:.0} bytes/s below limit of {} bytes/s",
                            rate, self.low_speed_rate
                        ),
                    )));
                }
                window_started = Instant::now();
                window_bytes = 0;
            }
        }
        file.flush().await?;
        drop(file);

        if let Some(expected) = expected {
            if written < expected {
                return Err(DdiError::Transport(TransportError::new(
                    TransportErrorKind::PartialFile,
                    format!("transfer closed after {written} of {expected} bytes"),
                )));
            }
        }

        finalize_download(dest, written, started.elapsed(), compute_sha1).await
    }
}

/// Compute the outcome of a finished transfer, hashing the file if asked.
async fn finalize_download(
    dest: &Path,
    written: u64,
    elapsed: Duration,
    compute_sha1: bool,
) -> Result<DownloadOutcome, DdiError> {
    let sha1 = if compute_sha1 {
        Some(file_sha1_hex(dest).await?)
    } else {
        None
    };

    let secs = elapsed.as_secs_f64();
    let bytes_per_sec = if secs > 0.0 { written as f64 / secs } else { 0.0 };

    Ok(DownloadOutcome {
        bytes_per_sec,
        sha1,
    })
}

/// Lowercase hex sha1 of a file, read from the start.
pub async fn file_sha1_hex(path: &Path) -> Result<String, std::io::Error> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&path)?;
        let mut reader = std::io::BufReader::new(file);
        let mut hasher = Sha1::new();
        let mut buffer = [0u8; 64 * 1024];
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| std::io::Error::other(e.to_string()))?
}

/// Map a reqwest error onto the transport taxonomy.
fn classify(error: &(dyn std::error::Error + 'static)) -> TransportError {
    let message = chain_text(error);
    let lowered = message.to_lowercase();

    let reqwest_err = find_reqwest_error(error);
    let kind = if reqwest_err.map(|e| e.is_timeout()).unwrap_or(false) {
        TransportErrorKind::Timeout
    } else if lowered.contains("dns") {
        TransportErrorKind::Resolve
    } else if lowered.contains("certificate")
        || lowered.contains("tls")
        || lowered.contains("handshake")
    {
        TransportErrorKind::Tls
    } else if reqwest_err.map(|e| e.is_connect()).unwrap_or(false) {
        TransportErrorKind::Connect
    } else if lowered.contains("http2") && lowered.contains("frame") {
        TransportErrorKind::Http2Framing
    } else if lowered.contains("http2") {
        TransportErrorKind::Http2Stream
    } else if reqwest_err
        .map(|e| e.is_body() || e.is_decode())
        .unwrap_or(false)
    {
        TransportErrorKind::Recv
    } else if reqwest_err.map(|e| e.is_request()).unwrap_or(false) {
        TransportErrorKind::Send
    } else {
        TransportErrorKind::Other
    };

    TransportError::new(kind, message)
}

fn find_reqwest_error<'a>(error: &'a (dyn std::error::Error + 'static)) -> Option<&'a reqwest::Error> {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(reqwest_err) = err.downcast_ref::<reqwest::Error>() {
            return Some(reqwest_err);
        }
        current = err.source();
    }
    None
}

fn chain_text(error: &dyn std::error::Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

impl DdiApi for DdiClient {
    async fn base_resource(&self) -> Result<BaseResource, DdiError> {
        let url = self.controller_url(None);
        self.rest_json(Method::GET, &url, None).await
    }

    async fn deployment(&self, href: &str) -> Result<DeploymentBase, DdiError> {
        self.rest_json(Method::GET, href, None).await
    }

    async fn cancel_resource(&self, href: &str) -> Result<CancelResource, DdiError> {
        self.rest_json(Method::GET, href, None).await
    }

    async fn identify(&self, attributes: &BTreeMap<String, String>) -> Result<(), DdiError> {
        let url = self.controller_url(Some("configData"));
        let payload = serde_json::to_value(Feedback::identify(attributes))?;
        self.rest(Method::PUT, &url, Some(&payload)).await?;
        Ok(())
    }

    async fn send_feedback(&self, url: &str, feedback: &Feedback) -> Result<(), DdiError> {
        let payload = serde_json::to_value(feedback)?;
        self.rest(Method::POST, url, Some(&payload)).await?;
        Ok(())
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        resume_from: u64,
        compute_sha1: bool,
    ) -> Result<DownloadOutcome, DdiError> {
        self.download_binary(url, dest, resume_from, compute_sha1)
            .await
    }

    fn deployment_feedback_url(&self, action_id: &str) -> String {
        self.controller_url(Some(&format!("deploymentBase/{action_id}/feedback")))
    }

    fn cancel_feedback_url(&self, cancel_id: &str) -> String {
        self.controller_url(Some(&format!("cancelAction/{cancel_id}/feedback")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;
    use std::collections::BTreeMap;

    fn test_config(ssl: bool) -> AgentConfig {
        AgentConfig {
            hawkbit_server: "hawkbit.example.com:8080".into(),
            controller_id: "device-1".into(),
            tenant_id: "DEFAULT".into(),
            auth: AuthMethod::TargetToken("token".into()),
            bundle_download_location: Some("/tmp/bundle.raucb".into()),
            ssl,
            ssl_verify: true,
            connect_timeout: 20,
            timeout: 60,
            retry_wait: 300,
            low_speed_time: 60,
            low_speed_rate: 100,
            resume_downloads: false,
            stream_bundle: false,
            post_update_reboot: false,
            send_download_authentication: true,
            log_level: LogLevel::Message,
            device_attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn test_controller_url_https() {
        let client = DdiClient::from_config(&test_config(true)).unwrap();
        assert_eq!(
            client.controller_url(None),
            "https://hawkbit.example.com:8080/DEFAULT/controller/v1/device-1"
        );
        assert_eq!(
            client.controller_url(Some("configData")),
            "https://hawkbit.example.com:8080/DEFAULT/controller/v1/device-1/configData"
        );
    }

    #[test]
    fn test_controller_url_http() {
        let client = DdiClient::from_config(&test_config(false)).unwrap();
        assert!(client.controller_url(None).starts_with("http://"));
    }

    #[test]
    fn test_feedback_urls() {
        let client = DdiClient::from_config(&test_config(true)).unwrap();
        assert_eq!(
            client.deployment_feedback_url("42"),
            "https://hawkbit.example.com:8080/DEFAULT/controller/v1/device-1/deploymentBase/42/feedback"
        );
        assert_eq!(
            client.cancel_feedback_url("43"),
            "https://hawkbit.example.com:8080/DEFAULT/controller/v1/device-1/cancelAction/43/feedback"
        );
    }

    #[test]
    fn test_resumable_kinds() {
        use TransportErrorKind::*;
        for kind in [
            Timeout,
            Resolve,
            Connect,
            PartialFile,
            Send,
            Recv,
            Http2Framing,
            Http2Stream,
        ] {
            assert!(kind.is_resumable(), "{kind:?} should be resumable");
        }
        for kind in [Tls, LowSpeed, Other] {
            assert!(!kind.is_resumable(), "{kind:?} should not be resumable");
        }
    }

    #[tokio::test]
    async fn test_file_sha1_hex() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bundle.raucb");
        std::fs::write(&path, b"hello world").unwrap();

        let sha1 = file_sha1_hex(&path).await.unwrap();
        assert_eq!(sha1, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
    }

    #[tokio::test]
    async fn test_file_sha1_empty_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").unwrap();

        let sha1 = file_sha1_hex(&path).await.unwrap();
        assert_eq!(sha1, "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn test_error_display() {
        let err = DdiError::Http(401);
        assert_eq!(err.to_string(), "HTTP request failed with status 401");
        assert_eq!(err.status(), Some(401));

        let err = DdiError::Transport(TransportError::new(
            TransportErrorKind::Connect,
            "connection refused",
        ));
        assert_eq!(err.to_string(), "HTTP request failed: connection refused");
        assert_eq!(err.status(), None);
    }
}
