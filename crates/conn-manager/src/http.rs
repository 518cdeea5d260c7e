//! Request layer contract and the HTTPS implementation.

use base64::Engine;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::stop::{StopInfo, Stopped};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyMode {
    /// Whatever the environment configures.
    System,
    /// Bypass any proxy.
    Direct,
    /// Route through the given proxy URL (e.g. a transport's local proxy).
    Explicit(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    pub content_type: String,
    pub data: Vec<u8>,
}

impl RequestBody {
    pub fn json(data: Vec<u8>) -> Self {
        Self { content_type: "application/json".into(), data }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Base64 DER certificate to trust instead of the system roots.
    pub pinned_certificate: Option<String>,
    pub proxy: ProxyMode,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    pub fn get(host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            path: path.into(),
            pinned_certificate: None,
            proxy: ProxyMode::System,
            body: None,
        }
    }

    pub fn url(&self) -> String {
        if self.host.contains(':') {
            format!("https://[{}]:{}{}", self.host, self.port, self.path)
        } else {
            format!("https://{}:{}{}", self.host, self.port, self.path)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Stopped(#[from] Stopped),
    #[error("http status {0}")]
    Status(u16),
    #[error("request failed: {0}")]
    Failed(String),
}

impl RequestError {
    pub fn is_stopped(&self) -> bool {
        matches!(self, RequestError::Stopped(_))
    }
}

/// Blocking request capability. Implementations must give up promptly
/// once `stop` fires, returning [`RequestError::Stopped`].
pub trait HttpRequester: Send + Sync {
    fn request(&self, req: &HttpRequest, stop: &StopInfo) -> Result<Vec<u8>, RequestError>;
}

/// HTTPS requests over `reqwest`'s blocking client. The call runs on a
/// helper thread so the caller can poll for cancellation.
#[derive(Debug, Clone)]
pub struct ReqwestRequester {
    timeout: Duration,
    poll: Duration,
}

impl ReqwestRequester {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, poll: Duration::from_millis(100) }
    }

    fn client(&self, req: &HttpRequest) -> Result<reqwest::blocking::Client, RequestError> {
        let mut b = reqwest::blocking::Client::builder()
            .use_rustls_tls()
            .timeout(self.timeout);
        if let Some(cert) = &req.pinned_certificate {
            let der = base64::engine::general_purpose::STANDARD
                .decode(cert.trim())
                .map_err(|e| RequestError::Failed(format!("certificate base64: {e}")))?;
            let cert = reqwest::Certificate::from_der(&der)
                .map_err(|e| RequestError::Failed(format!("certificate: {e}")))?;
            b = b.tls_built_in_root_certs(false).add_root_certificate(cert);
        }
        b = match &req.proxy {
            ProxyMode::System => b,
            ProxyMode::Direct => b.no_proxy(),
            ProxyMode::Explicit(url) => b.proxy(
                reqwest::Proxy::all(url).map_err(|e| RequestError::Failed(format!("proxy: {e}")))?,
            ),
        };
        b.build().map_err(|e| RequestError::Failed(format!("client: {e}")))
    }
}

impl Default for ReqwestRequester {
    fn default() -> Self {
        Self::new(Duration::from_secs(20))
    }
}

fn perform(client: reqwest::blocking::Client, url: String, body: Option<RequestBody>) -> Result<Vec<u8>, RequestError> {
    let rb = match body {
        Some(b) => client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, b.content_type)
            .body(b.data),
        None => client.get(&url),
    };
    let resp = rb.send().map_err(|e| RequestError::Failed(e.to_string()))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(RequestError::Status(status.as_u16()));
    }
    resp.bytes()
        .map(|b| b.to_vec())
        .map_err(|e| RequestError::Failed(e.to_string()))
}

impl HttpRequester for ReqwestRequester {
    fn request(&self, req: &HttpRequest, stop: &StopInfo) -> Result<Vec<u8>, RequestError> {
        stop.check()?;
        let client = self.client(req)?;
        let url = req.url();
        let body = req.body.clone();
        debug!(host = %req.host, port = req.port, "https request");

        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("https-request".into())
            .spawn(move || {
                let _ = tx.send(perform(client, url, body));
            })
            .map_err(|e| RequestError::Failed(format!("spawn: {e}")))?;

        loop {
            match rx.recv_timeout(self.poll) {
                Ok(r) => return r,
                Err(mpsc::RecvTimeoutError::Timeout) => stop.check()?,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(RequestError::Failed("request thread died".into()))
                }
            }
        }
    }
}
