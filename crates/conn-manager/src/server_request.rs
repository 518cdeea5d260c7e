//! Requests to the current server's web API.

use crate::http::{HttpRequest, ProxyMode, RequestBody};
use crate::session::SessionInfo;
use crate::transport::Transport;

/// Proxy choice for a server request: through the tunnel when a transport
/// is up and allows it, otherwise straight to the server.
pub fn proxy_for(transport: Option<&dyn Transport>) -> ProxyMode {
    match transport {
        Some(t) if t.is_connected() && t.is_server_request_tunnelled() => {
            t.local_proxy().map(ProxyMode::Explicit).unwrap_or(ProxyMode::Direct)
        }
        _ => ProxyMode::Direct,
    }
}

/// Request against the session server's web port with its certificate
/// pinned.
pub fn build(session: &SessionInfo, path: String, transport: Option<&dyn Transport>) -> HttpRequest {
    let cert = session.web_server_certificate();
    HttpRequest {
        host: session.server_address().to_string(),
        port: session.web_port(),
        path,
        pinned_certificate: (!cert.is_empty()).then(|| cert.to_string()),
        proxy: proxy_for(transport),
        body: None,
    }
}

pub fn build_with_body(
    session: &SessionInfo,
    path: String,
    transport: Option<&dyn Transport>,
    body: RequestBody,
) -> HttpRequest {
    HttpRequest { body: Some(body), ..build(session, path, transport) }
}
