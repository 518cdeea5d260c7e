//! One connection attempt against one server.

use tracing::{debug, info, warn};

use crate::http::{HttpRequester, RequestError};
use crate::requests::{ClientIdentity, RequestPaths};
use crate::server_request;
use crate::session::SessionInfo;
use crate::stop::StopInfo;
use crate::transport::{Transport, TransportContext, TransportError};

/// Result of a connection attempt, dispatched on by the try-servers loop.
#[derive(Debug)]
pub enum ConnectOutcome {
    /// Tunnel is up; carries the session as enriched by the handshake and
    /// the transport.
    Connected(Box<SessionInfo>),
    RetryNextServer(String),
    /// Cancellation observed.
    Aborted,
    Fatal(String),
}

pub struct TransportConnection<'a> {
    transport: &'a dyn Transport,
    requester: &'a dyn HttpRequester,
    identity: &'a ClientIdentity,
}

impl<'a> TransportConnection<'a> {
    pub fn new(transport: &'a dyn Transport, requester: &'a dyn HttpRequester, identity: &'a ClientIdentity) -> Self {
        Self { transport, requester, identity }
    }

    /// Handshake (unless the transport does its own) then transport
    /// connect.
    pub fn connect(&self, mut session: SessionInfo, handshake_path: &str, stop: &StopInfo) -> ConnectOutcome {
        if stop.check().is_err() {
            return ConnectOutcome::Aborted;
        }

        if self.transport.requires_handshake() {
            let req = server_request::build(&session, handshake_path.to_string(), None);
            match self.requester.request(&req, stop) {
                Ok(body) => {
                    let text = String::from_utf8_lossy(&body);
                    if let Err(e) = session.parse_handshake_response(&text) {
                        return ConnectOutcome::RetryNextServer(e.to_string());
                    }
                    debug!(server = session.server_address(), "handshake complete");
                }
                Err(RequestError::Stopped(s)) => {
                    debug!(reasons = ?s.0, "handshake cancelled");
                    return ConnectOutcome::Aborted;
                }
                Err(e) => return ConnectOutcome::RetryNextServer(format!("handshake failed: {e}")),
            }
        }

        let ctx = TransportContext { stop, session: &mut session };
        match self.transport.connect(ctx) {
            Ok(()) => {
                info!(server = session.server_address(), transport = self.transport.display_name(), "transport connected");
                ConnectOutcome::Connected(Box::new(session))
            }
            Err(TransportError::Stopped(_)) => ConnectOutcome::Aborted,
            Err(TransportError::Retry(reason)) => {
                self.report_failed(&session, stop);
                ConnectOutcome::RetryNextServer(reason)
            }
            Err(TransportError::Fatal(msg)) => ConnectOutcome::Fatal(msg),
        }
    }

    fn report_failed(&self, session: &SessionInfo, stop: &StopInfo) {
        let path = RequestPaths::new(self.identity, session)
            .failed(self.transport.protocol_name(), &self.transport.last_error());
        let req = server_request::build(session, path, None);
        if let Err(e) = self.requester.request(&req, stop) {
            if !e.is_stopped() {
                warn!(error = %e, "failed request not delivered");
            }
        }
    }
}
