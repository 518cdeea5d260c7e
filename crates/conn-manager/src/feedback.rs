//! User feedback submission.

use serde::Serialize;
use tracing::{info, warn};

use crate::http::{HttpRequester, ProxyMode, RequestBody};
use crate::requests::{ClientIdentity, RequestPaths};
use crate::server_request;
use crate::session::SessionInfo;
use crate::stop::{StopInfo, StopReason};

#[derive(Serialize)]
struct Body<'a> {
    feedback: &'a str,
}

/// Everything one submission needs, captured when it is queued and moved
/// into the worker.
#[derive(Debug, Clone)]
pub struct FeedbackMessage {
    pub text: String,
    pub session: SessionInfo,
    pub relay_protocol: String,
    pub transport_session_id: String,
    pub connected: bool,
    pub proxy: ProxyMode,
}

impl FeedbackMessage {
    /// Cancellation reasons the submission honours: any stop while a tunnel
    /// carries it, otherwise only process exit.
    pub fn stop_mask(&self) -> StopReason {
        if self.connected { StopReason::ALL } else { StopReason::EXIT }
    }

    pub fn submit(self, identity: &ClientIdentity, requester: &dyn HttpRequester, stop: &StopInfo) -> bool {
        let path = RequestPaths::new(identity, &self.session).feedback(
            &self.relay_protocol,
            &self.transport_session_id,
            self.connected,
        );
        let data = match serde_json::to_vec(&Body { feedback: &self.text }) {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "feedback encode failed");
                return false;
            }
        };
        let stop = stop.with_mask(self.stop_mask());
        let mut req = server_request::build_with_body(&self.session, path, None, RequestBody::json(data));
        req.proxy = self.proxy;
        match requester.request(&req, &stop) {
            Ok(_) => {
                info!("feedback delivered");
                true
            }
            Err(e) => {
                warn!(error = %e, "feedback not delivered");
                false
            }
        }
    }
}
