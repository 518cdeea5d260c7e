//! Request paths for the server web API.
//!
//! Every path carries the base parameter set (client session id,
//! propagation channel, sponsor, client version, server secret) followed by
//! endpoint-specific parameters. Parameter names and order are a server
//! compatibility contract.

use serde::{Deserialize, Serialize};
use url::form_urlencoded::Serializer;

use crate::session::SessionInfo;

pub const HANDSHAKE_PATH: &str = "/handshake";
pub const CONNECTED_PATH: &str = "/connected";
pub const STATUS_PATH: &str = "/status";
pub const SPEED_PATH: &str = "/speed";
pub const FEEDBACK_PATH: &str = "/feedback";
pub const FAILED_PATH: &str = "/failed";
pub const DOWNLOAD_PATH: &str = "/download";

/// Build-time identity of this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientIdentity {
    pub propagation_channel_id: String,
    pub sponsor_id: String,
    pub client_version: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            propagation_channel_id: "0".into(),
            sponsor_id: "0".into(),
            client_version: "1".into(),
        }
    }
}

pub struct RequestPaths<'a> {
    identity: &'a ClientIdentity,
    session: &'a SessionInfo,
}

impl<'a> RequestPaths<'a> {
    pub fn new(identity: &'a ClientIdentity, session: &'a SessionInfo) -> Self {
        Self { identity, session }
    }

    fn base(&self, client_version: &str) -> Serializer<'static, String> {
        let mut q = Serializer::new(String::new());
        q.append_pair("client_session_id", self.session.client_session_id())
            .append_pair("propagation_channel_id", &self.identity.propagation_channel_id)
            .append_pair("sponsor_id", &self.identity.sponsor_id)
            .append_pair("client_version", client_version)
            .append_pair("server_secret", self.session.web_server_secret());
        q
    }

    fn standard(&self) -> Serializer<'static, String> {
        self.base(&self.identity.client_version)
    }

    pub fn handshake<S: AsRef<str>>(&self, relay_protocol: &str, known_servers: &[S]) -> String {
        let mut q = self.standard();
        q.append_pair("relay_protocol", relay_protocol);
        for s in known_servers {
            q.append_pair("known_server", s.as_ref());
        }
        format!("{HANDSHAKE_PATH}?{}", q.finish())
    }

    pub fn connected(&self, relay_protocol: &str, session_id: &str, last_connected: &str) -> String {
        let mut q = self.standard();
        q.append_pair("relay_protocol", relay_protocol)
            .append_pair("session_id", session_id)
            .append_pair("last_connected", last_connected);
        format!("{CONNECTED_PATH}?{}", q.finish())
    }

    /// `None` when there is no transport session id to report against.
    pub fn status(&self, relay_protocol: &str, session_id: &str, connected: bool) -> Option<String> {
        if session_id.is_empty() {
            return None;
        }
        let mut q = self.standard();
        q.append_pair("relay_protocol", relay_protocol)
            .append_pair("session_id", session_id)
            .append_pair("connected", if connected { "1" } else { "0" });
        Some(format!("{STATUS_PATH}?{}", q.finish()))
    }

    pub fn speed(&self, relay_protocol: &str, operation: &str, info: &str, milliseconds: u128, size: usize) -> String {
        let mut q = self.standard();
        q.append_pair("relay_protocol", relay_protocol)
            .append_pair("operation", operation)
            .append_pair("info", info)
            .append_pair("milliseconds", &milliseconds.to_string())
            .append_pair("size", &size.to_string());
        format!("{SPEED_PATH}?{}", q.finish())
    }

    pub fn feedback(&self, relay_protocol: &str, session_id: &str, connected: bool) -> String {
        let mut q = self.standard();
        q.append_pair("relay_protocol", relay_protocol)
            .append_pair("session_id", session_id)
            .append_pair("connected", if connected { "1" } else { "0" });
        format!("{FEEDBACK_PATH}?{}", q.finish())
    }

    pub fn failed(&self, relay_protocol: &str, error_code: &str) -> String {
        let mut q = self.standard();
        q.append_pair("relay_protocol", relay_protocol)
            .append_pair("error_code", error_code);
        format!("{FAILED_PATH}?{}", q.finish())
    }

    /// The download request names the version being fetched.
    pub fn download(&self) -> String {
        let q = self.base(self.session.upgrade_version()).finish();
        format!("{DOWNLOAD_PATH}?{q}")
    }
}
