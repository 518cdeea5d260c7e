//! `handshake` transport: web handshake only, no tunnel. Holds the session
//! until stopped, which makes it a reachability check for a server list.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use conn_manager::{SessionInfo, StopInfo, Stopped, Transport, TransportContext, TransportError};
use tracing::info;

pub const NAME: &str = "handshake";

#[derive(Debug, Default)]
pub struct HandshakeTransport {
    connected: AtomicBool,
}

impl Transport for HandshakeTransport {
    fn protocol_name(&self) -> &str {
        "HANDSHAKE"
    }

    fn display_name(&self) -> &str {
        "Handshake only"
    }

    fn session_id(&self, session: &SessionInfo) -> String {
        session.ssh_session_id().to_string()
    }

    fn is_server_request_tunnelled(&self) -> bool {
        false
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connect(&self, ctx: TransportContext<'_>) -> Result<(), TransportError> {
        ctx.stop.check()?;
        info!(
            server = ctx.session.server_address(),
            homepages = ctx.session.homepages().len(),
            discovered = ctx.session.discovered_server_entries().len(),
            "handshake succeeded"
        );
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn wait_for_disconnect(&self, stop: &StopInfo) -> Result<(), Stopped> {
        while self.is_connected() {
            stop.sleep(Duration::from_millis(500))?;
        }
        Ok(())
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}
