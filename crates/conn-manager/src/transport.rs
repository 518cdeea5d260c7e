//! Transport contract and the registry transports are created from.
//!
//! A transport is owned by the connection worker for one connection. It
//! is shared by `Arc` so the manager can ask it about tunnelling and
//! session ids while post-connect requests run, hence `&self` methods.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::session::SessionInfo;
use crate::stop::{StopInfo, Stopped};
use crate::{Error, Result};

/// What a transport's `connect` gets to work with.
pub struct TransportContext<'a> {
    pub stop: &'a StopInfo,
    /// Handshake-derived session; the transport may enrich it.
    pub session: &'a mut SessionInfo,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// This server is unusable; move on to the next one.
    #[error("server failed: {0}")]
    Retry(String),
    #[error(transparent)]
    Stopped(#[from] Stopped),
    /// The transport itself is broken; stop trying altogether.
    #[error("transport failed: {0}")]
    Fatal(String),
}

pub trait Transport: Send + Sync {
    /// Value of the `relay_protocol` request parameter.
    fn protocol_name(&self) -> &str;

    fn display_name(&self) -> &str {
        self.protocol_name()
    }

    /// Transport session id for status/feedback requests; empty when the
    /// transport has none.
    fn session_id(&self, session: &SessionInfo) -> String;

    /// Whether server requests should go through the tunnel once connected.
    fn is_server_request_tunnelled(&self) -> bool {
        true
    }

    /// `false` when the transport performs its own handshake during
    /// `connect`.
    fn requires_handshake(&self) -> bool {
        true
    }

    fn is_connected(&self) -> bool;

    /// Error code reported with the `failed` request.
    fn last_error(&self) -> String {
        String::new()
    }

    /// Local proxy URL tunnelled requests are routed through.
    fn local_proxy(&self) -> Option<String> {
        None
    }

    fn connect(&self, ctx: TransportContext<'_>) -> std::result::Result<(), TransportError>;

    /// Block until the tunnel goes down or `stop` fires.
    fn wait_for_disconnect(&self, stop: &StopInfo) -> std::result::Result<(), Stopped>;

    fn disconnect(&self);
}

type Factory = Arc<dyn Fn() -> Arc<dyn Transport> + Send + Sync>;

/// Name to constructor map consulted by `ConnectionManager::start`.
#[derive(Clone, Default)]
pub struct TransportRegistry {
    factories: BTreeMap<String, Factory>,
}

impl fmt::Debug for TransportRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn Transport> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn create(&self, name: &str) -> Result<Arc<dyn Transport>> {
        self.factories
            .get(name)
            .map(|f| f())
            .ok_or_else(|| Error::UnknownTransport(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}
