//! Connection orchestration: server selection, connect/fail-over loop,
//! post-connect telemetry and the background upgrade/feedback workers.

pub mod config;
pub mod connection;
pub mod feedback;
pub mod http;
pub mod manager;
pub mod notify;
pub mod remote_list;
pub mod requests;
pub mod server_request;
pub mod session;
pub mod settings;
pub mod split_tunnel;
pub mod stop;
pub mod transport;
pub mod upgrade;

pub use config::{ManagerConfig, RemoteListConfig};
pub use connection::{ConnectOutcome, TransportConnection};
pub use http::{HttpRequest, HttpRequester, ProxyMode, RequestBody, RequestError, ReqwestRequester};
pub use manager::{ConnectionManager, Environment, StatusReport};
pub use notify::{ConnectionState, LogNotifier, UiNotifier};
pub use requests::{ClientIdentity, RequestPaths};
pub use session::SessionInfo;
pub use settings::{FileSettings, MemorySettings, SettingsStore};
pub use stop::{StopInfo, StopReason, StopSignal, Stopped};
pub use transport::{Transport, TransportContext, TransportError, TransportRegistry};
pub use upgrade::{ProcessUpgradeHost, UpgradeHost};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown transport: {0}")]
    UnknownTransport(String),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("failed to spawn worker: {0}")]
    Spawn(std::io::Error),
    #[error("config: {0}")]
    Config(String),
    #[error("handshake response: {0}")]
    Handshake(String),
    #[error(transparent)]
    ServerList(#[from] server_list::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
