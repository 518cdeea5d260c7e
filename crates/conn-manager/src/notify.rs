//! Callbacks into the UI layer.

use std::fmt;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Stopped,
    Starting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Stopped => "stopped",
            ConnectionState::Starting => "starting",
            ConnectionState::Connected => "connected",
        })
    }
}

/// Implementations are called from worker threads and may call back into
/// the manager (including `stop`).
pub trait UiNotifier: Send + Sync {
    fn state_changed(&self, state: ConnectionState);
    fn user_message(&self, message: &str);
    fn open_browser(&self, urls: &[String]);
    fn feedback_result(&self, success: bool);
    /// Asked after the process relaunched into an upgraded binary.
    fn quit(&self);
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl UiNotifier for LogNotifier {
    fn state_changed(&self, state: ConnectionState) {
        info!(%state, "connection state");
    }
    fn user_message(&self, message: &str) {
        info!(message, "user message");
    }
    fn open_browser(&self, urls: &[String]) {
        info!(?urls, "open browser");
    }
    fn feedback_result(&self, success: bool) {
        info!(success, "feedback submitted");
    }
    fn quit(&self) {
        info!("quit requested");
    }
}
