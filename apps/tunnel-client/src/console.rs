//! Terminal notifier. Mirrors manager events to stdout and to watch
//! channels `main` waits on.

use conn_manager::{ConnectionState, UiNotifier};
use tokio::sync::watch;
use tracing::info;

pub struct ConsoleNotifier {
    state: watch::Sender<ConnectionState>,
    feedback: watch::Sender<Option<bool>>,
    quit: watch::Sender<bool>,
}

pub struct ConsoleEvents {
    pub state: watch::Receiver<ConnectionState>,
    pub feedback: watch::Receiver<Option<bool>>,
    pub quit: watch::Receiver<bool>,
}

impl ConsoleNotifier {
    pub fn new() -> (Self, ConsoleEvents) {
        let (state, state_rx) = watch::channel(ConnectionState::Stopped);
        let (feedback, feedback_rx) = watch::channel(None);
        let (quit, quit_rx) = watch::channel(false);
        (
            Self { state, feedback, quit },
            ConsoleEvents { state: state_rx, feedback: feedback_rx, quit: quit_rx },
        )
    }
}

impl UiNotifier for ConsoleNotifier {
    fn state_changed(&self, state: ConnectionState) {
        info!(%state, "connection state");
        println!("[{state}]");
        self.state.send_replace(state);
    }

    fn user_message(&self, message: &str) {
        info!(message, "user message");
        println!("{message}");
    }

    fn open_browser(&self, urls: &[String]) {
        for u in urls {
            println!("home page: {u}");
        }
    }

    fn feedback_result(&self, success: bool) {
        self.feedback.send_replace(Some(success));
    }

    fn quit(&self) {
        self.quit.send_replace(true);
    }
}
