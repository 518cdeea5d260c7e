//! Mock collaborators shared by the scenario tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use conn_manager::config::RemoteListConfig;
use conn_manager::settings::UserSettings;
use conn_manager::{
    ConnectionManager, ConnectionState, Environment, HttpRequest, HttpRequester, ManagerConfig,
    MemorySettings, RequestError, SessionInfo, StopInfo, StopSignal, Stopped, Transport,
    TransportContext, TransportError, TransportRegistry, UiNotifier, UpgradeHost,
};
use parking_lot::Mutex;
use server_list::{encode_entries, MemoryStorage, ServerEntry, ServerStore};
use tempfile::TempDir;

pub const TRANSPORT: &str = "mock";

pub fn encoded(addr: &str) -> String {
    ServerEntry::new(addr, 443, "secret", "").encode().unwrap()
}

/// Encoded list in exactly the given order.
pub fn persisted(addrs: &[&str]) -> String {
    let entries: Vec<ServerEntry> = addrs.iter().map(|a| ServerEntry::new(*a, 443, "secret", "")).collect();
    encode_entries(&entries).unwrap()
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn eventually(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

pub const WAIT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// request layer

type Handler = dyn Fn(&HttpRequest, &StopInfo) -> Result<Vec<u8>, RequestError> + Send + Sync;

pub struct MockRequester {
    handler: Box<Handler>,
    log: Mutex<Vec<HttpRequest>>,
}

impl MockRequester {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest, &StopInfo) -> Result<Vec<u8>, RequestError> + Send + Sync + 'static,
    {
        Self { handler: Box::new(handler), log: Mutex::new(Vec::new()) }
    }

    pub fn ok() -> Self {
        Self::new(|_, _| Ok(Vec::new()))
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.log.lock().clone()
    }

    pub fn paths_starting(&self, prefix: &str) -> Vec<String> {
        self.log.lock().iter().filter(|r| r.path.starts_with(prefix)).map(|r| r.path.clone()).collect()
    }
}

impl HttpRequester for MockRequester {
    fn request(&self, req: &HttpRequest, stop: &StopInfo) -> Result<Vec<u8>, RequestError> {
        stop.check()?;
        self.log.lock().push(req.clone());
        (self.handler)(req, stop)
    }
}

// ---------------------------------------------------------------------------
// transport

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Connect, then hold until stopped or hung up.
    Connect,
    Retry,
    Fatal,
    /// Block inside `connect` until cancelled.
    BlockInConnect,
}

#[derive(Default)]
pub struct MockTransportState {
    pub behaviors: Mutex<HashMap<String, Behavior>>,
    pub attempts: Mutex<Vec<String>>,
    pub connected: AtomicBool,
    pub hang_up: AtomicBool,
    pub observed_cancel: AtomicBool,
    pub requires_handshake: AtomicBool,
}

impl MockTransportState {
    pub fn set(&self, addr: &str, b: Behavior) {
        self.behaviors.lock().insert(addr.to_string(), b);
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().clone()
    }
}

pub struct MockTransport(pub Arc<MockTransportState>);

impl Transport for MockTransport {
    fn protocol_name(&self) -> &str {
        "MOCK"
    }

    fn session_id(&self, _: &SessionInfo) -> String {
        "mock-session".into()
    }

    fn requires_handshake(&self) -> bool {
        self.0.requires_handshake.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.0.connected.load(Ordering::SeqCst)
    }

    fn last_error(&self) -> String {
        "42".into()
    }

    fn connect(&self, ctx: TransportContext<'_>) -> Result<(), TransportError> {
        let addr = ctx.session.server_address().to_string();
        self.0.attempts.lock().push(addr.clone());
        let behavior = self.0.behaviors.lock().get(&addr).copied().unwrap_or(Behavior::Connect);
        match behavior {
            Behavior::Connect => {
                self.0.hang_up.store(false, Ordering::SeqCst);
                self.0.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
            Behavior::Retry => Err(TransportError::Retry(format!("{addr} unreachable"))),
            Behavior::Fatal => Err(TransportError::Fatal("driver missing".into())),
            Behavior::BlockInConnect => {
                let r = ctx.stop.sleep(Duration::from_secs(60));
                if r.is_err() {
                    self.0.observed_cancel.store(true, Ordering::SeqCst);
                }
                r?;
                Err(TransportError::Retry("timed out".into()))
            }
        }
    }

    fn wait_for_disconnect(&self, stop: &StopInfo) -> Result<(), Stopped> {
        loop {
            if self.0.hang_up.load(Ordering::SeqCst) {
                self.0.connected.store(false, Ordering::SeqCst);
                return Ok(());
            }
            if let Err(s) = stop.sleep(Duration::from_millis(5)) {
                self.0.observed_cancel.store(true, Ordering::SeqCst);
                return Err(s);
            }
        }
    }

    fn disconnect(&self) {
        self.0.connected.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// notifier

#[derive(Default)]
pub struct RecordingNotifier {
    pub states: Mutex<Vec<ConnectionState>>,
    pub messages: Mutex<Vec<String>>,
    pub browsed: Mutex<Vec<Vec<String>>>,
    pub feedback: Mutex<Vec<bool>>,
    pub quits: Mutex<u32>,
}

impl RecordingNotifier {
    pub fn last_state(&self) -> Option<ConnectionState> {
        self.states.lock().last().copied()
    }

    pub fn saw_message(&self, needle: &str) -> bool {
        self.messages.lock().iter().any(|m| m.contains(needle))
    }
}

impl UiNotifier for RecordingNotifier {
    fn state_changed(&self, state: ConnectionState) {
        self.states.lock().push(state);
    }
    fn user_message(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
    fn open_browser(&self, urls: &[String]) {
        self.browsed.lock().push(urls.to_vec());
    }
    fn feedback_result(&self, success: bool) {
        self.feedback.lock().push(success);
    }
    fn quit(&self) {
        *self.quits.lock() += 1;
    }
}

// ---------------------------------------------------------------------------
// upgrade host

pub struct FakeUpgradeHost {
    pub exe: PathBuf,
    pub relaunched: Mutex<Vec<PathBuf>>,
}

impl FakeUpgradeHost {
    pub fn new(exe: &Path) -> Self {
        Self { exe: exe.to_path_buf(), relaunched: Mutex::new(Vec::new()) }
    }
}

impl UpgradeHost for FakeUpgradeHost {
    fn current_exe(&self) -> io::Result<PathBuf> {
        Ok(self.exe.clone())
    }
    fn relaunch(&self, exe: &Path) -> io::Result<()> {
        self.relaunched.lock().push(exe.to_path_buf());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// harness

pub struct Setup {
    pub servers: Vec<String>,
    pub requester: MockRequester,
    pub settings: UserSettings,
    pub remote_list: RemoteListConfig,
    pub default_home_page: String,
    pub exe_contents: Option<Vec<u8>>,
    pub requires_handshake: bool,
}

impl Setup {
    pub fn new(servers: &[&str]) -> Self {
        Self {
            servers: servers.iter().map(|s| s.to_string()).collect(),
            requester: MockRequester::ok(),
            settings: UserSettings::default(),
            remote_list: RemoteListConfig::default(),
            default_home_page: String::new(),
            exe_contents: None,
            requires_handshake: false,
        }
    }

    pub fn requester(mut self, r: MockRequester) -> Self {
        self.requester = r;
        self
    }

    pub fn handshake(mut self) -> Self {
        self.requires_handshake = true;
        self
    }

    pub fn build(self) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let servers: Vec<&str> = self.servers.iter().map(String::as_str).collect();
        // seeded as a persisted list so index order is exactly `servers`
        let storage = MemoryStorage::with_contents(persisted(&servers));
        let store = Arc::new(ServerStore::new(Box::new(storage), ""));

        let transport = Arc::new(MockTransportState::default());
        transport.requires_handshake.store(self.requires_handshake, Ordering::SeqCst);
        let mut transports = TransportRegistry::new();
        let t = transport.clone();
        transports.register(TRANSPORT, move || Arc::new(MockTransport(t.clone())) as Arc<dyn Transport>);

        let exe = dir.path().join("client-bin");
        std::fs::write(&exe, self.exe_contents.as_deref().unwrap_or(b"old-binary")).unwrap();
        let upgrade_host = Arc::new(FakeUpgradeHost::new(&exe));

        let config = ManagerConfig {
            retry_backoff_min_ms: 1,
            retry_backoff_max_ms: 5,
            split_tunnel_file: dir.path().join("routes.txt").to_string_lossy().into_owned(),
            remote_list: self.remote_list,
            default_home_page: self.default_home_page,
            ..ManagerConfig::default()
        };

        let notifier = Arc::new(RecordingNotifier::default());
        let requester = Arc::new(self.requester);
        let settings = Arc::new(MemorySettings::new(self.settings));
        let stop = StopSignal::new();
        let env = Environment::new(config, store.clone(), transports)
            .requester(requester.clone())
            .notifier(notifier.clone())
            .settings(settings.clone())
            .upgrade_host(upgrade_host.clone())
            .stop_signal(stop.clone());

        Harness {
            manager: ConnectionManager::new(env),
            store,
            transport,
            requester,
            notifier,
            settings,
            upgrade_host,
            stop,
            dir,
        }
    }
}

pub struct Harness {
    pub manager: ConnectionManager,
    pub store: Arc<ServerStore>,
    pub transport: Arc<MockTransportState>,
    pub requester: Arc<MockRequester>,
    pub notifier: Arc<RecordingNotifier>,
    pub settings: Arc<MemorySettings>,
    pub upgrade_host: Arc<FakeUpgradeHost>,
    pub stop: StopSignal,
    pub dir: TempDir,
}

impl Harness {
    pub fn addresses(&self) -> Vec<String> {
        self.store.known_addresses().unwrap()
    }

    pub fn wait_state(&self, state: ConnectionState) -> bool {
        eventually(WAIT, || self.manager.state() == state)
    }

    pub fn exe(&self) -> &Path {
        &self.upgrade_host.exe
    }
}
