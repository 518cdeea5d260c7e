//! The connection manager: state machine, try-servers loop and the
//! background workers hanging off a connection.
//!
//! Locking: `Shared` is guarded by one mutex. The state and the starting
//! timestamp are atomics read without it so UI polling never waits on a
//! worker. Worker join handles live in their own slots and `stop` joins
//! them without holding any manager lock, which makes `stop` safe to call
//! from a notifier callback running on a worker.

use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use server_list::ServerStore;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::ManagerConfig;
use crate::connection::{ConnectOutcome, TransportConnection};
use crate::feedback::FeedbackMessage;
use crate::http::{HttpRequest, HttpRequester, ProxyMode, RequestBody, ReqwestRequester};
use crate::notify::{ConnectionState, LogNotifier, UiNotifier};
use crate::remote_list::RemoteListFetcher;
use crate::requests::RequestPaths;
use crate::server_request;
use crate::session::SessionInfo;
use crate::settings::{MemorySettings, SettingsStore, LAST_CONNECTED_KEY};
use crate::split_tunnel::{decompress_routes, RouteFile};
use crate::stop::{StopInfo, StopReason, StopSignal};
use crate::transport::{Transport, TransportRegistry};
use crate::upgrade::{self, ProcessUpgradeHost, UpgradeHost};
use crate::{Error, Result};

/// Collaborators the manager is wired to.
pub struct Environment {
    pub config: ManagerConfig,
    pub store: Arc<ServerStore>,
    pub transports: TransportRegistry,
    pub requester: Arc<dyn HttpRequester>,
    pub notifier: Arc<dyn UiNotifier>,
    pub settings: Arc<dyn SettingsStore>,
    pub upgrade_host: Arc<dyn UpgradeHost>,
    /// Process-wide cancellation signal.
    pub stop: StopSignal,
}

impl Environment {
    /// Real HTTPS requests, log-only notifier, in-memory settings.
    pub fn new(config: ManagerConfig, store: Arc<ServerStore>, transports: TransportRegistry) -> Self {
        let requester = Arc::new(ReqwestRequester::new(config.request_timeout()));
        Self {
            config,
            store,
            transports,
            requester,
            notifier: Arc::new(LogNotifier),
            settings: Arc::new(MemorySettings::default()),
            upgrade_host: Arc::new(ProcessUpgradeHost),
            stop: StopSignal::new(),
        }
    }

    pub fn requester(mut self, r: Arc<dyn HttpRequester>) -> Self {
        self.requester = r;
        self
    }

    pub fn notifier(mut self, n: Arc<dyn UiNotifier>) -> Self {
        self.notifier = n;
        self
    }

    pub fn settings(mut self, s: Arc<dyn SettingsStore>) -> Self {
        self.settings = s;
        self
    }

    pub fn upgrade_host(mut self, h: Arc<dyn UpgradeHost>) -> Self {
        self.upgrade_host = h;
        self
    }

    pub fn stop_signal(mut self, s: StopSignal) -> Self {
        self.stop = s;
        self
    }
}

/// Traffic statistics for a `/status` report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub page_views: BTreeMap<String, u64>,
    pub https_requests: BTreeMap<String, u64>,
    pub bytes_transferred: u64,
}

#[derive(Serialize)]
struct PageView<'a> {
    page: &'a str,
    count: u64,
}

#[derive(Serialize)]
struct HttpsRequest<'a> {
    domain: &'a str,
    count: u64,
}

#[derive(Serialize)]
struct StatusBody<'a> {
    bytes_transferred: u64,
    page_views: Vec<PageView<'a>>,
    https_requests: Vec<HttpsRequest<'a>>,
}

impl StatusReport {
    fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&StatusBody {
            bytes_transferred: self.bytes_transferred,
            page_views: self.page_views.iter().map(|(page, &count)| PageView { page, count }).collect(),
            https_requests: self
                .https_requests
                .iter()
                .map(|(domain, &count)| HttpsRequest { domain, count })
                .collect(),
        })
    }
}

const STATE_STOPPED: u8 = 0;
const STATE_STARTING: u8 = 1;
const STATE_CONNECTED: u8 = 2;

#[derive(Default)]
struct Shared {
    session: SessionInfo,
    split_tunnel_routes: String,
    transport: Option<Arc<dyn Transport>>,
    upgrade_pending: bool,
    start_split_tunnel: bool,
}

type Slot = Mutex<Option<JoinHandle<()>>>;

struct Inner {
    env: Environment,
    route_file: RouteFile,
    remote_list: RemoteListFetcher,
    state: AtomicU8,
    epoch: Instant,
    starting_at_ms: AtomicU64,
    shared: Mutex<Shared>,
    connect_worker: Slot,
    upgrade_worker: Slot,
    feedback_worker: Slot,
    remote_list_worker: Slot,
}

pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(env: Environment) -> Self {
        let route_file = RouteFile::new(env.config.split_tunnel_path());
        let remote_list = RemoteListFetcher::new(env.config.remote_list.clone());
        Self {
            inner: Arc::new(Inner {
                env,
                route_file,
                remote_list,
                state: AtomicU8::new(STATE_STOPPED),
                epoch: Instant::now(),
                starting_at_ms: AtomicU64::new(0),
                shared: Mutex::new(Shared::default()),
                connect_worker: Mutex::new(None),
                upgrade_worker: Mutex::new(None),
                feedback_worker: Mutex::new(None),
                remote_list_worker: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Time since the last transition into `Starting`.
    pub fn starting_elapsed(&self) -> Duration {
        let at = Duration::from_millis(self.inner.starting_at_ms.load(Ordering::Relaxed));
        self.inner.epoch.elapsed().saturating_sub(at)
    }

    pub fn current_session_info(&self) -> SessionInfo {
        self.inner.shared.lock().session.clone()
    }

    pub fn upgrade_pending(&self) -> bool {
        self.inner.shared.lock().upgrade_pending
    }

    pub fn split_tunnel_routes(&self) -> String {
        self.inner.shared.lock().split_tunnel_routes.clone()
    }

    pub fn route_file(&self) -> &RouteFile {
        &self.inner.route_file
    }

    pub fn store(&self) -> &ServerStore {
        &self.inner.env.store
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.inner.env.stop
    }

    /// Stop any previous attempt, then spawn a connection worker using the
    /// named transport. Fails without side effects unless the manager is
    /// stopped.
    pub fn start(&self, transport: &str, start_split_tunnel: bool) -> Result<()> {
        info!(transport, start_split_tunnel, "start: enter");
        self.stop(StopReason::USER_DISCONNECT);

        let inner = &self.inner;
        {
            let mut shared = inner.shared.lock();
            inner.env.stop.clear(StopReason::USER_DISCONNECT | StopReason::UNEXPECTED_DISCONNECT);

            let state = inner.state();
            if state != ConnectionState::Stopped || inner.connect_worker.lock().is_some() {
                warn!(%state, "invalid connection manager state in start");
                return Err(Error::InvalidState("start requires the stopped state"));
            }
            shared.transport = Some(inner.env.transports.create(transport)?);
            shared.start_split_tunnel = start_split_tunnel;
        }

        inner.set_state(ConnectionState::Starting);
        let worker = Arc::clone(inner);
        match thread::Builder::new().name("connection".into()).spawn(move || worker.try_servers()) {
            Ok(h) => *inner.connect_worker.lock() = Some(h),
            Err(e) => {
                warn!(error = %e, "start: spawn failed");
                inner.set_state(ConnectionState::Stopped);
                return Err(Error::Spawn(e));
            }
        }
        info!("start: exit");
        Ok(())
    }

    /// Signal `reason`, wait for every worker to exit, then release the
    /// transport and the route file. Idempotent.
    pub fn stop(&self, reason: StopReason) {
        let inner = &self.inner;
        debug!(?reason, "stop: enter");
        inner.env.stop.signal(reason);

        join_worker(&inner.connect_worker, "connection");
        join_worker(&inner.upgrade_worker, "upgrade");
        join_worker(&inner.feedback_worker, "feedback");
        join_worker(&inner.remote_list_worker, "remote list");

        let transport = inner.shared.lock().transport.take();
        if let Some(t) = transport {
            t.disconnect();
        }
        if let Err(e) = inner.route_file.remove() {
            warn!(error = %e, "cannot delete split tunnel routes");
        }
        debug!("stop: exit");
    }

    pub fn toggle(&self, transport: &str, start_split_tunnel: bool) -> Result<()> {
        if self.state() == ConnectionState::Stopped {
            self.start(transport, start_split_tunnel)
        } else {
            self.stop(StopReason::USER_DISCONNECT);
            Ok(())
        }
    }

    pub fn start_split_tunnel(&self) {
        self.inner.start_split_tunnel();
    }

    pub fn stop_split_tunnel(&self) {
        let _g = self.inner.shared.lock();
        if let Err(e) = self.inner.route_file.remove() {
            warn!(error = %e, "cannot delete split tunnel routes");
        }
    }

    /// Open the handshake homepages, or `default_url` when there were none.
    pub fn open_home_pages(&self, default_url: &str) {
        self.inner.open_home_pages(default_url);
    }

    /// Post traffic stats for the current session. A final report is
    /// sent even after a user stop.
    pub fn send_status_message(&self, final_report: bool, report: &StatusReport) -> bool {
        self.inner.send_status_message(final_report, report)
    }

    /// Queue feedback on a background worker; the outcome arrives via
    /// `UiNotifier::feedback_result`.
    pub fn send_feedback(&self, text: impl Into<String>) {
        let inner = &self.inner;
        let message = {
            let shared = inner.shared.lock();
            let transport = shared.transport.as_deref();
            FeedbackMessage {
                text: text.into(),
                session: shared.session.clone(),
                relay_protocol: transport.map(|t| t.protocol_name().to_string()).unwrap_or_default(),
                transport_session_id: transport.map(|t| t.session_id(&shared.session)).unwrap_or_default(),
                connected: inner.state() == ConnectionState::Connected,
                proxy: server_request::proxy_for(transport),
            }
        };
        let worker = Arc::clone(inner);
        inner.spawn_into(&inner.feedback_worker, "feedback", move || {
            let stop = worker.env.stop.info(StopReason::ALL);
            let ok = message.submit(&worker.env.config.identity, worker.env.requester.as_ref(), &stop);
            worker.env.notifier.feedback_result(ok);
        });
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop(StopReason::EXIT);
    }
}

fn join_worker(slot: &Slot, name: &str) {
    let handle = slot.lock().take();
    let Some(h) = handle else { return };
    if h.thread().id() == thread::current().id() {
        debug!(worker = name, "stop called on the worker itself; not joining");
        return;
    }
    if h.join().is_err() {
        warn!(worker = name, "worker panicked");
    }
}

impl Inner {
    fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Relaxed) {
            STATE_STARTING => ConnectionState::Starting,
            STATE_CONNECTED => ConnectionState::Connected,
            _ => ConnectionState::Stopped,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let v = match state {
            ConnectionState::Stopped => STATE_STOPPED,
            ConnectionState::Starting => {
                let ms = self.epoch.elapsed().as_millis() as u64;
                self.starting_at_ms.store(ms, Ordering::Relaxed);
                STATE_STARTING
            }
            ConnectionState::Connected => STATE_CONNECTED,
        };
        self.state.store(v, Ordering::Relaxed);
        self.env.notifier.state_changed(state);
    }

    /// Spawn `f` into `slot` unless the worker already there is still
    /// running.
    fn spawn_into<F>(&self, slot: &Slot, name: &str, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut g = slot.lock();
        if let Some(h) = g.as_ref() {
            if !h.is_finished() {
                debug!(worker = name, "worker already running");
                return;
            }
        }
        if let Some(h) = g.take() {
            let _ = h.join();
        }
        match thread::Builder::new().name(name.to_string()).spawn(f) {
            Ok(h) => *g = Some(h),
            Err(e) => warn!(worker = name, error = %e, "spawn failed"),
        }
    }

    fn try_servers(self: Arc<Self>) {
        info!("connection worker: enter");
        let stop = self.env.stop.info(StopReason::ALL);
        let transport = self.shared.lock().transport.clone();
        let Some(transport) = transport else {
            warn!("connection worker started without a transport");
            self.set_state(ConnectionState::Stopped);
            return;
        };

        loop {
            if self.shared.lock().upgrade_pending && self.relaunch_upgraded() {
                self.set_state(ConnectionState::Stopped);
                break;
            }

            let (session, handshake_path) = match self.load_next_server(transport.as_ref()) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "cannot load next server");
                    self.env.notifier.user_message(&e.to_string());
                    self.set_state(ConnectionState::Stopped);
                    break;
                }
            };
            info!(server = session.server_address(), transport = transport.display_name(), "trying server");

            let conn = TransportConnection::new(transport.as_ref(), self.env.requester.as_ref(), &self.env.config.identity);
            match conn.connect(session, &handshake_path, &stop) {
                ConnectOutcome::Connected(session) => {
                    self.update_current_session(&session);
                    if self.require_upgrade() {
                        self.spawn_upgrade();
                    }
                    if stop.check().is_err() {
                        self.set_state(ConnectionState::Stopped);
                        break;
                    }
                    self.post_connect(&session, transport.as_ref(), &stop);
                    debug!("waiting for disconnect");
                    if let Err(s) = transport.wait_for_disconnect(&stop) {
                        debug!(reasons = ?s.0, "disconnect wait cancelled");
                    }
                    self.set_state(ConnectionState::Stopped);
                    break;
                }
                ConnectOutcome::RetryNextServer(reason) => {
                    if stop.check().is_err() {
                        self.set_state(ConnectionState::Stopped);
                        break;
                    }
                    info!(%reason, "server failed");
                    self.env.store.mark_current_server_failed();
                    self.env.notifier.user_message("Trying next server...");
                    self.spawn_remote_list_fetch();
                    let ms = rand::thread_rng().gen_range(self.env.config.retry_backoff());
                    if stop.sleep(Duration::from_millis(ms)).is_err() {
                        self.set_state(ConnectionState::Stopped);
                        break;
                    }
                }
                ConnectOutcome::Aborted => {
                    debug!("connection attempt cancelled");
                    self.set_state(ConnectionState::Stopped);
                    break;
                }
                ConnectOutcome::Fatal(msg) => {
                    warn!(error = %msg, "transport failed");
                    self.env.notifier.user_message(&format!("Connection failed: {msg}"));
                    self.set_state(ConnectionState::Stopped);
                    break;
                }
            }
        }
        info!("connection worker: exit");
    }

    /// Fresh session for the front server plus its handshake path.
    fn load_next_server(&self, transport: &dyn Transport) -> Result<(SessionInfo, String)> {
        let mut shared = self.shared.lock();
        let entry = self.env.store.get_next_server()?;

        shared.split_tunnel_routes.clear();
        if let Err(e) = self.route_file.remove() {
            warn!(error = %e, "cannot delete split tunnel routes");
        }

        shared.session = SessionInfo::new(entry);
        let known = self.env.store.known_addresses()?;
        let path = RequestPaths::new(&self.env.config.identity, &shared.session)
            .handshake(transport.protocol_name(), &known);
        Ok((shared.session.clone(), path))
    }

    fn update_current_session(&self, session: &SessionInfo) {
        let mut shared = self.shared.lock();
        shared.session = session.clone();
        let discovered = session.discovered_server_entries();
        if !discovered.is_empty() {
            self.env.store.add_entries_to_list(discovered, Some(session.server_entry()));
        }
    }

    fn require_upgrade(&self) -> bool {
        let shared = self.shared.lock();
        !shared.upgrade_pending && !shared.session.upgrade_version().is_empty()
    }

    fn spawn_upgrade(self: &Arc<Self>) {
        let worker = Arc::clone(self);
        self.spawn_into(&self.upgrade_worker, "upgrade", move || worker.upgrade());
    }

    fn spawn_remote_list_fetch(self: &Arc<Self>) {
        if !self.remote_list.due() {
            return;
        }
        let worker = Arc::clone(self);
        self.spawn_into(&self.remote_list_worker, "remote list", move || {
            let stop = worker.env.stop.info(StopReason::ALL);
            worker.remote_list.fetch(&worker.env.store, worker.env.requester.as_ref(), &stop);
        });
    }

    fn relaunch_upgraded(&self) -> bool {
        let host = &self.env.upgrade_host;
        let relaunched = host.current_exe().and_then(|exe| {
            info!(exe = %exe.display(), "relaunching upgraded client");
            host.relaunch(&exe)
        });
        match relaunched {
            Ok(()) => {
                self.env.notifier.quit();
                true
            }
            Err(e) => {
                warn!(error = %e, "relaunch failed; continuing with the running version");
                self.shared.lock().upgrade_pending = false;
                false
            }
        }
    }

    fn upgrade(self: Arc<Self>) {
        info!("upgrade worker: enter");
        self.env.notifier.user_message("Downloading new version...");
        let stop = self.env.stop.info(StopReason::ALL);
        let (session, path, transport) = {
            let shared = self.shared.lock();
            let path = RequestPaths::new(&self.env.config.identity, &shared.session).download();
            (shared.session.clone(), path, shared.transport.clone())
        };

        let req = server_request::build(&session, path, transport.as_deref());
        let started = Instant::now();
        let download = match self.env.requester.request(&req, &stop) {
            Ok(b) => b,
            Err(e) => {
                // servers stay backwards compatible; fail-over would only expose more of them
                if !e.is_stopped() {
                    info!(error = %e, "upgrade download failed; staying on this version");
                }
                info!("upgrade worker: exit");
                return;
            }
        };
        self.env.notifier.user_message("Download complete");
        self.report_speed(&session, transport.as_deref(), "", "download", "", started.elapsed(), download.len(), &stop);
        self.pave_upgrade(&download);
        info!("upgrade worker: exit");
    }

    fn pave_upgrade(&self, download: &[u8]) {
        let mut shared = self.shared.lock();
        let exe = match self.env.upgrade_host.current_exe() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "cannot locate running executable");
                return;
            }
        };
        match upgrade::pave(&exe, download) {
            Ok(()) => shared.upgrade_pending = true,
            Err(e) => warn!(error = %e, "upgrade aborted"),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn report_speed(
        &self,
        session: &SessionInfo,
        transport: Option<&dyn Transport>,
        relay_protocol: &str,
        operation: &str,
        info: &str,
        elapsed: Duration,
        size: usize,
        stop: &StopInfo,
    ) {
        let path = RequestPaths::new(&self.env.config.identity, session)
            .speed(relay_protocol, operation, info, elapsed.as_millis(), size);
        let req = server_request::build(session, path, transport);
        if let Err(e) = self.env.requester.request(&req, stop) {
            debug!(operation, error = %e, "speed report not delivered");
        }
    }

    fn post_connect(&self, session: &SessionInfo, transport: &dyn Transport, stop: &StopInfo) {
        self.set_state(ConnectionState::Connected);

        let last_connected = self
            .env
            .settings
            .read_value(LAST_CONNECTED_KEY)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "None".to_string());
        let path = RequestPaths::new(&self.env.config.identity, session).connected(
            transport.protocol_name(),
            &transport.session_id(session),
            &last_connected,
        );
        let started = Instant::now();
        match self.env.requester.request(&server_request::build(session, path, Some(transport)), stop) {
            Ok(response) => {
                let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
                if let Err(e) = self.env.settings.write_value(LAST_CONNECTED_KEY, &now) {
                    warn!(error = %e, "cannot record last connected time");
                }
                self.report_speed(
                    session,
                    Some(transport),
                    transport.protocol_name(),
                    "connected",
                    "",
                    started.elapsed(),
                    response.len(),
                    stop,
                );
                let routes = decompress_routes(&response);
                let start_split = {
                    let mut shared = self.shared.lock();
                    shared.split_tunnel_routes = routes;
                    shared.start_split_tunnel
                };
                if start_split {
                    self.start_split_tunnel();
                }
            }
            Err(e) if e.is_stopped() => {}
            Err(e) => warn!(error = %e, "connected request failed"),
        }

        self.open_home_pages(&self.env.config.default_home_page);

        if let Some(target) = session.speed_test() {
            let mut req = HttpRequest::get(&target.server_address, target.server_port, &target.request_path);
            req.proxy = ProxyMode::Direct;
            let started = Instant::now();
            let (op, size) = match self.env.requester.request(&req, stop) {
                Ok(b) => ("speed_test", b.len()),
                Err(e) => {
                    debug!(error = %e, "untunnelled speed test failed");
                    ("speed_test_failure", 0)
                }
            };
            self.report_speed(
                session,
                Some(transport),
                transport.protocol_name(),
                op,
                &target.url(),
                started.elapsed(),
                size,
                stop,
            );
        }
    }

    fn start_split_tunnel(&self) {
        let shared = self.shared.lock();
        if let Err(e) = self.route_file.write(&shared.split_tunnel_routes) {
            warn!(error = %e, path = %self.route_file.path().display(), "cannot write split tunnel routes");
        }
    }

    fn open_home_pages(&self, default_url: &str) {
        if self.env.settings.skip_browser() {
            debug!("skip browser set; not opening home pages");
            return;
        }
        let mut pages = self.shared.lock().session.homepages().to_vec();
        if pages.is_empty() && !default_url.is_empty() {
            pages.push(default_url.to_string());
        }
        if !pages.is_empty() {
            self.env.notifier.open_browser(&pages);
        }
    }

    fn send_status_message(&self, final_report: bool, report: &StatusReport) -> bool {
        let (session, transport) = {
            let shared = self.shared.lock();
            (shared.session.clone(), shared.transport.clone())
        };
        let Some(transport) = transport else { return false };
        let session_id = transport.session_id(&session);
        let Some(path) = RequestPaths::new(&self.env.config.identity, &session).status(
            transport.protocol_name(),
            &session_id,
            !final_report,
        ) else {
            debug!("no transport session id; status not sent");
            return false;
        };
        let body = match report.to_json() {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "status encode failed");
                return false;
            }
        };
        let mask = if final_report { StopReason::NONE } else { StopReason::ALL };
        let req = server_request::build_with_body(&session, path, Some(transport.as_ref()), RequestBody::json(body));
        match self.env.requester.request(&req, &self.env.stop.info(mask)) {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "status not delivered");
                false
            }
        }
    }
}
