//! Start/stop lifecycle and the post-connect sequence.
//!
//! These scenarios drive the public `ConnectionManager` surface the way a
//! UI would: start, toggle, stop with different reasons, and report final
//! statistics after the user has already asked to disconnect.

mod common;

use std::io::Write;
use std::sync::atomic::Ordering;

use common::{eventually, MockRequester, Setup, TRANSPORT, WAIT};
use conn_manager::settings::LAST_CONNECTED_KEY;
use conn_manager::{ConnectionState, SettingsStore, StatusReport, StopReason};
use flate2::write::ZlibEncoder;
use flate2::Compression;

fn zlib(text: &str) -> Vec<u8> {
    let mut e = ZlibEncoder::new(Vec::new(), Compression::default());
    e.write_all(text.as_bytes()).unwrap();
    e.finish().unwrap()
}

#[test]
fn stop_waits_for_the_worker() {
    let h = Setup::new(&["A"]).build();
    h.manager.start(TRANSPORT, false).unwrap();
    assert!(h.wait_state(ConnectionState::Connected));

    h.manager.stop(StopReason::USER_DISCONNECT);

    // worker observed cancellation and exited before stop returned
    assert!(h.transport.observed_cancel.load(Ordering::SeqCst));
    assert!(!h.transport.connected.load(Ordering::SeqCst));
    assert_eq!(h.manager.state(), ConnectionState::Stopped);
    assert_eq!(
        *h.notifier.states.lock(),
        [ConnectionState::Starting, ConnectionState::Connected, ConnectionState::Stopped]
    );
}

#[test]
fn stop_is_idempotent() {
    let h = Setup::new(&["A"]).build();
    h.manager.stop(StopReason::USER_DISCONNECT);
    h.manager.stop(StopReason::USER_DISCONNECT);
    assert_eq!(h.manager.state(), ConnectionState::Stopped);
    assert!(h.notifier.states.lock().is_empty());
}

#[test]
fn start_while_connected_reconnects() {
    let h = Setup::new(&["A"]).build();
    h.manager.start(TRANSPORT, false).unwrap();
    assert!(h.wait_state(ConnectionState::Connected));

    h.manager.start(TRANSPORT, false).unwrap();
    assert!(eventually(WAIT, || h.transport.attempts().len() == 2));
    assert!(h.wait_state(ConnectionState::Connected));
    assert_eq!(h.transport.attempts(), ["A", "A"]);
}

#[test]
fn toggle_flips_between_started_and_stopped() {
    let h = Setup::new(&["A"]).build();
    h.manager.toggle(TRANSPORT, false).unwrap();
    assert!(h.wait_state(ConnectionState::Connected));

    h.manager.toggle(TRANSPORT, false).unwrap();
    assert_eq!(h.manager.state(), ConnectionState::Stopped);
    assert_eq!(h.transport.attempts(), ["A"]);
}

#[test]
fn exit_is_sticky_across_start() {
    let h = Setup::new(&["A"]).build();
    h.manager.stop(StopReason::EXIT);

    h.manager.start(TRANSPORT, false).unwrap();
    assert!(eventually(WAIT, || h.notifier.last_state() == Some(ConnectionState::Stopped)));
    assert!(h.transport.attempts().is_empty());
}

#[test]
fn unknown_transport_is_rejected() {
    let h = Setup::new(&["A"]).build();
    assert!(matches!(
        h.manager.start("carrier-pigeon", false),
        Err(conn_manager::Error::UnknownTransport(_))
    ));
    assert_eq!(h.manager.state(), ConnectionState::Stopped);
}

#[test]
fn post_connect_reports_and_applies_routes() {
    let routes = "10.0.0.0\t255.0.0.0\n192.168.0.0\t255.255.0.0\n";
    let compressed = zlib(routes);
    let requester = MockRequester::new(move |req, _| {
        if req.path.starts_with("/handshake?") {
            Ok(b"SSHSessionID: s1\nHomepage: https://home.example/\n".to_vec())
        } else if req.path.starts_with("/connected?") {
            Ok(compressed.clone())
        } else {
            Ok(Vec::new())
        }
    });
    let h = Setup::new(&["A"]).requester(requester).handshake().build();

    h.manager.start(TRANSPORT, true).unwrap();
    assert!(eventually(WAIT, || !h.notifier.browsed.lock().is_empty()));

    let connected = h.requester.paths_starting("/connected?");
    assert_eq!(connected.len(), 1);
    assert!(connected[0].contains("last_connected=None"));
    assert!(connected[0].contains("session_id=mock-session"));

    let speed = h.requester.paths_starting("/speed?");
    assert!(speed.iter().any(|p| p.contains("operation=connected") && p.contains("relay_protocol=MOCK")));

    assert!(h.settings.read_value(LAST_CONNECTED_KEY).is_some_and(|v| !v.is_empty()));
    assert_eq!(h.manager.split_tunnel_routes(), routes);
    let route_file = h.manager.route_file().path().to_path_buf();
    assert_eq!(std::fs::read_to_string(&route_file).unwrap(), routes);
    assert_eq!(*h.notifier.browsed.lock(), [vec!["https://home.example/".to_string()]]);

    // stopping removes the applied routes
    h.manager.stop(StopReason::USER_DISCONNECT);
    assert!(!route_file.exists());
}

#[test]
fn second_connection_reports_last_connected_time() {
    let h = Setup::new(&["A"]).build();
    h.manager.start(TRANSPORT, false).unwrap();
    assert!(eventually(WAIT, || !h.requester.paths_starting("/speed?").is_empty()));
    h.manager.stop(StopReason::USER_DISCONNECT);

    let stamp = h.settings.read_value(LAST_CONNECTED_KEY).unwrap();
    h.manager.start(TRANSPORT, false).unwrap();
    assert!(eventually(WAIT, || h.requester.paths_starting("/connected?").len() == 2));

    let second = &h.requester.paths_starting("/connected?")[1];
    assert!(!second.contains("last_connected=None"));
    // RFC 3339 timestamps contain ':' which is percent-encoded in the query
    assert!(second.contains(&stamp.replace(':', "%3A")));
}

#[test]
fn routes_are_kept_but_not_applied_without_split_tunnel() {
    let routes = "10.0.0.0\t255.0.0.0\n";
    let compressed = zlib(routes);
    let requester = MockRequester::new(move |req, _| {
        if req.path.starts_with("/connected?") {
            Ok(compressed.clone())
        } else {
            Ok(Vec::new())
        }
    });
    let h = Setup::new(&["A"]).requester(requester).build();

    h.manager.start(TRANSPORT, false).unwrap();
    assert!(eventually(WAIT, || h.manager.split_tunnel_routes() == routes));
    assert!(!h.manager.route_file().exists());

    h.manager.start_split_tunnel();
    assert!(h.manager.route_file().exists());
    h.manager.stop_split_tunnel();
    assert!(!h.manager.route_file().exists());
}

#[test]
fn default_home_page_used_when_handshake_has_none() {
    let mut setup = Setup::new(&["A"]);
    setup.default_home_page = "https://default.example/".into();
    let h = setup.build();

    h.manager.start(TRANSPORT, false).unwrap();
    assert!(eventually(WAIT, || !h.notifier.browsed.lock().is_empty()));
    assert_eq!(*h.notifier.browsed.lock(), [vec!["https://default.example/".to_string()]]);
}

#[test]
fn skip_browser_suppresses_home_pages() {
    let mut setup = Setup::new(&["A"]);
    setup.default_home_page = "https://default.example/".into();
    setup.settings.skip_browser = true;
    let h = setup.build();

    h.manager.start(TRANSPORT, false).unwrap();
    assert!(eventually(WAIT, || !h.requester.paths_starting("/speed?").is_empty()));
    // joining the worker lets post-connect finish
    h.manager.stop(StopReason::USER_DISCONNECT);
    assert!(h.notifier.browsed.lock().is_empty());
}

#[test]
fn final_status_survives_user_disconnect() {
    let h = Setup::new(&["A"]).build();
    h.manager.start(TRANSPORT, false).unwrap();
    assert!(h.wait_state(ConnectionState::Connected));

    h.stop.signal(StopReason::USER_DISCONNECT);
    assert!(eventually(WAIT, || h.notifier.last_state() == Some(ConnectionState::Stopped)));

    let mut report = StatusReport::default();
    report.page_views.insert("example.com".into(), 3);
    report.bytes_transferred = 1024;

    assert!(!h.manager.send_status_message(false, &report));
    assert!(h.manager.send_status_message(true, &report));

    let status: Vec<_> = h.requester.requests().into_iter().filter(|r| r.path.starts_with("/status?")).collect();
    assert_eq!(status.len(), 1);
    assert!(status[0].path.contains("connected=0"));
    let body: serde_json::Value = serde_json::from_slice(&status[0].body.as_ref().unwrap().data).unwrap();
    assert_eq!(body["bytes_transferred"], 1024);
    assert_eq!(body["page_views"][0]["page"], "example.com");
    assert_eq!(body["page_views"][0]["count"], 3);
}

#[test]
fn remote_hang_up_returns_to_stopped() {
    let h = Setup::new(&["A"]).build();
    h.manager.start(TRANSPORT, false).unwrap();
    assert!(h.wait_state(ConnectionState::Connected));

    h.transport.hang_up.store(true, Ordering::SeqCst);
    assert!(h.wait_state(ConnectionState::Stopped));
    assert!(!h.transport.observed_cancel.load(Ordering::SeqCst));

    // a fresh start is accepted once the worker has gone
    h.manager.start(TRANSPORT, false).unwrap();
    assert!(h.wait_state(ConnectionState::Connected));
    assert_eq!(h.transport.attempts(), ["A", "A"]);
}
