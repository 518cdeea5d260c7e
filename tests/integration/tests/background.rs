//! Background workers hanging off a connection: client upgrade, feedback
//! submission and the signed remote server list refresh.

mod common;

use std::fs;

use common::{eventually, Behavior, MockRequester, Setup, TRANSPORT, WAIT};
use conn_manager::upgrade::archive_path;
use conn_manager::{ConnectionState, RequestError, StopReason};
use server_list::SignedServerList;

fn upgrade_requester(download: Result<&'static [u8], u16>) -> MockRequester {
    MockRequester::new(move |req, _| {
        if req.path.starts_with("/handshake?") {
            Ok(b"SSHSessionID: s1\nUpgrade: 2\n".to_vec())
        } else if req.path.starts_with("/download?") {
            download.map(<[u8]>::to_vec).map_err(RequestError::Status)
        } else {
            Ok(Vec::new())
        }
    })
}

#[test]
fn upgrade_is_paved_then_relaunched_on_next_start() {
    let h = Setup::new(&["A"]).requester(upgrade_requester(Ok(b"new-binary"))).handshake().build();

    h.manager.start(TRANSPORT, false).unwrap();
    assert!(eventually(WAIT, || h.manager.upgrade_pending()));

    assert_eq!(fs::read(h.exe()).unwrap(), b"new-binary");
    assert_eq!(fs::read(archive_path(h.exe())).unwrap(), b"old-binary");
    assert!(h.notifier.saw_message("Downloading new version..."));
    assert!(h.notifier.saw_message("Download complete"));

    // the download names the advertised version, not ours
    let download = h.requester.paths_starting("/download?");
    assert_eq!(download.len(), 1);
    assert!(download[0].contains("client_version=2"));
    assert!(h
        .requester
        .paths_starting("/speed?")
        .iter()
        .any(|p| p.contains("operation=download") && p.contains("relay_protocol=&")));

    h.manager.stop(StopReason::USER_DISCONNECT);
    h.manager.start(TRANSPORT, false).unwrap();
    assert!(eventually(WAIT, || *h.notifier.quits.lock() == 1));
    assert!(eventually(WAIT, || h.notifier.last_state() == Some(ConnectionState::Stopped)));

    assert_eq!(*h.upgrade_host.relaunched.lock(), [h.exe().to_path_buf()]);
    assert_eq!(h.transport.attempts(), ["A"]);
}

#[test]
fn failed_download_keeps_running_version() {
    let h = Setup::new(&["A"]).requester(upgrade_requester(Err(500))).handshake().build();

    h.manager.start(TRANSPORT, false).unwrap();
    assert!(eventually(WAIT, || !h.requester.paths_starting("/download?").is_empty()));
    // joins the upgrade worker
    h.manager.stop(StopReason::USER_DISCONNECT);

    assert!(!h.manager.upgrade_pending());
    assert_eq!(fs::read(h.exe()).unwrap(), b"old-binary");
    assert!(!archive_path(h.exe()).exists());
    assert!(!h.notifier.saw_message("Download complete"));
    // a failed download does not push the client onto another server
    assert!(!h.notifier.saw_message("Trying next server..."));
    assert_eq!(h.transport.attempts(), ["A"]);
}

#[test]
fn feedback_while_stopped_reports_result() {
    let h = Setup::new(&["A"]).build();

    h.manager.send_feedback("hello");
    assert!(eventually(WAIT, || !h.notifier.feedback.lock().is_empty()));

    assert_eq!(*h.notifier.feedback.lock(), [true]);
    let req = h.requester.requests().into_iter().find(|r| r.path.starts_with("/feedback?")).unwrap();
    assert!(req.path.contains("connected=0"));
    let body = req.body.unwrap();
    assert_eq!(body.content_type, "application/json");
    let json: serde_json::Value = serde_json::from_slice(&body.data).unwrap();
    assert_eq!(json["feedback"], "hello");
}

#[test]
fn feedback_over_a_connected_session() {
    let h = Setup::new(&["A"]).build();
    h.manager.start(TRANSPORT, false).unwrap();
    assert!(h.wait_state(ConnectionState::Connected));

    h.manager.send_feedback("works");
    assert!(eventually(WAIT, || !h.notifier.feedback.lock().is_empty()));

    let path = h.requester.paths_starting("/feedback?").remove(0);
    assert!(path.contains("connected=1"));
    assert!(path.contains("relay_protocol=MOCK"));
    assert!(path.contains("session_id=mock-session"));
}

#[test]
fn feedback_failure_is_reported() {
    let requester = MockRequester::new(|req, _| {
        if req.path.starts_with("/feedback?") {
            Err(RequestError::Failed("connection reset".into()))
        } else {
            Ok(Vec::new())
        }
    });
    let h = Setup::new(&["A"]).requester(requester).build();

    h.manager.send_feedback("hello");
    assert!(eventually(WAIT, || !h.notifier.feedback.lock().is_empty()));
    assert_eq!(*h.notifier.feedback.lock(), [false]);
}

#[test]
fn remote_list_refresh_adds_servers_after_failure() {
    let seed = [9u8; 32];
    let pk = hex::encode(core_crypto::ed25519::public_key(&seed).unwrap());
    let signed = serde_json::to_vec(&SignedServerList::sign(&seed, common::encoded("B")).unwrap()).unwrap();

    let requester = MockRequester::new(move |req, _| {
        if req.host == "lists.example" && req.path == "/server_list" {
            Ok(signed.clone())
        } else {
            Ok(Vec::new())
        }
    });
    let mut setup = Setup::new(&["A"]).requester(requester);
    setup.remote_list.host = "lists.example".into();
    setup.remote_list.public_key_hex = pk;
    let h = setup.build();
    h.transport.set("A", Behavior::Retry);

    h.manager.start(TRANSPORT, false).unwrap();
    assert!(h.wait_state(ConnectionState::Connected));

    assert_eq!(h.transport.attempts().first().map(String::as_str), Some("A"));
    assert_eq!(h.transport.attempts().last().map(String::as_str), Some("B"));
    assert_eq!(h.addresses()[0], "B");
    assert!(h.addresses().contains(&"A".to_string()));

    // one fetch per cooldown window
    let fetches = h.requester.requests().iter().filter(|r| r.host == "lists.example").count();
    assert_eq!(fetches, 1);
}

#[test]
fn remote_list_with_bad_signature_is_ignored() {
    let seed = [9u8; 32];
    let other = hex::encode(core_crypto::ed25519::public_key(&[3u8; 32]).unwrap());
    let signed = serde_json::to_vec(&SignedServerList::sign(&seed, common::encoded("B")).unwrap()).unwrap();

    let requester = MockRequester::new(move |req, _| {
        if req.host == "lists.example" {
            Ok(signed.clone())
        } else {
            Ok(Vec::new())
        }
    });
    let mut setup = Setup::new(&["A"]).requester(requester);
    setup.remote_list.host = "lists.example".into();
    setup.remote_list.public_key_hex = other;
    let h = setup.build();
    h.transport.set("A", Behavior::Retry);

    h.manager.start(TRANSPORT, false).unwrap();
    assert!(eventually(WAIT, || h.requester.requests().iter().any(|r| r.host == "lists.example")));
    assert!(eventually(WAIT, || h.transport.attempts().len() >= 3));
    h.manager.stop(StopReason::USER_DISCONNECT);

    assert_eq!(h.addresses(), ["A"]);
    assert!(h.transport.attempts().iter().all(|a| a == "A"));
}
