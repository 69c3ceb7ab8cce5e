// SPDX-License-Identifier: MIT

mod support;

use std::time::Duration;

use cm::config::Config;
use cm::CmError;
use support::{setup_pair, setup_pair_with, DESTID_B, PORT_A};

#[test]
fn connect_send_receive_and_close_round_trip() {
    let pair = setup_pair();
    let owner_a = pair.a.open_session();
    let owner_b = pair.b.open_session();

    let listen_id = pair.b.create_channel(Some(42), owner_b).unwrap();
    pair.b.bind(listen_id, support::PORT_B).unwrap();
    pair.b.listen(listen_id).unwrap();

    let connect_id = pair.a.create_channel(None, owner_a).unwrap();

    let mgr_a = pair.a.clone();
    let connector = std::thread::spawn(move || {
        mgr_a.connect(connect_id, PORT_A, DESTID_B, listen_id, Some(Duration::from_secs(2)), None)
    });

    let accepted_id = pair.b.accept(listen_id, Some(Duration::from_secs(2)), None).expect("accept");
    connector.join().unwrap().expect("connect");

    pair.a.send(connect_id, b"hello from a").unwrap();
    let (buf_id, payload) = pair.b.receive(accepted_id, Some(Duration::from_secs(1)), None).unwrap();
    assert_eq!(payload, b"hello from a");
    pair.b.release_receive_buffer(accepted_id, buf_id).unwrap();

    pair.b.send(accepted_id, b"hi a").unwrap();
    let (buf_id, payload) = pair.a.receive(connect_id, Some(Duration::from_secs(1)), None).unwrap();
    assert_eq!(payload, b"hi a");
    pair.a.release_receive_buffer(connect_id, buf_id).unwrap();

    pair.a.close_channel(connect_id, owner_a).unwrap();
    pair.b.close_channel(accepted_id, owner_b).unwrap();
    pair.b.close_channel(listen_id, owner_b).unwrap();

    assert!(matches!(pair.a.close_channel(connect_id, owner_a), Err(CmError::NotFound)));
}

#[test]
fn connect_to_nonexistent_channel_times_out_and_reverts_to_idle() {
    let pair = setup_pair_with(Config { connect_timeout: Duration::from_millis(150), ..Config::default() });
    let owner_a = pair.a.open_session();
    let connect_id = pair.a.create_channel(None, owner_a).unwrap();

    let result = pair.a.connect(connect_id, PORT_A, DESTID_B, 999, None, None);
    assert!(matches!(result, Err(CmError::Timeout)));

    // If the first attempt hadn't reverted CONNECT -> IDLE, this would fail
    // with INVALID_STATE instead of timing out again.
    let result = pair.a.connect(connect_id, PORT_A, DESTID_B, 999, Some(Duration::from_millis(50)), None);
    assert!(matches!(result, Err(CmError::Timeout)));
}

#[test]
fn accept_on_non_listening_channel_is_would_block_without_a_queued_request() {
    let pair = setup_pair();
    let owner_b = pair.b.open_session();
    let listen_id = pair.b.create_channel(None, owner_b).unwrap();
    pair.b.bind(listen_id, support::PORT_B).unwrap();
    pair.b.listen(listen_id).unwrap();

    let err = pair.b.accept(listen_id, Some(Duration::ZERO), None).unwrap_err();
    assert!(matches!(err, CmError::WouldBlock));
}
