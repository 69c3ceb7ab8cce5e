// SPDX-License-Identifier: MIT

mod support;

use std::time::Duration;

use cm::CmError;
use support::{setup_pair, DESTID_B, PORT_A, PORT_B};

fn connect_channel_pair(pair: &support::Pair) -> (u16, u16) {
    let owner_a = pair.a.open_session();
    let owner_b = pair.b.open_session();

    let listen_id = pair.b.create_channel(None, owner_b).unwrap();
    pair.b.bind(listen_id, PORT_B).unwrap();
    pair.b.listen(listen_id).unwrap();

    let connect_id = pair.a.create_channel(None, owner_a).unwrap();
    let mgr_a = pair.a.clone();
    let connector = std::thread::spawn(move || {
        mgr_a.connect(connect_id, PORT_A, DESTID_B, listen_id, Some(Duration::from_secs(2)), None)
    });
    let accepted_id = pair.b.accept(listen_id, Some(Duration::from_secs(2)), None).unwrap();
    connector.join().unwrap().unwrap();
    (connect_id, accepted_id)
}

#[test]
fn removing_a_peer_disconnects_channels_bound_to_it() {
    let pair = setup_pair();
    let owner_a = pair.a.open_session();
    let (connect_id, _accepted_id) = connect_channel_pair(&pair);

    pair.a.remove_peer(PORT_A, DESTID_B).unwrap();

    let err = pair.a.send(connect_id, b"x").unwrap_err();
    assert!(matches!(err, CmError::InvalidState));

    // A disconnected channel is still closeable.
    pair.a.close_channel(connect_id, owner_a).unwrap();
}

#[test]
fn removing_a_port_disconnects_channels_bound_to_it() {
    let pair = setup_pair();
    let owner_a = pair.a.open_session();
    let (connect_id, _accepted_id) = connect_channel_pair(&pair);

    pair.a.remove_port(PORT_A);

    let err = pair.a.send(connect_id, b"x").unwrap_err();
    assert!(matches!(err, CmError::InvalidState));

    pair.a.close_channel(connect_id, owner_a).unwrap();
}

#[test]
fn shutdown_sends_one_close_per_connected_channel() {
    let pair = setup_pair();
    let mut b_ids = Vec::new();
    for _ in 0..3 {
        let (_connect_id, accepted_id) = connect_channel_pair(&pair);
        b_ids.push(accepted_id);
    }

    pair.a.shutdown();

    for id in b_ids {
        let err = pair.b.send(id, b"x").unwrap_err();
        assert!(matches!(err, CmError::InvalidState));
    }
}

#[test]
fn close_is_idempotent_under_a_concurrent_peer_close() {
    let pair = setup_pair();
    let owner_a = pair.a.open_session();
    let (connect_id, accepted_id) = connect_channel_pair(&pair);
    let owner_b = pair.b.open_session();

    pair.a.close_channel(connect_id, owner_a).unwrap();
    // Give the control-plane worker a moment to deliver CONN_CLOSE.
    std::thread::sleep(Duration::from_millis(50));

    // b's channel is now DISCONNECT, not yet destroyed; closing it still
    // works exactly once.
    pair.b.close_channel(accepted_id, owner_b).unwrap();
    assert!(matches!(pair.b.close_channel(accepted_id, owner_b), Err(CmError::NotFound)));
}
