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
fn rx_ring_drops_the_frame_once_full() {
    let pair = setup_pair();
    let (connect_id, accepted_id) = connect_channel_pair(&pair);

    // Default rx_ring_size is 128: the 129th unread frame must be dropped.
    for i in 0u32..129 {
        pair.a.send(connect_id, &i.to_le_bytes()).unwrap();
    }

    let mut received = 0;
    loop {
        match pair.b.receive(accepted_id, Some(Duration::ZERO), None) {
            Ok((buf_id, _payload)) => {
                pair.b.release_receive_buffer(accepted_id, buf_id).unwrap();
                received += 1;
            }
            Err(CmError::WouldBlock) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(received, 128);
}
