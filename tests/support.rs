// SPDX-License-Identifier: MIT
//
// In-memory loopback transport standing in for a real RapidIO mailbox
// driver, shared by the integration tests under `tests/`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cm::config::Config;
use cm::manager::Manager;
use cm::transport::{MailboxDriver, PeerHandle, PortEvents, TxSlot};
use cm::Result;

pub struct LoopbackTransport {
    peer: Mutex<Option<(u8, Arc<dyn PortEvents>)>>,
    self_events: Mutex<Option<Arc<dyn PortEvents>>>,
    next_slot: AtomicUsize,
    drop_outbound: AtomicBool,
}

impl LoopbackTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            peer: Mutex::new(None),
            self_events: Mutex::new(None),
            next_slot: AtomicUsize::new(0),
            drop_outbound: AtomicBool::new(false),
        })
    }

    pub fn connect_peer(&self, peer_port_id: u8, events: Arc<dyn PortEvents>) {
        *self.peer.lock().unwrap() = Some((peer_port_id, events));
    }

    pub fn set_self_events(&self, events: Arc<dyn PortEvents>) {
        *self.self_events.lock().unwrap() = Some(events);
    }

    /// Simulate a peer that has stopped responding: outbound frames are
    /// accepted (and the sender's TX slot completes) but never delivered.
    pub fn set_drop_outbound(&self, drop: bool) {
        self.drop_outbound.store(drop, Ordering::Relaxed);
    }
}

impl MailboxDriver for LoopbackTransport {
    fn reserve_outbound(&self, _port_id: u8, _mailbox: u8) -> Result<()> {
        Ok(())
    }

    fn reserve_inbound(&self, _port_id: u8, _mailbox: u8) -> Result<()> {
        Ok(())
    }

    fn release_outbound(&self, _port_id: u8, _mailbox: u8) {}

    fn release_inbound(&self, _port_id: u8, _mailbox: u8) {}

    fn post_inbound_buffer(&self, _port_id: u8, _mailbox: u8) -> Result<()> {
        Ok(())
    }

    fn post_outbound(&self, port_id: u8, _mailbox: u8, _peer: PeerHandle, bytes: &[u8]) -> Result<TxSlot> {
        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        if !self.drop_outbound.load(Ordering::Relaxed) {
            let peer = self.peer.lock().unwrap().clone();
            if let Some((peer_port_id, events)) = peer {
                events.on_inbound(peer_port_id, bytes.to_vec());
            }
        }
        let mine = self.self_events.lock().unwrap().clone();
        if let Some(events) = mine {
            events.on_outbound_complete(port_id, slot);
        }
        Ok(slot)
    }
}

/// Two managers, one port each, wired to each other over a loopback
/// transport, with each already registered as the other's peer.
pub struct Pair {
    pub a: Manager,
    pub b: Manager,
    pub transport_a: Arc<LoopbackTransport>,
    pub transport_b: Arc<LoopbackTransport>,
}

pub const PORT_A: u8 = 1;
pub const PORT_B: u8 = 2;
pub const DESTID_A: u32 = 10;
pub const DESTID_B: u32 = 20;

pub fn setup_pair() -> Pair {
    setup_pair_with(Config::default())
}

pub fn setup_pair_with(config: Config) -> Pair {
    let _ = env_logger::try_init();

    let a = Manager::new(config.clone()).expect("manager a");
    let b = Manager::new(config).expect("manager b");

    let transport_a = LoopbackTransport::new();
    let transport_b = LoopbackTransport::new();

    a.add_port(PORT_A, DESTID_A, transport_a.clone()).expect("add port a");
    b.add_port(PORT_B, DESTID_B, transport_b.clone()).expect("add port b");

    transport_a.connect_peer(PORT_B, b.events());
    transport_a.set_self_events(a.events());
    transport_b.connect_peer(PORT_A, a.events());
    transport_b.set_self_events(b.events());

    a.add_peer(PORT_A, DESTID_B, PeerHandle(DESTID_B as u64)).expect("add peer b");
    b.add_peer(PORT_B, DESTID_A, PeerHandle(DESTID_A as u64)).expect("add peer a");

    Pair { a, b, transport_a, transport_b }
}
