// SPDX-License-Identifier: MIT
//
// Peer Directory (spec.md §3, §4.7). Per-port list of known remote
// endpoints, consulted by connect/accept and maintained by add/remove.

use parking_lot::RwLock;

use crate::transport::PeerHandle;

/// A remote endpoint known to a port as participating in the channel manager.
#[derive(Debug, Clone, Copy)]
pub struct Peer {
    pub destid: u32,
    pub handle: PeerHandle,
}

/// Reader/writer-locked list of peers attached to one port. Shared lookups
/// during connect/accept; exclusive add/remove.
#[derive(Default)]
pub struct PeerDirectory {
    peers: RwLock<Vec<Peer>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self { peers: RwLock::new(Vec::new()) }
    }

    /// Attach a newly announced peer. Idempotent on an already-attached destid.
    pub fn add(&self, destid: u32, handle: PeerHandle) {
        let mut guard = self.peers.write();
        if guard.iter().any(|p| p.destid == destid) {
            return;
        }
        guard.push(Peer { destid, handle });
    }

    /// Detach a peer by destid. Returns the removed entry, if any.
    pub fn remove(&self, destid: u32) -> Option<Peer> {
        let mut guard = self.peers.write();
        let idx = guard.iter().position(|p| p.destid == destid)?;
        Some(guard.remove(idx))
    }

    /// Look up a peer by destid.
    pub fn find(&self, destid: u32) -> Option<Peer> {
        self.peers.read().iter().find(|p| p.destid == destid).copied()
    }

    /// Whether `handle` still names an attached peer.
    pub fn contains_handle(&self, handle: PeerHandle) -> bool {
        self.peers.read().iter().any(|p| p.handle == handle)
    }

    /// All known destids, for `list_peers`.
    pub fn destids(&self) -> Vec<u32> {
        self.peers.read().iter().map(|p| p.destid).collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
