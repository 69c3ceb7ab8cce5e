// SPDX-License-Identifier: MIT
//
// Global channel id -> channel map (spec.md §3 "Channel Registry", §8
// "Channel id allocation"). Generalizes the original driver's `idr_alloc`
// over a reserved range `[1, dynamic_start)` and a dynamic range
// `[dynamic_start, MAX]`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::{Channel, OwnerTag};
use crate::error::{CmError, Result};

pub struct ChannelRegistry {
    dynamic_start: u16,
    channels: Mutex<HashMap<u16, Arc<Channel>>>,
}

impl ChannelRegistry {
    pub fn new(dynamic_start: u16) -> Self {
        Self { dynamic_start, channels: Mutex::new(HashMap::new()) }
    }

    /// Allocate a new channel. `requested_id` of `Some(0)` or `None` asks
    /// for an id auto-picked starting at the dynamic range; any other
    /// explicit id is accepted anywhere in `[1, u16::MAX]` as long as it's
    /// free — the reserved/dynamic split only constrains where
    /// *auto*-allocation starts, it doesn't forbid an explicit id above it
    /// (matches `riocm_ch_alloc`'s `idr_alloc(&ch_idr, ch, ch_num, ch_num +
    /// 1, ...)`, which takes any nonzero `ch_num` as-is). An id already
    /// taken returns [`CmError::Busy`] (spec.md §8 scenario 6).
    pub fn allocate(
        &self,
        requested_id: Option<u16>,
        rx_ring_size: usize,
        owner_tag: Option<OwnerTag>,
    ) -> Result<Arc<Channel>> {
        let mut channels = self.channels.lock();
        let id = match requested_id {
            None | Some(0) => {
                let mut candidate = self.dynamic_start;
                loop {
                    if !channels.contains_key(&candidate) {
                        break candidate;
                    }
                    if candidate == u16::MAX {
                        return Err(CmError::NoMemory);
                    }
                    candidate += 1;
                }
            }
            Some(id) => {
                if channels.contains_key(&id) {
                    return Err(CmError::Busy);
                }
                id
            }
        };
        let channel = Channel::new(id, rx_ring_size, owner_tag);
        channels.insert(id, channel.clone());
        Ok(channel)
    }

    pub fn lookup(&self, id: u16) -> Option<Arc<Channel>> {
        self.channels.lock().get(&id).cloned()
    }

    /// Atomically remove and return the channel at `id`. Two concurrent
    /// teardown paths (local close vs. an inbound CONN_CLOSE) racing on the
    /// same id: exactly one of them gets `Some` back, the other observes
    /// the channel already gone and no-ops (spec.md §5 lock ordering note).
    pub fn remove(&self, id: u16) -> Option<Arc<Channel>> {
        self.channels.lock().remove(&id)
    }

    pub fn ids(&self) -> Vec<u16> {
        self.channels.lock().keys().copied().collect()
    }

    pub fn all(&self) -> Vec<Arc<Channel>> {
        self.channels.lock().values().cloned().collect()
    }
}
