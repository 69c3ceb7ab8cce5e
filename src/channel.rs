// SPDX-License-Identifier: MIT
//
// The channel object and its state machine (spec.md §3, §4.2). Mirrors the
// original driver's `rio_channel` plus its kref/completion lifetime,
// translated into `Arc` for the refcount and a separately-held
// [`ReleaseSignal`] for the "freed later, by the waiter" half of that
// pattern.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::cancel::{CancelToken, Notify};
use crate::error::{CmError, Result};
use crate::port::Port;
use crate::transport::PeerHandle;

/// Opaque identifier of the user-facing session that created a channel.
/// `close_channel` compares this against the caller's tag (spec.md §6).
pub type OwnerTag = u64;

/// Channel lifecycle states (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Bound,
    Listen,
    Connect,
    Connected,
    Disconnect,
    Destroying,
}

/// A queued inbound `CONN_REQ`, waiting for `accept()` (spec.md §4.2).
#[derive(Clone)]
pub struct ConnReq {
    pub src_destid: u32,
    pub src_ch: u16,
    pub port: std::sync::Weak<Port>,
}

/// Handle to a buffer handed to the consumer by `receive`, returned to
/// `release_receive_buffer` (spec.md §4.3 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

/// Bounded pool of received payloads plus the set handed out to the consumer
/// but not yet released (spec.md §3 "rx_ring", §4.3).
///
/// Invariant: `queue.len() + inuse.len() <= capacity`.
struct RxRing {
    capacity: usize,
    queue: VecDeque<Vec<u8>>,
    inuse: std::collections::HashMap<u64, Vec<u8>>,
    next_id: u64,
}

impl RxRing {
    fn new(capacity: usize) -> Self {
        Self { capacity, queue: VecDeque::new(), inuse: std::collections::HashMap::new(), next_id: 0 }
    }

    /// Enqueue a received payload. Returns `false` (frame dropped) if the
    /// ring is already at capacity (spec.md §8 "RX ring overflow").
    fn push(&mut self, buf: Vec<u8>) -> bool {
        if self.queue.len() + self.inuse.len() >= self.capacity {
            return false;
        }
        self.queue.push_back(buf);
        true
    }

    /// Hand the oldest queued payload to the consumer, tracking it as
    /// in-use. `None` if nothing is queued.
    fn pop_for_consumer(&mut self) -> Option<(BufferId, Vec<u8>)> {
        let buf = self.queue.pop_front()?;
        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.inuse.insert(id.0, buf.clone());
        Some((id, buf))
    }

    fn inuse_full(&self) -> bool {
        self.inuse.len() >= self.capacity
    }

    fn release(&mut self, id: BufferId) -> bool {
        self.inuse.remove(&id.0).is_some()
    }
}

/// Signals channel teardown: `close()` clones this out of the [`Channel`]
/// before dropping its own `Arc`, so it can still observe completion after
/// the channel itself has been freed — the Rust shape of kref + completion.
pub struct ReleaseSignal {
    done: Mutex<bool>,
    cond: Condvar,
}

impl ReleaseSignal {
    fn new() -> Arc<Self> {
        Arc::new(Self { done: Mutex::new(false), cond: Condvar::new() })
    }

    fn complete(&self) {
        *self.done.lock() = true;
        self.cond.notify_all();
    }

    /// Block up to `timeout` for completion. Returns `true` if completed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut done = self.done.lock();
        let deadline = Instant::now() + timeout;
        while !*done {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.cond.wait_for(&mut done, deadline - now);
        }
        *done
    }
}

struct Guarded {
    state: ChannelState,
    local_destid: u32,
    remote_destid: u32,
    remote_channel_id: u16,
    port: Option<std::sync::Weak<Port>>,
    peer_handle: Option<PeerHandle>,
    rx_ring: RxRing,
    accept_queue: VecDeque<ConnReq>,
    owner_tag: Option<OwnerTag>,
}

/// A channel. Always held as `Arc<Channel>` once registered; `id` is
/// immutable for the channel's lifetime, everything else lives behind
/// `guarded` and is only ever touched with the lock held.
pub struct Channel {
    pub id: u16,
    guarded: Mutex<Guarded>,
    cond: Condvar,
    release: Arc<ReleaseSignal>,
    self_weak: std::sync::Weak<Channel>,
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.release.complete();
    }
}

/// Lets a [`CancelToken`] wake a caller parked on this channel's `Condvar`.
impl Notify for Channel {
    fn notify(&self) {
        self.cond.notify_all();
    }
}

impl Channel {
    pub fn new(id: u16, rx_ring_size: usize, owner_tag: Option<OwnerTag>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id,
            guarded: Mutex::new(Guarded {
                state: ChannelState::Idle,
                local_destid: 0,
                remote_destid: 0,
                remote_channel_id: 0,
                port: None,
                peer_handle: None,
                rx_ring: RxRing::new(rx_ring_size),
                accept_queue: VecDeque::new(),
                owner_tag,
            }),
            cond: Condvar::new(),
            release: ReleaseSignal::new(),
            self_weak: weak.clone(),
        })
    }

    pub fn release_signal(&self) -> Arc<ReleaseSignal> {
        self.release.clone()
    }

    pub fn state(&self) -> ChannelState {
        self.guarded.lock().state
    }

    pub fn owner_tag(&self) -> Option<OwnerTag> {
        self.guarded.lock().owner_tag
    }

    pub fn remote_destid(&self) -> u32 {
        self.guarded.lock().remote_destid
    }

    pub fn port(&self) -> Option<Arc<Port>> {
        self.guarded.lock().port.as_ref().and_then(|w| w.upgrade())
    }

    /// Generic wait: repeatedly evaluates `f` under the lock, blocking on
    /// the condvar between attempts, until `f` yields a value, errors, the
    /// deadline (if any) elapses, or `cancel` fires. Every wake re-evaluates
    /// `f` before concluding anything — no lost wakeups, no stale reads
    /// (spec.md §5).
    fn wait_until<T>(
        &self,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
        mut f: impl FnMut(&mut Guarded) -> Result<Option<T>>,
    ) -> Result<T> {
        if let Some(c) = cancel {
            // A wait with no deadline parks on `self.cond` indefinitely;
            // register so `cancel()` can wake it instead of it sitting
            // there until some unrelated event happens to notify.
            c.register(self.self_weak.clone());
        }
        let mut g = self.guarded.lock();
        loop {
            if let Some(c) = cancel {
                if c.is_cancelled() {
                    return Err(CmError::Interrupted);
                }
            }
            if let Some(v) = f(&mut g)? {
                return Ok(v);
            }
            match deadline {
                None => self.cond.wait(&mut g),
                Some(dl) => {
                    let now = Instant::now();
                    if now >= dl {
                        return Err(CmError::Timeout);
                    }
                    let timed_out = self.cond.wait_for(&mut g, dl - now).timed_out();
                    if timed_out {
                        // One last look before declaring a timeout: the
                        // event and the deadline may have raced.
                        if let Some(v) = f(&mut g)? {
                            return Ok(v);
                        }
                        return Err(CmError::Timeout);
                    }
                }
            }
        }
    }

    // --- bind / listen -----------------------------------------------

    pub fn bind(&self, port: std::sync::Weak<Port>, local_destid: u32) -> Result<()> {
        let mut g = self.guarded.lock();
        if g.state != ChannelState::Idle {
            return Err(CmError::InvalidState);
        }
        g.port = Some(port);
        g.local_destid = local_destid;
        g.state = ChannelState::Bound;
        Ok(())
    }

    pub fn listen(&self) -> Result<()> {
        let mut g = self.guarded.lock();
        if g.state != ChannelState::Bound {
            return Err(CmError::InvalidState);
        }
        g.state = ChannelState::Listen;
        Ok(())
    }

    // --- inbound CONN_REQ / accept -------------------------------------

    /// Queue an inbound connect request. Dropped silently if the channel is
    /// not listening (spec.md §4.2 "not LISTEN: drop, log").
    pub fn push_conn_req(&self, req: ConnReq) -> bool {
        let mut g = self.guarded.lock();
        if g.state != ChannelState::Listen {
            return false;
        }
        g.accept_queue.push_back(req);
        self.cond.notify_one();
        true
    }

    pub fn accept(&self, deadline: Option<Instant>, cancel: Option<&CancelToken>) -> Result<ConnReq> {
        self.wait_until(deadline, cancel, |g| {
            if let Some(req) = g.accept_queue.pop_front() {
                return Ok(Some(req));
            }
            if g.state != ChannelState::Listen {
                return Err(CmError::InvalidState);
            }
            Ok(None)
        })
    }

    pub fn try_accept(&self) -> Result<ConnReq> {
        let mut g = self.guarded.lock();
        g.accept_queue.pop_front().ok_or(CmError::WouldBlock)
    }

    /// Finish accepting: move this (freshly allocated) channel straight to
    /// CONNECTED, bound to the same port as its listening parent.
    pub fn complete_accept(
        &self,
        port: std::sync::Weak<Port>,
        local_destid: u32,
        remote_destid: u32,
        remote_channel_id: u16,
        peer_handle: PeerHandle,
    ) {
        let mut g = self.guarded.lock();
        g.port = Some(port);
        g.local_destid = local_destid;
        g.remote_destid = remote_destid;
        g.remote_channel_id = remote_channel_id;
        g.peer_handle = Some(peer_handle);
        g.state = ChannelState::Connected;
    }

    // --- outbound connect / CONN_ACK ------------------------------------

    /// IDLE -> CONNECT, recording the destination. Fails if not IDLE.
    pub fn begin_connect(
        &self,
        port: std::sync::Weak<Port>,
        local_destid: u32,
        remote_destid: u32,
        remote_channel_id: u16,
        peer_handle: PeerHandle,
    ) -> Result<()> {
        let mut g = self.guarded.lock();
        if g.state != ChannelState::Idle {
            return Err(CmError::InvalidState);
        }
        g.port = Some(port);
        g.local_destid = local_destid;
        g.remote_destid = remote_destid;
        g.remote_channel_id = remote_channel_id;
        g.peer_handle = Some(peer_handle);
        g.state = ChannelState::Connect;
        Ok(())
    }

    /// CONNECT -> IDLE, used when the request couldn't be sent or the wait
    /// timed out with no CONN_ACK ever arriving.
    pub fn revert_connect(&self) {
        let mut g = self.guarded.lock();
        if g.state == ChannelState::Connect {
            g.state = ChannelState::Idle;
            self.cond.notify_all();
        }
    }

    /// CONNECT -> CONNECTED on an inbound CONN_ACK. `false` if the channel
    /// was no longer waiting (already reverted, disconnected, or closed).
    pub fn complete_connect(&self, remote_channel_id: u16) -> bool {
        let mut g = self.guarded.lock();
        if g.state != ChannelState::Connect {
            return false;
        }
        g.remote_channel_id = remote_channel_id;
        g.state = ChannelState::Connected;
        self.cond.notify_all();
        true
    }

    /// Block until CONNECT resolves one way or another.
    pub fn wait_connected(&self, deadline: Option<Instant>, cancel: Option<&CancelToken>) -> Result<()> {
        let resolved = self.wait_until(deadline, cancel, |g| {
            Ok(if g.state != ChannelState::Connect { Some(()) } else { None })
        });
        match resolved {
            Ok(()) => {
                if self.state() == ChannelState::Connected {
                    Ok(())
                } else {
                    Err(CmError::PeerGone)
                }
            }
            Err(e) => Err(e),
        }
    }

    // --- data path -------------------------------------------------------

    /// Enqueue a received payload. Returns `false` if the ring is full and
    /// the frame must be dropped (spec.md §4.3).
    pub fn push_data(&self, buf: Vec<u8>) -> bool {
        let mut g = self.guarded.lock();
        if g.state != ChannelState::Connected {
            return false;
        }
        let ok = g.rx_ring.push(buf);
        if ok {
            self.cond.notify_one();
        }
        ok
    }

    pub fn receive(
        &self,
        deadline: Option<Instant>,
        cancel: Option<&CancelToken>,
    ) -> Result<(BufferId, Vec<u8>)> {
        {
            let g = self.guarded.lock();
            if g.rx_ring.inuse_full() {
                return Err(CmError::NoRoom);
            }
        }
        self.wait_until(deadline, cancel, |g| {
            if let Some(item) = g.rx_ring.pop_for_consumer() {
                return Ok(Some(item));
            }
            if g.state != ChannelState::Connected {
                return Err(CmError::PeerGone);
            }
            Ok(None)
        })
    }

    pub fn try_receive(&self) -> Result<(BufferId, Vec<u8>)> {
        let mut g = self.guarded.lock();
        if g.rx_ring.inuse_full() {
            return Err(CmError::NoRoom);
        }
        g.rx_ring.pop_for_consumer().ok_or(CmError::WouldBlock)
    }

    pub fn release_receive_buffer(&self, id: BufferId) -> Result<()> {
        let mut g = self.guarded.lock();
        if g.rx_ring.release(id) {
            Ok(())
        } else {
            Err(CmError::NotFound)
        }
    }

    pub fn is_connected(&self) -> bool {
        self.guarded.lock().state == ChannelState::Connected
    }

    pub fn peer_handle(&self) -> Option<PeerHandle> {
        self.guarded.lock().peer_handle
    }

    pub fn remote_channel_id(&self) -> u16 {
        self.guarded.lock().remote_channel_id
    }

    pub fn local_destid(&self) -> u32 {
        self.guarded.lock().local_destid
    }

    // --- teardown --------------------------------------------------------

    /// Any state -> DISCONNECT: peer closed, peer removed, or port removed
    /// out from under a still-active channel (spec.md §3).
    pub fn mark_disconnected(&self) {
        let mut g = self.guarded.lock();
        if g.state == ChannelState::Destroying {
            return;
        }
        g.state = ChannelState::Disconnect;
        self.cond.notify_all();
    }

    /// Any state -> DESTROYING, for `close()`. Returns the state the
    /// channel was in immediately before, so the caller knows whether a
    /// CONN_CLOSE needs to go out over the wire.
    pub fn begin_destroy(&self) -> ChannelState {
        let mut g = self.guarded.lock();
        let prior = g.state;
        g.state = ChannelState::Destroying;
        self.cond.notify_all();
        prior
    }
}
