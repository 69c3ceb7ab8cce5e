// SPDX-License-Identifier: MIT
//
// The process-wide entry point: binds the channel registry, the port list,
// and the control-plane worker together, and exposes the operation surface
// spec.md §6 describes as the IOCTL boundary. Matches §9's "explicit
// init/shutdown entry points" design note — this replaces the original
// driver's `module_init`/`module_exit` plus class-interface registration,
// which has no meaning outside a kernel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::cancel::CancelToken;
use crate::channel::{BufferId, Channel, ChannelState, ConnReq, OwnerTag};
use crate::config::Config;
use crate::control::{ControlTask, ControlWorker};
use crate::error::{CmError, Result};
use crate::peer::Peer;
use crate::port::Port;
use crate::registry::ChannelRegistry;
use crate::transport::{MailboxDriver, PeerHandle, PortEvents, TxSlot};
use crate::wire::{ChanOp, FrameHeader, FrameType, HEADER_LEN};

struct ManagerInner {
    config: Config,
    registry: ChannelRegistry,
    ports: Mutex<HashMap<u8, Arc<Port>>>,
    next_owner: AtomicU64,
    control: ControlWorker,
}

impl ManagerInner {
    fn port(&self, port_id: u8) -> Result<Arc<Port>> {
        self.ports.lock().get(&port_id).cloned().ok_or(CmError::NotFound)
    }

    fn channel(&self, id: u16) -> Result<Arc<Channel>> {
        self.registry.lookup(id).ok_or(CmError::NotFound)
    }

    fn emit(&self, port: &Port, peer: PeerHandle, header: FrameHeader, may_queue: bool) -> Result<()> {
        port.post_send(peer, header.encode().to_vec(), may_queue)
    }

    fn emit_close(&self, ch: &Arc<Channel>) {
        let (Some(port), Some(peer)) = (ch.port(), ch.peer_handle()) else {
            return;
        };
        let header = FrameHeader {
            src_destid: ch.local_destid(),
            dst_destid: ch.remote_destid(),
            src_mbox: self.config.mailbox_number,
            dst_mbox: self.config.mailbox_number,
            frame_type: FrameType::Chan as u8,
            ch_op: ChanOp::ConnClose as u8,
            dst_ch: ch.remote_channel_id(),
            src_ch: ch.id,
            msg_len: HEADER_LEN as u16,
            rsvd: 0,
        };
        // Control frames may queue (spec.md §4.4): a full TX ring defers
        // rather than drops, so BUSY here means "queued", not "failed".
        if let Err(e) = self.emit(&port, peer, header, true) {
            if !matches!(e, CmError::Busy) {
                warn!("channel {}: failed to send CONN_CLOSE: {e}", ch.id);
            }
        }
    }

    // --- driver -> CM entry points (spec.md §5 "interrupt/softirq") -----

    fn on_inbound(&self, port_id: u8, bytes: Vec<u8>) {
        let Ok(port) = self.port(port_id) else {
            warn!("inbound frame for unknown port {port_id}");
            return;
        };
        port.consume_rx_credit();

        let header = match FrameHeader::decode(&bytes) {
            Ok(h) => h,
            Err(e) => {
                warn!("port {port_id}: {e}");
                return;
            }
        };
        let op = match header.chan_op() {
            Ok(op) => op,
            Err(e) => {
                warn!("port {port_id}: {e}");
                return;
            }
        };
        match op {
            ChanOp::ConnReq => {
                self.control.submit(ControlTask::ConnReq { port: Arc::downgrade(&port), header })
            }
            ChanOp::ConnAck => {
                self.control.submit(ControlTask::ConnAck { port: Arc::downgrade(&port), header })
            }
            ChanOp::ConnClose => {
                self.control.submit(ControlTask::Close { port: Arc::downgrade(&port), header })
            }
            ChanOp::DataMsg => {
                let payload = bytes.get(HEADER_LEN..).unwrap_or_default().to_vec();
                match self.registry.lookup(header.dst_ch) {
                    Some(ch) => {
                        if !ch.push_data(payload) {
                            warn!("channel {}: rx ring full, dropping frame", header.dst_ch);
                        }
                    }
                    None => debug!("data frame for unknown channel {}", header.dst_ch),
                }
            }
        }
    }

    fn on_outbound_complete(&self, port_id: u8, slot: TxSlot) {
        if let Ok(port) = self.port(port_id) {
            port.on_tx_complete(slot);
        }
    }

    // --- control-plane worker (spec.md §4.5) ----------------------------

    fn handle_control_task(&self, task: ControlTask) {
        match task {
            ControlTask::ConnReq { port, header } => self.handle_conn_req(port, header),
            ControlTask::ConnAck { header, .. } => self.handle_conn_ack(header),
            ControlTask::Close { header, .. } => self.handle_close(header),
        }
    }

    fn handle_conn_req(&self, port: Weak<Port>, header: FrameHeader) {
        let Some(port) = port.upgrade() else { return };
        if port.peers.find(header.src_destid).is_none() {
            debug!("CONN_REQ from unknown peer destid {}", header.src_destid);
            return;
        }
        let Some(ch) = self.registry.lookup(header.dst_ch) else {
            debug!("CONN_REQ for unknown channel {}", header.dst_ch);
            return;
        };
        let req = ConnReq { src_destid: header.src_destid, src_ch: header.src_ch, port: Arc::downgrade(&port) };
        if !ch.push_conn_req(req) {
            debug!("CONN_REQ for channel {} not listening, dropped", header.dst_ch);
        }
    }

    fn handle_conn_ack(&self, header: FrameHeader) {
        match self.registry.lookup(header.dst_ch) {
            Some(ch) if ch.complete_connect(header.src_ch) => {}
            Some(_) => debug!("CONN_ACK for channel {} not awaiting connect", header.dst_ch),
            None => debug!("CONN_ACK for unknown channel {}", header.dst_ch),
        }
    }

    fn handle_close(&self, header: FrameHeader) {
        if let Some(ch) = self.registry.lookup(header.dst_ch) {
            ch.mark_disconnected();
        }
    }
}

fn deadline_of(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|d| Instant::now() + d)
}

/// The channel manager. Cheaply cloneable handle around the shared state;
/// clones all refer to the same ports, channels, and control-plane worker.
#[derive(Clone)]
pub struct Manager(Arc<ManagerInner>);

impl Manager {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let inner = Arc::new_cyclic(|weak: &Weak<ManagerInner>| {
            let weak = weak.clone();
            ManagerInner {
                registry: ChannelRegistry::new(config.dynamic_channel_start),
                ports: Mutex::new(HashMap::new()),
                next_owner: AtomicU64::new(1),
                control: ControlWorker::spawn(move |task| {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_control_task(task);
                    }
                }),
                config,
            }
        });
        Ok(Self(inner))
    }

    /// Mint an owner tag for a new user-facing session (spec.md §6).
    pub fn open_session(&self) -> OwnerTag {
        self.0.next_owner.fetch_add(1, Ordering::Relaxed)
    }

    /// A handle the transport driver calls back into when frames or TX
    /// completions arrive. Clone is cheap; hand this to the driver at
    /// construction time.
    pub fn events(&self) -> Arc<dyn PortEvents> {
        Arc::new(EventSink(self.0.clone()))
    }

    // --- port / peer lifecycle (spec.md §4.8) ---------------------------

    pub fn add_port(&self, port_id: u8, local_destid: u32, driver: Arc<dyn MailboxDriver>) -> Result<()> {
        let port = Port::new(
            port_id,
            local_destid,
            self.0.config.mailbox_number,
            driver,
            self.0.config.tx_ring_size,
            self.0.config.rx_ring_size,
        )?;
        self.0.ports.lock().insert(port_id, port);
        Ok(())
    }

    /// Remove a port. Any channel still bound to it moves to DISCONNECT
    /// (spec.md §4.8, §3).
    pub fn remove_port(&self, port_id: u8) {
        let Some(port) = self.0.ports.lock().remove(&port_id) else { return };
        for ch in self.0.registry.all() {
            if let Some(bound) = ch.port() {
                if Arc::ptr_eq(&bound, &port) {
                    ch.mark_disconnected();
                }
            }
        }
    }

    pub fn add_peer(&self, port_id: u8, destid: u32, handle: PeerHandle) -> Result<()> {
        self.0.port(port_id)?.peers.add(destid, handle);
        Ok(())
    }

    /// Remove a peer. Any channel connected to it moves to DISCONNECT
    /// (spec.md §4.8, §3).
    pub fn remove_peer(&self, port_id: u8, destid: u32) -> Result<()> {
        let port = self.0.port(port_id)?;
        let Some(peer) = port.peers.remove(destid) else {
            return Err(CmError::NotFound);
        };
        for ch in self.0.registry.all() {
            if ch.peer_handle() == Some(peer.handle) {
                ch.mark_disconnected();
            }
        }
        Ok(())
    }

    pub fn list_ports(&self) -> Vec<u8> {
        self.0.ports.lock().keys().copied().collect()
    }

    pub fn list_peers(&self, port_id: u8) -> Result<Vec<u32>> {
        Ok(self.0.port(port_id)?.peers.destids())
    }

    // --- channel object lifecycle ---------------------------------------

    pub fn create_channel(&self, requested_id: Option<u16>, owner: OwnerTag) -> Result<u16> {
        let ch = self.0.registry.allocate(requested_id, self.0.config.rx_ring_size, Some(owner))?;
        Ok(ch.id)
    }

    /// Close a channel. Must be the owning session; idempotent (a second
    /// call, or one racing an inbound CONN_CLOSE for the same id, sees the
    /// channel already gone and returns NOT_FOUND).
    pub fn close_channel(&self, id: u16, owner: OwnerTag) -> Result<()> {
        let ch = self.0.channel(id)?;
        if ch.owner_tag() != Some(owner) {
            return Err(CmError::WrongOwner);
        }
        let Some(ch) = self.0.registry.remove(id) else {
            return Err(CmError::NotFound);
        };
        let prior = ch.begin_destroy();
        if prior == ChannelState::Connected {
            self.0.emit_close(&ch);
        }
        let release = ch.release_signal();
        drop(ch);
        release.wait_timeout(self.0.config.close_wait);
        Ok(())
    }

    pub fn bind(&self, id: u16, port_id: u8) -> Result<()> {
        let port = self.0.port(port_id)?;
        self.0.channel(id)?.bind(Arc::downgrade(&port), port.local_destid)
    }

    pub fn listen(&self, id: u16) -> Result<()> {
        self.0.channel(id)?.listen()
    }

    /// Accept one queued connect request, spawning a new CONNECTED channel
    /// and returning its id (spec.md §4.2).
    pub fn accept(&self, id: u16, timeout: Option<Duration>, cancel: Option<&CancelToken>) -> Result<u16> {
        let listening = self.0.channel(id)?;
        let req = match timeout {
            Some(d) if d.is_zero() => listening.try_accept()?,
            _ => listening.accept(deadline_of(timeout), cancel)?,
        };
        let port = req.port.upgrade().ok_or(CmError::PeerGone)?;
        let peer = port.peers.find(req.src_destid).ok_or(CmError::PeerGone)?;

        let new_ch = self.0.registry.allocate(None, self.0.config.rx_ring_size, listening.owner_tag())?;
        new_ch.complete_accept(Arc::downgrade(&port), port.local_destid, req.src_destid, req.src_ch, peer.handle);

        let header = FrameHeader {
            src_destid: port.local_destid,
            dst_destid: req.src_destid,
            src_mbox: self.0.config.mailbox_number,
            dst_mbox: self.0.config.mailbox_number,
            frame_type: FrameType::Chan as u8,
            ch_op: ChanOp::ConnAck as u8,
            dst_ch: req.src_ch,
            src_ch: new_ch.id,
            msg_len: HEADER_LEN as u16,
            rsvd: 0,
        };
        if let Err(e) = self.0.emit(&port, peer.handle, header, true) {
            if !matches!(e, CmError::Busy) {
                warn!("channel {}: failed to send CONN_ACK: {e}", new_ch.id);
            }
        }
        Ok(new_ch.id)
    }

    /// Initiate a connection (spec.md §4.2). `remote_channel_id` is the
    /// peer's LISTEN-ing channel id.
    pub fn connect(
        &self,
        id: u16,
        port_id: u8,
        remote_destid: u32,
        remote_channel_id: u16,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        let ch = self.0.channel(id)?;
        let port = self.0.port(port_id)?;
        let peer: Peer = port.peers.find(remote_destid).ok_or(CmError::PeerGone)?;

        ch.begin_connect(Arc::downgrade(&port), port.local_destid, remote_destid, remote_channel_id, peer.handle)?;

        let header = FrameHeader {
            src_destid: port.local_destid,
            dst_destid: remote_destid,
            src_mbox: self.0.config.mailbox_number,
            dst_mbox: self.0.config.mailbox_number,
            frame_type: FrameType::Chan as u8,
            ch_op: ChanOp::ConnReq as u8,
            dst_ch: remote_channel_id,
            src_ch: id,
            msg_len: HEADER_LEN as u16,
            rsvd: 0,
        };
        if let Err(e) = self.0.emit(&port, peer.handle, header, true) {
            if !matches!(e, CmError::Busy) {
                ch.revert_connect();
                return Err(e);
            }
        }

        match ch.wait_connected(deadline_of(Some(timeout.unwrap_or(self.0.config.connect_timeout))), cancel) {
            Ok(()) => Ok(()),
            Err(CmError::Timeout) => {
                ch.revert_connect();
                Err(CmError::Timeout)
            }
            Err(e) => Err(e),
        }
    }

    /// Send one DATA_MSG frame (spec.md §6: `send(channel_id, bytes)`). Data
    /// sends never queue (spec.md §4.4): a full TX ring returns
    /// [`CmError::Busy`] immediately rather than buffering payload data.
    pub fn send(&self, id: u16, payload: &[u8]) -> Result<()> {
        let ch = self.0.channel(id)?;
        if !ch.is_connected() {
            return Err(CmError::InvalidState);
        }
        let port = ch.port().ok_or(CmError::PeerGone)?;
        let peer = ch.peer_handle().ok_or(CmError::PeerGone)?;
        if HEADER_LEN + payload.len() > u16::MAX as usize {
            return Err(CmError::Io("payload too large for a single frame".into()));
        }
        let header = FrameHeader {
            src_destid: ch.local_destid(),
            dst_destid: ch.remote_destid(),
            src_mbox: self.0.config.mailbox_number,
            dst_mbox: self.0.config.mailbox_number,
            frame_type: FrameType::Chan as u8,
            ch_op: ChanOp::DataMsg as u8,
            dst_ch: ch.remote_channel_id(),
            src_ch: id,
            msg_len: (HEADER_LEN + payload.len()) as u16,
            rsvd: 0,
        };
        let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
        bytes.extend_from_slice(&header.encode());
        bytes.extend_from_slice(payload);
        port.post_send(peer, bytes, false)
    }

    pub fn receive(
        &self,
        id: u16,
        timeout: Option<Duration>,
        cancel: Option<&CancelToken>,
    ) -> Result<(BufferId, Vec<u8>)> {
        let ch = self.0.channel(id)?;
        match timeout {
            Some(d) if d.is_zero() => ch.try_receive(),
            _ => ch.receive(deadline_of(timeout), cancel),
        }
    }

    pub fn release_receive_buffer(&self, id: u16, buf: BufferId) -> Result<()> {
        self.0.channel(id)?.release_receive_buffer(buf)
    }

    /// Flush every channel and port (spec.md §9 shutdown/notifier): every
    /// CONNECTED channel gets one outbound CONN_CLOSE, every channel is
    /// torn down, and every port is released. Not reversible; build a new
    /// `Manager` afterward.
    pub fn shutdown(&self) {
        for ch in self.0.registry.all() {
            let prior = ch.begin_destroy();
            if prior == ChannelState::Connected {
                self.0.emit_close(&ch);
            }
            self.0.registry.remove(ch.id);
        }
        self.0.ports.lock().clear();
    }
}

struct EventSink(Arc<ManagerInner>);

impl PortEvents for EventSink {
    fn on_inbound(&self, port_id: u8, bytes: Vec<u8>) {
        self.0.on_inbound(port_id, bytes);
    }

    fn on_outbound_complete(&self, port_id: u8, slot: TxSlot) {
        self.0.on_outbound_complete(port_id, slot);
    }
}
