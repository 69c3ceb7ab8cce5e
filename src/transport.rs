// SPDX-License-Identifier: MIT
//
// The transport boundary (spec.md §1, §6): everything a mailbox driver
// collaborator must expose, and everything it calls back into the CM with.
// The real RapidIO mailbox driver is out of scope; this trait is the whole
// surface the core touches.

use crate::error::Result;

/// Opaque identifier for a remote device as seen by the transport driver
/// (spec.md §3, "peer_handle").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerHandle(pub u64);

/// Identifies a completed outbound slot, reported back by the driver's TX
/// completion callback (spec.md §4.4).
pub type TxSlot = usize;

/// Everything `Port` calls into the driver for.
pub trait MailboxDriver: Send + Sync {
    /// Reserve the outbound mailbox for this port. Fatal if it fails.
    fn reserve_outbound(&self, port_id: u8, mailbox: u8) -> Result<()>;
    /// Reserve the inbound mailbox for this port. Fatal if it fails.
    fn reserve_inbound(&self, port_id: u8, mailbox: u8) -> Result<()>;
    /// Release a previously reserved outbound mailbox.
    fn release_outbound(&self, port_id: u8, mailbox: u8);
    /// Release a previously reserved inbound mailbox.
    fn release_inbound(&self, port_id: u8, mailbox: u8);

    /// Post one freshly allocated receive buffer, keeping postable credit
    /// available to the transport (spec.md §4.3 step 1).
    fn post_inbound_buffer(&self, port_id: u8, mailbox: u8) -> Result<()>;

    /// Submit `bytes` for transmission to `peer`. Returns the slot the
    /// driver will report back through [`PortEvents::on_outbound_complete`].
    fn post_outbound(
        &self,
        port_id: u8,
        mailbox: u8,
        peer: PeerHandle,
        bytes: &[u8],
    ) -> Result<TxSlot>;
}

/// Everything the driver calls into the CM with — the "interrupt/softirq
/// context" entry points of spec.md §5.
pub trait PortEvents: Send + Sync {
    /// An inbound frame is available; `bytes` is the raw wire frame.
    fn on_inbound(&self, port_id: u8, bytes: Vec<u8>);
    /// An outbound transmission completed up to and including `slot`.
    fn on_outbound_complete(&self, port_id: u8, slot: TxSlot);
}
