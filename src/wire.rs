// SPDX-License-Identifier: MIT
//
// Wire framing. Port of the `rio_ch_base_bhdr` / `rio_ch_chan_hdr` packed
// structs from the original driver (see spec.md §4.1, §6). Bit-exact,
// big-endian on the wire; hand-encoded rather than derive-based because this
// is a fixed hardware layout, not a serialization-library payload.

use crate::error::{CmError, Result};

/// Total encoded size of a [`FrameHeader`]: 11-byte base header
/// (`src_destid`, `dst_destid`, `src_mbox`, `dst_mbox`, `frame_type`) plus
/// 9 bytes of channel fields (`ch_op`, `dst_ch`, `src_ch`, `msg_len`, `rsvd`).
pub const HEADER_LEN: usize = 20;

/// Default maximum transport message size (header + payload).
pub const DEFAULT_MAX_MSG_SIZE: usize = 4096;

/// `type` field values (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Reserved system-management frame type, not used by the channel layer.
    Sys = 0xAA,
    /// Channel-manager frame: connect/accept/close/data.
    Chan = 0x55,
}

impl TryFrom<u8> for FrameType {
    type Error = CmError;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0xAA => Ok(FrameType::Sys),
            0x55 => Ok(FrameType::Chan),
            other => Err(CmError::Io(format!("unsupported frame type 0x{other:02x}"))),
        }
    }
}

/// `ch_op` field values (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChanOp {
    ConnReq = 0,
    ConnAck = 1,
    ConnClose = 2,
    DataMsg = 3,
}

impl TryFrom<u8> for ChanOp {
    type Error = CmError;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0 => Ok(ChanOp::ConnReq),
            1 => Ok(ChanOp::ConnAck),
            2 => Ok(ChanOp::ConnClose),
            3 => Ok(ChanOp::DataMsg),
            other => Err(CmError::Io(format!("unsupported channel op {other}"))),
        }
    }
}

/// Fixed frame header, bit-exact with spec.md §6. `src_mbox`/`dst_mbox` are
/// always the configured `mailbox_number`; `frame_type` is always
/// [`FrameType::Chan`] for anything the channel layer emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub src_destid: u32,
    pub dst_destid: u32,
    pub src_mbox: u8,
    pub dst_mbox: u8,
    pub frame_type: u8,
    pub ch_op: u8,
    pub dst_ch: u16,
    pub src_ch: u16,
    /// For `DATA_MSG`: total frame length including header.
    pub msg_len: u16,
    pub rsvd: u16,
}

impl FrameHeader {
    /// Encode to the 20-byte big-endian wire representation.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.src_destid.to_be_bytes());
        buf[4..8].copy_from_slice(&self.dst_destid.to_be_bytes());
        buf[8] = self.src_mbox;
        buf[9] = self.dst_mbox;
        buf[10] = self.frame_type;
        buf[11] = self.ch_op;
        buf[12..14].copy_from_slice(&self.dst_ch.to_be_bytes());
        buf[14..16].copy_from_slice(&self.src_ch.to_be_bytes());
        buf[16..18].copy_from_slice(&self.msg_len.to_be_bytes());
        buf[18..20].copy_from_slice(&self.rsvd.to_be_bytes());
        buf
    }

    /// Decode a header from the front of `buf`. `buf` may carry a trailing
    /// payload for `DATA_MSG` frames; only the first [`HEADER_LEN`] bytes
    /// are consumed.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(CmError::Io(format!(
                "frame too short: {} bytes, need at least {HEADER_LEN}",
                buf.len(),
            )));
        }
        Ok(Self {
            src_destid: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            dst_destid: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
            src_mbox: buf[8],
            dst_mbox: buf[9],
            frame_type: buf[10],
            ch_op: buf[11],
            dst_ch: u16::from_be_bytes(buf[12..14].try_into().unwrap()),
            src_ch: u16::from_be_bytes(buf[14..16].try_into().unwrap()),
            msg_len: u16::from_be_bytes(buf[16..18].try_into().unwrap()),
            rsvd: u16::from_be_bytes(buf[18..20].try_into().unwrap()),
        })
    }

    pub fn frame_type(&self) -> Result<FrameType> {
        FrameType::try_from(self.frame_type)
    }

    pub fn chan_op(&self) -> Result<ChanOp> {
        ChanOp::try_from(self.ch_op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FrameHeader {
        FrameHeader {
            src_destid: 0x0102_0304,
            dst_destid: 0x0506_0708,
            src_mbox: 1,
            dst_mbox: 1,
            frame_type: FrameType::Chan as u8,
            ch_op: ChanOp::DataMsg as u8,
            dst_ch: 100,
            src_ch: 200,
            msg_len: 32,
            rsvd: 0,
        }
    }

    #[test]
    fn round_trip_is_exact() {
        let h = sample();
        let bytes = h.encode();
        let back = FrameHeader::decode(&bytes).expect("decode");
        assert_eq!(h, back);
    }

    #[test]
    fn network_byte_order_is_big_endian() {
        let h = sample();
        let bytes = h.encode();
        // src_destid occupies the first 4 bytes, most-significant first.
        assert_eq!(&bytes[0..4], &[0x01, 0x02, 0x03, 0x04]);
        // dst_ch occupies bytes 12..14.
        assert_eq!(&bytes[12..14], &100u16.to_be_bytes());
    }

    #[test]
    fn conn_ack_carries_acceptor_channel_in_src_ch() {
        let mut h = sample();
        h.ch_op = ChanOp::ConnAck as u8;
        h.src_ch = 777;
        let back = FrameHeader::decode(&h.encode()).unwrap();
        assert_eq!(back.chan_op().unwrap(), ChanOp::ConnAck);
        assert_eq!(back.src_ch, 777);
    }

    #[test]
    fn decode_rejects_short_buffer() {
        let bytes = [0u8; HEADER_LEN - 1];
        assert!(FrameHeader::decode(&bytes).is_err());
    }

    #[test]
    fn decode_rejects_unknown_op() {
        let mut h = sample();
        h.ch_op = 0xFF;
        let bytes = h.encode();
        let back = FrameHeader::decode(&bytes).unwrap();
        assert!(back.chan_op().is_err());
    }
}
