// SPDX-License-Identifier: MIT
//
// Error kinds for the channel manager. See spec.md §7.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CmError>;

/// Errors returned by channel manager operations.
#[derive(Debug, Error)]
pub enum CmError {
    #[error("no such channel, port, or peer")]
    NotFound,

    #[error("operation not permitted from current state")]
    InvalidState,

    #[error("non-blocking call with no work available")]
    WouldBlock,

    #[error("suspension deadline elapsed")]
    Timeout,

    #[error("operation was cancelled")]
    Interrupted,

    #[error("transmit ring full and queuing not permitted")]
    Busy,

    #[error("allocator failure")]
    NoMemory,

    #[error("receive in-use tracking full, release buffers first")]
    NoRoom,

    #[error("peer removed between lookup and use")]
    PeerGone,

    #[error("close_channel issued by a session that does not own the channel")]
    WrongOwner,

    #[error("transport-layer error: {0}")]
    Io(String),
}
