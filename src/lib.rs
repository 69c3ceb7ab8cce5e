// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Channel manager: reliable, connection-oriented, bidirectional message
// channels multiplexed over a mailbox-style hardware transport. See
// `manager::Manager` for the entry point.

pub mod cancel;
pub mod channel;
pub mod config;
pub mod control;
pub mod error;
pub mod manager;
pub mod peer;
pub mod port;
pub mod registry;
pub mod transport;
pub mod wire;

pub use cancel::CancelToken;
pub use channel::{BufferId, ChannelState, OwnerTag};
pub use config::Config;
pub use error::{CmError, Result};
pub use manager::Manager;
pub use transport::{MailboxDriver, PeerHandle, PortEvents, TxSlot};
