// SPDX-License-Identifier: MIT
//
// Runtime configuration. See spec.md §6 "Configuration".

use std::time::Duration;

use crate::error::{CmError, Result};

/// Channel manager configuration. Construct with [`Config::default`] and
/// override fields, then call [`Config::validate`] before use.
#[derive(Debug, Clone)]
pub struct Config {
    /// RapidIO mailbox number shared by every port (default 1).
    pub mailbox_number: u8,
    /// First id in the dynamically-allocated channel id range (default 256).
    pub dynamic_channel_start: u16,
    /// Capacity of a channel's receive ring. Must be a power of two.
    pub rx_ring_size: usize,
    /// Capacity of a port's transmit ring. Must be a power of two.
    pub tx_ring_size: usize,
    /// How long `connect` waits for `CONN_ACK` before giving up.
    pub connect_timeout: Duration,
    /// How long `close` waits for the channel's release signal.
    pub close_wait: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mailbox_number: 1,
            dynamic_channel_start: 256,
            rx_ring_size: 128,
            tx_ring_size: 128,
            connect_timeout: Duration::from_secs(3),
            close_wait: Duration::from_secs(3),
        }
    }
}

impl Config {
    /// Validate ring sizes are a nonzero power of two and the dynamic range
    /// leaves room for at least one id below `u16::MAX`.
    pub fn validate(&self) -> Result<()> {
        if !self.rx_ring_size.is_power_of_two() || self.rx_ring_size == 0 {
            return Err(CmError::Io("rx_ring_size must be a nonzero power of two".into()));
        }
        if !self.tx_ring_size.is_power_of_two() || self.tx_ring_size == 0 {
            return Err(CmError::Io("tx_ring_size must be a nonzero power of two".into()));
        }
        if self.dynamic_channel_start == 0 || self.dynamic_channel_start == u16::MAX {
            return Err(CmError::Io("dynamic_channel_start leaves no usable id range".into()));
        }
        Ok(())
    }
}
