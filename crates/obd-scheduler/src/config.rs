//! Poller configuration

use serde::{Deserialize, Serialize};

/// Configuration for the poller engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Ticks a scheduled job may wait for its reply before it times out
    pub response_timeout_ticks: u32,
    /// Reassembly buffer capacity in bytes (per path)
    pub buffer_capacity: usize,
    /// Block size announced in flow-control frames (0 = no further flow control)
    pub flow_control_block_size: u8,
    /// Minimum separation time announced in flow-control frames
    pub flow_control_st_min: u8,
    /// Byte used to pad transmitted frames to 8 bytes
    pub pad_byte: u8,
    /// Depth of the inbound frame queue
    pub frame_queue_depth: usize,
    /// Depth of the command queue of the poller task
    pub command_queue_depth: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            response_timeout_ticks: 2,
            buffer_capacity: rx_buffer::DEFAULT_CAPACITY,
            flow_control_block_size: 0,
            flow_control_st_min: 0,
            pad_byte: 0x00,
            frame_queue_depth: 256,
            command_queue_depth: 32,
        }
    }
}

impl PollerConfig {
    /// Config for slow gateways: longer timeout, paced consecutive frames
    pub fn conservative() -> Self {
        Self {
            response_timeout_ticks: 5,
            flow_control_block_size: 8,
            flow_control_st_min: 10,
            ..Default::default()
        }
    }
}
