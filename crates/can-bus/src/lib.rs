//! CAN Bus Channel
//!
//! Wraps one physical (or simulated) CAN interface: frame transmission
//! through the [`CanBus`] trait, and an inbound queue of [`ReceivedFrame`]s
//! fed by the receive path and drained by the poller task.

mod bus;
mod frame;
mod mock;
#[cfg(all(feature = "socketcan", target_os = "linux"))]
mod socketcan_bus;

pub use bus::{inbound_channel, BusError, CanBus, FrameReceiver, FrameSender, ReceivedFrame};
pub use frame::{BusId, CanFrame, FrameError};
pub use mock::{MockBus, MockBusHandle, Responder};
#[cfg(all(feature = "socketcan", target_os = "linux"))]
pub use socketcan_bus::SocketCanBus;

/// Highest 11-bit identifier
pub const MAX_STANDARD_ID: u32 = 0x7FF;

/// Highest 29-bit identifier
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;
