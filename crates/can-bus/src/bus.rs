//! Bus Channel Contract

use crate::frame::{BusId, CanFrame};
use thiserror::Error;
use tokio::sync::mpsc;

/// Transmit errors reported synchronously by a bus
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Controller is in bus-off state
    #[error("CAN bus off")]
    BusOff,

    /// Transmit queue full or controller busy
    #[error("CAN transmit queue busy")]
    Busy,

    /// Frame lost arbitration and was not retried by the controller
    #[error("CAN arbitration lost")]
    ArbitrationLost,

    /// No node acknowledged the frame
    #[error("CAN frame not acknowledged")]
    NoAck,

    /// Interface not initialized or already closed
    #[error("CAN interface not initialized")]
    NotInitialized,

    /// Driver-level I/O error
    #[error("CAN driver error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BusError {
    fn from(err: std::io::Error) -> Self {
        BusError::Io(err.to_string())
    }
}

/// A frame received on a bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedFrame {
    pub bus: BusId,
    pub frame: CanFrame,
}

/// Producer side of the inbound frame queue
pub type FrameSender = mpsc::Sender<ReceivedFrame>;

/// Consumer side of the inbound frame queue
pub type FrameReceiver = mpsc::Receiver<ReceivedFrame>;

/// Create the inbound frame queue shared by all buses
pub fn inbound_channel(depth: usize) -> (FrameSender, FrameReceiver) {
    mpsc::channel(depth)
}

/// One CAN interface as seen by the poller
///
/// `send` must not block: a frame that cannot be queued right away is
/// reported as an error and never retried by the caller.
pub trait CanBus: Send {
    /// Logical bus number
    fn id(&self) -> BusId;

    /// Queue a frame for transmission
    fn send(&mut self, frame: &CanFrame) -> Result<(), BusError>;
}

impl<B: CanBus + ?Sized> CanBus for Box<B> {
    fn id(&self) -> BusId {
        (**self).id()
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), BusError> {
        (**self).send(frame)
    }
}
