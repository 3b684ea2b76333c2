//! Mock Bus for Testing and Simulation
//!
//! Records every transmitted frame, can be told to fail transmissions, and
//! can answer requests through a responder closure whose frames are pushed
//! onto the inbound queue as if an ECU had replied.

use crate::bus::{BusError, CanBus, FrameSender, ReceivedFrame};
use crate::frame::{BusId, CanFrame};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Produces reply frames for a transmitted frame
pub type Responder = Box<dyn FnMut(&CanFrame) -> Vec<CanFrame> + Send>;

#[derive(Default)]
struct MockShared {
    sent: Mutex<Vec<CanFrame>>,
    failure: Mutex<Option<BusError>>,
}

/// In-memory bus (no hardware required)
pub struct MockBus {
    id: BusId,
    shared: Arc<MockShared>,
    responder: Option<Responder>,
    inbound: Option<FrameSender>,
}

/// Inspection handle for a [`MockBus`] that has been moved into the poller
#[derive(Clone)]
pub struct MockBusHandle {
    shared: Arc<MockShared>,
}

impl MockBus {
    /// Create a mock bus that only records frames
    pub fn new(id: BusId) -> Self {
        Self {
            id,
            shared: Arc::new(MockShared::default()),
            responder: None,
            inbound: None,
        }
    }

    /// Answer transmitted frames through `responder`, delivering replies to `inbound`
    pub fn with_responder(mut self, inbound: FrameSender, responder: Responder) -> Self {
        self.inbound = Some(inbound);
        self.responder = Some(responder);
        self
    }

    /// Get an inspection handle
    pub fn handle(&self) -> MockBusHandle {
        MockBusHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl CanBus for MockBus {
    fn id(&self) -> BusId {
        self.id
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), BusError> {
        if let Some(err) = self.shared.failure.lock().clone() {
            debug!("Mock {}: failing transmit of {:?}", self.id, frame);
            return Err(err);
        }
        self.shared.sent.lock().push(*frame);

        if let (Some(responder), Some(inbound)) = (self.responder.as_mut(), self.inbound.as_ref()) {
            for reply in responder(frame) {
                let received = ReceivedFrame {
                    bus: self.id,
                    frame: reply,
                };
                if inbound.try_send(received).is_err() {
                    warn!("Mock {}: inbound queue full, reply dropped", self.id);
                }
            }
        }
        Ok(())
    }
}

impl MockBusHandle {
    /// All frames transmitted so far
    pub fn sent(&self) -> Vec<CanFrame> {
        self.shared.sent.lock().clone()
    }

    /// Drain the transmitted frames
    pub fn take_sent(&self) -> Vec<CanFrame> {
        std::mem::take(&mut *self.shared.sent.lock())
    }

    /// Make every following transmit fail with `error` (or succeed again with `None`)
    pub fn set_failure(&self, error: Option<BusError>) {
        *self.shared.failure.lock() = error;
    }
}
