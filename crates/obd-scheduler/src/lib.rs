//! ECU Poll Scheduler
//!
//! State-driven periodic polling of OBD-II / UDS ECUs over CAN, with ISO-TP
//! reply reassembly, dispatch of replies to the active vehicle module and a
//! timeout-bounded single request path.
//!
//! [`Poller`] is the synchronous engine; [`PollerTask`] runs it on tokio
//! and [`PollerHandle`] controls it from elsewhere.

mod config;
mod dispatch;
mod error;
mod job;
mod link;
mod poller;
mod reassembly;
mod registry;
mod scheduler;
mod single;
mod stats;
mod task;
mod vehicle;

pub use config::PollerConfig;
pub use error::{FrameFault, PollError, RegistryError};
pub use job::{JobOrigin, PollJob};
pub use poller::Poller;
pub use registry::{VehicleFactory, VehicleRegistry};
pub use scheduler::Schedule;
pub use single::{SingleReply, SingleRequest};
pub use stats::PollStats;
pub use task::{PollerHandle, PollerTask};
pub use vehicle::{
    LegacyPollFrame, NoVehicle, PollControl, ReplyOutcome, ReplyShape, VehicleModule,
};
