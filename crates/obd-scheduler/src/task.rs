//! Poller Task
//!
//! One tokio task owns the [`Poller`] and the active vehicle. It multiplexes
//! the heartbeat, the inbound frame queue and the command queue; everything
//! else talks to it through a cloneable [`PollerHandle`].

use crate::error::PollError;
use crate::poller::Poller;
use crate::registry::VehicleRegistry;
use crate::single::{SingleReply, SingleRequest};
use crate::stats::PollStats;
use crate::vehicle::{NoVehicle, VehicleModule};
use can_bus::{BusId, FrameReceiver};
use obd_protocol::PollTable;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

enum Command {
    SetSchedule {
        bus: BusId,
        table: Option<Arc<PollTable>>,
        reply: oneshot::Sender<Result<(), PollError>>,
    },
    SetState {
        state: u8,
        reply: oneshot::Sender<Result<(), PollError>>,
    },
    GetState {
        reply: oneshot::Sender<u8>,
    },
    Single {
        request: SingleRequest,
        timeout: Duration,
        reply: SingleReply,
    },
    Activate {
        code: String,
        reply: oneshot::Sender<Result<(), PollError>>,
    },
    Stats {
        reply: oneshot::Sender<PollStats>,
    },
    Shutdown,
}

/// Task owning the poller
pub struct PollerTask {
    poller: Poller,
    vehicle: Box<dyn VehicleModule>,
    registry: Arc<VehicleRegistry>,
    frames: FrameReceiver,
    commands: mpsc::Receiver<Command>,
    tick_interval: Duration,
}

/// Cloneable control handle for a running [`PollerTask`]
#[derive(Clone)]
pub struct PollerHandle {
    commands: mpsc::Sender<Command>,
}

impl PollerTask {
    /// Wrap `poller`; frames arriving on `frames` are delivered to it
    pub fn new(
        poller: Poller,
        registry: Arc<VehicleRegistry>,
        frames: FrameReceiver,
        tick_interval: Duration,
        command_queue_depth: usize,
    ) -> (Self, PollerHandle) {
        let (tx, rx) = mpsc::channel(command_queue_depth.max(1));
        let task = Self {
            poller,
            vehicle: Box::new(NoVehicle),
            registry,
            frames,
            commands: rx,
            tick_interval,
        };
        (task, PollerHandle { commands: tx })
    }

    /// Run until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        info!(
            interval_ms = self.tick_interval.as_millis() as u64,
            "Starting poller task"
        );
        let mut heartbeat = time::interval(self.tick_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        heartbeat.tick().await;

        let mut frames_open = true;
        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    self.poller.tick(self.vehicle.as_mut());
                }
                received = self.frames.recv(), if frames_open => match received {
                    Some(received) => {
                        self.poller
                            .deliver(received.bus, &received.frame, self.vehicle.as_mut());
                    }
                    None => {
                        debug!("Inbound frame queue closed");
                        frames_open = false;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
            }
        }

        let stats = self.poller.stats();
        info!(
            ticks = stats.ticks,
            sent = stats.requests_sent,
            completed = stats.replies_completed,
            errors = stats.errors(),
            "Poller task stopped"
        );
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::SetSchedule { bus, table, reply } => {
                let _ = reply.send(self.poller.set_poll_schedule(bus, table));
            }
            Command::SetState { state, reply } => {
                let _ = reply.send(self.poller.set_poll_state(state));
            }
            Command::GetState { reply } => {
                let _ = reply.send(self.poller.poll_state());
            }
            Command::Single {
                request,
                timeout,
                reply,
            } => {
                // Backstop one tick past the caller's own deadline
                let interval = self.tick_interval.as_millis().max(1);
                let ticks = timeout.as_millis().div_ceil(interval) + 1;
                let request = request.with_timeout_ticks(u64::try_from(ticks).unwrap_or(u64::MAX));
                self.poller.submit_single_request(request, reply);
            }
            Command::Activate { code, reply } => {
                let _ = reply.send(self.activate(&code));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.poller.stats().clone());
            }
            Command::Shutdown => {}
        }
    }

    fn activate(&mut self, code: &str) -> Result<(), PollError> {
        let (vehicle, table) = self.registry.create(code)?;
        let bus = vehicle.poll_bus();

        // Fails on an unknown bus before the old vehicle is replaced
        self.poller.set_poll_schedule(bus, table.clone())?;
        self.poller.set_poll_state(0)?;

        info!(
            from = self.vehicle.code(),
            to = vehicle.code(),
            entries = table.as_ref().map_or(0, |t| t.len()),
            "Vehicle activated"
        );
        self.vehicle = vehicle;
        Ok(())
    }
}

impl PollerHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, PollError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| PollError::Shutdown)?;
        rx.await.map_err(|_| PollError::Shutdown)
    }

    /// Install or clear the poll table for `bus`
    pub async fn set_poll_schedule(
        &self,
        bus: BusId,
        table: Option<Arc<PollTable>>,
    ) -> Result<(), PollError> {
        self.request(|reply| Command::SetSchedule { bus, table, reply })
            .await?
    }

    pub async fn set_poll_state(&self, state: u8) -> Result<(), PollError> {
        self.request(|reply| Command::SetState { state, reply }).await?
    }

    pub async fn poll_state(&self) -> Result<u8, PollError> {
        self.request(|reply| Command::GetState { reply }).await
    }

    /// Send one request outside the schedule and wait for its reply
    ///
    /// Returns the reply data after the positive response header, or
    /// [`PollError::Timeout`] if nothing complete arrived within `timeout`.
    pub async fn send_single_request(
        &self,
        request: SingleRequest,
        timeout: Duration,
    ) -> Result<Vec<u8>, PollError> {
        let rx_id = request.rx_id;
        let (tx, rx) = oneshot::channel();
        // Queueing counts against the deadline as well
        let exchange = async {
            self.commands
                .send(Command::Single {
                    request,
                    timeout,
                    reply: tx,
                })
                .await
                .map_err(|_| PollError::Shutdown)?;
            rx.await.map_err(|_| PollError::Shutdown)?
        };

        match time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!(rx_id = format!("0x{:03X}", rx_id), "Single request timed out");
                Err(PollError::Timeout { rx_id })
            }
        }
    }

    /// Replace the active vehicle with the one registered as `code`
    pub async fn activate_vehicle(&self, code: &str) -> Result<(), PollError> {
        let code = code.to_string();
        self.request(|reply| Command::Activate { code, reply }).await?
    }

    /// Snapshot of the poller counters
    pub async fn stats(&self) -> Result<PollStats, PollError> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Stop the task
    pub async fn shutdown(&self) {
        if self.commands.send(Command::Shutdown).await.is_err() {
            debug!("Poller task already stopped");
        }
    }

    /// Check if the task has stopped
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PollerConfig;
    use crate::job::PollJob;
    use crate::vehicle::{PollControl, ReplyOutcome};
    use can_bus::{inbound_channel, CanFrame, FrameSender, MockBus, MockBusHandle, Responder};
    use obd_protocol::{PollEntry, RequestType};
    use std::sync::Mutex;
    use tokio::time::Instant;

    const BUS: BusId = BusId(1);
    const TICK: Duration = Duration::from_millis(100);

    static REPLIES: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());

    struct Speedo;

    impl VehicleModule for Speedo {
        fn code(&self) -> &'static str {
            "SPD"
        }

        fn poll_rows(&self) -> &'static [PollEntry] {
            const ROWS: &[PollEntry] = &[
                PollEntry::new(0x7E0, 0x7E8, RequestType::ObdCurrent, 0x0D, [1, 1, 1, 1]),
                PollEntry::END,
            ];
            ROWS
        }

        fn on_poll_reply(&mut self, ctl: &mut PollControl, _job: &PollJob, data: &[u8]) -> ReplyOutcome {
            REPLIES.lock().unwrap().push(data.to_vec());
            let _ = ctl.set_state(1);
            ReplyOutcome::Handled
        }
    }

    fn speedo() -> Box<dyn VehicleModule> {
        Box::new(Speedo)
    }

    fn registry() -> Arc<VehicleRegistry> {
        let mut registry = VehicleRegistry::new();
        registry.register("SPD", "Speedometer", speedo).unwrap();
        Arc::new(registry)
    }

    fn spawn(bus: MockBus, frames: FrameReceiver) -> PollerHandle {
        let mut poller = Poller::new(&PollerConfig::default());
        poller.add_bus(Box::new(bus));
        let (task, handle) = PollerTask::new(poller, registry(), frames, TICK, 8);
        tokio::spawn(task.run());
        handle
    }

    /// Answers mode 01 PID 0x0D with 42 km/h
    fn speed_responder() -> Responder {
        Box::new(|frame: &CanFrame| {
            if frame.id() == 0x7E0 && frame.data()[..3] == [0x02, 0x01, 0x0D] {
                vec![CanFrame::new(0x7E8, &[0x03, 0x41, 0x0D, 42]).unwrap()]
            } else {
                Vec::new()
            }
        })
    }

    fn mock_with(inbound: &FrameSender, responder: Responder) -> (MockBus, MockBusHandle) {
        let bus = MockBus::new(BUS).with_responder(inbound.clone(), responder);
        let handle = bus.handle();
        (bus, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_request_times_out() {
        let (_inbound, frames) = inbound_channel(16);
        let bus = MockBus::new(BUS);
        let bus_handle = bus.handle();
        let handle = spawn(bus, frames);

        let request = SingleRequest::new(BUS, 0x7E0, 0x7E8, RequestType::ObdVehicleInfo, 0x02);
        let started = Instant::now();
        let result = handle
            .send_single_request(request, Duration::from_millis(1000))
            .await;

        let elapsed = started.elapsed();
        assert_eq!(result, Err(PollError::Timeout { rx_id: 0x7E8 }));
        assert!(elapsed >= Duration::from_millis(1000));
        assert!(elapsed <= Duration::from_millis(1000) + TICK);
        assert_eq!(bus_handle.sent().len(), 1);

        // The abandoned slot is freed on the next tick
        time::sleep(TICK * 2).await;
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.single_requests, 1);
        assert_eq!(stats.replies_completed, 0);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_request_deadline_covers_full_queue() {
        let (_inbound, frames) = inbound_channel(16);
        let mut poller = Poller::new(&PollerConfig::default());
        poller.add_bus(Box::new(MockBus::new(BUS)));
        // Task never started, so the one queue slot stays taken
        let (_task, handle) = PollerTask::new(poller, registry(), frames, TICK, 1);
        let (tx, _rx) = oneshot::channel();
        assert!(handle.commands.try_send(Command::Stats { reply: tx }).is_ok());

        let request = SingleRequest::new(BUS, 0x7E0, 0x7E8, RequestType::ObdCurrent, 0x0D);
        let started = Instant::now();
        let result = time::timeout(
            Duration::from_secs(30),
            handle.send_single_request(request, Duration::from_millis(1000)),
        )
        .await
        .unwrap();

        assert_eq!(result, Err(PollError::Timeout { rx_id: 0x7E8 }));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(1000));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_request_answered() {
        let (inbound, frames) = inbound_channel(16);
        let (bus, _bus_handle) = mock_with(&inbound, speed_responder());
        let handle = spawn(bus, frames);

        let request = SingleRequest::new(BUS, 0x7E0, 0x7E8, RequestType::ObdCurrent, 0x0D);
        let data = handle
            .send_single_request(request, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(data, vec![42]);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_activate_vehicle_polls_table() {
        REPLIES.lock().unwrap().clear();
        let (inbound, frames) = inbound_channel(16);
        let (bus, bus_handle) = mock_with(&inbound, speed_responder());
        let handle = spawn(bus, frames);

        assert!(matches!(
            handle.activate_vehicle("nope").await,
            Err(PollError::Registry(_))
        ));
        handle.activate_vehicle("spd").await.unwrap();
        assert_eq!(handle.poll_state().await.unwrap(), 0);

        time::sleep(TICK * 5 + TICK / 2).await;
        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.ticks, 5);
        assert_eq!(stats.requests_sent, 5);
        assert_eq!(stats.replies_completed, 5);
        assert_eq!(bus_handle.sent().len(), 5);
        assert_eq!(REPLIES.lock().unwrap().first(), Some(&vec![42]));

        // The vehicle switched state from its reply callback
        assert_eq!(handle.poll_state().await.unwrap(), 1);
        assert_eq!(
            handle.set_poll_state(7).await,
            Err(PollError::InvalidState(7))
        );

        handle.set_poll_schedule(BUS, None).await.unwrap();
        time::sleep(TICK * 3).await;
        assert_eq!(bus_handle.sent().len(), 5);

        handle.shutdown().await;
        time::sleep(TICK).await;
        assert!(handle.is_closed());
        assert_eq!(handle.stats().await, Err(PollError::Shutdown));
    }
}
