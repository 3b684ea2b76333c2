//! SocketCAN Backend (Linux)
//!
//! Transmits on a raw CAN socket and runs a background reader thread that
//! pushes received data frames onto the inbound queue.

use crate::bus::{BusError, CanBus, FrameSender, ReceivedFrame};
use crate::frame::{BusId, CanFrame};
use socketcan::{EmbeddedFrame, ExtendedId, Frame, Socket, StandardId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Reader thread wake-up interval used to observe shutdown
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// CAN interface backed by a raw SocketCAN socket
pub struct SocketCanBus {
    id: BusId,
    interface: String,
    socket: socketcan::CanSocket,
    shutdown: Arc<AtomicBool>,
}

impl SocketCanBus {
    /// Open `interface` (e.g. "can0") and start its reader thread
    pub fn open(id: BusId, interface: &str, inbound: FrameSender) -> Result<Self, BusError> {
        let socket = socketcan::CanSocket::open(interface)?;
        socket.set_nonblocking(true)?;

        let reader = socketcan::CanSocket::open(interface)?;
        reader.set_read_timeout(READ_TIMEOUT)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let name = interface.to_string();

        std::thread::Builder::new()
            .name(format!("{}-rx", id))
            .spawn(move || read_loop(id, &name, reader, inbound, shutdown_clone))?;

        info!("SocketCAN bus {} opened on {}", id, interface);

        Ok(Self {
            id,
            interface: interface.to_string(),
            socket,
            shutdown,
        })
    }

    /// Interface name
    pub fn interface(&self) -> &str {
        &self.interface
    }
}

fn read_loop(
    id: BusId,
    interface: &str,
    socket: socketcan::CanSocket,
    inbound: FrameSender,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match socket.read_frame() {
            Ok(socketcan::CanFrame::Data(raw)) => {
                let frame = match CanFrame::with_format(raw.raw_id(), raw.is_extended(), raw.data()) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!("{}: dropping frame: {}", interface, e);
                        continue;
                    }
                };
                if inbound.blocking_send(ReceivedFrame { bus: id, frame }).is_err() {
                    debug!("Receiver dropped, stopping {} reader", interface);
                    break;
                }
            }
            Ok(_) => {}
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                warn!("{}: CAN read error: {}", interface, e);
                std::thread::sleep(READ_TIMEOUT);
            }
        }
    }
}

impl CanBus for SocketCanBus {
    fn id(&self) -> BusId {
        self.id
    }

    fn send(&mut self, frame: &CanFrame) -> Result<(), BusError> {
        let raw = if frame.is_extended() {
            ExtendedId::new(frame.id()).and_then(|id| socketcan::CanFrame::new(id, frame.data()))
        } else {
            StandardId::new(frame.id() as u16)
                .and_then(|id| socketcan::CanFrame::new(id, frame.data()))
        }
        .ok_or_else(|| BusError::Io(format!("cannot encode frame {:?}", frame)))?;

        self.socket.write_frame(&raw).map_err(|e| match e.raw_os_error() {
            Some(libc::ENOBUFS) | Some(libc::EAGAIN) => BusError::Busy,
            Some(libc::ENETDOWN) => BusError::BusOff,
            _ => {
                error!("{}: CAN write error: {}", self.interface, e);
                BusError::from(e)
            }
        })
    }
}

impl Drop for SocketCanBus {
    fn drop(&mut self) {
        info!("Shutting down SocketCAN bus {}", self.id);
        self.shutdown.store(true, Ordering::SeqCst);
    }
}
