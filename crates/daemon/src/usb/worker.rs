//! USB worker thread
//!
//! Dedicated thread owning the libusb context, the hot-plug registration
//! and the supervisor. All device I/O and all tracked-device bookkeeping
//! happen here; the Tokio runtime only produces events.

use crate::supervisor::{Supervisor, SupervisorError, SupervisorSettings};
use crate::usb::device::{RusbBus, RusbDevice};
use crate::usb::hotplug::RusbEventSource;
use common::{EventReceiver, EventSender};
use protocol::DeviceMatchFilter;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info};

/// Everything the worker needs to bring the supervisor up
pub struct WorkerSettings {
    pub filter: DeviceMatchFilter,
    pub supervisor: SupervisorSettings,
    pub transfer_timeout: Duration,
}

fn run(
    settings: WorkerSettings,
    events: EventSender<RusbDevice>,
    receiver: EventReceiver<RusbDevice>,
    ready: oneshot::Sender<Result<(), SupervisorError>>,
) {
    let startup = RusbBus::new(settings.transfer_timeout)
        .map_err(SupervisorError::Usb)
        .and_then(|bus| {
            let source = RusbEventSource::register(&bus, &settings.filter, events, receiver)?;
            let mut supervisor = Supervisor::new(bus, settings.filter, settings.supervisor);
            supervisor.start()?;
            Ok((supervisor, source))
        });

    let (mut supervisor, mut source) = match startup {
        Ok(started) => {
            let _ = ready.send(Ok(()));
            started
        }
        Err(e) => {
            error!("USB worker failed to start: {}", e);
            let _ = ready.send(Err(e));
            return;
        }
    };

    info!("USB worker thread started");
    supervisor.serve(&mut source);
    info!("USB worker thread stopped");
}

/// Spawn the USB worker thread
///
/// The returned receiver resolves once the supervisor is running, or with
/// the fatal error that prevented it from starting.
pub fn spawn_usb_worker(
    settings: WorkerSettings,
    events: EventSender<RusbDevice>,
    receiver: EventReceiver<RusbDevice>,
) -> (
    std::thread::JoinHandle<()>,
    oneshot::Receiver<Result<(), SupervisorError>>,
) {
    let (ready_tx, ready_rx) = oneshot::channel();

    let handle = std::thread::Builder::new()
        .name("usb-worker".to_string())
        .spawn(move || run(settings, events, receiver, ready_tx))
        .expect("Failed to spawn USB worker thread");

    (handle, ready_rx)
}
