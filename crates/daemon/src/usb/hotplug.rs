//! Hot-plug notifications
//!
//! libusb delivers arrivals and removals from inside `handle_events`, on the
//! thread that calls it. The callback only enqueues events on the bridge;
//! the supervisor picks them up after `handle_events` returns, so no device
//! I/O ever happens inside a callback.

use crate::supervisor::{EventSource, SupervisorError};
use crate::usb::device::{RusbBus, RusbDevice};
use crate::usb::transfers::map_rusb_error;
use common::{DeviceKey, EventReceiver, EventSender, LifecycleEvent};
use protocol::DeviceMatchFilter;
use rusb::{Context, Device, Hotplug, HotplugBuilder, Registration, UsbContext};
use std::time::Duration;
use tracing::{debug, warn};

/// How long one `handle_events` call may block
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Hot-plug callback handler
struct HotplugCallback {
    events: EventSender<RusbDevice>,
    transfer_timeout: Duration,
}

impl Hotplug<Context> for HotplugCallback {
    fn device_arrived(&mut self, device: Device<Context>) {
        let key = DeviceKey::new(device.bus_number(), device.address());
        debug!(device = %key, "Hot-plug callback: device arrived");

        match RusbDevice::new(device, self.transfer_timeout) {
            Ok(device) => {
                if let Err(e) = self.events.push(LifecycleEvent::DevicesAdded(vec![device])) {
                    warn!(device = %key, "Failed to queue arrival: {}", e);
                }
            }
            Err(e) => warn!(device = %key, "Unable to read device descriptor: {}", e),
        }
    }

    fn device_left(&mut self, device: Device<Context>) {
        let key = DeviceKey::new(device.bus_number(), device.address());
        debug!(device = %key, "Hot-plug callback: device left");

        if let Err(e) = self.events.push(LifecycleEvent::DeviceRemoved(key)) {
            warn!(device = %key, "Failed to queue removal: {}", e);
        }
    }
}

/// Event source for the supervisor thread
///
/// Interleaves draining the bridge with libusb event handling. Already
/// attached devices are delivered as initial arrivals.
pub struct RusbEventSource {
    context: Context,
    receiver: EventReceiver<RusbDevice>,
    poll_interval: Duration,
    _registration: Registration<Context>,
}

impl RusbEventSource {
    /// Register for arrivals and removals of devices matching `filter`
    ///
    /// Arrivals of devices already present are queued during registration.
    pub fn register(
        bus: &RusbBus,
        filter: &DeviceMatchFilter,
        events: EventSender<RusbDevice>,
        receiver: EventReceiver<RusbDevice>,
    ) -> Result<Self, SupervisorError> {
        if !rusb::has_hotplug() {
            return Err(SupervisorError::HotplugUnsupported);
        }

        let callback = HotplugCallback {
            events,
            transfer_timeout: bus.transfer_timeout(),
        };

        let registration = HotplugBuilder::new()
            .vendor_id(filter.vendor_id)
            .product_id(filter.product_id)
            .enumerate(true)
            .register(bus.context(), Box::new(callback))
            .map_err(|e| SupervisorError::Hotplug(map_rusb_error(e)))?;

        debug!(filter = %filter, "Hot-plug callbacks registered");
        Ok(Self {
            context: bus.context().clone(),
            receiver,
            poll_interval: POLL_INTERVAL,
            _registration: registration,
        })
    }
}

impl EventSource<RusbDevice> for RusbEventSource {
    fn next_event(&mut self) -> Option<LifecycleEvent<RusbDevice>> {
        loop {
            match self.receiver.try_recv() {
                Ok(Some(event)) => return Some(event),
                Ok(None) => {}
                Err(_) => return None,
            }

            match self.context.handle_events(Some(self.poll_interval)) {
                Ok(()) => {}
                Err(rusb::Error::Interrupted) => {
                    debug!("USB event handling interrupted");
                }
                Err(e) => {
                    warn!("Error handling USB events: {}", e);
                    std::thread::sleep(self.poll_interval);
                }
            }
        }
    }
}
