//! Lifecycle supervisor
//!
//! Daemon-mode state machine. Consumes [`LifecycleEvent`]s one at a time on
//! a single thread and keeps one [`TrackedDevice`] per attached adapter:
//!
//! ```text
//! Idle --start()--> Running --Terminate / source closed--> Terminating
//! ```
//!
//! Device I/O runs synchronously inside event handling, so a slow device
//! delays every later event. Activation is serialized.

use crate::usb::{SessionSettings, run_session, scan};
use common::{DeviceKey, EventReceiver, LifecycleEvent, PowerEvent, UsbBus, UsbDevice};
use protocol::{DeviceMatchFilter, UsbError};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::ops::ControlFlow;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Supervisor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Created, not yet serving events
    Idle,
    /// Event loop active
    Running,
    /// Terminal; never left
    Terminating,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Terminating => "terminating",
        };
        f.write_str(name)
    }
}

/// Fatal supervisor errors
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("unable to initialise USB: {0}")]
    Usb(UsbError),

    #[error("libusb has no hot-plug support on this platform")]
    HotplugUnsupported,

    #[error("unable to register for hot-plug notifications: {0}")]
    Hotplug(UsbError),

    #[error("supervisor cannot start from state {0}")]
    AlreadyStarted(SupervisorState),
}

/// Supervisor timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub session: SessionSettings,
    /// Pause between a device appearing and its activation, so other software
    /// probing the new device gets out of the way first
    pub attach_delay: Duration,
    /// Pause between wake-up and the re-scan
    pub wake_delay: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            session: SessionSettings::default(),
            attach_delay: Duration::from_secs(1),
            wake_delay: Duration::from_secs(1),
        }
    }
}

/// Record kept for an attached device until its removal is observed
pub struct TrackedDevice<D> {
    key: DeviceKey,
    name: String,
    /// Retained reference, released with the record
    device: D,
}

impl<D> TrackedDevice<D> {
    pub fn key(&self) -> DeviceKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &D {
        &self.device
    }
}

/// Blocking supplier of lifecycle events
pub trait EventSource<D> {
    /// Next event; `None` once the source is exhausted
    fn next_event(&mut self) -> Option<LifecycleEvent<D>>;
}

impl<D> EventSource<D> for EventReceiver<D> {
    fn next_event(&mut self) -> Option<LifecycleEvent<D>> {
        self.recv_blocking().ok()
    }
}

/// Daemon-mode supervisor
pub struct Supervisor<B: UsbBus> {
    bus: B,
    filter: DeviceMatchFilter,
    settings: SupervisorSettings,
    state: SupervisorState,
    tracked: HashMap<DeviceKey, TrackedDevice<B::Device>>,
}

impl<B: UsbBus> Supervisor<B> {
    pub fn new(bus: B, filter: DeviceMatchFilter, settings: SupervisorSettings) -> Self {
        Self {
            bus,
            filter,
            settings,
            state: SupervisorState::Idle,
            tracked: HashMap::new(),
        }
    }

    /// Enter `Running`; only valid from `Idle`
    pub fn start(&mut self) -> Result<(), SupervisorError> {
        if self.state != SupervisorState::Idle {
            return Err(SupervisorError::AlreadyStarted(self.state));
        }
        self.state = SupervisorState::Running;
        info!(filter = %self.filter, "Supervisor running");
        Ok(())
    }

    /// Start and serve events from `source` until terminated
    pub fn run<S: EventSource<B::Device>>(&mut self, source: &mut S) -> Result<(), SupervisorError> {
        self.start()?;
        self.serve(source);
        Ok(())
    }

    /// Serve events from `source` while running
    ///
    /// An exhausted source terminates the supervisor.
    pub fn serve<S: EventSource<B::Device>>(&mut self, source: &mut S) {
        while self.state == SupervisorState::Running {
            match source.next_event() {
                Some(event) => {
                    if self.handle_event(event).is_break() {
                        break;
                    }
                }
                None => {
                    info!("Event source closed, stopping");
                    self.state = SupervisorState::Terminating;
                }
            }
        }
    }

    /// Apply one event
    ///
    /// Breaks once the supervisor is terminating. Outside `Running` events are
    /// dropped, except that sleep requests are still acknowledged.
    pub fn handle_event(&mut self, event: LifecycleEvent<B::Device>) -> ControlFlow<()> {
        if self.state != SupervisorState::Running {
            debug!(state = %self.state, "Dropping event received outside running state");
            if let LifecycleEvent::Power(PowerEvent::CanSleep(ack) | PowerEvent::WillSleep(ack)) =
                event
            {
                ack.allow();
            }
            return match self.state {
                SupervisorState::Terminating => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            };
        }

        match event {
            LifecycleEvent::DevicesAdded(devices) => {
                for device in devices {
                    self.device_added(device);
                }
            }
            LifecycleEvent::DeviceRemoved(key) => self.device_removed(key),
            LifecycleEvent::Power(event) => self.power_changed(event),
            LifecycleEvent::Rescan => {
                info!("Re-scanning USB bus");
                self.rescan();
            }
            LifecycleEvent::Terminate => {
                info!("Terminating");
                self.state = SupervisorState::Terminating;
                return ControlFlow::Break(());
            }
        }

        ControlFlow::Continue(())
    }

    fn device_added(&mut self, device: B::Device) {
        let key = device.key();

        // Reading the name may open the device, so it waits for the settle too
        if !self.settings.attach_delay.is_zero() {
            std::thread::sleep(self.settings.attach_delay);
        }

        let record = match self.tracked.entry(key) {
            Entry::Occupied(entry) => {
                debug!(device = %key, "Device already tracked");
                entry.into_mut()
            }
            Entry::Vacant(entry) => {
                let name = device.name();
                info!(device = %key, "Device added: {}", name);
                entry.insert(TrackedDevice { key, name, device })
            }
        };

        run_session(&record.device, &self.settings.session);
    }

    fn device_removed(&mut self, key: DeviceKey) {
        match self.tracked.remove(&key) {
            Some(record) => info!(device = %key, "Device removed: {}", record.name),
            None => debug!(device = %key, "Removal of untracked device ignored"),
        }
    }

    fn power_changed(&mut self, event: PowerEvent) {
        match event {
            PowerEvent::CanSleep(ack) => {
                debug!("System may sleep, allowing");
                ack.allow();
            }
            PowerEvent::WillSleep(ack) => {
                debug!("System going to sleep, allowing");
                ack.allow();
            }
            PowerEvent::HasPoweredOn => {
                info!("System woke up, re-activating devices");
                if !self.settings.wake_delay.is_zero() {
                    std::thread::sleep(self.settings.wake_delay);
                }
                self.rescan();
            }
        }
    }

    fn rescan(&mut self) {
        match scan(&self.bus, &self.filter, &self.settings.session) {
            Ok(report) if !report.found() => info!("No CM6206 device found on the USB bus."),
            Ok(report) => debug!(
                "Re-scan activated {} of {} device(s)",
                report.succeeded(),
                report.sessions.len()
            ),
            Err(e) => warn!("Unable to enumerate USB devices: {}", e),
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_tracked(&self, key: DeviceKey) -> bool {
        self.tracked.contains_key(&key)
    }

    pub fn tracked(&self, key: DeviceKey) -> Option<&TrackedDevice<B::Device>> {
        self.tracked.get(&key)
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SleepAck;
    use common::test_utils::{MockBus, MockCall, MockDeviceSpec};

    fn supervisor(bus: &MockBus) -> Supervisor<MockBus> {
        let settings = SupervisorSettings {
            session: SessionSettings {
                open_attempts: 2,
                open_retry_interval: Duration::from_millis(1),
            },
            attach_delay: Duration::ZERO,
            wake_delay: Duration::ZERO,
        };
        Supervisor::new(bus.clone(), DeviceMatchFilter::cm6206(), settings)
    }

    #[test]
    fn test_start_only_from_idle() {
        let bus = MockBus::new();
        let mut supervisor = supervisor(&bus);
        assert_eq!(supervisor.state(), SupervisorState::Idle);

        supervisor.start().unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Running);
        assert!(matches!(
            supervisor.start(),
            Err(SupervisorError::AlreadyStarted(SupervisorState::Running))
        ));
    }

    #[test]
    fn test_terminate_is_final() {
        let bus = MockBus::new();
        let mut supervisor = supervisor(&bus);
        supervisor.start().unwrap();

        assert!(supervisor.handle_event(LifecycleEvent::Terminate).is_break());
        assert_eq!(supervisor.state(), SupervisorState::Terminating);
        assert!(supervisor.handle_event(LifecycleEvent::Rescan).is_break());
        assert!(supervisor.start().is_err());
        assert_eq!(bus.log().count(|c| matches!(c, MockCall::Enumerate)), 0);
    }

    #[test]
    fn test_idle_drops_events_but_acks_sleep() {
        let bus = MockBus::new();
        let key = bus.add_device(MockDeviceSpec::cm6206(4));
        let mut supervisor = supervisor(&bus);

        let added = LifecycleEvent::DevicesAdded(vec![bus.device(key).unwrap()]);
        assert!(supervisor.handle_event(added).is_continue());
        assert_eq!(supervisor.tracked_count(), 0);

        let (ack, mut waiter) = SleepAck::pair();
        supervisor.handle_event(LifecycleEvent::Power(PowerEvent::WillSleep(ack)));
        assert!(waiter.try_recv().is_ok());
    }

    #[test]
    fn test_removal_of_unknown_device_is_ignored() {
        let bus = MockBus::new();
        let mut supervisor = supervisor(&bus);
        supervisor.start().unwrap();

        let flow = supervisor.handle_event(LifecycleEvent::DeviceRemoved(DeviceKey::new(1, 99)));
        assert!(flow.is_continue());
        assert_eq!(supervisor.tracked_count(), 0);
        assert!(bus.log().calls().is_empty());
    }

    #[test]
    fn test_can_sleep_and_will_sleep_are_allowed() {
        let bus = MockBus::new();
        let mut supervisor = supervisor(&bus);
        supervisor.start().unwrap();

        let (can, mut can_waiter) = SleepAck::pair();
        let (will, mut will_waiter) = SleepAck::pair();
        supervisor.handle_event(LifecycleEvent::Power(PowerEvent::CanSleep(can)));
        supervisor.handle_event(LifecycleEvent::Power(PowerEvent::WillSleep(will)));

        assert!(can_waiter.try_recv().is_ok());
        assert!(will_waiter.try_recv().is_ok());
        // Sleep never touches the bus
        assert!(bus.log().calls().is_empty());
    }
}
