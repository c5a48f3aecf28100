//! Device session
//!
//! Opens one device, selects its first configuration, hands the interface
//! list to the claimer and closes the device again on every exit path.

use crate::usb::claimer::claim_and_activate;
use crate::usb::outcome::{ActivationOutcome, SessionError};
use common::{DeviceKey, InterfaceRequest, UsbDevice, UsbDeviceHandle};
use protocol::UsbError;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Retry policy for opening a device
///
/// Freshly attached devices are not always ready to be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub open_attempts: u32,
    /// Pause between two attempts (never after the last one)
    pub open_retry_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            open_attempts: 20,
            open_retry_interval: Duration::from_secs(1),
        }
    }
}

/// Opened device, closed on drop if [`DeviceGuard::close`] was not called
struct DeviceGuard<H: UsbDeviceHandle> {
    key: DeviceKey,
    handle: H,
    open: bool,
}

impl<H: UsbDeviceHandle> DeviceGuard<H> {
    fn new(key: DeviceKey, handle: H) -> Self {
        Self {
            key,
            handle,
            open: true,
        }
    }

    fn close(mut self) -> Result<(), UsbError> {
        self.open = false;
        self.handle.close()
    }
}

impl<H: UsbDeviceHandle> Drop for DeviceGuard<H> {
    fn drop(&mut self) {
        if self.open
            && let Err(e) = self.handle.close()
        {
            warn!(device = %self.key, "Unable to close device: {}", e);
        }
    }
}

/// Open `device`, retrying up to `settings.open_attempts` times
pub fn open_with_retry<D: UsbDevice>(
    device: &D,
    settings: &SessionSettings,
) -> Result<D::Handle, SessionError> {
    let key = device.key();
    let attempts = settings.open_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match device.open() {
            Ok(handle) => {
                debug!(device = %key, attempt, "Device opened");
                return Ok(handle);
            }
            Err(source) if attempt >= attempts => {
                return Err(SessionError::DeviceOpen {
                    attempts: attempt,
                    source,
                });
            }
            Err(e) => {
                warn!(
                    device = %key,
                    status = %e,
                    "Trying to open device, {} attempt(s) left...",
                    attempts - attempt
                );
                std::thread::sleep(settings.open_retry_interval);
            }
        }
    }
}

/// Select the first configuration and list every interface of it
fn configure<H: UsbDeviceHandle>(handle: &mut H) -> Result<Vec<H::Interface>, SessionError> {
    let count = handle
        .num_configurations()
        .map_err(SessionError::ConfigurationCount)?;
    if count == 0 {
        return Err(SessionError::NoConfigurations);
    }

    let value = handle
        .set_configuration(0)
        .map_err(SessionError::Configuration)?;
    debug!(configuration = value, "Configuration selected");

    handle
        .interfaces(&InterfaceRequest::ANY)
        .map_err(SessionError::InterfaceIterator)
}

/// Run one activation session against `device`
pub fn run_session<D: UsbDevice>(device: &D, settings: &SessionSettings) -> ActivationOutcome {
    let key = device.key();

    let handle = match open_with_retry(device, settings) {
        Ok(handle) => handle,
        Err(reason) => {
            warn!(device = %key, "{}", reason);
            return ActivationOutcome::aborted(reason);
        }
    };
    let mut guard = DeviceGuard::new(key, handle);

    let outcome = match configure(&mut guard.handle) {
        Ok(interfaces) => claim_and_activate(&mut guard.handle, interfaces),
        Err(reason) => ActivationOutcome::aborted(reason),
    };

    match &outcome {
        ActivationOutcome::Succeeded => info!(device = %key, "Device activated"),
        ActivationOutcome::PartiallyFailed { failures } => {
            warn!(
                device = %key,
                "Device partially activated, {} of 3 command(s) failed",
                failures.len()
            );
        }
        ActivationOutcome::Aborted { reason } => warn!(device = %key, "{}", reason),
    }

    if let Err(e) = guard.close() {
        warn!(device = %key, "Unable to close device: {}", e);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{MockBus, MockCall, MockDeviceSpec};
    use std::time::Instant;

    fn fast() -> SessionSettings {
        SessionSettings {
            open_attempts: 20,
            open_retry_interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_default_settings() {
        let settings = SessionSettings::default();
        assert_eq!(settings.open_attempts, 20);
        assert_eq!(settings.open_retry_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_open_retry_stops_after_success() {
        let bus = MockBus::new();
        let key = bus.add_device(MockDeviceSpec::cm6206(7).fail_open(3));
        let device = bus.device(key).unwrap();

        assert!(open_with_retry(&device, &fast()).is_ok());
        assert_eq!(bus.log().count(|c| matches!(c, MockCall::DeviceOpen { .. })), 4);
    }

    #[test]
    fn test_open_retry_is_bounded() {
        let bus = MockBus::new();
        let key = bus.add_device(MockDeviceSpec::cm6206(7).fail_open(100));
        let device = bus.device(key).unwrap();

        let error = open_with_retry(&device, &fast()).err();
        assert_eq!(
            error,
            Some(SessionError::DeviceOpen {
                attempts: 20,
                source: UsbError::Busy
            })
        );
        assert_eq!(bus.log().count(|c| matches!(c, MockCall::DeviceOpen { .. })), 20);
    }

    #[test]
    fn test_no_sleep_after_last_attempt() {
        let bus = MockBus::new();
        let key = bus.add_device(MockDeviceSpec::cm6206(7).fail_open(100));
        let device = bus.device(key).unwrap();
        let settings = SessionSettings {
            open_attempts: 1,
            open_retry_interval: Duration::from_secs(5),
        };

        let started = Instant::now();
        assert!(open_with_retry(&device, &settings).is_err());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_device_closed_after_structural_abort() {
        let bus = MockBus::new();
        let key = bus.add_device(MockDeviceSpec::cm6206(7).with_configurations(0));
        let device = bus.device(key).unwrap();

        let outcome = run_session(&device, &fast());
        assert_eq!(outcome, ActivationOutcome::aborted(SessionError::NoConfigurations));

        let log = bus.log();
        assert_eq!(log.count(|c| matches!(c, MockCall::SetConfiguration { .. })), 0);
        assert_eq!(log.count(|c| matches!(c, MockCall::DeviceClose { .. })), 1);
        assert_eq!(log.count(|c| matches!(c, MockCall::HandleReleased { .. })), 1);
    }

    #[test]
    fn test_failed_open_has_nothing_to_close() {
        let bus = MockBus::new();
        let key = bus.add_device(MockDeviceSpec::cm6206(7).fail_open(100));
        let device = bus.device(key).unwrap();

        let outcome = run_session(&device, &SessionSettings {
            open_attempts: 2,
            open_retry_interval: Duration::from_millis(1),
        });
        assert!(outcome.is_aborted());
        assert_eq!(bus.log().count(|c| matches!(c, MockCall::DeviceClose { .. })), 0);
    }
}
