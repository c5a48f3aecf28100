//! Test utilities for cm6206-enabler
//!
//! Provides a scripted in-memory USB bus implementing the platform traits,
//! plus helpers for async tests. Every call the engine makes and every
//! reference it drops is written to a shared [`MockLog`], so tests can assert
//! ordering and release-exactly-once properties.

use crate::usb_types::{
    DeviceKey, InterfaceInfo, InterfaceRequest, UsbBus, UsbDevice, UsbDeviceHandle, UsbInterface,
};
use protocol::{CM6206_PRODUCT_ID, CM6206_VENDOR_ID, ControlSetup, DeviceMatchFilter, UsbError};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Bus number used by [`MockDeviceSpec::cm6206`]
pub const MOCK_BUS_NUMBER: u8 = 1;

/// One recorded interaction with the mock bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Enumerate,
    /// Descriptive name read, with the time it happened
    NameRead {
        device: DeviceKey,
        at: Instant,
    },
    DeviceOpen {
        device: DeviceKey,
        ok: bool,
    },
    NumConfigurations {
        device: DeviceKey,
    },
    SetConfiguration {
        device: DeviceKey,
        index: u8,
    },
    /// Interface listing; `returned` references were handed out
    Interfaces {
        device: DeviceKey,
        returned: usize,
    },
    InterfaceOpen {
        device: DeviceKey,
        interface: u8,
        ok: bool,
    },
    InterfaceSeize {
        device: DeviceKey,
        interface: u8,
        ok: bool,
    },
    InterfaceClose {
        device: DeviceKey,
        interface: u8,
    },
    ControlOut {
        device: DeviceKey,
        interface: u8,
        setup: ControlSetup,
        data: Vec<u8>,
        ok: bool,
    },
    ClearStall {
        device: DeviceKey,
        interface: u8,
    },
    DeviceClose {
        device: DeviceKey,
    },
    /// An interface reference was dropped
    InterfaceReleased {
        device: DeviceKey,
        interface: u8,
    },
    /// An opened device handle was dropped
    HandleReleased {
        device: DeviceKey,
    },
    /// An unopened device reference was dropped
    DeviceReleased {
        device: DeviceKey,
    },
}

/// Shared, ordered record of mock interactions
#[derive(Debug, Clone, Default)]
pub struct MockLog {
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockLog {
    fn lock(&self) -> MutexGuard<'_, Vec<MockCall>> {
        // A panicking test thread must not hide the log from the others
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, call: MockCall) {
        self.lock().push(call);
    }

    /// Snapshot of every call so far
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().clone()
    }

    /// Number of recorded calls satisfying `predicate`
    pub fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        self.lock().iter().filter(|call| predicate(call)).count()
    }

    /// Payloads of every control transfer, in order
    pub fn control_payloads(&self) -> Vec<Vec<u8>> {
        self.lock()
            .iter()
            .filter_map(|call| match call {
                MockCall::ControlOut { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Payloads sent to one device, in order
    pub fn control_payloads_for(&self, key: DeviceKey) -> Vec<Vec<u8>> {
        self.lock()
            .iter()
            .filter_map(|call| match call {
                MockCall::ControlOut { device, data, .. } if *device == key => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

/// Script for one simulated device
#[derive(Debug, Clone)]
pub struct MockDeviceSpec {
    pub key: DeviceKey,
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: String,
    pub interfaces: Vec<InterfaceInfo>,
    /// Number of leading `open()` calls that fail with `Busy`
    pub open_failures: u32,
    pub num_configurations: Result<u8, UsbError>,
    pub configuration_error: Option<UsbError>,
    pub interfaces_error: Option<UsbError>,
    pub interface_open_error: Option<UsbError>,
    pub interface_seize_error: Option<UsbError>,
    pub interface_close_error: Option<UsbError>,
    pub device_close_error: Option<UsbError>,
    /// Control transfers whose payload matches fail with the given status
    pub transfer_failures: Vec<(Vec<u8>, UsbError)>,
}

impl MockDeviceSpec {
    /// A well-behaved CM6206 at `address` on bus 1 with three interfaces
    pub fn cm6206(address: u8) -> Self {
        Self {
            key: DeviceKey::new(MOCK_BUS_NUMBER, address),
            vendor_id: CM6206_VENDOR_ID,
            product_id: CM6206_PRODUCT_ID,
            name: "USB Sound Device".to_string(),
            interfaces: audio_interfaces(3),
            open_failures: 0,
            num_configurations: Ok(1),
            configuration_error: None,
            interfaces_error: None,
            interface_open_error: None,
            interface_seize_error: None,
            interface_close_error: None,
            device_close_error: None,
            transfer_failures: Vec::new(),
        }
    }

    pub fn with_ids(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_interface_count(mut self, count: u8) -> Self {
        self.interfaces = audio_interfaces(count);
        self
    }

    pub fn with_interfaces(mut self, interfaces: Vec<InterfaceInfo>) -> Self {
        self.interfaces = interfaces;
        self
    }

    pub fn fail_open(mut self, times: u32) -> Self {
        self.open_failures = times;
        self
    }

    pub fn with_configurations(mut self, count: u8) -> Self {
        self.num_configurations = Ok(count);
        self
    }

    pub fn fail_configuration_count(mut self, error: UsbError) -> Self {
        self.num_configurations = Err(error);
        self
    }

    pub fn fail_configuration(mut self, error: UsbError) -> Self {
        self.configuration_error = Some(error);
        self
    }

    pub fn fail_interfaces(mut self, error: UsbError) -> Self {
        self.interfaces_error = Some(error);
        self
    }

    pub fn fail_interface_open(mut self, error: UsbError) -> Self {
        self.interface_open_error = Some(error);
        self
    }

    pub fn fail_interface_seize(mut self, error: UsbError) -> Self {
        self.interface_seize_error = Some(error);
        self
    }

    pub fn fail_interface_close(mut self, error: UsbError) -> Self {
        self.interface_close_error = Some(error);
        self
    }

    pub fn fail_device_close(mut self, error: UsbError) -> Self {
        self.device_close_error = Some(error);
        self
    }

    pub fn fail_transfer(mut self, payload: [u8; 4], error: UsbError) -> Self {
        self.transfer_failures.push((payload.to_vec(), error));
        self
    }
}

/// Audio-class layout: control interface followed by streaming interfaces
fn audio_interfaces(count: u8) -> Vec<InterfaceInfo> {
    (0..count)
        .map(|number| InterfaceInfo {
            number,
            alternate_setting: 0,
            class: 0x01,
            subclass: if number == 0 { 0x01 } else { 0x02 },
            protocol: 0x00,
        })
        .collect()
}

#[derive(Debug)]
struct MockDeviceState {
    spec: MockDeviceSpec,
    open_failures_left: AtomicU32,
}

/// Scripted USB bus
///
/// Cloning shares the attached device set and the log.
#[derive(Debug, Clone, Default)]
pub struct MockBus {
    devices: Arc<Mutex<Vec<Arc<MockDeviceState>>>>,
    enumeration_error: Arc<Mutex<Option<UsbError>>>,
    log: MockLog,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn devices(&self) -> MutexGuard<'_, Vec<Arc<MockDeviceState>>> {
        self.devices.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach a device; returns its key
    pub fn add_device(&self, spec: MockDeviceSpec) -> DeviceKey {
        let key = spec.key;
        let state = Arc::new(MockDeviceState {
            open_failures_left: AtomicU32::new(spec.open_failures),
            spec,
        });
        self.devices().push(state);
        key
    }

    /// Detach a device; references already handed out stay usable
    pub fn remove_device(&self, key: DeviceKey) {
        self.devices().retain(|state| state.spec.key != key);
    }

    /// Fresh reference to an attached device, as a hotplug callback would
    /// deliver it
    pub fn device(&self, key: DeviceKey) -> Option<MockDevice> {
        self.devices()
            .iter()
            .find(|state| state.spec.key == key)
            .map(|state| MockDevice::new(Arc::clone(state), self.log.clone()))
    }

    pub fn fail_enumeration(&self, error: Option<UsbError>) {
        *self
            .enumeration_error
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = error;
    }

    pub fn log(&self) -> &MockLog {
        &self.log
    }
}

impl UsbBus for MockBus {
    type Device = MockDevice;

    fn matching_devices(&self, filter: &DeviceMatchFilter) -> Result<Vec<MockDevice>, UsbError> {
        self.log.push(MockCall::Enumerate);

        if let Some(error) = self
            .enumeration_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Err(error);
        }

        Ok(self
            .devices()
            .iter()
            .filter(|state| filter.matches(state.spec.vendor_id, state.spec.product_id))
            .map(|state| MockDevice::new(Arc::clone(state), self.log.clone()))
            .collect())
    }
}

/// Unopened reference to a mock device
#[derive(Debug)]
pub struct MockDevice {
    state: Arc<MockDeviceState>,
    log: MockLog,
}

impl MockDevice {
    fn new(state: Arc<MockDeviceState>, log: MockLog) -> Self {
        Self { state, log }
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.log.push(MockCall::DeviceReleased {
            device: self.state.spec.key,
        });
    }
}

impl UsbDevice for MockDevice {
    type Handle = MockHandle;

    fn key(&self) -> DeviceKey {
        self.state.spec.key
    }

    fn name(&self) -> String {
        self.log.push(MockCall::NameRead {
            device: self.key(),
            at: Instant::now(),
        });
        self.state.spec.name.clone()
    }

    fn open(&self) -> Result<MockHandle, UsbError> {
        let device = self.key();
        let failed = self
            .state
            .open_failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok();

        self.log.push(MockCall::DeviceOpen {
            device,
            ok: !failed,
        });

        if failed {
            return Err(UsbError::Busy);
        }

        Ok(MockHandle {
            state: Arc::clone(&self.state),
            log: self.log.clone(),
            open_interfaces: HashSet::new(),
            closed: false,
        })
    }
}

/// Opened mock device
///
/// Panics when used after `close()`, or when a transfer targets an interface
/// that is not open, so engine bugs surface as test failures.
#[derive(Debug)]
pub struct MockHandle {
    state: Arc<MockDeviceState>,
    log: MockLog,
    open_interfaces: HashSet<u8>,
    closed: bool,
}

impl MockHandle {
    fn key(&self) -> DeviceKey {
        self.state.spec.key
    }

    fn assert_open(&self) {
        assert!(!self.closed, "device {} used after close", self.key());
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.log.push(MockCall::HandleReleased { device: self.key() });
    }
}

impl UsbDeviceHandle for MockHandle {
    type Interface = MockInterface;

    fn num_configurations(&self) -> Result<u8, UsbError> {
        self.assert_open();
        self.log
            .push(MockCall::NumConfigurations { device: self.key() });
        self.state.spec.num_configurations.clone()
    }

    fn set_configuration(&mut self, index: u8) -> Result<u8, UsbError> {
        self.assert_open();
        self.log.push(MockCall::SetConfiguration {
            device: self.key(),
            index,
        });

        if let Some(error) = &self.state.spec.configuration_error {
            return Err(error.clone());
        }
        match &self.state.spec.num_configurations {
            Ok(count) if index < *count => Ok(index + 1),
            _ => Err(UsbError::NotFound),
        }
    }

    fn interfaces(&mut self, request: &InterfaceRequest) -> Result<Vec<MockInterface>, UsbError> {
        self.assert_open();
        let device = self.key();

        if let Some(error) = &self.state.spec.interfaces_error {
            self.log.push(MockCall::Interfaces {
                device,
                returned: 0,
            });
            return Err(error.clone());
        }

        let interfaces: Vec<MockInterface> = self
            .state
            .spec
            .interfaces
            .iter()
            .filter(|info| request.matches(info))
            .map(|info| MockInterface {
                device,
                info: *info,
                log: self.log.clone(),
            })
            .collect();
        self.log.push(MockCall::Interfaces {
            device,
            returned: interfaces.len(),
        });
        Ok(interfaces)
    }

    fn open_interface(&mut self, interface: &MockInterface) -> Result<(), UsbError> {
        self.assert_open();
        let number = interface.info.number;
        let result = match &self.state.spec.interface_open_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        };

        self.log.push(MockCall::InterfaceOpen {
            device: self.key(),
            interface: number,
            ok: result.is_ok(),
        });
        if result.is_ok() {
            self.open_interfaces.insert(number);
        }
        result
    }

    fn seize_interface(&mut self, interface: &MockInterface) -> Result<(), UsbError> {
        self.assert_open();
        let number = interface.info.number;
        let result = match &self.state.spec.interface_seize_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        };

        self.log.push(MockCall::InterfaceSeize {
            device: self.key(),
            interface: number,
            ok: result.is_ok(),
        });
        if result.is_ok() {
            self.open_interfaces.insert(number);
        }
        result
    }

    fn close_interface(&mut self, interface: &MockInterface) -> Result<(), UsbError> {
        self.assert_open();
        let number = interface.info.number;
        assert!(
            self.open_interfaces.remove(&number),
            "interface {} closed while not open",
            number
        );
        self.log.push(MockCall::InterfaceClose {
            device: self.key(),
            interface: number,
        });

        match &self.state.spec.interface_close_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn write_control(
        &mut self,
        interface: &MockInterface,
        setup: &ControlSetup,
        data: &[u8],
    ) -> Result<usize, UsbError> {
        self.assert_open();
        let number = interface.info.number;
        assert!(
            self.open_interfaces.contains(&number),
            "transfer on interface {} which is not open",
            number
        );

        let failure = self
            .state
            .spec
            .transfer_failures
            .iter()
            .find(|(payload, _)| payload.as_slice() == data)
            .map(|(_, error)| error.clone());

        self.log.push(MockCall::ControlOut {
            device: self.key(),
            interface: number,
            setup: *setup,
            data: data.to_vec(),
            ok: failure.is_none(),
        });

        match failure {
            Some(error) => Err(error),
            None => Ok(data.len()),
        }
    }

    fn clear_stall(&mut self, interface: &MockInterface) -> Result<(), UsbError> {
        self.assert_open();
        self.log.push(MockCall::ClearStall {
            device: self.key(),
            interface: interface.info.number,
        });
        Ok(())
    }

    fn close(&mut self) -> Result<(), UsbError> {
        self.assert_open();
        self.closed = true;
        self.log.push(MockCall::DeviceClose { device: self.key() });

        match &self.state.spec.device_close_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

/// Mock interface reference
#[derive(Debug)]
pub struct MockInterface {
    device: DeviceKey,
    info: InterfaceInfo,
    log: MockLog,
}

impl UsbInterface for MockInterface {
    fn info(&self) -> InterfaceInfo {
        self.info
    }
}

impl Drop for MockInterface {
    fn drop(&mut self) {
        self.log.push(MockCall::InterfaceReleased {
            device: self.device,
            interface: self.info.number,
        });
    }
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumeration_filters_by_ids() {
        let bus = MockBus::new();
        bus.add_device(MockDeviceSpec::cm6206(2));
        bus.add_device(MockDeviceSpec::cm6206(3).with_ids(0x046d, 0x0a44));

        let devices = bus.matching_devices(&DeviceMatchFilter::cm6206()).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].key(), DeviceKey::new(1, 2));
    }

    #[test]
    fn test_open_failures_are_consumed() {
        let bus = MockBus::new();
        let key = bus.add_device(MockDeviceSpec::cm6206(2).fail_open(2));
        let device = bus.device(key).unwrap();

        assert_eq!(device.open().unwrap_err(), UsbError::Busy);
        assert_eq!(device.open().unwrap_err(), UsbError::Busy);
        assert!(device.open().is_ok());
    }

    #[test]
    fn test_drops_are_recorded() {
        let bus = MockBus::new();
        let key = bus.add_device(MockDeviceSpec::cm6206(2));

        {
            let device = bus.device(key).unwrap();
            let mut handle = device.open().unwrap();
            let interfaces = handle.interfaces(&InterfaceRequest::ANY).unwrap();
            assert_eq!(interfaces.len(), 3);
        }

        let log = bus.log();
        assert_eq!(
            log.count(|c| matches!(c, MockCall::InterfaceReleased { .. })),
            3
        );
        assert_eq!(
            log.count(|c| matches!(c, MockCall::HandleReleased { .. })),
            1
        );
        assert_eq!(
            log.count(|c| matches!(c, MockCall::DeviceReleased { .. })),
            1
        );
    }

    #[test]
    fn test_scripted_transfer_failure() {
        let bus = MockBus::new();
        let key = bus.add_device(
            MockDeviceSpec::cm6206(2).fail_transfer([0x20, 0, 0, 0], UsbError::Pipe),
        );
        let device = bus.device(key).unwrap();
        let mut handle = device.open().unwrap();
        let interfaces = handle.interfaces(&InterfaceRequest::ANY).unwrap();
        handle.open_interface(&interfaces[1]).unwrap();

        let setup = protocol::REGISTER_WRITE_SETUP;
        assert_eq!(
            handle.write_control(&interfaces[1], &setup, &[0x20, 0, 0, 0]),
            Err(UsbError::Pipe)
        );
        assert_eq!(
            handle.write_control(&interfaces[1], &setup, &[0x20, 0, 0x30, 1]),
            Ok(4)
        );
        assert_eq!(bus.log().control_payloads().len(), 2);
    }

    #[tokio::test]
    async fn test_with_timeout_success() {
        let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_failure() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
        })
        .await;
        assert!(result.is_err());
    }
}
