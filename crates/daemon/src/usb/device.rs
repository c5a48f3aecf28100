//! libusb backend
//!
//! Implements the platform traits on top of rusb. Interface "open" is a
//! plain claim; "seize" detaches whatever kernel driver holds the interface
//! first and re-attaches it when the interface is closed.

use crate::usb::transfers::map_rusb_error;
use common::{
    DeviceKey, InterfaceInfo, InterfaceRequest, UsbBus, UsbDevice, UsbDeviceHandle, UsbInterface,
};
use protocol::{ControlSetup, DeviceMatchFilter, UsbError};
use rusb::{ConfigDescriptor, Context, Device, DeviceDescriptor, DeviceHandle, UsbContext};
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for control transfers (5 seconds)
pub const DEFAULT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(5);

/// Enumeration entry point backed by a libusb context
#[derive(Clone)]
pub struct RusbBus {
    context: Context,
    transfer_timeout: Duration,
}

impl RusbBus {
    /// Create a bus on a fresh libusb context
    pub fn new(transfer_timeout: Duration) -> Result<Self, UsbError> {
        let context = Context::new().map_err(map_rusb_error)?;
        Ok(Self::with_context(context, transfer_timeout))
    }

    pub fn with_context(context: Context, transfer_timeout: Duration) -> Self {
        Self {
            context,
            transfer_timeout,
        }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn transfer_timeout(&self) -> Duration {
        self.transfer_timeout
    }
}

impl UsbBus for RusbBus {
    type Device = RusbDevice;

    fn matching_devices(&self, filter: &DeviceMatchFilter) -> Result<Vec<RusbDevice>, UsbError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;
        let mut matching = Vec::new();

        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    debug!(
                        "Skipping device bus={} addr={}: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    continue;
                }
            };

            if filter.matches(descriptor.vendor_id(), descriptor.product_id()) {
                matching.push(RusbDevice {
                    device,
                    descriptor,
                    transfer_timeout: self.transfer_timeout,
                });
            }
        }

        Ok(matching)
    }
}

/// Unopened libusb device reference
pub struct RusbDevice {
    device: Device<Context>,
    descriptor: DeviceDescriptor,
    transfer_timeout: Duration,
}

impl RusbDevice {
    /// Wrap a device delivered by a hotplug callback
    ///
    /// Only reads the cached device descriptor, which libusb allows from
    /// inside a callback.
    pub fn new(device: Device<Context>, transfer_timeout: Duration) -> Result<Self, UsbError> {
        let descriptor = device.device_descriptor().map_err(map_rusb_error)?;
        Ok(Self {
            device,
            descriptor,
            transfer_timeout,
        })
    }

    pub fn vendor_id(&self) -> u16 {
        self.descriptor.vendor_id()
    }

    pub fn product_id(&self) -> u16 {
        self.descriptor.product_id()
    }
}

impl UsbDevice for RusbDevice {
    type Handle = RusbHandle;

    fn key(&self) -> DeviceKey {
        DeviceKey::new(self.device.bus_number(), self.device.address())
    }

    /// Product string, or `vvvv:pppp` when it cannot be read
    fn name(&self) -> String {
        self.device
            .open()
            .and_then(|handle| handle.read_product_string_ascii(&self.descriptor))
            .unwrap_or_else(|_| format!("{:04x}:{:04x}", self.vendor_id(), self.product_id()))
    }

    fn open(&self) -> Result<RusbHandle, UsbError> {
        let handle = self.device.open().map_err(map_rusb_error)?;
        Ok(RusbHandle {
            handle,
            device: self.device.clone(),
            num_configurations: self.descriptor.num_configurations(),
            config: None,
            claimed: Vec::new(),
            detached: Vec::new(),
            transfer_timeout: self.transfer_timeout,
        })
    }
}

/// Interface reference within the selected configuration
#[derive(Debug, Clone, Copy)]
pub struct RusbInterface {
    info: InterfaceInfo,
}

impl UsbInterface for RusbInterface {
    fn info(&self) -> InterfaceInfo {
        self.info
    }
}

/// Opened libusb device
///
/// The underlying handle is closed by libusb when this value is dropped.
pub struct RusbHandle {
    handle: DeviceHandle<Context>,
    device: Device<Context>,
    num_configurations: u8,
    /// Descriptor of the configuration selected by `set_configuration`
    config: Option<ConfigDescriptor>,
    /// Interfaces we claimed
    claimed: Vec<u8>,
    /// Interfaces whose kernel driver we detached
    detached: Vec<u8>,
    transfer_timeout: Duration,
}

impl RusbHandle {
    fn reattach_kernel_driver(&mut self, number: u8) {
        if let Some(pos) = self.detached.iter().position(|n| *n == number) {
            self.detached.swap_remove(pos);
            match self.handle.attach_kernel_driver(number) {
                Ok(()) => debug!("Reattached kernel driver to interface {}", number),
                Err(e) => warn!(
                    "Could not reattach kernel driver to interface {}: {}",
                    number, e
                ),
            }
        }
    }
}

impl UsbDeviceHandle for RusbHandle {
    type Interface = RusbInterface;

    fn num_configurations(&self) -> Result<u8, UsbError> {
        Ok(self.num_configurations)
    }

    fn set_configuration(&mut self, index: u8) -> Result<u8, UsbError> {
        let config = self
            .device
            .config_descriptor(index)
            .map_err(map_rusb_error)?;
        let value = config.number();

        // Re-selecting the active configuration would reset the device and
        // fails while the kernel audio driver is bound
        match self.handle.active_configuration() {
            Ok(active) if active == value => {
                debug!("Configuration {} already active", value);
            }
            _ => self
                .handle
                .set_active_configuration(value)
                .map_err(map_rusb_error)?,
        }

        self.config = Some(config);
        Ok(value)
    }

    fn interfaces(&mut self, request: &InterfaceRequest) -> Result<Vec<RusbInterface>, UsbError> {
        let config = self.config.as_ref().ok_or(UsbError::NotFound)?;

        Ok(config
            .interfaces()
            .filter_map(|interface| {
                interface
                    .descriptors()
                    .map(|descriptor| InterfaceInfo {
                        number: descriptor.interface_number(),
                        alternate_setting: descriptor.setting_number(),
                        class: descriptor.class_code(),
                        subclass: descriptor.sub_class_code(),
                        protocol: descriptor.protocol_code(),
                    })
                    .find(|info| request.matches(info))
            })
            .map(|info| RusbInterface { info })
            .collect())
    }

    fn open_interface(&mut self, interface: &RusbInterface) -> Result<(), UsbError> {
        let number = interface.info.number;
        self.handle
            .claim_interface(number)
            .map_err(map_rusb_error)?;
        self.claimed.push(number);
        Ok(())
    }

    fn seize_interface(&mut self, interface: &RusbInterface) -> Result<(), UsbError> {
        let number = interface.info.number;

        if let Ok(true) = self.handle.kernel_driver_active(number) {
            debug!("Detaching kernel driver from interface {}", number);
            self.handle
                .detach_kernel_driver(number)
                .map_err(map_rusb_error)?;
            self.detached.push(number);
        }

        if let Err(e) = self.handle.claim_interface(number) {
            self.reattach_kernel_driver(number);
            return Err(map_rusb_error(e));
        }

        self.claimed.push(number);
        Ok(())
    }

    fn close_interface(&mut self, interface: &RusbInterface) -> Result<(), UsbError> {
        let number = interface.info.number;
        self.claimed.retain(|n| *n != number);

        let result = self
            .handle
            .release_interface(number)
            .map_err(map_rusb_error);
        self.reattach_kernel_driver(number);
        result
    }

    fn write_control(
        &mut self,
        _interface: &RusbInterface,
        setup: &ControlSetup,
        data: &[u8],
    ) -> Result<usize, UsbError> {
        self.handle
            .write_control(
                setup.request_type,
                setup.request,
                setup.value,
                setup.index,
                data,
                self.transfer_timeout,
            )
            .map_err(map_rusb_error)
    }

    fn clear_stall(&mut self, _interface: &RusbInterface) -> Result<(), UsbError> {
        self.handle.clear_halt(0x00).map_err(map_rusb_error)
    }

    fn close(&mut self) -> Result<(), UsbError> {
        // Anything still claimed goes back to the kernel
        for number in std::mem::take(&mut self.claimed) {
            if let Err(e) = self.handle.release_interface(number) {
                warn!("Failed to release interface {}: {}", number, e);
            }
            self.reattach_kernel_driver(number);
        }
        self.config = None;
        Ok(())
    }
}
