//! USB platform abstractions
//!
//! The activation engine is written against these traits rather than against
//! libusb directly. The daemon provides the libusb backend; tests use the
//! scripted bus in [`crate::test_utils`].
//!
//! Ownership follows the platform's manual release discipline: a value of one
//! of these types *is* the reference, and dropping it releases it.

use protocol::{ControlSetup, DeviceMatchFilter, UsbError};
use std::fmt;

/// Identity of an attached device: bus number plus address
///
/// Stable for as long as the device stays attached. A re-plug gets a new
/// address, so a stale key never aliases a new device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub bus: u8,
    pub address: u8,
}

impl DeviceKey {
    pub const fn new(bus: u8, address: u8) -> Self {
        Self { bus, address }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}:{:03}", self.bus, self.address)
    }
}

/// Descriptor-level facts about one interface of the active configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// bInterfaceNumber
    pub number: u8,
    /// bAlternateSetting
    pub alternate_setting: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
}

/// Interface iteration request
///
/// `None` in any field means "don't care".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterfaceRequest {
    pub class: Option<u8>,
    pub subclass: Option<u8>,
    pub protocol: Option<u8>,
    pub alternate_setting: Option<u8>,
}

impl InterfaceRequest {
    /// Matches every interface
    pub const ANY: Self = Self {
        class: None,
        subclass: None,
        protocol: None,
        alternate_setting: None,
    };

    pub fn matches(&self, info: &InterfaceInfo) -> bool {
        fn field(want: Option<u8>, have: u8) -> bool {
            want.is_none_or(|want| want == have)
        }

        field(self.class, info.class)
            && field(self.subclass, info.subclass)
            && field(self.protocol, info.protocol)
            && field(self.alternate_setting, info.alternate_setting)
    }
}

/// Enumeration entry point (the platform's "master" handle)
pub trait UsbBus {
    type Device: UsbDevice;

    /// All currently attached devices satisfying `filter`
    fn matching_devices(&self, filter: &DeviceMatchFilter) -> Result<Vec<Self::Device>, UsbError>;
}

/// Unopened device reference
pub trait UsbDevice {
    type Handle: UsbDeviceHandle;

    fn key(&self) -> DeviceKey;

    /// Human readable name for diagnostics
    fn name(&self) -> String;

    fn open(&self) -> Result<Self::Handle, UsbError>;
}

/// Interface reference obtained from an opened device
pub trait UsbInterface {
    fn info(&self) -> InterfaceInfo;
}

/// Opened device
///
/// Interface open/close are separate from the reference itself: a reference
/// can be released without ever being opened.
pub trait UsbDeviceHandle {
    type Interface: UsbInterface;

    fn num_configurations(&self) -> Result<u8, UsbError>;

    /// Make the configuration at descriptor `index` current; returns its
    /// bConfigurationValue
    fn set_configuration(&mut self, index: u8) -> Result<u8, UsbError>;

    /// Interfaces of the active configuration in descriptor order
    fn interfaces(&mut self, request: &InterfaceRequest)
    -> Result<Vec<Self::Interface>, UsbError>;

    /// Polite open: fails if another client holds the interface
    fn open_interface(&mut self, interface: &Self::Interface) -> Result<(), UsbError>;

    /// Forced open: takes the interface away from its current holder
    fn seize_interface(&mut self, interface: &Self::Interface) -> Result<(), UsbError>;

    fn close_interface(&mut self, interface: &Self::Interface) -> Result<(), UsbError>;

    /// Host-to-device control transfer on the default pipe
    fn write_control(
        &mut self,
        interface: &Self::Interface,
        setup: &ControlSetup,
        data: &[u8],
    ) -> Result<usize, UsbError>;

    /// Clear a stall on the default control pipe
    fn clear_stall(&mut self, interface: &Self::Interface) -> Result<(), UsbError>;

    /// Close the device; the handle must not be used afterwards
    fn close(&mut self) -> Result<(), UsbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(class: u8, alt: u8) -> InterfaceInfo {
        InterfaceInfo {
            number: 0,
            alternate_setting: alt,
            class,
            subclass: 1,
            protocol: 0,
        }
    }

    #[test]
    fn test_any_matches_everything() {
        assert!(InterfaceRequest::ANY.matches(&info(0x01, 0)));
        assert!(InterfaceRequest::ANY.matches(&info(0x03, 2)));
        assert_eq!(InterfaceRequest::default(), InterfaceRequest::ANY);
    }

    #[test]
    fn test_request_filters_fields() {
        let request = InterfaceRequest {
            class: Some(0x03),
            ..InterfaceRequest::ANY
        };
        assert!(request.matches(&info(0x03, 0)));
        assert!(!request.matches(&info(0x01, 0)));

        let alt_zero = InterfaceRequest {
            alternate_setting: Some(0),
            ..InterfaceRequest::ANY
        };
        assert!(alt_zero.matches(&info(0x01, 0)));
        assert!(!alt_zero.matches(&info(0x01, 1)));
    }

    #[test]
    fn test_device_key_display() {
        assert_eq!(DeviceKey::new(1, 7).to_string(), "001:007");
        assert_eq!(DeviceKey::new(12, 104).to_string(), "012:104");
    }
}
