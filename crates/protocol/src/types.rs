//! USB type definitions
//!
//! Platform-neutral descriptions of the pieces of USB this protocol touches:
//! device identity, control request setup packets and transfer status codes.

use std::fmt;
use thiserror::Error;

/// C-Media vendor ID
pub const CM6206_VENDOR_ID: u16 = 0x0d8c;

/// CM6206 product ID
pub const CM6206_PRODUCT_ID: u16 = 0x0102;

/// Vendor/product pair used to restrict device enumeration
///
/// Immutable once built; one filter is created per scan or hot-plug
/// subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceMatchFilter {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
}

impl DeviceMatchFilter {
    /// Create a filter for the given vendor and product
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }

    /// Filter matching CM6206 adapters
    pub const fn cm6206() -> Self {
        Self::new(CM6206_VENDOR_ID, CM6206_PRODUCT_ID)
    }

    /// Check whether a device descriptor's ids satisfy this filter
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id == product_id
    }
}

impl Default for DeviceMatchFilter {
    fn default() -> Self {
        Self::cm6206()
    }
}

impl fmt::Display for DeviceMatchFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// Data stage direction (bit 7 of bmRequestType)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device
    Out,
    /// Device to host
    In,
}

/// Request kind (bits 5..6 of bmRequestType)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Standard,
    Class,
    Vendor,
}

/// Request recipient (bits 0..4 of bmRequestType)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

/// Compose a bmRequestType byte
pub const fn request_type(direction: Direction, kind: RequestKind, recipient: Recipient) -> u8 {
    let direction = match direction {
        Direction::Out => 0x00,
        Direction::In => 0x80,
    };
    let kind = match kind {
        RequestKind::Standard => 0x00,
        RequestKind::Class => 0x20,
        RequestKind::Vendor => 0x40,
    };
    let recipient = match recipient {
        Recipient::Device => 0x00,
        Recipient::Interface => 0x01,
        Recipient::Endpoint => 0x02,
        Recipient::Other => 0x03,
    };
    direction | kind | recipient
}

/// Setup packet of a control transfer (without wLength, which follows the data)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSetup {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
}

impl ControlSetup {
    /// Whether the data stage flows from host to device
    pub fn is_out(&self) -> bool {
        (self.request_type & 0x80) == 0
    }
}

/// USB status codes surfaced by a platform backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsbError {
    /// Transfer timed out
    #[error("I/O timeout")]
    Timeout,
    /// Endpoint stalled; the condition must be cleared before the pipe is usable
    #[error("pipe stalled, error needs to be cleared")]
    Pipe,
    /// Device was disconnected
    #[error("no such device (it may have been disconnected)")]
    NoDevice,
    /// Device, interface or configuration not found
    #[error("entity not found")]
    NotFound,
    /// Resource is held by someone else
    #[error("resource busy")]
    Busy,
    /// Buffer overflow
    #[error("data overrun")]
    Overflow,
    /// Generic I/O error
    #[error("general I/O error")]
    Io,
    /// Invalid parameter
    #[error("invalid argument")]
    InvalidParam,
    /// Access denied (permissions)
    #[error("access denied (insufficient permissions)")]
    Access,
    /// Other error with message
    #[error("{message}")]
    Other { message: String },
}

impl UsbError {
    /// Whether this status is a pipe stall
    pub fn is_stall(&self) -> bool {
        matches!(self, UsbError::Pipe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matches_exact_pair_only() {
        let filter = DeviceMatchFilter::cm6206();
        assert!(filter.matches(0x0d8c, 0x0102));
        assert!(!filter.matches(0x0d8c, 0x0103));
        assert!(!filter.matches(0x0d8d, 0x0102));
    }

    #[test]
    fn test_filter_display() {
        assert_eq!(DeviceMatchFilter::cm6206().to_string(), "0d8c:0102");
        assert_eq!(DeviceMatchFilter::new(0x1, 0xabcd).to_string(), "0001:abcd");
    }

    #[test]
    fn test_request_type_composition() {
        assert_eq!(
            request_type(Direction::Out, RequestKind::Class, Recipient::Interface),
            0x21
        );
        assert_eq!(
            request_type(Direction::In, RequestKind::Standard, Recipient::Device),
            0x80
        );
        assert_eq!(
            request_type(Direction::Out, RequestKind::Vendor, Recipient::Endpoint),
            0x42
        );
    }

    #[test]
    fn test_only_pipe_is_stall() {
        assert!(UsbError::Pipe.is_stall());
        assert!(!UsbError::Timeout.is_stall());
        assert!(
            !UsbError::Other {
                message: "x".to_string()
            }
            .is_stall()
        );
    }
}
