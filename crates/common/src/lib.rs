//! Common utilities for cm6206-enabler
//!
//! This crate provides the plumbing shared by the activation engine and its
//! tests: the USB platform abstraction, the lifecycle event bridge between
//! notification producers and the supervisor thread, error handling, logging
//! setup and a scripted mock USB bus.

pub mod channel;
pub mod error;
pub mod logging;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod usb_types;

pub use channel::{
    EventReceiver, EventSender, LifecycleEvent, PowerEvent, SleepAck, create_event_bridge,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use usb_types::{
    DeviceKey, InterfaceInfo, InterfaceRequest, UsbBus, UsbDevice, UsbDeviceHandle, UsbInterface,
};
