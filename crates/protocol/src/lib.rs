//! CM6206 control protocol
//!
//! This crate defines the small vendor protocol used to bring the outputs of
//! C-Media CM6206 based USB audio adapters online. The chip is USB audio class
//! compliant but boots with its outputs disabled; a fixed sequence of
//! class-scoped register writes on the control pipe enables them.
//!
//! # Example
//!
//! ```
//! use protocol::{ACTIVATION_SEQUENCE, REGISTER_WRITE_SETUP};
//!
//! // Every activation command travels with the same setup packet
//! assert_eq!(REGISTER_WRITE_SETUP.request_type, 0x21);
//! assert_eq!(REGISTER_WRITE_SETUP.request, 0x09);
//!
//! // First command resets the chip registers
//! assert_eq!(ACTIVATION_SEQUENCE[0].write.payload(), [0x20, 0x00, 0x00, 0x00]);
//! ```

pub mod commands;
pub mod types;

pub use commands::{
    ACTIVATION_SEQUENCE, ActivationStep, REGISTER_WRITE_MARKER, REGISTER_WRITE_SETUP,
    RegisterWrite, TARGET_INTERFACE_ORDINAL,
};
pub use types::{
    CM6206_PRODUCT_ID, CM6206_VENDOR_ID, ControlSetup, DeviceMatchFilter, Direction, Recipient,
    RequestKind, UsbError, request_type,
};
