//! CM6206 register commands
//!
//! The chip accepts register writes as a 4 byte HID-style output report sent
//! with a class SET_REPORT request to interface 3. Values come from USB sniff
//! logs of the vendor driver and from the ALSA usb-audio quirks.

use crate::types::{ControlSetup, Direction, Recipient, RequestKind, request_type};

/// First byte of every register write report
pub const REGISTER_WRITE_MARKER: u8 = 0x20;

/// Ordinal (in descriptor order) of the interface that carries the control
/// endpoint used for activation. A property of the chip, not discovered.
pub const TARGET_INTERFACE_ORDINAL: usize = 1;

/// Setup packet shared by all register writes
pub const REGISTER_WRITE_SETUP: ControlSetup = ControlSetup {
    request_type: request_type(Direction::Out, RequestKind::Class, Recipient::Interface),
    request: 0x09,
    value: 0x0200,
    index: 0x03,
};

/// A single register write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    pub byte1: u8,
    pub byte2: u8,
    pub register: u8,
}

impl RegisterWrite {
    pub const fn new(byte1: u8, byte2: u8, register: u8) -> Self {
        Self {
            byte1,
            byte2,
            register,
        }
    }

    /// Wire payload: `[0x20, byte1, byte2, register]`
    pub const fn payload(&self) -> [u8; 4] {
        [REGISTER_WRITE_MARKER, self.byte1, self.byte2, self.register]
    }
}

/// One named step of the activation sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationStep {
    /// What the step does, used in diagnostics
    pub action: &'static str,
    pub write: RegisterWrite,
}

/// Commands that bring the outputs online, in the order they must be sent
pub const ACTIVATION_SEQUENCE: [ActivationStep; 3] = [
    ActivationStep {
        action: "reset registers",
        write: RegisterWrite::new(0x00, 0x00, 0x00),
    },
    ActivationStep {
        action: "enable S/PDIF output",
        write: RegisterWrite::new(0x00, 0x30, 0x01),
    },
    // Line-out driver mode, headphone source on the front channels.
    // On the CM6206 this turns on every analog output.
    ActivationStep {
        action: "enable analog output",
        write: RegisterWrite::new(0x04, 0x80, 0x02),
    },
];
