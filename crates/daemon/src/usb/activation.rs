//! Activation sequencer
//!
//! Best effort: every step of [`ACTIVATION_SEQUENCE`] is attempted in order
//! even when an earlier one fails, so that whatever can come up does.

use crate::usb::outcome::{ActivationOutcome, StepFailure};
use crate::usb::transfers::send;
use common::UsbDeviceHandle;
use protocol::ACTIVATION_SEQUENCE;
use tracing::{info, warn};

/// Send the activation sequence to an open interface
pub fn activate<H: UsbDeviceHandle>(handle: &mut H, interface: &H::Interface) -> ActivationOutcome {
    let mut failures = Vec::new();

    for step in &ACTIVATION_SEQUENCE {
        if let Err(error) = send(handle, interface, step.write) {
            warn!(status = %error.status, "Error while trying to {}", step.action);
            failures.push(StepFailure {
                step: step.action,
                error,
            });
        }
    }

    let outcome = ActivationOutcome::from_failures(failures);
    if outcome.is_success() {
        info!("Successfully sent CM6206 activation commands");
    }
    outcome
}
