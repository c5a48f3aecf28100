//! Interface claimer
//!
//! Picks the interface carrying the vendor control endpoint, opens it
//! (seizing it from its current holder if needed), runs the activation
//! sequence and closes it again on every path.

use crate::usb::activation::activate;
use crate::usb::outcome::{ActivationOutcome, SessionError};
use common::{UsbDeviceHandle, UsbInterface};
use protocol::{TARGET_INTERFACE_ORDINAL, UsbError};
use tracing::{debug, warn};

/// An interface opened on a device handle
///
/// Closed on drop if [`OpenInterface::close`] was not called.
pub struct OpenInterface<'a, H: UsbDeviceHandle> {
    handle: &'a mut H,
    interface: H::Interface,
    open: bool,
}

impl<'a, H: UsbDeviceHandle> OpenInterface<'a, H> {
    /// Open `interface`, falling back to exactly one seize attempt
    pub fn open(handle: &'a mut H, interface: H::Interface) -> Result<Self, SessionError> {
        let number = interface.info().number;

        if let Err(open) = handle.open_interface(&interface) {
            debug!(interface = number, status = %open, "Interface busy, seizing it");
            if let Err(seize) = handle.seize_interface(&interface) {
                return Err(SessionError::InterfaceOpen {
                    number,
                    open,
                    seize,
                });
            }
        }

        debug!(interface = number, "Interface opened");
        Ok(Self {
            handle,
            interface,
            open: true,
        })
    }

    pub fn number(&self) -> u8 {
        self.interface.info().number
    }

    /// Device handle and interface, for issuing transfers
    pub fn parts(&mut self) -> (&mut H, &H::Interface) {
        (&mut *self.handle, &self.interface)
    }

    /// Close the interface, reporting failure
    pub fn close(mut self) -> Result<(), UsbError> {
        self.open = false;
        self.handle.close_interface(&self.interface)
    }
}

impl<H: UsbDeviceHandle> Drop for OpenInterface<'_, H> {
    fn drop(&mut self) {
        if self.open
            && let Err(e) = self.handle.close_interface(&self.interface)
        {
            warn!(interface = self.number(), "Unable to close interface: {}", e);
        }
    }
}

/// Select the target interface from `interfaces` (descriptor order), claim
/// it and run the activation sequence
///
/// Every other interface reference is released without being opened.
pub fn claim_and_activate<H: UsbDeviceHandle>(
    handle: &mut H,
    interfaces: Vec<H::Interface>,
) -> ActivationOutcome {
    let found = interfaces.len();
    let mut target = None;

    for (ordinal, interface) in interfaces.into_iter().enumerate() {
        if ordinal == TARGET_INTERFACE_ORDINAL {
            target = Some(interface);
        } else {
            debug!(
                interface = interface.info().number,
                ordinal, "Skipping interface"
            );
        }
    }

    let Some(interface) = target else {
        return ActivationOutcome::aborted(SessionError::InterfaceNotFound {
            ordinal: TARGET_INTERFACE_ORDINAL,
            found,
        });
    };

    let mut claimed = match OpenInterface::open(handle, interface) {
        Ok(claimed) => claimed,
        Err(reason) => return ActivationOutcome::aborted(reason),
    };

    let outcome = {
        let (handle, interface) = claimed.parts();
        activate(handle, interface)
    };

    let number = claimed.number();
    if let Err(e) = claimed.close() {
        // Outcome stands; the interface is abandoned either way
        warn!(interface = number, "Unable to close interface: {}", e);
    }

    outcome
}
