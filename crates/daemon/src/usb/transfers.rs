//! Control-transfer client
//!
//! Issues single register writes on the default control pipe and maps rusb
//! status codes onto the protocol taxonomy.

use common::UsbDeviceHandle;
use protocol::{REGISTER_WRITE_SETUP, RegisterWrite, UsbError};
use thiserror::Error;
use tracing::{debug, warn};

/// A register write the device did not accept
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("control transfer failed: {status}")]
pub struct TransferError {
    pub status: UsbError,
}

/// Send one register write to an open interface
///
/// A stalled pipe is cleared before the stall is reported; the write itself
/// is not retried.
pub fn send<H: UsbDeviceHandle>(
    handle: &mut H,
    interface: &H::Interface,
    write: RegisterWrite,
) -> Result<(), TransferError> {
    let payload = write.payload();

    match handle.write_control(interface, &REGISTER_WRITE_SETUP, &payload) {
        Ok(written) if written == payload.len() => {
            debug!("Register write {:02x?} accepted", payload);
            Ok(())
        }
        Ok(written) => Err(TransferError {
            status: UsbError::Other {
                message: format!("short write: {} of {} bytes", written, payload.len()),
            },
        }),
        Err(status) => {
            if status.is_stall() {
                debug!("Control pipe stalled, clearing");
                if let Err(e) = handle.clear_stall(interface) {
                    warn!("Failed to clear stall: {}", e);
                }
            }
            Err(TransferError { status })
        }
    }
}

/// Map rusb errors to protocol UsbError
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        _ => UsbError::Other {
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::{MockBus, MockCall, MockDeviceSpec};
    use common::{InterfaceRequest, UsbDevice};

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::Timeout), UsbError::Timeout);
        assert_eq!(map_rusb_error(rusb::Error::Pipe), UsbError::Pipe);
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), UsbError::NoDevice);
        assert_eq!(map_rusb_error(rusb::Error::Busy), UsbError::Busy);
        assert_eq!(map_rusb_error(rusb::Error::Access), UsbError::Access);
        assert!(matches!(
            map_rusb_error(rusb::Error::NoMem),
            UsbError::Other { .. }
        ));
    }

    #[test]
    fn test_stall_is_cleared_and_reported() {
        let write = RegisterWrite::new(0x00, 0x30, 0x01);
        let bus = MockBus::new();
        let key = bus.add_device(MockDeviceSpec::cm6206(5).fail_transfer(write.payload(), UsbError::Pipe));

        let device = bus.device(key).unwrap();
        let mut handle = device.open().unwrap();
        let interfaces = handle.interfaces(&InterfaceRequest::ANY).unwrap();
        handle.open_interface(&interfaces[1]).unwrap();

        let result = send(&mut handle, &interfaces[1], write);
        assert_eq!(
            result,
            Err(TransferError {
                status: UsbError::Pipe
            })
        );

        let log = bus.log();
        assert_eq!(log.count(|c| matches!(c, MockCall::ClearStall { .. })), 1);
        // Clearing is recovery, not a retry
        assert_eq!(log.control_payloads().len(), 1);
    }

    #[test]
    fn test_other_errors_are_not_cleared() {
        let write = RegisterWrite::new(0x00, 0x00, 0x00);
        let bus = MockBus::new();
        let key = bus.add_device(MockDeviceSpec::cm6206(5).fail_transfer(write.payload(), UsbError::Timeout));

        let device = bus.device(key).unwrap();
        let mut handle = device.open().unwrap();
        let interfaces = handle.interfaces(&InterfaceRequest::ANY).unwrap();
        handle.open_interface(&interfaces[1]).unwrap();

        let error = send(&mut handle, &interfaces[1], write).unwrap_err();
        assert_eq!(error.status, UsbError::Timeout);
        assert_eq!(bus.log().count(|c| matches!(c, MockCall::ClearStall { .. })), 0);
    }

    #[test]
    fn test_write_uses_register_setup() {
        let bus = MockBus::new();
        let key = bus.add_device(MockDeviceSpec::cm6206(5));

        let device = bus.device(key).unwrap();
        let mut handle = device.open().unwrap();
        let interfaces = handle.interfaces(&InterfaceRequest::ANY).unwrap();
        handle.open_interface(&interfaces[1]).unwrap();

        send(&mut handle, &interfaces[1], RegisterWrite::new(0x04, 0x80, 0x02)).unwrap();

        let sent = bus.log().calls().into_iter().find_map(|call| match call {
            MockCall::ControlOut { setup, data, .. } => Some((setup, data)),
            _ => None,
        });
        assert_eq!(sent, Some((REGISTER_WRITE_SETUP, vec![0x20, 0x04, 0x80, 0x02])));
    }
}
