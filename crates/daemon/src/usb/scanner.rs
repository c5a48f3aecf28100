//! Bus scanner
//!
//! Runs a device session on every currently attached matching device. Used
//! for one-shot mode and to re-arm the daemon after a wake or SIGHUP.

use crate::usb::outcome::ActivationOutcome;
use crate::usb::session::{SessionSettings, run_session};
use common::{DeviceKey, UsbBus, UsbDevice};
use protocol::{DeviceMatchFilter, UsbError};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Per-device outcomes of one scan, in enumeration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub sessions: Vec<(DeviceKey, ActivationOutcome)>,
}

impl ScanReport {
    /// Whether at least one matching device was seen
    pub fn found(&self) -> bool {
        !self.sessions.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.sessions
            .iter()
            .filter(|(_, outcome)| outcome.is_success())
            .count()
    }
}

/// Activate every attached device matching `filter`
///
/// Fails only if the bus cannot be enumerated; per-device failures are
/// contained in the report.
pub fn scan<B: UsbBus>(
    bus: &B,
    filter: &DeviceMatchFilter,
    settings: &SessionSettings,
) -> Result<ScanReport, UsbError> {
    let devices = bus.matching_devices(filter)?;
    debug!(filter = %filter, "Found {} matching device(s)", devices.len());

    let mut report = ScanReport::default();
    for device in devices {
        let outcome = run_session(&device, settings);
        report.sessions.push((device.key(), outcome));
    }

    Ok(report)
}

/// Scan, then scan again for as long as `rescan` was raised meanwhile
///
/// Returns the report of the last scan.
pub fn scan_until_settled<B: UsbBus>(
    bus: &B,
    filter: &DeviceMatchFilter,
    settings: &SessionSettings,
    rescan: &AtomicBool,
) -> Result<ScanReport, UsbError> {
    loop {
        let report = scan(bus, filter, settings)?;
        if !rescan.swap(false, Ordering::SeqCst) {
            return Ok(report);
        }
        debug!("Re-scan requested, scanning again");
    }
}
