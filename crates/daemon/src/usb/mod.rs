//! USB subsystem
//!
//! The activation engine, leaf first:
//! - [`transfers`]: single register write with stall recovery
//! - [`activation`]: the fixed three-step sequence, failures aggregated
//! - [`claimer`]: target interface selection, open/seize and guaranteed close
//! - [`session`]: device open with bounded retry, configuration, dispatch
//! - [`scanner`]: enumerate matching devices and run a session on each
//!
//! plus the libusb backend ([`device`]), hot-plug delivery ([`hotplug`]) and
//! the dedicated thread the supervisor runs on ([`worker`]).

pub mod activation;
pub mod claimer;
pub mod device;
pub mod hotplug;
pub mod outcome;
pub mod scanner;
pub mod session;
pub mod transfers;
pub mod worker;

pub use activation::activate;
pub use claimer::{OpenInterface, claim_and_activate};
pub use device::{RusbBus, RusbDevice, RusbHandle, RusbInterface};
pub use hotplug::RusbEventSource;
pub use outcome::{ActivationOutcome, SessionError, StepFailure};
pub use scanner::{ScanReport, scan, scan_until_settled};
pub use session::{SessionSettings, run_session};
pub use transfers::{TransferError, map_rusb_error, send};
pub use worker::spawn_usb_worker;
