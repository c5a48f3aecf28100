//! CM6206 activation engine
//!
//! One-shot scanning and daemon-mode lifecycle supervision for C-Media
//! CM6206 USB audio adapters. The engine is generic over the platform traits
//! in [`common::usb_types`]; [`usb::device`] provides the libusb backend.

pub mod cli;
pub mod config;
pub mod power;
pub mod service;
pub mod signals;
pub mod supervisor;
pub mod usb;

pub use config::EnablerConfig;
pub use supervisor::{EventSource, Supervisor, SupervisorError, SupervisorSettings, SupervisorState};
pub use usb::{ActivationOutcome, ScanReport, SessionError, SessionSettings, StepFailure, scan};
