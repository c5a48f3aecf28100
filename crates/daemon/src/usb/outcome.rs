//! Activation results and structural errors

use crate::usb::transfers::TransferError;
use protocol::UsbError;
use std::fmt;
use thiserror::Error;

/// Structural failure that aborts a device session before or instead of
/// running the activation sequence
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("unable to open device after {attempts} attempt(s): {source}")]
    DeviceOpen { attempts: u32, source: UsbError },

    #[error("unable to get number of configurations: {0}")]
    ConfigurationCount(UsbError),

    #[error("device reports no configurations")]
    NoConfigurations,

    #[error("unable to select configuration: {0}")]
    Configuration(UsbError),

    #[error("unable to iterate interfaces: {0}")]
    InterfaceIterator(UsbError),

    #[error("interface #{ordinal} not present, device has {found}")]
    InterfaceNotFound { ordinal: usize, found: usize },

    #[error("unable to open interface {number}: {open}; seize also failed: {seize}")]
    InterfaceOpen {
        number: u8,
        open: UsbError,
        seize: UsbError,
    },
}

/// One failed step of the activation sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    /// Description of the step, e.g. "enable S/PDIF output"
    pub step: &'static str,
    pub error: TransferError,
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.error)
    }
}

/// Result of one device session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// Every command of the sequence was accepted
    Succeeded,
    /// The sequence ran to completion but some commands failed
    PartiallyFailed { failures: Vec<StepFailure> },
    /// A structural step failed; no command was sent
    Aborted { reason: SessionError },
}

impl ActivationOutcome {
    pub fn from_failures(failures: Vec<StepFailure>) -> Self {
        if failures.is_empty() {
            Self::Succeeded
        } else {
            Self::PartiallyFailed { failures }
        }
    }

    pub fn aborted(reason: SessionError) -> Self {
        Self::Aborted { reason }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

impl fmt::Display for ActivationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "activated"),
            Self::PartiallyFailed { failures } => {
                write!(f, "partially activated ({} step(s) failed)", failures.len())
            }
            Self::Aborted { reason } => write!(f, "aborted: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_failures() {
        assert_eq!(
            ActivationOutcome::from_failures(Vec::new()),
            ActivationOutcome::Succeeded
        );

        let failure = StepFailure {
            step: "reset registers",
            error: TransferError {
                status: UsbError::Timeout,
            },
        };
        let outcome = ActivationOutcome::from_failures(vec![failure]);
        assert!(!outcome.is_success());
        assert!(!outcome.is_aborted());
    }

    #[test]
    fn test_display() {
        let outcome = ActivationOutcome::aborted(SessionError::InterfaceNotFound {
            ordinal: 1,
            found: 1,
        });
        assert!(outcome.is_aborted());
        assert_eq!(
            outcome.to_string(),
            "aborted: interface #1 not present, device has 1"
        );
    }
}
