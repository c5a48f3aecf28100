//! System power notifications via systemd-logind
//!
//! logind emits `PrepareForSleep(true)` before suspending and
//! `PrepareForSleep(false)` after resuming. A *delay* inhibitor lock is held
//! while the system is awake; it is dropped once the supervisor has allowed
//! the transition, which tells logind it may proceed. A new lock is taken
//! after wake-up. The supervisor never delays sleep, so the lock is only held
//! for as long as the event takes to cross the bridge.

use common::{EventSender, LifecycleEvent, PowerEvent, SleepAck};
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use zbus::Connection;
use zbus::zvariant::OwnedFd;

/// Upper bound on how long sleep may wait for the supervisor
pub const SLEEP_ACK_TIMEOUT: Duration = Duration::from_secs(5);

#[zbus::proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1",
    gen_blocking = false
)]
trait Manager {
    /// Take an inhibitor lock, held for as long as the descriptor is open
    fn inhibit(&self, what: &str, who: &str, why: &str, mode: &str) -> zbus::Result<OwnedFd>;

    /// Sent before sleep (`start = true`) and after wake-up (`start = false`)
    #[zbus(signal)]
    fn prepare_for_sleep(&self, start: bool) -> zbus::Result<()>;
}

/// Power monitor failures
#[derive(Debug, Error)]
pub enum PowerError {
    #[error("unable to connect to the system bus: {0}")]
    Connection(#[source] zbus::Error),

    #[error("unable to reach systemd-logind: {0}")]
    Proxy(#[source] zbus::Error),

    #[error("unable to subscribe to sleep notifications: {0}")]
    Subscribe(#[source] zbus::Error),

    #[error("sleep notification stream failed: {0}")]
    Signal(#[source] zbus::Error),
}

const INHIBIT_WHAT: &str = "sleep";
const INHIBIT_WHO: &str = "cm6206-enabler";
const INHIBIT_WHY: &str = "Acknowledging sleep to the USB audio activator";
const INHIBIT_MODE: &str = "delay";

/// Registered logind sleep subscription
pub struct PowerMonitor {
    manager: ManagerProxy<'static>,
    signals: PrepareForSleepStream,
    inhibitor: Option<OwnedFd>,
}

impl PowerMonitor {
    /// Connect to logind and subscribe to sleep notifications
    ///
    /// Failure here is fatal for daemon mode. Failing to take the inhibitor
    /// lock is not; sleep then simply proceeds without waiting.
    pub async fn register() -> Result<Self, PowerError> {
        let connection = Connection::system().await.map_err(PowerError::Connection)?;
        let manager = ManagerProxy::new(&connection)
            .await
            .map_err(PowerError::Proxy)?;
        let signals = manager
            .receive_prepare_for_sleep()
            .await
            .map_err(PowerError::Subscribe)?;

        let mut monitor = Self {
            manager,
            signals,
            inhibitor: None,
        };
        monitor.inhibit().await;
        debug!("Registered for sleep notifications");
        Ok(monitor)
    }

    async fn inhibit(&mut self) {
        match self
            .manager
            .inhibit(INHIBIT_WHAT, INHIBIT_WHO, INHIBIT_WHY, INHIBIT_MODE)
            .await
        {
            Ok(fd) => {
                debug!("Sleep inhibitor taken");
                self.inhibitor = Some(fd);
            }
            Err(e) => warn!("Unable to take sleep inhibitor: {}", e),
        }
    }

    /// Forward sleep and wake notifications until the stream or the bridge
    /// closes
    pub async fn run<D: Send + 'static>(mut self, events: EventSender<D>) -> Result<(), PowerError> {
        while let Some(signal) = self.signals.next().await {
            let args = signal.args().map_err(PowerError::Signal)?;

            if args.start {
                info!("System is going to sleep");
                let (ack, allowed) = SleepAck::pair();
                if events
                    .send(LifecycleEvent::Power(PowerEvent::WillSleep(ack)))
                    .await
                    .is_err()
                {
                    break;
                }
                wait_for_ack(allowed, SLEEP_ACK_TIMEOUT).await;

                if self.inhibitor.take().is_some() {
                    debug!("Sleep inhibitor released");
                }
            } else {
                info!("System has powered on");
                if events
                    .send(LifecycleEvent::Power(PowerEvent::HasPoweredOn))
                    .await
                    .is_err()
                {
                    break;
                }
                self.inhibit().await;
            }
        }

        debug!("Power monitor stopped");
        Ok(())
    }
}

/// Wait for a sleep acknowledgement, giving up after `timeout`
///
/// Returns whether the transition was explicitly allowed.
pub async fn wait_for_ack(allowed: tokio::sync::oneshot::Receiver<()>, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, allowed).await {
        Ok(Ok(())) => {
            debug!("Sleep acknowledged");
            true
        }
        Ok(Err(_)) => {
            debug!("Sleep acknowledgement dropped");
            false
        }
        Err(_) => {
            warn!("No sleep acknowledgement after {:?}, proceeding", timeout);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_ack_allowed() {
        let (ack, allowed) = SleepAck::pair();
        ack.allow();
        assert!(wait_for_ack(allowed, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_wait_for_ack_dropped_token() {
        let (ack, allowed) = SleepAck::pair();
        drop(ack);
        assert!(!wait_for_ack(allowed, Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_ack_times_out() {
        let (_ack, allowed) = SleepAck::pair();
        assert!(!wait_for_ack(allowed, Duration::from_secs(5)).await);
    }
}
