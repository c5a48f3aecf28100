//! Lifecycle event bridge
//!
//! Every notification the daemon reacts to (hot-plug, power, signals) is
//! funnelled through one channel into the supervisor thread. Producers live
//! on the Tokio runtime (power monitor, signal tasks) and on the USB thread
//! itself (libusb hotplug callbacks); the supervisor is the only consumer.

use async_channel::{Receiver, Sender, TryRecvError, unbounded};
use tokio::sync::oneshot;

use crate::usb_types::DeviceKey;

/// Single-use permission for a pending power transition
///
/// The power monitor holds the transition until the token is consumed.
/// Dropping the token without calling [`SleepAck::allow`] releases the waiter
/// as well, so a lost token can never block the system.
#[derive(Debug)]
pub struct SleepAck {
    tx: oneshot::Sender<()>,
}

impl SleepAck {
    /// Create a token and the receiver its owner waits on
    pub fn pair() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Allow the power transition
    pub fn allow(self) {
        // Waiter gone means the transition already proceeded
        let _ = self.tx.send(());
    }
}

/// System power notifications
#[derive(Debug)]
pub enum PowerEvent {
    /// The system asks whether it may sleep
    CanSleep(SleepAck),
    /// The system is about to sleep
    WillSleep(SleepAck),
    /// The system has woken up
    HasPoweredOn,
}

/// Events consumed by the lifecycle supervisor
#[derive(Debug)]
pub enum LifecycleEvent<D> {
    /// Newly matched devices, in platform delivery order
    DevicesAdded(Vec<D>),
    /// A device has left the bus
    DeviceRemoved(DeviceKey),
    Power(PowerEvent),
    /// Re-run the bus scan (SIGHUP)
    Rescan,
    /// Leave the event loop
    Terminate,
}

/// Producer side of the bridge
pub struct EventSender<D> {
    tx: Sender<LifecycleEvent<D>>,
}

// Manual impl: `D` itself need not be Clone
impl<D> Clone for EventSender<D> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<D> EventSender<D> {
    /// Send an event from async context
    pub async fn send(&self, event: LifecycleEvent<D>) -> crate::Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Enqueue an event without blocking (usable from libusb callbacks)
    pub fn push(&self, event: LifecycleEvent<D>) -> crate::Result<()> {
        self.tx
            .try_send(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the bridge, owned by the supervisor thread
pub struct EventReceiver<D> {
    rx: Receiver<LifecycleEvent<D>>,
}

impl<D> EventReceiver<D> {
    /// Wait for the next event (blocking)
    pub fn recv_blocking(&self) -> crate::Result<LifecycleEvent<D>> {
        self.rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Take the next queued event, if any
    ///
    /// Returns an error once every sender is gone and the queue is drained.
    pub fn try_recv(&self) -> crate::Result<Option<LifecycleEvent<D>>> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(e @ TryRecvError::Closed) => Err(crate::Error::Channel(e.to_string())),
        }
    }

    /// Wait for the next event from async context
    pub async fn recv(&self) -> crate::Result<LifecycleEvent<D>> {
        self.rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Create the event bridge
///
/// Unbounded so that a hotplug callback can never fail on a full queue
/// while the supervisor is busy activating a device.
pub fn create_event_bridge<D>() -> (EventSender<D>, EventReceiver<D>) {
    let (tx, rx) = unbounded();
    (EventSender { tx }, EventReceiver { rx })
}
