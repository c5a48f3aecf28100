//! Process signal handling
//!
//! SIGINT and SIGTERM end the process on the spot, abandoning whatever device
//! work is in flight. SIGHUP re-runs the bus scan: in daemon mode it becomes
//! a lifecycle event handled in order with everything else, in one-shot mode
//! it raises a flag the scanner checks once it is done.

use crate::service;
use common::{EventSender, LifecycleEvent};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::{debug, info, warn};

/// Install the daemon's signal handlers
///
/// Must be called from within a Tokio runtime. A handler that cannot be
/// installed is reported and skipped.
pub fn setup_signal_handlers<D: Send + 'static>(events: EventSender<D>) {
    exit_on(SignalKind::interrupt(), "SIGINT");
    exit_on(SignalKind::terminate(), "SIGTERM");

    let Some(mut hangups) = install(SignalKind::hangup(), "SIGHUP") else {
        return;
    };
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            info!("Caught SIGHUP, re-scanning");
            if events.send(LifecycleEvent::Rescan).await.is_err() {
                break;
            }
        }
    });
}

/// Install the one-shot mode handlers: SIGHUP sets `rescan`
///
/// Must be called from within a Tokio runtime.
pub fn setup_oneshot_handlers(rescan: Arc<AtomicBool>) {
    let Some(mut hangups) = install(SignalKind::hangup(), "SIGHUP") else {
        return;
    };
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            info!("Caught SIGHUP, re-scanning");
            rescan.store(true, Ordering::SeqCst);
        }
    });
}

/// Leave the process with status 0 through `exit`
///
/// systemd is told first; nothing waits for the supervisor.
pub fn terminate(name: &str, exit: impl FnOnce(i32)) {
    info!("Caught {}, exiting", name);
    if let Err(e) = service::notify_stopping() {
        debug!("Failed to notify systemd: {:#}", e);
    }
    exit(0);
}

fn install(kind: SignalKind, name: &str) -> Option<Signal> {
    match signal(kind) {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!("Unable to install {} handler: {}", name, e);
            None
        }
    }
}

fn exit_on(kind: SignalKind, name: &'static str) {
    let Some(mut stream) = install(kind, name) else {
        return;
    };
    tokio::spawn(async move {
        if stream.recv().await.is_some() {
            terminate(name, |code| std::process::exit(code));
        }
    });
}
