//! Systemd service integration
//!
//! Minimal sd-notify support so the daemon can run as a `Type=notify`
//! service. Every function is a no-op outside systemd.

use anyhow::{Context, Result};
use std::env;
use std::os::unix::net::UnixDatagram;
use std::path::Path;
use tracing::debug;

/// Send `message` to the socket named by `NOTIFY_SOCKET`, if any
fn notify(message: &str) -> Result<()> {
    match env::var("NOTIFY_SOCKET") {
        Ok(socket_path) => notify_to(Path::new(&socket_path), message),
        Err(_) => {
            debug!("NOTIFY_SOCKET not set, skipping systemd notification");
            Ok(())
        }
    }
}

fn notify_to(socket_path: &Path, message: &str) -> Result<()> {
    let socket = UnixDatagram::unbound().context("Failed to create Unix socket")?;
    socket
        .send_to(message.as_bytes(), socket_path)
        .with_context(|| format!("Failed to send {} notification to systemd", message))?;
    debug!("Notified systemd: {}", message);
    Ok(())
}

/// Notify systemd that the supervisor is running
pub fn notify_ready() -> Result<()> {
    notify("READY=1")
}

/// Notify systemd that the daemon is shutting down
pub fn notify_stopping() -> Result<()> {
    notify("STOPPING=1")
}

/// Send a status line, shown by `systemctl status`
pub fn notify_status(status: &str) -> Result<()> {
    notify(&format!("STATUS={}", status))
}

/// Check if running under systemd
pub fn is_systemd() -> bool {
    env::var("NOTIFY_SOCKET").is_ok()
}
