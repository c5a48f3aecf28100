//! cm6206-enabler
//!
//! Activates the outputs of C-Media CM6206 USB audio adapters, either once
//! for every attached adapter or, in daemon mode, whenever one is plugged in
//! and after the system wakes from sleep.

use anyhow::{Context, Result, anyhow};
use common::{create_event_bridge, setup_logging};
use daemon::cli::Args;
use daemon::config::EnablerConfig;
use daemon::power::PowerMonitor;
use daemon::usb::worker::WorkerSettings;
use daemon::usb::{RusbBus, RusbDevice, scan_until_settled, spawn_usb_worker};
use daemon::{service, signals};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{debug, error, info, warn};

fn main() -> Result<()> {
    let (args, ignored) = match Args::parse_lenient(std::env::args_os()) {
        Ok(parsed) => parsed,
        Err(e) => e.exit(),
    };
    for arg in &ignored {
        eprintln!("Ignoring unknown argument `{}'", arg);
    }

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = EnablerConfig::default();
        let path = EnablerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = match args.config_path() {
        Some(path) => EnablerConfig::load(Some(path)).context("Failed to load configuration")?,
        None => EnablerConfig::load_or_default(),
    };

    let log_level = args.log_level(&config);
    setup_logging(&log_level).context("Failed to setup logging")?;
    debug!("cm6206-enabler v{}", env!("CARGO_PKG_VERSION"));

    if args.daemon {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("Failed to start async runtime")?;
        runtime.block_on(run_daemon(config))
    } else {
        run_once(&config)
    }
}

/// Activate every attached adapter once
///
/// A SIGHUP received meanwhile triggers another scan once this one is done.
fn run_once(config: &EnablerConfig) -> Result<()> {
    let filter = config.filter()?;
    let settings = config.session_settings();
    let bus = RusbBus::new(config.transfer_timeout())
        .map_err(|e| anyhow!("Unable to initialise USB: {}", e))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let report = runtime
        .block_on(async move {
            let rescan = Arc::new(AtomicBool::new(false));
            signals::setup_oneshot_handlers(Arc::clone(&rescan));

            tokio::task::spawn_blocking(move || {
                scan_until_settled(&bus, &filter, &settings, &rescan)
            })
            .await
        })
        .context("USB scan task failed")?
        .map_err(|e| anyhow!("Unable to enumerate USB devices: {}", e))?;

    if !report.found() {
        info!("No CM6206 device found on the USB bus.");
    }
    Ok(())
}

/// Supervise adapters until a termination signal arrives
async fn run_daemon(config: EnablerConfig) -> Result<()> {
    let filter = config.filter()?;

    let monitor = PowerMonitor::register()
        .await
        .context("Unable to register for power notifications")?;

    let (events, receiver) = create_event_bridge::<RusbDevice>();
    signals::setup_signal_handlers(events.clone());

    let power_events = events.clone();
    let power_task = tokio::spawn(async move {
        if let Err(e) = monitor.run(power_events).await {
            warn!("Power monitor stopped: {}", e);
        }
    });

    let settings = WorkerSettings {
        filter,
        supervisor: config.supervisor_settings(),
        transfer_timeout: config.transfer_timeout(),
    };
    let (worker, ready) = spawn_usb_worker(settings, events, receiver);

    let startup = match ready.await {
        Ok(result) => result.map_err(anyhow::Error::from),
        Err(_) => Err(anyhow!("USB worker exited during startup")),
    };
    if let Err(e) = startup {
        power_task.abort();
        join_worker(worker).await;
        return Err(e).context("Failed to start device supervision");
    }

    if service::is_systemd() {
        debug!("Running under systemd");
    }
    if let Err(e) = service::notify_ready() {
        warn!("Failed to notify systemd: {:#}", e);
    }
    if let Err(e) = service::notify_status(&format!("Watching for {} devices", filter)) {
        debug!("Failed to send status to systemd: {:#}", e);
    }
    info!("Watching for {} devices", filter);

    join_worker(worker).await;

    if let Err(e) = service::notify_stopping() {
        debug!("Failed to notify systemd: {:#}", e);
    }
    power_task.abort();
    Ok(())
}

async fn join_worker(worker: std::thread::JoinHandle<()>) {
    match tokio::task::spawn_blocking(move || worker.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("USB worker thread panicked: {:?}", e),
        Err(e) => error!("Failed to join USB worker thread: {}", e),
    }
}
