//! Signal Handling Integration Tests
//!
//! Termination must not wait for the supervisor: a busy USB thread with a
//! backlog of events cannot delay the exit.
//!
//! Run with: `cargo test -p daemon --test signal_tests`

use common::test_utils::{MockBus, MockDeviceSpec};
use common::{LifecycleEvent, create_event_bridge};
use daemon::signals::terminate;
use daemon::{SessionSettings, Supervisor, SupervisorSettings};
use protocol::DeviceMatchFilter;
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_terminate_exits_with_status_zero() {
    let status = AtomicI32::new(-1);

    terminate("SIGTERM", |code| status.store(code, Ordering::SeqCst));

    assert_eq!(status.load(Ordering::SeqCst), 0);
}

#[test]
fn test_terminate_does_not_wait_for_busy_supervisor() {
    let bus = MockBus::new();
    let slow = bus.add_device(MockDeviceSpec::cm6206(4).fail_open(100));
    let settings = SupervisorSettings {
        session: SessionSettings {
            open_attempts: 20,
            open_retry_interval: Duration::from_millis(50),
        },
        attach_delay: Duration::from_millis(100),
        wake_delay: Duration::ZERO,
    };

    let (events, receiver) = create_event_bridge();
    events
        .push(LifecycleEvent::DevicesAdded(vec![bus.device(slow).unwrap()]))
        .unwrap();
    events.push(LifecycleEvent::Rescan).unwrap();

    let mut supervisor = Supervisor::new(bus.clone(), DeviceMatchFilter::cm6206(), settings);
    let worker = thread::spawn(move || {
        let mut receiver = receiver;
        supervisor.run(&mut receiver).unwrap();
    });

    // Let the worker get stuck in the slow device session
    thread::sleep(Duration::from_millis(150));

    let status = AtomicI32::new(-1);
    let started = Instant::now();
    terminate("SIGINT", |code| status.store(code, Ordering::SeqCst));

    assert_eq!(status.load(Ordering::SeqCst), 0);
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(!worker.is_finished(), "supervisor was expected to still be busy");

    // Stop the worker so the test does not leak it
    events.push(LifecycleEvent::Terminate).unwrap();
    worker.join().unwrap();
}
