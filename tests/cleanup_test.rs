mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use guestprov::cleanup::CleanupGuard;

use helpers::{FakeGuest, GuestEvent, RecordingSink};

fn counting_guard<'a>(count: &'a AtomicUsize, sink: &'a RecordingSink) -> CleanupGuard<'a> {
    CleanupGuard::new("user key", sink, move || {
        count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

#[test]
fn explicit_once_runs_once() {
    let count = AtomicUsize::new(0);
    let sink = RecordingSink::default();
    {
        let guard = counting_guard(&count, &sink);
        guard.run();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(sink.count("Cleaning up user key..."), 1);
}

#[test]
fn explicit_twice_then_deferred_runs_once() {
    let count = AtomicUsize::new(0);
    let sink = RecordingSink::default();
    {
        let guard = counting_guard(&count, &sink);
        guard.run();
        guard.run();
    }
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn deferred_only_runs_once() {
    let count = AtomicUsize::new(0);
    let sink = RecordingSink::default();
    {
        let guard = counting_guard(&count, &sink);
        assert!(!guard.is_done());
    }
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn concurrent_triggers_run_once() {
    let count = AtomicUsize::new(0);
    let sink = RecordingSink::default();
    let guard = counting_guard(&count, &sink);
    let barrier = Arc::new(Barrier::new(8));

    thread::scope(|scope| {
        for _ in 0..8 {
            let barrier = Arc::clone(&barrier);
            let guard = &guard;
            scope.spawn(move || {
                barrier.wait();
                guard.run();
            });
        }
    });
    drop(guard);

    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_deletion_is_reported_not_raised() {
    let guest = FakeGuest::linux().with_failing_delete();
    let sink = RecordingSink::default();
    {
        let guard =
            CleanupGuard::delete_user_key(&guest, "/etc/chef/bootstrap.pem".to_string(), &sink);
        guard.run();
        assert!(guard.is_done());
    }

    assert_eq!(
        guest.events(),
        vec![GuestEvent::Delete("/etc/chef/bootstrap.pem".to_string())]
    );
    assert!(sink.contains("WARNING: Failed to cleanup user key: access denied"));
}
