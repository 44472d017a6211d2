/*!
 * Synchronization Primitives Integration Tests
 *
 * Robust mutex behaviour under real thread contention
 */

use oss_sim::core::sync::{LockOwner, LockStatus, RobustMutex, SyncConfig};
use oss_sim::SyncError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_mutual_exclusion_under_contention() {
    let mutex = Arc::new(RobustMutex::new(SyncConfig::patient()));
    let inside = Arc::new(AtomicBool::new(false));
    let total = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..8u32)
        .map(|pid| {
            let mutex = mutex.clone();
            let inside = inside.clone();
            let total = total.clone();
            thread::spawn(move || {
                let owner = LockOwner::new(pid, 1);
                for _ in 0..200 {
                    mutex.lock(owner).unwrap();
                    assert!(!inside.swap(true, Ordering::SeqCst));
                    total.fetch_add(1, Ordering::Relaxed);
                    inside.store(false, Ordering::SeqCst);
                    mutex.unlock(owner).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(total.load(Ordering::Relaxed), 1600);
    assert_eq!(mutex.acquisitions(), 1600);
    assert_eq!(mutex.status(), LockStatus::Free);
}

#[test]
fn test_waiters_woken_by_abandon() {
    let mutex = Arc::new(RobustMutex::new(SyncConfig::patient()));
    let holder = LockOwner::new(10, 1);
    mutex.lock(holder).unwrap();

    let waiters: Vec<_> = (0..3u32)
        .map(|i| {
            let mutex = mutex.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let result = mutex.lock(LockOwner::new(20 + i, 1));
                (result, start.elapsed())
            })
        })
        .collect();

    // Give the waiters time to park
    thread::sleep(Duration::from_millis(50));
    assert!(mutex.abandon(holder));

    for waiter in waiters {
        let (result, elapsed) = waiter.join().unwrap();
        assert_eq!(result, Err(SyncError::OwnerDied { pid: 10 }));
        assert!(elapsed < Duration::from_secs(2));
    }
}

#[test]
fn test_live_holder_times_out_waiter() {
    let config = SyncConfig::strict().with_lock_timeout(Some(Duration::from_millis(30)));
    let mutex = RobustMutex::new(config);
    mutex.lock(LockOwner::new(1, 1)).unwrap();

    let start = Instant::now();
    let err = mutex.lock(LockOwner::new(2, 1)).unwrap_err();
    assert!(matches!(err, SyncError::Timeout { holder: 1, .. }));
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[test]
fn test_lock_handoff_between_threads() {
    let mutex = Arc::new(RobustMutex::new(SyncConfig::default()));
    let first = LockOwner::new(1, 1);
    mutex.lock(first).unwrap();

    let contender = {
        let mutex = mutex.clone();
        thread::spawn(move || {
            let owner = LockOwner::new(2, 1);
            mutex.lock(owner).unwrap();
            let held = mutex.is_held_by(owner);
            mutex.unlock(owner).unwrap();
            held
        })
    };

    thread::sleep(Duration::from_millis(20));
    mutex.unlock(first).unwrap();
    assert!(contender.join().unwrap());
}
