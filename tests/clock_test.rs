/*!
 * Virtual Clock Tests
 * Shared time register across writer and reader handles
 */

use oss_sim::clock::{ClockError, ClockLayout, ClockRole, SimTime, VirtualClock};
use oss_sim::core::sync::SyncConfig;
use oss_sim::{SimContext, SyncError, TableSpec};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

const MILLI: u64 = 1_000_000;

fn ctx() -> SimContext {
    SimContext::new(TableSpec::uniform(1, 1, 1)).with_sync(SyncConfig::strict())
}

fn advance(clock: &VirtualClock, delta: u64) -> SimTime {
    clock.lock().unwrap();
    let now = clock.advance(delta).unwrap();
    clock.unlock().unwrap();
    now
}

#[test]
fn test_three_advances_of_400ms() {
    let ctx = ctx();
    let clock = VirtualClock::create(&ctx, ClockRole::Writer, 1).unwrap();

    for _ in 0..3 {
        advance(&clock, 400 * MILLI);
    }

    clock.lock().unwrap();
    assert_eq!(clock.read_seconds().unwrap(), 1);
    assert_eq!(clock.read_nanos().unwrap(), 200_000_000);
    assert_eq!(clock.snapshot().unwrap(), SimTime::new(1, 200_000_000));
    clock.unlock().unwrap();
}

#[test]
fn test_reader_observes_writer() {
    let ctx = ctx();
    let writer = VirtualClock::create(&ctx, ClockRole::Writer, 1).unwrap();
    let reader = VirtualClock::create(&ctx, ClockRole::Reader, 1000).unwrap();

    advance(&writer, 2_500 * MILLI);
    assert_eq!(reader.now().unwrap(), SimTime::new(2, 500 * MILLI));
}

#[test]
fn test_layout_is_twelve_bytes() {
    let ctx = ctx();
    let clock = VirtualClock::create(&ctx, ClockRole::Writer, 1).unwrap();
    advance(&clock, 7 * 1_000_000_000 + 42);

    clock.lock().unwrap();
    let layout = clock.layout().unwrap();
    clock.unlock().unwrap();

    let bytes = layout.to_bytes().unwrap();
    assert_eq!(bytes.len(), ClockLayout::ENCODED_LEN);
    assert_eq!(&bytes[..8], &7u64.to_le_bytes());
    assert_eq!(&bytes[8..], &42u32.to_le_bytes());
    assert_eq!(SimTime::from(ClockLayout::from_bytes(&bytes).unwrap()), SimTime::new(7, 42));
}

#[test]
fn test_readers_fail_after_writer_destroyed() {
    let ctx = ctx();
    let mut writer = VirtualClock::create(&ctx, ClockRole::Writer, 1).unwrap();
    writer.destroy().unwrap();

    let err = VirtualClock::create(&ctx, ClockRole::Reader, 1000).unwrap_err();
    assert!(matches!(err, ClockError::ResourceUnavailable(_)));
}

#[test]
fn test_mutual_exclusion_across_readers() {
    let ctx = ctx();
    let _writer = VirtualClock::create(&ctx, ClockRole::Writer, 1).unwrap();
    let inside = Arc::new(AtomicBool::new(false));
    let entries = Arc::new(AtomicU64::new(0));

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let ctx = ctx.clone();
            let inside = inside.clone();
            let entries = entries.clone();
            thread::spawn(move || {
                let clock = VirtualClock::create(&ctx, ClockRole::Reader, 1000 + i).unwrap();
                for _ in 0..50 {
                    clock.lock().unwrap();
                    assert!(!inside.swap(true, Ordering::SeqCst), "two holders at once");
                    entries.fetch_add(1, Ordering::Relaxed);
                    inside.store(false, Ordering::SeqCst);
                    clock.unlock().unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(entries.load(Ordering::Relaxed), 300);
}

#[test]
fn test_holder_death_surfaces_to_writer() {
    let ctx = ctx();
    let writer = VirtualClock::create(&ctx, ClockRole::Writer, 1).unwrap();

    let worker_ctx = ctx.clone();
    thread::spawn(move || {
        let reader = VirtualClock::create(&worker_ctx, ClockRole::Reader, 1000).unwrap();
        reader.lock().unwrap();
        // Thread ends with the lock held; the handle drops without destroy()
    })
    .join()
    .unwrap();

    assert_eq!(
        writer.lock(),
        Err(ClockError::Synchronization(SyncError::OwnerDied { pid: 1000 }))
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_sum_of_advances(deltas in prop::collection::vec(0u64..5_000_000_000, 0..40)) {
        let ctx = ctx();
        let clock = VirtualClock::create(&ctx, ClockRole::Writer, 1).unwrap();
        for &delta in &deltas {
            advance(&clock, delta);
        }

        let now = clock.now().unwrap();
        let expected: u128 = deltas.iter().map(|&d| d as u128).sum();
        prop_assert_eq!(now.as_nanos(), expected);
        prop_assert!(now.nanos < 1_000_000_000);
    }
}
