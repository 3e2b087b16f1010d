//! Tests for the sequence module

use super::*;
use crate::config::SequenceOptions;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn manager(start: u64, range: u64, length: usize) -> Arc<SequenceManager> {
    let options = SequenceOptions::new(start, range, length)
        .with_length_policy(SequenceLengthPolicy::Fixed);
    Arc::new(SequenceManager::new(&options, Vec::new(), Some(42)).unwrap())
}

// ============================================================================
// Unit Tests
// ============================================================================

#[test]
fn test_id_range() {
    let m = manager(10, 5, 3);
    assert_eq!(m.id_range(), 10..15);
    assert_eq!(m.slot_count(), 5);
    assert!(m.snapshot(9).is_none());
    assert!(m.snapshot(15).is_none());
    assert!(m.snapshot(14).is_some());
}

#[test]
fn test_invalid_options_rejected() {
    let options = SequenceOptions::new(1, 0, 3);
    assert!(SequenceManager::new(&options, Vec::new(), None).is_err());

    let options = SequenceOptions::new(1, 4, 3);
    assert!(SequenceManager::new(&options, vec![2, 0], None).is_err());
}

#[test]
fn test_lease_is_exclusive() {
    let m = manager(1, 1, 3);
    let lease = m.acquire().expect("free id");
    assert_eq!(lease.id(), 1);
    assert!(m.is_in_flight(1));
    assert!(m.acquire().is_none());

    drop(lease);
    assert!(!m.is_in_flight(1));
    assert!(m.acquire().is_some());
}

#[test]
fn test_start_and_end_flags_follow_length() {
    let m = manager(1, 1, 3);

    let mut flags = Vec::new();
    for _ in 0..6 {
        let lease = m.acquire().expect("free id");
        flags.push((lease.is_start(), lease.is_end(), lease.step()));
    }

    assert_eq!(
        flags,
        vec![
            (true, false, 0),
            (false, false, 1),
            (false, true, 2),
            (true, false, 0),
            (false, false, 1),
            (false, true, 2),
        ]
    );
}

#[test]
fn test_exhausted_sequence_is_reseeded() {
    let m = manager(1, 1, 2);
    drop(m.acquire());
    drop(m.acquire());

    let snapshot = m.snapshot(1).unwrap();
    assert_eq!(snapshot.remaining, 0);

    let lease = m.acquire().expect("free id");
    assert!(lease.is_start());
    drop(lease);

    let snapshot = m.snapshot(1).unwrap();
    assert_eq!(snapshot.target, 2);
    assert_eq!(snapshot.remaining, 1);
}

#[test]
fn test_release_after_failed_request() {
    let m = manager(1, 2, 5);

    let result: Result<(), &str> = (|| {
        let _lease = m.acquire().ok_or("no id")?;
        Err("transport error")
    })();

    assert!(result.is_err());
    assert_eq!(m.in_flight_count(), 0);
}

#[test]
fn test_acquire_round_robin_spreads_ids() {
    let m = manager(1, 4, 10);
    let mut seen = Vec::new();
    for _ in 0..4 {
        let lease = m.acquire().unwrap();
        seen.push(lease.id());
    }
    seen.sort_unstable();
    assert_eq!(seen, vec![1, 2, 3, 4]);
}

#[test]
fn test_acquire_timeout_when_all_busy() {
    let m = manager(1, 1, 3);
    let _held = m.acquire().unwrap();

    let start = Instant::now();
    assert!(m.acquire_timeout(Duration::from_millis(30)).is_none());
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[test]
fn test_acquire_timeout_wakes_on_release() {
    let m = manager(1, 1, 3);
    let held = m.acquire().unwrap();

    let waiter = {
        let m = Arc::clone(&m);
        std::thread::spawn(move || m.acquire_timeout(Duration::from_secs(5)).map(|l| l.id()))
    };

    std::thread::sleep(Duration::from_millis(20));
    drop(held);

    assert_eq!(waiter.join().unwrap(), Some(1));
}

#[test]
fn test_user_data_streams_set_length() {
    let options = SequenceOptions::new(1, 3, 99);
    let m = Arc::new(SequenceManager::new(&options, vec![2, 4], Some(7)).unwrap());

    for _ in 0..50 {
        let lease = m.acquire().unwrap();
        let expected = if lease.stream() == 0 { 2 } else { 4 };
        assert!(lease.step() < expected);
        assert_eq!(lease.is_end(), lease.step() + 1 == expected);
    }
}

#[test]
fn test_reseeded_length_positive_under_variation() {
    let options = SequenceOptions::new(1, 1, 1).with_length_policy(SequenceLengthPolicy::Varied {
        variation_percent: 400.0,
    });
    let m = Arc::new(SequenceManager::new(&options, Vec::new(), Some(3)).unwrap());

    for _ in 0..500 {
        drop(m.acquire().unwrap());
        let snapshot = m.snapshot(1).unwrap();
        assert!(snapshot.target >= 1);
    }
}

// ============================================================================
// Stress Tests
// ============================================================================

#[test]
fn test_mutual_exclusion_under_contention() {
    let m = manager(1, 3, 4);
    let holders: Arc<Vec<AtomicUsize>> = Arc::new((0..3).map(|_| AtomicUsize::new(0)).collect());
    let violation = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let m = Arc::clone(&m);
            let holders = Arc::clone(&holders);
            let violation = Arc::clone(&violation);
            std::thread::spawn(move || {
                let mut claimed = 0;
                while claimed < 200 {
                    let Some(lease) = m.acquire_timeout(Duration::from_millis(50)) else {
                        continue;
                    };
                    let slot = &holders[(lease.id() - 1) as usize];
                    if slot.fetch_add(1, Ordering::SeqCst) != 0 {
                        violation.store(true, Ordering::SeqCst);
                    }
                    std::thread::yield_now();
                    slot.fetch_sub(1, Ordering::SeqCst);
                    drop(lease);
                    claimed += 1;
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(!violation.load(Ordering::SeqCst));
    assert_eq!(m.in_flight_count(), 0);
}

#[test]
fn test_sequences_stay_ordered_across_threads() {
    let m = manager(1, 2, 5);
    let log: Arc<parking_lot::Mutex<HashMap<u64, Vec<(bool, usize)>>>> = Arc::default();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let m = Arc::clone(&m);
            let log = Arc::clone(&log);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    if let Some(lease) = m.acquire_timeout(Duration::from_millis(50)) {
                        log.lock()
                            .entry(lease.id())
                            .or_default()
                            .push((lease.is_start(), lease.step()));
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    for steps in log.lock().values() {
        for (i, (start, step)) in steps.iter().enumerate() {
            assert_eq!(*step, i % 5, "steps out of order: {:?}", steps);
            assert_eq!(*start, *step == 0);
        }
    }
}
