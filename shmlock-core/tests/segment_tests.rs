// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Integration tests against real POSIX shared memory.
//!
//! Every test uses its own segment name (test tag + pid) so the tests can run
//! in parallel and across repeated runs.

use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

use shmlock_core::{
    CreateOutcome, LockState, NamePolicy, OptionsLoader, Segment, SegmentError, SegmentOptions,
    SharedSegment, TypedSegment, NAME_LENGTH,
};
use tempfile::TempDir;

fn unique(tag: &str) -> String {
    format!("shmlock-it-{}-{}", tag, std::process::id())
}

/// Try the lock from another thread and release it again if it was taken.
fn lock_from_other_thread(segment: &SharedSegment) -> Option<LockState> {
    thread::scope(|s| {
        s.spawn(|| {
            let state = segment.try_lock().unwrap();
            if state.is_some() {
                segment.unlock().unwrap();
            }
            state
        })
        .join()
        .unwrap()
    })
}

fn segment_exists(name: &str) -> bool {
    std::path::Path::new("/dev/shm").join(name).exists()
}

#[test]
fn test_round_trip_create_open() {
    let name = unique("roundtrip");

    let mut creator = SharedSegment::new();
    creator.set_name(&name).unwrap();
    assert_eq!(creator.create(32).unwrap(), CreateOutcome::Created);

    creator.lock().unwrap();
    unsafe {
        let payload = creator.as_mut_ptr().unwrap();
        for i in 0..32 {
            *payload.add(i) = i as u8;
        }
    }
    creator.unlock().unwrap();

    let mut reader = SharedSegment::new();
    reader.set_name(&name).unwrap();
    reader.open().unwrap();
    assert_eq!(reader.error_code(), 0);
    assert_eq!(reader.size().unwrap(), 32);

    reader.lock().unwrap();
    let bytes = unsafe { std::slice::from_raw_parts(reader.as_ptr().unwrap(), 32) }.to_vec();
    reader.unlock().unwrap();

    assert_eq!(bytes, (0..32).collect::<Vec<u8>>());
}

#[test]
fn test_fresh_segment_is_zeroed() {
    let mut segment = TypedSegment::<[u8; 4096]>::new(&unique("zeroed")).unwrap();
    assert_eq!(segment.create().unwrap(), CreateOutcome::Created);

    let guard = segment.lock().unwrap();
    assert!(guard.iter().all(|&b| b == 0));
}

#[test]
fn test_create_on_existing_attaches() {
    let name = unique("existing");

    let mut first = TypedSegment::<u64>::new(&name).unwrap();
    assert_eq!(first.create().unwrap(), CreateOutcome::Created);
    assert_eq!(first.error_code(), 0);
    *first.lock().unwrap() = 1234;

    let mut second = TypedSegment::<u64>::new(&name).unwrap();
    assert_eq!(second.create().unwrap(), CreateOutcome::Attached);
    assert_eq!(second.error_code(), libc::EEXIST);

    // The header and payload are inherited, not reset.
    assert_eq!(second.size().unwrap(), 8);
    assert_eq!(*second.lock().unwrap(), 1234);

    *second.lock().unwrap() += 1;
    assert_eq!(*first.lock().unwrap(), 1235);
}

#[test]
fn test_attach_with_larger_request_keeps_original_size() {
    let name = unique("sizes");

    let mut small = SharedSegment::new();
    small.set_name(&name).unwrap();
    small.create(8).unwrap();

    let mut large = SharedSegment::new();
    large.set_name(&name).unwrap();
    assert_eq!(large.create(64).unwrap(), CreateOutcome::Attached);
    assert_eq!(large.size().unwrap(), 8);
}

#[test]
fn test_open_without_create_fails() {
    let mut segment = SharedSegment::new();
    segment.set_name(&unique("missing")).unwrap();

    let err = segment.open().unwrap_err();
    assert!(matches!(err, SegmentError::OpenFailed { .. }));
    assert_eq!(segment.error_code(), libc::ENOENT);
    assert!(!segment.is_attached());
    assert!(segment.as_ptr().is_err());
    assert!(segment.lock().is_err());

    // Nothing was created as a side effect.
    assert!(!segment_exists(&unique("missing")));
    assert!(!segment_exists(&format!("{}Mutex", unique("missing"))));
}

#[test]
fn test_name_truncation() {
    let long = format!("{}-{}", std::process::id(), "x".repeat(100));

    let mut segment = SharedSegment::new();
    segment.set_name(&long).unwrap();

    let stored = segment.name().unwrap().to_string();
    assert_eq!(stored.chars().count(), NAME_LENGTH);
    assert!(long.starts_with(&stored));
    assert!(segment.mutex_name().unwrap().chars().count() <= NAME_LENGTH);

    segment.create(4).unwrap();
    assert!(segment_exists(&stored));
}

#[test]
fn test_name_reject_policy() {
    let options = SegmentOptions {
        name_policy: NamePolicy::Reject,
        ..SegmentOptions::default()
    };
    let mut segment = SharedSegment::with_options(options);

    let err = segment.set_name(&"y".repeat(NAME_LENGTH + 1)).unwrap_err();
    assert!(matches!(err, SegmentError::NameTooLong { .. }));
    assert_eq!(segment.error_code(), libc::ENAMETOOLONG);
    assert_eq!(segment.name(), None);
}

#[test]
fn test_mutual_exclusion_across_handles() {
    const WORKERS: usize = 8;
    const INCREMENTS: u64 = 500;

    let name = unique("exclusion");
    let mut owner = TypedSegment::<u64>::new(&name).unwrap();
    owner.create().unwrap();

    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let name = name.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                // Each worker attaches on its own, like a separate process would.
                let mut counter = TypedSegment::<u64>::new(&name).unwrap();
                counter.open().unwrap();
                barrier.wait();
                for _ in 0..INCREMENTS {
                    let mut guard = counter.lock().unwrap();
                    let value = *guard;
                    thread::yield_now();
                    *guard = value + 1;
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(*owner.lock().unwrap(), WORKERS as u64 * INCREMENTS);
}

#[test]
fn test_shared_typed_segment_across_threads() {
    let mut counter = TypedSegment::<u64>::new(&unique("arc")).unwrap();
    counter.create().unwrap();
    let counter = Arc::new(counter);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..250 {
                    *counter.lock().unwrap() += 1;
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(*counter.lock().unwrap(), 1000);
}

#[test]
fn test_transfer_keeps_lock_until_new_owner_drops() {
    let name = unique("transfer");
    let mut segment = TypedSegment::<u32>::new(&name).unwrap();
    segment.create().unwrap();

    let mut observer = SharedSegment::new();
    observer.set_name(&name).unwrap();
    observer.open().unwrap();

    let mut original = segment.lock().unwrap();
    let owner = original.transfer();
    drop(original);
    assert_eq!(lock_from_other_thread(&observer), None);

    drop(owner);
    assert_eq!(lock_from_other_thread(&observer), Some(LockState::Acquired));
}

#[test]
fn test_guard_moved_to_another_function_still_releases() {
    fn write_and_release(mut guard: shmlock_core::ScopedAccess<'_, u32>) {
        *guard = 99;
    }

    let mut segment = TypedSegment::<u32>::new(&unique("moved")).unwrap();
    segment.create().unwrap();

    let guard = segment.lock().unwrap();
    write_and_release(guard);

    assert_eq!(*segment.lock().unwrap(), 99);
}

#[test]
fn test_last_detach_unlinks_names() {
    let name = unique("lifetime");
    let mutex_name = format!("{}Mutex", name);

    let mut first = SharedSegment::new();
    first.set_name(&name).unwrap();
    first.create(16).unwrap();

    let mut second = SharedSegment::new();
    second.set_name(&name).unwrap();
    second.open().unwrap();
    assert_eq!(second.attachments().unwrap(), 2);

    drop(first);
    assert!(segment_exists(&name));
    assert_eq!(second.attachments().unwrap(), 1);

    drop(second);
    assert!(!segment_exists(&name));
    assert!(!segment_exists(&mutex_name));
}

#[test]
fn test_recreate_after_last_detach_starts_fresh() {
    let name = unique("recreate");

    {
        let mut counter = TypedSegment::<u64>::new(&name).unwrap();
        counter.create().unwrap();
        *counter.lock().unwrap() = 77;
    }

    let mut counter = TypedSegment::<u64>::new(&name).unwrap();
    assert_eq!(counter.create().unwrap(), CreateOutcome::Created);
    assert_eq!(*counter.lock().unwrap(), 0);
}

#[test]
fn test_options_file_keeps_names_alive() {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("shmlock.yaml");
    std::fs::write(&path, "unlink_on_last_detach: false\nmode: 0o640\n").unwrap();

    let options = OptionsLoader::load_file(&path).unwrap();
    assert_eq!(options.mode, 0o640);

    let name = unique("persist");
    {
        let mut segment = TypedSegment::<u32>::with_options(&name, options.clone()).unwrap();
        segment.create().unwrap();
        *segment.lock().unwrap() = 5;
    }
    assert!(segment_exists(&name));

    let mut again = TypedSegment::<u32>::with_options(&name, options).unwrap();
    again.open().unwrap();
    assert_eq!(*again.lock().unwrap(), 5);
    drop(again);

    assert!(SharedSegment::remove(&name).unwrap());
    assert!(!segment_exists(&name));
}

#[test]
fn test_drop_does_not_wait_forever_for_a_held_lock() {
    let name = unique("teardown");
    let mut owner = TypedSegment::<u64>::new(&name).unwrap();
    owner.create().unwrap();

    let options = SegmentOptions {
        init_timeout: Duration::from_millis(50),
        ..SegmentOptions::default()
    };
    let mut peer = SharedSegment::with_options(options);
    peer.set_name(&name).unwrap();
    peer.open().unwrap();
    assert_eq!(owner.segment().attachments().unwrap(), 2);

    let guard = owner.lock().unwrap();
    let (done_tx, done_rx) = mpsc::channel();
    let dropper = thread::spawn(move || {
        drop(peer);
        done_tx.send(()).unwrap();
    });
    let finished = done_rx.recv_timeout(Duration::from_secs(5));
    drop(guard);
    dropper.join().unwrap();
    assert!(finished.is_ok(), "drop blocked while the lock was held");

    // Detached without the lock, so the names stay for the remaining owner.
    assert_eq!(owner.segment().attachments().unwrap(), 1);
    assert!(segment_exists(&name));

    drop(owner);
    assert!(!segment_exists(&name));
}

/// Attach on a new thread, take the lock and let the thread exit holding it.
///
/// The handle is returned so the mutex is still mapped when the thread ends.
fn abandon_lock(name: &str) -> SharedSegment {
    let name = name.to_string();
    thread::spawn(move || {
        let mut segment = SharedSegment::new();
        segment.set_name(&name).unwrap();
        segment.open().unwrap();
        assert_eq!(segment.lock().unwrap(), LockState::Acquired);
        segment
    })
    .join()
    .unwrap()
}

#[test]
fn test_abandoned_lock_is_recovered_by_segment() {
    let name = unique("recover-raw");
    let mut segment = SharedSegment::new();
    segment.set_name(&name).unwrap();
    segment.create(8).unwrap();

    let abandoned = abandon_lock(&name);

    assert_eq!(segment.lock().unwrap(), LockState::Recovered);
    assert_eq!(segment.error_code(), libc::EOWNERDEAD);
    segment.unlock().unwrap();

    assert_eq!(segment.lock().unwrap(), LockState::Acquired);
    assert_eq!(segment.error_code(), 0);
    segment.unlock().unwrap();

    drop(abandoned);
    assert_eq!(segment.attachments().unwrap(), 1);
}

#[test]
fn test_abandoned_lock_is_recovered_by_guard() {
    let name = unique("recover-guard");
    let mut counter = TypedSegment::<u64>::new(&name).unwrap();
    counter.create().unwrap();
    *counter.lock().unwrap() = 41;

    let abandoned = abandon_lock(&name);

    let mut guard = counter.lock().unwrap();
    assert_eq!(guard.lock_state(), Some(LockState::Recovered));
    assert_eq!(counter.error_code(), libc::EOWNERDEAD);
    assert_eq!(*guard, 41);
    *guard += 1;
    drop(guard);

    let guard = counter.lock().unwrap();
    assert_eq!(guard.lock_state(), Some(LockState::Acquired));
    assert_eq!(*guard, 42);
    drop(guard);

    drop(abandoned);
}
