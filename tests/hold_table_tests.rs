mod common;

use common::TestMount;
use cowfs::{CowfsError, MountConfig, ObjectId};
use std::sync::{Arc, Barrier};
use std::thread;

/// Two threads create object 42 at once: one attachment, one instance.
#[test]
fn test_concurrent_create_attaches_once() {
    let t = TestMount::new();
    let id = t.seed(42, b"");
    let barrier = Arc::new(Barrier::new(2));

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let mount = Arc::clone(&t.mount);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let op = mount.enter().unwrap();
                op.get_or_create(id).unwrap()
            })
        })
        .collect();

    let objects: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    assert!(Arc::ptr_eq(&objects[0], &objects[1]));
    assert_eq!(t.store.attach_calls(), 1);
    assert_eq!(t.mount.resident_count(), 1);
}

#[test]
fn test_many_threads_many_objects_one_instance_each() {
    // Small table so distinct objects collide in buckets
    let t = TestMount::with_config(MountConfig {
        hold_table_size: 4,
        ..MountConfig::default()
    });
    for n in 1..=32 {
        t.seed(n, b"");
    }
    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));

    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let mount = Arc::clone(&t.mount);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let op = mount.enter().unwrap();
                (1..=32)
                    .map(|n| op.get_or_create(ObjectId(n)).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let results: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    for n in 0..32 {
        for r in &results[1..] {
            assert!(Arc::ptr_eq(&results[0][n], &r[n]));
        }
    }
    assert_eq!(t.store.attach_calls(), 32);
    assert_eq!(t.mount.resident_count(), 32);
}

#[test]
fn test_attach_failure_leaves_no_entry() {
    let t = TestMount::new();
    let id = t.seed(9, b"data");
    t.store.fail_attach_for(id);

    let op = t.mount.enter().unwrap();
    let err = op.get_or_create(id).unwrap_err();
    assert!(matches!(err, CowfsError::Attach { object, .. } if object == id));
    assert_eq!(err.to_errno(), libc::EIO);
    assert!(t.mount.lookup(id).is_none());

    // A later attempt retries attachment
    t.store.clear_attach_failure(id);
    assert!(op.get_or_create(id).is_ok());
    assert!(t.mount.lookup(id).is_some());
}

#[test]
fn test_missing_on_disk_object_fails_attach() {
    let t = TestMount::new();
    let op = t.mount.enter().unwrap();
    assert!(matches!(
        op.get_or_create(ObjectId(1234)),
        Err(CowfsError::Attach { .. })
    ));
    assert_eq!(t.mount.resident_count(), 0);
}

#[test]
fn test_exhaustion_leaves_identity_map_unchanged() {
    let t = TestMount::with_config(MountConfig {
        max_objects: Some(2),
        ..MountConfig::default()
    });
    for n in 1..=3 {
        t.seed(n, b"");
    }

    let op = t.mount.enter().unwrap();
    op.get_or_create(ObjectId(1)).unwrap();
    op.get_or_create(ObjectId(2)).unwrap();
    let err = op.get_or_create(ObjectId(3)).unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.to_errno(), libc::EIO);
    assert_eq!(t.mount.resident_count(), 2);
    assert!(t.mount.lookup(ObjectId(3)).is_none());

    // Already-resident objects are still returned at the limit
    assert!(op.get_or_create(ObjectId(1)).is_ok());
}

#[test]
fn test_release_deferred_while_bucket_held() {
    let t = TestMount::new();
    let id = t.seed(5, b"");
    let handle = t.mount.enter().unwrap().open(id).unwrap();

    let hold = t.mount.hold_table().enter(id);
    assert_eq!(
        t.mount.try_release(handle),
        cowfs::ReleaseOutcome::Deferred
    );
    hold.exit();

    assert_eq!(
        t.mount.try_release(handle),
        cowfs::ReleaseOutcome::Destroyed
    );
    assert!(t.mount.lookup(id).is_none());
}

/// The resident cap holds across buckets, and releasing frees a slot.
#[test]
fn test_exhaustion_cap_holds_across_buckets() {
    let t = TestMount::with_config(MountConfig {
        max_objects: Some(2),
        ..MountConfig::default()
    });
    let threads = 8u64;
    for n in 1..=threads {
        t.seed(n, b"");
    }
    let barrier = Arc::new(Barrier::new(threads as usize));

    let workers: Vec<_> = (1..=threads)
        .map(|n| {
            let mount = Arc::clone(&t.mount);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let op = mount.enter().unwrap();
                barrier.wait();
                op.open(ObjectId(n)).ok()
            })
        })
        .collect();
    let opened: Vec<_> = workers
        .into_iter()
        .filter_map(|w| w.join().unwrap())
        .collect();

    assert_eq!(opened.len(), 2);
    assert_eq!(t.mount.resident_count(), 2);

    assert_eq!(
        t.mount.release(opened[0]),
        cowfs::ReleaseOutcome::Destroyed
    );
    let op = t.mount.enter().unwrap();
    let missing = (1..=threads)
        .map(ObjectId)
        .find(|id| t.mount.lookup(*id).is_none())
        .unwrap();
    assert!(op.get_or_create(missing).is_ok());
    assert_eq!(t.mount.resident_count(), 2);
}
