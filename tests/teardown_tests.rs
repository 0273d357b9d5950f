mod common;

use common::TestMount;
use cowfs::{CowfsError, ObjectId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

/// Unmount requested with three operations in flight waits for all of them.
#[test]
fn test_unmount_drains_in_flight_operations() {
    let t = TestMount::new();
    let id = t.seed(1, b"hello");
    let handle = t.mount.enter().unwrap().open(id).unwrap();

    let entered = Arc::new(Barrier::new(4));
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let release_rx = Arc::new(parking_lot::Mutex::new(release_rx));
    let finished = Arc::new(AtomicUsize::new(0));

    let ops: Vec<_> = (0..3)
        .map(|_| {
            let mount = Arc::clone(&t.mount);
            let entered = Arc::clone(&entered);
            let release_rx = Arc::clone(&release_rx);
            let finished = Arc::clone(&finished);
            thread::spawn(move || {
                let op = mount.enter().unwrap();
                entered.wait();
                release_rx.lock().recv().unwrap();
                let data = op.read(handle, 0, 5).unwrap();
                finished.fetch_add(1, Ordering::SeqCst);
                op.exit();
                data
            })
        })
        .collect();
    entered.wait();

    let (done_tx, done_rx) = mpsc::channel();
    let unmounter = {
        let mount = Arc::clone(&t.mount);
        thread::spawn(move || {
            let evicted = mount.unmount().unwrap();
            done_tx.send(evicted).unwrap();
        })
    };

    assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());
    assert!(t.mount.is_live());

    for _ in 0..3 {
        release_tx.send(()).unwrap();
    }
    let evicted = done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(evicted, 1);
    assert_eq!(finished.load(Ordering::SeqCst), 3);

    for op in ops {
        assert_eq!(op.join().unwrap(), b"hello");
    }
    unmounter.join().unwrap();

    assert!(matches!(t.mount.enter(), Err(CowfsError::Unavailable)));
}

#[test]
fn test_enter_fails_fast_after_unmount() {
    let t = TestMount::new();
    t.mount.unmount().unwrap();

    let err = t.mount.enter().unwrap_err();
    assert!(matches!(err, CowfsError::Unavailable));
    assert_eq!(err.to_errno(), libc::EIO);

    // Unmounting twice reports the mount as already gone
    assert!(matches!(t.mount.unmount(), Err(CowfsError::Unavailable)));
}

#[test]
fn test_unmount_tears_down_and_persists_objects() {
    let t = TestMount::new();
    let id = t.seed(3, b"");
    let handle = {
        let op = t.mount.enter().unwrap();
        let handle = op.open(id).unwrap();
        op.write(handle, 0, b"abcdef").unwrap();
        handle
    };
    let obj = t.mount.lookup(id).unwrap();

    assert_eq!(t.mount.unmount().unwrap(), 1);
    assert_eq!(t.mount.resident_count(), 0);
    assert!(t.mount.resolve_from_handle(handle).is_none());
    assert!(t.mount.resolve_from_object(id).is_none());

    // Outstanding references see a torn-down object
    assert!(!obj.is_valid());
    assert!(matches!(obj.verify(), Err(CowfsError::InvalidObject(o)) if o == id));

    let (_, size) = t.store.persisted(id).unwrap();
    assert_eq!(size, 6);
}

#[test]
fn test_operations_racing_unmount_either_finish_or_fail_fast() {
    let t = TestMount::new();
    let id = t.seed(1, b"0123456789");
    let handle = t.mount.enter().unwrap().open(id).unwrap();

    let barrier = Arc::new(Barrier::new(9));
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let mount = Arc::clone(&t.mount);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut completed = 0usize;
                loop {
                    match mount.enter() {
                        Ok(op) => {
                            // Entered before unmount: the object is still attached
                            assert_eq!(op.read(handle, 0, 10).unwrap().len(), 10);
                            completed += 1;
                        }
                        Err(CowfsError::Unavailable) => return completed,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            })
        })
        .collect();

    barrier.wait();
    thread::sleep(Duration::from_millis(20));
    t.mount.unmount().unwrap();

    for w in workers {
        w.join().unwrap();
    }
    assert!(t.mount.lookup(ObjectId(1)).is_none());
}
