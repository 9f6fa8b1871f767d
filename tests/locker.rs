mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use common::wait_for;
use hierlock::mode::SharedExclusive::{self, Exclusive, Shared};
use hierlock::{
    CompatibilityMatrix, GroupModeMatrix, LockMode, LockResult, LockStatus, Locker, MatrixError,
    Requester, WaitTime,
};

type SxLocker = Locker<SharedExclusive, &'static str>;

fn sx_locker() -> Arc<SxLocker> {
    common::init_tracing();
    Arc::new(Locker::new(SharedExclusive::compatibility_matrix(), SharedExclusive::group_mode_matrix()))
}

fn waiting(locker: &SxLocker, resource: &str) -> usize {
    locker.status(resource).map_or(0, |status| status.waiting)
}

#[test]
fn smoke() {
    let locker = sx_locker();
    assert_eq!(locker.lock("f", Exclusive), LockResult::Granted);
    assert!(locker.unlock("f"));
    assert_eq!(locker.lock("f", Shared), LockResult::Granted);
    assert!(locker.unlock("f"));
    assert!(locker.is_empty());
}

#[test]
fn lots_and_lots_exclusive() {
    const ITERS: usize = 500;
    const CONCURRENCY: usize = 4;

    let locker = sx_locker();
    let inside = Arc::new(AtomicBool::new(false));
    let total = Arc::new(AtomicUsize::new(0));

    let (tx, rx) = channel();
    for _ in 0..CONCURRENCY {
        let (locker, inside, total, tx) = (locker.clone(), inside.clone(), total.clone(), tx.clone());
        thread::spawn(move || {
            for _ in 0..ITERS {
                assert_eq!(locker.lock("counter", Exclusive), LockResult::Granted);
                assert!(!inside.swap(true, Ordering::SeqCst));
                total.fetch_add(1, Ordering::Relaxed);
                inside.store(false, Ordering::SeqCst);
                assert!(locker.unlock("counter"));
            }
            tx.send(()).unwrap();
        });
    }
    drop(tx);
    for _ in 0..CONCURRENCY {
        rx.recv().unwrap();
    }
    assert_eq!(total.load(Ordering::Relaxed), ITERS * CONCURRENCY);
    assert!(locker.is_empty());
}

#[test]
fn readers_and_writers_never_overlap() {
    const ITERS: usize = 300;

    let locker = sx_locker();
    let readers = Arc::new(AtomicUsize::new(0));
    let writing = Arc::new(AtomicBool::new(false));

    let handles = (0..6)
        .map(|i| {
            let (locker, readers, writing) = (locker.clone(), readers.clone(), writing.clone());
            thread::spawn(move || {
                for _ in 0..ITERS {
                    if i % 3 == 0 {
                        assert_eq!(locker.lock("doc", Exclusive), LockResult::Granted);
                        assert!(!writing.swap(true, Ordering::SeqCst));
                        assert_eq!(readers.load(Ordering::SeqCst), 0);
                        writing.store(false, Ordering::SeqCst);
                    } else {
                        assert_eq!(locker.lock("doc", Shared), LockResult::Granted);
                        readers.fetch_add(1, Ordering::SeqCst);
                        assert!(!writing.load(Ordering::SeqCst));
                        readers.fetch_sub(1, Ordering::SeqCst);
                    }
                    assert!(locker.unlock("doc"));
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(locker.is_empty());
}

#[test]
fn re_entrant_lock_needs_as_many_unlocks() {
    let locker = sx_locker();
    let other = Requester::new();
    assert_eq!(locker.lock("f", Shared), LockResult::Granted);
    assert_eq!(locker.lock("f", Shared), LockResult::Granted);

    assert!(locker.unlock("f"));
    assert_eq!(locker.lock_as(other, "f", Exclusive, WaitTime::now()), LockResult::Timeout);
    assert!(locker.unlock("f"));
    assert_eq!(locker.lock_as(other, "f", Exclusive, WaitTime::now()), LockResult::Granted);
    assert!(locker.unlock_as(other, "f"));
    assert!(locker.is_empty());
}

#[test]
fn fifo_writer_is_served_before_later_reader() {
    let locker = sx_locker();
    assert_eq!(locker.lock("f", Shared), LockResult::Granted);

    let (tx, rx) = channel();
    let mut handles = Vec::new();
    for (name, mode) in [("T2", Exclusive), ("T3", Shared)] {
        let (locker2, tx) = (locker.clone(), tx.clone());
        let queued = waiting(&locker, "f");
        handles.push(thread::spawn(move || {
            assert_eq!(locker2.lock("f", mode), LockResult::Granted);
            tx.send(name).unwrap();
            assert!(locker2.unlock("f"));
        }));
        wait_for(|| waiting(&locker, "f") == queued + 1);
    }
    drop(tx);

    assert!(locker.unlock("f"));
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(rx.iter().collect::<Vec<_>>(), ["T2", "T3"]);
    assert!(locker.is_empty());
}

#[test]
fn conversion_is_served_before_earlier_waiter() {
    let locker = sx_locker();
    let (holder, converter, waiter) = (Requester::new(), Requester::new(), Requester::new());
    assert_eq!(locker.lock_as(holder, "f", Shared, WaitTime::FOREVER), LockResult::Granted);
    assert_eq!(locker.lock_as(converter, "f", Shared, WaitTime::FOREVER), LockResult::Granted);

    let (tx, rx) = channel();
    let waiting_writer = thread::spawn({
        let (locker, tx) = (locker.clone(), tx.clone());
        move || {
            assert_eq!(locker.lock_as(waiter, "f", Exclusive, WaitTime::FOREVER), LockResult::Granted);
            tx.send("waiter").unwrap();
            assert!(locker.unlock_as(waiter, "f"));
        }
    });
    wait_for(|| waiting(&locker, "f") == 1);

    let upgrading = thread::spawn({
        let (locker, tx) = (locker.clone(), tx.clone());
        move || {
            assert_eq!(locker.lock_as(converter, "f", Exclusive, WaitTime::FOREVER), LockResult::Granted);
            tx.send("converter").unwrap();
            assert!(locker.unlock_as(converter, "f"));
            assert!(locker.unlock_as(converter, "f"));
        }
    });
    wait_for(|| locker.status("f").map_or(false, |status| status.converting == 1));
    drop(tx);

    assert!(locker.unlock_as(holder, "f"));
    upgrading.join().unwrap();
    waiting_writer.join().unwrap();
    assert_eq!(rx.iter().collect::<Vec<_>>(), ["converter", "waiter"]);
    assert!(locker.is_empty());
}

#[test]
fn timed_out_request_leaves_no_trace() {
    let locker = sx_locker();
    assert_eq!(locker.lock("f", Exclusive), LockResult::Granted);

    let start = Instant::now();
    let outcome = thread::spawn({
        let locker = locker.clone();
        move || locker.lock_until("f", Exclusive, WaitTime::after(Duration::from_millis(100)))
    })
    .join()
    .unwrap();
    assert_eq!(outcome, LockResult::Timeout);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(100) + Duration::from_secs(2), "timed out late: {elapsed:?}");

    let status = locker.status("f").unwrap();
    assert_eq!(status, LockStatus { group_mode: Some(Exclusive), granted: 1, converting: 0, waiting: 0 });
    assert!(locker.unlock("f"));
    assert!(locker.status("f").is_none());
    assert!(locker.is_empty());
}

#[test]
fn released_resource_is_brand_new() {
    let locker = sx_locker();
    let other = Requester::new();
    assert_eq!(locker.lock("f", Exclusive), LockResult::Granted);
    assert_eq!(locker.len(), 1);
    assert!(locker.unlock("f"));
    assert_eq!(locker.len(), 0);

    assert_eq!(locker.lock_as(other, "f", Shared, WaitTime::now()), LockResult::Granted);
    assert_eq!(locker.status("f").unwrap().group_mode, Some(Shared));
    assert!(locker.unlock_as(other, "f"));
}

#[test]
fn shared_holders_converting_both_time_out() {
    let locker = sx_locker();
    // Neither reader may release its lock before both conversions resolved.
    let resolved = Arc::new(Barrier::new(2));
    let handles = (0..2)
        .map(|_| {
            let (locker, resolved) = (locker.clone(), resolved.clone());
            let (tx, rx) = channel();
            let handle = thread::spawn(move || {
                assert_eq!(locker.lock("f", Shared), LockResult::Granted);
                // Both readers must hold the lock before either converts.
                rx.recv().unwrap();
                let outcome = locker.lock_until("f", Exclusive, WaitTime::after(Duration::from_millis(150)));
                resolved.wait();
                assert!(locker.unlock("f"));
                outcome
            });
            (handle, tx)
        })
        .collect::<Vec<_>>();
    wait_for(|| locker.status("f").map_or(false, |status| status.granted == 2));

    for (_, tx) in &handles {
        tx.send(()).unwrap();
    }
    for (handle, _) in handles {
        assert_eq!(handle.join().unwrap(), LockResult::Timeout);
    }
    assert!(locker.is_empty());
}

#[test]
fn end_to_end_shared_exclusive() {
    let locker = sx_locker();
    let (t1, t2, t3) = (Requester::new(), Requester::new(), Requester::new());
    let in_100ms = || WaitTime::after(Duration::from_millis(100));

    assert_eq!(locker.lock_as(t1, "f", Shared, WaitTime::FOREVER), LockResult::Granted);
    assert_eq!(locker.lock_as(t2, "f", Shared, WaitTime::FOREVER), LockResult::Granted);
    assert_eq!(locker.lock_as(t3, "f", Exclusive, in_100ms()), LockResult::Timeout);
    assert!(locker.unlock_as(t1, "f"));
    assert!(locker.unlock_as(t2, "f"));
    assert!(locker.is_empty());
    assert_eq!(locker.lock_as(t3, "f", Exclusive, in_100ms()), LockResult::Granted);
    assert!(locker.unlock_as(t3, "f"));
}

#[test]
fn unbalanced_unlock_returns_false() {
    let locker = sx_locker();
    assert!(!locker.unlock("f"));

    let owner = Requester::new();
    assert_eq!(locker.lock_as(owner, "f", Shared, WaitTime::FOREVER), LockResult::Granted);
    assert!(!locker.unlock("f"));
    assert!(locker.unlock_as(owner, "f"));
    assert!(!locker.unlock_as(owner, "f"));
}

#[test]
fn resources_are_independent() {
    let locker = sx_locker();
    let other = Requester::new();
    assert_eq!(locker.lock("a", Exclusive), LockResult::Granted);
    assert_eq!(locker.lock_as(other, "b", Exclusive, WaitTime::now()), LockResult::Granted);
    assert_eq!(locker.len(), 2);
    assert!(locker.unlock("a"));
    assert!(locker.unlock_as(other, "b"));
    assert!(locker.is_empty());
}

#[test]
fn owned_keys_unlock_through_borrowed_form() {
    let locker = Locker::<SharedExclusive, String>::new(
        SharedExclusive::compatibility_matrix(),
        SharedExclusive::group_mode_matrix(),
    );
    assert_eq!(locker.lock(String::from("db/t"), Shared), LockResult::Granted);
    assert!(locker.status("db/t").is_some());
    assert!(locker.unlock("db/t"));
    assert!(locker.is_empty());
}

#[test]
fn unrestricted_matrix_never_blocks() {
    let everything = CompatibilityMatrix::new([[true; 2]; 2]).unwrap();
    let locker = Locker::<SharedExclusive, u32>::new(everything, SharedExclusive::group_mode_matrix());
    let others = [Requester::new(), Requester::new()];

    assert_eq!(locker.lock(7, Exclusive), LockResult::Granted);
    for other in others {
        assert_eq!(locker.lock_as(other, 7, Exclusive, WaitTime::now()), LockResult::Granted);
    }
    assert_eq!(locker.status(&7_u32).unwrap().granted, 3);
    for other in others {
        assert!(locker.unlock_as(other, &7_u32));
    }
    assert!(locker.unlock(&7_u32));
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Access {
    Read,
    Append,
    Rewrite,
}

impl LockMode for Access {
    const COUNT: usize = 3;

    fn index(self) -> usize {
        self as usize
    }
}

#[test]
fn custom_modes_follow_their_matrices() {
    use Access::*;

    let compatibility = CompatibilityMatrix::new([
        [true, true, false],
        [true, false, false],
        [false, false, false],
    ])
    .unwrap();
    let groups = GroupModeMatrix::new([
        [Read, Append, Rewrite],
        [Append, Append, Rewrite],
        [Rewrite, Rewrite, Rewrite],
    ])
    .unwrap();
    let locker = Locker::<Access, &str>::new(compatibility, groups);
    let (reader, appender, other) = (Requester::new(), Requester::new(), Requester::new());

    assert_eq!(locker.lock_as(reader, "log", Read, WaitTime::now()), LockResult::Granted);
    assert_eq!(locker.lock_as(appender, "log", Append, WaitTime::now()), LockResult::Granted);
    assert_eq!(locker.status("log").unwrap().group_mode, Some(Append));
    assert_eq!(locker.lock_as(other, "log", Append, WaitTime::now()), LockResult::Timeout);
    assert_eq!(locker.lock_as(other, "log", Read, WaitTime::now()), LockResult::Granted);

    for requester in [reader, appender, other] {
        assert!(locker.unlock_as(requester, "log"));
    }
    assert!(locker.is_empty());
}

#[test]
fn malformed_matrices_are_rejected() {
    let short = CompatibilityMatrix::<SharedExclusive>::from_rows(&[[true, false]]);
    assert_eq!(short.unwrap_err(), MatrixError::RowCount { expected: 2, found: 1 });

    let ragged: [&[SharedExclusive]; 2] = [&[Shared, Exclusive], &[Exclusive]];
    let ragged = GroupModeMatrix::<SharedExclusive>::from_rows(&ragged);
    assert_eq!(ragged.unwrap_err(), MatrixError::ColumnCount { row: 1, expected: 2, found: 1 });

    let oversized = CompatibilityMatrix::<SharedExclusive>::new([[true; 3]; 3]);
    assert!(oversized.is_err());
}
