//! The lock manager engine.
//!
//! A [`Locker`] keeps a table from resource to lock entry. Each entry holds the
//! resource's group mode and three FIFO queues of requests: the granted group,
//! the conversions asked for by members of that group, and the new requesters
//! waiting to join it. Two tiers of mutexes protect this state:
//!
//! - the table mutex guards insertion, lookup and eviction of entries, and is
//!   held as briefly as possible;
//! - each entry's mutex guards that entry's queues and group mode, and is the
//!   mutex every blocked request of the resource waits on.
//!
//! A thread always acquires the entry mutex *before* releasing the table mutex
//! (lock coupling). Entries are evicted with both held, so an entry that has
//! been looked up can never be evicted under a thread that is about to queue
//! on it. The table mutex is never acquired while an entry mutex is held.

mod entry;
mod queue;
mod request;

use core::borrow::Borrow;
use core::fmt;
use core::hash::Hash;
use std::collections::HashMap;

use tracing::{debug, trace};

use crate::cfg::sync::{Arc, Mutex};
use crate::matrix::{CompatibilityMatrix, GroupModeMatrix};
use crate::mode::LockMode;
use crate::requester::Requester;
use crate::wait::WaitTime;

use entry::{Entry, EntryState};
use request::{Request, Signal};

/// The outcome of a lock request.
///
/// None of these are errors: `Denied` and `Timeout` are regular results of
/// contention that the caller is expected to handle, by retrying or by
/// aborting its unit of work.
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockResult {
    /// The lock is held in the requested mode.
    Granted,
    /// The request was refused without waiting. This happens when the
    /// requester already has a request blocked on the same resource, or when
    /// a pending conversion loses the lock it was converting.
    Denied,
    /// The deadline elapsed before the lock could be granted.
    Timeout,
}

impl LockResult {
    /// Returns `true` if the lock was granted.
    #[inline]
    pub fn is_granted(self) -> bool {
        matches!(self, LockResult::Granted)
    }
}

/// A snapshot of the lock state of one resource.
///
/// Returned by [`Locker::status`]. It is a copy taken under the entry's
/// mutex, the live state may have moved on by the time it is inspected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockStatus<M> {
    /// The combined mode of all granted requests.
    pub group_mode: Option<M>,
    /// Number of granted requests, one per holder.
    pub granted: usize,
    /// Number of requests waiting to convert a held lock.
    pub converting: usize,
    /// Number of new requests waiting to be granted.
    pub waiting: usize,
}

/// What `lock` has to do after the immediate admission checks.
enum Admission {
    Done(LockResult),
    Queued(Arc<Signal>),
}

/// A hierarchical lock manager.
///
/// `Locker` grants resources of type `R` to requesters in modes of type `M`.
/// Which modes can be held together, and what mode a group of holders
/// amounts to, is entirely defined by the [`CompatibilityMatrix`] and
/// [`GroupModeMatrix`] given to [`new`].
///
/// Locks are re-entrant per [`Requester`]: locking a resource again in the
/// held mode adds one hold, locking it in another mode converts the held lock,
/// and every successful `lock` must be balanced by one `unlock`. Waiting
/// requests are served in FIFO order, and pending conversions are always
/// served before new requesters.
///
/// There is no deadlock detection. Two holders converting to mutually
/// incompatible modes wait on each other until their deadlines elapse, or
/// forever without one.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use hierlock::mode::Extended::{self, Exclusive, IntentionExclusive};
/// use hierlock::{LockResult, Locker};
///
/// let locker = Arc::new(Locker::new(
///     Extended::compatibility_matrix(),
///     Extended::group_mode_matrix(),
/// ));
///
/// let handles = (0..4)
///     .map(|row| {
///         let locker = Arc::clone(&locker);
///         thread::spawn(move || {
///             let table = String::from("db/table");
///             let row = format!("db/table/{row}");
///             // Announce the intent on the table, then lock the row.
///             assert_eq!(locker.lock(table.clone(), IntentionExclusive), LockResult::Granted);
///             assert_eq!(locker.lock(row.clone(), Exclusive), LockResult::Granted);
///
///             assert!(locker.unlock(&row));
///             assert!(locker.unlock(&table));
///         })
///     })
///     .collect::<Vec<_>>();
///
/// for handle in handles {
///     handle.join().unwrap();
/// }
/// assert!(locker.is_empty());
/// ```
///
/// [`new`]: Locker::new
pub struct Locker<M, R> {
    table: Mutex<HashMap<R, Arc<Entry<M>>>>,
    compatibility: CompatibilityMatrix<M>,
    groups: GroupModeMatrix<M>,
}

impl<M: LockMode, R: Eq + Hash + fmt::Debug> Locker<M, R> {
    /// Creates a new locker with no resource locked.
    pub fn new(compatibility: CompatibilityMatrix<M>, groups: GroupModeMatrix<M>) -> Self {
        let table = Mutex::new(HashMap::new());
        Self { table, compatibility, groups }
    }

    /// Locks `resource` in `mode` for the calling thread, waiting as long as
    /// it takes.
    ///
    /// See [`lock_as`] for the full semantics.
    ///
    /// [`lock_as`]: Locker::lock_as
    pub fn lock(&self, resource: R, mode: M) -> LockResult {
        self.lock_as(Requester::current(), resource, mode, WaitTime::FOREVER)
    }

    /// Locks `resource` in `mode` for the calling thread, giving up once
    /// `timeout` elapses.
    ///
    /// See [`lock_as`] for the full semantics.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::thread;
    /// use std::time::Duration;
    ///
    /// use hierlock::mode::SharedExclusive::{self, Exclusive};
    /// use hierlock::{LockResult, Locker, WaitTime};
    ///
    /// let locker = Locker::new(
    ///     SharedExclusive::compatibility_matrix(),
    ///     SharedExclusive::group_mode_matrix(),
    /// );
    /// assert_eq!(locker.lock("file", Exclusive), LockResult::Granted);
    ///
    /// thread::scope(|s| {
    ///     s.spawn(|| {
    ///         let deadline = WaitTime::after(Duration::from_millis(50));
    ///         assert_eq!(locker.lock_until("file", Exclusive, deadline), LockResult::Timeout);
    ///     });
    /// });
    /// assert!(locker.unlock("file"));
    /// ```
    ///
    /// [`lock_as`]: Locker::lock_as
    pub fn lock_until(&self, resource: R, mode: M, timeout: impl Into<WaitTime>) -> LockResult {
        self.lock_as(Requester::current(), resource, mode, timeout.into())
    }

    /// Locks `resource` in `mode` on behalf of `requester`.
    ///
    /// - If nobody has locked `resource`, the lock is granted at once.
    /// - If `requester` already holds `resource` in `mode`, one hold is added
    ///   and the lock is granted at once.
    /// - If `requester` holds `resource` in another mode, the held lock is
    ///   converted. The conversion is granted at once if no other conversion
    ///   is pending and `mode` is compatible with the group mode of the other
    ///   holders. Otherwise the request queues behind earlier conversions.
    ///   A granted conversion counts as one more hold.
    /// - Otherwise the lock is granted at once only if nothing is queued on
    ///   the resource and `mode` is compatible with the group mode. If not,
    ///   the request queues behind earlier waiters.
    ///
    /// A queued request blocks the calling thread until an [`unlock`]
    /// promotes it or until `timeout` elapses, in which case the request is
    /// withdrawn and [`LockResult::Timeout`] is returned.
    ///
    /// Returns [`LockResult::Denied`] without waiting if `requester` already
    /// has a request blocked on `resource`, which can only happen when the
    /// same token is shared between threads.
    ///
    /// [`unlock`]: Locker::unlock_as
    pub fn lock_as(&self, requester: Requester, resource: R, mode: M, timeout: WaitTime) -> LockResult {
        let mut table = self.table.lock();

        let Some(entry) = table.get(&resource).map(Arc::clone) else {
            trace!(?resource, ?requester, ?mode, "granted to first owner");
            let entry = Entry::granted(Request::granted(requester, mode));
            table.insert(resource, Arc::new(entry));
            return LockResult::Granted;
        };

        let mut state = entry.lock();
        drop(table);

        let signal = match self.admit(&mut state, &resource, requester, mode) {
            Admission::Done(result) => return result,
            Admission::Queued(signal) => signal,
        };

        let outcome = signal.wait(&mut state, timeout);
        if outcome != LockResult::Granted {
            // Only a request that resolved itself can still be queued.
            let withdrawn = state.converting.remove(&signal).is_some()
                || state.waiting.remove(&signal).is_some();
            debug!(?resource, ?requester, ?mode, ?outcome, "request withdrawn");
            if withdrawn {
                self.grant_pending(&mut state, &resource);
            }
        }
        outcome
    }

    /// Releases one hold of `resource` by the calling thread.
    ///
    /// See [`unlock_as`] for the full semantics.
    ///
    /// [`unlock_as`]: Locker::unlock_as
    pub fn unlock<Q>(&self, resource: &Q) -> bool
    where
        R: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        self.unlock_as(Requester::current(), resource)
    }

    /// Releases one hold of `resource` by `requester`.
    ///
    /// Returns `false` if `requester` does not hold `resource`, this is not
    /// considered an error. Once the last hold of `requester` is released, the
    /// group mode is recomputed and queued requests are promoted: pending
    /// conversions first, then waiting requests, each queue in FIFO order and
    /// each stopping at its first request that cannot be granted yet. A
    /// conversion that cannot be granted also holds back every waiting
    /// request. When no request is left at all, the resource is forgotten.
    pub fn unlock_as<Q>(&self, requester: Requester, resource: &Q) -> bool
    where
        R: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        let mut table = self.table.lock();

        let Some(entry) = table.get(resource).map(Arc::clone) else {
            debug!(?resource, ?requester, "unlock of a resource nobody holds");
            return false;
        };

        let mut state = entry.lock();

        let Some(held) = state.granted.find_mut(requester) else {
            debug!(?resource, ?requester, "unlock by a requester holding nothing");
            return false;
        };
        held.count -= 1;
        if held.count > 0 {
            trace!(?resource, ?requester, count = held.count, "released one hold");
            return true;
        }

        state.granted.remove_requester(requester);
        state.group_mode = None;

        if state.is_empty() {
            table.remove(resource);
            trace!(?resource, ?requester, "released, resource is free");
            return true;
        }
        drop(table);

        state.regroup(&self.groups);
        trace!(?resource, ?requester, group_mode = ?state.group_mode, "released");
        self.grant_pending(&mut state, resource);
        true
    }

    /// Returns a snapshot of the lock state of `resource`, or `None` if no
    /// request exists for it.
    ///
    /// # Examples
    ///
    /// ```
    /// use hierlock::mode::SharedExclusive::{self, Shared};
    /// use hierlock::{LockResult, Locker};
    ///
    /// let locker = Locker::new(
    ///     SharedExclusive::compatibility_matrix(),
    ///     SharedExclusive::group_mode_matrix(),
    /// );
    /// assert!(locker.status("index").is_none());
    ///
    /// assert_eq!(locker.lock("index", Shared), LockResult::Granted);
    /// let status = locker.status("index").unwrap();
    /// assert_eq!(status.group_mode, Some(Shared));
    /// assert_eq!((status.granted, status.converting, status.waiting), (1, 0, 0));
    /// # assert!(locker.unlock("index"));
    /// ```
    pub fn status<Q>(&self, resource: &Q) -> Option<LockStatus<M>>
    where
        R: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let table = self.table.lock();
        let state = table.get(resource)?.lock();
        Some(LockStatus {
            group_mode: state.group_mode,
            granted: state.granted.len(),
            converting: state.converting.len(),
            waiting: state.waiting.len(),
        })
    }

    /// Returns the number of resources with at least one request.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Returns `true` if no resource has any request.
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    /// Applies the immediate grant rules, queueing the request when none of
    /// them applies.
    fn admit(&self, state: &mut EntryState<M>, resource: &R, requester: Requester, mode: M) -> Admission {
        if state.is_pending(requester) {
            debug!(?resource, ?requester, ?mode, "denied, requester is already blocked here");
            return Admission::Done(LockResult::Denied);
        }

        if let Some(held) = state.granted.find_mut(requester) {
            if held.mode == mode {
                held.count += 1;
                trace!(?resource, ?requester, ?mode, count = held.count, "granted again");
                return Admission::Done(LockResult::Granted);
            }
        }

        let signal = Arc::new(Signal::new());
        if let Some(held) = state.held_mode(requester) {
            let others = state.group_mode_excluding(requester, &self.groups);
            if state.converting.is_empty() && self.compatibility.compatible(mode, others) {
                state.convert(requester, mode, &self.groups);
                debug!(?resource, ?requester, from = ?held, to = ?mode, "converted");
                return Admission::Done(LockResult::Granted);
            }
            debug!(?resource, ?requester, from = ?held, to = ?mode, "waiting to convert");
            state.converting.add(Request::new(requester, mode, Arc::clone(&signal)));
        } else {
            let queued = !state.converting.is_empty() || !state.waiting.is_empty();
            if !queued && self.compatibility.compatible(mode, state.group_mode) {
                state.grant(Request::granted(requester, mode), &self.groups);
                trace!(?resource, ?requester, ?mode, "granted");
                return Admission::Done(LockResult::Granted);
            }
            debug!(?resource, ?requester, ?mode, group_mode = ?state.group_mode, "waiting");
            state.waiting.add(Request::new(requester, mode, Arc::clone(&signal)));
        }
        Admission::Queued(signal)
    }

    /// Promotes queued requests that became grantable, conversions first.
    fn grant_pending<Q: fmt::Debug + ?Sized>(&self, state: &mut EntryState<M>, resource: &Q) {
        while let Some(head) = state.converting.front() {
            let (requester, mode) = (head.requester, head.mode);
            let outcome = if state.held_mode(requester).is_none() {
                // The held lock was released from under the conversion.
                LockResult::Denied
            } else {
                let others = state.group_mode_excluding(requester, &self.groups);
                if !self.compatibility.compatible(mode, others) {
                    return;
                }
                LockResult::Granted
            };
            let Some(request) = state.converting.pop_front() else { break };
            if outcome.is_granted() {
                let converted = state.convert(requester, mode, &self.groups);
                debug_assert!(converted, "conversion lost its granted request");
            }
            debug!(?resource, ?requester, ?mode, ?outcome, "conversion resolved");
            request.complete(outcome);
        }

        let compatibility = &self.compatibility;
        loop {
            let group_mode = state.group_mode;
            let admit = |head: &Request<M>| compatibility.compatible(head.mode, group_mode);
            let Some(request) = state.waiting.pop_front_if(admit) else { break };
            debug!(?resource, requester = ?request.requester, mode = ?request.mode, "promoted");
            request.complete(LockResult::Granted);
            state.grant(request, &self.groups);
        }
    }
}

impl<M: LockMode, R> fmt::Debug for Locker<M, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Locker")
            .field("compatibility", &self.compatibility)
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::mpsc::channel;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crate::mode::Extended::{self, *};
    use crate::test::{init_tracing, wait_for};
    use crate::{LockResult, Locker, Requester, WaitTime};

    type ExtendedLocker = Locker<Extended, &'static str>;

    fn locker() -> Arc<ExtendedLocker> {
        init_tracing();
        Arc::new(Locker::new(Extended::compatibility_matrix(), Extended::group_mode_matrix()))
    }

    fn queued(locker: &ExtendedLocker, resource: &str, converting: usize, waiting: usize) -> bool {
        locker.status(resource).map_or(false, |s| (s.converting, s.waiting) == (converting, waiting))
    }

    #[test]
    fn first_owner_is_granted() {
        let locker = locker();
        assert_eq!(locker.lock("db", Shared), LockResult::Granted);
        assert_eq!(locker.status("db").unwrap().group_mode, Some(Shared));
        assert!(locker.unlock("db"));
        assert!(locker.is_empty());
    }

    #[test]
    fn same_mode_is_re_entrant() {
        let locker = locker();
        for _ in 0..5 {
            assert_eq!(locker.lock("db", Exclusive), LockResult::Granted);
        }
        assert_eq!(locker.status("db").unwrap().granted, 1);
        for _ in 0..5 {
            assert!(locker.unlock("db"));
        }
        assert!(!locker.unlock("db"));
        assert!(locker.is_empty());
    }

    #[test]
    fn unlock_without_holding() {
        let locker = locker();
        assert!(!locker.unlock("db"));

        let other = Requester::new();
        assert_eq!(locker.lock_as(other, "db", Exclusive, WaitTime::FOREVER), LockResult::Granted);
        assert!(!locker.unlock("db"));
        assert!(locker.unlock_as(other, "db"));
    }

    #[test]
    fn compatible_new_requester_joins_the_group() {
        let locker = locker();
        let (a, b) = (Requester::new(), Requester::new());
        assert_eq!(locker.lock_as(a, "db", IntentionShared, WaitTime::FOREVER), LockResult::Granted);
        assert_eq!(locker.lock_as(b, "db", IntentionExclusive, WaitTime::FOREVER), LockResult::Granted);
        assert_eq!(locker.status("db").unwrap().group_mode, Some(IntentionExclusive));
        assert!(locker.unlock_as(b, "db"));
        assert_eq!(locker.status("db").unwrap().group_mode, Some(IntentionShared));
        assert!(locker.unlock_as(a, "db"));
    }

    // T1 holds S. T2 asks for X and waits. T3 asks for S, which is compatible
    // with the group, but must wait behind T2.
    #[test]
    fn waiters_block_compatible_newcomers() {
        let locker = locker();
        let (t2, t3) = (Requester::new(), Requester::new());
        assert_eq!(locker.lock("db", Shared), LockResult::Granted);

        let (tx, rx) = channel();
        let writer = thread::spawn({
            let (locker, tx) = (Arc::clone(&locker), tx.clone());
            move || {
                assert_eq!(locker.lock_as(t2, "db", Exclusive, WaitTime::FOREVER), LockResult::Granted);
                tx.send("writer").unwrap();
                assert!(locker.unlock_as(t2, "db"));
            }
        });
        wait_for(|| queued(&locker, "db", 0, 1));

        let reader = thread::spawn({
            let locker = Arc::clone(&locker);
            move || {
                assert_eq!(locker.lock_as(t3, "db", Shared, WaitTime::FOREVER), LockResult::Granted);
                tx.send("reader").unwrap();
                assert!(locker.unlock_as(t3, "db"));
            }
        });
        wait_for(|| queued(&locker, "db", 0, 2));

        assert!(locker.unlock("db"));
        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(rx.iter().collect::<Vec<_>>(), ["writer", "reader"]);
        assert!(locker.is_empty());
    }

    // T1, T2 and T3 hold S. T1 converts to IS, which is compatible with the
    // rest of the group, even with a writer waiting.
    #[test]
    fn immediate_conversion_with_waiters() {
        let locker = locker();
        let (t2, t3, t4) = (Requester::new(), Requester::new(), Requester::new());
        assert_eq!(locker.lock("db", Shared), LockResult::Granted);
        assert_eq!(locker.lock_as(t2, "db", Shared, WaitTime::FOREVER), LockResult::Granted);
        assert_eq!(locker.lock_as(t3, "db", Shared, WaitTime::FOREVER), LockResult::Granted);

        let writer = thread::spawn({
            let locker = Arc::clone(&locker);
            move || {
                assert_eq!(locker.lock_as(t4, "db", Exclusive, WaitTime::FOREVER), LockResult::Granted);
                assert!(locker.unlock_as(t4, "db"));
            }
        });
        wait_for(|| queued(&locker, "db", 0, 1));

        assert_eq!(locker.lock("db", IntentionShared), LockResult::Granted);
        let status = locker.status("db").unwrap();
        assert_eq!((status.granted, status.converting, status.waiting), (3, 0, 1));
        assert_eq!(status.group_mode, Some(Shared));

        // The conversion counts as a second hold.
        assert!(locker.unlock("db"));
        assert!(locker.unlock("db"));
        assert!(locker.unlock_as(t2, "db"));
        assert!(locker.unlock_as(t3, "db"));
        writer.join().unwrap();
        assert!(locker.is_empty());
    }

    // T1 holds U, T2 and T3 hold IS. T1 converting to X must wait until both
    // readers are gone.
    #[test]
    fn conversion_waits_for_the_rest_of_the_group() {
        let locker = locker();
        let t1 = Requester::new();
        let readers = [Requester::new(), Requester::new()];
        assert_eq!(locker.lock_as(t1, "db", Update, WaitTime::FOREVER), LockResult::Granted);
        for reader in readers {
            assert_eq!(locker.lock_as(reader, "db", IntentionShared, WaitTime::FOREVER), LockResult::Granted);
        }

        let converter = thread::spawn({
            let locker = Arc::clone(&locker);
            move || locker.lock_as(t1, "db", Exclusive, WaitTime::FOREVER)
        });
        wait_for(|| queued(&locker, "db", 1, 0));

        assert!(locker.unlock_as(readers[0], "db"));
        assert!(queued(&locker, "db", 1, 0));
        assert!(locker.unlock_as(readers[1], "db"));

        assert_eq!(converter.join().unwrap(), LockResult::Granted);
        let status = locker.status("db").unwrap();
        assert_eq!((status.group_mode, status.granted), (Some(Exclusive), 1));
        assert!(locker.unlock_as(t1, "db"));
        assert!(locker.unlock_as(t1, "db"));
        assert!(locker.is_empty());
    }

    // T1 holds U, T2 and T3 hold IS and both queue a conversion to IX. Once T1
    // leaves, both conversions are granted together.
    #[test]
    fn queued_conversions_are_granted_in_order() {
        let locker = locker();
        let t1 = Requester::new();
        let converters = [Requester::new(), Requester::new()];
        assert_eq!(locker.lock_as(t1, "db", Update, WaitTime::FOREVER), LockResult::Granted);
        for converter in converters {
            assert_eq!(locker.lock_as(converter, "db", IntentionShared, WaitTime::FOREVER), LockResult::Granted);
        }

        let handles = converters
            .iter()
            .enumerate()
            .map(|(i, &converter)| {
                let handle = thread::spawn({
                    let locker = Arc::clone(&locker);
                    move || locker.lock_as(converter, "db", IntentionExclusive, WaitTime::FOREVER)
                });
                wait_for(|| queued(&locker, "db", i + 1, 0));
                handle
            })
            .collect::<Vec<_>>();

        assert!(locker.unlock_as(t1, "db"));
        for handle in handles {
            assert_eq!(handle.join().unwrap(), LockResult::Granted);
        }
        assert_eq!(locker.status("db").unwrap().group_mode, Some(IntentionExclusive));
        for converter in converters {
            assert!(locker.unlock_as(converter, "db"));
            assert!(locker.unlock_as(converter, "db"));
        }
        assert!(locker.is_empty());
    }

    // T1 and T2 hold S, T3 and T4 wait for IX. T1 converting to X jumps ahead
    // of the waiters and is granted as soon as T2 leaves.
    #[test]
    fn conversions_are_served_before_waiters() {
        let locker = locker();
        let (t1, t2) = (Requester::new(), Requester::new());
        let waiters = [Requester::new(), Requester::new()];
        assert_eq!(locker.lock_as(t1, "db", Shared, WaitTime::FOREVER), LockResult::Granted);
        assert_eq!(locker.lock_as(t2, "db", Shared, WaitTime::FOREVER), LockResult::Granted);

        let (tx, rx) = channel();
        let mut handles = Vec::new();
        for (i, &waiter) in waiters.iter().enumerate() {
            let (locker2, tx) = (Arc::clone(&locker), tx.clone());
            handles.push(thread::spawn(move || {
                assert_eq!(locker2.lock_as(waiter, "db", IntentionExclusive, WaitTime::FOREVER), LockResult::Granted);
                tx.send(waiter).unwrap();
                assert!(locker2.unlock_as(waiter, "db"));
            }));
            wait_for(|| queued(&locker, "db", 0, i + 1));
        }

        let converter = thread::spawn({
            let (locker, tx) = (Arc::clone(&locker), tx.clone());
            move || {
                assert_eq!(locker.lock_as(t1, "db", Exclusive, WaitTime::FOREVER), LockResult::Granted);
                tx.send(t1).unwrap();
                assert!(locker.unlock_as(t1, "db"));
                assert!(locker.unlock_as(t1, "db"));
            }
        });
        wait_for(|| queued(&locker, "db", 1, 2));
        drop(tx);

        assert!(locker.unlock_as(t2, "db"));
        converter.join().unwrap();
        for handle in handles {
            handle.join().unwrap();
        }
        let order = rx.iter().collect::<Vec<_>>();
        assert_eq!(order[0], t1);
        assert_eq!(order.len(), 3);
        assert!(locker.is_empty());
    }

    // T1, T2 and T4 hold IS and T1 waits to convert to X. T3 asks for IS,
    // compatible with the group, yet has to queue behind the conversion.
    #[test]
    fn pending_conversion_holds_back_compatible_newcomers() {
        let locker = locker();
        let (t1, t2, t3, t4) = (Requester::new(), Requester::new(), Requester::new(), Requester::new());
        for holder in [t1, t2, t4] {
            assert_eq!(locker.lock_as(holder, "db", IntentionShared, WaitTime::FOREVER), LockResult::Granted);
        }

        let (tx, rx) = channel();
        let converter = thread::spawn({
            let (locker, tx) = (Arc::clone(&locker), tx.clone());
            move || {
                let outcome = locker.lock_as(t1, "db", Exclusive, WaitTime::FOREVER);
                tx.send("converter").unwrap();
                outcome
            }
        });
        wait_for(|| queued(&locker, "db", 1, 0));

        assert_eq!(locker.lock_as(t3, "db", IntentionShared, WaitTime::now()), LockResult::Timeout);
        assert!(queued(&locker, "db", 1, 0));

        let newcomer = thread::spawn({
            let locker = Arc::clone(&locker);
            move || {
                let outcome = locker.lock_as(t3, "db", IntentionShared, WaitTime::FOREVER);
                tx.send("newcomer").unwrap();
                outcome
            }
        });
        wait_for(|| queued(&locker, "db", 1, 1));

        // The conversion is still blocked by T2, and holds T3 back.
        assert!(locker.unlock_as(t4, "db"));
        let status = locker.status("db").unwrap();
        assert_eq!((status.granted, status.converting, status.waiting), (2, 1, 1));

        assert!(locker.unlock_as(t2, "db"));
        assert_eq!(converter.join().unwrap(), LockResult::Granted);
        let status = locker.status("db").unwrap();
        assert_eq!((status.group_mode, status.granted, status.waiting), (Some(Exclusive), 1, 1));

        assert!(locker.unlock_as(t1, "db"));
        assert!(locker.unlock_as(t1, "db"));
        assert_eq!(newcomer.join().unwrap(), LockResult::Granted);
        assert_eq!(rx.iter().collect::<Vec<_>>(), ["converter", "newcomer"]);
        assert!(locker.unlock_as(t3, "db"));
        assert!(locker.is_empty());
    }

    // T1 and T2 hold S and both convert to X: neither can ever be granted.
    #[test]
    fn conversion_deadlock_times_out() {
        let locker = locker();
        let holders = [Requester::new(), Requester::new()];
        for holder in holders {
            assert_eq!(locker.lock_as(holder, "db", Shared, WaitTime::FOREVER), LockResult::Granted);
        }

        let handles = holders
            .map(|holder| {
                let locker = Arc::clone(&locker);
                thread::spawn(move || {
                    let deadline = WaitTime::after(Duration::from_millis(200));
                    locker.lock_as(holder, "db", Exclusive, deadline)
                })
            });
        for handle in handles {
            assert_eq!(handle.join().unwrap(), LockResult::Timeout);
        }

        let status = locker.status("db").unwrap();
        assert_eq!((status.granted, status.converting, status.waiting), (2, 0, 0));
        assert_eq!(status.group_mode, Some(Shared));
        for holder in holders {
            assert!(locker.unlock_as(holder, "db"));
        }
        assert!(locker.is_empty());
    }

    // A waiter timing out at the head of the queue lets compatible requests
    // behind it through without waiting for another unlock.
    #[test]
    fn timed_out_head_releases_the_queue() {
        let locker = locker();
        let (writer, reader) = (Requester::new(), Requester::new());
        assert_eq!(locker.lock("db", Shared), LockResult::Granted);

        let blocked = thread::spawn({
            let locker = Arc::clone(&locker);
            move || {
                let deadline = WaitTime::after(Duration::from_millis(100));
                locker.lock_as(writer, "db", Exclusive, deadline)
            }
        });
        wait_for(|| queued(&locker, "db", 0, 1));

        let follower = thread::spawn({
            let locker = Arc::clone(&locker);
            move || locker.lock_as(reader, "db", Shared, WaitTime::FOREVER)
        });

        assert_eq!(blocked.join().unwrap(), LockResult::Timeout);
        assert_eq!(follower.join().unwrap(), LockResult::Granted);
        assert_eq!(locker.status("db").unwrap().granted, 2);

        assert!(locker.unlock_as(reader, "db"));
        assert!(locker.unlock("db"));
        assert!(locker.is_empty());
    }

    #[test]
    fn shared_token_already_blocked_is_denied() {
        let locker = locker();
        let token = Requester::new();
        assert_eq!(locker.lock("db", Exclusive), LockResult::Granted);

        let blocked = thread::spawn({
            let locker = Arc::clone(&locker);
            move || locker.lock_as(token, "db", Shared, WaitTime::FOREVER)
        });
        wait_for(|| queued(&locker, "db", 0, 1));

        assert_eq!(locker.lock_as(token, "db", Shared, WaitTime::FOREVER), LockResult::Denied);
        assert!(locker.unlock("db"));
        assert_eq!(blocked.join().unwrap(), LockResult::Granted);
        assert!(locker.unlock_as(token, "db"));
        assert!(locker.is_empty());
    }

    #[test]
    fn conversion_losing_its_lock_is_denied() {
        let locker = locker();
        let (holder, token) = (Requester::new(), Requester::new());
        assert_eq!(locker.lock_as(holder, "db", Shared, WaitTime::FOREVER), LockResult::Granted);
        assert_eq!(locker.lock_as(token, "db", Shared, WaitTime::FOREVER), LockResult::Granted);

        let converter = thread::spawn({
            let locker = Arc::clone(&locker);
            move || locker.lock_as(token, "db", Exclusive, WaitTime::FOREVER)
        });
        wait_for(|| queued(&locker, "db", 1, 0));

        // Another thread releases the converting token's hold.
        assert!(locker.unlock_as(token, "db"));
        assert_eq!(converter.join().unwrap(), LockResult::Denied);

        let status = locker.status("db").unwrap();
        assert_eq!((status.granted, status.converting), (1, 0));
        assert!(locker.unlock_as(holder, "db"));
        assert!(locker.is_empty());
    }

    #[test]
    fn past_deadline_is_a_try_lock() {
        let locker = locker();
        let other = Requester::new();
        assert_eq!(locker.lock("db", Exclusive), LockResult::Granted);
        assert_eq!(locker.lock_as(other, "db", Shared, WaitTime::now()), LockResult::Timeout);
        assert_eq!(locker.status("db").unwrap().waiting, 0);
        assert!(locker.unlock("db"));
        assert_eq!(locker.lock_as(other, "db", Shared, WaitTime::now()), LockResult::Granted);
        assert!(locker.unlock_as(other, "db"));
    }

    #[test]
    fn lock_unlock_cycles_across_threads() {
        let locker = locker();
        let handles = (0..8)
            .map(|i| {
                let locker = Arc::clone(&locker);
                thread::spawn(move || {
                    let page = if i % 2 == 0 { "page 0" } else { "page 1" };
                    for _ in 0..200 {
                        assert_eq!(locker.lock("db", IntentionExclusive), LockResult::Granted);
                        assert_eq!(locker.lock(page, Exclusive), LockResult::Granted);
                        assert!(locker.unlock(page));
                        assert!(locker.unlock("db"));
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(locker.is_empty());
    }
}

#[cfg(all(loom, test))]
mod test {
    // Using std's Arc or else these models run for too long.
    use std::sync::Arc;

    use loom::{model, thread};

    use crate::mode::SharedExclusive::{self, Exclusive, Shared};
    use crate::{LockResult, Locker, Requester, WaitTime};

    fn locker() -> Arc<Locker<SharedExclusive, u8>> {
        let compatibility = SharedExclusive::compatibility_matrix();
        Arc::new(Locker::new(compatibility, SharedExclusive::group_mode_matrix()))
    }

    #[test]
    fn exclusive_hand_off() {
        model(|| {
            let locker = locker();
            // 3 or more threads make this model run for too long.
            let handles = (0..2)
                .map(|_| {
                    let locker = Arc::clone(&locker);
                    thread::spawn(move || {
                        let me = Requester::new();
                        assert_eq!(locker.lock_as(me, 0, Exclusive, WaitTime::FOREVER), LockResult::Granted);
                        assert!(locker.unlock_as(me, &0_u8));
                    })
                })
                .collect::<Vec<_>>();
            for handle in handles {
                handle.join().unwrap();
            }
            assert!(locker.is_empty());
        });
    }

    #[test]
    fn conversion_hand_off() {
        model(|| {
            let locker = locker();
            let (reader, converter) = (Requester::new(), Requester::new());
            let _ = locker.lock_as(reader, 0, Shared, WaitTime::FOREVER);
            let _ = locker.lock_as(converter, 0, Shared, WaitTime::FOREVER);

            let handle = thread::spawn({
                let locker = Arc::clone(&locker);
                move || locker.lock_as(converter, 0, Exclusive, WaitTime::FOREVER)
            });
            assert!(locker.unlock_as(reader, &0_u8));
            assert_eq!(handle.join().unwrap(), LockResult::Granted);

            assert!(locker.unlock_as(converter, &0_u8));
            assert!(locker.unlock_as(converter, &0_u8));
            assert!(locker.is_empty());
        });
    }
}
