use core::fmt;

use crate::cfg::sync::{Arc, Condvar, MutexGuard, OnceLock};
use crate::locker::LockResult;
use crate::requester::Requester;
use crate::wait::WaitTime;

/// The wake up channel of a single request.
///
/// Every request owns a private condition variable, so releasing a lock wakes
/// exactly the requests it promotes instead of every waiter on the resource.
/// The condition variable is always paired with the mutex of the entry the
/// request is queued on, and the outcome is only read or written while that
/// mutex is held.
pub struct Signal {
    cond: Condvar,
    outcome: OnceLock<LockResult>,
}

impl Signal {
    pub fn new() -> Self {
        Self { cond: Condvar::new(), outcome: OnceLock::new() }
    }

    /// Records the outcome and wakes the waiting requester.
    ///
    /// Must be called with the entry mutex held. The outcome is set once, a
    /// second completion is ignored.
    pub fn complete(&self, outcome: LockResult) {
        let _ = self.outcome.set(outcome);
        self.cond.notify_one();
    }

    /// Returns the outcome, if this request has already been resolved.
    pub fn outcome(&self) -> Option<LockResult> {
        self.outcome.get().copied()
    }

    /// Blocks on `guard` until the request is resolved or `timeout` elapses.
    ///
    /// Spurious wake ups are absorbed by the loop, only a signaler or the
    /// deadline may resolve the request. If the deadline elapses the request
    /// resolves itself as [`LockResult::Timeout`], unless a signaler got to it
    /// before the mutex was reacquired.
    pub fn wait<T>(&self, guard: &mut MutexGuard<'_, T>, timeout: WaitTime) -> LockResult {
        loop {
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            match timeout.deadline() {
                None => self.cond.wait(guard),
                Some(deadline) => {
                    if self.cond.wait_until(guard, deadline).timed_out() && self.outcome().is_none()
                    {
                        let _ = self.outcome.set(LockResult::Timeout);
                    }
                }
            }
        }
    }
}

/// One request for a resource, made by a requester in a mode.
pub struct Request<M> {
    pub requester: Requester,
    pub mode: M,
    /// Number of holds, incremented on re-entry and on conversion.
    pub count: usize,
    /// `None` for requests granted without ever blocking.
    signal: Option<Arc<Signal>>,
}

impl<M: Copy> Request<M> {
    /// Creates a request that is granted on creation.
    pub fn granted(requester: Requester, mode: M) -> Self {
        Self { requester, mode, count: 1, signal: None }
    }

    /// Creates a request whose requester will block on `signal`.
    pub fn new(requester: Requester, mode: M, signal: Arc<Signal>) -> Self {
        Self { requester, mode, count: 1, signal: Some(signal) }
    }

    /// Returns `true` if this request is the one `signal` belongs to.
    pub fn is(&self, signal: &Arc<Signal>) -> bool {
        self.signal.as_ref().map_or(false, |own| Arc::ptr_eq(own, signal))
    }

    /// Resolves this request and wakes its requester, if it ever blocked.
    pub fn complete(&self, outcome: LockResult) {
        if let Some(signal) = &self.signal {
            signal.complete(outcome);
        }
    }
}

impl<M: fmt::Debug> fmt::Debug for Request<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("requester", &self.requester)
            .field("mode", &self.mode)
            .field("count", &self.count)
            .finish()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use parking_lot::Mutex;

    use super::{Request, Signal};
    use crate::locker::LockResult;
    use crate::requester::Requester;
    use crate::wait::WaitTime;

    #[test]
    fn requests_start_with_one_hold() {
        let request = Request::granted(Requester::new(), 7_u8);
        assert_eq!(request.count, 1);
        assert_eq!(request.mode, 7);
    }

    #[test]
    fn identity_is_the_signal() {
        let signal = Arc::new(Signal::new());
        let requester = Requester::new();
        let request = Request::new(requester, 0_u8, Arc::clone(&signal));
        let twin = Request::new(requester, 0_u8, Arc::new(Signal::new()));
        assert!(request.is(&signal));
        assert!(!twin.is(&signal));
    }

    #[test]
    fn granted_requests_have_no_signal() {
        let signal = Arc::new(Signal::new());
        let request = Request::granted(Requester::new(), 0_u8);
        assert!(request.signal.is_none());
        assert!(!request.is(&signal));
        // Completing a request nobody waits on is a no-op.
        request.complete(LockResult::Granted);
        assert!(signal.outcome().is_none());
    }

    #[test]
    fn completed_signal_does_not_block() {
        let mutex = Mutex::new(());
        let signal = Signal::new();
        signal.complete(LockResult::Granted);
        let mut guard = mutex.lock();
        assert_eq!(signal.wait(&mut guard, WaitTime::FOREVER), LockResult::Granted);
    }

    #[test]
    fn outcome_is_set_once() {
        let signal = Signal::new();
        signal.complete(LockResult::Denied);
        signal.complete(LockResult::Granted);
        assert_eq!(signal.outcome(), Some(LockResult::Denied));
    }

    #[test]
    fn wait_times_out_by_itself() {
        let mutex = Mutex::new(());
        let signal = Signal::new();
        let start = Instant::now();
        let mut guard = mutex.lock();
        let outcome = signal.wait(&mut guard, WaitTime::after(Duration::from_millis(20)));
        assert_eq!(outcome, LockResult::Timeout);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(20));
        assert!(elapsed < Duration::from_secs(2), "timed out late: {elapsed:?}");
    }

    #[test]
    fn wait_wakes_on_completion() {
        let mutex = Arc::new(Mutex::new(false));
        let signal = Arc::new(Signal::new());

        let waiter = thread::spawn({
            let (mutex, signal) = (Arc::clone(&mutex), Arc::clone(&signal));
            move || {
                let mut guard = mutex.lock();
                *guard = true;
                signal.wait(&mut guard, WaitTime::FOREVER)
            }
        });

        // Complete only once the waiter is parked, that is, once it released
        // the mutex after flagging itself.
        loop {
            let guard = mutex.lock();
            if *guard {
                signal.complete(LockResult::Granted);
                break;
            }
            drop(guard);
            thread::yield_now();
        }
        assert_eq!(waiter.join().unwrap(), LockResult::Granted);
    }
}
