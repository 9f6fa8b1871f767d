use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering::Relaxed};

use crate::cfg::thread::thread_local;

/// The identity of a logical caller of a [`Locker`].
///
/// Two lock calls made by the same requester on the same resource are
/// re-entrant: the second one either increments the hold count or converts the
/// held lock to a new mode. A requester carries no ownership, it is only ever
/// compared for equality.
///
/// By default, every OS thread is its own requester, see [`current`]. Callers
/// whose units of work do not map one to one onto threads (tasks multiplexed
/// on a pool, transactions handed between threads) can mint their own tokens
/// with [`new`] and pass them to [`Locker::lock_as`] and [`Locker::unlock_as`].
///
/// # Examples
///
/// ```
/// use std::thread;
///
/// use hierlock::Requester;
///
/// let here = Requester::current();
/// assert_eq!(here, Requester::current());
///
/// let there = thread::spawn(Requester::current).join().unwrap();
/// assert_ne!(here, there);
///
/// assert_ne!(Requester::new(), Requester::new());
/// ```
///
/// [`Locker`]: crate::Locker
/// [`Locker::lock_as`]: crate::Locker::lock_as
/// [`Locker::unlock_as`]: crate::Locker::unlock_as
/// [`current`]: Requester::current
/// [`new`]: Requester::new
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Requester(u64);

impl Requester {
    /// Creates a new requester token, distinct from every other token created
    /// by this process, including the ones bound to threads.
    pub fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Relaxed))
    }

    /// Returns the requester bound to the calling thread.
    ///
    /// The token is created on first use and stays the same for the whole
    /// lifetime of the thread.
    pub fn current() -> Self {
        thread_local! {
            static CURRENT: Requester = Requester::new();
        }
        CURRENT.with(|requester| *requester)
    }
}

impl Default for Requester {
    /// Creates a new, distinct requester token. See [`Requester::new`].
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Requester({})", self.0)
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::collections::HashSet;
    use std::thread;

    use super::Requester;

    #[test]
    fn current_is_stable_within_a_thread() {
        assert_eq!(Requester::current(), Requester::current());
    }

    #[test]
    fn threads_are_distinct_requesters() {
        let handles = (0..8).map(|_| thread::spawn(Requester::current)).collect::<Vec<_>>();
        let mut seen = HashSet::new();
        seen.insert(Requester::current());
        for handle in handles {
            assert!(seen.insert(handle.join().unwrap()));
        }
    }

    #[test]
    fn minted_tokens_never_collide_with_threads() {
        let here = Requester::current();
        let token = Requester::new();
        assert_ne!(here, token);
        assert_ne!(token, Requester::default());
    }
}
