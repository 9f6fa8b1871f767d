use core::ops::Add;
use std::time::{Duration, Instant};

/// A point in time after which a blocked [`lock`] call gives up.
///
/// The deadline is absolute, so it can be computed once and shared by several
/// lock calls that must all complete by the same instant. [`FOREVER`] never
/// elapses, and a deadline that has already passed turns a lock call into a
/// non blocking attempt.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use hierlock::WaitTime;
///
/// let deadline = WaitTime::now() + Duration::from_millis(100);
/// assert!(deadline.deadline().is_some());
/// assert!(WaitTime::FOREVER.deadline().is_none());
/// assert_eq!(WaitTime::FOREVER + Duration::from_secs(1), WaitTime::FOREVER);
/// ```
///
/// [`lock`]: crate::Locker::lock_until
/// [`FOREVER`]: WaitTime::FOREVER
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct WaitTime(Option<Instant>);

impl WaitTime {
    /// A wait time that never elapses.
    pub const FOREVER: Self = Self(None);

    /// Returns the current instant as a wait time.
    ///
    /// Locking with this deadline never blocks.
    pub fn now() -> Self {
        Self(Some(Instant::now()))
    }

    /// Returns the wait time `duration` from now.
    ///
    /// Saturates to [`FOREVER`] if the instant is not representable.
    ///
    /// [`FOREVER`]: WaitTime::FOREVER
    pub fn after(duration: Duration) -> Self {
        Self::now() + duration
    }

    /// Returns the deadline instant, or `None` for [`FOREVER`].
    ///
    /// [`FOREVER`]: WaitTime::FOREVER
    pub fn deadline(self) -> Option<Instant> {
        self.0
    }

    /// Returns `true` if the deadline has passed.
    pub fn has_elapsed(self) -> bool {
        self.0.map_or(false, |deadline| deadline <= Instant::now())
    }
}

impl Add<Duration> for WaitTime {
    type Output = Self;

    fn add(self, duration: Duration) -> Self {
        Self(self.0.and_then(|deadline| deadline.checked_add(duration)))
    }
}

impl From<Instant> for WaitTime {
    fn from(deadline: Instant) -> Self {
        Self(Some(deadline))
    }
}

impl From<Option<Instant>> for WaitTime {
    fn from(deadline: Option<Instant>) -> Self {
        Self(deadline)
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::time::{Duration, Instant};

    use super::WaitTime;

    #[test]
    fn default_is_forever() {
        assert_eq!(WaitTime::default(), WaitTime::FOREVER);
        assert!(!WaitTime::FOREVER.has_elapsed());
    }

    #[test]
    fn now_has_elapsed() {
        assert!(WaitTime::now().has_elapsed());
        assert!(!WaitTime::after(Duration::from_secs(60)).has_elapsed());
    }

    #[test]
    fn add_moves_the_deadline() {
        let start = Instant::now();
        let wait = WaitTime::from(start) + Duration::from_millis(250);
        assert_eq!(wait.deadline(), Some(start + Duration::from_millis(250)));
    }

    #[test]
    fn overflow_saturates_to_forever() {
        assert_eq!(WaitTime::now() + Duration::MAX, WaitTime::FOREVER);
    }
}
