use crate::matrix::{CompatibilityMatrix, GroupModeMatrix};
use crate::mode::LockMode;

/// A readers-writer mode set.
///
/// Any number of [`Shared`] holders may lock a resource together, while an
/// [`Exclusive`] holder excludes everyone else.
///
/// | Requested | Shared | Exclusive |
/// |:---------:|:------:|:---------:|
/// | Shared    |  yes   |    no     |
/// | Exclusive |  no    |    no     |
///
/// # Examples
///
/// ```
/// use hierlock::mode::SharedExclusive::{Exclusive, Shared};
/// use hierlock::mode::SharedExclusive;
/// use hierlock::{LockResult, Locker, Requester, WaitTime};
///
/// let locker = Locker::new(
///     SharedExclusive::compatibility_matrix(),
///     SharedExclusive::group_mode_matrix(),
/// );
///
/// assert_eq!(locker.lock("table", Shared), LockResult::Granted);
///
/// // A writer cannot get in while the table is being read.
/// let writer = Requester::new();
/// let result = locker.lock_as(writer, "table", Exclusive, WaitTime::now());
/// assert_eq!(result, LockResult::Timeout);
///
/// assert!(locker.unlock("table"));
/// ```
///
/// [`Shared`]: SharedExclusive::Shared
/// [`Exclusive`]: SharedExclusive::Exclusive
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SharedExclusive {
    /// Read access, compatible with other readers.
    Shared,
    /// Write access, compatible with nothing.
    Exclusive,
}

impl LockMode for SharedExclusive {
    const COUNT: usize = 2;

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

impl SharedExclusive {
    /// Returns the default compatibility matrix for this mode set.
    pub fn compatibility_matrix() -> CompatibilityMatrix<Self> {
        CompatibilityMatrix::from_table([
            /* requested     shared  exclusive */
            /* shared    */ [true, false],
            /* exclusive */ [false, false],
        ])
    }

    /// Returns the default group mode matrix for this mode set.
    pub fn group_mode_matrix() -> GroupModeMatrix<Self> {
        use SharedExclusive::{Exclusive as X, Shared as S};

        GroupModeMatrix::from_table([
            /* requested  S  X */
            /* S */ [S, X],
            /* X */ [X, X],
        ])
    }
}
