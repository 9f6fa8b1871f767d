use crate::matrix::{CompatibilityMatrix, GroupModeMatrix};
use crate::mode::LockMode;

/// A multi-granularity mode set with intention and update modes.
///
/// This is the classic set used by database engines that lock a hierarchy of
/// objects (database, table, page, row). A transaction announces its intent
/// at the coarse levels with an intention mode before locking the fine levels
/// in [`Shared`] or [`Exclusive`] mode. The [`Update`] mode is a read lock
/// that may later be converted to [`Exclusive`], and it is incompatible with
/// other update locks, which avoids the conversion deadlock two readers
/// upgrading together would run into.
///
/// Compatibility, requested mode by row and current group mode by column:
///
/// | Requested | IS  | IX  |  S  | SIX |  U  |  X  |
/// |:---------:|:---:|:---:|:---:|:---:|:---:|:---:|
/// | **IS**    | yes | yes | yes | yes | yes | no  |
/// | **IX**    | yes | yes | no  | no  | no  | no  |
/// | **S**     | yes | no  | yes | no  | yes | no  |
/// | **SIX**   | yes | no  | no  | no  | no  | no  |
/// | **U**     | yes | no  | yes | no  | no  | no  |
/// | **X**     | no  | no  | no  | no  | no  | no  |
///
/// Group mode:
///
/// | Requested | IS  | IX  |  S  | SIX |  U  |  X  |
/// |:---------:|:---:|:---:|:---:|:---:|:---:|:---:|
/// | **IS**    | IS  | IX  |  S  | SIX |  U  |  X  |
/// | **IX**    | IX  | IX  | SIX | SIX |  X  |  X  |
/// | **S**     |  S  | SIX |  S  | SIX |  U  |  X  |
/// | **SIX**   | SIX | SIX | SIX | SIX | SIX |  X  |
/// | **U**     |  U  |  X  |  U  | SIX |  U  |  X  |
/// | **X**     |  X  |  X  |  X  |  X  |  X  |  X  |
///
/// [`Shared`]: Extended::Shared
/// [`Exclusive`]: Extended::Exclusive
/// [`Update`]: Extended::Update
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Extended {
    /// Intention shared (IS): shared locks will be taken at a finer level.
    IntentionShared,
    /// Intention exclusive (IX): exclusive locks will be taken at a finer level.
    IntentionExclusive,
    /// Shared (S).
    Shared,
    /// Shared with intention exclusive (SIX): the whole resource is read, and
    /// parts of it will be locked exclusively.
    SharedIntentionExclusive,
    /// Update (U): read now, possibly convert to exclusive later.
    Update,
    /// Exclusive (X).
    Exclusive,
}

impl LockMode for Extended {
    const COUNT: usize = 6;

    #[inline]
    fn index(self) -> usize {
        self as usize
    }
}

impl Extended {
    /// Returns the default compatibility matrix for this mode set.
    pub fn compatibility_matrix() -> CompatibilityMatrix<Self> {
        CompatibilityMatrix::from_table([
            /* requested  IS     IX     S      SIX    U      X    */
            /* IS  */ [true, true, true, true, true, false],
            /* IX  */ [true, true, false, false, false, false],
            /* S   */ [true, false, true, false, true, false],
            /* SIX */ [true, false, false, false, false, false],
            /* U   */ [true, false, true, false, false, false],
            /* X   */ [false, false, false, false, false, false],
        ])
    }

    /// Returns the default group mode matrix for this mode set.
    pub fn group_mode_matrix() -> GroupModeMatrix<Self> {
        use Extended::{
            Exclusive as X, IntentionExclusive as IX, IntentionShared as IS, Shared as S,
            SharedIntentionExclusive as SIX, Update as U,
        };

        GroupModeMatrix::from_table([
            /* requested  IS   IX   S    SIX  U    X  */
            /* IS  */ [IS, IX, S, SIX, U, X],
            /* IX  */ [IX, IX, SIX, SIX, X, X],
            /* S   */ [S, SIX, S, SIX, U, X],
            /* SIX */ [SIX, SIX, SIX, SIX, SIX, X],
            /* U   */ [U, X, U, SIX, U, X],
            /* X   */ [X, X, X, X, X, X],
        ])
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::Extended::{self, *};

    const ALL: [Extended; 6] = [
        IntentionShared,
        IntentionExclusive,
        Shared,
        SharedIntentionExclusive,
        Update,
        Exclusive,
    ];

    #[test]
    fn compatibility_is_symmetric() {
        let matrix = Extended::compatibility_matrix();
        for a in ALL {
            for b in ALL {
                assert_eq!(
                    matrix.compatible(a, Some(b)),
                    matrix.compatible(b, Some(a)),
                    "{a:?} vs {b:?}"
                );
            }
        }
    }

    #[test]
    fn exclusive_is_compatible_with_nothing() {
        let matrix = Extended::compatibility_matrix();
        for mode in ALL {
            assert!(!matrix.compatible(Exclusive, Some(mode)));
            assert!(!matrix.compatible(mode, Some(Exclusive)));
        }
        assert!(matrix.compatible(Exclusive, None));
    }

    #[test]
    fn group_mode_never_weakens_exclusive() {
        let matrix = Extended::group_mode_matrix();
        for mode in ALL {
            assert_eq!(matrix.convert(mode, Some(Exclusive)), Exclusive);
            assert_eq!(matrix.convert(Exclusive, Some(mode)), Exclusive);
        }
    }

    #[test]
    fn group_mode_of_mixed_intents() {
        let matrix = Extended::group_mode_matrix();
        assert_eq!(matrix.convert(Shared, Some(IntentionExclusive)), SharedIntentionExclusive);
        assert_eq!(matrix.convert(IntentionExclusive, Some(Shared)), SharedIntentionExclusive);
        assert_eq!(matrix.convert(IntentionShared, Some(Update)), Update);
        assert_eq!(matrix.convert(Update, None), Update);
    }
}
