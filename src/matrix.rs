//! Compatibility and group mode matrices.
//!
//! Both matrices are square tables indexed by two [`LockMode`]s, the requested
//! mode selecting the row and the current group mode selecting the column.
//! They are validated once, when built, against [`LockMode::COUNT`]; after
//! that every lookup is a plain, total, in bounds index.

use core::fmt;
use core::marker::PhantomData;

use thiserror::Error;

use crate::mode::LockMode;

/// The error returned when a matrix table does not match its mode set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum MatrixError {
    /// The table does not have one row per mode.
    #[error("matrix has {found} rows, but the mode set declares {expected} modes")]
    RowCount {
        /// The number of modes declared by the mode set.
        expected: usize,
        /// The number of rows in the table.
        found: usize,
    },
    /// A row of the table does not have one column per mode.
    #[error("matrix row {row} has {found} columns, but the mode set declares {expected} modes")]
    ColumnCount {
        /// The offending row.
        row: usize,
        /// The number of modes declared by the mode set.
        expected: usize,
        /// The number of columns in that row.
        found: usize,
    },
}

/// A validated, row-major, `M::COUNT` by `M::COUNT` table.
struct Table<M, T> {
    cells: Box<[T]>,
    marker: PhantomData<fn(M) -> M>,
}

impl<M: LockMode, T: Copy> Table<M, T> {
    fn from_rows<R: AsRef<[T]>>(rows: &[R]) -> Result<Self, MatrixError> {
        let expected = M::COUNT;
        if rows.len() != expected {
            return Err(MatrixError::RowCount { expected, found: rows.len() });
        }
        let mut cells = Vec::with_capacity(expected * expected);
        for (row, columns) in rows.iter().enumerate() {
            let columns: &[T] = columns.as_ref();
            if columns.len() != expected {
                let found = columns.len();
                return Err(MatrixError::ColumnCount { row, expected, found });
            }
            cells.extend_from_slice(columns);
        }
        let cells = cells.into_boxed_slice();
        Ok(Self { cells, marker: PhantomData })
    }

    #[inline]
    fn get(&self, requested: M, current: M) -> T {
        let (row, col) = (requested.index(), current.index());
        debug_assert!(row < M::COUNT && col < M::COUNT, "mode index out of range");
        self.cells[row * M::COUNT + col]
    }
}

impl<M, T: Clone> Clone for Table<M, T> {
    fn clone(&self) -> Self {
        Self { cells: self.cells.clone(), marker: PhantomData }
    }
}

impl<M: LockMode, T: fmt::Debug> fmt::Debug for Table<M, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.cells.chunks(M::COUNT)).finish()
    }
}

/// A square matrix answering whether a requested mode can be granted while
/// some mode is currently held.
///
/// # Examples
///
/// ```
/// use hierlock::mode::SharedExclusive::{self, Exclusive, Shared};
/// use hierlock::CompatibilityMatrix;
///
/// let matrix = CompatibilityMatrix::<SharedExclusive>::new([
///     [true, false],
///     [false, false],
/// ])
/// .unwrap();
///
/// assert!(matrix.compatible(Shared, Some(Shared)));
/// assert!(!matrix.compatible(Exclusive, Some(Shared)));
/// // Nothing held, anything goes.
/// assert!(matrix.compatible(Exclusive, None));
/// ```
pub struct CompatibilityMatrix<M> {
    table: Table<M, bool>,
}

impl<M: LockMode> CompatibilityMatrix<M> {
    /// Builds a matrix from a square table literal.
    ///
    /// Returns an error if `N` differs from [`LockMode::COUNT`].
    pub fn new<const N: usize>(table: [[bool; N]; N]) -> Result<Self, MatrixError> {
        Self::from_rows(&table)
    }

    /// Builds a matrix from a slice of rows.
    ///
    /// Returns an error unless there is exactly one row per mode and each row
    /// has exactly one column per mode.
    ///
    /// # Examples
    ///
    /// ```
    /// use hierlock::mode::SharedExclusive;
    /// use hierlock::{CompatibilityMatrix, MatrixError};
    ///
    /// let rows = vec![vec![true, false], vec![false]];
    /// let err = CompatibilityMatrix::<SharedExclusive>::from_rows(&rows).unwrap_err();
    /// assert_eq!(err, MatrixError::ColumnCount { row: 1, expected: 2, found: 1 });
    /// ```
    pub fn from_rows<R: AsRef<[bool]>>(rows: &[R]) -> Result<Self, MatrixError> {
        Table::from_rows(rows).map(|table| Self { table })
    }

    /// Builds one of this crate's predefined matrices.
    ///
    /// Panics if the table does not fit the mode set, which is a bug in the
    /// mode set definition itself.
    pub(crate) fn from_table<const N: usize>(table: [[bool; N]; N]) -> Self {
        assert_eq!(N, M::COUNT, "predefined matrix does not fit its mode set");
        match Self::new(table) {
            Ok(matrix) => matrix,
            Err(err) => panic!("{err}"),
        }
    }

    /// Returns whether `requested` can be granted while `current` is held.
    ///
    /// A `None` current mode means nothing is held and is compatible with any
    /// requested mode.
    #[inline]
    pub fn compatible(&self, requested: M, current: Option<M>) -> bool {
        current.map_or(true, |current| self.table.get(requested, current))
    }
}

impl<M> Clone for CompatibilityMatrix<M> {
    fn clone(&self) -> Self {
        Self { table: self.table.clone() }
    }
}

impl<M: LockMode> fmt::Debug for CompatibilityMatrix<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompatibilityMatrix").field(&self.table).finish()
    }
}

/// A square matrix giving the combined mode of a group that holds the current
/// mode once the requested mode joins it.
///
/// # Examples
///
/// ```
/// use hierlock::mode::SharedExclusive::{self, Exclusive as X, Shared as S};
/// use hierlock::GroupModeMatrix;
///
/// let matrix = GroupModeMatrix::<SharedExclusive>::new([[S, X], [X, X]]).unwrap();
///
/// assert_eq!(matrix.convert(S, Some(S)), S);
/// assert_eq!(matrix.convert(S, Some(X)), X);
/// assert_eq!(matrix.convert(S, None), S);
/// ```
pub struct GroupModeMatrix<M> {
    table: Table<M, M>,
}

impl<M: LockMode> GroupModeMatrix<M> {
    /// Builds a matrix from a square table literal.
    ///
    /// Returns an error if `N` differs from [`LockMode::COUNT`].
    pub fn new<const N: usize>(table: [[M; N]; N]) -> Result<Self, MatrixError> {
        Self::from_rows(&table)
    }

    /// Builds a matrix from a slice of rows.
    ///
    /// Returns an error unless there is exactly one row per mode and each row
    /// has exactly one column per mode.
    pub fn from_rows<R: AsRef<[M]>>(rows: &[R]) -> Result<Self, MatrixError> {
        Table::from_rows(rows).map(|table| Self { table })
    }

    /// Builds one of this crate's predefined matrices.
    ///
    /// Panics if the table does not fit the mode set, which is a bug in the
    /// mode set definition itself.
    pub(crate) fn from_table<const N: usize>(table: [[M; N]; N]) -> Self {
        assert_eq!(N, M::COUNT, "predefined matrix does not fit its mode set");
        match Self::new(table) {
            Ok(matrix) => matrix,
            Err(err) => panic!("{err}"),
        }
    }

    /// Returns the group mode resulting from `requested` joining `current`.
    ///
    /// A `None` current mode means nothing is held, and the group mode is
    /// simply `requested`.
    #[inline]
    pub fn convert(&self, requested: M, current: Option<M>) -> M {
        current.map_or(requested, |current| self.table.get(requested, current))
    }

    /// Folds `modes` into a single group mode, `None` if `modes` is empty.
    pub(crate) fn fold<I: IntoIterator<Item = M>>(&self, modes: I) -> Option<M> {
        modes.into_iter().fold(None, |group, mode| Some(self.convert(mode, group)))
    }
}

impl<M: Clone> Clone for GroupModeMatrix<M> {
    fn clone(&self) -> Self {
        Self { table: self.table.clone() }
    }
}

impl<M: LockMode> fmt::Debug for GroupModeMatrix<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GroupModeMatrix").field(&self.table).finish()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::{CompatibilityMatrix, GroupModeMatrix, MatrixError};
    use crate::mode::SharedExclusive::{self, Exclusive as X, Shared as S};
    use crate::mode::{Extended, LockMode};

    #[test]
    fn rejects_too_few_rows() {
        let err = CompatibilityMatrix::<Extended>::new([[true, true], [true, true]]).unwrap_err();
        assert_eq!(err, MatrixError::RowCount { expected: 6, found: 2 });
    }

    #[test]
    fn rejects_ragged_rows() {
        let rows: [&[SharedExclusive]; 2] = [&[S, X], &[X, X, X]];
        let err = GroupModeMatrix::from_rows(&rows).unwrap_err();
        assert_eq!(err, MatrixError::ColumnCount { row: 1, expected: 2, found: 3 });
    }

    #[test]
    fn error_messages_name_the_mismatch() {
        let err = MatrixError::RowCount { expected: 2, found: 3 };
        assert_eq!(err.to_string(), "matrix has 3 rows, but the mode set declares 2 modes");
    }

    #[test]
    fn lookups_are_requested_by_current() {
        // Deliberately asymmetric so a transposed lookup would be caught.
        let matrix = CompatibilityMatrix::<SharedExclusive>::new([[true, true], [false, false]])
            .unwrap();
        assert!(matrix.compatible(S, Some(X)));
        assert!(!matrix.compatible(X, Some(S)));
    }

    #[test]
    fn fold_group_modes() {
        let matrix = SharedExclusive::group_mode_matrix();
        assert_eq!(matrix.fold([]), None);
        assert_eq!(matrix.fold([S, S, S]), Some(S));
        assert_eq!(matrix.fold([S, X, S]), Some(X));
    }

    #[test]
    fn predefined_matrices_fit_their_modes() {
        assert_eq!(SharedExclusive::COUNT, 2);
        let _ = SharedExclusive::compatibility_matrix();
        let _ = Extended::compatibility_matrix();
        let _ = Extended::group_mode_matrix();
    }

    #[test]
    fn debug_lists_rows() {
        let matrix = SharedExclusive::compatibility_matrix();
        assert_eq!(format!("{matrix:?}"), "CompatibilityMatrix([[true, false], [false, false]])");
    }

    #[test]
    fn clones_answer_like_their_source() {
        let groups = SharedExclusive::group_mode_matrix();
        let copy = groups.clone();
        drop(groups);
        assert_eq!(copy.convert(S, Some(S)), S);
        assert_eq!(copy.convert(S, Some(X)), X);

        let compatibility = SharedExclusive::compatibility_matrix().clone();
        assert!(compatibility.compatible(S, Some(S)));
        assert!(!compatibility.compatible(X, Some(S)));
    }
}
