//! Lock modes and the predefined mode sets shipped with this crate.
//!
//! The engine knows nothing about what a mode *means*. Every relationship
//! between modes comes from a [`CompatibilityMatrix`] and a
//! [`GroupModeMatrix`] indexed by [`LockMode::index`]. Any small, fieldless
//! enum can be a mode set:
//!
//! ```
//! use hierlock::LockMode;
//!
//! #[derive(Clone, Copy, Debug, PartialEq, Eq)]
//! enum Access {
//!     Read,
//!     Write,
//! }
//!
//! impl LockMode for Access {
//!     const COUNT: usize = 2;
//!
//!     fn index(self) -> usize {
//!         self as usize
//!     }
//! }
//! ```
//!
//! [`CompatibilityMatrix`]: crate::CompatibilityMatrix
//! [`GroupModeMatrix`]: crate::GroupModeMatrix

use core::fmt::Debug;

mod extended;
mod shared_exclusive;

pub use extended::Extended;
pub use shared_exclusive::SharedExclusive;

/// A mode in which a resource can be locked.
///
/// Implementors declare how many distinct modes exist and map each of them to
/// a dense ordinal. Matrices are validated against [`COUNT`] when they are
/// built, so the engine never indexes outside of them.
///
/// # Contract
///
/// `index` must return a value strictly lower than `COUNT`, and distinct modes
/// must map to distinct indices.
///
/// [`COUNT`]: LockMode::COUNT
pub trait LockMode: Copy + Eq + Debug + Send + Sync + 'static {
    /// The number of distinct modes in this mode set.
    const COUNT: usize;

    /// Returns the ordinal of this mode, in the range `0..Self::COUNT`.
    fn index(self) -> usize;
}
