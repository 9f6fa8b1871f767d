//! A hierarchical lock manager for multi-granularity locking.
//!
//! A [`Locker`] grants named resources to requesters in lock modes. Which modes
//! may be held together on the same resource, and which mode a group of
//! holders amounts to, is defined by two matrices supplied by the user:
//!
//! - a [`CompatibilityMatrix`], answering whether a requested mode can be
//!   granted next to the current group mode of a resource;
//! - a [`GroupModeMatrix`], giving the group mode a resource ends up with
//!   once a requested mode joins the current group.
//!
//! Keeping the mode semantics outside of the locker makes it suitable for
//! intention locking over resource hierarchies (database, table, page, row)
//! as used by database engines, where a requester announces its intent on the
//! coarse levels before locking the finer ones. The [`mode`] module ships the
//! classic six mode intention set and a plain shared/exclusive set, and also
//! documents how to define your own.
//!
//! The main properties of the locker are:
//!
//! - locks are re-entrant per [`Requester`], and a requester may convert its
//!   held lock to another mode at any time;
//! - waiting requests are granted in FIFO order, and a request that cannot be
//!   granted blocks every request behind it;
//! - pending conversions are always served before new requesters;
//! - a blocked request can give up after a deadline expressed as a
//!   [`WaitTime`];
//! - a released resource leaves no trace in the locker.
//!
//! Requesters default to the calling thread, see [`Requester::current`]. The
//! `*_as` methods of [`Locker`] take an explicit requester instead, for callers
//! that track units of work (transactions, sessions) apart from threads.
//!
//! ## Logging
//!
//! The locker emits [`tracing`] events: grants and releases at the `TRACE`
//! level, and blocking, conversions, promotions, time outs and denials at the
//! `DEBUG` level. Install any subscriber to collect them.
//!
//! ## Deadlocks
//!
//! There is no deadlock detection. Callers that may lock resources in
//! conflicting orders, or that may convert locks shared with other
//! requesters, should bound their waits with a deadline.
//!
//! # Examples
//!
//! ```
//! use hierlock::mode::Extended::{self, Exclusive, IntentionShared, Shared};
//! use hierlock::{LockResult, Locker, Requester, WaitTime};
//!
//! let locker = Locker::new(Extended::compatibility_matrix(), Extended::group_mode_matrix());
//!
//! // A reader scans the table, a writer updates a row of it.
//! let (reader, writer) = (Requester::new(), Requester::new());
//! assert_eq!(locker.lock_as(reader, "db/t", Shared, WaitTime::FOREVER), LockResult::Granted);
//! assert_eq!(locker.lock_as(writer, "db/t", IntentionShared, WaitTime::FOREVER), LockResult::Granted);
//!
//! // Upgrading the reader's lock cannot happen while the writer is in.
//! let outcome = locker.lock_as(reader, "db/t", Exclusive, WaitTime::now());
//! assert_eq!(outcome, LockResult::Timeout);
//!
//! assert!(locker.unlock_as(writer, "db/t"));
//! assert_eq!(locker.lock_as(reader, "db/t", Exclusive, WaitTime::now()), LockResult::Granted);
//!
//! // One unlock per granted lock call, conversions included.
//! assert!(locker.unlock_as(reader, "db/t"));
//! assert!(locker.unlock_as(reader, "db/t"));
//! assert!(locker.is_empty());
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

mod cfg;
mod locker;
mod matrix;
mod requester;
mod wait;

pub mod mode;

pub use locker::{LockResult, LockStatus, Locker};
pub use matrix::{CompatibilityMatrix, GroupModeMatrix, MatrixError};
pub use mode::LockMode;
pub use requester::Requester;
pub use wait::WaitTime;

#[cfg(all(loom, test))]
mod loom;

#[cfg(all(not(loom), test))]
mod test;
