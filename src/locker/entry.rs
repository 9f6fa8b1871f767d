use crate::cfg::sync::{Mutex, MutexGuard};
use crate::locker::queue::RequestQueue;
use crate::locker::request::Request;
use crate::matrix::GroupModeMatrix;
use crate::mode::LockMode;
use crate::requester::Requester;

/// The lock state of a single resource.
///
/// The mutex protects the group mode and the three queues, and is the mutex
/// every request's condition variable waits on.
pub struct Entry<M> {
    state: Mutex<EntryState<M>>,
}

impl<M: LockMode> Entry<M> {
    /// Creates an entry held by a single granted request.
    pub fn granted(request: Request<M>) -> Self {
        let mut state = EntryState::new();
        state.group_mode = Some(request.mode);
        state.granted.add(request);
        Self { state: Mutex::new(state) }
    }

    pub fn lock(&self) -> MutexGuard<'_, EntryState<M>> {
        self.state.lock()
    }
}

/// The queues and group mode of a resource.
///
/// - `granted` holds the requests that currently hold the lock.
/// - `converting` holds requests from granted requesters asking for a
///   different mode. They are serviced before any waiting request.
/// - `waiting` holds requests from requesters that hold nothing yet.
///
/// `group_mode` is `None` exactly when `granted` is empty, except transiently
/// inside an unlock before the group is recomputed.
#[derive(Debug)]
pub struct EntryState<M> {
    pub group_mode: Option<M>,
    pub granted: RequestQueue<M>,
    pub converting: RequestQueue<M>,
    pub waiting: RequestQueue<M>,
}

impl<M: LockMode> EntryState<M> {
    fn new() -> Self {
        Self {
            group_mode: None,
            granted: RequestQueue::new(),
            converting: RequestQueue::new(),
            waiting: RequestQueue::new(),
        }
    }

    /// Returns `true` once no request of any kind is left.
    pub fn is_empty(&self) -> bool {
        self.granted.is_empty() && self.converting.is_empty() && self.waiting.is_empty()
    }

    /// Returns the mode `requester` currently holds, if any.
    pub fn held_mode(&self, requester: Requester) -> Option<M> {
        self.granted.find(requester).map(|request| request.mode)
    }

    /// Returns `true` if `requester` has a request blocked on this resource.
    pub fn is_pending(&self, requester: Requester) -> bool {
        self.converting.find(requester).is_some() || self.waiting.find(requester).is_some()
    }

    /// Returns the group mode of every granted request except the one held by
    /// `requester`.
    pub fn group_mode_excluding(&self, requester: Requester, groups: &GroupModeMatrix<M>) -> Option<M> {
        let others = self.granted.iter().filter(|request| request.requester != requester);
        groups.fold(others.map(|request| request.mode))
    }

    /// Recomputes the group mode from the granted requests, in queue order.
    pub fn regroup(&mut self, groups: &GroupModeMatrix<M>) {
        self.group_mode = groups.fold(self.granted.iter().map(|request| request.mode));
    }

    /// Moves the granted request of `requester` to `mode`, counting the
    /// conversion as one more hold, and recomputes the group mode.
    ///
    /// Returns `false` if `requester` holds nothing here.
    pub fn convert(&mut self, requester: Requester, mode: M, groups: &GroupModeMatrix<M>) -> bool {
        let Some(held) = self.granted.find_mut(requester) else { return false };
        held.mode = mode;
        held.count += 1;
        self.regroup(groups);
        true
    }

    /// Appends an already admitted request to the granted group.
    pub fn grant(&mut self, request: Request<M>, groups: &GroupModeMatrix<M>) {
        self.group_mode = Some(groups.convert(request.mode, self.group_mode));
        self.granted.add(request);
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::Entry;
    use crate::locker::request::Request;
    use crate::mode::Extended::{self, *};
    use crate::requester::Requester;

    #[test]
    fn new_entry_is_held_in_the_request_mode() {
        let requester = Requester::new();
        let entry = Entry::granted(Request::granted(requester, Update));
        let state = entry.lock();
        assert_eq!(state.group_mode, Some(Update));
        assert_eq!(state.held_mode(requester), Some(Update));
        assert!(!state.is_empty());
    }

    #[test]
    fn group_mode_excluding_ignores_the_requester() {
        let groups = Extended::group_mode_matrix();
        let (a, b) = (Requester::new(), Requester::new());
        let entry = Entry::granted(Request::granted(a, Update));
        let mut state = entry.lock();
        state.grant(Request::granted(b, IntentionShared), &groups);

        assert_eq!(state.group_mode, Some(Update));
        assert_eq!(state.group_mode_excluding(a, &groups), Some(IntentionShared));
        assert_eq!(state.group_mode_excluding(b, &groups), Some(Update));
        assert_eq!(state.group_mode_excluding(Requester::new(), &groups), Some(Update));
    }

    #[test]
    fn convert_counts_one_more_hold() {
        let groups = Extended::group_mode_matrix();
        let requester = Requester::new();
        let entry = Entry::granted(Request::granted(requester, Shared));
        let mut state = entry.lock();

        assert!(state.convert(requester, Exclusive, &groups));
        assert_eq!(state.group_mode, Some(Exclusive));
        assert_eq!(state.granted.find(requester).unwrap().count, 2);
        assert!(!state.convert(Requester::new(), Exclusive, &groups));
    }

    #[test]
    fn downgrade_recomputes_the_group() {
        let groups = Extended::group_mode_matrix();
        let requester = Requester::new();
        let entry = Entry::granted(Request::granted(requester, Exclusive));
        let mut state = entry.lock();

        assert!(state.convert(requester, IntentionShared, &groups));
        assert_eq!(state.group_mode, Some(IntentionShared));
    }

    #[test]
    fn pending_requests_are_tracked_per_requester() {
        use std::sync::Arc;

        use crate::locker::request::Signal;

        let (a, b) = (Requester::new(), Requester::new());
        let entry = Entry::granted(Request::granted(a, Shared));
        let mut state = entry.lock();
        state.waiting.add(Request::new(b, Exclusive, Arc::new(Signal::new())));

        assert!(state.is_pending(b));
        assert!(!state.is_pending(a));
    }
}
