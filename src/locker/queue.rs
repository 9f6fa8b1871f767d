use std::collections::VecDeque;

use crate::cfg::sync::Arc;
use crate::locker::request::{Request, Signal};
use crate::requester::Requester;

/// A FIFO queue of requests.
///
/// Insertion order is the fairness guarantee of the whole locker: requests
/// are always considered front to back, and the first one that cannot be
/// admitted blocks every request behind it. The queue is not synchronized on
/// its own, it is only ever touched with the owning entry's mutex held.
#[derive(Debug)]
pub struct RequestQueue<M> {
    requests: VecDeque<Request<M>>,
}

impl<M: Copy> RequestQueue<M> {
    pub const fn new() -> Self {
        Self { requests: VecDeque::new() }
    }

    /// Appends `request` to the back of the queue.
    pub fn add(&mut self, request: Request<M>) {
        self.requests.push_back(request);
    }

    /// Removes the request that `signal` belongs to, if it is queued here.
    pub fn remove(&mut self, signal: &Arc<Signal>) -> Option<Request<M>> {
        let index = self.requests.iter().position(|request| request.is(signal))?;
        self.requests.remove(index)
    }

    /// Removes the first request made by `requester`.
    pub fn remove_requester(&mut self, requester: Requester) -> Option<Request<M>> {
        let index = self.requests.iter().position(|request| request.requester == requester)?;
        self.requests.remove(index)
    }

    /// Returns the first request made by `requester`.
    pub fn find(&self, requester: Requester) -> Option<&Request<M>> {
        self.requests.iter().find(|request| request.requester == requester)
    }

    /// Returns the first request made by `requester`, mutably.
    pub fn find_mut(&mut self, requester: Requester) -> Option<&mut Request<M>> {
        self.requests.iter_mut().find(|request| request.requester == requester)
    }

    /// Returns the request at the front of the queue.
    pub fn front(&self) -> Option<&Request<M>> {
        self.requests.front()
    }

    /// Removes the request at the front of the queue.
    pub fn pop_front(&mut self) -> Option<Request<M>> {
        self.requests.pop_front()
    }

    /// Removes the front request if it satisfies `admit`.
    pub fn pop_front_if<F>(&mut self, admit: F) -> Option<Request<M>>
    where
        F: FnOnce(&Request<M>) -> bool,
    {
        match self.requests.front() {
            Some(front) if admit(front) => self.requests.pop_front(),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Iterates over the queue in FIFO order.
    pub fn iter(&self) -> impl Iterator<Item = &Request<M>> {
        self.requests.iter()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::Arc;

    use super::RequestQueue;
    use crate::locker::request::{Request, Signal};
    use crate::requester::Requester;

    fn queue_of(requesters: &[Requester]) -> RequestQueue<u8> {
        let mut queue = RequestQueue::new();
        for (mode, requester) in requesters.iter().enumerate() {
            queue.add(Request::granted(*requester, mode as u8));
        }
        queue
    }

    #[test]
    fn iteration_is_fifo() {
        let requesters = [Requester::new(), Requester::new(), Requester::new()];
        let queue = queue_of(&requesters);
        let order = queue.iter().map(|request| request.requester).collect::<Vec<_>>();
        assert_eq!(order, requesters);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn find_returns_first_match() {
        let (a, b) = (Requester::new(), Requester::new());
        let queue = queue_of(&[a, b, a]);
        assert_eq!(queue.find(a).map(|request| request.mode), Some(0));
        assert_eq!(queue.find(b).map(|request| request.mode), Some(1));
        assert!(queue.find(Requester::new()).is_none());
    }

    #[test]
    fn remove_by_identity() {
        let requester = Requester::new();
        let signal = Arc::new(Signal::new());
        let mut queue = queue_of(&[requester]);
        queue.add(Request::new(requester, 9, Arc::clone(&signal)));

        let removed = queue.remove(&signal).unwrap();
        assert_eq!(removed.mode, 9);
        assert_eq!(queue.len(), 1);
        // Removing twice is a no-op.
        assert!(queue.remove(&signal).is_none());
    }

    #[test]
    fn remove_requester_keeps_the_others_in_order() {
        let (a, b, c) = (Requester::new(), Requester::new(), Requester::new());
        let mut queue = queue_of(&[a, b, c]);
        assert!(queue.remove_requester(b).is_some());
        let order = queue.iter().map(|request| request.requester).collect::<Vec<_>>();
        assert_eq!(order, [a, c]);
        assert!(queue.remove_requester(b).is_none());
    }

    #[test]
    fn pop_front_if_only_takes_the_head() {
        let (a, b) = (Requester::new(), Requester::new());
        let mut queue = queue_of(&[a, b]);
        assert!(queue.pop_front_if(|request| request.requester == b).is_none());
        assert_eq!(queue.pop_front_if(|request| request.requester == a).unwrap().requester, a);
        assert_eq!(queue.front().unwrap().requester, b);
        assert!(!queue.is_empty());
    }
}
