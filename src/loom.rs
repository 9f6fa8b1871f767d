//! Loom backed stand-ins for the `parking_lot` primitives used by the engine.
//!
//! Loom only models the `std` shaped API, where a condition variable wait
//! consumes the guard and hands it back. The engine is written against the
//! `parking_lot` shape, where a wait borrows the guard mutably, so these
//! wrappers adapt one to the other. Loom has no notion of wall clock time:
//! a deadline wait is modeled as an untimed wait that never reports a timeout,
//! therefore models must not depend on timeouts firing.

use core::ops::{Deref, DerefMut};
use std::time::Instant;

/// A Loom mutex exposing the `parking_lot` locking API.
pub struct Mutex<T>(loom::sync::Mutex<T>);

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self(loom::sync::Mutex::new(value))
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        MutexGuard(Some(self.0.lock().unwrap()))
    }
}

/// A guard that can lend its inner Loom guard to a [`Condvar`] wait.
pub struct MutexGuard<'a, T>(Option<loom::sync::MutexGuard<'a, T>>);

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.0.as_deref().unwrap()
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.0.as_deref_mut().unwrap()
    }
}

/// The result of a [`Condvar::wait_until`] call.
pub struct WaitTimeoutResult(bool);

impl WaitTimeoutResult {
    pub fn timed_out(&self) -> bool {
        self.0
    }
}

/// A Loom condition variable exposing the `parking_lot` waiting API.
pub struct Condvar(loom::sync::Condvar);

impl Condvar {
    pub fn new() -> Self {
        Self(loom::sync::Condvar::new())
    }

    pub fn wait<T>(&self, guard: &mut MutexGuard<'_, T>) {
        let inner = guard.0.take().unwrap();
        guard.0 = Some(self.0.wait(inner).unwrap());
    }

    pub fn wait_until<T>(&self, guard: &mut MutexGuard<'_, T>, _: Instant) -> WaitTimeoutResult {
        self.wait(guard);
        WaitTimeoutResult(false)
    }

    pub fn notify_one(&self) -> bool {
        self.0.notify_one();
        true
    }
}
