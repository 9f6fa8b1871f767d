pub mod sync {
    pub use std::sync::{Arc, OnceLock};

    #[cfg(not(all(loom, test)))]
    pub use parking_lot::{Condvar, Mutex, MutexGuard};

    #[cfg(all(loom, test))]
    pub use crate::loom::{Condvar, Mutex, MutexGuard};
}

pub mod thread {
    #[cfg(not(all(loom, test)))]
    pub use std::thread_local;

    #[cfg(all(loom, test))]
    pub use loom::thread_local;
}
