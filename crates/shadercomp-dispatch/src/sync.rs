use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// A shared mutable cell guarded by some locking discipline.
///
/// Critical sections are expressed as closures so a lock can never be held
/// across a compile call or file I/O by construction. Sections must not be
/// re-entered on the same lock: the mutex impl would deadlock and the
/// single-threaded impl panics on the nested borrow.
pub trait SharedLock<T> {
    fn new(value: T) -> Self;
    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R;
}

/// Real mutex, for the multi-threaded dispatcher.
#[derive(Debug, Default)]
pub struct MutexLock<T>(Mutex<T>);

impl<T> SharedLock<T> for MutexLock<T> {
    fn new(value: T) -> Self {
        MutexLock(Mutex::new(value))
    }

    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// Zero-cost stand-in for single-threaded runs. `RefCell` is `!Sync`, so a
/// dispatcher instantiated over it cannot accidentally be shared across
/// threads.
#[derive(Debug, Default)]
pub struct LocalLock<T>(RefCell<T>);

impl<T> SharedLock<T> for LocalLock<T> {
    fn new(value: T) -> Self {
        LocalLock(RefCell::new(value))
    }

    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.0.borrow_mut())
    }
}

/// Selects the locking discipline for a whole pipeline instantiation.
///
/// The dispatcher and build context are generic over this, so the
/// single-threaded build contains no atomic lock operations at all rather
/// than branching per critical section.
pub trait LockKind {
    type Lock<T>: SharedLock<T>;
}

/// Mutex-backed locks; use with a worker pool.
#[derive(Debug)]
pub enum Threaded {}

impl LockKind for Threaded {
    type Lock<T> = MutexLock<T>;
}

/// Borrow-backed locks; everything runs on the calling thread.
#[derive(Debug)]
pub enum SingleThread {}

impl LockKind for SingleThread {
    type Lock<T> = LocalLock<T>;
}

/// Cooperative cancellation flag, shared between workers, the driving thread
/// and the Ctrl-C handler.
///
/// Workers poll it between combo acquisitions and drain their current combo
/// before exiting.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> StopSignal {
        StopSignal::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise<L: SharedLock<u64>>() {
        let lock = L::new(1);
        lock.with(|v| *v += 41);
        assert_eq!(lock.with(|v| *v), 42);
    }

    #[test]
    fn both_lock_kinds_share_semantics() {
        exercise::<<Threaded as LockKind>::Lock<u64>>();
        exercise::<<SingleThread as LockKind>::Lock<u64>>();
    }

    #[test]
    fn stop_signal_is_sticky_and_shared() {
        let signal = StopSignal::new();
        let clone = signal.clone();
        assert!(!signal.is_stopped());
        clone.stop();
        assert!(signal.is_stopped());
    }
}
