//! # Synchronization Primitives
//!
//! Interrupt-safe critical sections and the advisory task mutex.
//!
//! The task table is shared between the foreground (tasks calling
//! `yield_for`) and the tick interrupt, so every access to it goes through
//! [`critical_section()`]. The implementation comes from the `critical-section`
//! crate: `cortex-m`'s single-core implementation on the target, the `std`
//! implementation on a development machine.

use core::cell::Cell;

use crate::task::TaskId;

pub use critical_section::CriticalSection;

/// Execute a closure within a critical section (interrupts disabled).
///
/// Keep these short: `yield_for` relies on the tick interrupt getting in
/// between them while it waits for a task to become ready.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}

// ---------------------------------------------------------------------------
// Advisory mutex
// ---------------------------------------------------------------------------

/// Ownership record of a [`Mutex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexState {
    /// Holder of the mutex. Meaningless while `count` is zero.
    pub owner: TaskId,
    /// Re-entrant hold count.
    pub count: u8,
}

impl MutexState {
    pub const FREE: Self = Self {
        owner: TaskId::BOOT,
        count: 0,
    };

    #[inline]
    pub fn is_free(&self) -> bool {
        self.count == 0
    }

    /// Take the mutex for `task` if it is free or already `task`'s.
    ///
    /// Fails when another task holds it, and when one more hold would
    /// overflow the count.
    pub fn try_acquire(&mut self, task: TaskId) -> bool {
        if self.count != 0 && self.owner != task {
            return false;
        }
        match self.count.checked_add(1) {
            Some(count) => {
                self.owner = task;
                self.count = count;
                true
            }
            None => false,
        }
    }

    /// Drop one hold. Anything but the owner releasing a held mutex is a no-op.
    pub fn release(&mut self, task: TaskId) {
        if self.owner == task && self.count > 0 {
            self.count -= 1;
        }
    }
}

/// Advisory, owner-re-entrant lock between cmt tasks.
///
/// Nothing stops a task from touching the protected resource without
/// taking the lock; cooperating tasks check it. Acquire and release go
/// through the scheduler, which knows the calling task:
/// [`Cmt::try_acquire`](crate::Cmt::try_acquire),
/// [`Cmt::acquire`](crate::Cmt::acquire),
/// [`Cmt::release`](crate::Cmt::release).
///
/// ```ignore
/// static UART_LOCK: cmt::Mutex = cmt::Mutex::new();
///
/// fn reporter(cmt: &'static Cmt<CortexM4>) -> ! {
///     loop {
///         cmt.acquire(&UART_LOCK);
///         write_report();
///         cmt.release(&UART_LOCK);
///         cmt.yield_for(1000);
///     }
/// }
/// ```
pub struct Mutex {
    state: critical_section::Mutex<Cell<MutexState>>,
}

impl Mutex {
    /// Create a free mutex.
    pub const fn new() -> Self {
        Self {
            state: critical_section::Mutex::new(Cell::new(MutexState::FREE)),
        }
    }

    /// Snapshot of the current owner and hold count.
    pub fn state(&self) -> MutexState {
        critical_section(|cs| self.state.borrow(cs).get())
    }

    pub(crate) fn try_acquire_as(&self, task: TaskId) -> bool {
        self.update(|state| state.try_acquire(task))
    }

    pub(crate) fn release_as(&self, task: TaskId) {
        self.update(|state| state.release(task))
    }

    fn update<R>(&self, f: impl FnOnce(&mut MutexState) -> R) -> R {
        critical_section(|cs| {
            let cell = self.state.borrow(cs);
            let mut state = cell.get();
            let result = f(&mut state);
            cell.set(state);
            result
        })
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const A: TaskId = TaskId::new(1);
    const B: TaskId = TaskId::new(2);

    #[test]
    fn test_free_mutex_is_taken() {
        let mut m = MutexState::FREE;
        assert!(m.try_acquire(A));
        assert_eq!(m, MutexState { owner: A, count: 1 });
    }

    #[test]
    fn test_owner_reenters_and_releases_as_often() {
        let mut m = MutexState::FREE;
        for n in 1..=5 {
            assert!(m.try_acquire(A));
            assert_eq!(m.count, n);
        }
        for _ in 0..4 {
            m.release(A);
            assert!(!m.try_acquire(B));
        }
        m.release(A);
        assert!(m.is_free());
        assert!(m.try_acquire(B));
        assert_eq!(m.owner, B);
    }

    #[test]
    fn test_other_task_is_refused_without_side_effects() {
        let mut m = MutexState::FREE;
        assert!(m.try_acquire(A));
        let before = m;
        assert!(!m.try_acquire(B));
        assert_eq!(m, before);
    }

    #[test]
    fn test_non_owner_release_is_noop() {
        let mut m = MutexState::FREE;
        m.try_acquire(A);
        m.try_acquire(A);
        let before = m;
        m.release(B);
        assert_eq!(m, before);
    }

    #[test]
    fn test_release_of_free_mutex_is_noop() {
        let mut m = MutexState::FREE;
        m.release(TaskId::BOOT);
        assert_eq!(m, MutexState::FREE);
    }

    #[test]
    fn test_hold_count_does_not_wrap() {
        let mut m = MutexState { owner: A, count: u8::MAX };
        assert!(!m.try_acquire(A));
        assert_eq!(m.count, u8::MAX);
    }

    #[test]
    fn test_shared_mutex_roundtrip() {
        let m = Mutex::new();
        assert!(m.try_acquire_as(A));
        assert!(!m.try_acquire_as(B));
        m.release_as(B);
        assert_eq!(m.state(), MutexState { owner: A, count: 1 });
        m.release_as(A);
        assert!(m.state().is_free());
    }
}
