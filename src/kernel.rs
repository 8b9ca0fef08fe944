//! # Kernel
//!
//! The public scheduler object, [`Cmt`]. It owns the task table, the saved
//! contexts, the architecture port and the watchdog, and it is the only
//! thing tasks and the tick source talk to. There is no global instance:
//! firmware puts one in a `static`, tests leak one per test.
//!
//! ## Startup Sequence
//!
//! ```text
//! main()                                 ← boot task, slot 0
//!   ├─► static CMT: Cmt<..> = Cmt::new(port, watchdog)
//!   ├─► CMT.register_task(entry, stack)  ← ×(N-1), before the tick runs
//!   ├─► configure the tick source        ← calls CMT.advance_ticks()
//!   └─► loop { …; CMT.yield_for(d) }     ← main is now just another task
//! ```

use core::cell::{RefCell, UnsafeCell};

use crate::arch::{Entry, Port};
use crate::config::{Ticks, MAX_TASKS};
use crate::error::Error;
use crate::scheduler::{self, TaskTable};
use crate::sync::{self, Mutex};
use crate::task::TaskId;
use crate::watchdog::{NoWatchdog, Watchdog};

/// Body of a task. It gets its scheduler and never returns.
pub type TaskFn<P, W, const N: usize> = fn(&'static Cmt<P, W, N>) -> !;

/// Cooperative "on-delay" multitasking scheduler with room for `N` tasks,
/// the boot task included.
pub struct Cmt<P: Port, W: Watchdog = NoWatchdog, const N: usize = MAX_TASKS> {
    port: P,
    watchdog: W,

    /// Shared with the tick interrupt; only touched inside critical sections.
    table: critical_section::Mutex<RefCell<TaskTable<TaskFn<P, W, N>, N>>>,

    /// Saved contexts, indexed like the table. Only the foreground switch
    /// path touches these, and only the running task's and its successor's.
    contexts: [UnsafeCell<P::Context>; N],
}

// Safety: `table` is guarded by critical sections. A context is written
// only by `register_task` (before its task exists) or by the port while
// its owner is suspended, and exactly one task runs at a time.
unsafe impl<P: Port, W: Watchdog, const N: usize> Sync for Cmt<P, W, N> {}

impl<P: Port, W: Watchdog, const N: usize> Cmt<P, W, N> {
    /// Create a scheduler whose only task is the caller (the boot task).
    pub const fn new(port: P, watchdog: W) -> Self {
        Self {
            port,
            watchdog,
            table: critical_section::Mutex::new(RefCell::new(TaskTable::new())),
            contexts: [const { UnsafeCell::new(P::INITIAL_CONTEXT) }; N],
        }
    }

    /// Register a task. It is ready at once and starts at `entry` on
    /// `stack` the first time the scheduler picks it.
    ///
    /// Call before the tick source is running.
    ///
    /// # Returns
    /// - `Ok(task_id)`: the slot of the new task
    /// - `Err(Error::TaskTableFull)`: `N` tasks exist already; nothing changed
    pub fn register_task(&self, entry: TaskFn<P, W, N>, stack: P::Stack) -> Result<TaskId, Error> {
        let result = sync::critical_section(|cs| {
            let id = self.table.borrow_ref_mut(cs).register(entry)?;
            let context = self.port.prepare(id, stack);
            // Safety: the slot was vacant, nothing else refers to its context.
            unsafe { *self.contexts[id.index()].get() = context };
            Ok(id)
        });

        match result {
            Ok(id) => log::debug!("registered task {}", id.index()),
            Err(err) => log::warn!("cannot register task: {err}"),
        }
        result
    }

    /// Sleep for at least `delay` ticks, letting other tasks run meanwhile.
    ///
    /// This is the only place a task switch happens. `yield_for(0)` gives
    /// every other ready task one turn before the caller continues; if no
    /// other task is ready it returns immediately. The actual delay is a
    /// lower bound: a task is only resumed once the tasks ahead of it yield.
    ///
    /// If no task ever becomes ready this spins forever, feeding the
    /// watchdog. Must not be called with interrupts disabled.
    pub fn yield_for(&'static self, delay: Ticks) {
        let (from, count) = sync::critical_section(|cs| {
            let mut table = self.table.borrow_ref_mut(cs);
            (table.suspend_current(delay), table.task_count())
        });

        let next = scheduler::next_ready(
            from,
            count,
            || self.watchdog.feed(),
            |i| self.delay_of(i) == Some(0),
        );

        // A tick landing between this and the switch charges the outgoing
        // stack pointer to `next`'s watermark.
        let entry = sync::critical_section(|cs| self.table.borrow_ref_mut(cs).dispatch(next));
        if next == from {
            return;
        }

        let start = entry.map(|entry| {
            log::trace!("starting task {next}");
            Entry {
                func: trampoline::<P, W, N>,
                arg0: self as *const Self as usize,
                arg1: entry as usize,
            }
        });

        // Safety: `from` and `next` differ, both are registered slots, and
        // `from` is the task executing this call.
        unsafe {
            self.port
                .switch(self.contexts[from].get(), self.contexts[next].get(), start)
        };
    }

    /// Called by the periodic tick source, usually a timer interrupt.
    ///
    /// Counts `elapsed` ticks off every task's delay (never below zero) and
    /// samples the stack pointer into the current task's watermark.
    pub fn advance_ticks(&self, elapsed: Ticks) {
        let sp = self.port.stack_pointer();
        sync::critical_section(|cs| self.table.borrow_ref_mut(cs).advance_ticks(elapsed, sp));
    }

    /// Lowest stack pointer seen by the tick while `task` was running.
    ///
    /// An approximation for sizing stacks: it is only sampled at tick
    /// instants. `0` if `task` is not in the table, `usize::MAX` if no
    /// tick has landed in the task yet.
    pub fn min_stack_pointer(&self, task: TaskId) -> usize {
        sync::critical_section(|cs| self.table.borrow_ref(cs).min_stack_pointer(task.index()))
    }

    /// Remaining delay of `task`, `None` if it is not in the table.
    pub fn remaining_delay(&self, task: TaskId) -> Option<Ticks> {
        self.delay_of(task.index())
    }

    /// The task that is running.
    pub fn current_task(&self) -> TaskId {
        sync::critical_section(|cs| TaskId::new(self.table.borrow_ref(cs).current() as u8))
    }

    /// Number of tasks in the table, boot task included.
    pub fn task_count(&self) -> usize {
        sync::critical_section(|cs| self.table.borrow_ref(cs).task_count())
    }

    /// The architecture port this scheduler switches with.
    pub fn port(&self) -> &P {
        &self.port
    }

    // -----------------------------------------------------------------------
    // Mutex API
    // -----------------------------------------------------------------------

    /// Take `mutex` for the current task if it is free or already ours.
    /// Never blocks.
    ///
    /// The hold count is a `u8`: a 256th nested hold is refused (returns
    /// `false`) instead of wrapping to a free mutex.
    pub fn try_acquire(&self, mutex: &Mutex) -> bool {
        mutex.try_acquire_as(self.current_task())
    }

    /// Take `mutex`, yielding with zero delay until it is free.
    pub fn acquire(&'static self, mutex: &Mutex) {
        while !self.try_acquire(mutex) {
            self.yield_for(0);
        }
    }

    /// Drop one hold of `mutex`. A no-op unless the current task holds it.
    pub fn release(&self, mutex: &Mutex) {
        mutex.release_as(self.current_task());
    }

    fn delay_of(&self, index: usize) -> Option<Ticks> {
        sync::critical_section(|cs| self.table.borrow_ref(cs).delay(index))
    }
}

/// First function on a new task's stack.
///
/// # Safety
/// `cmt` is a `&'static Cmt<P, W, N>` and `entry` a `TaskFn<P, W, N>`,
/// both as `usize`, as packed by `Cmt::yield_for`.
unsafe extern "C-unwind" fn trampoline<P: Port, W: Watchdog, const N: usize>(cmt: usize, entry: usize) -> ! {
    let cmt = unsafe { &*(cmt as *const Cmt<P, W, N>) };
    let entry = unsafe { core::mem::transmute::<usize, TaskFn<P, W, N>>(entry) };
    entry(cmt)
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::hosted::Hosted;
    use crate::sync::MutexState;
    use crate::watchdog::FnWatchdog;
    use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering::SeqCst};
    use std::panic::AssertUnwindSafe;

    type HostCmt<const N: usize> = Cmt<Hosted, NoWatchdog, N>;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn leak<const N: usize>() -> &'static HostCmt<N> {
        init_logger();
        Box::leak(Box::new(Cmt::new(Hosted::new(), NoWatchdog)))
    }

    #[test]
    fn test_register_until_full() {
        fn idle(cmt: &'static HostCmt<3>) -> ! {
            loop {
                cmt.yield_for(0);
            }
        }

        let cmt = leak::<3>();
        assert_eq!(cmt.task_count(), 1);
        assert_eq!(cmt.register_task(idle, ()), Ok(TaskId::new(1)));
        assert_eq!(cmt.task_count(), 2);
        assert_eq!(cmt.register_task(idle, ()), Ok(TaskId::new(2)));
        assert_eq!(cmt.task_count(), 3);
        assert_eq!(cmt.register_task(idle, ()), Err(Error::TaskTableFull));
        assert_eq!(cmt.task_count(), 3);
    }

    #[test]
    fn test_lone_boot_task_yield_returns() {
        let cmt = leak::<2>();
        cmt.yield_for(0);
        assert_eq!(cmt.current_task(), TaskId::BOOT);
    }

    #[test]
    fn test_two_tasks_alternate() {
        static TRACE: AtomicU32 = AtomicU32::new(0);

        fn push(digit: u32) {
            TRACE.store(TRACE.load(SeqCst) * 10 + digit, SeqCst);
        }

        fn b(cmt: &'static HostCmt<2>) -> ! {
            loop {
                push(2);
                assert_eq!(cmt.current_task(), TaskId::new(1));
                cmt.yield_for(0);
            }
        }

        let cmt = leak::<2>();
        cmt.register_task(b, ()).unwrap();

        for _ in 0..3 {
            push(1);
            cmt.yield_for(0);
            assert_eq!(cmt.current_task(), TaskId::BOOT);
        }
        assert_eq!(TRACE.load(SeqCst), 121212);
    }

    #[test]
    fn test_task_panic_surfaces_in_boot_task() {
        fn quitter(cmt: &'static HostCmt<2>) -> ! {
            cmt.yield_for(0);
            panic!("quitter gave up");
        }

        let cmt = leak::<2>();
        cmt.register_task(quitter, ()).unwrap();

        // First turn: the task starts and yields back normally
        cmt.yield_for(0);

        // Second turn: it panics, and the boot task's yield fails with it
        let payload = std::panic::catch_unwind(AssertUnwindSafe(|| cmt.yield_for(0))).unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"quitter gave up"));
    }

    #[test]
    fn test_delay_is_a_lower_bound() {
        static WOKE: AtomicUsize = AtomicUsize::new(0);

        fn sleeper(cmt: &'static HostCmt<2>) -> ! {
            loop {
                cmt.yield_for(5);
                WOKE.fetch_add(1, SeqCst);
            }
        }

        let cmt = leak::<2>();
        let sleeper_id = cmt.register_task(sleeper, ()).unwrap();

        // Let the sleeper start and go to sleep
        cmt.yield_for(0);
        assert_eq!(cmt.remaining_delay(sleeper_id), Some(5));

        for tick in 1..=4 {
            cmt.advance_ticks(1);
            cmt.yield_for(0);
            assert_eq!(WOKE.load(SeqCst), 0, "woke after {tick} ticks");
        }

        cmt.advance_ticks(1);
        assert_eq!(cmt.remaining_delay(sleeper_id), Some(0));
        // Ready now, but it only runs once the boot task yields
        assert_eq!(WOKE.load(SeqCst), 0);
        cmt.yield_for(0);
        assert_eq!(WOKE.load(SeqCst), 1);
        assert_eq!(cmt.remaining_delay(sleeper_id), Some(5));
    }

    #[test]
    fn test_always_ready_task_outruns_sleeper() {
        static T1_RUNS: AtomicUsize = AtomicUsize::new(0);
        static T2_RUNS: AtomicUsize = AtomicUsize::new(0);

        fn t1(cmt: &'static HostCmt<3>) -> ! {
            loop {
                T1_RUNS.fetch_add(1, SeqCst);
                cmt.yield_for(0);
            }
        }

        fn t2(cmt: &'static HostCmt<3>) -> ! {
            loop {
                T2_RUNS.fetch_add(1, SeqCst);
                cmt.yield_for(10);
            }
        }

        let cmt = leak::<3>();
        cmt.register_task(t1, ()).unwrap();
        cmt.register_task(t2, ()).unwrap();

        // First round: both start, T2 goes to sleep for 10 ticks
        cmt.yield_for(0);
        assert_eq!(T1_RUNS.load(SeqCst), 1);
        assert_eq!(T2_RUNS.load(SeqCst), 1);

        for tick in 1..=10 {
            cmt.advance_ticks(1);
            for _ in 0..5 {
                cmt.yield_for(0);
            }
            let expected_t2 = if tick < 10 { 1 } else { 2 };
            assert_eq!(T2_RUNS.load(SeqCst), expected_t2, "after tick {tick}");
        }

        assert!(T1_RUNS.load(SeqCst) >= 50);
        assert!(T1_RUNS.load(SeqCst) > 10 * T2_RUNS.load(SeqCst));
    }

    #[test]
    fn test_mutex_excludes_other_task() {
        static LOCK: Mutex = Mutex::new();
        static B_TRIED: AtomicUsize = AtomicUsize::new(0);
        static B_HOLDS: AtomicBool = AtomicBool::new(false);

        fn b(cmt: &'static HostCmt<2>) -> ! {
            loop {
                B_TRIED.fetch_add(1, SeqCst);
                if cmt.try_acquire(&LOCK) {
                    B_HOLDS.store(true, SeqCst);
                    loop {
                        cmt.yield_for(0);
                    }
                }
                cmt.yield_for(0);
            }
        }

        let cmt = leak::<2>();
        cmt.register_task(b, ()).unwrap();

        // Boot task takes the lock three times
        assert!(cmt.try_acquire(&LOCK));
        assert!(cmt.try_acquire(&LOCK));
        assert!(cmt.try_acquire(&LOCK));
        assert_eq!(LOCK.state(), MutexState { owner: TaskId::BOOT, count: 3 });

        for held in (1..=3).rev() {
            cmt.yield_for(0);
            assert!(!B_HOLDS.load(SeqCst), "B got the lock with count {held}");
            cmt.release(&LOCK);
        }

        cmt.yield_for(0);
        assert!(B_HOLDS.load(SeqCst));
        assert_eq!(LOCK.state(), MutexState { owner: TaskId::new(1), count: 1 });
        assert_eq!(B_TRIED.load(SeqCst), 4);

        // Boot task is now the non-owner: its release changes nothing
        let before = LOCK.state();
        cmt.release(&LOCK);
        assert_eq!(LOCK.state(), before);
        assert!(!cmt.try_acquire(&LOCK));
    }

    #[test]
    fn test_acquire_waits_for_release() {
        static LOCK: Mutex = Mutex::new();
        static B_HOLDS: AtomicBool = AtomicBool::new(false);

        fn b(cmt: &'static HostCmt<2>) -> ! {
            cmt.acquire(&LOCK);
            B_HOLDS.store(true, SeqCst);
            cmt.yield_for(0);
            cmt.release(&LOCK);
            B_HOLDS.store(false, SeqCst);
            loop {
                cmt.yield_for(0);
            }
        }

        let cmt = leak::<2>();
        cmt.register_task(b, ()).unwrap();

        // B grabs the lock on its first turn
        cmt.yield_for(0);
        assert!(B_HOLDS.load(SeqCst));

        // Blocks (yielding) until B has released it
        cmt.acquire(&LOCK);
        assert!(!B_HOLDS.load(SeqCst));
        assert_eq!(LOCK.state(), MutexState { owner: TaskId::BOOT, count: 1 });
    }

    #[test]
    fn test_watchdog_fed_while_scanning() {
        static FEEDS: AtomicUsize = AtomicUsize::new(0);

        fn feed() {
            FEEDS.fetch_add(1, SeqCst);
        }

        fn sleeper(cmt: &'static Cmt<Hosted, FnWatchdog<fn()>, 3>) -> ! {
            loop {
                cmt.yield_for(100);
            }
        }

        init_logger();
        let cmt: &'static Cmt<Hosted, FnWatchdog<fn()>, 3> =
            Box::leak(Box::new(Cmt::new(Hosted::new(), FnWatchdog(feed as fn()))));
        cmt.register_task(sleeper, ()).unwrap();
        cmt.register_task(sleeper, ()).unwrap();

        // 0 → 1 (start, sleeps) → 2 (start, sleeps) → probes 0: 3 feeds in all
        cmt.yield_for(0);
        assert_eq!(FEEDS.load(SeqCst), 3);

        // Both asleep: probes 1, 2, 0
        cmt.yield_for(0);
        assert_eq!(FEEDS.load(SeqCst), 6);
    }

    #[test]
    fn test_stack_watermark_per_task() {
        static SEEN: AtomicUsize = AtomicUsize::new(0);

        fn ticker(cmt: &'static HostCmt<2>) -> ! {
            loop {
                cmt.advance_ticks(1);
                SEEN.store(cmt.port().stack_pointer(), SeqCst);
                cmt.yield_for(0);
            }
        }

        let cmt = leak::<2>();
        let id = cmt.register_task(ticker, ()).unwrap();
        assert_eq!(cmt.min_stack_pointer(id), usize::MAX);
        assert_eq!(cmt.min_stack_pointer(TaskId::new(7)), 0);

        cmt.yield_for(0);
        let sp = cmt.min_stack_pointer(id);
        assert_ne!(sp, usize::MAX);
        assert!(sp.abs_diff(SEEN.load(SeqCst)) < 64 * 1024);
        // The boot task never ticked
        assert_eq!(cmt.min_stack_pointer(TaskId::BOOT), usize::MAX);
    }
}
