//! # Scheduler
//!
//! Core scheduling logic for cmt: the task table, the tick countdown and
//! the round-robin choice of the next ready task. Nothing in here switches
//! stacks; [`Cmt`](crate::Cmt) combines this state with an architecture
//! port to do that.
//!
//! ## Scheduling Algorithm
//!
//! On `yield_for(d)` from task `c`:
//! 1. **Suspend**: store `d` as `c`'s delay, mark it `Suspended`
//! 2. **Scan**: look at `c+1, c+2, …` (wrapping) until a task with a zero
//!    delay turns up, feeding the watchdog once per probe
//! 3. **Dispatch**: make it current; start it if it never ran, else resume
//!
//! A zero delay therefore means "let every other ready task run once",
//! and with a single ready task the scan comes straight back to the caller.
//!
//! On every tick the table counts the elapsed ticks off every delay,
//! clamping at zero, and lowers the current task's stack watermark.

use crate::config::Ticks;
use crate::error::Error;
use crate::task::{Dispatch, TaskControlBlock, TaskId};

// ---------------------------------------------------------------------------
// Task table
// ---------------------------------------------------------------------------

/// Fixed-capacity table of task records.
///
/// `E` is the entry point type handed back on a task's first dispatch.
/// Slot 0 always holds the boot task, so `N` must be at least 1.
pub struct TaskTable<E, const N: usize> {
    tasks: [TaskControlBlock<E>; N],

    /// Number of occupied slots, boot task included.
    count: usize,

    /// Slot of the task that owns the CPU.
    current: usize,
}

impl<E: Copy, const N: usize> TaskTable<E, N> {
    /// Create a table that only contains the (running) boot task.
    pub const fn new() -> Self {
        assert!(N >= 1 && N <= 256, "task table capacity must be 1..=256");
        Self {
            tasks: [const { TaskControlBlock::<E>::BOOT }; N],
            count: 1,
            current: 0,
        }
    }

    /// Append a ready, not-yet-started task.
    ///
    /// # Returns
    /// - `Ok(task_id)`: the slot of the new task
    /// - `Err(Error::TaskTableFull)`: all `N` slots are taken; the table is unchanged
    pub fn register(&mut self, entry: E) -> Result<TaskId, Error> {
        if self.count >= N {
            return Err(Error::TaskTableFull);
        }

        let id = TaskId::new(self.count as u8);
        self.tasks[self.count] = TaskControlBlock::new(entry);
        self.count += 1;
        Ok(id)
    }

    /// Called from the tick source.
    ///
    /// `sp` is the stack pointer of the interrupted context, which is
    /// charged to the current task's watermark.
    pub fn advance_ticks(&mut self, elapsed: Ticks, sp: usize) {
        self.tasks[self.current].observe_stack_pointer(sp);

        for task in &mut self.tasks[..self.count] {
            task.advance(elapsed);
        }
    }

    /// Park the current task for `delay` ticks. Returns its slot.
    pub fn suspend_current(&mut self, delay: Ticks) -> usize {
        let current = &mut self.tasks[self.current];
        current.delay = delay;
        current.dispatch = Dispatch::Suspended;
        self.current
    }

    /// Hand the CPU to `next`.
    ///
    /// Returns the entry point if `next` has never run; it is taken out of
    /// the table so no later dispatch can start the task again. `None`
    /// means `next` resumes from its saved context.
    pub fn dispatch(&mut self, next: usize) -> Option<E> {
        debug_assert!(next < self.count);
        self.current = next;
        match core::mem::replace(&mut self.tasks[next].dispatch, Dispatch::Running) {
            Dispatch::NotStarted(entry) => Some(entry),
            Dispatch::Suspended | Dispatch::Running => None,
        }
    }

    /// Remaining delay of slot `index`, or `None` for a vacant slot.
    #[inline]
    pub fn delay(&self, index: usize) -> Option<Ticks> {
        self.tasks[..self.count].get(index).map(|t| t.delay)
    }

    /// Watermark of slot `index`; `0` for a vacant slot.
    pub fn min_stack_pointer(&self, index: usize) -> usize {
        self.tasks[..self.count]
            .get(index)
            .map_or(0, |t| t.min_stack_pointer)
    }

    #[inline]
    pub fn current(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn task_count(&self) -> usize {
        self.count
    }

    pub fn task(&self, index: usize) -> Option<&TaskControlBlock<E>> {
        self.tasks[..self.count].get(index)
    }
}

impl<E: Copy, const N: usize> Default for TaskTable<E, N> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Round-robin scan
// ---------------------------------------------------------------------------

/// Find the next ready slot after `current`, wrapping around `count`.
///
/// `feed` runs once per probe, before the probe. `is_ready` is asked about
/// one slot at a time so the caller can read each delay in its own short
/// critical section and let the tick interrupt in between. If nothing is
/// ever ready this does not return.
pub fn next_ready(
    current: usize,
    count: usize,
    mut feed: impl FnMut(),
    mut is_ready: impl FnMut(usize) -> bool,
) -> usize {
    let mut i = current;
    loop {
        feed();
        i = (i + 1) % count;
        if is_ready(i) {
            return i;
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
