//! # Task Control Block
//!
//! Defines the task model for cmt. A task is an endless loop that gives up
//! the CPU only by calling `yield_for`. Its scheduling state is a single
//! delay counter: zero means ready, anything else means sleeping.
//!
//! The saved execution context is not kept here; it belongs to the
//! architecture port and lives next to the table in [`Cmt`](crate::Cmt).

use crate::config::Ticks;

// ---------------------------------------------------------------------------
// Task identity
// ---------------------------------------------------------------------------

/// Index of a task in its scheduler's table. Slot 0 is the boot task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u8);

impl TaskId {
    /// The context that created the scheduler and first called `yield_for`.
    pub const BOOT: TaskId = TaskId(0);

    pub const fn new(index: u8) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

// ---------------------------------------------------------------------------
// Dispatch state
// ---------------------------------------------------------------------------

/// How the scheduler gets back into a task.
///
/// ```text
///   ┌────────────────────┐  first dispatch  ┌─────────┐
///   │ NotStarted(entry)  │ ───────────────► │ Running │
///   └────────────────────┘                  └─────────┘
///                                 yield_for   │     ▲
///                                             ▼     │ resume
///                                          ┌───────────┐
///                                          │ Suspended │
///                                          └───────────┘
/// ```
///
/// The entry point is consumed by the first dispatch, so a task that has
/// run is never started again and a fresh task is never "resumed" from a
/// context it never saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch<E> {
    /// Registered but never run; begins at the entry point.
    NotStarted(E),
    /// Currently executing. Its saved context is stale.
    Running,
    /// Parked in `yield_for`; continues from its saved context.
    Suspended,
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Per-task scheduling record.
#[derive(Debug, Clone, Copy)]
pub struct TaskControlBlock<E> {
    /// Ticks until this task becomes ready. Zero means ready to run.
    pub delay: Ticks,

    /// Lowest stack pointer sampled by the tick while this task was current.
    /// `usize::MAX` until the first sample.
    pub min_stack_pointer: usize,

    /// One-shot entry point or resume marker.
    pub dispatch: Dispatch<E>,
}

impl<E> TaskControlBlock<E> {
    /// Record of the boot task: already running, nothing to start.
    pub const BOOT: Self = Self {
        delay: 0,
        min_stack_pointer: usize::MAX,
        dispatch: Dispatch::Running,
    };

    /// Record of a freshly registered task: ready, waiting for its first dispatch.
    pub const fn new(entry: E) -> Self {
        Self {
            delay: 0,
            min_stack_pointer: usize::MAX,
            dispatch: Dispatch::NotStarted(entry),
        }
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.delay == 0
    }

    /// Count `elapsed` ticks off the delay, clamping at zero.
    #[inline]
    pub fn advance(&mut self, elapsed: Ticks) {
        self.delay = self.delay.saturating_sub(elapsed);
    }

    /// Lower the stack watermark to `sp` if it is below the current one.
    #[inline]
    pub fn observe_stack_pointer(&mut self, sp: usize) {
        if sp < self.min_stack_pointer {
            self.min_stack_pointer = sp;
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
