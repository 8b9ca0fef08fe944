//! # Hosted Port
//!
//! Runs cmt on a development machine. Every task gets its own OS thread,
//! started on the task's first dispatch; a baton (the id of the task that
//! may run) decides which of them is allowed past [`Hosted::switch`]. All
//! other task threads are parked on a condition variable, so exactly one
//! task executes at any time and switches happen only where a task yields,
//! just like on the target.
//!
//! The boot task is whichever thread first calls `yield_for`. Task threads
//! never finish; they stay parked when the owning test or program ends.
//!
//! A task that panics hands the baton back to the boot task together with
//! the panic payload, and the boot task's pending `switch` resumes the
//! panic. The scheduler is unusable afterwards.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use super::{Entry, Port};
use crate::task::TaskId;

/// Thread-per-task port.
pub struct Hosted {
    baton: Mutex<Baton>,
    handoff: Condvar,
}

struct Baton {
    /// Slot of the task holding the CPU.
    running: usize,
    /// Payload of a task that panicked, waiting for the boot task.
    panic: Option<Box<dyn Any + Send>>,
}

/// A hosted task is identified by its slot; its real state lives on its thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    task: usize,
}

impl Hosted {
    pub const fn new() -> Self {
        Self {
            baton: Mutex::new(Baton {
                running: 0,
                panic: None,
            }),
            handoff: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Baton> {
        self.baton.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Park the calling thread until `task` holds the baton.
    ///
    /// For the boot task, a panic left behind by another task is resumed
    /// here instead.
    fn wait_turn(&self, task: usize) {
        let mut baton = self.lock();
        while baton.running != task {
            baton = self
                .handoff
                .wait(baton)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if task == 0 {
            if let Some(payload) = baton.panic.take() {
                drop(baton);
                panic::resume_unwind(payload);
            }
        }
    }

    fn pass_baton(&self, to: usize) {
        self.lock().running = to;
        self.handoff.notify_all();
    }

    /// Give the CPU to the boot task along with `task`'s panic payload.
    fn abandon(&self, task: usize, payload: Box<dyn Any + Send>) {
        log::error!("hosted: task {task} panicked");
        let mut baton = self.lock();
        baton.panic = Some(payload);
        baton.running = 0;
        self.handoff.notify_all();
    }
}

impl Default for Hosted {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: a thread that calls `switch` stays parked in `wait_turn` until
// the baton names its context again, and only the baton holder runs.
unsafe impl Port for Hosted {
    type Context = Context;
    type Stack = ();

    const INITIAL_CONTEXT: Context = Context { task: 0 };

    fn prepare(&self, task: TaskId, _stack: ()) -> Context {
        Context { task: task.index() }
    }

    unsafe fn switch(&'static self, save: *mut Context, resume: *mut Context, start: Option<Entry>) {
        let (from, to) = unsafe { ((*save).task, (*resume).task) };

        if let Some(entry) = start {
            log::trace!("hosted: spawning thread for task {to}");
            thread::spawn(move || {
                self.wait_turn(to);
                // Safety: the kernel built `entry` for this task's first dispatch.
                let result = panic::catch_unwind(AssertUnwindSafe(|| unsafe { entry.call() }));
                if let Err(payload) = result {
                    self.abandon(to, payload);
                }
            });
        }

        log::trace!("hosted: task {from} -> task {to}");
        self.pass_baton(to);
        self.wait_turn(from);
    }

    fn stack_pointer(&self) -> usize {
        let marker = 0u8;
        core::hint::black_box(&marker) as *const u8 as usize
    }
}
