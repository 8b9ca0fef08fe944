//! # Architecture Abstraction Layer
//!
//! The scheduler needs exactly one thing from the CPU: "save where I am,
//! continue over there". A [`Port`] provides that, together with a way to
//! read the stack pointer for the watermark.
//!
//! - [`cortex_m4`]: real stack switching on ARMv7E-M
//! - [`hosted`]: one OS thread per task, for development machines and tests

#[cfg(target_arch = "arm")]
pub mod cortex_m4;

#[cfg(any(test, feature = "std"))]
pub mod hosted;

use crate::task::TaskId;

/// First code a task runs on its own stack: `func(arg0, arg1)`.
///
/// Built by the kernel for a task's first dispatch; the port only has to
/// call it once it is on the new task's stack. A panicking task unwinds
/// out of `func`, which lets the hosted port report it.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub func: unsafe extern "C-unwind" fn(usize, usize) -> !,
    pub arg0: usize,
    pub arg1: usize,
}

impl Entry {
    /// # Safety
    /// Whatever `func` requires of `arg0` and `arg1`.
    pub unsafe fn call(self) -> ! {
        unsafe { (self.func)(self.arg0, self.arg1) }
    }
}

/// Context switch primitive of a target.
///
/// # Safety
/// `switch` must really suspend the calling context and continue the other
/// one: a later `switch` naming the suspended context must return into the
/// original caller with its stack and callee-saved state intact.
pub unsafe trait Port: Sync + 'static {
    /// Saved execution context of a suspended task.
    type Context;

    /// Per-task memory handed to [`Cmt::register_task`](crate::Cmt::register_task).
    type Stack;

    /// Context of a slot before anything was saved into it.
    const INITIAL_CONTEXT: Self::Context;

    /// Prepare the context a new task will start from.
    fn prepare(&self, task: TaskId, stack: Self::Stack) -> Self::Context;

    /// Save the running context into `save`, then continue `resume`.
    ///
    /// With `start == Some(entry)`, `resume` was produced by `prepare` and
    /// has never run: call `entry` on its stack. Otherwise `resume` holds a
    /// context saved by an earlier `switch`. Returns when some later switch
    /// resumes `save`.
    ///
    /// # Safety
    /// - `save` and `resume` point to distinct, live contexts of this port
    /// - only called from task (not interrupt) context, interrupts enabled
    unsafe fn switch(
        &'static self,
        save: *mut Self::Context,
        resume: *mut Self::Context,
        start: Option<Entry>,
    );

    /// Current stack pointer, or the best approximation the port has.
    fn stack_pointer(&self) -> usize;
}
