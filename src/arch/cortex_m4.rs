//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor:
//! cooperative stack switching and SysTick configuration.
//!
//! ## Context Switch Mechanism
//!
//! Everything runs in Thread mode on the main stack pointer; a task switch
//! simply points MSP at another task's stack. Because the switch is an
//! ordinary function call, only the AAPCS callee-saved state has to be
//! preserved: the switch routine pushes it onto the outgoing stack, stores
//! SP into the outgoing context, loads SP from the incoming context and
//! pops the same frame from there.
//!
//! ```text
//! [Saved frame, top = high address]
//!   LR    (return address into Cmt::yield_for)
//!   R11 … R4
//!   R3    (padding, keeps SP 8-byte aligned)
//!   D15 … D8   (hard-float targets only)
//!                              <- Context::sp
//! ```
//!
//! A fresh task has no frame yet: on its first dispatch the routine loads
//! the top of the task's stack into SP and branches to the entry trampoline.
//!
//! Interrupts are left enabled throughout. An interrupt that lands on a
//! task's stack (the tick, peripheral ISRs) is unwound before that task
//! can yield, so the stack a switch sees is always the task's own.

use core::arch::global_asm;

use cortex_m::peripheral::syst::SystClkSource;

use super::{Entry, Port};
use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::task::TaskId;

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure the SysTick timer as the cmt tick source.
///
/// Sets up SysTick to fire at `TICK_HZ` frequency using the processor
/// clock. The firmware's `SysTick` exception handler is expected to call
/// `Cmt::advance_ticks(1)`.
///
/// Register every task before calling this.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// Context switch
// ---------------------------------------------------------------------------

/// Saved stack pointer of a suspended task, or the initial stack top of a
/// task that has not started yet.
#[repr(C)]
#[derive(Debug)]
pub struct Context {
    sp: usize,
}

/// Memory for one task's stack. 64-bit words keep it 8-byte aligned.
pub type Stack = &'static mut [u64];

/// Cooperative switching port for ARMv7E-M.
#[derive(Debug, Clone, Copy, Default)]
pub struct CortexM4;

extern "C" {
    /// Push the callee-saved frame, store SP to `*save`, load `sp`, pop.
    fn cmt_switch(save: *mut usize, sp: usize);

    /// Push the callee-saved frame, store SP to `*save`, load `sp`, then
    /// call `entry.func(entry.arg0, entry.arg1)`. Returns when `save` is
    /// resumed by `cmt_switch`.
    fn cmt_start(save: *mut usize, sp: usize, entry: *const Entry);
}

#[cfg(target_abi = "eabihf")]
global_asm!(
    ".syntax unified",
    ".section .text.cmt_switch,\"ax\",%progbits",
    ".global cmt_switch",
    ".thumb_func",
    "cmt_switch:",
    "    push {{r3-r11, lr}}",
    "    vpush {{d8-d15}}",
    "    mov r12, sp",
    "    str r12, [r0]",
    "    mov sp, r1",
    "    vpop {{d8-d15}}",
    "    pop {{r3-r11, pc}}",
    "",
    ".section .text.cmt_start,\"ax\",%progbits",
    ".global cmt_start",
    ".thumb_func",
    "cmt_start:",
    "    push {{r3-r11, lr}}",
    "    vpush {{d8-d15}}",
    "    mov r12, sp",
    "    str r12, [r0]",
    "    mov sp, r1",
    "    ldr r3, [r2]",
    "    ldr r0, [r2, #4]",
    "    ldr r1, [r2, #8]",
    "    blx r3",
    "    udf #0",
);

#[cfg(not(target_abi = "eabihf"))]
global_asm!(
    ".syntax unified",
    ".section .text.cmt_switch,\"ax\",%progbits",
    ".global cmt_switch",
    ".thumb_func",
    "cmt_switch:",
    "    push {{r3-r11, lr}}",
    "    mov r12, sp",
    "    str r12, [r0]",
    "    mov sp, r1",
    "    pop {{r3-r11, pc}}",
    "",
    ".section .text.cmt_start,\"ax\",%progbits",
    ".global cmt_start",
    ".thumb_func",
    "cmt_start:",
    "    push {{r3-r11, lr}}",
    "    mov r12, sp",
    "    str r12, [r0]",
    "    mov sp, r1",
    "    ldr r3, [r2]",
    "    ldr r0, [r2, #4]",
    "    ldr r1, [r2, #8]",
    "    blx r3",
    "    udf #0",
);

// Safety: `cmt_switch`/`cmt_start` save and restore every callee-saved
// register and resume exactly at the return address of the suspended call.
unsafe impl Port for CortexM4 {
    type Context = Context;
    type Stack = Stack;

    const INITIAL_CONTEXT: Context = Context { sp: 0 };

    fn prepare(&self, _task: TaskId, stack: Stack) -> Context {
        let top = stack.as_mut_ptr_range().end as usize;
        // Align to 8 bytes (AAPCS requirement)
        Context { sp: top & !0x07 }
    }

    unsafe fn switch(&'static self, save: *mut Context, resume: *mut Context, start: Option<Entry>) {
        // `Context` is `repr(C)` with `sp` as its only field.
        let save = save.cast::<usize>();
        let sp = unsafe { (*resume).sp };
        match start {
            // The entry is read off this stack before the routine calls it.
            Some(entry) => unsafe { cmt_start(save, sp, &entry) },
            None => unsafe { cmt_switch(save, sp) },
        }
    }

    #[inline]
    fn stack_pointer(&self) -> usize {
        cortex_m::register::msp::read() as usize
    }
}
