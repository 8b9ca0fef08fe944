//! # cmt Configuration
//!
//! Compile-time constants governing the scheduler and the demo firmware.
//! All limits are fixed at compile time — no dynamic allocation.

/// Unit of delay. One tick is whatever period the integrator calls
/// `Cmt::advance_ticks` with; the reference system uses milliseconds.
pub type Ticks = u16;

/// Default task table capacity of a `Cmt`, **including** the boot task
/// (slot 0, the context that first calls `yield_for`). A table of this
/// size accepts `MAX_TASKS - 1` registrations.
pub const MAX_TASKS: usize = 4;

/// Tick frequency in Hz. At 1 kHz a tick is a millisecond, so
/// `yield_for(10)` sleeps for at least 10 ms.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Stack size of each demo task, in 64-bit words. The switch routine
/// needs 40 bytes (104 with the FPU registers) on top of the task's
/// deepest call chain and any interrupt frame that lands on it.
pub const STACK_WORDS: usize = 128;
