//! # cmt — Cooperative "on-delay" multitasking
//!
//! A tiny scheduler for microcontrollers that turns the cycles a program
//! would burn in delay loops into time for other tasks.
//!
//! ## Overview
//!
//! 1. Register tasks with [`Cmt::register_task`]; each is an endless loop.
//! 2. Call [`Cmt::advance_ticks`] from a periodic timer interrupt.
//! 3. Inside a task, call [`Cmt::yield_for`]`(d)` wherever it would have
//!    busy-waited: other tasks run, and the caller continues after at
//!    least `d` ticks.
//!
//! Switching is purely cooperative: a task keeps the CPU until it yields.
//! A requested delay is therefore a lower bound; if other tasks spend 10
//! ticks before yielding, a 5 tick delay lasts 10. `yield_for(0)` switches
//! without sleeping.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                    │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │   register_task() · yield_for() · advance_ticks()      │
//! │   try_acquire() · acquire() · release()                │
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Scheduler   │   Watchdog         │  Sync Primitives  │
//! │  scheduler.rs│   watchdog.rs      │  sync.rs          │
//! │  ─ table     │   ─ feed()         │  ─ critical_section│
//! │  ─ scan      │                    │  ─ Mutex          │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │              Task Model (task.rs)                       │
//! │         TaskControlBlock · Dispatch · TaskId            │
//! ├────────────────────────────────────────────────────────┤
//! │     Arch Port (arch/cortex_m4.rs, arch/hosted.rs)       │
//! │         Context switch · stack pointer · SysTick        │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: the scheduler is a plain value, usually a `static`
//! - **Fixed-size table**: `N` slots, slot 0 is the boot task (`main`)
//! - **Caller-provided stacks**: one per registered task
//! - **Critical sections**: `critical-section` for state shared with the tick

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod arch;
pub mod config;
pub mod error;
pub mod kernel;
pub mod scheduler;
pub mod sync;
pub mod task;
pub mod watchdog;

pub use error::Error;
pub use kernel::{Cmt, TaskFn};
pub use sync::{Mutex, MutexState};
pub use task::TaskId;
pub use watchdog::{FnWatchdog, NoWatchdog, Watchdog};
