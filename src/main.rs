//! # cmt Example Firmware
//!
//! Demonstrates cooperative on-delay multitasking with three tasks and the
//! boot task (`main`):
//!
//! | Task | Delay pattern | Behavior |
//! |------|---------------|----------|
//! | `main` | 500 ms | Reports stack watermarks under the report lock |
//! | `sampler_task` | 10 ms | Periodic sampling, a former delay loop |
//! | `background_task` | 0 ms | Always ready; runs whenever nobody else does |
//! | `reporter_task` | 1000 ms | Holds the report lock re-entrantly |
//!
//! Build with `cargo build --release --features rt --target thumbv7em-none-eabihf`.

#![no_std]
#![no_main]

use cortex_m_rt::{entry, exception};
use panic_halt as _;

use core::sync::atomic::{AtomicU32, Ordering};

use cmt::arch::cortex_m4::{self, CortexM4};
use cmt::config::STACK_WORDS;
use cmt::{Cmt, Mutex, NoWatchdog, TaskId};

type Scheduler = Cmt<CortexM4, NoWatchdog, 4>;

static CMT: Scheduler = Cmt::new(CortexM4, NoWatchdog);

/// Guards the (imaginary) report channel shared by `main` and `reporter_task`.
static REPORT_LOCK: Mutex = Mutex::new();

static SAMPLES: AtomicU32 = AtomicU32::new(0);
static BACKGROUND_ROUNDS: AtomicU32 = AtomicU32::new(0);
static REPORTS: AtomicU32 = AtomicU32::new(0);

// ---------------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------------

/// **Sampler** (10 ms)
///
/// Does a little work every 10 ms.
///
/// In a single-task program this would be `work(); delay_ms(10);`. The
/// delay becomes a yield, so the 10 ms go to the other tasks.
fn sampler_task(cmt: &'static Scheduler) -> ! {
    loop {
        SAMPLES.fetch_add(1, Ordering::Relaxed);
        cmt.yield_for(10);
    }
}

/// **Background** (0 ms)
///
/// Always ready, cooperates with zero-delay yields.
fn background_task(cmt: &'static Scheduler) -> ! {
    loop {
        let mut work: u32 = 0;
        for _ in 0..100 {
            work = work.wrapping_add(1);
        }
        BACKGROUND_ROUNDS.fetch_add(work / 100, Ordering::Relaxed);
        cmt.yield_for(0);
    }
}

/// **Reporter** (1000 ms)
///
/// Takes the report lock twice (nested helper) once a second.
fn reporter_task(cmt: &'static Scheduler) -> ! {
    loop {
        cmt.acquire(&REPORT_LOCK);
        report(cmt);
        cmt.release(&REPORT_LOCK);
        cmt.yield_for(1000);
    }
}

fn report(cmt: &'static Scheduler) {
    // Re-entrant: the caller already holds the lock.
    cmt.acquire(&REPORT_LOCK);
    REPORTS.fetch_add(1, Ordering::Relaxed);
    cmt.release(&REPORT_LOCK);
}

// ---------------------------------------------------------------------------
// Tick source
// ---------------------------------------------------------------------------

#[exception]
fn SysTick() {
    CMT.advance_ticks(1);
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Firmware entry point. Registers the tasks, starts the tick and becomes
/// the boot task. Does not return.
#[entry]
fn main() -> ! {
    let mut cp = cortex_m::Peripherals::take().unwrap();

    let sampler_stack = cortex_m::singleton!(: [u64; STACK_WORDS] = [0; STACK_WORDS]).unwrap();
    let background_stack = cortex_m::singleton!(: [u64; STACK_WORDS] = [0; STACK_WORDS]).unwrap();
    let reporter_stack = cortex_m::singleton!(: [u64; STACK_WORDS] = [0; STACK_WORDS]).unwrap();

    // --- Create tasks ---
    CMT.register_task(sampler_task, sampler_stack)
        .expect("Failed to create sampler_task");
    CMT.register_task(background_task, background_stack)
        .expect("Failed to create background_task");
    CMT.register_task(reporter_task, reporter_stack)
        .expect("Failed to create reporter_task");

    // Start the tick only once the table is complete
    cortex_m4::configure_systick(&mut cp.SYST);

    let mut watermarks = [0usize; 4];
    loop {
        CMT.acquire(&REPORT_LOCK);
        for (slot, watermark) in watermarks.iter_mut().enumerate() {
            *watermark = CMT.min_stack_pointer(TaskId::new(slot as u8));
        }
        CMT.release(&REPORT_LOCK);
        core::hint::black_box(&watermarks);

        CMT.yield_for(500);
    }
}
