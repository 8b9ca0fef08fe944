//! # Watchdog
//!
//! `yield_for` may spin for a long time when every task is asleep. It feeds
//! the watchdog on each probe of the scan so a system that is merely
//! waiting for the next tick is not reset, while one that hangs inside a
//! task still is.

/// Something that can be fed while the scheduler looks for a ready task.
pub trait Watchdog: Sync + 'static {
    fn feed(&self);
}

/// For systems without a hardware watchdog.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoWatchdog;

impl Watchdog for NoWatchdog {
    #[inline]
    fn feed(&self) {}
}

/// Adapts a closure, e.g. one that reloads an IWDG.
///
/// ```ignore
/// static CMT: Cmt<CortexM4, FnWatchdog<fn()>> =
///     Cmt::new(CortexM4, FnWatchdog(reload_iwdg));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FnWatchdog<F>(pub F);

impl<F: Fn() + Sync + 'static> Watchdog for FnWatchdog<F> {
    #[inline]
    fn feed(&self) {
        (self.0)()
    }
}
