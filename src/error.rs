//! # Errors
//!
//! The scheduler has a single fallible operation, task registration.
//! Everything else either succeeds or has a documented no-op path.

use core::fmt;

/// Error returned by [`Cmt::register_task`](crate::Cmt::register_task).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Every slot of the task table is in use. Nothing was registered.
    TaskTableFull,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TaskTableFull => f.write_str("task table is full"),
        }
    }
}

impl core::error::Error for Error {}
