//! Lifetime-safe asynchronous callbacks, events and timers.
//!
//! `tether` provides small primitives for code that starts work now and hears
//! back later, when the object that asked for the work may already be gone.
//!
//! Features include:
//! - [`Strong`] and [`WeakRef`] handles, so a callback can check at the moment
//!   it fires whether its owner is still alive
//! - An [`Operation`] running blocking work on a worker pool, with progress
//!   reporting, exactly-once completion, cooperative cancellation, and both
//!   blocking and `.await`-able result retrieval
//! - An [`EventChannel`] delivering values to plain, weakly bound or strongly
//!   bound subscribers, in subscription order
//! - A [`Timer`] for one-shot and periodic callbacks that can cancel themselves
//! - A [`CompletionGate`] that lets a caller park until an asynchronous chain
//!   is done, with an optional timeout
//!
//! All components are independent of any async runtime.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod cell;
pub mod config;
pub mod error;
pub mod event;
pub mod gate;
pub mod operation;
pub mod pool;
pub mod report;
pub mod timer;

pub use cell::{CellId, Strong, WeakRef};
pub use config::Config;
pub use error::{ConfigError, GateError, OperationError};
pub use event::{EventChannel, Subscription, SubscriptionId};
pub use gate::{CompletionGate, Wait};
pub use operation::{Operation, OperationHandle, Outcome, Progress, Status};
pub use report::Report;
pub use timer::{Cancellation, Timer, TimerContext};

// Handlers run outside of every lock, but a panic elsewhere must not wedge
// the shared state for everyone else.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
