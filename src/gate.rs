//! A resettable one-shot signal carrying a result.
//!
//! A [`CompletionGate`] lets a caller park until an asynchronous chain reports
//! that it is done, instead of spinning on a shared flag. The chain calls
//! [`signal`](CompletionGate::signal) exactly once per cycle; waiters wake up
//! with the stored value, and later waiters get it immediately until the gate
//! is [`reset`](CompletionGate::reset) for a new cycle.

use std::{
    fmt,
    sync::{Condvar, Mutex, PoisonError},
    time::{Duration, Instant},
};

use crate::{error::GateError, lock};

/// Result of a bounded wait.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub enum Wait<T> {
    /// The gate was signalled with this value.
    Ready(T),
    /// The timeout expired first.
    TimedOut,
}

impl<T> Wait<T> {
    /// Converts into an `Option`, discarding the timeout case.
    pub fn ready(self) -> Option<T> {
        match self {
            Wait::Ready(value) => Some(value),
            Wait::TimedOut => None,
        }
    }

    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Wait::TimedOut)
    }
}

/// Single-slot signal with result storage.
pub struct CompletionGate<T> {
    slot: Mutex<Option<T>>,
    signalled: Condvar,
}

impl<T> CompletionGate<T> {
    /// Creates an unsignalled gate.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            signalled: Condvar::new(),
        }
    }

    /// Stores `value` and wakes every waiter.
    ///
    /// Signalling an already signalled gate is a contract violation: it means
    /// the chain completed twice. The stored value is kept and the new one is
    /// rejected.
    pub fn signal(&self, value: T) -> Result<(), GateError> {
        let mut slot = lock(&self.slot);
        if slot.is_some() {
            tracing::error!("Completion gate signalled twice without reset");
            return Err(GateError::AlreadySignalled);
        }
        *slot = Some(value);
        drop(slot);
        self.signalled.notify_all();
        Ok(())
    }

    /// Returns `true` if the gate holds a value.
    #[must_use]
    pub fn is_signalled(&self) -> bool {
        lock(&self.slot).is_some()
    }

    /// Clears the gate for a new cycle, returning the previous value.
    pub fn reset(&self) -> Option<T> {
        lock(&self.slot).take()
    }
}

impl<T: Clone> CompletionGate<T> {
    /// Blocks until the gate is signalled and returns the stored value.
    pub fn wait(&self) -> T {
        let mut slot = lock(&self.slot);
        loop {
            if let Some(value) = slot.as_ref() {
                return value.clone();
            }
            slot = self
                .signalled
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Blocks until the gate is signalled or `timeout` elapses.
    ///
    /// A zero timeout polls the gate without blocking.
    pub fn wait_timeout(&self, timeout: Duration) -> Wait<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut slot = lock(&self.slot);
        loop {
            if let Some(value) = slot.as_ref() {
                return Wait::Ready(value.clone());
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                // Too far in the future to represent.
                None => Duration::MAX,
            };
            if remaining.is_zero() {
                return Wait::TimedOut;
            }
            slot = self
                .signalled
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Returns the stored value without blocking.
    #[must_use]
    pub fn try_get(&self) -> Option<T> {
        lock(&self.slot).clone()
    }
}

impl<T> Default for CompletionGate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for CompletionGate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionGate")
            .field("signalled", &self.is_signalled())
            .finish()
    }
}
