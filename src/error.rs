//! Error types shared across the crate.
//!
//! Expected absence is never an error here: an expired [`WeakRef`] resolves to
//! `None` and a gate wait that runs out of time yields [`Wait::TimedOut`].
//! Only real faults are represented by the types below.
//!
//! [`WeakRef`]: crate::cell::WeakRef
//! [`Wait::TimedOut`]: crate::gate::Wait::TimedOut

use std::path::PathBuf;

use thiserror::Error;

/// Failure returned when retrieving the result of an asynchronous operation.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum OperationError<E> {
    /// The work ran to completion and reported an error.
    #[error("operation failed: {0}")]
    Failed(E),

    /// The operation was cancelled before it produced a result.
    #[error("operation was cancelled")]
    Cancelled,

    /// The work panicked or was dropped before reaching a final state.
    #[error("operation was abandoned before completion")]
    Abandoned,
}

impl<E> OperationError<E> {
    /// Returns `true` if this error only reflects a cancellation request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OperationError::Cancelled)
    }
}

/// Contract violations reported by a [`CompletionGate`](crate::gate::CompletionGate).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum GateError {
    /// `signal` was called a second time without an intervening `reset`.
    #[error("completion gate signalled twice without reset")]
    AlreadySignalled,
}

/// Errors raised while loading a [`Config`](crate::config::Config).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}
