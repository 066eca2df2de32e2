//! Sinks for human-readable progress text.
//!
//! Handlers that want to tell the user something go through a [`Report`]
//! instead of printing directly, so drivers can choose where text ends up and
//! tests can capture it.

use std::sync::{Arc, Mutex};

use crate::lock;

/// Destination for progress text.
pub trait Report: Send + Sync {
    fn report(&self, text: &str);
}

/// Writes each report as a line on stdout.
#[derive(Clone, Copy, Debug, Default)]
pub struct Console;

impl Report for Console {
    fn report(&self, text: &str) {
        println!("{text}");
    }
}

/// Forwards reports to `tracing` at info level.
#[derive(Clone, Copy, Debug, Default)]
pub struct Log;

impl Report for Log {
    fn report(&self, text: &str) {
        tracing::info!(target: "tether::report", "{text}");
    }
}

/// Keeps every report in memory.
///
/// Clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct Recorder {
    lines: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything reported so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }

    /// Removes and returns everything reported so far.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *lock(&self.lines))
    }
}

impl Report for Recorder {
    fn report(&self, text: &str) {
        lock(&self.lines).push(text.to_string());
    }
}

impl<R: Report + ?Sized> Report for Arc<R> {
    fn report(&self, text: &str) {
        (**self).report(text);
    }
}

impl<R: Report + ?Sized> Report for &R {
    fn report(&self, text: &str) {
        (**self).report(text);
    }
}
