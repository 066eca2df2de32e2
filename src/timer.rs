//! One-shot and periodic timers.
//!
//! A [`Timer`] runs its callback on a dedicated thread, after a delay and then
//! optionally at a fixed interval, until it is cancelled. Cancellation is
//! cooperative and idempotent:
//!
//! - [`Timer::cancel`], [`Cancellation::cancel`] and [`TimerContext::cancel`]
//!   (from inside the callback) all stop the timer;
//! - once `cancel` has returned, no firing passes the cancellation check.
//!   A firing that passed it just before may still run its callback;
//! - dropping the owning [`Timer`] cancels it. Use [`Timer::detach`] for a
//!   timer that should outlive the scope that created it.
//!
//! A sleeping timer thread is woken up by cancellation, so cancelled timers
//! release their thread promptly.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Condvar, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crate::{cell::WeakRef, lock, pool};

struct TimerShared {
    cancelled: Mutex<bool>,
    wake: Condvar,
    fired: AtomicU64,
}

impl TimerShared {
    fn cancel(&self) -> bool {
        let mut cancelled = lock(&self.cancelled);
        let first = !*cancelled;
        *cancelled = true;
        drop(cancelled);
        self.wake.notify_all();
        first
    }

    fn is_cancelled(&self) -> bool {
        *lock(&self.cancelled)
    }

    // Sleeps until `due`. Returns `false` if the timer got cancelled first.
    // The final check happens under the lock `cancel` takes, so once `cancel`
    // returns no firing passes this point. One that passed just before it
    // still runs.
    fn sleep_until(&self, due: Instant) -> bool {
        let mut cancelled = lock(&self.cancelled);
        loop {
            if *cancelled {
                return false;
            }
            let now = Instant::now();
            if now >= due {
                return true;
            }
            cancelled = self
                .wake
                .wait_timeout(cancelled, due - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Clonable handle that can stop a timer.
#[derive(Clone)]
pub struct Cancellation {
    shared: Arc<TimerShared>,
}

impl Cancellation {
    /// Cancels the timer. Calling it again has no effect.
    pub fn cancel(&self) {
        if self.shared.cancel() {
            tracing::debug!("Timer cancelled");
        }
    }

    /// Returns `true` if cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Number of times the callback has been invoked so far.
    #[must_use]
    pub fn fire_count(&self) -> u64 {
        self.shared.fired.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Cancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancellation")
            .field("cancelled", &self.is_cancelled())
            .field("fired", &self.fire_count())
            .finish()
    }
}

/// View of the timer handed to its callback.
pub struct TimerContext {
    cancellation: Cancellation,
    firing: u64,
}

impl TimerContext {
    /// Stops the timer from within its own callback.
    ///
    /// The current invocation runs to completion; no further one starts.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// One-based index of the current invocation.
    #[must_use]
    pub fn firing(&self) -> u64 {
        self.firing
    }
}

/// Owning handle to a running timer.
///
/// Dropping it cancels the timer.
pub struct Timer {
    cancellation: Cancellation,
    interval: Duration,
    periodic: bool,
    cancel_on_drop: bool,
}

impl Timer {
    /// Runs `callback` after `interval`, then every `interval` if `periodic`.
    pub fn schedule(
        interval: Duration,
        callback: impl FnMut(&TimerContext) + Send + 'static,
        periodic: bool,
    ) -> Self {
        let shared = Arc::new(TimerShared {
            cancelled: Mutex::new(false),
            wake: Condvar::new(),
            fired: AtomicU64::new(0),
        });
        let cancellation = Cancellation {
            shared: Arc::clone(&shared),
        };

        let worker = cancellation.clone();
        let spawned = thread::Builder::new()
            .name(pool::thread_name("timer"))
            .spawn(move || run(worker, interval, periodic, callback));
        match spawned {
            Ok(_) => tracing::debug!(?interval, periodic, "Timer started"),
            Err(e) => {
                tracing::error!(%e, "Failed to spawn timer thread");
                shared.cancel();
            }
        }

        Self {
            cancellation,
            interval,
            periodic,
            cancel_on_drop: true,
        }
    }

    /// Runs `callback` every `interval` until cancelled.
    pub fn periodic(interval: Duration, callback: impl FnMut(&TimerContext) + Send + 'static) -> Self {
        Self::schedule(interval, callback, true)
    }

    /// Runs `callback` once after `delay`.
    pub fn once(delay: Duration, callback: impl FnOnce(&TimerContext) + Send + 'static) -> Self {
        let mut callback = Some(callback);
        Self::schedule(
            delay,
            move |cx| {
                if let Some(callback) = callback.take() {
                    callback(cx);
                }
            },
            false,
        )
    }

    /// Runs `method` on `target` for as long as it is alive.
    ///
    /// The timer only holds a weak reference. The first firing that finds the
    /// target destroyed cancels the timer without calling `method`.
    pub fn schedule_weak<T>(
        interval: Duration,
        target: &WeakRef<T>,
        mut method: impl FnMut(&T, &TimerContext) + Send + 'static,
        periodic: bool,
    ) -> Self
    where
        T: Send + Sync + 'static,
    {
        let target = target.clone();
        Self::schedule(
            interval,
            move |cx| match target.resolve() {
                Some(this) => method(&*this, cx),
                None => {
                    tracing::debug!(referent = %target.id(), "Timer target expired");
                    cx.cancel();
                }
            },
            periodic,
        )
    }

    /// Cancels the timer. Calling it again has no effect.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Number of times the callback has been invoked so far.
    #[must_use]
    pub fn fire_count(&self) -> u64 {
        self.cancellation.fire_count()
    }

    /// Returns a handle that can cancel this timer from elsewhere.
    #[must_use]
    pub fn cancellation(&self) -> Cancellation {
        self.cancellation.clone()
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub fn is_periodic(&self) -> bool {
        self.periodic
    }

    /// Releases ownership without cancelling.
    ///
    /// The timer keeps running until cancelled through the returned handle
    /// or from within its callback.
    pub fn detach(mut self) -> Cancellation {
        self.cancel_on_drop = false;
        self.cancellation.clone()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if self.cancel_on_drop {
            self.cancellation.cancel();
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("interval", &self.interval)
            .field("periodic", &self.periodic)
            .field("cancelled", &self.is_cancelled())
            .field("fired", &self.fire_count())
            .finish()
    }
}

fn run(
    cancellation: Cancellation,
    interval: Duration,
    periodic: bool,
    mut callback: impl FnMut(&TimerContext),
) {
    let shared = Arc::clone(&cancellation.shared);
    let Some(mut due) = Instant::now().checked_add(interval) else {
        tracing::warn!(?interval, "Timer interval out of range, cancelling timer");
        shared.cancel();
        return;
    };
    while shared.sleep_until(due) {
        let firing = shared.fired.fetch_add(1, Ordering::AcqRel) + 1;
        let cx = TimerContext {
            cancellation: cancellation.clone(),
            firing,
        };
        if panic::catch_unwind(AssertUnwindSafe(|| callback(&cx))).is_err() {
            tracing::error!(firing, "Timer callback panicked, cancelling timer");
            shared.cancel();
            break;
        }
        if !periodic {
            shared.cancel();
            break;
        }
        // Missed ticks are skipped rather than fired in a burst.
        let now = Instant::now();
        let next = due
            .checked_add(interval)
            .filter(|next| *next >= now)
            .or_else(|| now.checked_add(interval));
        match next {
            Some(next) => due = next,
            None => {
                tracing::warn!(?interval, "Timer interval out of range, cancelling timer");
                shared.cancel();
                break;
            }
        }
    }
    tracing::trace!("Timer thread exiting");
}
