//! Asynchronous operations with progress and completion notification.
//!
//! An [`Operation`] wraps a unit of blocking work. Once started it runs on the
//! shared worker pool and the caller gets an [`OperationHandle`] back
//! immediately. The work reports intermediate values through a [`Progress`]
//! reporter, and its final [`Outcome`] is delivered exactly once to the
//! completion handler.
//!
//! Every observer runs on the worker thread, never on the caller's thread
//! (except a completion handler registered after the outcome is known, which
//! is replayed right away on the registering thread). The handle can also be
//! waited on, either by blocking with [`OperationHandle::get`] or by awaiting
//! it as a future. All of these sit on top of the same completion state.
//!
//! Cancellation is cooperative: [`OperationHandle::cancel`] stops further
//! progress delivery and guarantees a [`Outcome::Cancelled`] result, but the
//! work itself keeps running until it polls [`Progress::is_cancelled`] or
//! returns.
use std::{
    convert::Infallible,
    fmt,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    sync::{
        Arc, Condvar, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll, Waker},
    time::{Duration, Instant},
};

use crate::{error::OperationError, lock, pool};

type Work<T, P, E> = Box<dyn FnOnce(&Progress<P>) -> Result<T, E> + Send>;
type ProgressHandler<P> = Arc<dyn Fn(&P) + Send + Sync>;
type CompletionHandler<T, E> = Box<dyn FnOnce(&Outcome<T, E>) + Send>;

/// Lifecycle state of an operation.
///
/// Possible transitions:
///
/// - Created -> Running / Cancelled / Abandoned
/// - Running -> Completed / Failed / Cancelled / Abandoned
///
/// The last four are final: once reached, the status never changes again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    /// Started but not yet picked up by a worker.
    Created,
    /// The work is executing.
    Running,
    /// The work returned a value.
    Completed,
    /// The work returned an error.
    Failed,
    /// Cancellation was requested before the operation finished.
    Cancelled,
    /// The work panicked or never got to run.
    Abandoned,
}

impl Status {
    /// Returns `true` for statuses that won't change anymore.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        !matches!(self, Status::Created | Status::Running)
    }
}

/// The terminal notification of an operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T, E> {
    Completed(T),
    Failed(E),
    Cancelled,
    Abandoned,
}

impl<T, E> Outcome<T, E> {
    /// The final status matching this outcome.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Outcome::Completed(_) => Status::Completed,
            Outcome::Failed(_) => Status::Failed,
            Outcome::Cancelled => Status::Cancelled,
            Outcome::Abandoned => Status::Abandoned,
        }
    }

    /// Borrows the success value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Completed(value) => Some(value),
            _ => None,
        }
    }
}

impl<T: Clone, E: Clone> Outcome<T, E> {
    /// Copies this outcome into a `Result`.
    pub fn to_result(&self) -> Result<T, OperationError<E>> {
        match self {
            Outcome::Completed(value) => Ok(value.clone()),
            Outcome::Failed(e) => Err(OperationError::Failed(e.clone())),
            Outcome::Cancelled => Err(OperationError::Cancelled),
            Outcome::Abandoned => Err(OperationError::Abandoned),
        }
    }
}

struct State<T, P, E> {
    status: Status,
    outcome: Option<Arc<Outcome<T, E>>>,
    progress: Vec<ProgressHandler<P>>,
    completion: Option<CompletionHandler<T, E>>,
    wakers: Vec<Waker>,
}

// Shared between the handle(s), the progress reporter and the worker job.
struct Shared<T, P, E> {
    state: Mutex<State<T, P, E>>,
    done: Condvar,
    cancelled: AtomicBool,
}

impl<T, P, E> Shared<T, P, E> {
    fn new() -> Self {
        Self {
            state: Mutex::new(State {
                status: Status::Created,
                outcome: None,
                progress: Vec::new(),
                completion: None,
                wakers: Vec::new(),
            }),
            done: Condvar::new(),
            cancelled: AtomicBool::new(false),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    // Moves to `Running` unless the operation was cancelled while queued.
    fn begin(&self) -> bool {
        let mut state = lock(&self.state);
        if self.is_cancelled() || state.outcome.is_some() {
            return false;
        }
        state.status = Status::Running;
        true
    }

    // Records the outcome and notifies every waiter. Only the first call
    // has any effect.
    fn finish(&self, outcome: Outcome<T, E>) -> bool {
        let (outcome, handler, wakers) = {
            let mut state = lock(&self.state);
            if state.outcome.is_some() {
                return false;
            }
            let outcome = Arc::new(outcome);
            state.status = outcome.status();
            state.outcome = Some(Arc::clone(&outcome));
            state.progress.clear();
            (outcome, state.completion.take(), std::mem::take(&mut state.wakers))
        };
        tracing::trace!(status = ?outcome.status(), "Operation finished");
        self.done.notify_all();
        for waker in wakers {
            waker.wake();
        }
        if let Some(handler) = handler {
            run_completion(handler, &outcome);
        }
        true
    }
}

fn run_completion<T, E>(handler: CompletionHandler<T, E>, outcome: &Outcome<T, E>) {
    if panic::catch_unwind(AssertUnwindSafe(|| handler(outcome))).is_err() {
        tracing::error!("Completion handler panicked");
    }
}

// Settles the operation as abandoned if the job is dropped without running.
struct FinishGuard<T, P, E> {
    shared: Arc<Shared<T, P, E>>,
}

impl<T, P, E> Drop for FinishGuard<T, P, E> {
    fn drop(&mut self) {
        self.shared.finish(Outcome::Abandoned);
    }
}

/// Reporter handed to the work to publish intermediate values.
pub struct Progress<P> {
    report: Box<dyn Fn(P) -> bool + Send + Sync>,
    cancelled: Box<dyn Fn() -> bool + Send + Sync>,
}

impl<P> Progress<P> {
    /// Delivers `value` to every progress handler, in registration order.
    ///
    /// Delivery stops as soon as cancellation is requested: a handler that is
    /// already running finishes, the remaining ones are skipped and `false`
    /// is returned.
    pub fn report(&self, value: P) -> bool {
        (self.report)(value)
    }

    /// Returns `true` once cancellation has been requested.
    ///
    /// Long-running work should check this at safe points and bail out.
    pub fn is_cancelled(&self) -> bool {
        (self.cancelled)()
    }
}

impl<P: 'static> Progress<P> {
    fn new<T, E>(shared: &Arc<Shared<T, P, E>>) -> Self
    where
        T: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        let report_shared = Arc::clone(shared);
        let cancel_shared = Arc::clone(shared);
        Self {
            report: Box::new(move |value: P| {
                let handlers = {
                    let state = lock(&report_shared.state);
                    if report_shared.is_cancelled() || state.outcome.is_some() {
                        return false;
                    }
                    state.progress.clone()
                };
                for handler in handlers {
                    if report_shared.is_cancelled() {
                        return false;
                    }
                    handler(&value);
                }
                true
            }),
            cancelled: Box::new(move || cancel_shared.is_cancelled()),
        }
    }

    /// A reporter that is not attached to any operation.
    ///
    /// Reports are discarded. Useful to call work functions directly.
    pub fn detached() -> Self {
        Self {
            report: Box::new(|_: P| true),
            cancelled: Box::new(|| false),
        }
    }
}

/// An asynchronous operation that has not been started yet.
///
/// Handlers registered here are in place before the work starts, so no
/// progress value can be missed.
pub struct Operation<T, P = (), E = Infallible> {
    work: Work<T, P, E>,
    shared: Arc<Shared<T, P, E>>,
}

impl<T, P, E> Operation<T, P, E>
where
    T: Send + Sync + 'static,
    P: 'static,
    E: Send + Sync + 'static,
{
    /// Creates an operation that will run `work` once started.
    pub fn new(work: impl FnOnce(&Progress<P>) -> Result<T, E> + Send + 'static) -> Self {
        Self {
            work: Box::new(work),
            shared: Arc::new(Shared::new()),
        }
    }

    /// Adds a progress handler.
    pub fn on_progress(self, handler: impl Fn(&P) + Send + Sync + 'static) -> Self {
        lock(&self.shared.state).progress.push(Arc::new(handler));
        self
    }

    /// Sets the completion handler, replacing any previous one.
    pub fn on_completed(self, handler: impl FnOnce(&Outcome<T, E>) + Send + 'static) -> Self {
        lock(&self.shared.state).completion = Some(Box::new(handler));
        self
    }

    /// Queues the work on the worker pool and returns immediately.
    pub fn start(self) -> OperationHandle<T, P, E> {
        let Operation { work, shared } = self;
        let handle = OperationHandle {
            shared: Arc::clone(&shared),
        };
        let guard = FinishGuard {
            shared: Arc::clone(&shared),
        };

        let job = move || execute(work, guard);
        if let Err(job) = pool::spawn(job) {
            tracing::error!("No worker pool available, abandoning operation");
            // Dropping the job drops its guard, which settles the operation.
            drop(job);
        }
        handle
    }
}

fn execute<T, P, E>(work: Work<T, P, E>, guard: FinishGuard<T, P, E>)
where
    T: Send + Sync + 'static,
    P: 'static,
    E: Send + Sync + 'static,
{
    let shared = Arc::clone(&guard.shared);
    if !shared.begin() {
        tracing::trace!("Operation cancelled before it ran");
        shared.finish(Outcome::Cancelled);
        return;
    }
    tracing::trace!("Operation running");
    let progress = Progress::new(&shared);
    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| work(&progress))) {
        _ if shared.is_cancelled() => Outcome::Cancelled,
        Ok(Ok(value)) => Outcome::Completed(value),
        Ok(Err(e)) => Outcome::Failed(e),
        Err(_) => {
            tracing::warn!("Operation work panicked");
            Outcome::Abandoned
        }
    };
    shared.finish(outcome);
}

impl<T, P, E> fmt::Debug for Operation<T, P, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation").finish_non_exhaustive()
    }
}

/// Starts `work` on the worker pool.
///
/// Shorthand for `Operation::new(work).start()`; handlers are attached to
/// the returned handle.
pub fn start<T, P, E>(
    work: impl FnOnce(&Progress<P>) -> Result<T, E> + Send + 'static,
) -> OperationHandle<T, P, E>
where
    T: Send + Sync + 'static,
    P: 'static,
    E: Send + Sync + 'static,
{
    Operation::new(work).start()
}

/// Handle to a started operation.
///
/// Handles are cheap to clone; all clones observe the same operation. The
/// operation's state is released once the work is done and the last handle
/// is dropped.
pub struct OperationHandle<T, P = (), E = Infallible> {
    shared: Arc<Shared<T, P, E>>,
}

impl<T, P, E> Clone for OperationHandle<T, P, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, P, E> OperationHandle<T, P, E> {
    /// Requests cooperative cancellation.
    ///
    /// No progress handler is called once this returns (one already running
    /// may finish), and the outcome will be
    /// [`Outcome::Cancelled`] unless the operation had already finished.
    /// Calling it again has no effect.
    pub fn cancel(&self) {
        let state = lock(&self.shared.state);
        if state.outcome.is_none() && !self.shared.cancelled.swap(true, Ordering::AcqRel) {
            tracing::debug!("Operation cancellation requested");
        }
    }

    /// Returns `true` once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Snapshot of the current status.
    #[must_use]
    pub fn status(&self) -> Status {
        lock(&self.shared.state).status
    }

    /// Returns `true` once the operation reached a final status.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        lock(&self.shared.state).outcome.is_some()
    }

    /// The outcome, if already known.
    #[must_use]
    pub fn outcome(&self) -> Option<Arc<Outcome<T, E>>> {
        lock(&self.shared.state).outcome.clone()
    }

    /// Adds a progress handler.
    ///
    /// Values reported before the handler was added are not replayed.
    pub fn set_progress_handler(&self, handler: impl Fn(&P) + Send + Sync + 'static) {
        let mut state = lock(&self.shared.state);
        if state.outcome.is_none() {
            state.progress.push(Arc::new(handler));
        }
    }

    /// Sets the completion handler, replacing any previous one.
    ///
    /// If the operation already finished, `handler` is called immediately on
    /// the current thread with the stored outcome.
    pub fn set_completion_handler(&self, handler: impl FnOnce(&Outcome<T, E>) + Send + 'static) {
        let mut state = lock(&self.shared.state);
        match state.outcome.clone() {
            Some(outcome) => {
                drop(state);
                run_completion(Box::new(handler), &outcome);
            }
            None => state.completion = Some(Box::new(handler)),
        }
    }

    /// Blocks until the operation finishes and returns its outcome.
    pub fn wait(&self) -> Arc<Outcome<T, E>> {
        let mut state = lock(&self.shared.state);
        loop {
            if let Some(outcome) = &state.outcome {
                return Arc::clone(outcome);
            }
            state = self
                .shared
                .done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Arc<Outcome<T, E>>> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.wait());
        };
        let mut state = lock(&self.shared.state);
        loop {
            if let Some(outcome) = &state.outcome {
                return Some(Arc::clone(outcome));
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            if remaining.is_zero() {
                return None;
            }
            state = self
                .shared
                .done
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

impl<T: Clone, P, E: Clone> OperationHandle<T, P, E> {
    /// Blocks until the operation finishes.
    ///
    /// Returns the success value, or the recorded failure, cancellation or
    /// abandonment as an error.
    pub fn get(&self) -> Result<T, OperationError<E>> {
        self.wait().to_result()
    }
}

impl<T: Clone, P, E: Clone> Future for OperationHandle<T, P, E> {
    type Output = Result<T, OperationError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = lock(&self.shared.state);
        if let Some(outcome) = &state.outcome {
            return Poll::Ready(outcome.to_result());
        }
        if !state.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T, P, E> fmt::Debug for OperationHandle<T, P, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("status", &self.status())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_is_single_shot() {
        let shared: Arc<Shared<u32, (), ()>> = Arc::new(Shared::new());
        assert!(shared.finish(Outcome::Completed(1)));
        assert!(!shared.finish(Outcome::Failed(())));
        let handle = OperationHandle { shared };
        assert_eq!(handle.get(), Ok(1));
        assert_eq!(handle.status(), Status::Completed);
    }

    #[test]
    fn dropped_job_is_abandoned() {
        let shared: Arc<Shared<u32, (), ()>> = Arc::new(Shared::new());
        drop(FinishGuard {
            shared: Arc::clone(&shared),
        });
        let handle = OperationHandle { shared };
        assert_eq!(handle.get(), Err(OperationError::Abandoned));
    }

    #[test]
    fn cancelled_before_pickup_skips_work() {
        let shared: Arc<Shared<u32, (), ()>> = Arc::new(Shared::new());
        let handle = OperationHandle {
            shared: Arc::clone(&shared),
        };
        let completions = Arc::new(Mutex::new(Vec::new()));
        let completions_cl = Arc::clone(&completions);
        handle.set_completion_handler(move |outcome| {
            completions_cl.lock().unwrap().push(outcome.clone());
        });
        handle.cancel();

        let ran = Arc::new(AtomicBool::new(false));
        let ran_cl = Arc::clone(&ran);
        let work: Work<u32, (), ()> = Box::new(move |_| {
            ran_cl.store(true, Ordering::SeqCst);
            Ok(1)
        });
        execute(work, FinishGuard { shared });

        assert!(!ran.load(Ordering::SeqCst), "Work should not run once cancelled");
        assert_eq!(handle.get(), Err(OperationError::Cancelled));
        assert_eq!(*completions.lock().unwrap(), vec![Outcome::Cancelled]);
    }

    #[test]
    fn detached_progress_discards() {
        let progress = Progress::<u8>::detached();
        assert!(progress.report(3));
        assert!(!progress.is_cancelled());
    }
}
