//! Strong and weak handles to shared objects.
//!
//! A [`Strong`] handle owns its referent: the value lives as long as at least
//! one strong handle exists. A [`WeakRef`] only remembers the referent's
//! identity and must be resolved before use. Resolution either yields a new
//! strong handle, which keeps the value alive for as long as it is held, or
//! `None` once every strong handle is gone. There is no third outcome.
//!
//! This is the building block that lets callbacks decide, at the moment they
//! fire, whether the object they were registered for still exists.

use std::{
    fmt,
    ops::Deref,
    pin::Pin,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
};

use pin_project_lite::pin_project;

static NEXT_CELL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a referent.
///
/// Identities are never reused, so comparing a stored `CellId` with a live
/// one can not confuse a destroyed object with a newer one at the same address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId(u64);

impl CellId {
    fn next() -> Self {
        CellId(NEXT_CELL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Slot<T> {
    id: CellId,
    value: T,
}

/// Owning handle to a shared value.
///
/// Cloning a `Strong` adds an owner. Mutable state inside `T` needs its own
/// synchronization (a `Mutex`, atomics, ...), since strong handles may be
/// held on several threads at once.
pub struct Strong<T> {
    inner: Arc<Slot<T>>,
}

impl<T> Strong<T> {
    /// Moves `value` into a new cell and returns its first owner.
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Slot {
                id: CellId::next(),
                value,
            }),
        }
    }

    /// Returns another owning handle to the same value.
    #[must_use]
    pub fn make_strong(&self) -> Strong<T> {
        self.clone()
    }

    /// Returns a non-owning handle to the same value.
    #[must_use]
    pub fn make_weak(&self) -> WeakRef<T> {
        WeakRef {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Identity of the referent.
    #[must_use]
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// Number of strong handles currently alive.
    #[must_use]
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Returns `true` if both handles refer to the same value.
    #[must_use]
    pub fn ptr_eq(&self, other: &Strong<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for Strong<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Deref for Strong<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner.value
    }
}

impl<T> From<T> for Strong<T> {
    fn from(value: T) -> Self {
        Strong::new(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Strong<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strong")
            .field("id", &self.inner.id)
            .field("value", &self.inner.value)
            .finish()
    }
}

/// Non-owning handle to a shared value.
///
/// Holding a `WeakRef` never extends the referent's lifetime.
pub struct WeakRef<T> {
    id: CellId,
    inner: Weak<Slot<T>>,
}

impl<T> WeakRef<T> {
    /// Attempts to obtain an owning handle.
    ///
    /// Returns `None` once the referent has been destroyed. A returned handle
    /// stays valid for as long as the caller holds it.
    #[must_use]
    pub fn resolve(&self) -> Option<Strong<T>> {
        self.inner.upgrade().map(|inner| Strong { inner })
    }

    /// Returns `true` if the referent has been destroyed.
    ///
    /// A `false` answer may be stale by the time the caller acts on it; use
    /// [`resolve`](Self::resolve) to act on the referent.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.inner.strong_count() == 0
    }

    /// Identity of the referent, available even after it expired.
    #[must_use]
    pub fn id(&self) -> CellId {
        self.id
    }

    /// Runs `continuation` with the referent once `future` completes.
    ///
    /// The referent is checked every time the returned future is resumed. As
    /// soon as it is found destroyed, the inner future is dropped and the
    /// result is `None`; otherwise the continuation receives the referent
    /// together with the inner future's output.
    pub fn after<F, C, R>(&self, future: F, continuation: C) -> Guarded<T, F, C>
    where
        F: Future,
        C: FnOnce(&T, F::Output) -> R,
    {
        Guarded {
            future,
            target: self.clone(),
            continuation: Some(continuation),
        }
    }
}

impl<T> Clone for WeakRef<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRef")
            .field("id", &self.id)
            .field("expired", &self.is_expired())
            .finish()
    }
}

pin_project! {
    /// Future returned by [`WeakRef::after`].
    #[must_use = "futures do nothing unless polled or .awaited"]
    pub struct Guarded<T, F, C> {
        #[pin]
        future: F,
        target: WeakRef<T>,
        continuation: Option<C>,
    }
}

impl<T, F, C, R> Future for Guarded<T, F, C>
where
    F: Future,
    C: FnOnce(&T, F::Output) -> R,
{
    type Output = Option<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if this.continuation.is_none() {
            // Already completed.
            return Poll::Ready(None);
        }
        if this.target.is_expired() {
            this.continuation.take();
            return Poll::Ready(None);
        }
        let output = match this.future.poll(cx) {
            Poll::Ready(output) => output,
            Poll::Pending => return Poll::Pending,
        };
        let continuation = this.continuation.take();
        match (this.target.resolve(), continuation) {
            (Some(strong), Some(continuation)) => Poll::Ready(Some(continuation(&*strong, output))),
            _ => Poll::Ready(None),
        }
    }
}
