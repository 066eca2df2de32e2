//! Multi-subscriber event channels.
//!
//! An [`EventChannel`] keeps an ordered registry of subscribers and delivers
//! every published value to each of them, in subscription order. Subscribers
//! come in three flavours:
//!
//! - plain callbacks, added with [`EventChannel::subscribe`];
//! - callbacks bound to an object through a [`WeakRef`], added with
//!   [`EventChannel::subscribe_weak`]. The reference is resolved right before
//!   each delivery. If the object is gone the subscriber is skipped silently
//!   and purged from the registry;
//! - callbacks bound through a [`Strong`] handle, which keep their object
//!   alive for as long as they stay subscribed.
//!
//! Publishing takes a snapshot of the registry under its lock and delivers
//! outside of it, so handlers may subscribe, unsubscribe or publish again
//! without deadlocking. A subscriber added during a publish only sees later
//! publishes.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, Weak},
};

use crate::{
    cell::{Strong, WeakRef},
    lock,
};

type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;
// Returns `false` once the bound object has expired.
type BoundCallback<A> = Arc<dyn Fn(&A) -> bool + Send + Sync>;

/// Identifier of a subscription within one channel.
///
/// Identifiers are allocated in increasing order and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Raw numeric value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription {}", self.0)
    }
}

enum Subscriber<A> {
    Direct(Callback<A>),
    Weak(BoundCallback<A>),
}

impl<A> Clone for Subscriber<A> {
    fn clone(&self) -> Self {
        match self {
            Subscriber::Direct(cb) => Subscriber::Direct(Arc::clone(cb)),
            Subscriber::Weak(cb) => Subscriber::Weak(Arc::clone(cb)),
        }
    }
}

impl<A> Subscriber<A> {
    // Returns `false` if the subscriber is bound to an expired object.
    fn deliver(&self, args: &A) -> bool {
        match self {
            Subscriber::Direct(cb) => {
                cb(args);
                true
            }
            Subscriber::Weak(cb) => cb(args),
        }
    }
}

struct Registry<A> {
    next_id: u64,
    subscribers: BTreeMap<SubscriptionId, Subscriber<A>>,
}

impl<A> Registry<A> {
    fn insert(&mut self, subscriber: Subscriber<A>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.insert(id, subscriber);
        id
    }
}

/// A channel delivering values of type `A` to its subscribers.
pub struct EventChannel<A> {
    registry: Arc<Mutex<Registry<A>>>,
}

impl<A: 'static> EventChannel<A> {
    /// Creates a channel without subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 1,
                subscribers: BTreeMap::new(),
            })),
        }
    }

    /// Adds a plain callback.
    pub fn subscribe(&self, handler: impl Fn(&A) + Send + Sync + 'static) -> SubscriptionId {
        let id = lock(&self.registry).insert(Subscriber::Direct(Arc::new(handler)));
        tracing::trace!(%id, "Subscribed");
        id
    }

    /// Adds a method bound to `target` through a weak reference.
    ///
    /// `target` is resolved before every delivery; `method` only runs while
    /// the object is alive. The subscription does not keep it alive.
    pub fn subscribe_weak<T>(
        &self,
        target: &WeakRef<T>,
        method: impl Fn(&T, &A) + Send + Sync + 'static,
    ) -> SubscriptionId
    where
        T: Send + Sync + 'static,
    {
        let target = target.clone();
        let bound = move |args: &A| match target.resolve() {
            Some(this) => {
                method(&*this, args);
                true
            }
            None => false,
        };
        let id = lock(&self.registry).insert(Subscriber::Weak(Arc::new(bound)));
        tracing::trace!(%id, "Subscribed through weak reference");
        id
    }

    /// Adds a method bound to `target` through a strong handle.
    ///
    /// The object stays alive at least until the subscription is removed or
    /// the channel is dropped.
    pub fn subscribe_strong<T>(
        &self,
        target: Strong<T>,
        method: impl Fn(&T, &A) + Send + Sync + 'static,
    ) -> SubscriptionId
    where
        T: Send + Sync + 'static,
    {
        self.subscribe(move |args| method(&*target, args))
    }

    /// Adds a callback that is removed again when the returned guard drops.
    #[must_use = "dropping the guard unsubscribes immediately"]
    pub fn subscribe_revoking(
        &self,
        handler: impl Fn(&A) + Send + Sync + 'static,
    ) -> Subscription<A> {
        Subscription {
            id: self.subscribe(handler),
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Removes a subscription.
    ///
    /// Returns `false` if no such subscription exists; that is not an error.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = lock(&self.registry).subscribers.remove(&id).is_some();
        if removed {
            tracing::trace!(%id, "Unsubscribed");
        }
        removed
    }

    /// Delivers `args` to every current subscriber, in subscription order.
    ///
    /// Returns the number of subscribers that actually received the value.
    /// Weakly bound subscribers whose object expired are skipped and purged.
    pub fn publish(&self, args: &A) -> usize {
        let snapshot: Vec<(SubscriptionId, Subscriber<A>)> = lock(&self.registry)
            .subscribers
            .iter()
            .map(|(id, subscriber)| (*id, subscriber.clone()))
            .collect();

        let mut delivered = 0;
        let mut expired = Vec::new();
        for (id, subscriber) in snapshot {
            if subscriber.deliver(args) {
                delivered += 1;
            } else {
                expired.push(id);
            }
        }

        if !expired.is_empty() {
            let mut registry = lock(&self.registry);
            for id in expired {
                registry.subscribers.remove(&id);
            }
        }
        delivered
    }

    /// Number of registered subscriptions, expired ones included until the
    /// next publish purges them.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.registry).subscribers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every subscription.
    pub fn clear(&self) {
        lock(&self.registry).subscribers.clear();
    }
}

impl<A: 'static> Default for EventChannel<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for EventChannel<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("EventChannel")
            .field("subscribers", &registry.subscribers.len())
            .field("next_id", &registry.next_id)
            .finish()
    }
}

/// Guard returned by [`EventChannel::subscribe_revoking`].
///
/// Unsubscribes on drop. The guard only holds a weak link to the channel, so
/// it may outlive the channel; dropping it then does nothing.
pub struct Subscription<A> {
    id: SubscriptionId,
    registry: Weak<Mutex<Registry<A>>>,
}

impl<A> Subscription<A> {
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Unsubscribes now.
    pub fn revoke(self) {
        drop(self);
    }

    /// Keeps the subscription registered and returns its id.
    pub fn detach(self) -> SubscriptionId {
        let id = self.id;
        std::mem::forget(self);
        id
    }
}

impl<A> Drop for Subscription<A> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).subscribers.remove(&self.id);
        }
    }
}

impl<A> fmt::Debug for Subscription<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic() {
        let channel = EventChannel::<u8>::new();
        let a = channel.subscribe(|_| {});
        let b = channel.subscribe(|_| {});
        channel.unsubscribe(b);
        let c = channel.subscribe(|_| {});
        assert!(a < b && b < c);
    }

    #[test]
    fn expired_entries_are_purged_on_publish() {
        let channel = EventChannel::<u8>::new();
        let target = Strong::new(());
        channel.subscribe_weak(&target.make_weak(), |_, _| {});
        drop(target);
        assert_eq!(channel.len(), 1);
        assert_eq!(channel.publish(&0), 0);
        assert!(channel.is_empty());
    }
}
