use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::Promise;

pub(crate) type OnFulfilled<V> = Box<dyn FnOnce(V) + Send>;
pub(crate) type OnRejected<E> = Box<dyn FnOnce(E) + Send>;

/// Strong, type-erased edge from a waiting promise to the one it waits on.
pub(crate) type Upstream = Arc<dyn Link>;

/// A promise seen only as a link in a chain of upstream edges.
pub(crate) trait Link: Send + Sync {
    /// Takes the upstream edge out of a pending promise.
    fn detach(&self) -> Option<Upstream>;
}

impl<V: Send, E: Send> Link for Mutex<State<V, E>> {
    fn detach(&self) -> Option<Upstream> {
        match &mut *self.lock().unwrap_or_else(PoisonError::into_inner) {
            State::Pending(deferred) => deferred.upstream.take(),
            _ => None,
        }
    }
}

pub(crate) enum State<V, E> {
    Pending(Deferred<V, E>),
    Fulfilled(V),
    Rejected(E),
}

impl<V, E> State<V, E> {
    pub(crate) fn tag(&self) -> &'static str {
        match self {
            State::Pending(_) => "pending",
            State::Fulfilled(_) => "fulfilled",
            State::Rejected(_) => "rejected",
        }
    }
}

/// Callbacks waiting on a pending promise. Drained exactly once, on settlement.
pub(crate) struct Deferred<V, E> {
    pub(crate) on_fulfilled: Vec<OnFulfilled<V>>,
    pub(crate) on_rejected: Vec<OnRejected<E>>,
    pub(crate) upstream: Option<Upstream>,
    /// Set once the promise has been resolved with another promise; from then
    /// on only that promise may settle it.
    pub(crate) forwarding: bool,
}

impl<V, E> Deferred<V, E> {
    pub(crate) fn waiting_on(upstream: Upstream) -> Self {
        Self {
            on_fulfilled: vec![],
            on_rejected: vec![],
            upstream: Some(upstream),
            forwarding: false,
        }
    }

    /// Number of `on_resolve` subscriptions. Both lists grow together, one
    /// entry each per subscription.
    pub(crate) fn waiting(&self) -> usize {
        self.on_fulfilled.len()
    }
}

impl<V, E> Drop for Deferred<V, E> {
    /// Unwinds the upstream chain one link at a time, so dropping the tip of
    /// a long forwarding chain does not recurse once per link.
    fn drop(&mut self) {
        let mut next = self.upstream.take();
        while let Some(link) = next {
            next = if Arc::strong_count(&link) == 1 {
                link.detach()
            } else {
                None
            };
        }
    }
}

impl<V, E> Default for Deferred<V, E> {
    fn default() -> Self {
        Self {
            on_fulfilled: vec![],
            on_rejected: vec![],
            upstream: None,
            forwarding: false,
        }
    }
}

/// What a promise is resolved with: a final value, or another promise whose
/// outcome it should adopt.
pub enum Resolution<V, E> {
    Value(V),
    Promise(Promise<V, E>),
}

impl<V, E> fmt::Debug for Resolution<V, E>
where
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Resolution::Promise(promise) => f.debug_tuple("Promise").field(promise).finish(),
        }
    }
}

impl<V, E> From<Promise<V, E>> for Resolution<V, E> {
    fn from(promise: Promise<V, E>) -> Self {
        Resolution::Promise(promise)
    }
}
