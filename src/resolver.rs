use std::fmt;
use std::sync::{Mutex, Weak};

use crate::state::{Resolution, State};
use crate::Promise;

/// The settling side of a [`Promise`].
///
/// A resolver never keeps its promise alive. When nobody holds the promise
/// any more the resolver reports [`is_cancelled`](Resolver::is_cancelled) and
/// quietly discards whatever it is asked to settle with; long-running work
/// should poll that flag and stop early.
///
/// Settling the same promise twice, through any mix of `fulfill`, `reject`
/// and `resolve`, panics.
pub struct Resolver<V, E> {
    promise: Weak<Mutex<State<V, E>>>,
}

impl<V, E> Clone for Resolver<V, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<V, E> fmt::Debug for Resolver<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl<V, E> Resolver<V, E> {
    pub(crate) fn new(promise: &Promise<V, E>) -> Self {
        Self {
            promise: promise.downgrade(),
        }
    }

    /// `true` once no strong handle to the promise survives.
    pub fn is_cancelled(&self) -> bool {
        self.promise.strong_count() == 0
    }
}

impl<V, E> Resolver<V, E>
where
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn fulfill(&self, value: V) {
        match Promise::upgrade(&self.promise) {
            Some(promise) => promise.fulfill(value),
            None => tracing::debug!("fulfill ignored, promise was cancelled"),
        }
    }

    pub fn reject(&self, error: E) {
        match Promise::upgrade(&self.promise) {
            Some(promise) => promise.reject(error),
            None => tracing::debug!("reject ignored, promise was cancelled"),
        }
    }

    /// Fulfills with a value, or adopts the outcome of another promise.
    pub fn resolve(&self, resolution: Resolution<V, E>) {
        match Promise::upgrade(&self.promise) {
            Some(promise) => promise.resolve(resolution),
            None => tracing::debug!("resolve ignored, promise was cancelled"),
        }
    }

    /// Settles with the outcome of a fallible transformation.
    pub fn settle(&self, outcome: Result<Resolution<V, E>, E>) {
        match outcome {
            Ok(resolution) => self.resolve(resolution),
            Err(error) => self.reject(error),
        }
    }
}
