//! The promise handle and its settlement protocol.
//!
//! All reads and writes of a promise's [`State`] happen under its mutex.
//! Callbacks are always invoked after the guard is dropped, so a callback may
//! freely touch the promise that invoked it.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::dispatch::Dispatcher;
use crate::state::{Deferred, Resolution, State, Upstream};
use crate::{Error, Resolver};

pub(crate) type Shared<V, E> = Arc<Mutex<State<V, E>>>;

/// A value of type `V` that becomes available later, exactly once, or fails
/// with an `E`.
///
/// Cloning a `Promise` clones the handle, not the outcome. The promise is
/// considered cancelled once every handle (including the ones held by
/// promises chained from it) has been dropped.
///
/// # Examples
///
/// ```
/// use promise_core::{dispatch::Inline, Promise, Resolution};
///
/// let doubled = Promise::<i32, String>::new(|resolver| resolver.fulfill(21))
///     .then(Inline, |v| Ok(Resolution::Value(v * 2)), |e| Err(e));
/// assert_eq!(doubled.value(), Some(42));
/// ```
pub struct Promise<V, E> {
    pub(crate) promise: Shared<V, E>,
}

impl<V, E> Clone for Promise<V, E> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<V, E> fmt::Debug for Promise<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.promise.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Promise").field("state", &state.tag()).finish()
    }
}

impl<V, E> Promise<V, E> {
    /// Whether both handles refer to the same promise.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.promise, &other.promise)
    }

    pub(crate) fn upgrade(weak: &Weak<Mutex<State<V, E>>>) -> Option<Self> {
        weak.upgrade().map(|promise| Self { promise })
    }

    pub(crate) fn downgrade(&self) -> Weak<Mutex<State<V, E>>> {
        Arc::downgrade(&self.promise)
    }

    fn lock(&self) -> MutexGuard<'_, State<V, E>> {
        self.promise.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn from_state(state: State<V, E>) -> Self {
        Self {
            promise: Arc::new(Mutex::new(state)),
        }
    }
}

impl<V, E> Promise<V, E>
where
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates a pending promise and hands its [`Resolver`] to `resolver`.
    ///
    /// The resolver only holds the promise weakly: once the returned promise
    /// and every promise chained from it are dropped,
    /// [`Resolver::is_cancelled`] turns `true` and settling becomes a no-op.
    pub fn new<F>(resolver: F) -> Self
    where
        F: FnOnce(Resolver<V, E>),
    {
        let promise = Self::from_state(State::Pending(Deferred::default()));
        resolver(Resolver::new(&promise));
        promise
    }

    /// A pending promise together with the resolver that settles it.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_core::Promise;
    /// use futures::executor::block_on;
    /// use std::thread;
    ///
    /// let (promise, resolver) = Promise::<String, ()>::pair();
    /// let task = thread::spawn(move || resolver.fulfill("🍓".into()));
    /// assert_eq!(block_on(promise.wait()), Ok("🍓".to_string()));
    /// task.join().expect("The task thread has panicked");
    /// ```
    pub fn pair() -> (Self, Resolver<V, E>) {
        let promise = Self::from_state(State::Pending(Deferred::default()));
        let resolver = Resolver::new(&promise);
        (promise, resolver)
    }

    /// An already fulfilled promise.
    pub fn fulfilled(value: V) -> Self {
        Self::from_state(State::Fulfilled(value))
    }

    /// An already rejected promise.
    pub fn rejected(error: E) -> Self {
        Self::from_state(State::Rejected(error))
    }

    /// Creates a promise that keeps `parent` alive until it settles, then
    /// hands its resolver to `resolver`.
    pub(crate) fn pending_on<U, F>(parent: &Promise<U, E>, resolver: F) -> Self
    where
        U: Send + 'static,
        F: FnOnce(Resolver<V, E>),
    {
        let upstream: Upstream = parent.promise.clone();
        let promise = Self::from_state(State::Pending(Deferred::waiting_on(upstream)));
        resolver(Resolver::new(&promise));
        promise
    }

    /// Chains a transformation onto this promise.
    ///
    /// When this promise settles, the matching callback is submitted to
    /// `dispatcher`; the returned promise settles with whatever that callback
    /// produces. `Ok(Resolution::Value(v))` fulfills it with `v`,
    /// `Ok(Resolution::Promise(p))` makes it adopt `p`'s outcome and `Err(e)`
    /// rejects it with `e`.
    pub fn then<R, D, F, G>(&self, dispatcher: D, on_fulfilled: F, on_rejected: G) -> Promise<R, E>
    where
        R: Clone + Send + 'static,
        D: Dispatcher + Clone + 'static,
        F: FnOnce(V) -> Result<Resolution<R, E>, E> + Send + 'static,
        G: FnOnce(E) -> Result<Resolution<R, E>, E> + Send + 'static,
    {
        Promise::pending_on(self, |resolver| {
            let rejecter = resolver.clone();
            let fallback = dispatcher.clone();
            self.on_resolve(
                move |value| {
                    dispatcher.dispatch(Box::new(move || resolver.settle(on_fulfilled(value))))
                },
                move |error| {
                    fallback.dispatch(Box::new(move || rejecter.settle(on_rejected(error))))
                },
            );
        })
    }

    /// Subscribes to this promise's outcome.
    ///
    /// If the promise has already settled the matching callback runs right
    /// away on the calling thread. Otherwise both callbacks are queued and the
    /// matching one runs, exactly once, on whichever thread settles it.
    pub fn on_resolve<F, G>(&self, on_fulfilled: F, on_rejected: G)
    where
        F: FnOnce(V) + Send + 'static,
        G: FnOnce(E) + Send + 'static,
    {
        let mut state = self.lock();
        let settled = match &mut *state {
            State::Pending(deferred) => {
                deferred.on_fulfilled.push(Box::new(on_fulfilled));
                deferred.on_rejected.push(Box::new(on_rejected));
                tracing::trace!(waiting = deferred.waiting(), "queued callbacks on pending promise");
                return;
            }
            State::Fulfilled(value) => Ok(value.clone()),
            State::Rejected(error) => Err(error.clone()),
        };
        drop(state);
        match settled {
            Ok(value) => on_fulfilled(value),
            Err(error) => on_rejected(error),
        }
    }

    pub(crate) fn fulfill(&self, value: V) {
        self.fulfill_from(Origin::Resolver, value)
    }

    pub(crate) fn reject(&self, error: E) {
        self.reject_from(Origin::Resolver, error)
    }

    fn fulfill_from(&self, origin: Origin, value: V) {
        let mut deferred = self.settle(origin, State::Fulfilled(value.clone()));
        tracing::trace!(callbacks = deferred.on_fulfilled.len(), "promise fulfilled");
        for callback in deferred.on_fulfilled.drain(..) {
            callback(value.clone());
        }
    }

    fn reject_from(&self, origin: Origin, error: E) {
        let mut deferred = self.settle(origin, State::Rejected(error.clone()));
        tracing::trace!(callbacks = deferred.on_rejected.len(), "promise rejected");
        for callback in deferred.on_rejected.drain(..) {
            callback(error.clone());
        }
    }

    pub(crate) fn resolve(&self, resolution: Resolution<V, E>) {
        match resolution {
            Resolution::Value(value) => self.fulfill(value),
            Resolution::Promise(upstream) => self.pend_on(upstream),
        }
    }

    /// Makes this promise adopt `upstream`'s outcome. Callbacks already queued
    /// here stay queued and fire when `upstream` settles. The upstream edge is
    /// strong, so a forwarding chain lives as long as its last link is held.
    ///
    /// Two promises forwarding to each other, directly or through a longer
    /// loop, is a caller error: the loop keeps itself alive and never settles.
    pub(crate) fn pend_on(&self, upstream: Promise<V, E>) {
        if self.ptr_eq(&upstream) {
            violation(Error::ChainedToSelf);
        }
        let waiting_on: Upstream = upstream.promise.clone();
        let previous = {
            let mut state = self.lock();
            match &mut *state {
                State::Pending(deferred) if !deferred.forwarding => {
                    deferred.forwarding = true;
                    deferred.upstream.replace(waiting_on)
                }
                _ => {
                    drop(state);
                    violation(Error::DuplicateResolution)
                }
            }
        };
        // Released outside the lock.
        drop(previous);
        tracing::trace!("promise forwarding to upstream promise");
        let on_fulfilled = self.downgrade();
        let on_rejected = on_fulfilled.clone();
        upstream.on_resolve(
            move |value| {
                forward(Box::new(move || match Promise::upgrade(&on_fulfilled) {
                    Some(promise) => promise.fulfill_from(Origin::Upstream, value),
                    None => tracing::debug!("forwarded value dropped, promise was cancelled"),
                }))
            },
            move |error| {
                forward(Box::new(move || match Promise::upgrade(&on_rejected) {
                    Some(promise) => promise.reject_from(Origin::Upstream, error),
                    None => tracing::debug!("forwarded error dropped, promise was cancelled"),
                }))
            },
        );
    }

    /// Moves a pending promise into `settled` and returns the callbacks that
    /// were waiting on it. The lock is released before returning.
    fn settle(&self, origin: Origin, settled: State<V, E>) -> Deferred<V, E> {
        let mut state = self.lock();
        match &mut *state {
            State::Pending(deferred) if deferred.forwarding == (origin == Origin::Upstream) => {
                let deferred = mem::take(deferred);
                *state = settled;
                deferred
            }
            _ => {
                drop(state);
                violation(Error::DuplicateResolution)
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.lock(), State::Pending(_))
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(*self.lock(), State::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(*self.lock(), State::Rejected(_))
    }

    /// The fulfilled value, if there is one yet.
    pub fn value(&self) -> Option<V> {
        match &*self.lock() {
            State::Fulfilled(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// The rejection reason, if there is one yet.
    pub fn error(&self) -> Option<E> {
        match &*self.lock() {
            State::Rejected(error) => Some(error.clone()),
            _ => None,
        }
    }
}

type Hop = Box<dyn FnOnce()>;

thread_local! {
    /// Forwarding hops waiting to run on this thread. `Some` while a hop is
    /// running.
    static HOPS: RefCell<Option<VecDeque<Hop>>> = const { RefCell::new(None) };
}

/// Settles one link of a forwarding chain.
///
/// A hop that fires while another hop is running on the same thread is
/// queued behind it instead of nested inside it, so settling a chain of any
/// length uses constant stack.
fn forward(hop: Hop) {
    let first = HOPS.with(|hops| {
        let mut hops = hops.borrow_mut();
        match hops.as_mut() {
            Some(queue) => {
                queue.push_back(hop);
                None
            }
            None => {
                *hops = Some(VecDeque::new());
                Some(hop)
            }
        }
    });
    let Some(mut hop) = first else {
        return;
    };
    let _draining = Draining;
    loop {
        hop();
        match HOPS.with(|hops| hops.borrow_mut().as_mut().and_then(VecDeque::pop_front)) {
            Some(next) => hop = next,
            None => break,
        }
    }
}

/// Marks the end of a drain, including one cut short by a panicking callback.
struct Draining;

impl Drop for Draining {
    fn drop(&mut self) {
        let left = HOPS.with(|hops| hops.borrow_mut().take()).map_or(0, |queue| queue.len());
        if left > 0 {
            tracing::warn!(left, "forwarding hops dropped after a callback panicked");
        }
    }
}

/// Who is settling a promise. Once a promise forwards to another one, only
/// that upstream promise may settle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Resolver,
    Upstream,
}

/// Settling twice or chaining onto itself breaks the at-most-once guarantee;
/// nothing downstream can be trusted after that.
fn violation(error: Error) -> ! {
    tracing::error!(%error, "promise protocol violation");
    panic!("{error}")
}
