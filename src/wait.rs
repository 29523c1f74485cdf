//! Awaiting a promise from async code.
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Waker};

use crate::Promise;

/// Future returned by [`Promise::wait`]. Resolves to `Ok` with the fulfilled
/// value or `Err` with the rejection reason.
#[derive(Debug)]
pub struct Waiter<V, E> {
    promise: Promise<V, E>,
    slot: Arc<Mutex<Slot<V, E>>>,
    subscribed: bool,
}

#[derive(Debug)]
struct Slot<V, E> {
    value: Option<Result<V, E>>,
    waker: Option<Waker>,
}

impl<V, E> Slot<V, E> {
    fn complete(slot: &Mutex<Self>, value: Result<V, E>) {
        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.value = Some(value);
        if let Some(waker) = slot.waker.take() {
            waker.wake()
        }
    }
}

impl<V, E> Promise<V, E>
where
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// A future for this promise's outcome. The promise stays alive for as
    /// long as the future does.
    pub fn wait(&self) -> Waiter<V, E> {
        Waiter {
            promise: self.clone(),
            slot: Arc::new(Mutex::new(Slot {
                value: None,
                waker: None,
            })),
            subscribed: false,
        }
    }
}

impl<V, E> IntoFuture for Promise<V, E>
where
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Result<V, E>;
    type IntoFuture = Waiter<V, E>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait()
    }
}

impl<V, E> Future for Waiter<V, E>
where
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    type Output = Result<V, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if !this.subscribed {
            this.subscribed = true;
            let on_fulfilled = this.slot.clone();
            let on_rejected = this.slot.clone();
            this.promise.on_resolve(
                move |value| Slot::complete(&on_fulfilled, Ok(value)),
                move |error| Slot::complete(&on_rejected, Err(error)),
            );
        }
        let mut slot = this.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.value.take() {
            Some(value) => Poll::Ready(value),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}
