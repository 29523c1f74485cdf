//! Where chained callbacks run.
//!
//! [`Promise::then`](crate::Promise::then) never runs a transformation
//! itself; it hands the work to a [`Dispatcher`]. The dispatcher decides the
//! thread, queue or executor.
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread;

use crate::Error;

pub type Work = Box<dyn FnOnce() + Send + 'static>;

pub trait Dispatcher: Send + Sync {
    /// Runs `work` exactly once, at some point after this call.
    fn dispatch(&self, work: Work);
}

impl<D: Dispatcher + ?Sized> Dispatcher for &D {
    fn dispatch(&self, work: Work) {
        (**self).dispatch(work)
    }
}

impl<D: Dispatcher + ?Sized> Dispatcher for Arc<D> {
    fn dispatch(&self, work: Work) {
        (**self).dispatch(work)
    }
}

impl<D: Dispatcher + ?Sized> Dispatcher for Box<D> {
    fn dispatch(&self, work: Work) {
        (**self).dispatch(work)
    }
}

/// Runs work on the calling thread before `dispatch` returns.
///
/// A promise chained through `Inline` settles on the same thread as its
/// parent, which is handy in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl Dispatcher for Inline {
    fn dispatch(&self, work: Work) {
        work()
    }
}

/// Runs each unit of work on a fresh OS thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpawnThread;

impl Dispatcher for SpawnThread {
    fn dispatch(&self, work: Work) {
        if let Err(error) = thread::Builder::new().spawn(work) {
            tracing::error!(%error, "failed to spawn thread, work dropped");
        }
    }
}

/// A single worker thread that runs work in submission order.
///
/// Clones share the same worker. The worker exits once every clone is
/// dropped and the queue has drained.
///
/// # Examples
///
/// ```
/// use promise_core::dispatch::SerialQueue;
/// use promise_core::{Promise, Resolution};
/// use futures::executor::block_on;
///
/// let queue = SerialQueue::new("callbacks").unwrap();
/// let name = Promise::<(), ()>::fulfilled(()).then(
///     queue,
///     |_| Ok(Resolution::Value(std::thread::current().name().map(String::from))),
///     |e| Err(e),
/// );
/// assert_eq!(block_on(name.wait()), Ok(Some("callbacks".to_string())));
/// ```
#[derive(Debug, Clone)]
pub struct SerialQueue {
    sender: Sender<Work>,
}

impl SerialQueue {
    pub fn new(label: &str) -> Result<Self, Error> {
        let (sender, receiver) = channel::<Work>();
        let name = label.to_string();
        thread::Builder::new().name(name.clone()).spawn(move || {
            for work in receiver {
                if panic::catch_unwind(AssertUnwindSafe(work)).is_err() {
                    tracing::error!(queue = %name, "work panicked on serial queue");
                }
            }
            tracing::trace!(queue = %name, "serial queue drained");
        })?;
        Ok(Self { sender })
    }
}

impl Dispatcher for SerialQueue {
    fn dispatch(&self, work: Work) {
        if self.sender.send(work).is_err() {
            tracing::warn!("serial queue worker has exited, work dropped");
        }
    }
}

#[cfg(feature = "thread-pool")]
impl Dispatcher for futures::executor::ThreadPool {
    fn dispatch(&self, work: Work) {
        self.spawn_ok(async move { work() })
    }
}
