//! A thread-safe promise that settles exactly once.
//!
//! A [`Promise`] is pending until its [`Resolver`] fulfills or rejects it.
//! [`Promise::then`] chains a transformation that runs on a
//! [`Dispatcher`](dispatch::Dispatcher) once the promise settles, and a
//! transformation may itself return a promise to be flattened into the chain.
//! Resolvers only hold their promise weakly, so dropping every handle to a
//! promise is how a caller says it no longer cares.
//!
//! # Examples
//!
//! ```
//! use promise_core::dispatch::SpawnThread;
//! use promise_core::{Promise, Resolution};
//! use futures::executor::block_on;
//! use std::thread;
//!
//! let answer = Promise::<u32, String>::new(|resolver| {
//!     thread::spawn(move || resolver.fulfill(41));
//! })
//! .then(SpawnThread, |v| Ok(Resolution::Value(v + 1)), |e| Err(e));
//!
//! assert_eq!(block_on(answer.wait()), Ok(42));
//! ```
pub mod dispatch;
mod promise;
mod resolver;
mod state;
mod wait;

pub use promise::Promise;
pub use resolver::Resolver;
pub use state::Resolution;
pub use wait::Waiter;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A promise was fulfilled, rejected or resolved after it had already
    /// been settled or handed off to another promise.
    #[error("duplicate attempt to resolve promise")]
    DuplicateResolution,
    #[error("promise cannot be chained onto itself")]
    ChainedToSelf,
    #[error("failed to spawn dispatcher thread: {0}")]
    Spawn(#[from] std::io::Error),
}
