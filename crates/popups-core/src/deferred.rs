//! Externally settled async results.
//!
//! A [`Deferred`] separates creating a pending result from deciding when and how
//! it completes. Every clone shares one settlement slot, so a single handle can
//! be returned to several coalesced callers and awaited by all of them.

use std::fmt;
use std::future::IntoFuture;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use tokio::sync::watch;

use crate::error::{Error, Result};

/// Settlement state of a [`Deferred`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Resolved,
    Rejected,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Resolved => f.write_str("resolved"),
            Self::Rejected => f.write_str("rejected"),
        }
    }
}

#[derive(Debug, Clone)]
enum Outcome<T> {
    Pending,
    Settled(Result<T>),
}

/// A settle-once async result with external `resolve`/`reject`.
///
/// Dropping every clone while still pending makes waiters observe
/// [`Error::Abandoned`].
pub struct Deferred<T> {
    slot: Rc<watch::Sender<Outcome<T>>>,
}

impl<T> Clone for Deferred<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("status", &self.status())
            .finish()
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Deferred<T> {
    /// Create a pending handle.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Outcome::Pending);
        Self { slot: Rc::new(tx) }
    }

    /// Create a pending handle and run `setup` with it before returning.
    ///
    /// `setup` may settle the handle synchronously or stash a clone to settle
    /// it later.
    pub fn with_setup(setup: impl FnOnce(&Self)) -> Self {
        let deferred = Self::new();
        setup(&deferred);
        deferred
    }

    /// An already-resolved handle.
    pub fn resolved(value: T) -> Self {
        Self::with_setup(|d| {
            d.resolve(value);
        })
    }

    /// An already-rejected handle.
    pub fn rejected(err: Error) -> Self {
        Self::with_setup(|d| {
            d.reject(err);
        })
    }

    pub fn status(&self) -> Status {
        match &*self.slot.borrow() {
            Outcome::Pending => Status::Pending,
            Outcome::Settled(Ok(_)) => Status::Resolved,
            Outcome::Settled(Err(_)) => Status::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status() == Status::Pending
    }

    /// Resolve with `value`. Returns false if the handle had already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Reject with `err`. Returns false if the handle had already settled.
    pub fn reject(&self, err: Error) -> bool {
        self.settle(Err(err))
    }

    /// Settle from a `Result`. Only the first settlement sticks.
    pub fn settle(&self, outcome: Result<T>) -> bool {
        self.slot.send_if_modified(move |slot| {
            if matches!(slot, Outcome::Pending) {
                *slot = Outcome::Settled(outcome);
                true
            } else {
                false
            }
        })
    }

    /// True when both handles share the same settlement slot.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<T: Clone + 'static> Deferred<T> {
    /// Future that completes with the settled outcome.
    pub fn wait(&self) -> LocalBoxFuture<'static, Result<T>> {
        let mut rx = self.slot.subscribe();
        async move {
            match rx.wait_for(|o| !matches!(o, Outcome::Pending)).await {
                Ok(slot) => match &*slot {
                    Outcome::Settled(result) => result.clone(),
                    Outcome::Pending => Err(Error::Abandoned),
                },
                Err(_) => Err(Error::Abandoned),
            }
        }
        .boxed_local()
    }

    /// Derive a handle that applies `f` to the resolved value.
    ///
    /// Rejections pass through untouched; an `Err` from `f` rejects the derived
    /// handle. Must be called within a `tokio::task::LocalSet`.
    pub fn then<U, F>(&self, f: F) -> Deferred<U>
    where
        U: 'static,
        F: FnOnce(T) -> Result<U> + 'static,
    {
        let source = self.wait();
        let derived = Deferred::new();
        let target = derived.clone();
        tokio::task::spawn_local(async move {
            let outcome = match source.await {
                Ok(value) => f(value),
                Err(err) => Err(err),
            };
            target.settle(outcome);
        });
        derived
    }

    /// Derive a handle that recovers from a rejection with `f`.
    ///
    /// Resolutions pass through untouched; an `Err` from `f` rejects the derived
    /// handle. Must be called within a `tokio::task::LocalSet`.
    pub fn catch<F>(&self, f: F) -> Deferred<T>
    where
        F: FnOnce(Error) -> Result<T> + 'static,
    {
        let source = self.wait();
        let derived = Deferred::new();
        let target = derived.clone();
        tokio::task::spawn_local(async move {
            let outcome = match source.await {
                Ok(value) => Ok(value),
                Err(err) => f(err),
            };
            target.settle(outcome);
        });
        derived
    }
}

impl<T: Clone + 'static> IntoFuture for Deferred<T> {
    type Output = Result<T>;
    type IntoFuture = LocalBoxFuture<'static, Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait()
    }
}

impl<T: Clone + 'static> IntoFuture for &Deferred<T> {
    type Output = Result<T>;
    type IntoFuture = LocalBoxFuture<'static, Result<T>>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait()
    }
}
