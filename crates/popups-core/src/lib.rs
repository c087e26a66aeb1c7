//! Building blocks shared by the popup crates: configuration, the error
//! taxonomy, deferred results, the notification catalog, transition timing and
//! the host interfaces a renderer implements.

pub mod config;
pub mod deferred;
pub mod error;
pub mod event;
pub mod host;
pub mod transition;

pub use deferred::{Deferred, Status};
pub use error::{Error, Result};
pub use event::{Detail, Event, EventKind, EventTarget, ListenerId, ListenerOptions};
