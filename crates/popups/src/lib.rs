//! Popup lifecycle management.
//!
//! A [`Popup`] drives one overlay through `closed → opening → opened →
//! closing`, with cancelable before-notifications and bounded waits for visual
//! transitions. A [`PopupGroup`] mounts popups on a host [`Stage`] and tracks
//! which are live; the [`PopupRegistry`] routes requests to groups by id.
//!
//! Everything here is single-threaded. Operations spawn work with
//! `tokio::task::spawn_local`, so they must run inside a
//! [`tokio::task::LocalSet`].
//!
//! [`Stage`]: popups_core::host::Stage

pub mod group;
pub mod headless;
pub mod popup;
pub mod registry;
mod wait;

pub use group::{CloseAllReport, PopupGroup};
pub use popup::{ClickTarget, Popup, PopupId, PopupOptions, PopupState, WeakPopup};
pub use registry::PopupRegistry;
