//! Interfaces a rendering layer implements to host popups.
//!
//! The popup crates never touch a real UI toolkit. A TUI, a web binding or a
//! desktop toolkit plugs in by implementing these traits; the `headless` stage
//! in the `popups` crate is the in-memory implementation.

use std::any::Any;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key under which the popup's back-reference is injected into content inputs.
pub const POPUP_INPUT: &str = "popup";

/// What to mount inside a popup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Host-defined identifier of the content widget.
    pub content_type: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
}

impl ContentConfig {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            inputs: Map::new(),
        }
    }

    pub fn input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(key.into(), value.into());
        self
    }
}

/// A mount request handed to a [`Container`].
///
/// `P` is the back-reference type injected as the [`POPUP_INPUT`] input; the
/// `popups` crate passes a weak popup handle.
pub struct MountRequest<P> {
    pub config: ContentConfig,
    pub popup: P,
}

/// A mounted widget owned by whoever created it.
pub trait Mounted {
    /// The constructed content object, for downcasting.
    fn content(&self) -> Option<&dyn Any> {
        None
    }

    /// Tear the widget down. Called at most once.
    fn destroy(&mut self);
}

/// Creates content widgets inside a popup.
pub trait Container<P> {
    fn create(&self, request: MountRequest<P>) -> anyhow::Result<Box<dyn Mounted>>;
}

/// The outer element of a popup or a group.
pub trait Surface {
    fn set_class(&self, class: &str, on: bool);

    fn has_class(&self, class: &str) -> bool;

    /// Computed transition duration as a CSS time list (e.g. `"0.3s"`), if any.
    fn transition_duration(&self) -> Option<String>;
}

/// Render-loop frame boundaries.
pub trait FrameClock {
    /// Completes at the next frame, after pending style changes were applied.
    fn next_frame(&self) -> LocalBoxFuture<'static, ()>;
}

/// Everything a new popup needs from its group's mount point.
pub struct PopupSlot<P> {
    /// The popup's outer element.
    pub surface: Rc<dyn Surface>,
    /// Mounts content inside the popup.
    pub container: Rc<dyn Container<P>>,
    /// The popup chrome itself; destroyed when the popup is removed.
    pub mounted: Box<dyn Mounted>,
}

/// A group's mount point.
pub trait Stage<P> {
    /// The group's own element; carries the visibility class.
    fn surface(&self) -> Rc<dyn Surface>;

    fn clock(&self) -> Rc<dyn FrameClock>;

    /// Mount the chrome for one new popup.
    fn mount_popup(&self) -> anyhow::Result<PopupSlot<P>>;
}
