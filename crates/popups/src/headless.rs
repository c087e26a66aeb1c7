//! In-memory host for tests and the `popupctl` simulator.
//!
//! Surfaces are class sets with a fixed computed transition duration, frames
//! are `tokio::time::sleep` ticks and mounts only bump counters, so the whole
//! lifecycle runs deterministically under a paused tokio clock.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{bail, Result};
use futures::future::{FutureExt, LocalBoxFuture};
use popups_core::host::{
    ContentConfig, Container, FrameClock, MountRequest, Mounted, PopupSlot, Stage, Surface,
};
use tracing::trace;

use crate::popup::WeakPopup;

/// Default frame interval, roughly 60 Hz.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Debug, Default)]
pub struct HeadlessSurface {
    classes: RefCell<BTreeSet<String>>,
    transition: RefCell<Option<String>>,
}

impl HeadlessSurface {
    pub fn new(transition: Option<String>) -> Self {
        Self {
            classes: RefCell::new(BTreeSet::new()),
            transition: RefCell::new(transition),
        }
    }

    /// Current classes in sorted order.
    pub fn classes(&self) -> Vec<String> {
        self.classes.borrow().iter().cloned().collect()
    }

    pub fn set_transition(&self, css: Option<String>) {
        *self.transition.borrow_mut() = css;
    }
}

impl Surface for HeadlessSurface {
    fn set_class(&self, class: &str, on: bool) {
        let mut classes = self.classes.borrow_mut();
        if on {
            classes.insert(class.to_string());
        } else {
            classes.remove(class);
        }
    }

    fn has_class(&self, class: &str) -> bool {
        self.classes.borrow().contains(class)
    }

    fn transition_duration(&self) -> Option<String> {
        self.transition.borrow().clone()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HeadlessClock {
    interval: Duration,
}

impl HeadlessClock {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for HeadlessClock {
    fn default() -> Self {
        Self::new(FRAME_INTERVAL)
    }
}

impl FrameClock for HeadlessClock {
    fn next_frame(&self) -> LocalBoxFuture<'static, ()> {
        tokio::time::sleep(self.interval).boxed_local()
    }
}

/// Mount and destroy counters shared by a stage and everything it created.
#[derive(Debug, Default)]
pub struct MountLog {
    popups_mounted: Cell<usize>,
    popups_destroyed: Cell<usize>,
    contents_mounted: Cell<usize>,
    contents_destroyed: Cell<usize>,
}

impl MountLog {
    pub fn popups_mounted(&self) -> usize {
        self.popups_mounted.get()
    }

    pub fn contents_mounted(&self) -> usize {
        self.contents_mounted.get()
    }

    /// Popup slots mounted and not yet destroyed.
    pub fn live_popups(&self) -> usize {
        self.popups_mounted.get() - self.popups_destroyed.get()
    }

    /// Content mounts not yet destroyed.
    pub fn live_contents(&self) -> usize {
        self.contents_mounted.get() - self.contents_destroyed.get()
    }

    fn bump(counter: &Cell<usize>) {
        counter.set(counter.get() + 1);
    }
}

/// The object a headless content mount exposes through [`Mounted::content`].
#[derive(Debug)]
pub struct HeadlessContent {
    pub config: ContentConfig,
    /// Back-reference injected under the [`popups_core::host::POPUP_INPUT`] input.
    pub popup: WeakPopup,
}

struct ContentMount {
    content: HeadlessContent,
    log: Rc<MountLog>,
    destroyed: bool,
}

impl Mounted for ContentMount {
    fn content(&self) -> Option<&dyn Any> {
        Some(&self.content)
    }

    fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            MountLog::bump(&self.log.contents_destroyed);
            trace!(content = %self.content.config.content_type, "content destroyed");
        }
    }
}

/// Content container that records mounts in a [`MountLog`].
pub struct HeadlessContainer {
    log: Rc<MountLog>,
}

impl HeadlessContainer {
    /// Content type that always fails to mount.
    pub const FAILING: &'static str = "headless/failing";

    pub fn new(log: Rc<MountLog>) -> Self {
        Self { log }
    }
}

impl Container<WeakPopup> for HeadlessContainer {
    fn create(&self, request: MountRequest<WeakPopup>) -> Result<Box<dyn Mounted>> {
        let MountRequest { config, popup } = request;
        if config.content_type == Self::FAILING {
            bail!("no component registered for {}", config.content_type);
        }
        MountLog::bump(&self.log.contents_mounted);
        trace!(content = %config.content_type, "content mounted");
        Ok(Box::new(ContentMount {
            content: HeadlessContent { config, popup },
            log: Rc::clone(&self.log),
            destroyed: false,
        }))
    }
}

struct PopupChrome {
    log: Rc<MountLog>,
    destroyed: bool,
}

impl Mounted for PopupChrome {
    fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            MountLog::bump(&self.log.popups_destroyed);
        }
    }
}

/// A group mount point living entirely in memory.
pub struct HeadlessStage {
    surface: Rc<HeadlessSurface>,
    clock: Rc<HeadlessClock>,
    transition: RefCell<Option<String>>,
    log: Rc<MountLog>,
    refuse_mounts: Cell<bool>,
    popup_surfaces: RefCell<Vec<Rc<HeadlessSurface>>>,
}

impl Default for HeadlessStage {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessStage {
    /// A stage with no transitions and a 16 ms frame clock.
    pub fn new() -> Self {
        Self {
            surface: Rc::new(HeadlessSurface::default()),
            clock: Rc::new(HeadlessClock::default()),
            transition: RefCell::new(None),
            log: Rc::new(MountLog::default()),
            refuse_mounts: Cell::new(false),
            popup_surfaces: RefCell::new(Vec::new()),
        }
    }

    /// Give popups mounted from now on this computed transition duration.
    pub fn with_transition(self, css: impl Into<String>) -> Self {
        *self.transition.borrow_mut() = Some(css.into());
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.clock = Rc::new(HeadlessClock::new(interval));
        self
    }

    /// Make `mount_popup` fail until switched back.
    pub fn refuse_mounts(&self, refuse: bool) {
        self.refuse_mounts.set(refuse);
    }

    pub fn log(&self) -> &MountLog {
        &self.log
    }

    /// The group's own surface.
    pub fn group_surface(&self) -> &HeadlessSurface {
        &self.surface
    }

    /// Surfaces of every popup mounted so far, in mount order.
    pub fn popup_surfaces(&self) -> Vec<Rc<HeadlessSurface>> {
        self.popup_surfaces.borrow().clone()
    }
}

impl Stage<WeakPopup> for HeadlessStage {
    fn surface(&self) -> Rc<dyn Surface> {
        self.surface.clone()
    }

    fn clock(&self) -> Rc<dyn FrameClock> {
        self.clock.clone()
    }

    fn mount_popup(&self) -> Result<PopupSlot<WeakPopup>> {
        if self.refuse_mounts.get() {
            bail!("stage is not accepting popups");
        }
        let surface = Rc::new(HeadlessSurface::new(self.transition.borrow().clone()));
        self.popup_surfaces.borrow_mut().push(Rc::clone(&surface));
        MountLog::bump(&self.log.popups_mounted);
        trace!(count = self.log.popups_mounted(), "popup slot mounted");
        Ok(PopupSlot {
            surface,
            container: Rc::new(HeadlessContainer::new(Rc::clone(&self.log))),
            mounted: Box::new(PopupChrome {
                log: Rc::clone(&self.log),
                destroyed: false,
            }),
        })
    }
}
