//! One popup's open/close lifecycle.
//!
//! A [`Popup`] moves between four states:
//!
//! ```text
//!            open                 frame + transition
//!   Closed ─────────▶ Opening ─────────────────────▶ Opened
//!     ▲                 │  ▲                            │
//!     │        close    │  │ open                close  │
//!     │   (cancelopen)  ▼  │ (cancelclose)              │
//!     └──────────────  Closing ◀────────────────────────┘
//!        transition
//! ```
//!
//! At most one open and one close are in flight. Starting either one while the
//! other is running pre-empts it: the loser's [`Deferred`] rejects with a
//! `*Cancelled` error and a `cancelopen`/`cancelclose` notification fires.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use popups_core::config::Config;
use popups_core::host::{
    ContentConfig, Container, FrameClock, MountRequest, Mounted, Surface, POPUP_INPUT,
};
use popups_core::transition::TransitionPolicy;
use popups_core::{Deferred, Detail, Error, Event, EventKind, EventTarget, ListenerId};
use serde_json::json;
use tracing::{debug, warn};

use crate::wait;

/// Content container as seen by a popup; mounts receive a weak back-reference.
pub type PopupContainer = dyn Container<WeakPopup>;

static NEXT_POPUP_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique popup identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PopupId(u64);

impl PopupId {
    fn next() -> Self {
        Self(NEXT_POPUP_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PopupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "popup-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PopupState {
    #[default]
    Closed,
    Opening,
    Opened,
    Closing,
}

impl PopupState {
    /// Whether the lifecycle may move from `self` to `next` in one step.
    pub fn can_become(self, next: Self) -> bool {
        use PopupState::*;
        matches!(
            (self, next),
            (Closed, Opening)
                | (Opening, Opened)
                | (Opening, Closing)
                | (Opened, Closing)
                | (Closing, Closed)
                | (Closing, Opening)
                | (Opening, Closed)
        )
    }
}

impl fmt::Display for PopupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Opening => f.write_str("opening"),
            Self::Opened => f.write_str("opened"),
            Self::Closing => f.write_str("closing"),
        }
    }
}

/// Where a click landed, as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickTarget {
    /// The popup's own surface, outside its content.
    Background,
    Content,
}

/// Per-popup settings, usually derived from [`Config`].
#[derive(Debug, Clone, PartialEq)]
pub struct PopupOptions {
    pub closable: bool,
    pub background_closable: bool,
    pub wait_for_transition: bool,
    pub open_class: String,
    pub policy: TransitionPolicy,
}

impl Default for PopupOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for PopupOptions {
    fn from(config: &Config) -> Self {
        Self {
            closable: config.popup.closable,
            background_closable: config.popup.background_closable,
            wait_for_transition: config.popup.wait_for_transition,
            open_class: config.transition.open_class.clone(),
            policy: TransitionPolicy::from(&config.transition),
        }
    }
}

/// State plus the two in-flight operation handles.
#[derive(Debug, Default)]
struct Lifecycle {
    state: PopupState,
    opening: Option<Deferred<()>>,
    closing: Option<Deferred<()>>,
    #[cfg(test)]
    history: Vec<PopupState>,
}

impl Lifecycle {
    /// Move to `next`, returning the previous state.
    fn enter(&mut self, next: PopupState) -> PopupState {
        let previous = std::mem::replace(&mut self.state, next);
        #[cfg(test)]
        self.history.push(next);
        previous
    }

    fn is_current_open(&self, op: &Deferred<()>) -> bool {
        self.opening.as_ref().is_some_and(|o| o.ptr_eq(op))
    }

    fn is_current_close(&self, op: &Deferred<()>) -> bool {
        self.closing.as_ref().is_some_and(|o| o.ptr_eq(op))
    }

    /// Clear `op` if it is still the in-flight open.
    fn release_open(&mut self, op: &Deferred<()>) -> bool {
        let current = self.is_current_open(op);
        if current {
            self.opening = None;
        }
        current
    }

    fn release_close(&mut self, op: &Deferred<()>) -> bool {
        let current = self.is_current_close(op);
        if current {
            self.closing = None;
        }
        current
    }
}

struct Inner {
    id: PopupId,
    events: Rc<EventTarget>,
    surface: Rc<dyn Surface>,
    container: Rc<PopupContainer>,
    clock: Rc<dyn FrameClock>,
    open_class: String,
    policy: TransitionPolicy,
    lifecycle: RefCell<Lifecycle>,
    content: RefCell<Option<Box<dyn Mounted>>>,
    closable_guard: Cell<Option<ListenerId>>,
    background_closable: Cell<bool>,
}

/// Shared handle to one popup. Clones refer to the same popup.
#[derive(Clone)]
pub struct Popup {
    inner: Rc<Inner>,
}

/// Non-owning reference to a [`Popup`], handed to mounted content.
#[derive(Clone, Default)]
pub struct WeakPopup {
    inner: Weak<Inner>,
}

impl WeakPopup {
    pub fn upgrade(&self) -> Option<Popup> {
        self.inner.upgrade().map(|inner| Popup { inner })
    }
}

impl fmt::Debug for WeakPopup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(popup) => write!(f, "WeakPopup({})", popup.id()),
            None => f.write_str("WeakPopup(dropped)"),
        }
    }
}

impl fmt::Debug for Popup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Popup")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for Popup {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Popup {}

impl Popup {
    pub fn new(
        surface: Rc<dyn Surface>,
        container: Rc<PopupContainer>,
        clock: Rc<dyn FrameClock>,
        options: &PopupOptions,
    ) -> Self {
        let popup = Self {
            inner: Rc::new(Inner {
                id: PopupId::next(),
                events: Rc::new(EventTarget::new()),
                surface,
                container,
                clock,
                open_class: options.open_class.clone(),
                policy: options.policy,
                lifecycle: RefCell::new(Lifecycle::default()),
                content: RefCell::new(None),
                closable_guard: Cell::new(None),
                background_closable: Cell::new(options.background_closable),
            }),
        };
        popup.set_closable(options.closable);
        popup
    }

    pub fn id(&self) -> PopupId {
        self.inner.id
    }

    pub fn state(&self) -> PopupState {
        self.inner.lifecycle.borrow().state
    }

    /// Listener registry for this popup's notifications.
    pub fn events(&self) -> &EventTarget {
        &self.inner.events
    }

    pub fn surface(&self) -> &Rc<dyn Surface> {
        &self.inner.surface
    }

    pub fn downgrade(&self) -> WeakPopup {
        WeakPopup {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// True while content is mounted (any state other than closed).
    pub fn has_content(&self) -> bool {
        self.inner.content.borrow().is_some()
    }

    /// Run `f` with the mounted content object, if the host exposes one.
    pub fn with_content<R>(&self, f: impl FnOnce(&dyn Any) -> R) -> Option<R> {
        let content = self.inner.content.borrow();
        content.as_ref().and_then(|m| m.content()).map(f)
    }

    pub fn is_closable(&self) -> bool {
        self.inner.closable_guard.get().is_none()
    }

    /// Disallow or re-allow closing.
    ///
    /// While not closable, a `beforeclose` listener prevents every close, so
    /// `close()` rejects with [`Error::ClosePrevented`].
    pub fn set_closable(&self, closable: bool) {
        match (closable, self.inner.closable_guard.get()) {
            (false, None) => {
                let id = self.inner.events.on(EventKind::BeforeClose, |e| e.prevent_default());
                self.inner.closable_guard.set(Some(id));
            }
            (true, Some(id)) => {
                self.inner.events.remove_listener(id);
                self.inner.closable_guard.set(None);
            }
            _ => {}
        }
    }

    pub fn is_background_closable(&self) -> bool {
        self.inner.background_closable.get()
    }

    pub fn set_background_closable(&self, value: bool) {
        self.inner.background_closable.set(value);
    }

    /// Host entry point for clicks on the popup.
    ///
    /// A background click on a background-closable popup starts a close and
    /// returns its handle.
    pub fn click(&self, target: ClickTarget) -> Option<Deferred<()>> {
        if target != ClickTarget::Background || !self.is_background_closable() {
            return None;
        }
        Some(self.close(true, Some(json!({ "source": "background" }))))
    }

    /// Host entry point for the surface's transition-end signal.
    pub fn transition_end(&self) {
        self.inner.events.emit(EventKind::TransitionEnd, None);
    }

    /// Fire `ready` on the next frame, once the popup's surface is laid out.
    pub(crate) fn announce_ready(&self) {
        let weak = self.downgrade();
        let frame = self.inner.clock.next_frame();
        tokio::task::spawn_local(async move {
            frame.await;
            if let Some(popup) = weak.upgrade() {
                popup.inner.events.emit(EventKind::Ready, None);
            }
        });
    }

    /// Open the popup and mount `config` as its content.
    ///
    /// Calling this while an open is already in flight returns that open's
    /// handle. Opening a closing popup cancels the close.
    pub fn open(
        &self,
        config: ContentConfig,
        wait_for_transition: bool,
        detail: Option<Detail>,
    ) -> Deferred<()> {
        if let Some(pending) = self.inner.lifecycle.borrow().opening.clone() {
            debug!(popup = %self.id(), "open already in flight");
            return pending;
        }

        let op = Deferred::new();
        let start = {
            let mut lifecycle = self.inner.lifecycle.borrow_mut();
            lifecycle.opening = Some(op.clone());
            lifecycle.state
        };
        match start {
            PopupState::Closed | PopupState::Closing => {
                self.begin_open(&op, config, wait_for_transition, detail);
            }
            PopupState::Opening | PopupState::Opened => self.fail_open(&op, Error::NotClosed),
        }
        op
    }

    /// Close the popup.
    ///
    /// Calling this while a close is already in flight returns that close's
    /// handle. Closing an opening popup cancels the open.
    pub fn close(&self, wait_for_transition: bool, detail: Option<Detail>) -> Deferred<()> {
        if let Some(pending) = self.inner.lifecycle.borrow().closing.clone() {
            debug!(popup = %self.id(), "close already in flight");
            return pending;
        }

        let op = Deferred::new();
        let start = {
            let mut lifecycle = self.inner.lifecycle.borrow_mut();
            lifecycle.closing = Some(op.clone());
            lifecycle.state
        };
        match start {
            PopupState::Opened | PopupState::Opening => {
                self.begin_close(&op, wait_for_transition, detail);
            }
            PopupState::Closed | PopupState::Closing => self.fail_close(&op, Error::NotOpened),
        }
        op
    }

    fn begin_open(
        &self,
        op: &Deferred<()>,
        config: ContentConfig,
        wait_for_transition: bool,
        detail: Option<Detail>,
    ) {
        let mut before = Event::cancelable(EventKind::BeforeOpen).with_detail(detail.clone());
        if !self.inner.events.dispatch(&mut before) {
            debug!(popup = %self.id(), "open prevented by listener");
            self.fail_open(op, Error::OpenPrevented);
            return;
        }
        if !op.is_pending() {
            return;
        }

        let interrupts_close = self.state() == PopupState::Closing;
        if interrupts_close {
            self.inner.events.emit(EventKind::CancelClose, None);
            let cancelled = self.inner.lifecycle.borrow_mut().closing.take();
            if let Some(close) = cancelled {
                debug!(popup = %self.id(), "open cancels in-flight close");
                close.reject(Error::CloseCancelled);
            }
        }

        self.inner.lifecycle.borrow_mut().enter(PopupState::Opening);
        debug!(popup = %self.id(), content = %config.content_type, "opening");

        if let Err(err) = self.mount_content(config) {
            warn!(popup = %self.id(), error = %err, "content mount failed");
            self.inner.lifecycle.borrow_mut().enter(PopupState::Closed);
            self.fail_open(op, err);
            if interrupts_close {
                // the cancelled close never got to announce it; the popup is closed now
                self.inner.events.emit(EventKind::Close, None);
            }
            return;
        }

        let weak = self.downgrade();
        let op = op.clone();
        let frame = self.inner.clock.next_frame();
        tokio::task::spawn_local(async move {
            frame.await;
            let Some(popup) = weak.upgrade() else { return };
            if !popup.inner.lifecycle.borrow().is_current_open(&op) {
                return;
            }
            popup.inner.surface.set_class(&popup.inner.open_class, true);
            if wait_for_transition {
                let finished = popup.transition_finished();
                drop(popup);
                finished.await;
                let Some(popup) = weak.upgrade() else { return };
                popup.finish_open(&op, detail);
            } else {
                popup.finish_open(&op, detail);
            }
        });
    }

    fn begin_close(&self, op: &Deferred<()>, wait_for_transition: bool, detail: Option<Detail>) {
        let mut before = Event::cancelable(EventKind::BeforeClose).with_detail(detail.clone());
        if !self.inner.events.dispatch(&mut before) {
            debug!(popup = %self.id(), "close prevented by listener");
            self.fail_close(op, Error::ClosePrevented);
            return;
        }
        if !op.is_pending() {
            return;
        }

        if self.state() == PopupState::Opening {
            self.inner.events.emit(EventKind::CancelOpen, None);
            let cancelled = self.inner.lifecycle.borrow_mut().opening.take();
            if let Some(open) = cancelled {
                debug!(popup = %self.id(), "close cancels in-flight open");
                open.reject(Error::OpenCancelled);
            }
        }

        self.inner.lifecycle.borrow_mut().enter(PopupState::Closing);
        self.inner.surface.set_class(&self.inner.open_class, false);
        debug!(popup = %self.id(), "closing");

        if !wait_for_transition {
            self.finish_close(op, detail);
            return;
        }
        let finished = self.transition_finished();
        let weak = self.downgrade();
        let op = op.clone();
        tokio::task::spawn_local(async move {
            finished.await;
            if let Some(popup) = weak.upgrade() {
                popup.finish_close(&op, detail);
            }
        });
    }

    fn finish_open(&self, op: &Deferred<()>, detail: Option<Detail>) {
        {
            let mut lifecycle = self.inner.lifecycle.borrow_mut();
            if !lifecycle.release_open(op) {
                return;
            }
            lifecycle.enter(PopupState::Opened);
        }
        op.resolve(());
        debug!(popup = %self.id(), "opened");
        self.inner.events.emit(EventKind::Open, detail);
    }

    fn finish_close(&self, op: &Deferred<()>, detail: Option<Detail>) {
        {
            let mut lifecycle = self.inner.lifecycle.borrow_mut();
            if !lifecycle.release_close(op) {
                return;
            }
            lifecycle.enter(PopupState::Closed);
        }
        self.release_content();
        op.resolve(());
        debug!(popup = %self.id(), "closed");
        self.inner.events.emit(EventKind::Close, detail);
    }

    fn fail_open(&self, op: &Deferred<()>, err: Error) {
        self.inner.lifecycle.borrow_mut().release_open(op);
        op.reject(err);
    }

    fn fail_close(&self, op: &Deferred<()>, err: Error) {
        self.inner.lifecycle.borrow_mut().release_close(op);
        op.reject(err);
    }

    fn transition_finished(&self) -> impl std::future::Future<Output = ()> + 'static {
        let computed = self.inner.surface.transition_duration();
        let plan = self.inner.policy.plan(computed.as_deref());
        wait::transition_finished(&self.inner.events, plan)
    }

    /// Replace any mounted content with a fresh mount of `config`.
    ///
    /// A caller-supplied `popup` input is dropped; the back-reference travels in
    /// [`MountRequest::popup`] instead.
    fn mount_content(&self, mut config: ContentConfig) -> Result<(), Error> {
        self.release_content();
        if config.inputs.remove(POPUP_INPUT).is_some() {
            debug!(popup = %self.id(), "replacing caller-supplied popup input");
        }
        let request = MountRequest {
            config,
            popup: self.downgrade(),
        };
        let mounted = self
            .inner
            .container
            .create(request)
            .map_err(|e| Error::mount(&e))?;
        *self.inner.content.borrow_mut() = Some(mounted);
        Ok(())
    }

    /// Destroy the mounted content, if any.
    fn release_content(&self) {
        let previous = self.inner.content.borrow_mut().take();
        if let Some(mut mounted) = previous {
            mounted.destroy();
        }
    }

    /// Drop the popup without transitions.
    ///
    /// Any in-flight open or close rejects with [`Error::Abandoned`] and the
    /// popup ends `closed` with no content. No notifications fire.
    pub(crate) fn abandon(&self) {
        let (opening, closing) = {
            let mut lifecycle = self.inner.lifecycle.borrow_mut();
            if lifecycle.state != PopupState::Closed {
                lifecycle.enter(PopupState::Closed);
            }
            (lifecycle.opening.take(), lifecycle.closing.take())
        };
        self.inner.surface.set_class(&self.inner.open_class, false);
        self.release_content();
        for op in opening.into_iter().chain(closing) {
            op.reject(Error::Abandoned);
        }
        debug!(popup = %self.id(), "abandoned");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessContainer, HeadlessContent, HeadlessStage};
    use popups_core::host::Stage;
    use popups_core::Status;
    use std::time::Duration;
    use tokio::task::LocalSet;
    use tokio::time::Instant;

    fn make_popup(stage: &HeadlessStage) -> Popup {
        popup_with(stage, &PopupOptions::default())
    }

    fn popup_with(stage: &HeadlessStage, options: &PopupOptions) -> Popup {
        let slot = stage.mount_popup().unwrap();
        Popup::new(slot.surface, slot.container, stage.clock(), options)
    }

    fn record(popup: &Popup, kinds: &[EventKind]) -> Rc<RefCell<Vec<String>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        for &kind in kinds {
            let log = Rc::clone(&log);
            popup.events().on(kind, move |e| {
                log.borrow_mut().push(e.kind().to_string());
            });
        }
        log
    }

    fn alert() -> ContentConfig {
        ContentConfig::new("alert")
    }

    async fn run_local<F: std::future::Future>(f: F) -> F::Output {
        LocalSet::new().run_until(f).await
    }

    // --- opening ---

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn open_resolves_and_fires_open_once() {
        run_local(async {
            let stage = HeadlessStage::new();
            let popup = make_popup(&stage);
            let log = record(&popup, &[EventKind::BeforeOpen, EventKind::Open]);

            let op = popup.open(alert(), true, None);
            assert_eq!(popup.state(), PopupState::Opening);
            assert_eq!(op.await, Ok(()));

            assert_eq!(popup.state(), PopupState::Opened);
            assert_eq!(*log.borrow(), vec!["beforeopen", "open"]);
            assert!(popup.surface().has_class("open"));
            assert!(popup.has_content());
        })
        .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn open_class_waits_for_next_frame() {
        run_local(async {
            let stage = HeadlessStage::new();
            let popup = make_popup(&stage);
            let op = popup.open(alert(), false, None);
            assert!(!popup.surface().has_class("open"));
            op.await.unwrap();
            assert!(popup.surface().has_class("open"));
        })
        .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn concurrent_opens_coalesce() {
        run_local(async {
            let stage = HeadlessStage::new();
            let popup = make_popup(&stage);
            let first = popup.open(alert(), true, None);
            let second = popup.open(ContentConfig::new("other"), true, None);
            assert!(first.ptr_eq(&second));
            first.await.unwrap();
            assert_eq!(stage.log().contents_mounted(), 1);
        })
        .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn opening_an_opened_popup_is_rejected() {
        run_local(async {
            let stage = HeadlessStage::new();
            let popup = make_popup(&stage);
            popup.open(alert(), false, None).await.unwrap();

            let again = popup.open(alert(), false, None);
            assert_eq!(again.status(), Status::Rejected);
            assert_eq!(again.await, Err(Error::NotClosed));
            assert_eq!(popup.state(), PopupState::Opened);
        })
        .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn prevented_open_leaves_state_unchanged() {
        run_local(async {
            let stage = HeadlessStage::new();
            let popup = make_popup(&stage);
            let veto = popup.events().on(EventKind::BeforeOpen, |e| e.prevent_default());

            assert_eq!(popup.open(alert(), true, None).await, Err(Error::OpenPrevented));
            assert_eq!(popup.state(), PopupState::Closed);
            assert!(!popup.has_content());

            popup.events().remove_listener(veto);
            assert_eq!(popup.open(alert(), false, None).await, Ok(()));
        })
        .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn open_detail_reaches_listeners() {
        run_local(async {
            let stage = HeadlessStage::new();
            let popup = make_popup(&stage);
            let seen = Rc::new(RefCell::new(Vec::new()));
            for kind in [EventKind::BeforeOpen, EventKind::Open] {
                let seen = Rc::clone(&seen);
                popup.events().on(kind, move |e| seen.borrow_mut().push(e.detail().cloned()));
            }
            popup.open(alert(), false, Some(json!("menu"))).await.unwrap();
            assert_eq!(*seen.borrow(), vec![Some(json!("menu")), Some(json!("menu"))]);
        })
        .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn content_receives_popup_back_reference() {
        run_local(async {
            let stage = HeadlessStage::new();
            let popup = make_popup(&stage);
            popup
                .open(alert().input("title", "Hi"), false, None)
                .await
                .unwrap();
            let back = popup
                .with_content(|c| {
                    let content = c.downcast_ref::<HeadlessContent>().unwrap();
                    assert_eq!(content.config.inputs["title"], json!("Hi"));
                    content.popup.upgrade()
                })
                .flatten();
            assert_eq!(back, Some(popup.clone()));
        })
        .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn mount_failure_rejects_and_returns_to_closed() {
        run_local(async {
            let stage = HeadlessStage::new();
            let popup = make_popup(&stage);
            let result = popup.open(ContentConfig::new(HeadlessContainer::FAILING), true, None).await;
            assert!(matches!(result, Err(Error::Mount(_))));
            assert_eq!(popup.state(), PopupState::Closed);
        })
        .await;
    }

    // --- closing ---

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn close_after_open_reaches_closed() {
        run_local(async {
            let stage = HeadlessStage::new();
            let popup = make_popup(&stage);
            let log = record(&popup, &[EventKind::BeforeClose, EventKind::Close]);
            popup.open(alert(), true, None).await.unwrap();

            let op = popup.close(true, None);
            assert_eq!(popup.state(), PopupState::Closing);
            assert!(!popup.surface().has_class("open"));
            assert_eq!(op.await, Ok(()));

            assert_eq!(popup.state(), PopupState::Closed);
            assert_eq!(*log.borrow(), vec!["beforeclose", "close"]);
            assert!(!popup.has_content());
            assert_eq!(stage.log().live_contents(), 0);
        })
        .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn closing_a_closed_popup_is_rejected() {
        run_local(async {
            let stage = HeadlessStage::new();
            let popup = make_popup(&stage);
            assert_eq!(popup.close(true, None).await, Err(Error::NotOpened));
            assert_eq!(popup.state(), PopupState::Closed);
        })
        .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn concurrent_closes_coalesce() {
        run_local(async {
            let stage = HeadlessStage::new().with_transition("0.2s");
            let popup = make_popup(&stage);
            popup.open(alert(), false, None).await.unwrap();
            let first = popup.close(true, None);
            let second = popup.close(false, None);
            assert!(first.ptr_eq(&second));
            assert_eq!(second.await, Ok(()));
        })
        .await;
    }

    // --- mutual cancellation ---

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn open_while_closing_cancels_the_close() {
        run_local(async {
            let stage = HeadlessStage::new().with_transition("0.3s");
            let popup = make_popup(&stage);
            popup.open(alert(), false, None).await.unwrap();
            let log = record(&popup, &[EventKind::CancelClose, EventKind::Close, EventKind::Open]);

            let close = popup.close(true, None);
            let open = popup.open(alert(), true, None);

            assert_eq!(close.status(), Status::Rejected);
            assert_eq!(close.await, Err(Error::CloseCancelled));
            assert_eq!(popup.state(), PopupState::Opening);
            assert_eq!(open.await, Ok(()));
            assert_eq!(popup.state(), PopupState::Opened);

            // let the cancelled close's timer lapse; it must not close the popup
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(popup.state(), PopupState::Opened);
            assert_eq!(*log.borrow(), vec!["cancelclose", "open"]);
        })
        .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn close_while_opening_cancels_the_open() {
        run_local(async {
            let stage = HeadlessStage::new().with_transition("0.3s");
            let popup = make_popup(&stage);
            let log = record(&popup, &[EventKind::CancelOpen, EventKind::Open, EventKind::Close]);

            let open = popup.open(alert(), true, None);
            let close = popup.close(true, None);

            assert_eq!(open.await, Err(Error::OpenCancelled));
            assert_eq!(close.await, Ok(()));
            assert_eq!(popup.state(), PopupState::Closed);

            tokio::time::sleep(Duration::from_secs(1)).await;
            assert!(!popup.surface().has_class("open"));
            assert_eq!(*log.borrow(), vec!["cancelopen", "close"]);
        })
        .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn cancellation_fires_before_the_preempting_transition() {
        run_local(async {
            let stage = HeadlessStage::new();
            let popup = make_popup(&stage);
            let order = record(&popup, &[EventKind::BeforeClose, EventKind::CancelOpen]);
            let _open = popup.open(alert(), true, None);
            let _close = popup.close(true, None);
            assert_eq!(*order.borrow(), vec!["beforeclose", "cancelopen"]);
        })
        .await;
    }

    // --- closable ---

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn non_closable_popup_rejects_close() {
        run_local(async {
            let stage = HeadlessStage::new();
            let popup = make_popup(&stage);
            popup.open(alert(), false, None).await.unwrap();

            popup.set_closable(false);
            popup.set_closable(false);
            assert!(!popup.is_closable());
            assert_eq!(popup.close(true, None).await, Err(Error::ClosePrevented));
            assert_eq!(popup.state(), PopupState::Opened);
            assert_eq!(popup.events().listener_count(EventKind::BeforeClose), 1);

            popup.set_closable(true);
            assert!(popup.is_closable());
            assert_eq!(popup.close(true, None).await, Ok(()));
            assert_eq!(popup.state(), PopupState::Closed);
        })
        .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn closable_option_applies_at_construction() {
        run_local(async {
            let stage = HeadlessStage::new();
            let options = PopupOptions {
                closable: false,
                ..PopupOptions::default()
            };
            let popup = popup_with(&stage, &options);
            popup.open(alert(), false, None).await.unwrap();
            assert_eq!(popup.close(false, None).await, Err(Error::ClosePrevented));
        })
        .await;
    }

    // --- background clicks ---

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn background_click_closes() {
        run_local(async {
            let stage = HeadlessStage::new();
            let popup = make_popup(&stage);
            popup.open(alert(), false, None).await.unwrap();

            assert!(popup.click(ClickTarget::Content).is_none());
            assert_eq!(popup.state(), PopupState::Opened);

            let op = popup.click(ClickTarget::Background).expect("close started");
            assert_eq!(op.await, Ok(()));
            assert_eq!(popup.state(), PopupState::Closed);
        })
        .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn background_click_ignored_when_disabled() {
        run_local(async {
            let stage = HeadlessStage::new();
            let popup = make_popup(&stage);
            popup.open(alert(), false, None).await.unwrap();
            popup.set_background_closable(false);
            assert!(popup.click(ClickTarget::Background).is_none());
            assert_eq!(popup.state(), PopupState::Opened);
        })
        .await;
    }

    // --- transition timing ---

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn close_waits_for_declared_duration() {
        run_local(async {
            let stage = HeadlessStage::new().with_transition("0.3s");
            let popup = make_popup(&stage);
            popup.open(alert(), false, None).await.unwrap();

            let start = Instant::now();
            popup.close(true, None).await.unwrap();
            let elapsed = start.elapsed();
            assert!(elapsed >= Duration::from_millis(300));
            assert!(elapsed < Duration::from_millis(320));
        })
        .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn transition_end_signal_settles_early() {
        run_local(async {
            let stage = HeadlessStage::new().with_transition("5s");
            let popup = make_popup(&stage);
            popup.open(alert(), false, None).await.unwrap();

            let start = Instant::now();
            let op = popup.close(true, None);
            popup.transition_end();
            op.await.unwrap();
            assert!(start.elapsed() < Duration::from_secs(1));
        })
        .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn zero_duration_closes_without_waiting() {
        run_local(async {
            let stage = HeadlessStage::new().with_transition("0ms");
            let popup = make_popup(&stage);
            popup.open(alert(), false, None).await.unwrap();
            let start = Instant::now();
            popup.close(true, None).await.unwrap();
            assert_eq!(start.elapsed(), Duration::ZERO);
        })
        .await;
    }

    // --- worked example ---

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn close_then_reopen_ends_opened() {
        run_local(async {
            let stage = HeadlessStage::new().with_transition("0.25s");
            let popup = make_popup(&stage);
            let opens = record(&popup, &[EventKind::Open]);

            let first = popup.open(alert(), true, None);
            let again = popup.open(alert(), true, None);
            assert!(first.ptr_eq(&again));
            first.await.unwrap();
            assert_eq!(stage.log().contents_mounted(), 1);

            let close = popup.close(true, None);
            let reopen = popup.open(alert(), true, None);
            assert_eq!(close.await, Err(Error::CloseCancelled));
            assert_eq!(reopen.await, Ok(()));
            assert_eq!(popup.state(), PopupState::Opened);
            assert_eq!(opens.borrow().len(), 2);
            assert_eq!(stage.log().live_contents(), 1);
        })
        .await;
    }

    // --- state graph ---

    #[derive(Debug, Clone, Copy)]
    enum Step {
        Open { wait: bool },
        Close { wait: bool },
        Settle,
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn mixed_sequences_only_follow_legal_edges() {
        use PopupState::*;
        use Step::*;

        let cases: &[(&[Step], PopupState)] = &[
            (&[Open { wait: true }, Settle, Close { wait: true }, Settle], Closed),
            (
                &[
                    Open { wait: true },
                    Close { wait: true },
                    Open { wait: false },
                    Settle,
                    Close { wait: false },
                ],
                Closed,
            ),
            (
                &[Open { wait: false }, Close { wait: false }, Open { wait: true }, Settle],
                Opened,
            ),
            (
                &[
                    Open { wait: true },
                    Settle,
                    Close { wait: true },
                    Open { wait: true },
                    Close { wait: false },
                    Settle,
                    Open { wait: true },
                    Settle,
                ],
                Opened,
            ),
            (
                &[
                    Close { wait: true },
                    Open { wait: true },
                    Open { wait: true },
                    Close { wait: true },
                    Close { wait: false },
                    Settle,
                ],
                Closed,
            ),
        ];

        run_local(async {
            for (steps, expected) in cases {
                let stage = HeadlessStage::new().with_transition("0.2s");
                let popup = make_popup(&stage);
                for step in *steps {
                    match *step {
                        Open { wait } => {
                            let _ = popup.open(alert(), wait, None);
                        }
                        Close { wait } => {
                            let _ = popup.close(wait, None);
                        }
                        Settle => tokio::time::sleep(Duration::from_secs(1)).await,
                    }
                }

                let mut visited = vec![Closed];
                visited.extend(popup.inner.lifecycle.borrow().history.iter().copied());
                for edge in visited.windows(2) {
                    assert!(
                        edge[0].can_become(edge[1]),
                        "illegal edge {} -> {} in {steps:?}",
                        edge[0],
                        edge[1]
                    );
                }
                assert_eq!(popup.state(), *expected, "final state for {steps:?}");
            }
        })
        .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn caller_supplied_popup_input_is_replaced() {
        run_local(async {
            let stage = HeadlessStage::new();
            let popup = make_popup(&stage);
            let config = alert().input(POPUP_INPUT, "spoofed").input("title", "Hi");
            popup.open(config, false, None).await.unwrap();

            let (inputs, back) = popup
                .with_content(|c| {
                    let content = c.downcast_ref::<HeadlessContent>().unwrap();
                    (content.config.inputs.clone(), content.popup.upgrade())
                })
                .unwrap();
            assert!(!inputs.contains_key(POPUP_INPUT));
            assert_eq!(inputs["title"], json!("Hi"));
            assert_eq!(back, Some(popup.clone()));
        })
        .await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn duration_is_read_when_each_transition_starts() {
        run_local(async {
            let stage = HeadlessStage::new();
            let popup = make_popup(&stage);
            popup.open(alert(), true, None).await.unwrap();

            stage.popup_surfaces()[0].set_transition(Some("0.3s".into()));
            let start = Instant::now();
            popup.close(true, None).await.unwrap();
            assert!(start.elapsed() >= Duration::from_millis(300));
        })
        .await;
    }
}
