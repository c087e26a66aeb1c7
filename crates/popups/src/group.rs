//! Popups that are live at the same time under one mount point.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use popups_core::config::Config;
use popups_core::host::{ContentConfig, Mounted, PopupSlot, Stage, Surface};
use popups_core::{Deferred, Detail, Error, EventKind, Result};
use tracing::{debug, warn};

use crate::popup::{Popup, PopupId, PopupOptions, PopupState, WeakPopup};
use crate::registry::{PopupRegistry, WeakRegistry};

static NEXT_GROUP: AtomicU64 = AtomicU64::new(1);

/// Outcome of [`PopupGroup::close_all`], one entry per popup that was live.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseAllReport {
    pub results: Vec<(PopupId, Result<()>)>,
}

impl CloseAllReport {
    /// True when every close resolved.
    pub fn is_complete(&self) -> bool {
        self.results.iter().all(|(_, r)| r.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (PopupId, &Error)> + '_ {
        self.results
            .iter()
            .filter_map(|(id, r)| r.as_ref().err().map(|e| (*id, e)))
    }

    pub fn closed(&self) -> impl Iterator<Item = PopupId> + '_ {
        self.results
            .iter()
            .filter(|(_, r)| r.is_ok())
            .map(|(id, _)| *id)
    }
}

struct LiveEntry {
    popup: Popup,
    slot: Box<dyn Mounted>,
}

struct Registration {
    registry: WeakRegistry,
    id: String,
}

struct GroupInner {
    id: String,
    stage: Rc<dyn Stage<WeakPopup>>,
    surface: Rc<dyn Surface>,
    visible_class: String,
    options: PopupOptions,
    live: RefCell<Vec<LiveEntry>>,
    registration: RefCell<Option<Registration>>,
}

/// Owns the popups opened on one [`Stage`] and keeps the stage's visibility
/// class in sync with them.
#[derive(Clone)]
pub struct PopupGroup {
    inner: Rc<GroupInner>,
}

impl std::fmt::Debug for PopupGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PopupGroup")
            .field("id", &self.inner.id)
            .field("live", &self.len())
            .finish()
    }
}

impl PopupGroup {
    /// Create a group and register it with this thread's global registry.
    pub fn new(stage: Rc<dyn Stage<WeakPopup>>, config: &Config) -> Result<Self> {
        Self::register(&PopupRegistry::global(), None, stage, config)
    }

    /// Create a group and register it with `registry`.
    ///
    /// Without an explicit `id` one is generated from `config.group.id_prefix`.
    pub fn register(
        registry: &PopupRegistry,
        id: Option<&str>,
        stage: Rc<dyn Stage<WeakPopup>>,
        config: &Config,
    ) -> Result<Self> {
        let id = match id {
            Some(id) => id.to_string(),
            None => format!(
                "{}-{}",
                config.group.id_prefix,
                NEXT_GROUP.fetch_add(1, Ordering::Relaxed)
            ),
        };
        let group = Self::detached(id.clone(), stage, config);
        registry.register_manager(&id, group.clone())?;
        Ok(group)
    }

    /// A group that belongs to no registry.
    pub fn detached(id: impl Into<String>, stage: Rc<dyn Stage<WeakPopup>>, config: &Config) -> Self {
        let group = Self {
            inner: Rc::new(GroupInner {
                id: id.into(),
                surface: stage.surface(),
                stage,
                visible_class: config.group.visible_class.clone(),
                options: PopupOptions::from(config),
                live: RefCell::new(Vec::new()),
                registration: RefCell::new(None),
            }),
        };
        group.refresh_visibility();
        group
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn len(&self) -> usize {
        self.inner.live.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_visible(&self) -> bool {
        self.inner.surface.has_class(&self.inner.visible_class)
    }

    /// Live popups in creation order.
    pub fn popups(&self) -> Vec<Popup> {
        self.inner
            .live
            .borrow()
            .iter()
            .map(|e| e.popup.clone())
            .collect()
    }

    pub(crate) fn attach(&self, registry: WeakRegistry, id: &str) {
        *self.inner.registration.borrow_mut() = Some(Registration {
            registry,
            id: id.to_string(),
        });
    }

    /// Mount a new popup and open `config` in it once it is ready.
    ///
    /// The handle resolves with the popup after its open transition finished.
    pub fn open(
        &self,
        config: ContentConfig,
        wait_for_transition: bool,
        detail: Option<Detail>,
    ) -> Deferred<Popup> {
        let PopupSlot {
            surface,
            container,
            mounted,
        } = match self.inner.stage.mount_popup() {
            Ok(slot) => slot,
            Err(err) => {
                warn!(group = %self.inner.id, error = %format!("{err:#}"), "popup mount failed");
                return Deferred::rejected(Error::mount(&err));
            }
        };

        let popup = Popup::new(surface, container, self.inner.stage.clock(), &self.inner.options);
        self.inner.live.borrow_mut().push(LiveEntry {
            popup: popup.clone(),
            slot: mounted,
        });
        self.refresh_visibility();
        debug!(group = %self.inner.id, popup = %popup.id(), live = self.len(), "popup added");

        let group = Rc::downgrade(&self.inner);
        let id = popup.id();
        popup.events().once(EventKind::Close, move |_| {
            if let Some(inner) = group.upgrade() {
                PopupGroup { inner }.remove(id);
            }
        });

        let result = Deferred::new();
        let target = result.clone();
        let request = Cell::new(Some((config, detail)));
        let weak = popup.downgrade();
        let group = Rc::downgrade(&self.inner);
        popup.events().once(EventKind::Ready, move |_| {
            let (Some(popup), Some((config, detail))) = (weak.upgrade(), request.take()) else {
                return;
            };
            let owned = group
                .upgrade()
                .is_some_and(|inner| PopupGroup { inner }.contains(popup.id()));
            if !owned {
                target.reject(Error::Abandoned);
                return;
            }
            let opening = popup.open(config, wait_for_transition, detail);
            let target = target.clone();
            let group = group.clone();
            tokio::task::spawn_local(async move {
                match opening.await {
                    Ok(()) => {
                        target.resolve(popup);
                    }
                    Err(err) => {
                        // A first open that never left `closed` would leave a dead entry behind.
                        if !err.is_cancelled() && popup.state() == PopupState::Closed {
                            if let Some(inner) = group.upgrade() {
                                PopupGroup { inner }.remove(popup.id());
                            }
                        }
                        target.reject(err);
                    }
                }
            });
        });
        popup.announce_ready();
        result
    }

    pub fn close(
        &self,
        popup: &Popup,
        wait_for_transition: bool,
        detail: Option<Detail>,
    ) -> Deferred<()> {
        popup.close(wait_for_transition, detail)
    }

    /// Close every live popup.
    ///
    /// The closes are issued before this returns; the future completes once
    /// all of them have settled and reports each outcome.
    pub fn close_all(&self) -> impl Future<Output = CloseAllReport> + 'static {
        let closes: Vec<(PopupId, Deferred<()>)> = self
            .popups()
            .iter()
            .map(|popup| (popup.id(), popup.close(true, None)))
            .collect();
        debug!(group = %self.inner.id, count = closes.len(), "closing all popups");
        async move {
            let (ids, ops): (Vec<_>, Vec<_>) = closes.into_iter().unzip();
            let outcomes = join_all(ops.iter().map(Deferred::wait)).await;
            CloseAllReport {
                results: ids.into_iter().zip(outcomes).collect(),
            }
        }
    }

    /// Tear down every live popup without transitions and leave the registry.
    ///
    /// Opens and closes still in flight reject with [`Error::Abandoned`].
    pub fn destroy(&self) {
        let entries: Vec<LiveEntry> = self.inner.live.borrow_mut().drain(..).collect();
        for mut entry in entries {
            entry.popup.abandon();
            entry.slot.destroy();
        }
        self.refresh_visibility();

        let registration = self.inner.registration.borrow_mut().take();
        if let Some(Registration { registry, id }) = registration {
            if let Some(registry) = registry.upgrade() {
                registry.unregister_manager(&id);
            }
        }
        debug!(group = %self.inner.id, "group destroyed");
    }

    fn contains(&self, id: PopupId) -> bool {
        self.inner.live.borrow().iter().any(|e| e.popup.id() == id)
    }

    fn remove(&self, id: PopupId) {
        let entry = {
            let mut live = self.inner.live.borrow_mut();
            live.iter()
                .position(|e| e.popup.id() == id)
                .map(|index| live.remove(index))
        };
        let Some(mut entry) = entry else { return };
        entry.slot.destroy();
        self.refresh_visibility();
        debug!(group = %self.inner.id, popup = %id, live = self.len(), "popup removed");
    }

    fn refresh_visibility(&self) {
        let visible = !self.inner.live.borrow().is_empty();
        self.inner.surface.set_class(&self.inner.visible_class, visible);
    }
}
