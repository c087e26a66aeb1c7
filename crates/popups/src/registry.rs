//! Named popup groups and the thread's default routing.

use std::cell::RefCell;
use std::future::Future;
use std::rc::{Rc, Weak};

use popups_core::host::ContentConfig;
use popups_core::{Deferred, Detail, Error, Result};
use tracing::debug;

use crate::group::{CloseAllReport, PopupGroup};
use crate::popup::Popup;

thread_local! {
    static GLOBAL: PopupRegistry = PopupRegistry::new();
}

#[derive(Default)]
struct RegistryInner {
    groups: RefCell<Vec<(String, PopupGroup)>>,
}

/// Groups by id, in registration order.
///
/// Requests that name no group go to the first one registered.
#[derive(Clone, Default)]
pub struct PopupRegistry {
    inner: Rc<RegistryInner>,
}

#[derive(Clone)]
pub(crate) struct WeakRegistry(Weak<RegistryInner>);

impl WeakRegistry {
    pub(crate) fn upgrade(&self) -> Option<PopupRegistry> {
        self.0.upgrade().map(|inner| PopupRegistry { inner })
    }
}

impl std::fmt::Debug for PopupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PopupRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

impl PopupRegistry {
    /// An empty registry, independent of [`PopupRegistry::global`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by everything on the current thread.
    pub fn global() -> Self {
        GLOBAL.with(Clone::clone)
    }

    pub fn register_manager(&self, id: &str, group: PopupGroup) -> Result<()> {
        let mut groups = self.inner.groups.borrow_mut();
        if groups.iter().any(|(existing, _)| existing == id) {
            return Err(Error::DuplicateGroup(id.to_string()));
        }
        group.attach(WeakRegistry(Rc::downgrade(&self.inner)), id);
        groups.push((id.to_string(), group));
        debug!(group = id, count = groups.len(), "group registered");
        Ok(())
    }

    /// Remove and return the group registered as `id`.
    pub fn unregister_manager(&self, id: &str) -> Option<PopupGroup> {
        let mut groups = self.inner.groups.borrow_mut();
        let index = groups.iter().position(|(existing, _)| existing == id)?;
        debug!(group = id, "group unregistered");
        Some(groups.remove(index).1)
    }

    pub fn ids(&self) -> Vec<String> {
        self.inner
            .groups
            .borrow()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// The group registered as `id`, or the first-registered one for `None`.
    pub fn group(&self, id: Option<&str>) -> Result<PopupGroup> {
        let groups = self.inner.groups.borrow();
        match id {
            Some(id) => groups
                .iter()
                .find(|(existing, _)| existing == id)
                .map(|(_, group)| group.clone())
                .ok_or_else(|| Error::UnknownGroup(id.to_string())),
            None => groups
                .first()
                .map(|(_, group)| group.clone())
                .ok_or(Error::NoGroup),
        }
    }

    /// Open `config` in the group named `group_id` (or the default group).
    pub fn open(
        &self,
        config: ContentConfig,
        wait_for_transition: bool,
        detail: Option<Detail>,
        group_id: Option<&str>,
    ) -> Result<Deferred<Popup>> {
        let group = self.group(group_id)?;
        Ok(group.open(config, wait_for_transition, detail))
    }

    pub fn close(
        &self,
        popup: &Popup,
        wait_for_transition: bool,
        detail: Option<Detail>,
    ) -> Deferred<()> {
        popup.close(wait_for_transition, detail)
    }

    pub fn close_all(
        &self,
        group_id: Option<&str>,
    ) -> Result<impl Future<Output = CloseAllReport> + 'static> {
        Ok(self.group(group_id)?.close_all())
    }
}
