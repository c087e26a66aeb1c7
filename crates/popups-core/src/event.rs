//! Notification catalog and a minimal single-threaded event target.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

/// Free-form payload attached to a notification.
pub type Detail = Value;

/// Every notification a popup can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// First frame after the popup was mounted.
    Ready,
    /// Cancelable, before an open starts.
    BeforeOpen,
    /// An open finished.
    Open,
    /// An in-flight open was pre-empted by a close.
    CancelOpen,
    /// Cancelable, before a close starts.
    BeforeClose,
    /// A close finished.
    Close,
    /// An in-flight close was pre-empted by an open.
    CancelClose,
    /// The host reports the surface's visual transition finished.
    TransitionEnd,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::BeforeOpen => "beforeopen",
            Self::Open => "open",
            Self::CancelOpen => "cancelopen",
            Self::BeforeClose => "beforeclose",
            Self::Close => "close",
            Self::CancelClose => "cancelclose",
            Self::TransitionEnd => "transitionend",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dispatched notification.
#[derive(Debug, Clone)]
pub struct Event {
    kind: EventKind,
    detail: Option<Detail>,
    cancelable: bool,
    default_prevented: bool,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            detail: None,
            cancelable: false,
            default_prevented: false,
        }
    }

    /// A notification listeners may veto with [`Event::prevent_default`].
    pub fn cancelable(kind: EventKind) -> Self {
        Self {
            cancelable: true,
            ..Self::new(kind)
        }
    }

    pub fn with_detail(mut self, detail: Option<Detail>) -> Self {
        self.detail = detail;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn detail(&self) -> Option<&Detail> {
        self.detail.as_ref()
    }

    pub fn is_cancelable(&self) -> bool {
        self.cancelable
    }

    /// Veto the transition. Ignored on non-cancelable events.
    pub fn prevent_default(&mut self) {
        if self.cancelable {
            self.default_prevented = true;
        }
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented
    }
}

/// Registration options for [`EventTarget::add_listener`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    /// Remove the listener after its first invocation.
    pub once: bool,
}

impl ListenerOptions {
    pub const ONCE: Self = Self { once: true };
}

/// Token returned by [`EventTarget::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback = Rc<dyn Fn(&mut Event)>;

struct Listener {
    id: ListenerId,
    kind: EventKind,
    once: bool,
    callback: Callback,
}

/// Per-object listener registry.
///
/// Listeners are snapshotted before a dispatch, so callbacks may add or remove
/// listeners and re-enter the owning object freely. A listener added during a
/// dispatch is not invoked by that dispatch.
#[derive(Default)]
pub struct EventTarget {
    listeners: RefCell<Vec<Listener>>,
    next_id: Cell<u64>,
}

impl fmt::Debug for EventTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventTarget")
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}

impl EventTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(
        &self,
        kind: EventKind,
        options: ListenerOptions,
        callback: impl Fn(&mut Event) + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners.borrow_mut().push(Listener {
            id,
            kind,
            once: options.once,
            callback: Rc::new(callback),
        });
        id
    }

    /// Shorthand for a persistent listener.
    pub fn on(&self, kind: EventKind, callback: impl Fn(&mut Event) + 'static) -> ListenerId {
        self.add_listener(kind, ListenerOptions::default(), callback)
    }

    /// Shorthand for a one-shot listener.
    pub fn once(&self, kind: EventKind, callback: impl Fn(&mut Event) + 'static) -> ListenerId {
        self.add_listener(kind, ListenerOptions::ONCE, callback)
    }

    /// Returns false if `id` was not registered (or a once listener already ran).
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .borrow()
            .iter()
            .filter(|l| l.kind == kind)
            .count()
    }

    /// Invoke every listener for `event.kind()` in registration order.
    ///
    /// Returns false when the event was cancelable and a listener prevented it.
    pub fn dispatch(&self, event: &mut Event) -> bool {
        let snapshot: Vec<Callback> = {
            let mut listeners = self.listeners.borrow_mut();
            let matching = listeners
                .iter()
                .filter(|l| l.kind == event.kind)
                .map(|l| Rc::clone(&l.callback))
                .collect();
            listeners.retain(|l| !(l.once && l.kind == event.kind));
            matching
        };
        for callback in snapshot {
            callback(event);
        }
        !event.default_prevented()
    }

    /// Dispatch a fresh event of `kind` carrying `detail`.
    pub fn emit(&self, kind: EventKind, detail: Option<Detail>) -> bool {
        self.dispatch(&mut Event::new(kind).with_detail(detail))
    }
}
