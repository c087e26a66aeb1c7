use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;

use popups_core::transition::TransitionWait;
use popups_core::{EventKind, EventTarget};
use tokio::sync::oneshot;
use tracing::trace;

/// Wait for a transition to finish according to `plan`.
///
/// The `transitionend` listener is registered before this returns, so a signal
/// arriving before the future is first polled still counts. Whichever of the
/// signal and the timer fires first completes the wait; the listener is removed
/// afterwards either way.
pub(crate) fn transition_finished(
    events: &Rc<EventTarget>,
    plan: TransitionWait,
) -> impl Future<Output = ()> + 'static {
    let armed = match plan {
        TransitionWait::Immediate => None,
        TransitionWait::Bounded(limit) => {
            let (tx, rx) = oneshot::channel::<()>();
            let tx = Cell::new(Some(tx));
            let id = events.once(EventKind::TransitionEnd, move |_| {
                if let Some(tx) = tx.take() {
                    let _ = tx.send(());
                }
            });
            Some((Rc::clone(events), id, limit, rx))
        }
    };

    async move {
        let Some((events, id, limit, rx)) = armed else {
            return;
        };
        tokio::select! {
            _ = tokio::time::sleep(limit) => {
                trace!(limit_ms = limit.as_millis() as u64, "transition wait hit its bound");
            }
            _ = rx => {
                trace!("transitionend received");
            }
        }
        events.remove_listener(id);
    }
}
