//! Single-shot analysis completion callbacks.

use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;
use uuid::Uuid;

type Callback = Box<dyn FnOnce() + Send>;

/// A callback that runs at most once.
///
/// The scheduler keeps an `Arc` to every pending event until it fires, so
/// callers may drop their handle. `cancel` neutralizes the callback without
/// running it; whichever of fire and cancel comes first wins.
pub struct CompletionEvent {
    id: Uuid,
    callback: Mutex<Option<Callback>>,
}

impl CompletionEvent {
    pub(crate) fn new(callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id: Uuid::new_v4(),
            callback: Mutex::new(Some(Box::new(callback))),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Neutralize the callback; false if it already fired or was canceled.
    pub fn cancel(&self) -> bool {
        self.callback.lock().take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.callback.lock().is_some()
    }

    /// Run the callback on the current thread if it is still pending.
    pub(crate) fn fire(&self) -> bool {
        let Some(callback) = self.callback.lock().take() else {
            return false;
        };
        if catch_unwind(AssertUnwindSafe(callback)).is_err() {
            error!(event = %self.id, "completion callback panicked");
        }
        true
    }
}

impl std::fmt::Debug for CompletionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionEvent")
            .field("id", &self.id)
            .field("pending", &self.is_pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fires_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let event = CompletionEvent::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(event.fire());
        assert!(!event.fire());
        assert!(!event.cancel());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancel_neutralizes() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let event = CompletionEvent::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(event.cancel());
        assert!(!event.is_pending());
        assert!(!event.fire());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let event = CompletionEvent::new(|| panic!("boom"));
        assert!(event.fire());
        assert!(!event.is_pending());
    }
}
