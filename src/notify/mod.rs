//! Synchronous, ordered, failure-isolated change notification.
//!
//! Observers are called on the mutating thread, in registration order, after
//! the mutation is complete. Delivery works on a copy of the observer list, so
//! registering or unregistering from inside a callback only affects later
//! events. A callback that returns `Err` or panics is logged and counted; the
//! remaining observers still see the event.

pub mod event;

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

use crate::space::AddressSpace;

pub use event::ChangeEvent;

/// Receiver of change events
pub trait Observer: Send + Sync {
    fn on_event(&self, space: &AddressSpace, event: &ChangeEvent) -> anyhow::Result<()>;
}

/// Adapts a closure to `Observer`
pub struct FnObserver<F>(pub F);

impl<F> Observer for FnObserver<F>
where
    F: Fn(&AddressSpace, &ChangeEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, space: &AddressSpace, event: &ChangeEvent) -> anyhow::Result<()> {
        (self.0)(space, event)
    }
}

/// Wrap a closure as a shareable observer.
pub fn observer_fn<F>(f: F) -> Arc<dyn Observer>
where
    F: Fn(&AddressSpace, &ChangeEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnObserver(f))
}

/// Handle returned by `register`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub u64);

#[derive(Default)]
pub struct ChangeNotifier {
    observers: RwLock<Vec<(ObserverId, Arc<dyn Observer>)>>,
    next_id: AtomicU64,
    failures: AtomicU64,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn Observer>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    /// Returns false when the id is unknown.
    pub fn unregister(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Number of observer callbacks that failed since creation.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Deliver `event` to every observer registered right now.
    pub fn notify(&self, space: &AddressSpace, event: &ChangeEvent) {
        let snapshot: Vec<(ObserverId, Arc<dyn Observer>)> = self.observers.read().clone();
        trace!(event = event.name(), observers = snapshot.len(), "notify");

        for (id, observer) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| observer.on_event(space, event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    error!(observer = id.0, event = event.name(), error = %e, "Observer failed");
                }
                Err(panic) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    error!(observer = id.0, event = event.name(), panic = %message, "Observer panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::BufferAccessor;
    use parking_lot::Mutex;

    fn space() -> Arc<AddressSpace> {
        AddressSpace::builder()
            .storage(BufferAccessor::new(vec![0u8; 16]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_registration_order_and_unregister() {
        let notifier = ChangeNotifier::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let a_seen = seen.clone();
        let b_seen = seen.clone();
        let a = notifier.register(observer_fn(move |_, _| {
            a_seen.lock().push("a");
            Ok(())
        }));
        notifier.register(observer_fn(move |_, _| {
            b_seen.lock().push("b");
            Ok(())
        }));

        let space = space();
        let event = ChangeEvent::FunctionAdded { start: 0 };
        notifier.notify(&space, &event);
        assert!(notifier.unregister(a));
        assert!(!notifier.unregister(a));
        notifier.notify(&space, &event);
        assert_eq!(*seen.lock(), vec!["a", "b", "b"]);
    }

    #[test]
    fn test_membership_changes_during_delivery() {
        let space = space();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let b_slot: Arc<Mutex<Option<ObserverId>>> = Arc::new(Mutex::new(None));

        let a_seen = seen.clone();
        let a_slot = b_slot.clone();
        space.register_observer(observer_fn(move |space, _| {
            a_seen.lock().push("a");
            if let Some(b) = a_slot.lock().take() {
                assert!(space.unregister_observer(b));
                let c_seen = a_seen.clone();
                space.register_observer(observer_fn(move |_, _| {
                    c_seen.lock().push("c");
                    Ok(())
                }));
            }
            Ok(())
        }));
        let b_seen = seen.clone();
        let b = space.register_observer(observer_fn(move |_, _| {
            b_seen.lock().push("b");
            Ok(())
        }));
        *b_slot.lock() = Some(b);

        let event = ChangeEvent::FunctionAdded { start: 0 };
        space.notifier().notify(&space, &event);
        assert_eq!(*seen.lock(), vec!["a", "b"]);

        space.notifier().notify(&space, &event);
        assert_eq!(*seen.lock(), vec!["a", "b", "a", "c"]);
        assert_eq!(space.notifier().failure_count(), 0);
    }

    #[test]
    fn test_failures_are_isolated_and_counted() {
        let notifier = ChangeNotifier::new();
        notifier.register(observer_fn(|_, _| Err(anyhow::anyhow!("broken observer"))));
        notifier.register(observer_fn(|_, _| panic!("observer blew up")));
        let hits = Arc::new(AtomicU64::new(0));
        let h = hits.clone();
        notifier.register(observer_fn(move |_, _| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let space = space();
        notifier.notify(&space, &ChangeEvent::MetadataUpdated { key: "k".into() });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(notifier.failure_count(), 2);
    }

    #[test]
    fn test_event_names() {
        assert_eq!(ChangeEvent::FunctionAdded { start: 1 }.name(), "function_added");
        assert!(ChangeEvent::FunctionAdded { start: 1 }.is_structural());
        assert!(!ChangeEvent::DataWritten { offset: 0, len: 1 }.is_structural());
    }
}
