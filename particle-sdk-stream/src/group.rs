//! Handler groups: the callbacks registered against one subscription path
//!
//! A [`HandlerGroup`] lives exactly as long as its path has subscribers. The
//! connection serving the path holds a reference to the group and exits once
//! the group is empty or closed.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{HandlerError, HandlerResult};
use crate::event::Event;
use crate::path::SubscriptionPath;

/// Callback invoked for every event on a subscribed path
pub type EventCallback = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

/// Opaque identifier for exactly one (path, callback) registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(Uuid);

impl SubscriptionHandle {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the raw identifier
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// One registered callback
pub struct HandlerEntry {
    handle: SubscriptionHandle,
    sequence: u64,
    callback: EventCallback,
}

impl HandlerEntry {
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    /// Registration order within the group
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Run the callback, converting a panic into [`HandlerError::Panicked`]
    pub fn invoke(&self, event: &Event) -> HandlerResult {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.callback)(event))) {
            Ok(result) => result,
            Err(payload) => {
                let message = if let Some(s) = payload.downcast_ref::<&str>() {
                    (*s).to_string()
                } else if let Some(s) = payload.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "non-string panic payload".to_string()
                };
                Err(HandlerError::Panicked(message))
            }
        }
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("handle", &self.handle)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// Ordered set of callbacks for one path plus its close signal
pub struct HandlerGroup {
    path: SubscriptionPath,
    entries: RwLock<Vec<Arc<HandlerEntry>>>,
    next_sequence: AtomicU64,
    closed: watch::Sender<bool>,
}

impl HandlerGroup {
    pub(crate) fn new(path: SubscriptionPath) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            path,
            entries: RwLock::new(Vec::new()),
            next_sequence: AtomicU64::new(0),
            closed,
        }
    }

    pub fn path(&self) -> &SubscriptionPath {
        &self.path
    }

    pub(crate) fn add(&self, handle: SubscriptionHandle, callback: EventCallback) {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        self.entries.write().push(Arc::new(HandlerEntry {
            handle,
            sequence,
            callback,
        }));
    }

    /// Remove the entry registered under `handle`
    pub(crate) fn remove(&self, handle: SubscriptionHandle) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|entry| entry.handle != handle);
        entries.len() != before
    }

    /// Drop every entry, returning how many were registered
    pub(crate) fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let removed = entries.len();
        entries.clear();
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Copy of the current entries in registration order.
    ///
    /// Delivery iterates the copy, so callbacks may subscribe or unsubscribe
    /// while an event is being delivered.
    pub fn snapshot(&self) -> Vec<Arc<HandlerEntry>> {
        self.entries.read().clone()
    }

    /// Signal the connection serving this group to stop
    pub(crate) fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub(crate) fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

impl fmt::Debug for HandlerGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerGroup")
            .field("path", &self.path)
            .field("handlers", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parking_lot::Mutex;

    fn test_event(name: &str) -> Event {
        Event {
            name: name.to_string(),
            data: "1".to_string(),
            ttl: 60,
            published_at: Utc::now(),
            device_id: "dev".to_string(),
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> EventCallback {
        let log = Arc::clone(log);
        Arc::new(move |event: &Event| -> HandlerResult {
            log.lock().push(format!("{}:{}", tag, event.name));
            Ok(())
        })
    }

    #[test]
    fn test_add_remove_by_handle() {
        let group = HandlerGroup::new(SubscriptionPath::from("v1/events"));
        let log = Arc::new(Mutex::new(Vec::new()));

        let first = SubscriptionHandle::new();
        let second = SubscriptionHandle::new();
        group.add(first, recorder(&log, "a"));
        group.add(second, recorder(&log, "a"));
        assert_eq!(group.len(), 2);

        // Identical callbacks are still removed individually
        assert!(group.remove(first));
        assert!(!group.remove(first));
        assert_eq!(group.len(), 1);
        assert_eq!(group.snapshot()[0].handle(), second);

        assert!(group.remove(second));
        assert!(group.is_empty());
    }

    #[test]
    fn test_snapshot_preserves_registration_order() {
        let group = HandlerGroup::new(SubscriptionPath::from("v1/events"));
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            group.add(SubscriptionHandle::new(), recorder(&log, tag));
        }

        let event = test_event("temp");
        for entry in group.snapshot() {
            entry.invoke(&event).unwrap();
        }

        assert_eq!(*log.lock(), vec!["a:temp", "b:temp", "c:temp"]);
        let sequences: Vec<u64> = group.snapshot().iter().map(|e| e.sequence()).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn test_snapshot_is_detached_from_later_changes() {
        let group = HandlerGroup::new(SubscriptionPath::from("v1/events"));
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = SubscriptionHandle::new();
        group.add(handle, recorder(&log, "a"));

        let snapshot = group.snapshot();
        group.remove(handle);
        group.add(SubscriptionHandle::new(), recorder(&log, "b"));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].handle(), handle);
    }

    #[test]
    fn test_invoke_isolates_panics() {
        let group = HandlerGroup::new(SubscriptionPath::from("v1/events"));
        group.add(
            SubscriptionHandle::new(),
            Arc::new(|_: &Event| -> HandlerResult { panic!("boom") }),
        );
        group.add(
            SubscriptionHandle::new(),
            Arc::new(|_: &Event| -> HandlerResult { Err(HandlerError::failed("nope")) }),
        );

        let event = test_event("temp");
        let results: Vec<_> = group.snapshot().iter().map(|e| e.invoke(&event)).collect();
        assert_eq!(results[0], Err(HandlerError::Panicked("boom".to_string())));
        assert_eq!(results[1], Err(HandlerError::Failed("nope".to_string())));
    }

    #[test]
    fn test_clear_empties_group() {
        let group = HandlerGroup::new(SubscriptionPath::from("v1/events"));
        let log = Arc::new(Mutex::new(Vec::new()));
        group.add(SubscriptionHandle::new(), recorder(&log, "a"));
        group.add(SubscriptionHandle::new(), recorder(&log, "b"));

        assert_eq!(group.clear(), 2);
        assert!(group.is_empty());
        assert!(group.snapshot().is_empty());
        assert_eq!(group.clear(), 0);
    }

    #[test]
    fn test_close_signal() {
        let group = HandlerGroup::new(SubscriptionPath::from("v1/events"));
        let signal = group.closed_signal();
        assert!(!group.is_closed());
        assert!(!*signal.borrow());

        group.close();
        assert!(group.is_closed());
        assert!(*signal.borrow());
    }

    #[test]
    fn test_handle_display() {
        let handle = SubscriptionHandle::new();
        assert_eq!(handle.to_string(), format!("sub-{}", handle.as_uuid()));
        assert_ne!(handle, SubscriptionHandle::new());
    }
}
