//! # Event Manager
//!
//! In-process publish/subscribe bus for client lifecycle events.
//!
//! ## Dispatch
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         emit("connection:status")                       │
//! │                                                                         │
//! │   registry lock ──► snapshot regular listeners                         │
//! │                 ──► take once listeners (removed before invocation)    │
//! │   lock released                                                        │
//! │        │                                                                │
//! │        ▼                                                                │
//! │   regular[0] → regular[1] → ... → once[0] → once[1] → ...              │
//! │   (registration order, each under catch_unwind)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Listeners run with no lock held, so they may subscribe, unsubscribe or
//! emit from inside a callback.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use pulse_core::DEFAULT_MAX_LISTENERS;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, trace, warn};

/// Well-known event names.
pub mod names {
    pub const CONNECTION_STATUS: &str = "connection:status";
    pub const CONNECTION_ERROR: &str = "connection:error";
    pub const CONNECTION_RECONNECTING: &str = "connection:reconnecting";
    pub const AUTH_TOKEN_REFRESHED: &str = "auth:token_refreshed";
    pub const AUTH_TOKEN_EXPIRED: &str = "auth:token_expired";
    pub const OFFLINE_QUEUE_UPDATED: &str = "offline:queue_updated";
    pub const OFFLINE_OPERATION_FAILED: &str = "offline:operation_failed";
    pub const OFFLINE_OPERATION_SYNCED: &str = "offline:operation_synced";
    pub const CLIENT_INITIALIZED: &str = "client:initialized";
    pub const CLIENT_DESTROYED: &str = "client:destroyed";
}

/// Listener callback.
pub type Listener = Arc<dyn Fn(&Value) + Send + Sync>;

struct Entry {
    id: u64,
    callback: Listener,
}

#[derive(Default)]
struct Registries {
    regular: HashMap<String, Vec<Entry>>,
    once: HashMap<String, Vec<Entry>>,
}

impl Registries {
    fn remove(&mut self, event: &str, id: u64) -> bool {
        let removed_regular = remove_entry(&mut self.regular, event, id);
        let removed_once = remove_entry(&mut self.once, event, id);
        removed_regular || removed_once
    }
}

fn remove_entry(map: &mut HashMap<String, Vec<Entry>>, event: &str, id: u64) -> bool {
    let Some(entries) = map.get_mut(event) else {
        return false;
    };
    let before = entries.len();
    entries.retain(|e| e.id != id);
    let removed = entries.len() != before;
    if entries.is_empty() {
        map.remove(event);
    }
    removed
}

struct Bus {
    registries: RwLock<Registries>,
    max_listeners: usize,
    next_id: AtomicU64,
    destroyed: AtomicBool,
}

// =============================================================================
// Subscription Handle
// =============================================================================

/// Handle returned by [`EventManager::on`] and [`EventManager::once`].
///
/// Dropping the handle keeps the listener registered.
#[derive(Debug, Clone)]
pub struct Subscription {
    event: String,
    id: u64,
    bus: Weak<Bus>,
}

impl Subscription {
    fn inert(event: &str) -> Self {
        Subscription {
            event: event.to_string(),
            id: 0,
            bus: Weak::new(),
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Returns false for handles that never registered anything.
    pub fn is_active(&self) -> bool {
        self.id != 0 && self.bus.strong_count() > 0
    }

    /// Removes the listener. Returns true if it was still registered.
    pub fn unsubscribe(&self) -> bool {
        match self.bus.upgrade() {
            Some(bus) => bus
                .registries
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.event, self.id),
            None => false,
        }
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("max_listeners", &self.max_listeners)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Debug Info
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDebugInfo {
    pub total_listeners: usize,
    /// Listener count per event name.
    pub events: BTreeMap<String, usize>,
    pub max_listeners: usize,
    pub destroyed: bool,
}

// =============================================================================
// Event Manager
// =============================================================================

/// Cheaply clonable handle to a shared listener registry.
#[derive(Clone)]
pub struct EventManager {
    bus: Arc<Bus>,
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LISTENERS)
    }
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("max_listeners", &self.bus.max_listeners)
            .field("total_listeners", &self.total_listener_count())
            .finish()
    }
}

impl EventManager {
    /// `max_listeners` caps each event name, separately for the regular
    /// and the once registry.
    pub fn new(max_listeners: usize) -> Self {
        EventManager {
            bus: Arc::new(Bus {
                registries: RwLock::new(Registries::default()),
                max_listeners,
                next_id: AtomicU64::new(1),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Registers a persistent listener.
    ///
    /// Past the listener cap this logs a warning and returns an inert
    /// handle.
    pub fn on<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.register(event, Arc::new(callback), false)
    }

    /// Registers a listener removed after its first invocation.
    pub fn once<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.register(event, Arc::new(callback), true)
    }

    fn register(&self, event: &str, callback: Listener, once: bool) -> Subscription {
        if self.is_destroyed() {
            warn!(event, "Listener registered on destroyed event manager, ignoring");
            return Subscription::inert(event);
        }

        let mut registries = self
            .bus
            .registries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let map = if once {
            &mut registries.once
        } else {
            &mut registries.regular
        };
        let entries = map.entry(event.to_string()).or_default();

        if entries.len() >= self.bus.max_listeners {
            warn!(
                event,
                max = self.bus.max_listeners,
                once,
                "Maximum listeners reached, listener not added"
            );
            if entries.is_empty() {
                map.remove(event);
            }
            return Subscription::inert(event);
        }

        let id = self.bus.next_id.fetch_add(1, Ordering::Relaxed);
        entries.push(Entry { id, callback });

        Subscription {
            event: event.to_string(),
            id,
            bus: Arc::downgrade(&self.bus),
        }
    }

    /// Removes one listener from both registries.
    pub fn off(&self, subscription: &Subscription) -> bool {
        if !Weak::ptr_eq(&subscription.bus, &Arc::downgrade(&self.bus)) {
            return false;
        }
        self.bus
            .registries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&subscription.event, subscription.id)
    }

    /// Invokes every listener for `event`. Returns how many ran.
    pub fn emit(&self, event: &str, data: &Value) -> usize {
        if self.is_destroyed() {
            return 0;
        }

        let (regular, once): (Vec<Listener>, Vec<Listener>) = {
            let mut registries = self
                .bus
                .registries
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let regular = registries
                .regular
                .get(event)
                .map(|entries| entries.iter().map(|e| e.callback.clone()).collect())
                .unwrap_or_default();
            let once = registries
                .once
                .remove(event)
                .map(|entries| entries.into_iter().map(|e| e.callback).collect())
                .unwrap_or_default();
            (regular, once)
        };

        trace!(event, listeners = regular.len() + once.len(), "Emitting event");

        let mut invoked = 0;
        for callback in regular.iter().chain(once.iter()) {
            if catch_unwind(AssertUnwindSafe(|| callback(data))).is_err() {
                error!(event, "Event listener panicked");
            }
            invoked += 1;
        }
        invoked
    }

    /// Removes listeners for one event, or for every event when `None`.
    pub fn remove_all_listeners(&self, event: Option<&str>) {
        let mut registries = self
            .bus
            .registries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match event {
            Some(event) => {
                registries.regular.remove(event);
                registries.once.remove(event);
            }
            None => {
                registries.regular.clear();
                registries.once.clear();
            }
        }
    }

    pub fn listener_count(&self, event: &str) -> usize {
        let registries = self
            .bus
            .registries
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        registries.regular.get(event).map_or(0, Vec::len)
            + registries.once.get(event).map_or(0, Vec::len)
    }

    pub fn total_listener_count(&self) -> usize {
        let registries = self
            .bus
            .registries
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        registries.regular.values().map(Vec::len).sum::<usize>()
            + registries.once.values().map(Vec::len).sum::<usize>()
    }

    /// Event names with at least one listener, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let registries = self
            .bus
            .registries
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = registries
            .regular
            .keys()
            .chain(registries.once.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn has_listeners(&self, event: &str) -> bool {
        self.listener_count(event) > 0
    }

    pub fn debug_info(&self) -> EventDebugInfo {
        let events: BTreeMap<String, usize> = self
            .event_names()
            .into_iter()
            .map(|name| {
                let count = self.listener_count(&name);
                (name, count)
            })
            .collect();
        EventDebugInfo {
            total_listeners: events.values().sum(),
            events,
            max_listeners: self.bus.max_listeners,
            destroyed: self.is_destroyed(),
        }
    }

    /// Drops every listener. Later registrations are inert and `emit`
    /// does nothing.
    pub fn destroy(&self) {
        self.bus.destroyed.store(true, Ordering::SeqCst);
        self.remove_all_listeners(None);
    }

    pub fn is_destroyed(&self) -> bool {
        self.bus.destroyed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> Listener) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |tag: &'static str| -> Listener {
            let log = log_clone.clone();
            Arc::new(move |_: &Value| log.lock().unwrap().push(tag.to_string()))
        };
        (log, make)
    }

    #[test]
    fn test_emit_runs_regular_then_once_in_order() {
        let events = EventManager::default();
        let (log, make) = recorder();

        let once_a = make("once-a");
        events.once("tick", move |v| once_a(v));
        let a = make("a");
        events.on("tick", move |v| a(v));
        let b = make("b");
        events.on("tick", move |v| b(v));

        assert_eq!(events.emit("tick", &json!({})), 3);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "once-a"]);

        log.lock().unwrap().clear();
        assert_eq!(events.emit("tick", &json!({})), 2);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_listener_cap_returns_inert_handle() {
        let events = EventManager::new(2);
        let first = events.on("x", |_| {});
        let _second = events.on("x", |_| {});
        let third = events.on("x", |_| {});

        assert!(first.is_active());
        assert!(!third.is_active());
        assert_eq!(events.listener_count("x"), 2);

        // Once registry has its own cap.
        events.once("x", |_| {});
        events.once("x", |_| {});
        let over = events.once("x", |_| {});
        assert!(!over.is_active());
        assert_eq!(events.listener_count("x"), 4);
    }

    #[test]
    fn test_unsubscribe_prunes_empty_registries() {
        let events = EventManager::default();
        let sub = events.on("x", |_| {});
        assert_eq!(events.event_names(), vec!["x"]);

        assert!(sub.unsubscribe());
        assert!(!sub.unsubscribe());
        assert!(events.event_names().is_empty());
        assert_eq!(events.emit("x", &Value::Null), 0);
    }

    #[test]
    fn test_off_ignores_foreign_handles() {
        let a = EventManager::default();
        let b = EventManager::default();
        let sub = a.on("x", |_| {});
        assert!(!b.off(&sub));
        assert!(a.off(&sub));
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let events = EventManager::default();
        let (log, make) = recorder();

        events.on("boom", |_| panic!("listener failure"));
        let after = make("after");
        events.on("boom", move |v| after(v));

        assert_eq!(events.emit("boom", &Value::Null), 2);
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }

    #[test]
    fn test_reentrant_subscribe_during_emit() {
        let events = EventManager::default();
        let inner = events.clone();
        let hits = Arc::new(AtomicU64::new(0));
        let hits_clone = hits.clone();

        events.on("outer", move |_| {
            let hits = hits_clone.clone();
            inner.once("inner", move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
            inner.emit("inner", &Value::Null);
        });

        events.emit("outer", &Value::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!events.has_listeners("inner"));
    }

    #[test]
    fn test_payload_is_delivered() {
        let events = EventManager::default();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        events.on("offline:queue_updated", move |v| {
            *seen_clone.lock().unwrap() = Some(v.clone());
        });

        events.emit("offline:queue_updated", &json!({ "size": 2 }));
        assert_eq!(seen.lock().unwrap().clone(), Some(json!({ "size": 2 })));
    }

    #[test]
    fn test_destroy_is_terminal() {
        let events = EventManager::default();
        events.on("x", |_| {});
        events.destroy();

        assert_eq!(events.total_listener_count(), 0);
        assert!(!events.on("x", |_| {}).is_active());
        assert_eq!(events.emit("x", &Value::Null), 0);
        assert!(events.debug_info().destroyed);
    }

    #[test]
    fn test_debug_info_counts() {
        let events = EventManager::new(10);
        events.on("a", |_| {});
        events.on("a", |_| {});
        events.once("b", |_| {});

        let info = events.debug_info();
        assert_eq!(info.total_listeners, 3);
        assert_eq!(info.events.get("a"), Some(&2));
        assert_eq!(info.events.get("b"), Some(&1));
        assert_eq!(info.max_listeners, 10);

        events.remove_all_listeners(Some("a"));
        assert_eq!(events.total_listener_count(), 1);
    }
}
