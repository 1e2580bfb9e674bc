//! Event fan-out: delivers server-push events to in-process listeners.
//!
//! Listeners register per [`EventCategory`] and live independently of any
//! socket. Dispatch runs in registration order; a panicking listener is
//! logged and skipped. Nothing is buffered: an event reaches the listeners
//! registered at the moment it is published, at most once each.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use {serde_json::Value, tracing::warn};

// ── Lifecycle event names ────────────────────────────────────────────────────

/// Published after a successful handshake; payload is the `hello-ok`.
pub const CONNECTED_EVENT: &str = "gateway.connected";
/// Published when an open socket closes; payload is `{code, reason}`.
pub const DISCONNECTED_EVENT: &str = "gateway.disconnected";
/// Published when event sequence numbers skip; payload is `{expected, received}`.
pub const GAP_EVENT: &str = "gateway.gap";

// ── Events ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCategory {
    /// Scheduler job events (`cron`, `cron.*`).
    Cron,
    /// Chat streaming events (`chat`, `chat.*`, `agent`).
    Chat,
    /// Client lifecycle notifications (`gateway.*`).
    Connection,
    Other,
}

impl EventCategory {
    pub fn of(event: &str) -> Self {
        match event {
            "cron" => Self::Cron,
            "chat" | "agent" => Self::Chat,
            e if e.starts_with("cron.") => Self::Cron,
            e if e.starts_with("chat.") => Self::Chat,
            e if e.starts_with("gateway.") => Self::Connection,
            _ => Self::Other,
        }
    }
}

/// One server-push event (or client lifecycle notification).
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEvent {
    pub event: String,
    pub payload: Value,
    pub seq: Option<u64>,
}

impl GatewayEvent {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
            seq: None,
        }
    }

    pub fn category(&self) -> EventCategory {
        EventCategory::of(&self.event)
    }
}

// ── Hub ──────────────────────────────────────────────────────────────────────

pub type Listener = Arc<dyn Fn(&GatewayEvent) + Send + Sync>;

struct Registration {
    id: u64,
    /// `None` receives every category.
    category: Option<EventCategory>,
    listener: Listener,
    active: Arc<AtomicBool>,
}

#[derive(Default)]
struct HubInner {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Registration>>,
}

/// Cloneable handle to one listener registry.
#[derive(Clone, Default)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, category: EventCategory, listener: F) -> Subscription
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.register(Some(category), Arc::new(listener))
    }

    /// Receive events of every category.
    pub fn subscribe_all<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(listener))
    }

    fn register(&self, category: Option<EventCategory>, listener: Listener) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let mut listeners = self.inner.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.push(Registration {
            id,
            category,
            listener,
            active: Arc::clone(&active),
        });
        Subscription {
            hub: Arc::downgrade(&self.inner),
            id,
            active,
        }
    }

    /// Deliver `event` to every listener of its category. Returns the number
    /// of listeners that ran to completion.
    pub fn publish(&self, event: &GatewayEvent) -> usize {
        let category = event.category();
        let targets: Vec<(Listener, Arc<AtomicBool>)> = {
            let listeners = self.inner.listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners
                .iter()
                .filter(|r| r.category.is_none_or(|c| c == category))
                .map(|r| (Arc::clone(&r.listener), Arc::clone(&r.active)))
                .collect()
        };

        let mut delivered = 0;
        for (listener, active) in targets {
            // Unsubscribed after the snapshot was taken.
            if !active.load(Ordering::Acquire) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(event = %event.event, "event listener panicked"),
            }
        }
        delivered
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// Registration handle. Dropping it (or calling [`Subscription::unsubscribe`])
/// stops further deliveries to its listener.
#[must_use = "dropping a Subscription unsubscribes its listener"]
pub struct Subscription {
    hub: Weak<HubInner>,
    id: u64,
    active: Arc<AtomicBool>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        // Drop does the work.
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(hub) = self.hub.upgrade() {
            let mut listeners = hub.listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners.retain(|r| r.id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    type Recorded = Box<dyn Fn(&GatewayEvent) + Send + Sync>;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Recorded) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_for = Arc::clone(&log);
        let make = move |tag: &str| {
            let log = Arc::clone(&log_for);
            let tag = tag.to_string();
            Box::new(move |ev: &GatewayEvent| {
                log.lock().unwrap().push(format!("{tag}:{}", ev.event));
            }) as Recorded
        };
        (log, make)
    }

    #[test]
    fn categories_from_event_names() {
        assert_eq!(EventCategory::of("cron"), EventCategory::Cron);
        assert_eq!(EventCategory::of("cron.run.finished"), EventCategory::Cron);
        assert_eq!(EventCategory::of("chat"), EventCategory::Chat);
        assert_eq!(EventCategory::of("agent"), EventCategory::Chat);
        assert_eq!(EventCategory::of("gateway.connected"), EventCategory::Connection);
        assert_eq!(EventCategory::of("presence"), EventCategory::Other);
        assert_eq!(EventCategory::of("cronjob"), EventCategory::Other);
    }

    #[test]
    fn dispatch_in_registration_order() {
        let hub = EventHub::new();
        let (log, make) = recorder();
        let _a = hub.subscribe(EventCategory::Chat, make("a"));
        let _b = hub.subscribe(EventCategory::Chat, make("b"));
        let _c = hub.subscribe(EventCategory::Cron, make("c"));

        assert_eq!(hub.publish(&GatewayEvent::new("chat", Value::Null)), 2);
        assert_eq!(*log.lock().unwrap(), vec!["a:chat", "b:chat"]);
    }

    #[test]
    fn unsubscribed_listener_receives_nothing_more() {
        let hub = EventHub::new();
        let (log, make) = recorder();
        let a = hub.subscribe(EventCategory::Cron, make("a"));
        let _b = hub.subscribe(EventCategory::Cron, make("b"));
        let _c = hub.subscribe(EventCategory::Cron, make("c"));

        hub.publish(&GatewayEvent::new("cron", Value::Null));
        a.unsubscribe();
        hub.publish(&GatewayEvent::new("cron", Value::Null));

        assert_eq!(*log.lock().unwrap(), vec![
            "a:cron", "b:cron", "c:cron", "b:cron", "c:cron"
        ]);
        assert_eq!(hub.listener_count(), 2);
    }

    #[test]
    fn panicking_listener_does_not_stop_others() {
        let hub = EventHub::new();
        let (log, make) = recorder();
        let _bad = hub.subscribe(EventCategory::Chat, |_| panic!("listener bug"));
        let _good = hub.subscribe(EventCategory::Chat, make("good"));

        assert_eq!(hub.publish(&GatewayEvent::new("chat", Value::Null)), 1);
        assert_eq!(*log.lock().unwrap(), vec!["good:chat"]);
    }

    #[test]
    fn subscribe_all_sees_every_category() {
        let hub = EventHub::new();
        let (log, make) = recorder();
        let _all = hub.subscribe_all(make("all"));
        hub.publish(&GatewayEvent::new("cron", Value::Null));
        hub.publish(&GatewayEvent::new("presence", Value::Null));
        assert_eq!(*log.lock().unwrap(), vec!["all:cron", "all:presence"]);
    }

    #[test]
    fn events_before_subscribe_are_not_replayed() {
        let hub = EventHub::new();
        hub.publish(&GatewayEvent::new("chat", Value::Null));
        let (log, make) = recorder();
        let _late = hub.subscribe(EventCategory::Chat, make("late"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn subscription_outliving_hub_drops_cleanly() {
        let hub = EventHub::new();
        let sub = hub.subscribe(EventCategory::Other, |_| {});
        drop(hub);
        assert!(sub.is_active());
        drop(sub);
    }
}
