//! Scoped fan-out of events to listeners.
//!
//! Each listener owns a bounded queue and a task that drains it into the
//! callback. The reader only ever does a `try_send`, so a slow callback costs
//! that listener events (counted and logged) and never stalls the connection.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};
use uuid::Uuid;

use crate::event::EslEvent;

/// Opaque handle returned by listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0
            .fmt(f)
    }
}

/// Which events a listener receives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ListenerScope {
    /// Every event on the connection.
    All,
    /// Events whose `Unique-ID`, `Application-UUID` or `Job-UUID` equals this.
    Uuid(String),
}

impl ListenerScope {
    /// Scope for one channel, application run or background job.
    pub fn uuid(id: impl Into<String>) -> Self {
        ListenerScope::Uuid(id.into())
    }

    fn matches(&self, event: &EslEvent) -> bool {
        match self {
            ListenerScope::All => true,
            ListenerScope::Uuid(id) => event.matches_scope(id),
        }
    }
}

impl fmt::Display for ListenerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerScope::All => f.write_str("all"),
            ListenerScope::Uuid(id) => f.write_str(id),
        }
    }
}

struct Listener {
    id: ListenerId,
    tx: mpsc::Sender<Arc<EslEvent>>,
}

#[derive(Default)]
struct Listeners {
    scopes: HashMap<ListenerScope, Vec<Listener>>,
    closed: bool,
}

/// Listener set of one connection.
pub struct Registry {
    listeners: Mutex<Listeners>,
    queue_size: usize,
    dropped: AtomicU64,
    /// Runtime the delivery tasks run on.
    runtime: Handle,
}

impl Registry {
    pub fn new(queue_size: usize, runtime: Handle) -> Self {
        Self {
            listeners: Mutex::new(Listeners::default()),
            queue_size: queue_size.max(1),
            dropped: AtomicU64::new(0),
            runtime,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Listeners> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a listener and start its delivery task on the registry's runtime.
    ///
    /// After [`clear`](Self::clear) the listener is accepted but never called.
    pub fn register<F>(&self, scope: ListenerScope, mut callback: F) -> ListenerId
    where
        F: FnMut(&EslEvent) + Send + 'static,
    {
        let id = ListenerId::new();
        let (tx, mut rx) = mpsc::channel::<Arc<EslEvent>>(self.queue_size);

        {
            let mut listeners = self.lock();
            if listeners.closed {
                debug!("listener {} registered on a closed connection", id);
                return id;
            }
            listeners
                .scopes
                .entry(scope.clone())
                .or_default()
                .push(Listener { id, tx });
        }

        self.runtime
            .spawn(async move {
                while let Some(event) = rx
                    .recv()
                    .await
                {
                    if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
                        error!("event listener {} panicked", id);
                    }
                }
                trace!("listener {} task finished", id);
            });

        debug!("registered listener {} for scope {}", id, scope);
        id
    }

    /// Remove a listener. Events already queued for it are still delivered.
    pub fn remove(&self, scope: &ListenerScope, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let Some(entries) = listeners
            .scopes
            .get_mut(scope)
        else {
            return false;
        };
        let before = entries.len();
        entries.retain(|l| l.id != id);
        let removed = before != entries.len();
        if entries.is_empty() {
            listeners
                .scopes
                .remove(scope);
        }
        if removed {
            debug!("removed listener {} from scope {}", id, scope);
        }
        removed
    }

    /// Queue the event for every matching listener, at most once each.
    pub fn dispatch(&self, event: EslEvent) {
        let event = Arc::new(event);
        let mut listeners = self.lock();
        let mut delivered = 0usize;

        for (scope, entries) in listeners
            .scopes
            .iter_mut()
        {
            if !scope.matches(&event) {
                continue;
            }
            entries.retain(|listener| match listener
                .tx
                .try_send(Arc::clone(&event))
            {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Event queue full for listener {}, dropping {:?}",
                        listener.id,
                        event.event_name()
                    );
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
        listeners
            .scopes
            .retain(|_, entries| !entries.is_empty());

        trace!(
            "dispatched {:?} to {} listeners",
            event.event_name(),
            delivered
        );
    }

    /// Drop every listener and refuse new ones.
    pub fn clear(&self) {
        let mut listeners = self.lock();
        listeners.closed = true;
        listeners
            .scopes
            .clear();
    }

    /// Total listeners across scopes.
    pub fn len(&self) -> usize {
        self.lock()
            .scopes
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Events dropped because a listener's queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
            .load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EslEventType;
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;

    fn event(name: EslEventType, unique_id: &str) -> EslEvent {
        let mut event = EslEvent::with_type(name);
        event.set_header("Unique-ID", unique_id);
        event
    }

    #[tokio::test]
    async fn all_scope_sees_everything_uuid_scope_filters() {
        let registry = Registry::new(16, Handle::current());
        let (all_tx, mut all_rx) = unbounded_channel();
        let (x_tx, mut x_rx) = unbounded_channel();

        registry.register(ListenerScope::All, move |e| {
            let _ = all_tx.send(e.unique_id().map(str::to_string));
        });
        registry.register(ListenerScope::uuid("X"), move |e| {
            let _ = x_tx.send(e.unique_id().map(str::to_string));
        });

        registry.dispatch(event(EslEventType::ChannelAnswer, "X"));
        registry.dispatch(event(EslEventType::ChannelAnswer, "Y"));

        assert_eq!(all_rx.recv().await.unwrap().as_deref(), Some("X"));
        assert_eq!(all_rx.recv().await.unwrap().as_deref(), Some("Y"));
        assert_eq!(x_rx.recv().await.unwrap().as_deref(), Some("X"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(x_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn uuid_scope_matches_application_and_job_uuid_once() {
        let registry = Registry::new(16, Handle::current());
        let (tx, mut rx) = unbounded_channel();
        registry.register(ListenerScope::uuid("same"), move |e| {
            let _ = tx.send(e.event_name().map(str::to_string));
        });

        let mut execute = EslEvent::with_type(EslEventType::ChannelExecuteComplete);
        execute.set_header("Unique-ID", "same");
        execute.set_header("Application-UUID", "same");
        registry.dispatch(execute);

        let mut job = EslEvent::with_type(EslEventType::BackgroundJob);
        job.set_header("Job-UUID", "same");
        registry.dispatch(job);

        assert_eq!(
            rx.recv().await.unwrap().as_deref(),
            Some("CHANNEL_EXECUTE_COMPLETE")
        );
        assert_eq!(rx.recv().await.unwrap().as_deref(), Some("BACKGROUND_JOB"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn per_listener_order_is_preserved() {
        let registry = Registry::new(64, Handle::current());
        let (tx, mut rx) = unbounded_channel();
        registry.register(ListenerScope::All, move |e| {
            let _ = tx.send(e.header("Seq").map(str::to_string));
        });
        for i in 0..50 {
            let mut e = EslEvent::with_type(EslEventType::Heartbeat);
            e.set_header("Seq", i.to_string());
            registry.dispatch(e);
        }
        for i in 0..50 {
            assert_eq!(rx.recv().await.unwrap(), Some(i.to_string()));
        }
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let registry = Registry::new(1, Handle::current());
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        registry.register(ListenerScope::All, move |_| {
            // hold the first event until the test releases it
            let _ = gate_rx
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(2));
        });

        for _ in 0..10 {
            registry.dispatch(EslEvent::with_type(EslEventType::Heartbeat));
        }
        assert!(registry.dropped_count() >= 8);
        for _ in 0..10 {
            let _ = gate_tx.send(());
        }
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let registry = Registry::new(4, Handle::current());
        let id = registry.register(ListenerScope::uuid("a"), |_| {});
        registry.register(ListenerScope::All, |_| {});
        assert_eq!(registry.len(), 2);

        assert!(!registry.remove(&ListenerScope::All, id));
        assert!(registry.remove(&ListenerScope::uuid("a"), id));
        assert!(!registry.remove(&ListenerScope::uuid("a"), id));
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert_eq!(registry.len(), 0);
        registry.register(ListenerScope::All, |_| {});
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn panicking_listener_keeps_receiving() {
        let registry = Registry::new(4, Handle::current());
        let (tx, mut rx) = unbounded_channel();
        registry.register(ListenerScope::All, move |e| {
            if e.is_event_type(EslEventType::Heartbeat) {
                panic!("boom");
            }
            let _ = tx.send(());
        });
        registry.dispatch(EslEvent::with_type(EslEventType::Heartbeat));
        registry.dispatch(EslEvent::with_type(EslEventType::Dtmf));
        assert!(rx.recv().await.is_some());
    }
}
