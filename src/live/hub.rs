//! Client registry and fan-out.
//!
//! # Responsibilities
//! - Register one bounded queue per connected browser client
//! - Fan rebuild events out to every registered queue
//! - Drop the oldest pending event when a slow client's queue is full
//! - Remove clients when their channel handle is dropped
//!
//! # Design Decisions
//! - Publishing never blocks and never waits on a client
//! - The queue lock is a plain mutex held only for a push or pop
//! - The registry is a `DashMap`, so subscribe/publish/drop never contend on
//!   one global lock

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use dashmap::DashMap;
use futures_util::Stream;
use tokio::sync::Notify;

use crate::observability::metrics;

/// A notification pushed to live clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    /// A rebuild finished and the cache moved to `generation`.
    Generation {
        generation: u64,
        changed: Vec<String>,
    },
    /// A rebuild failed; `generation` is the one still being served.
    BuildFailed { generation: u64, message: String },
}

impl LiveEvent {
    /// Event name on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            LiveEvent::Generation { .. } => "generation",
            LiveEvent::BuildFailed { .. } => "build-failed",
        }
    }

    pub fn generation(&self) -> u64 {
        match self {
            LiveEvent::Generation { generation, .. } | LiveEvent::BuildFailed { generation, .. } => {
                *generation
            }
        }
    }
}

#[derive(Debug)]
struct ClientQueue {
    events: Mutex<VecDeque<LiveEvent>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl ClientQueue {
    fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn push(&self, event: LiveEvent, capacity: usize) {
        {
            let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
            if events.len() >= capacity {
                events.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            events.push_back(event);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<LiveEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

#[derive(Debug)]
struct HubInner {
    clients: DashMap<u64, Arc<ClientQueue>>,
    next_id: AtomicU64,
    capacity: usize,
    closed: AtomicBool,
}

impl HubInner {
    fn remove(&self, id: u64) {
        if self.clients.remove(&id).is_some() {
            metrics::set_live_clients(self.clients.len());
            tracing::debug!(client_id = id, "Live client removed");
        }
    }
}

/// Registry of live-update clients.
///
/// Cheap to clone; every clone shares one registry.
#[derive(Debug, Clone)]
pub struct LiveHub {
    inner: Arc<HubInner>,
}

impl LiveHub {
    /// Create a hub whose clients each buffer at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                clients: DashMap::new(),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register a new client.
    ///
    /// After [`close`](Self::close) the returned channel is already closed.
    pub fn subscribe(&self) -> ClientChannel {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(ClientQueue::new(self.inner.capacity));

        if self.inner.closed.load(Ordering::SeqCst) {
            queue.close();
        } else {
            self.inner.clients.insert(id, Arc::clone(&queue));
            // A close that ran between the check and the insert missed this
            // client.
            if self.inner.closed.load(Ordering::SeqCst) {
                queue.close();
                self.inner.remove(id);
            } else {
                metrics::set_live_clients(self.inner.clients.len());
                tracing::debug!(client_id = id, "Live client subscribed");
            }
        }

        ClientChannel {
            id,
            queue,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every registered client. Returns how many
    /// clients it was queued for.
    pub fn publish(&self, event: LiveEvent) -> usize {
        let mut delivered = 0;
        for client in self.inner.clients.iter() {
            client.value().push(event.clone(), self.inner.capacity);
            delivered += 1;
        }
        tracing::debug!(
            event = event.name(),
            generation = event.generation(),
            clients = delivered,
            "Live event published"
        );
        delivered
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.len()
    }

    /// End every client stream and refuse new subscriptions.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        for client in self.inner.clients.iter() {
            client.value().close();
        }
    }
}

/// One client's receiving end.
///
/// Dropping it unregisters the client.
#[derive(Debug)]
pub struct ClientChannel {
    id: u64,
    queue: Arc<ClientQueue>,
    hub: Weak<HubInner>,
}

impl ClientChannel {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event. `None` once the hub is closed and the
    /// queue is drained.
    pub async fn recv(&self) -> Option<LiveEvent> {
        loop {
            let notified = self.queue.notify.notified();
            if let Some(event) = self.queue.pop() {
                return Some(event);
            }
            if self.queue.closed.load(Ordering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }

    pub fn try_recv(&self) -> Option<LiveEvent> {
        self.queue.pop()
    }

    /// Events queued but not yet received.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Events discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// Turn the channel into a stream of events.
    pub fn into_stream(self) -> impl Stream<Item = LiveEvent> + Send + 'static {
        futures_util::stream::unfold(self, |channel| async move {
            let event = channel.recv().await?;
            Some((event, channel))
        })
    }
}

impl Drop for ClientChannel {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
    }
}
