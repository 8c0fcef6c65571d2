//! Watch bus: ordered per-kind change streams with bootstrap replay.
//!
//! Every subscription owns a queue that the store appends to while holding the
//! kind's lock, so a subscriber observes mutations in commit order. Queues are
//! unbounded for correctness; past the soft capacity an `Updated` event is
//! folded into the newest pending event of the same identity instead of being
//! appended. `Destroyed` events are never folded or dropped.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::Stream;
use octonode_core::{ResourceKind, WatchEvent, WatchEventType};
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};

/// Default soft capacity of a subscription queue.
pub const DEFAULT_WATCH_CAPACITY: usize = 1024;

/// Counts events that were queued but not yet processed.
///
/// The store adds one for every appended event; consumers report completion
/// with [`ActivityTracker::done`]. A zero count means nothing is in flight.
#[derive(Clone)]
pub struct ActivityTracker {
    pending: Arc<watch::Sender<usize>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(0usize);
        Self {
            pending: Arc::new(sender),
        }
    }

    pub fn add(&self, n: usize) {
        if n > 0 {
            self.pending.send_modify(|p| *p += n);
        }
    }

    pub fn done(&self, n: usize) {
        if n > 0 {
            self.pending.send_modify(|p| *p = p.saturating_sub(n));
        }
    }

    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Resolves once the pending count drops to zero.
    pub async fn wait_idle(&self) {
        let mut receiver = self.pending.subscribe();
        // the sender lives as long as `self`, so the channel cannot close here
        let _ = receiver.wait_for(|p| *p == 0).await;
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ActivityTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityTracker")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Options for a new subscription.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Queue length past which updates get coalesced.
    pub capacity: usize,
    /// Optional in-flight counter shared with the consumer.
    pub tracker: Option<ActivityTracker>,
}

impl WatchOptions {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tracker: None,
        }
    }

    pub fn with_tracker(mut self, tracker: ActivityTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_WATCH_CAPACITY)
    }
}

#[derive(Default)]
struct WatchQueue {
    events: VecDeque<WatchEvent>,
    coalesced: u64,
}

/// Producer side of a subscription, held by the store.
pub(crate) struct Subscriber {
    queue: Mutex<WatchQueue>,
    notify: Notify,
    closed: AtomicBool,
    capacity: usize,
    tracker: Option<ActivityTracker>,
}

impl Subscriber {
    pub(crate) fn new(options: WatchOptions) -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(WatchQueue::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            capacity: options.capacity.max(1),
            tracker: options.tracker,
        })
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn push(&self, event: WatchEvent) {
        if self.is_closed() {
            return;
        }

        let mut queue = self.queue.lock();
        // closing takes this lock, so a push never lands after the drop count
        if self.is_closed() {
            return;
        }

        if queue.events.len() >= self.capacity && event.event_type == WatchEventType::Updated {
            let newest = queue
                .events
                .iter_mut()
                .rev()
                .find(|pending| pending.identity == event.identity);
            if let Some(pending) = newest {
                if !pending.is_destroyed() {
                    pending.resource = event.resource;
                    queue.coalesced += 1;
                    drop(queue);
                    self.notify.notify_one();
                    return;
                }
            }
        }

        queue.events.push_back(event);
        if let Some(tracker) = &self.tracker {
            tracker.add(1);
        }
        drop(queue);
        self.notify.notify_one();
    }

    /// Marks the subscription closed and wakes the consumer.
    pub(crate) fn close(&self) {
        {
            let _queue = self.queue.lock();
            self.closed.store(true, Ordering::Release);
        }
        self.notify.notify_one();
    }
}

/// Consumer side of a subscription to one resource kind.
///
/// Bootstrap `Created` events for every resource present at subscription time
/// come first, followed by live events. Dropping the watch unsubscribes.
pub struct Watch {
    kind: ResourceKind,
    subscriber: Arc<Subscriber>,
}

impl Watch {
    pub(crate) fn new(kind: ResourceKind, subscriber: Arc<Subscriber>) -> Self {
        Self { kind, subscriber }
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    /// Waits for the next event; `None` once the watch is closed and drained.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        loop {
            if let Some(event) = self.try_recv() {
                return Some(event);
            }
            if self.subscriber.is_closed() {
                return None;
            }
            self.subscriber.notify.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Option<WatchEvent> {
        self.subscriber.queue.lock().events.pop_front()
    }

    /// Takes every queued event without waiting.
    pub fn drain(&mut self) -> Vec<WatchEvent> {
        self.subscriber.queue.lock().events.drain(..).collect()
    }

    /// Waits until at least one event is queued or the watch closes.
    ///
    /// Returns `false` when the watch is closed and empty.
    pub async fn ready(&self) -> bool {
        loop {
            if !self.subscriber.queue.lock().events.is_empty() {
                return true;
            }
            if self.subscriber.is_closed() {
                return false;
            }
            self.subscriber.notify.notified().await;
        }
    }

    pub fn pending(&self) -> usize {
        self.subscriber.queue.lock().events.len()
    }

    /// Number of updates folded into earlier pending events.
    pub fn coalesced(&self) -> u64 {
        self.subscriber.queue.lock().coalesced
    }

    pub fn is_closed(&self) -> bool {
        self.subscriber.is_closed()
    }

    /// Converts the watch into a stream of events.
    pub fn into_stream(self) -> impl Stream<Item = WatchEvent> + Send {
        futures_util::stream::unfold(self, |mut watch| async move {
            watch.recv().await.map(|event| (event, watch))
        })
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.subscriber.close();
        let remaining = self.subscriber.queue.lock().events.len();
        if let Some(tracker) = &self.subscriber.tracker {
            tracker.done(remaining);
        }
    }
}

impl std::fmt::Debug for Watch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watch")
            .field("kind", &self.kind)
            .field("pending", &self.pending())
            .finish()
    }
}
