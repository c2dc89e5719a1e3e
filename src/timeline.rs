use std::{
    sync::{atomic::{AtomicUsize, Ordering}, Arc, Mutex},
    time::Duration,
};

use futures_util::future::BoxFuture;
use imbl::Vector;
use ruma::{OwnedRoomId, RoomId};
use tokio::time::Instant;

use crate::{error::PaginationError, event::TimelineEvent, utils};

/// The source of a room's timeline: an ordered, backwards-paginable sequence of events.
pub trait RoomTimeline: Send + Sync {
    fn room_id(&self) -> &RoomId;

    /// Returns a snapshot of the currently-loaded events, ordered oldest to newest.
    fn events(&self) -> Vector<Arc<TimelineEvent>>;

    /// The number of currently-loaded events.
    fn loaded_event_count(&self) -> usize {
        self.events().len()
    }

    /// Loads up to `num_events` more events that are older than the oldest loaded event.
    ///
    /// Returns whether even older events may still be available.
    fn paginate_backwards(&self, num_events: u16) -> BoxFuture<'_, Result<bool, PaginationError>>;
}

/// A shared reference to a room's timeline.
pub type RoomRef = Arc<dyn RoomTimeline>;


/// Counters of the pagination requests issued against one or more timelines.
///
/// A single `PaginationStats` can be shared by many [`InMemoryTimeline`]s
/// to observe how many requests are in flight across all of them.
#[derive(Debug, Default)]
pub struct PaginationStats {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    total_requests: AtomicUsize,
    /// When each request was issued, in order.
    request_times: Mutex<Vec<Instant>>,
}

impl PaginationStats {
    fn begin(&self) {
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        self.total_requests.fetch_add(1, Ordering::SeqCst);
        utils::lock(&self.request_times).push(Instant::now());
    }

    fn end(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// The number of pagination requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// The highest number of pagination requests that were ever in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// The total number of pagination requests issued so far.
    pub fn total_requests(&self) -> usize {
        self.total_requests.load(Ordering::SeqCst)
    }

    /// The times at which each pagination request was issued, oldest first.
    pub fn request_times(&self) -> Vec<Instant> {
        utils::lock(&self.request_times).clone()
    }
}

/// Decrements the in-flight counter even if a pagination future is dropped mid-request.
struct InFlightGuard<'a>(&'a PaginationStats);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.end();
    }
}


/// A timeline whose full history is already held in memory,
/// of which only the newest part is initially "loaded".
///
/// Paginating backwards moves older events from the history into the loaded window.
pub struct InMemoryTimeline {
    room_id: OwnedRoomId,
    inner: Mutex<InMemoryTimelineInner>,
    stats: Arc<PaginationStats>,
}

struct InMemoryTimelineInner {
    /// Events that have not yet been loaded, ordered oldest to newest.
    unloaded: Vec<Arc<TimelineEvent>>,
    /// Currently-loaded events, ordered oldest to newest.
    loaded: Vector<Arc<TimelineEvent>>,
    /// The number of upcoming pagination requests that should fail.
    failures_remaining: usize,
    /// How long each pagination request takes to complete.
    latency: Duration,
}

impl InMemoryTimeline {
    /// Creates a timeline from the given `history` (ordered oldest to newest),
    /// of which the newest `initially_loaded` events are loaded.
    pub fn new(room_id: OwnedRoomId, history: Vec<TimelineEvent>, initially_loaded: usize) -> Self {
        let mut unloaded: Vec<Arc<TimelineEvent>> = history.into_iter().map(Arc::new).collect();
        let split_at = unloaded.len().saturating_sub(initially_loaded);
        let loaded = unloaded.split_off(split_at).into_iter().collect();
        Self {
            room_id,
            inner: Mutex::new(InMemoryTimelineInner {
                unloaded,
                loaded,
                failures_remaining: 0,
                latency: Duration::ZERO,
            }),
            stats: Arc::default(),
        }
    }

    /// Records this timeline's pagination requests into the given (possibly shared) stats.
    pub fn with_stats(mut self, stats: Arc<PaginationStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Makes each pagination request take the given amount of time.
    pub fn with_latency(self, latency: Duration) -> Self {
        utils::lock(&self.inner).latency = latency;
        self
    }

    pub fn stats(&self) -> &Arc<PaginationStats> {
        &self.stats
    }

    /// Makes the next `count` pagination requests fail with a network error.
    pub fn fail_next_paginations(&self, count: usize) {
        utils::lock(&self.inner).failures_remaining = count;
    }

    /// Appends a new live event to the end of the loaded timeline.
    pub fn push_live_event(&self, event: TimelineEvent) {
        utils::lock(&self.inner).loaded.push_back(Arc::new(event));
    }

    /// Drops all loaded events except the newest `keep_newest`,
    /// returning the dropped ones to the unloaded history.
    pub fn reset(&self, keep_newest: usize) {
        let mut inner = utils::lock(&self.inner);
        let split_at = inner.loaded.len().saturating_sub(keep_newest);
        let kept = inner.loaded.split_off(split_at);
        let dropped = std::mem::replace(&mut inner.loaded, kept);
        inner.unloaded.extend(dropped);
    }

    /// The number of events that can still be loaded by paginating backwards.
    pub fn unloaded_event_count(&self) -> usize {
        utils::lock(&self.inner).unloaded.len()
    }
}

impl RoomTimeline for InMemoryTimeline {
    fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    fn events(&self) -> Vector<Arc<TimelineEvent>> {
        utils::lock(&self.inner).loaded.clone()
    }

    fn loaded_event_count(&self) -> usize {
        utils::lock(&self.inner).loaded.len()
    }

    fn paginate_backwards(&self, num_events: u16) -> BoxFuture<'_, Result<bool, PaginationError>> {
        Box::pin(async move {
            self.stats.begin();
            let _guard = InFlightGuard(&self.stats);

            let latency = utils::lock(&self.inner).latency;
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }

            let mut inner = utils::lock(&self.inner);
            if inner.failures_remaining > 0 {
                inner.failures_remaining -= 1;
                return Err(PaginationError::Network(format!(
                    "simulated failure paginating room {}", self.room_id,
                )));
            }
            let split_at = inner.unloaded.len().saturating_sub(num_events as usize);
            let older = inner.unloaded.split_off(split_at);
            for event in older.into_iter().rev() {
                inner.loaded.push_front(event);
            }
            Ok(!inner.unloaded.is_empty())
        })
    }
}
