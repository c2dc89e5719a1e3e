//! The preview store: the session-owned owner of the preview cache,
//! the backfill crawler, and the change notifier.
//!
//! Create one [`PreviewStore`] when a session starts, feed it the session's
//! room and timeline events, and drop it when the session ends.
//! Intake hooks and the pull API are synchronous and never block on the network,
//! so they can be called from UI threads; backfilling happens on the Tokio runtime
//! that the store was created with.

use std::sync::{Arc, Mutex, MutexGuard};

use eyeball::SharedObservable;
use ruma::{OwnedRoomId, RoomId};
use tokio::runtime::Handle;
use tracing::debug;

use crate::{
    config::PreviewStoreConfig,
    context::PreviewContext,
    crawler::{self, CrawlerQueue, CrawlerState},
    error::StoreError,
    event::TimelineEvent,
    event_preview::PreviewGeneratorTable,
    notifier::{ChangeNotifier, PreviewSubscriber, PreviewSubscription, PreviewUpdate},
    preview_cache::{PreviewCache, Regenerated},
    timeline::{RoomRef, RoomTimeline},
    utils,
};

/// The mutable state of a preview store, guarded by a single lock.
pub(crate) struct StoreState {
    pub(crate) cache: PreviewCache,
    pub(crate) crawler: CrawlerQueue,
    /// Set when the session is no longer ready or the store was dropped.
    pub(crate) stopped: bool,
    /// Set when a room was queued while no worker was running.
    /// The worker is spawned once the state lock has been released.
    spawn_requested: bool,
}

/// The state shared between a [`PreviewStore`] and its crawler worker.
pub(crate) struct StoreShared {
    pub(crate) config: PreviewStoreConfig,
    generators: PreviewGeneratorTable,
    state: Mutex<StoreState>,
    pub(crate) notifier: ChangeNotifier,
    pub(crate) crawler_state: SharedObservable<CrawlerState>,
    pub(crate) runtime: Handle,
}

impl StoreShared {
    /// Locks the store state. The returned guard must never be held across an `.await`.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        utils::lock(&self.state)
    }

    /// Whether the crawler should fetch more history for the given room:
    /// its loaded timeline is still shorter than the lookback bound
    /// and it has no usable preview.
    pub(crate) fn should_backfill(&self, state: &StoreState, room: &dyn RoomTimeline) -> bool {
        room.loaded_event_count() < self.config.max_events_backwards
            && !state.cache.has_usable_preview(room.room_id())
    }

    /// Regenerates the given room's preview from its currently-loaded events,
    /// enqueuing change notifications if its default preview changed.
    ///
    /// Call [`ChangeNotifier::deliver_pending()`] after releasing the state lock.
    pub(crate) fn regenerate_locked(
        &self,
        state: &mut StoreState,
        room: &dyn RoomTimeline,
        context: &PreviewContext,
    ) -> Regenerated {
        let room_id = room.room_id();
        let events = room.events();
        let result = state.cache.regenerate(room_id, &events, context, &self.generators);
        if result.changed {
            debug!("Preview of room {room_id} changed (found: {})", result.found);
            self.notifier.enqueue_preview_changed(room_id);
        }
        result
    }

    /// Queues the given room for backfilling if it still lacks a usable preview,
    /// starting the crawler worker if it isn't running.
    fn queue_if_needed(self: &Arc<Self>, state: &mut StoreState, room: &RoomRef) {
        if state.stopped || !self.should_backfill(state, room.as_ref()) {
            return;
        }
        if state.crawler.enqueue(room) {
            self.crawler_state.set(CrawlerState::Running);
            state.spawn_requested = true;
        }
    }

    /// Generates the given room's preview if it has never been computed,
    /// then queues it for backfilling if needed.
    fn queue_room_if_needed(self: &Arc<Self>, state: &mut StoreState, room: &RoomRef) {
        if !state.cache.has_entry(room.room_id()) {
            let _ = self.regenerate_locked(state, room.as_ref(), &PreviewContext::Any);
        }
        self.queue_if_needed(state, room);
    }

    /// Regenerates the preview of a room whose loaded events have changed,
    /// then queues it for backfilling if that didn't yield a usable preview.
    fn refresh_room(self: &Arc<Self>, state: &mut StoreState, room: &RoomRef) {
        let _ = self.regenerate_locked(state, room.as_ref(), &PreviewContext::Any);
        self.queue_if_needed(state, room);
    }
}

/// A cache of room previews, kept up to date from the timeline and backfilled on demand.
///
/// Dropping the store stops its crawler after any in-flight page completes.
pub struct PreviewStore {
    shared: Arc<StoreShared>,
}

impl PreviewStore {
    /// Creates a new preview store whose crawler runs on the given `runtime`.
    pub fn new(
        config: PreviewStoreConfig,
        generators: PreviewGeneratorTable,
        runtime: Handle,
    ) -> Result<Self, StoreError> {
        config.validate()?;
        let cache = PreviewCache::new(&config);
        Ok(Self {
            shared: Arc::new(StoreShared {
                config,
                generators,
                state: Mutex::new(StoreState {
                    cache,
                    crawler: CrawlerQueue::default(),
                    stopped: false,
                    spawn_requested: false,
                }),
                notifier: ChangeNotifier::new(),
                crawler_state: SharedObservable::new(CrawlerState::Idle),
                runtime,
            }),
        })
    }

    /// Creates a new preview store whose crawler runs on the current Tokio runtime.
    pub fn for_current_runtime(
        config: PreviewStoreConfig,
        generators: PreviewGeneratorTable,
    ) -> Result<Self, StoreError> {
        Self::new(config, generators, Handle::try_current()?)
    }

    pub fn config(&self) -> &PreviewStoreConfig {
        &self.shared.config
    }

    /// Runs `f` with the state lock held, then starts the crawler worker if `f` queued
    /// the first room, and delivers any resulting notifications.
    fn with_state<R>(&self, f: impl FnOnce(&Arc<StoreShared>, &mut StoreState) -> R) -> R {
        let (result, spawn_worker) = {
            let mut state = self.shared.lock_state();
            let result = f(&self.shared, &mut *state);
            (result, std::mem::take(&mut state.spawn_requested))
        };
        if spawn_worker {
            crawler::spawn_worker(&self.shared);
        }
        self.shared.notifier.deliver_pending();
        result
    }

    /// To be called when the session becomes ready, with all currently-visible rooms.
    ///
    /// Each room is previewed from its loaded events, and rooms without
    /// a usable preview are queued for backfilling.
    pub fn on_ready<I>(&self, rooms: I)
    where
        I: IntoIterator<Item = RoomRef>,
    {
        self.with_state(|shared, state| {
            state.stopped = false;
            for room in rooms {
                shared.queue_room_if_needed(state, &room);
            }
            debug!("Preview store is ready, {} rooms pending backfill", state.crawler.pending_room_ids().len());
        });
    }

    /// To be called when the session is no longer ready.
    ///
    /// Clears the backfill queue and stops the crawler once its in-flight page,
    /// if any, completes. Cached previews are kept.
    pub fn on_not_ready(&self) {
        let mut state = self.shared.lock_state();
        state.stopped = true;
        state.crawler.clear();
        debug!("Preview store stopped");
    }

    /// To be called when a room becomes visible to the session.
    pub fn handle_room_added(&self, room: &RoomRef) {
        self.with_state(|shared, state| shared.queue_room_if_needed(state, room));
    }

    /// To be called when a room's timeline was reset, e.g., after a gappy sync.
    pub fn handle_timeline_reset(&self, room: &RoomRef) {
        self.with_state(|shared, state| shared.refresh_room(state, room));
    }

    /// To be called when an event was added to the given room's timeline.
    ///
    /// Historical (back-paginated) events are ignored, as they can't change
    /// the newest preview, as are rooms whose preview was never requested.
    pub fn handle_timeline_event(&self, room: &RoomRef, is_live: bool) {
        if !is_live {
            return;
        }
        self.with_state(|shared, state| {
            if state.cache.has_entry(room.room_id()) {
                shared.refresh_room(state, room);
            }
        });
    }

    /// To be called when an event in the given room was decrypted.
    pub fn handle_event_decrypted(&self, room: &RoomRef) {
        self.with_state(|shared, state| {
            if state.cache.has_entry(room.room_id()) {
                shared.refresh_room(state, room);
            }
        });
    }

    /// Returns the preview of the given room as shown in the given `context`.
    ///
    /// If the preview was never computed for this room (or this context),
    /// it is generated now from the room's loaded events; if that finds nothing,
    /// the room is queued for backfilling and `None` is returned.
    pub fn preview_for_room(&self, room: &RoomRef, context: &PreviewContext) -> Option<String> {
        self.with_state(|shared, state| {
            let room_id = room.room_id();
            if state.cache.needs_generation(room_id, context) {
                let _ = shared.regenerate_locked(state, room.as_ref(), context);
                shared.queue_if_needed(state, room);
            }
            state.cache.get(room_id, context)
        })
    }

    /// Returns the context-free preview of a single event without touching the cache,
    /// or an empty string if the event cannot be previewed.
    pub fn generate_preview_for_event(&self, event: &TimelineEvent) -> String {
        self.shared.generators.generate_preview_for_event(event)
    }

    /// Subscribes to changes of the given room's preview.
    pub fn subscribe_room(
        &self,
        room_id: OwnedRoomId,
        subscriber: Arc<dyn PreviewSubscriber>,
    ) -> PreviewSubscription {
        self.shared.notifier.subscribe_room(room_id, subscriber)
    }

    /// Subscribes to a coarse notification of every change in the cache.
    pub fn subscribe_all(&self, subscriber: Arc<dyn PreviewSubscriber>) -> PreviewSubscription {
        self.shared.notifier.subscribe_all(subscriber)
    }

    /// Returns a channel receiver of all preview updates.
    pub fn subscribe_channel(&self) -> crossbeam_channel::Receiver<PreviewUpdate> {
        self.shared.notifier.subscribe_channel()
    }

    /// Moves the given room to the front of the backfill queue,
    /// e.g., because it just scrolled into view.
    ///
    /// Returns `false` if the room isn't waiting to be backfilled.
    pub fn prioritize_room(&self, room_id: &RoomId) -> bool {
        self.shared.lock_state().crawler.prioritize(room_id)
    }

    /// The rooms pending backfill, including the one currently being backfilled, in queue order.
    pub fn pending_rooms(&self) -> Vec<OwnedRoomId> {
        self.shared.lock_state().crawler.pending_room_ids()
    }

    pub fn is_pending(&self, room_id: &RoomId) -> bool {
        self.shared.lock_state().crawler.contains(room_id)
    }

    pub fn crawler_state(&self) -> CrawlerState {
        self.shared.crawler_state.get()
    }

    /// Returns a subscriber that observes the crawler's state transitions.
    pub fn subscribe_crawler_state(&self) -> eyeball::Subscriber<CrawlerState> {
        self.shared.crawler_state.subscribe()
    }

    /// Waits until the crawler has drained its queue (or was stopped).
    pub async fn wait_until_idle(&self) {
        let mut subscriber = self.shared.crawler_state.subscribe();
        if subscriber.next_now() == CrawlerState::Idle {
            return;
        }
        while let Some(state) = subscriber.next().await {
            if state == CrawlerState::Idle {
                return;
            }
        }
    }

    /// Whether a preview computation has been attempted for the given room.
    pub fn has_entry(&self, room_id: &RoomId) -> bool {
        self.shared.lock_state().cache.has_entry(room_id)
    }

    /// Returns the contexts with an explicitly-stored preview value for the given room.
    pub fn stored_contexts(&self, room_id: &RoomId) -> Vec<PreviewContext> {
        self.shared
            .lock_state()
            .cache
            .entry(room_id)
            .map(|entry| entry.stored_contexts().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of subscribers to the given room's preview.
    pub fn room_subscriber_count(&self, room_id: &RoomId) -> usize {
        self.shared.notifier.room_subscriber_count(room_id)
    }

    /// Whether the crawler worker is alive and draining the queue.
    pub fn is_crawling(&self) -> bool {
        self.shared.lock_state().crawler.is_running()
    }
}

impl Drop for PreviewStore {
    fn drop(&mut self) {
        let mut state = self.shared.lock_state();
        state.stopped = true;
        state.crawler.clear();
    }
}
