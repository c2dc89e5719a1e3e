//! The backfill crawler, which paginates rooms lacking a preview
//! until a previewable event is found or the lookback bound is reached.
//!
//! Rooms are processed strictly one at a time by a single worker task,
//! such that at most one pagination request is ever in flight.
//! The worker is spawned when a room is queued while no worker is running,
//! and it exits as soon as the queue is empty or the store is stopped.

use std::sync::Arc;

use indexmap::IndexMap;
use ruma::{OwnedRoomId, RoomId};
use tracing::{debug, error, warn};

use crate::{
    context::PreviewContext,
    store::StoreShared,
    timeline::RoomRef,
};

/// The state of the backfill crawler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CrawlerState {
    /// No rooms are pending and no pagination request is in flight.
    #[default]
    Idle,
    /// The worker is processing the queue of pending rooms.
    Running,
}

/// The insertion-ordered queue of rooms waiting to be backfilled.
///
/// A room is pending from the moment it's queued until its backfill pass
/// has finished, including while that pass is in flight.
#[derive(Default)]
pub(crate) struct CrawlerQueue {
    pending: IndexMap<OwnedRoomId, RoomRef>,
    /// The room currently being backfilled, which is always the first pending room.
    in_flight: Option<OwnedRoomId>,
    /// Whether the in-flight room was queued again while being backfilled.
    requeue_in_flight: bool,
    /// Whether a worker task is alive to drain this queue.
    running: bool,
}

impl CrawlerQueue {
    /// Adds the given room to the back of the queue, unless it's already pending.
    ///
    /// Returns `true` if no worker is running, in which case the caller must start one.
    pub(crate) fn enqueue(&mut self, room: &RoomRef) -> bool {
        let room_id = room.room_id();
        if self.in_flight.as_deref() == Some(room_id) {
            self.requeue_in_flight = true;
        } else if !self.pending.contains_key(room_id) {
            debug!("Queued room {room_id} for preview backfill");
            self.pending.insert(room_id.to_owned(), Arc::clone(room));
        }
        if self.running {
            false
        } else {
            self.running = true;
            true
        }
    }

    /// Marks the first pending room as in flight and returns it.
    ///
    /// If the queue is empty, the worker is considered stopped and `None` is returned.
    pub(crate) fn begin_next(&mut self) -> Option<RoomRef> {
        let next = self.pending.first().map(|(_, room)| Arc::clone(room));
        match &next {
            Some(room) => self.in_flight = Some(room.room_id().to_owned()),
            None => self.running = false,
        }
        next
    }

    /// Ends the backfill pass of the given room, removing it from the queue
    /// unless it was queued again in the meantime.
    pub(crate) fn finish(&mut self, room_id: &RoomId) {
        if self.in_flight.as_deref() == Some(room_id) {
            self.in_flight = None;
        }
        if std::mem::take(&mut self.requeue_in_flight) {
            if let Some(index) = self.pending.get_index_of(room_id) {
                let last = self.pending.len() - 1;
                self.pending.move_index(index, last);
            }
        } else {
            self.pending.shift_remove(room_id);
        }
    }

    /// Removes all rooms that are waiting to be backfilled.
    ///
    /// The in-flight room stays pending until its pass ends.
    pub(crate) fn clear(&mut self) {
        let in_flight = self.in_flight.as_ref();
        self.pending.retain(|room_id, _| Some(room_id) == in_flight);
        self.requeue_in_flight = false;
    }

    /// Empties the queue entirely and marks the worker as stopped.
    pub(crate) fn halt(&mut self) {
        self.pending.clear();
        self.in_flight = None;
        self.requeue_in_flight = false;
        self.running = false;
    }

    /// Moves the given pending room to the front of the queue,
    /// right behind the in-flight room if there is one.
    ///
    /// Returns `false` if the room isn't waiting in the queue.
    pub(crate) fn prioritize(&mut self, room_id: &RoomId) -> bool {
        if self.in_flight.as_deref() == Some(room_id) {
            return false;
        }
        let Some(index) = self.pending.get_index_of(room_id) else {
            return false;
        };
        let head = usize::from(self.in_flight.is_some());
        self.pending.move_index(index, head);
        true
    }

    pub(crate) fn contains(&self, room_id: &RoomId) -> bool {
        self.pending.contains_key(room_id)
    }

    pub(crate) fn pending_room_ids(&self) -> Vec<OwnedRoomId> {
        self.pending.keys().cloned().collect()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running
    }
}

/// Spawns the crawler's worker task onto the store's runtime.
///
/// Must only be called after [`CrawlerQueue::enqueue()`] returned `true`,
/// and never while the state lock is held: a task spawned onto a runtime
/// that has shut down is dropped right away, which resets the queue.
pub(crate) fn spawn_worker(shared: &Arc<StoreShared>) {
    let worker = WorkerGuard {
        shared: Arc::clone(shared),
        drained: false,
    };
    // The task is never joined: the guard it owns reports how it ended.
    drop(shared.runtime.spawn(run_crawler(worker)));
}

/// Owned by the worker task, so that a worker which is dropped before
/// draining the queue (e.g., when its runtime shuts down) doesn't leave
/// the queue marked as running with nobody to drain it.
struct WorkerGuard {
    shared: Arc<StoreShared>,
    /// Set once the worker loop has exited normally.
    drained: bool,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if self.drained {
            return;
        }
        let mut state = self.shared.lock_state();
        let abandoned = state.crawler.pending_room_ids();
        state.crawler.halt();
        self.shared.crawler_state.set(CrawlerState::Idle);
        error!("Preview crawler worker ended without draining its queue, abandoned rooms: {abandoned:?}");
    }
}

/// The worker loop: backfills each pending room in turn until the queue is empty.
async fn run_crawler(mut worker: WorkerGuard) {
    let shared = Arc::clone(&worker.shared);
    debug!("Preview crawler started");
    loop {
        let next = {
            let mut state = shared.lock_state();
            let next = if state.stopped {
                state.crawler.halt();
                None
            } else {
                state.crawler.begin_next()
            };
            if next.is_none() {
                shared.crawler_state.set(CrawlerState::Idle);
            }
            next
        };
        let Some(room) = next else { break };

        backfill_room(&shared, &room).await;
        shared.lock_state().crawler.finish(room.room_id());
    }
    worker.drained = true;
    debug!("Preview crawler is idle");
}

/// Paginates the given room backwards, one page at a time, for as long as it should be backfilled.
///
/// A failed page ends this room's pass just like reaching the start of its timeline.
async fn backfill_room(shared: &StoreShared, room: &RoomRef) {
    let room_id = room.room_id();
    let page_size = shared.config.bounded_page_size();
    let page_delay = shared.config.page_delay();

    loop {
        let keep_going = {
            let state = shared.lock_state();
            !state.stopped && shared.should_backfill(&state, room.as_ref())
        };
        if !keep_going {
            break;
        }

        let more_available = match room.paginate_backwards(page_size).await {
            Ok(more_available) => more_available,
            Err(error) => {
                warn!("Failed to paginate room {room_id} while backfilling its preview: {error}");
                break;
            }
        };

        let found = {
            let mut state = shared.lock_state();
            if state.stopped {
                debug!("Discarding backfilled page of room {room_id}: the preview store was stopped");
                break;
            }
            let result = shared.regenerate_locked(&mut state, room.as_ref(), &PreviewContext::Any);
            debug!(
                "Backfilled a page of room {room_id}: {} events loaded, preview found: {}",
                room.loaded_event_count(),
                result.found,
            );
            result.found
        };
        shared.notifier.deliver_pending();

        if found {
            break;
        }
        if !more_available {
            debug!("Reached the start of room {room_id}'s timeline");
            break;
        }
        if !page_delay.is_zero() {
            tokio::time::sleep(page_delay).await;
        }
    }
}
