//! Change notifications for cached room previews.
//!
//! There are two tiers of subscribers:
//! * room subscribers, notified with [`PreviewUpdate::RoomPreviewChanged`]
//!   whenever that one room's preview changes, and
//! * all-room subscribers, notified with [`PreviewUpdate::AnyChanged`]
//!   whenever anything in the cache changes.
//!
//! Bulk consumers that prefer polling can instead take a channel receiver
//! that gets every update of both tiers.
//!
//! Updates are enqueued while the cache is locked, and delivered in order
//! after it is unlocked, such that subscribers can freely query the cache.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, TryLockError, Weak},
};

use crossbeam_queue::SegQueue;
use ruma::{OwnedRoomId, RoomId};
use tracing::debug;

use crate::utils;

/// An update emitted when a cached preview changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PreviewUpdate {
    /// The preview of the given room changed.
    RoomPreviewChanged(OwnedRoomId),
    /// Something in the preview cache changed.
    AnyChanged,
}

/// Components implement this trait to receive preview updates.
///
/// This is implemented for all `Fn(&PreviewUpdate)` closures.
pub trait PreviewSubscriber: Send + Sync + 'static {
    fn on_preview_update(&self, update: &PreviewUpdate);
}

impl<F> PreviewSubscriber for F
where
    F: Fn(&PreviewUpdate) + Send + Sync + 'static,
{
    fn on_preview_update(&self, update: &PreviewUpdate) {
        self(update)
    }
}

/// Which updates a subscriber receives.
#[derive(Clone, Debug, PartialEq, Eq)]
enum SubscriptionTarget {
    Room(OwnedRoomId),
    AllRooms,
}

struct SubscriberEntry {
    id: u64,
    subscriber: Arc<dyn PreviewSubscriber>,
}

#[derive(Default)]
struct Registry {
    room_subscribers: HashMap<OwnedRoomId, Vec<SubscriberEntry>>,
    all_rooms_subscribers: Vec<SubscriberEntry>,
    channels: Vec<crossbeam_channel::Sender<PreviewUpdate>>,
    next_subscriber_id: u64,
}

impl Registry {
    fn subscribers_for(&self, update: &PreviewUpdate) -> Vec<Arc<dyn PreviewSubscriber>> {
        let entries = match update {
            PreviewUpdate::RoomPreviewChanged(room_id) => {
                self.room_subscribers.get(room_id).map(Vec::as_slice).unwrap_or_default()
            }
            PreviewUpdate::AnyChanged => self.all_rooms_subscribers.as_slice(),
        };
        entries.iter().map(|e| Arc::clone(&e.subscriber)).collect()
    }

    fn remove(&mut self, target: &SubscriptionTarget, id: u64) {
        match target {
            SubscriptionTarget::Room(room_id) => {
                if let Some(subscribers) = self.room_subscribers.get_mut(room_id) {
                    subscribers.retain(|e| e.id != id);
                    if subscribers.is_empty() {
                        self.room_subscribers.remove(room_id);
                    }
                }
            }
            SubscriptionTarget::AllRooms => self.all_rooms_subscribers.retain(|e| e.id != id),
        }
    }
}

struct NotifierShared {
    registry: Mutex<Registry>,
    /// Updates that have been emitted but not yet delivered, in emission order.
    pending: SegQueue<PreviewUpdate>,
    /// Held by whichever thread is currently delivering pending updates.
    delivering: Mutex<()>,
}

/// Emits preview updates to registered subscribers.
#[derive(Clone)]
pub struct ChangeNotifier {
    shared: Arc<NotifierShared>,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(NotifierShared {
                registry: Mutex::new(Registry::default()),
                pending: SegQueue::new(),
                delivering: Mutex::new(()),
            }),
        }
    }

    /// Subscribes to changes of the given room's preview.
    ///
    /// The subscription lasts until the returned guard is dropped.
    pub fn subscribe_room(
        &self,
        room_id: OwnedRoomId,
        subscriber: Arc<dyn PreviewSubscriber>,
    ) -> PreviewSubscription {
        self.subscribe(SubscriptionTarget::Room(room_id), subscriber)
    }

    /// Subscribes to coarse-grained notifications of any change in the cache.
    ///
    /// The subscription lasts until the returned guard is dropped.
    pub fn subscribe_all(&self, subscriber: Arc<dyn PreviewSubscriber>) -> PreviewSubscription {
        self.subscribe(SubscriptionTarget::AllRooms, subscriber)
    }

    fn subscribe(
        &self,
        target: SubscriptionTarget,
        subscriber: Arc<dyn PreviewSubscriber>,
    ) -> PreviewSubscription {
        let mut registry = utils::lock(&self.shared.registry);
        let id = registry.next_subscriber_id;
        registry.next_subscriber_id += 1;
        let entry = SubscriberEntry { id, subscriber };
        match &target {
            SubscriptionTarget::Room(room_id) => {
                registry.room_subscribers.entry(room_id.clone()).or_default().push(entry);
            }
            SubscriptionTarget::AllRooms => registry.all_rooms_subscribers.push(entry),
        }
        debug!("Added preview subscriber {id} for {target:?}");
        PreviewSubscription {
            notifier: Arc::downgrade(&self.shared),
            target,
            id,
        }
    }

    /// Returns a channel receiver that gets every update, of both tiers.
    ///
    /// The channel is unregistered once its receiver is dropped.
    pub fn subscribe_channel(&self) -> crossbeam_channel::Receiver<PreviewUpdate> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        utils::lock(&self.shared.registry).channels.push(sender);
        receiver
    }

    /// The number of subscribers to the given room's preview.
    pub fn room_subscriber_count(&self, room_id: &RoomId) -> usize {
        utils::lock(&self.shared.registry)
            .room_subscribers
            .get(room_id)
            .map_or(0, Vec::len)
    }

    /// Enqueues the notifications for a change of the given room's preview.
    ///
    /// Call [`ChangeNotifier::deliver_pending()`] after releasing any locks
    /// that subscribers may need in order to actually notify them.
    pub fn enqueue_preview_changed(&self, room_id: &RoomId) {
        self.shared.pending.push(PreviewUpdate::RoomPreviewChanged(room_id.to_owned()));
        self.shared.pending.push(PreviewUpdate::AnyChanged);
    }

    /// Delivers all pending updates to their subscribers, in the order they were enqueued.
    ///
    /// If another thread is already delivering, this returns immediately
    /// and that thread will deliver our updates too.
    pub fn deliver_pending(&self) {
        loop {
            let _delivering = match self.shared.delivering.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };
            while let Some(update) = self.shared.pending.pop() {
                self.deliver(&update);
            }
            drop(_delivering);
            // Another thread may have enqueued an update after our last pop
            // but before we released the delivery lock.
            if self.shared.pending.is_empty() {
                return;
            }
        }
    }

    fn deliver(&self, update: &PreviewUpdate) {
        let subscribers = {
            let mut registry = utils::lock(&self.shared.registry);
            registry.channels.retain(|sender| sender.send(update.clone()).is_ok());
            registry.subscribers_for(update)
        };
        // Notify subscribers only after the registry lock is released,
        // such that they can subscribe or unsubscribe from within the callback.
        for subscriber in subscribers {
            subscriber.on_preview_update(update);
        }
    }
}

/// A guard that keeps a preview subscription alive.
///
/// The subscriber is unregistered when this guard is dropped
/// or when [`PreviewSubscription::unsubscribe()`] is called.
#[must_use = "the subscription ends as soon as this guard is dropped"]
pub struct PreviewSubscription {
    notifier: Weak<NotifierShared>,
    target: SubscriptionTarget,
    id: u64,
}

impl PreviewSubscription {
    pub fn unsubscribe(self) {
        // Unsubscribing happens in the `Drop` impl.
    }
}

impl Drop for PreviewSubscription {
    fn drop(&mut self) {
        if let Some(shared) = self.notifier.upgrade() {
            utils::lock(&shared.registry).remove(&self.target, self.id);
            debug!("Removed preview subscriber {} for {:?}", self.id, self.target);
        }
    }
}
