//! End-to-end scenarios of the preview store, driven through its public API.

mod support;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use room_preview_store::{
    CrawlerState, PaginationStats, PreviewContext, PreviewStoreConfig, PreviewUpdate, RoomRef,
    RoomTimeline, TagId,
};
use support::*;

#[tokio::test]
async fn loaded_message_is_previewed_immediately() {
    let store = store();
    let r = room_id("r");
    let room: RoomRef = timeline(&r, vec![message(&r, "Alice", "hi")], 1);

    assert_eq!(store.preview_for_room(&room, &PreviewContext::Any).as_deref(), Some("Alice: hi"));
    assert!(store.pending_rooms().is_empty());
}

#[tokio::test]
async fn unpreviewable_room_with_no_history_ends_without_preview() {
    let store = store();
    let r = room_id("r");
    let timeline = timeline(&r, vec![unpreviewable(&r)], 1);
    let room: RoomRef = timeline.clone();

    assert_eq!(store.preview_for_room(&room, &PreviewContext::Any), None);
    assert_eq!(store.pending_rooms(), vec![r.clone()]);
    assert_eq!(store.crawler_state(), CrawlerState::Running);

    store.wait_until_idle().await;
    assert_eq!(store.preview_for_room(&room, &PreviewContext::Any), None);
    assert!(store.pending_rooms().is_empty());
    assert_eq!(store.crawler_state(), CrawlerState::Idle);
    assert_eq!(timeline.stats().total_requests(), 1);
}

#[tokio::test]
async fn identical_context_phrasing_is_not_stored() {
    let store = store();
    let r = room_id("r");
    let mut history: Vec<_> = (0..25).map(|_| unpreviewable(&r)).collect();
    history.push(message(&r, "Bob", "see you"));
    history.extend((0..4).map(|_| unpreviewable(&r)));
    let room: RoomRef = timeline(&r, history, 30);
    let favourites = PreviewContext::Tag(TagId::favourite());

    assert_eq!(store.preview_for_room(&room, &PreviewContext::Any).as_deref(), Some("Bob: see you"));
    assert_eq!(store.preview_for_room(&room, &favourites).as_deref(), Some("Bob: see you"));
    assert_eq!(store.stored_contexts(&r), vec![PreviewContext::Any]);
}

#[tokio::test]
async fn live_event_changes_preview_and_notifies_once() {
    let store = store();
    let r = room_id("r");
    let timeline = timeline(&r, vec![message(&r, "Alice", "X")], 1);
    let room: RoomRef = timeline.clone();
    assert_eq!(store.preview_for_room(&room, &PreviewContext::Any).as_deref(), Some("Alice: X"));

    let room_updates = Arc::new(AtomicUsize::new(0));
    let any_updates = Arc::new(AtomicUsize::new(0));
    let _room_sub = store.subscribe_room(r.clone(), {
        let room_updates = room_updates.clone();
        Arc::new(move |update: &PreviewUpdate| {
            assert!(matches!(update, PreviewUpdate::RoomPreviewChanged(_)));
            room_updates.fetch_add(1, Ordering::SeqCst);
        })
    });
    let _any_sub = store.subscribe_all({
        let any_updates = any_updates.clone();
        Arc::new(move |_: &PreviewUpdate| {
            any_updates.fetch_add(1, Ordering::SeqCst);
        })
    });

    timeline.push_live_event(message(&r, "Alice", "Y"));
    store.handle_timeline_event(&room, true);

    assert_eq!(room_updates.load(Ordering::SeqCst), 1);
    assert_eq!(any_updates.load(Ordering::SeqCst), 1);
    assert_eq!(store.preview_for_room(&room, &PreviewContext::Any).as_deref(), Some("Alice: Y"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rooms_are_never_paginated_concurrently() {
    let store = store();
    let stats = Arc::new(PaginationStats::default());
    let rooms: Vec<RoomRef> = ["r1", "r2"]
        .into_iter()
        .map(|name| {
            let r = room_id(name);
            let timeline = in_memory(&r, buried_message(&r, name, 80), 3)
                .with_stats(stats.clone())
                .with_latency(Duration::from_millis(5));
            Arc::new(timeline) as RoomRef
        })
        .collect();

    store.on_ready(rooms.clone());
    store.wait_until_idle().await;

    assert_eq!(stats.max_in_flight(), 1);
    assert_eq!(stats.in_flight(), 0);
    for room in &rooms {
        assert!(store.preview_for_room(room, &PreviewContext::Any).is_some());
        assert_eq!(room.loaded_event_count(), 81);
    }
    assert!(store.pending_rooms().is_empty());
}

#[tokio::test]
async fn channel_subscribers_see_each_backfilled_room() {
    let store = store();
    let updates = store.subscribe_channel();
    let rooms: Vec<RoomRef> = ["a", "b"]
        .into_iter()
        .map(|name| {
            let r = room_id(name);
            support::timeline(&r, buried_message(&r, name, 10), 0) as RoomRef
        })
        .collect();

    store.on_ready(rooms);
    store.wait_until_idle().await;

    let changed: Vec<_> = updates
        .try_iter()
        .filter_map(|update| match update {
            PreviewUpdate::RoomPreviewChanged(room_id) => Some(room_id),
            PreviewUpdate::AnyChanged => None,
        })
        .collect();
    assert_eq!(changed, vec![room_id("a"), room_id("b")]);
}

#[tokio::test]
async fn prioritized_rooms_are_backfilled_first() {
    let store = store();
    let updates = store.subscribe_channel();
    let rooms: Vec<RoomRef> = ["a", "b", "c"]
        .into_iter()
        .map(|name| {
            let r = room_id(name);
            support::timeline(&r, buried_message(&r, name, 0), 0) as RoomRef
        })
        .collect();

    store.on_ready(rooms);
    // The worker hasn't started yet, so nothing is in flight.
    assert!(store.prioritize_room(&room_id("c")));
    assert_eq!(store.pending_rooms(), vec![room_id("c"), room_id("a"), room_id("b")]);
    store.wait_until_idle().await;

    let order: Vec<_> = updates
        .try_iter()
        .filter_map(|update| match update {
            PreviewUpdate::RoomPreviewChanged(room_id) => Some(room_id),
            PreviewUpdate::AnyChanged => None,
        })
        .collect();
    assert_eq!(order, vec![room_id("c"), room_id("a"), room_id("b")]);
    assert!(!store.prioritize_room(&room_id("c")));
}

#[tokio::test(start_paused = true)]
async fn stopping_discards_the_in_flight_page() {
    let store = store();
    let r = room_id("r");
    let timeline = Arc::new(
        in_memory(&r, buried_message(&r, "lost", 0), 0).with_latency(Duration::from_millis(50)),
    );
    let room: RoomRef = timeline.clone();

    store.handle_room_added(&room);
    // Let the worker issue its first request, then stop while it's in flight.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(timeline.stats().in_flight(), 1);
    store.on_not_ready();
    assert_eq!(store.pending_rooms(), vec![r.clone()]);

    store.wait_until_idle().await;
    assert!(store.pending_rooms().is_empty());
    assert_eq!(timeline.stats().total_requests(), 1);
    assert_eq!(timeline.loaded_event_count(), 1);
    assert_eq!(store.preview_for_room(&room, &PreviewContext::Any), None);
}

#[tokio::test]
async fn timeline_reset_requeues_the_room() {
    let store = store();
    let r = room_id("r");
    let timeline = timeline(&r, buried_message(&r, "again", 5), 6);
    let room: RoomRef = timeline.clone();
    assert_eq!(store.preview_for_room(&room, &PreviewContext::Any).as_deref(), Some("Alice: again"));

    timeline.reset(2);
    store.handle_timeline_reset(&room);
    assert_eq!(store.preview_for_room(&room, &PreviewContext::Any), None);
    assert!(store.is_pending(&r));

    store.wait_until_idle().await;
    assert_eq!(store.preview_for_room(&room, &PreviewContext::Any).as_deref(), Some("Alice: again"));
}

const PAGE_DELAY: Duration = Duration::from_millis(100);

fn delayed_config() -> PreviewStoreConfig {
    PreviewStoreConfig { page_delay_ms: 100, ..Default::default() }
}

#[tokio::test(start_paused = true)]
async fn pages_of_one_room_are_spaced_by_the_page_delay() {
    let store = store_with(delayed_config());
    let r = room_id("r");
    // 61 events need three pages of 25 to reach the message.
    let timeline = timeline(&r, buried_message(&r, "deep", 60), 0);
    let room: RoomRef = timeline.clone();

    store.handle_room_added(&room);
    store.wait_until_idle().await;

    assert_eq!(store.preview_for_room(&room, &PreviewContext::Any).as_deref(), Some("Alice: deep"));
    let times = timeline.stats().request_times();
    assert_eq!(times.len(), 3);
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= PAGE_DELAY, "pages only {:?} apart", pair[1] - pair[0]);
    }
}

#[tokio::test(start_paused = true)]
async fn stopping_during_the_page_delay_ends_the_pass() {
    let store = store_with(delayed_config());
    let r = room_id("r");
    let timeline = timeline(&r, buried_message(&r, "never reached", 60), 0);
    let room: RoomRef = timeline.clone();

    store.handle_room_added(&room);
    // The first page completes right away, then the worker waits out the delay.
    tokio::time::sleep(PAGE_DELAY / 2).await;
    assert_eq!(timeline.stats().total_requests(), 1);
    assert_eq!(timeline.stats().in_flight(), 0);
    store.on_not_ready();

    store.wait_until_idle().await;
    assert_eq!(timeline.stats().total_requests(), 1);
    assert!(store.pending_rooms().is_empty());
    assert!(!store.is_crawling());
    assert_eq!(store.preview_for_room(&room, &PreviewContext::Any), None);
}

#[tokio::test(start_paused = true)]
async fn finding_a_preview_moves_on_without_waiting() {
    let store = store_with(delayed_config());
    let a = room_id("a");
    let b = room_id("b");
    // The first page of `a` finds its message while older history remains.
    let mut history_a: Vec<_> = (0..20).map(|_| unpreviewable(&a)).collect();
    history_a.extend(buried_message(&a, "first page", 5));
    let timeline_a = timeline(&a, history_a, 0);
    let timeline_b = timeline(&b, buried_message(&b, "next", 5), 0);

    store.on_ready([timeline_a.clone() as RoomRef, timeline_b.clone() as RoomRef]);
    store.wait_until_idle().await;

    assert_eq!(timeline_a.stats().total_requests(), 1);
    assert_eq!(timeline_a.unloaded_event_count(), 1);
    let started_a = timeline_a.stats().request_times()[0];
    let started_b = timeline_b.stats().request_times()[0];
    assert!(started_b - started_a < PAGE_DELAY, "next room waited {:?}", started_b - started_a);
    assert_eq!(
        store.preview_for_room(&(timeline_b as RoomRef), &PreviewContext::Any).as_deref(),
        Some("Alice: next"),
    );
}
