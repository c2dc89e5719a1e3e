//! Properties that must hold for every room, context, and crawl.

mod support;

use room_preview_store::{
    context::tags, event::event_types, CrawlerState, PreviewContext, PreviewUpdate, RoomRef, TagId,
    TimelineEvent,
};
use ruma::UserId;
use serde_json::json;
use support::*;

fn contexts() -> Vec<PreviewContext> {
    vec![
        PreviewContext::Any,
        PreviewContext::Tag(TagId::favourite()),
        PreviewContext::Tag(TagId::direct_messages()),
        PreviewContext::Tag(TagId::new(tags::LOW_PRIORITY)),
    ]
}

#[tokio::test]
async fn stored_context_overrides_always_differ_from_the_default() {
    let store = store();
    let dm = room_id("dm");
    let group = room_id("group");
    let call = room_id("call");
    let call_events = vec![
        message(&call, "Carol", "ring ring"),
        TimelineEvent::new(
            call.clone(),
            UserId::parse("@carol:example.org").unwrap(),
            event_types::CALL_INVITE,
            json!({ "call_id": "1" }),
        )
        .with_sender_display_name("Carol"),
    ];
    let rooms: Vec<RoomRef> = vec![
        timeline(&dm, vec![message(&dm, "Alice", "are you there?")], 1) as RoomRef,
        timeline(&group, vec![message(&group, "Bob", "lunch?")], 1) as RoomRef,
        timeline(&call, call_events, 2) as RoomRef,
    ];

    for room in &rooms {
        let room_id = room.room_id();
        for context in contexts() {
            let _ = store.preview_for_room(room, &context);
        }
        let default = store.preview_for_room(room, &PreviewContext::Any);
        assert!(default.is_some(), "room {room_id} has no preview");
        for context in store.stored_contexts(room_id) {
            if context != PreviewContext::Any {
                assert_ne!(store.preview_for_room(room, &context), default, "{context} in {room_id}");
            }
        }
    }
    // Messages are only phrased differently in direct messages.
    assert_eq!(
        store.stored_contexts(&group),
        vec![PreviewContext::Any, PreviewContext::Tag(TagId::direct_messages())],
    );
}

#[tokio::test]
async fn regenerating_an_unchanged_timeline_notifies_once() {
    let store = store();
    let r = room_id("r");
    let timeline = timeline(&r, vec![message(&r, "Alice", "stable")], 1);
    let room: RoomRef = timeline.clone();
    let updates = store.subscribe_channel();

    let first = store.preview_for_room(&room, &PreviewContext::Any);
    store.handle_timeline_event(&room, true);
    store.handle_event_decrypted(&room);
    let second = store.preview_for_room(&room, &PreviewContext::Any);

    assert_eq!(first, second);
    let room_updates = updates
        .try_iter()
        .filter(|update| matches!(update, PreviewUpdate::RoomPreviewChanged(_)))
        .count();
    assert_eq!(room_updates, 1);
}

#[tokio::test]
async fn scan_never_reaches_past_the_lookback_bound() {
    let store = store();
    let r = room_id("r");
    let timeline = timeline(&r, buried_message(&r, "too far", 100), 101);
    let room: RoomRef = timeline.clone();

    assert_eq!(store.preview_for_room(&room, &PreviewContext::Any), None);
    // Enough events are already loaded, so there is nothing to backfill.
    assert!(store.pending_rooms().is_empty());
    assert_eq!(store.crawler_state(), CrawlerState::Idle);
    assert_eq!(timeline.stats().total_requests(), 0);

    // A single newer previewable event brings the room back.
    timeline.push_live_event(message(&r, "Bob", "fresh"));
    store.handle_timeline_event(&room, true);
    assert_eq!(store.preview_for_room(&room, &PreviewContext::Any).as_deref(), Some("Bob: fresh"));
}

#[tokio::test]
async fn queue_drains_for_short_histories() {
    let store = store();
    let rooms: Vec<RoomRef> = (0..6)
        .map(|i| {
            let r = room_id(&format!("r{i}"));
            // Odd rooms have nothing previewable at all.
            let history = if i % 2 == 0 {
                buried_message(&r, "hello", i * 7)
            } else {
                (0..i * 7).map(|_| unpreviewable(&r)).collect()
            };
            timeline(&r, history, 2) as RoomRef
        })
        .collect();

    store.on_ready(rooms.clone());
    store.wait_until_idle().await;

    assert!(store.pending_rooms().is_empty());
    assert_eq!(store.crawler_state(), CrawlerState::Idle);
    assert!(!store.is_crawling());
    for (i, room) in rooms.iter().enumerate() {
        let preview = store.preview_for_room(room, &PreviewContext::Any);
        assert_eq!(preview.is_some(), i % 2 == 0, "room {}", room.room_id());
    }
}
