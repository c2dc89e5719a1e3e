//! Helpers shared by the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use room_preview_store::{
    event::event_types, InMemoryTimeline, PreviewGeneratorTable, PreviewStore, PreviewStoreConfig,
    TimelineEvent,
};
use ruma::{OwnedRoomId, UserId};
use serde_json::json;

pub fn room_id(name: &str) -> OwnedRoomId {
    OwnedRoomId::try_from(format!("!{name}:example.org")).unwrap()
}

/// A text message sent by a user whose localpart is the lowercased display name.
pub fn message(room_id: &OwnedRoomId, sender: &str, body: &str) -> TimelineEvent {
    TimelineEvent::new(
        room_id.clone(),
        UserId::parse(format!("@{}:example.org", sender.to_lowercase())).unwrap(),
        event_types::ROOM_MESSAGE,
        json!({ "msgtype": "m.text", "body": body }),
    )
    .with_sender_display_name(sender)
}

/// An event of a type that has no preview generator.
pub fn unpreviewable(room_id: &OwnedRoomId) -> TimelineEvent {
    TimelineEvent::new(
        room_id.clone(),
        UserId::parse("@someone:example.org").unwrap(),
        "org.example.unpreviewable",
        json!({}),
    )
}

/// A history made of one message followed by `newer` unpreviewable events.
pub fn buried_message(room_id: &OwnedRoomId, body: &str, newer: usize) -> Vec<TimelineEvent> {
    let mut history = vec![message(room_id, "Alice", body)];
    history.extend((0..newer).map(|_| unpreviewable(room_id)));
    history
}

/// The default config, without any delay between pages.
pub fn config() -> PreviewStoreConfig {
    PreviewStoreConfig { page_delay_ms: 0, ..Default::default() }
}

/// A store with the default generators, running its crawler on the current runtime.
pub fn store() -> PreviewStore {
    store_with(config())
}

pub fn store_with(config: PreviewStoreConfig) -> PreviewStore {
    PreviewStore::for_current_runtime(config, PreviewGeneratorTable::with_default_generators()).unwrap()
}

pub fn in_memory(room_id: &OwnedRoomId, history: Vec<TimelineEvent>, initially_loaded: usize) -> InMemoryTimeline {
    InMemoryTimeline::new(room_id.clone(), history, initially_loaded)
}

pub fn timeline(room_id: &OwnedRoomId, history: Vec<TimelineEvent>, initially_loaded: usize) -> Arc<InMemoryTimeline> {
    Arc::new(in_memory(room_id, history, initially_loaded))
}
