use ruma::{OwnedRoomId, OwnedUserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known event type tags that have default preview generators.
pub mod event_types {
    pub const ROOM_MESSAGE: &str = "m.room.message";
    pub const STICKER: &str = "m.sticker";
    pub const REACTION: &str = "m.reaction";
    pub const CALL_INVITE: &str = "m.call.invite";
    pub const CALL_ANSWER: &str = "m.call.answer";
    pub const CALL_HANGUP: &str = "m.call.hangup";
    pub const POLL_START: &str = "m.poll.start";
    /// The unstable (MSC3381) name of the poll start event.
    pub const POLL_START_UNSTABLE: &str = "org.matrix.msc3381.poll.start";
    pub const ROOM_NAME: &str = "m.room.name";
    pub const ROOM_TOPIC: &str = "m.room.topic";
}

/// A single already-decrypted event in a room's timeline.
///
/// The preview subsystem treats the event content as opaque:
/// only the preview generators look inside of it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub room_id: OwnedRoomId,
    pub sender: OwnedUserId,
    /// The sender's display name in this room, if known.
    pub sender_display_name: Option<String>,
    /// The type tag used to look up a preview generator, e.g., `m.room.message`.
    pub event_type: String,
    /// Only present for state events.
    pub state_key: Option<String>,
    pub content: Value,
}

impl TimelineEvent {
    pub fn new(
        room_id: OwnedRoomId,
        sender: OwnedUserId,
        event_type: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            room_id,
            sender,
            sender_display_name: None,
            event_type: event_type.into(),
            state_key: None,
            content,
        }
    }

    pub fn with_state_key(mut self, state_key: impl Into<String>) -> Self {
        self.state_key = Some(state_key.into());
        self
    }

    pub fn with_sender_display_name(mut self, name: impl Into<String>) -> Self {
        self.sender_display_name = Some(name.into());
        self
    }

    /// Returns the sender's display name, falling back to the localpart of their user ID.
    pub fn sender_name(&self) -> &str {
        self.sender_display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.sender.localpart())
    }

    /// Returns the `m.relates_to` object of this event's content, if any.
    pub fn relates_to(&self) -> Option<&Value> {
        self.content.get("m.relates_to")
    }

    /// Returns the relation type (`rel_type`) of this event, if any.
    pub fn relation_type(&self) -> Option<&str> {
        self.relates_to()?.get("rel_type")?.as_str()
    }

    /// Whether this event is an edit (`m.replace`) of an earlier event.
    pub fn is_replacement(&self) -> bool {
        self.relation_type() == Some("m.replace")
    }

    /// Whether this event was sent within a thread.
    pub fn is_thread_event(&self) -> bool {
        self.relation_type() == Some("m.thread")
    }

    /// Whether this event is a reply to another event.
    pub fn is_reply(&self) -> bool {
        self.relates_to()
            .and_then(|r| r.get("m.in_reply_to"))
            .is_some_and(Value::is_object)
    }
}
