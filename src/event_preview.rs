//! Functions and generators for producing text previews of timeline events.
//!
//! Each event type that can be previewed has a [`PreviewGenerator`] registered
//! in a [`PreviewGeneratorTable`]. A generator may decline to produce a preview
//! (by returning `None`) and must never panic.
//!
//! The default generators produce plaintext previews such as `Alice: hello`,
//! phrased according to the room list tag the preview is shown in.

use std::{collections::HashMap, fmt, sync::Arc};

use scraper::{ElementRef, Html, Node};
use serde_json::Value;

use crate::{
    context::TagId,
    event::{event_types, TimelineEvent},
    utils,
};

/// Produces the text preview of a single event.
pub trait PreviewGenerator: Send + Sync {
    /// Returns the preview text of `event` as shown under the given room list `tag`,
    /// or `None` if this event cannot be previewed.
    ///
    /// A `tag` of `None` requests the default, context-independent preview.
    fn text_for(&self, event: &TimelineEvent, tag: Option<&TagId>) -> Option<String>;
}

impl<F> PreviewGenerator for F
where
    F: Fn(&TimelineEvent, Option<&TagId>) -> Option<String> + Send + Sync,
{
    fn text_for(&self, event: &TimelineEvent, tag: Option<&TagId>) -> Option<String> {
        self(event, tag)
    }
}

/// A preview generator registered for one event type.
#[derive(Clone)]
pub struct PreviewRegistration {
    /// If true, events of this type that lack a state key are skipped entirely,
    /// as they don't represent any current value.
    pub is_state: bool,
    pub previewer: Arc<dyn PreviewGenerator>,
}

impl PreviewRegistration {
    /// Whether the given event should be skipped without consulting the previewer.
    pub fn skips(&self, event: &TimelineEvent) -> bool {
        self.is_state && event.state_key.is_none()
    }
}

impl fmt::Debug for PreviewRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewRegistration")
            .field("is_state", &self.is_state)
            .finish_non_exhaustive()
    }
}

/// A static mapping from event type to the generator that previews it.
///
/// An event type with no registered generator cannot be previewed.
#[derive(Clone, Debug, Default)]
pub struct PreviewGeneratorTable {
    registrations: HashMap<String, PreviewRegistration>,
}

impl PreviewGeneratorTable {
    /// Creates a table without any generators.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a table with generators for all commonly-previewed event types.
    pub fn with_default_generators() -> Self {
        let mut table = Self::empty();
        table
            .register(event_types::ROOM_MESSAGE, false, MessagePreview)
            .register(event_types::STICKER, false, StickerPreview)
            .register(event_types::REACTION, false, ReactionPreview)
            .register(event_types::CALL_INVITE, false, CallPreview::Invite)
            .register(event_types::CALL_ANSWER, false, CallPreview::Answer)
            .register(event_types::CALL_HANGUP, false, CallPreview::Hangup)
            .register(event_types::POLL_START, false, PollStartPreview)
            .register(event_types::POLL_START_UNSTABLE, false, PollStartPreview)
            .register(event_types::ROOM_NAME, true, RoomNamePreview)
            .register(event_types::ROOM_TOPIC, true, RoomTopicPreview);
        table
    }

    /// Registers (or replaces) the generator for the given event type.
    pub fn register(
        &mut self,
        event_type: impl Into<String>,
        is_state: bool,
        previewer: impl PreviewGenerator + 'static,
    ) -> &mut Self {
        self.registrations.insert(
            event_type.into(),
            PreviewRegistration { is_state, previewer: Arc::new(previewer) },
        );
        self
    }

    pub fn generator_for(&self, event_type: &str) -> Option<&PreviewRegistration> {
        self.registrations.get(event_type)
    }

    /// Returns the context-free preview of a single event, or an empty string
    /// if the event cannot be previewed.
    ///
    /// This does not consult or modify any cache.
    pub fn generate_preview_for_event(&self, event: &TimelineEvent) -> String {
        self.generator_for(&event.event_type)
            .and_then(|reg| reg.previewer.text_for(event, None))
            .unwrap_or_default()
    }
}


/// What should be displayed before the text preview of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BeforeText {
    /// Nothing should be displayed before the text preview.
    Nothing,
    /// The sender's username with a colon should be displayed before the text preview.
    UsernameWithColon,
    /// The sender's username (without a colon) should be displayed before the text preview.
    UsernameWithoutColon,
}

/// A text preview of a timeline event, plus how a username should be displayed before it.
///
/// Call [`TextPreview::format_with()`] to generate displayable text
/// with the appropriately-formatted preceding username.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextPreview {
    text: String,
    before_text: BeforeText,
}
impl From<(String, BeforeText)> for TextPreview {
    fn from((text, before_text): (String, BeforeText)) -> Self {
        Self { text, before_text }
    }
}
impl TextPreview {
    /// Formats the text preview with the appropriate preceding username.
    pub fn format_with(self, username: &str) -> String {
        let Self { text, before_text } = self;
        match before_text {
            BeforeText::Nothing => text,
            BeforeText::UsernameWithColon => format!("{username}: {text}"),
            BeforeText::UsernameWithoutColon => format!("{username} {text}"),
        }
    }
}

/// Whether a message-like preview shown under `tag` should be prefixed with its sender's name.
///
/// Direct message rooms only have one other participant, and thread replies
/// are shown in the context of their thread, so neither needs the sender's name.
fn should_prefix_sender(event: &TimelineEvent, tag: Option<&TagId>) -> bool {
    !event.is_thread_event() && !tag.is_some_and(TagId::is_direct_messages)
}

/// Returns the `before_text` for a message-like event shown under `tag`.
fn message_before_text(event: &TimelineEvent, tag: Option<&TagId>) -> BeforeText {
    if should_prefix_sender(event, tag) {
        BeforeText::UsernameWithColon
    } else {
        BeforeText::Nothing
    }
}

/// Returns the string at `key` in `obj`, if it's a non-empty string after trimming.
fn non_empty_str<'a>(obj: &'a Value, key: &str) -> Option<&'a str> {
    obj.get(key)?.as_str().map(str::trim).filter(|s| !s.is_empty())
}


/// Previews `m.room.message` events.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessagePreview;

impl PreviewGenerator for MessagePreview {
    fn text_for(&self, event: &TimelineEvent, tag: Option<&TagId>) -> Option<String> {
        text_preview_of_message(event, tag).map(|tp| tp.format_with(event.sender_name()))
    }
}

/// Returns a plaintext preview of the given `m.room.message` event.
pub fn text_preview_of_message(event: &TimelineEvent, tag: Option<&TagId>) -> Option<TextPreview> {
    let content = if event.is_replacement() {
        event.content.get("m.new_content")?
    } else {
        &event.content
    };
    let msgtype = content.get("msgtype")?.as_str()?;
    let plain_body = non_empty_str(content, "body")?;

    let html_body = (content.get("format").and_then(Value::as_str) == Some("org.matrix.custom.html"))
        .then(|| non_empty_str(content, "formatted_body"))
        .flatten();
    let body = match html_body {
        Some(html) => html_to_plain_text(html),
        None if event.is_reply() => strip_plain_reply(plain_body),
        None => plain_body.to_owned(),
    };
    let body = collapse_whitespace(&body);
    if body.is_empty() {
        return None;
    }

    let before_text = message_before_text(event, tag);
    let text = match msgtype {
        "m.emote" => return Some(TextPreview::from((
            format!("* {} {}", event.sender_name(), body),
            BeforeText::Nothing,
        ))),
        "m.audio" => format!("[Audio]: {body}"),
        "m.file" => format!("[File]: {body}"),
        "m.image" => format!("[Image]: {body}"),
        "m.video" => format!("[Video]: {body}"),
        "m.location" => format!("[Location]: {body}"),
        "m.server_notice" => format!("[Server Notice]: {body}"),
        // Text, notices, and any unknown message types just show their body.
        _ => body,
    };
    Some(TextPreview::from((text, before_text)))
}


/// Previews `m.sticker` events.
#[derive(Clone, Copy, Debug, Default)]
pub struct StickerPreview;

impl PreviewGenerator for StickerPreview {
    fn text_for(&self, event: &TimelineEvent, tag: Option<&TagId>) -> Option<String> {
        let name = non_empty_str(&event.content, "body")?;
        Some(
            TextPreview::from((format!("[Sticker]: {name}"), message_before_text(event, tag)))
                .format_with(event.sender_name())
        )
    }
}


/// Previews `m.reaction` events.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReactionPreview;

impl PreviewGenerator for ReactionPreview {
    fn text_for(&self, event: &TimelineEvent, _tag: Option<&TagId>) -> Option<String> {
        let relation = event.relates_to()?;
        if relation.get("rel_type")?.as_str()? != "m.annotation" {
            return None;
        }
        let key = non_empty_str(relation, "key")?;
        Some(
            TextPreview::from((format!("reacted {key}"), BeforeText::UsernameWithoutColon))
                .format_with(event.sender_name())
        )
    }
}


/// Previews the legacy VoIP call events.
///
/// Outside of direct messages these say who did what;
/// within a direct message the call itself is what matters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallPreview {
    Invite,
    Answer,
    Hangup,
}

impl PreviewGenerator for CallPreview {
    fn text_for(&self, event: &TimelineEvent, tag: Option<&TagId>) -> Option<String> {
        let preview = if should_prefix_sender(event, tag) {
            let text = match self {
                Self::Invite => "started a call",
                Self::Answer => "joined the call",
                Self::Hangup => "ended the call",
            };
            TextPreview::from((text.to_owned(), BeforeText::UsernameWithoutColon))
        } else {
            let text = match self {
                Self::Invite => format!("{} is calling", event.sender_name()),
                Self::Answer => String::from("Call in progress"),
                Self::Hangup => String::from("Call ended"),
            };
            TextPreview::from((text, BeforeText::Nothing))
        };
        Some(preview.format_with(event.sender_name()))
    }
}


/// Previews both the stable and unstable poll start events.
#[derive(Clone, Copy, Debug, Default)]
pub struct PollStartPreview;

impl PreviewGenerator for PollStartPreview {
    fn text_for(&self, event: &TimelineEvent, tag: Option<&TagId>) -> Option<String> {
        let question = poll_question(&event.content)?;
        Some(
            TextPreview::from((format!("[Poll]: {question}"), message_before_text(event, tag)))
                .format_with(event.sender_name())
        )
    }
}

/// Extracts the question of a poll from either the stable or the MSC3381 content format.
fn poll_question(content: &Value) -> Option<String> {
    let poll = [event_types::POLL_START, event_types::POLL_START_UNSTABLE, "m.poll"]
        .into_iter()
        .find_map(|key| content.get(key))?;
    let question = poll.get("question")?;
    let text = ["m.text", "org.matrix.msc1767.text", "body"]
        .into_iter()
        .find_map(|key| match question.get(key)? {
            Value::String(s) => Some(s.as_str()),
            // Extensible events represent text as an array of mimetype-tagged bodies.
            Value::Array(bodies) => bodies.iter().find_map(|b| b.get("body")?.as_str()),
            _ => None,
        })?;
    let text = collapse_whitespace(text);
    (!text.is_empty()).then_some(text)
}


/// Previews `m.room.name` state events.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoomNamePreview;

impl PreviewGenerator for RoomNamePreview {
    fn text_for(&self, event: &TimelineEvent, _tag: Option<&TagId>) -> Option<String> {
        let text = match non_empty_str(&event.content, "name") {
            Some(name) => format!("changed this room's name to {name:?}."),
            None => String::from("removed this room's name."),
        };
        Some(TextPreview::from((text, BeforeText::UsernameWithoutColon)).format_with(event.sender_name()))
    }
}

/// Previews `m.room.topic` state events.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoomTopicPreview;

impl PreviewGenerator for RoomTopicPreview {
    fn text_for(&self, event: &TimelineEvent, _tag: Option<&TagId>) -> Option<String> {
        let text = match non_empty_str(&event.content, "topic") {
            Some(topic) => format!("changed this room's topic to {:?}.", collapse_whitespace(topic)),
            None => String::from("removed this room's topic."),
        };
        Some(TextPreview::from((text, BeforeText::UsernameWithoutColon)).format_with(event.sender_name()))
    }
}

/// Removes the quoted fallback (`> ` lines) that prefixes a plaintext reply.
pub fn strip_plain_reply(body: &str) -> String {
    let mut lines = body.lines().skip_while(|line| line.starts_with("> ")).peekable();
    if lines.peek() == Some(&"") {
        lines.next();
    }
    lines.collect::<Vec<_>>().join("\n")
}

/// Elements whose content is rendered on its own line(s).
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "li", "ul", "ol", "blockquote", "pre", "h1", "h2", "h3", "h4", "h5", "h6", "tr",
];

/// Reduces an HTML-formatted body to its plaintext content.
///
/// The body is parsed as an HTML fragment, so attributes, comments and
/// character entities are handled the way a browser would handle them.
/// Any `<mx-reply>` fallback block is dropped, and line breaks and
/// block-level elements become newlines.
pub fn html_to_plain_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut text = String::with_capacity(html.len());
    push_text_of(fragment.root_element(), &mut text);
    text
}

fn push_text_of(element: ElementRef<'_>, text: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(t) => text.push_str(t),
            Node::Element(el) => match el.name() {
                "mx-reply" => {}
                "br" => text.push('\n'),
                name => {
                    let Some(child) = ElementRef::wrap(child) else { continue };
                    let is_block = BLOCK_ELEMENTS.contains(&name);
                    if is_block {
                        text.push('\n');
                    }
                    push_text_of(child, text);
                    if is_block {
                        text.push('\n');
                    }
                }
            },
            _ => {}
        }
    }
}

/// Collapses all runs of whitespace (including newlines) into single spaces,
/// such that a preview always fits on one line.
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalizes the output of a generator before it is cached:
/// empty previews become `None`, and long previews are truncated.
pub(crate) fn normalize_preview(text: Option<String>, max_graphemes: Option<usize>) -> Option<String> {
    let text = text.filter(|t| !t.trim().is_empty())?;
    Some(match max_graphemes {
        Some(max) => utils::truncate_graphemes(text, max),
        None => text,
    })
}
