use std::fmt;

use serde::{Deserialize, Serialize};

/// Well-known room list tags.
pub mod tags {
    pub const FAVOURITE: &str = "m.favourite";
    pub const LOW_PRIORITY: &str = "m.lowpriority";
    pub const SERVER_NOTICE: &str = "m.server_notice";
    /// Client-side grouping of direct message rooms.
    pub const DIRECT_MESSAGES: &str = "im.vector.fake.direct";
    pub const INVITES: &str = "im.vector.fake.invite";
    pub const UNTAGGED: &str = "im.vector.fake.recent";
    pub const ARCHIVED: &str = "im.vector.fake.archived";
}

/// The ID of a room list tag, e.g., `m.favourite`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagId(String);

impl TagId {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn direct_messages() -> Self {
        Self::new(tags::DIRECT_MESSAGES)
    }

    pub fn favourite() -> Self {
        Self::new(tags::FAVOURITE)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the tag grouping direct message rooms.
    ///
    /// Previews in this context don't need to name the sender.
    pub fn is_direct_messages(&self) -> bool {
        self.0 == tags::DIRECT_MESSAGES
    }
}

impl From<&str> for TagId {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The context in which a room's preview is requested.
///
/// Different room list groupings may phrase the same event differently.
/// [`PreviewContext::Any`] requests the default, context-independent preview.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PreviewContext {
    #[default]
    Any,
    Tag(TagId),
}

impl PreviewContext {
    /// Returns the tag of this context, or `None` for [`PreviewContext::Any`].
    pub fn tag(&self) -> Option<&TagId> {
        match self {
            Self::Any => None,
            Self::Tag(tag) => Some(tag),
        }
    }
}

impl From<TagId> for PreviewContext {
    fn from(tag: TagId) -> Self {
        Self::Tag(tag)
    }
}

impl From<Option<TagId>> for PreviewContext {
    fn from(tag: Option<TagId>) -> Self {
        tag.map_or(Self::Any, Self::Tag)
    }
}

impl fmt::Display for PreviewContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("<any>"),
            Self::Tag(tag) => tag.fmt(f),
        }
    }
}
