//! The cache of computed room previews.
//!
//! Each room has a sparse [`PreviewEntry`] holding the default preview (under
//! [`PreviewContext::Any`]) plus an override only for the contexts whose phrasing
//! actually differs from the default.
//! A context whose preview equals the default is never stored.
//!
//! This cache is purely in-memory and never suspends; it is driven by the
//! [`PreviewStore`](crate::PreviewStore), which owns it behind a lock.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use imbl::Vector;
use ruma::{OwnedRoomId, RoomId};

use crate::{
    config::PreviewStoreConfig,
    context::{PreviewContext, TagId},
    event::TimelineEvent,
    event_preview::{normalize_preview, PreviewGeneratorTable},
};

/// The cached preview values of a single room.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreviewEntry {
    /// The stored previews. An absent [`PreviewContext::Any`] key means
    /// "unknown": no preview was found within the loaded timeline.
    /// A value of `None` means "computed, but intentionally empty".
    by_context: BTreeMap<PreviewContext, Option<String>>,
    /// The tags that previews have been requested for in this room,
    /// which must be recomputed on every regeneration even if they're
    /// currently deduplicated away.
    tracked_tags: BTreeSet<TagId>,
}

impl PreviewEntry {
    /// Returns the preview for the given `context`,
    /// falling back to the default preview if that context has no override.
    pub fn get(&self, context: &PreviewContext) -> Option<&str> {
        self.by_context
            .get(context)
            .or_else(|| self.by_context.get(&PreviewContext::Any))
            .and_then(Option::as_deref)
    }

    /// Returns the default, context-independent preview.
    pub fn any(&self) -> Option<&str> {
        self.get(&PreviewContext::Any)
    }

    /// Whether a default preview has been found for this room.
    pub fn is_known(&self) -> bool {
        self.by_context.contains_key(&PreviewContext::Any)
    }

    /// Returns the contexts that have an explicitly-stored value.
    pub fn stored_contexts(&self) -> impl Iterator<Item = &PreviewContext> + '_ {
        self.by_context.keys()
    }

    /// Whether previews for the given tag are recomputed on each regeneration.
    pub fn tracks(&self, tag: &TagId) -> bool {
        self.tracked_tags.contains(tag)
    }
}

/// The result of regenerating a room's preview.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Regenerated {
    /// Whether a previewable event was found within the lookback bound.
    pub found: bool,
    /// Whether the room's default preview differs from its previous value.
    pub changed: bool,
}

/// Per-room storage of computed previews.
#[derive(Debug)]
pub struct PreviewCache {
    previews: BTreeMap<OwnedRoomId, PreviewEntry>,
    max_events_backwards: usize,
    max_preview_graphemes: Option<usize>,
}

impl PreviewCache {
    pub fn new(config: &PreviewStoreConfig) -> Self {
        Self {
            previews: BTreeMap::new(),
            max_events_backwards: config.max_events_backwards,
            max_preview_graphemes: config.max_preview_graphemes,
        }
    }

    pub fn entry(&self, room_id: &RoomId) -> Option<&PreviewEntry> {
        self.previews.get(room_id)
    }

    /// Whether any computation has been attempted for the given room.
    pub fn has_entry(&self, room_id: &RoomId) -> bool {
        self.previews.contains_key(room_id)
    }

    /// Returns the cached preview of the given room in the given context.
    pub fn get(&self, room_id: &RoomId, context: &PreviewContext) -> Option<String> {
        self.entry(room_id)?.get(context).map(str::to_owned)
    }

    /// Whether the given room has a non-empty default preview.
    pub fn has_usable_preview(&self, room_id: &RoomId) -> bool {
        self.entry(room_id).and_then(PreviewEntry::any).is_some()
    }

    /// Whether the given room needs to be regenerated in order to answer a request for `context`.
    pub fn needs_generation(&self, room_id: &RoomId, context: &PreviewContext) -> bool {
        match (self.entry(room_id), context) {
            (None, _) => true,
            (Some(_), PreviewContext::Any) => false,
            (Some(entry), PreviewContext::Tag(tag)) => !entry.tracks(tag),
        }
    }

    pub fn clear(&mut self) {
        self.previews.clear();
    }

    /// (Re)computes the preview of the given room from its loaded `events`
    /// (ordered oldest to newest).
    ///
    /// The events are scanned from newest to oldest, up to the lookback bound;
    /// the first event that yields a non-empty default preview determines the
    /// preview in every tracked context. If no such event is found,
    /// the room's entry is cleared to signal that more history is needed.
    pub fn regenerate(
        &mut self,
        room_id: &RoomId,
        events: &Vector<Arc<TimelineEvent>>,
        context: &PreviewContext,
        generators: &PreviewGeneratorTable,
    ) -> Regenerated {
        let max_graphemes = self.max_preview_graphemes;
        let entry = self.previews.entry(room_id.to_owned()).or_default();
        if let PreviewContext::Tag(tag) = context {
            entry.tracked_tags.insert(tag.clone());
        }
        let previous_any = entry.any().map(str::to_owned);

        for event in events.iter().rev().take(self.max_events_backwards) {
            let Some(registration) = generators.generator_for(&event.event_type) else { continue };
            if registration.skips(event) {
                continue;
            }
            let previewer = &registration.previewer;
            let Some(any_text) = normalize_preview(previewer.text_for(event, None), max_graphemes) else {
                // Not previewable for some reason, so keep looking further back.
                continue;
            };

            let mut by_context = BTreeMap::new();
            for tag in &entry.tracked_tags {
                let text = normalize_preview(previewer.text_for(event, Some(tag)), max_graphemes);
                if text.as_deref() != Some(any_text.as_str()) {
                    by_context.insert(PreviewContext::Tag(tag.clone()), text);
                }
            }
            let changed = previous_any.as_deref() != Some(any_text.as_str());
            by_context.insert(PreviewContext::Any, Some(any_text));
            entry.by_context = by_context;
            return Regenerated { found: true, changed };
        }

        // No preview was found within the lookback bound, so clear this room's preview.
        entry.by_context.clear();
        Regenerated { found: false, changed: previous_any.is_some() }
    }
}
