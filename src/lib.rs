//! A cache of short, human-readable previews of each room's latest message,
//! plus a background crawler that backfills room history on demand
//! until a previewable event is found.
//!
//! The [`PreviewStore`] is owned by a logged-in session:
//! it is created when the session becomes ready and dropped when it ends,
//! so multiple sessions never share cached previews.

/// Configuration of the page size, lookback bound, and crawler pacing.
pub mod config;
/// Preview contexts (room list tags) and the reserved "any" context.
pub mod context;
/// Error types.
pub mod error;
/// Timeline event records consumed by the preview generators.
pub mod event;
/// Generating text previews of timeline events.
pub mod event_preview;
/// The per-room preview cache and its bounded newest-first scan.
pub mod preview_cache;
/// Observer lists and channels that are notified when previews change.
pub mod notifier;
/// The single-flight backfill crawler.
pub mod crawler;
/// The session-owned facade tying the cache, crawler, and notifier together.
pub mod store;
/// The timeline source contract that rooms must implement.
pub mod timeline;

mod utils;

pub use config::PreviewStoreConfig;
pub use context::{PreviewContext, TagId};
pub use crawler::CrawlerState;
pub use error::{ConfigError, PaginationError, StoreError};
pub use event::TimelineEvent;
pub use event_preview::{PreviewGenerator, PreviewGeneratorTable, PreviewRegistration};
pub use notifier::{PreviewSubscriber, PreviewSubscription, PreviewUpdate};
pub use preview_cache::PreviewEntry;
pub use store::PreviewStore;
pub use timeline::{InMemoryTimeline, PaginationStats, RoomRef, RoomTimeline};
