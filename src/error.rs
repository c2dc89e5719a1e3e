use thiserror::Error;

/// Errors reported by a [`RoomTimeline`](crate::RoomTimeline) when paginating backwards.
///
/// The crawler never propagates these: a failed page simply ends
/// that room's backfill as if its history had been exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaginationError {
    /// The request to the homeserver failed.
    #[error("pagination request failed: {0}")]
    Network(String),
}

/// Errors that can occur while loading or validating a [`PreviewStoreConfig`](crate::PreviewStoreConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read preview store config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse preview store config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid preview store config: {0}")]
    Invalid(String),
}

/// Errors that can occur while constructing a [`PreviewStore`](crate::PreviewStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// There was no Tokio runtime to run the backfill crawler on.
    #[error("no Tokio runtime is available to run the backfill crawler")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
