use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Number of events to request per backwards pagination.
pub const PAGE_SIZE: u16 = 25;

/// The maximum number of events we're willing to look back on to get a preview.
pub const MAX_EVENTS_BACKWARDS: usize = 100;

/// How long the crawler waits between consecutive pagination requests.
pub const PAGE_DELAY: Duration = Duration::from_millis(100);

/// The largest page size we will ever request, regardless of configuration.
const MAX_PAGE_SIZE: u16 = 100;

/// Tunables for the preview cache and its backfill crawler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewStoreConfig {
    /// Number of older events requested per pagination.
    pub page_size: u16,
    /// The lookback bound: the maximum number of events scanned for a preview,
    /// and the loaded-timeline length beyond which the crawler stops backfilling.
    pub max_events_backwards: usize,
    /// Delay between consecutive pagination requests, in milliseconds.
    pub page_delay_ms: u64,
    /// If set, previews longer than this many graphemes are truncated with an ellipsis.
    pub max_preview_graphemes: Option<usize>,
}

impl Default for PreviewStoreConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            max_events_backwards: MAX_EVENTS_BACKWARDS,
            page_delay_ms: PAGE_DELAY.as_millis() as u64,
            max_preview_graphemes: None,
        }
    }
}

impl PreviewStoreConfig {
    /// The delay between consecutive pagination requests.
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    /// The configured page size, clamped into `1..=100`.
    pub fn bounded_page_size(&self) -> u16 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_events_backwards == 0 {
            return Err(ConfigError::Invalid("`max_events_backwards` must be at least 1".into()));
        }
        if self.max_preview_graphemes == Some(0) {
            return Err(ConfigError::Invalid("`max_preview_graphemes` must be at least 1 if set".into()));
        }
        Ok(())
    }

    /// Parses and validates a config from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the config from the JSON file at the given `path`.
    ///
    /// If the file doesn't exist, the default config is returned.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json_str(&json),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No preview store config found at {}, using default.", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}
