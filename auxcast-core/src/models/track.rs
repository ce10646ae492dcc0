use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of what a curator is currently playing
///
/// Cache-only value: lives in the fact cache under `track:{curator_id}`
/// with a TTL, never in the durable store. An expired or missing entry
/// means "unknown", which is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentTrack {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub album_art_url: Option<String>,
    /// Source platform label, e.g. "spotify"
    pub platform: String,
    /// When the platform reported this track
    pub observed_at: DateTime<Utc>,
}

impl CurrentTrack {
    #[must_use]
    pub fn new(
        track_id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            track_id: track_id.into(),
            title: title.into(),
            artist: artist.into(),
            album_art_url: None,
            platform: platform.into(),
            observed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_album_art(mut self, url: impl Into<String>) -> Self {
        self.album_art_url = Some(url.into());
        self
    }
}
