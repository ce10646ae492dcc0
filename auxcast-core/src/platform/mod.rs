//! Music platform boundary
//!
//! The engine never talks to a streaming service directly; it consumes a
//! `MusicPlatform` implementation that answers one question: what is this
//! curator playing right now. Production wires a real client here, the
//! dev binary and tests use `StaticPlatform`.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::models::{CurrentTrack, UserId};

/// Platform-side failures
///
/// These never surface to engine callers; the synchronizer logs them and
/// keeps the previous cached track until its TTL runs out.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Platform unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to decode platform response: {0}")]
    Decode(String),

    #[error("Curator has no linked platform account")]
    NotLinked,
}

/// Source of now-playing facts for curators
#[async_trait]
pub trait MusicPlatform: Send + Sync {
    /// Platform name (e.g., "spotify", "static")
    fn name(&self) -> &'static str;

    /// Track the curator is playing right now
    ///
    /// `Ok(None)` means the account is reachable but nothing is playing.
    async fn currently_playing(
        &self,
        curator_id: &UserId,
    ) -> Result<Option<CurrentTrack>, PlatformError>;
}

/// Scripted platform for dev and tests
///
/// Holds a per-curator track that test code sets and clears explicitly.
#[derive(Debug, Default)]
pub struct StaticPlatform {
    tracks: DashMap<String, CurrentTrack>,
}

impl StaticPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script what a curator is currently playing
    pub fn set_playing(&self, curator_id: &UserId, track: CurrentTrack) {
        self.tracks.insert(curator_id.as_str().to_string(), track);
    }

    /// Script the curator as playing nothing
    pub fn clear_playing(&self, curator_id: &UserId) {
        self.tracks.remove(curator_id.as_str());
    }
}

#[async_trait]
impl MusicPlatform for StaticPlatform {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn currently_playing(
        &self,
        curator_id: &UserId,
    ) -> Result<Option<CurrentTrack>, PlatformError> {
        Ok(self
            .tracks
            .get(curator_id.as_str())
            .map(|entry| entry.clone()))
    }
}
