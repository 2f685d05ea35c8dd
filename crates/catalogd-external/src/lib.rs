// SPDX-License-Identifier: GPL-3.0-or-later
//! Contracts for the daemon's external collaborators: a catalog
//! client, an audio extractor, a tag embedder, and a lyrics provider. Each
//! is a trait so the task handlers in `catalogd-application` depend only on
//! the contract, not a concrete transport.

use async_trait::async_trait;
use catalogd_domain::Thumbnail;
use serde::{Deserialize, Serialize};

// ============================================================================
// External catalog client
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAlbumRef {
    pub id: String,
    pub title: String,
    pub album_type: String,
    pub year: Option<i32>,
    pub thumbnails: Vec<Thumbnail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteArtist {
    pub id: String,
    pub name: String,
    pub thumbnails: Vec<Thumbnail>,
    pub albums: Vec<RemoteAlbumRef>,
    pub singles: Vec<RemoteAlbumRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTrackArtist {
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTrack {
    pub id: String,
    pub title: String,
    pub duration: Option<i32>,
    pub artists: Vec<RemoteTrackArtist>,
    pub track_number: Option<u32>,
    pub is_explicit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAlbum {
    pub id: String,
    pub title: String,
    pub album_type: String,
    pub year: Option<i32>,
    pub thumbnails: Vec<Thumbnail>,
    pub playlist_id: Option<String>,
    pub artists: Vec<RemoteTrackArtist>,
    pub tracks: Vec<RemoteTrack>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePlaylistTrack {
    pub audio_id: String,
    pub title: String,
    pub duration: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePlaylist {
    pub id: String,
    pub title: String,
    pub thumbnails: Vec<Thumbnail>,
    pub tracks: Vec<RemotePlaylistTrack>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartEntry {
    pub title: String,
    pub subtitle: Option<String>,
    pub thumbnails: Vec<Thumbnail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Charts {
    pub country: String,
    pub entries: Vec<ChartEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SearchFilter {
    Artists,
    Albums,
    Songs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub id: String,
    pub title: String,
    pub kind: String,
}

/// Bounded-retry, rate-limited access to the upstream music catalog.
/// Implementors own their own backoff and concurrency cap; callers treat
/// every method as a single logical call that may still fail transiently.
#[async_trait]
pub trait ExternalCatalogClient: Send + Sync {
    async fn get_artist(&self, artist_id: &str) -> anyhow::Result<RemoteArtist>;
    async fn get_album(&self, browse_id: &str) -> anyhow::Result<RemoteAlbum>;
    async fn get_playlist(&self, playlist_id: &str) -> anyhow::Result<RemotePlaylist>;
    async fn search(
        &self,
        query: &str,
        filter: Option<SearchFilter>,
        limit: u32,
    ) -> anyhow::Result<Vec<SearchResultItem>>;
    async fn get_charts(&self, country: &str) -> anyhow::Result<Charts>;
}

// ============================================================================
// Audio extractor
// ============================================================================

#[derive(Debug, Clone)]
pub struct ExtractTrackMetadata {
    pub title: String,
    pub album: String,
    pub artist: String,
    pub year: Option<i32>,
    pub track_number: Option<u32>,
    pub cover_path_override: Option<std::path::PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ExtractedAudio {
    pub local_audio_path: std::path::PathBuf,
    pub cover_path: Option<std::path::PathBuf>,
}

/// Error raised by an [`AudioExtractor`]. `is_rate_limited` is detected by a
/// substring match on the underlying tool's stderr/error text — the only
/// thing the core knows about the extractor's failure mode.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ExtractorError {
    pub message: String,
    pub rate_limited: bool,
}

impl ExtractorError {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        let rate_limited = RATE_LIMIT_MARKERS
        .iter()
        .any(|marker| message.to_lowercase().contains(marker));
        Self {
            message,
            rate_limited,
        }
    }
}

const RATE_LIMIT_MARKERS: &[&str] = &["429", "rate limit", "too many requests", "sign in to confirm"];

/// Downloads audio for a track, landing it under
/// `<music_root>/<safe(artist)>/<safe(album)>/<NN - title>.<ext>`.
#[async_trait]
pub trait AudioExtractor: Send + Sync {
    async fn extract(
        &self,
        video_id: &str,
        metadata: &ExtractTrackMetadata,
        destination_dir: &std::path::Path,
    ) -> Result<ExtractedAudio, ExtractorError>;

    /// Clears any on-disk session credentials (cookies, tokens) once, so a
    /// single rate-limit retry has a chance of succeeding.
    async fn reset_session(&self) -> anyhow::Result<()>;
}

// ============================================================================
// Tag embedder
// ============================================================================

#[derive(Debug, Clone)]
pub struct EmbedTags {
    pub title: String,
    pub album: String,
    pub artists: Vec<String>,
    pub album_artist: String,
    pub lyrics_path: Option<std::path::PathBuf>,
    pub cover_path: Option<std::path::PathBuf>,
    pub track_number: Option<u32>,
    pub year: Option<i32>,
}

/// Idempotent tag writer; failures are non-fatal.
#[async_trait]
pub trait TagEmbedder: Send + Sync {
    async fn embed(&self, audio_path: &std::path::Path, tags: &EmbedTags) -> anyhow::Result<()>;
}

// ============================================================================
// Lyrics provider
// ============================================================================

#[derive(Debug, Clone)]
pub struct LyricsQuery {
    pub track_name: String,
    pub artist_name: String,
    pub album_name: String,
    pub duration: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LyricsOutcome {
    Synced(String),
    NotSynced,
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum LyricsError {
    #[error("network error: {0}")]
    Network(String),
}

/// Queries the cached endpoint first, then the full endpoint on miss. Only synchronized (LRC) lyrics are a success; plain lyrics are
/// treated as not found.
#[async_trait]
pub trait LyricsProvider: Send + Sync {
    async fn lookup_cached(&self, query: &LyricsQuery) -> Result<LyricsOutcome, LyricsError>;
    async fn lookup_full(&self, query: &LyricsQuery) -> Result<LyricsOutcome, LyricsError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extractor_error_detects_rate_limit_substring() {
        let err = ExtractorError::new("HTTP Error 429: Too Many Requests");
        assert!(err.rate_limited);
    }

    #[test]
    fn extractor_error_plain_failure_not_rate_limited() {
        let err = ExtractorError::new("no such format found");
        assert!(!err.rate_limited);
    }
}
