// SPDX-License-Identifier: GPL-3.0-or-later
//! Entities, value objects, and pure functions shared by every other crate.
//!
//! IDs here are opaque strings sourced from the upstream catalog (artist,
//! album, track), not locally generated UUIDs: the catalog is a mirror of an
//! external source of truth, so its primary keys are theirs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Value objects
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// A reference to a performer as recorded on a track, loose by design: the
/// catalog client does not always resolve an artist reference to a local id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackArtistRef {
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlbumType {
    Album,
    Single,
    Ep,
}

impl std::fmt::Display for AlbumType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Album => write!(f, "Album"),
            Self::Single => write!(f, "Single"),
            Self::Ep => write!(f, "EP"),
        }
    }
}

impl std::str::FromStr for AlbumType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Album" => Ok(Self::Album),
            "Single" => Ok(Self::Single),
            "EP" => Ok(Self::Ep),
            other => Err(format!("unknown album type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackStatus {
    New,
    Downloading,
    Done,
    Failed,
}

impl std::fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Downloading => write!(f, "downloading"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TrackStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "downloading" => Ok(Self::Downloading),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown track status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionMode {
    Full,
    Monitor,
}

impl std::fmt::Display for SubscriptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Monitor => write!(f, "monitor"),
        }
    }
}

impl std::str::FromStr for SubscriptionMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "monitor" => Ok(Self::Monitor),
            other => Err(format!("unknown subscription mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlbumSubscriptionMode {
    Download,
    Monitor,
}

impl std::fmt::Display for AlbumSubscriptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Download => write!(f, "download"),
            Self::Monitor => write!(f, "monitor"),
        }
    }
}

impl std::str::FromStr for AlbumSubscriptionMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(Self::Download),
            "monitor" => Ok(Self::Monitor),
            other => Err(format!("unknown album subscription mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Idle,
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Pending => write!(f, "pending"),
            Self::Downloading => write!(f, "downloading"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DownloadStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "pending" => Ok(Self::Pending),
            "downloading" => Ok(Self::Downloading),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown download status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Reserved,
    Done,
    Failed,
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Reserved => write!(f, "reserved"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "reserved" => Ok(Self::Reserved),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// The four task handler names, doubling as `Job.type` values. A row whose
/// `job_type` column doesn't match one of these (an operator-inserted row,
/// a column from a since-removed handler) fails `FromStr`; the queue's
/// `reserve` catches that and fails the job terminally rather than
/// propagating the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    SyncArtist,
    ImportAlbum,
    DownloadTrack,
    DownloadLyrics,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyncArtist => "sync_artist",
            Self::ImportAlbum => "import_album",
            Self::DownloadTrack => "download_track",
            Self::DownloadLyrics => "download_lyrics",
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync_artist" => Ok(Self::SyncArtist),
            "import_album" => Ok(Self::ImportAlbum),
            "download_track" => Ok(Self::DownloadTrack),
            "download_lyrics" => Ok(Self::DownloadLyrics),
            other => Err(format!("unknown job type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    String,
    Int,
    Bool,
    Json,
}

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artist {
    pub artist_id: String,
    pub name: String,
    pub thumbnails: Vec<Thumbnail>,
    pub image_local: Option<String>,
    pub followed: bool,
    pub created_at: DateTime<Utc>,
}

impl Artist {
    pub fn new(artist_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            artist_id: artist_id.into(),
            name: name.into(),
            thumbnails: Vec::new(),
            image_local: None,
            followed: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Album {
    pub album_id: String,
    pub title: String,
    pub album_type: AlbumType,
    pub artist_id: Option<String>,
    pub thumbnails: Vec<Thumbnail>,
    pub image_local: Option<String>,
    pub playlist_id: Option<String>,
    pub year: Option<i32>,
}

impl Album {
    pub fn new(album_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            album_id: album_id.into(),
            title: title.into(),
            album_type: AlbumType::Album,
            artist_id: None,
            thumbnails: Vec::new(),
            image_local: None,
            playlist_id: None,
            year: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub track_id: String,
    pub title: String,
    pub duration: Option<i64>,
    pub artists: Vec<TrackArtistRef>,
    pub album_id: Option<String>,
    pub track_number: Option<u32>,
    pub has_lyrics: bool,
    pub lyrics_local: Option<String>,
    pub file_path: Option<String>,
    pub status: TrackStatus,
    pub artist_valid: bool,
    pub created_at: DateTime<Utc>,
}

impl Track {
    pub fn new(track_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            title: title.into(),
            duration: None,
            artists: Vec::new(),
            album_id: None,
            track_number: None,
            has_lyrics: false,
            lyrics_local: None,
            file_path: None,
            status: TrackStatus::New,
            artist_valid: true,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtistSubscription {
    pub artist_id: String,
    pub mode: SubscriptionMode,
    pub enabled: bool,
    pub sync_interval_hours: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ArtistSubscription {
    pub fn new(artist_id: impl Into<String>, sync_interval_hours: i64) -> Self {
        Self {
            artist_id: artist_id.into(),
            mode: SubscriptionMode::Full,
            enabled: true,
            sync_interval_hours,
            last_synced_at: None,
            last_error: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumSubscription {
    pub album_id: String,
    pub artist_id: Option<String>,
    pub mode: AlbumSubscriptionMode,
    pub download_status: DownloadStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AlbumSubscription {
    pub fn new(album_id: impl Into<String>, artist_id: Option<String>) -> Self {
        Self {
            album_id: album_id.into(),
            artist_id,
            mode: AlbumSubscriptionMode::Download,
            download_status: DownloadStatus::Idle,
            last_synced_at: None,
            last_error: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub priority: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub reserved_by: Option<String>,
    pub last_error: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub user_id: Option<String>,
}

pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub value_type: SettingType,
}

// ============================================================================
// Validation
// ============================================================================

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

pub trait Validate {
    fn validate(&self) -> Result<(), Vec<ValidationError>>;
}

impl Validate for Artist {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.artist_id.trim().is_empty() {
            errors.push(ValidationError {
                    field: "artist_id",
                    message: "artist_id cannot be empty".into(),
            });
        }
        if self.name.trim().is_empty() {
            errors.push(ValidationError {
                    field: "name",
                    message: "name cannot be empty".into(),
            });
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Validate for Album {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.album_id.trim().is_empty() {
            errors.push(ValidationError {
                    field: "album_id",
                    message: "album_id cannot be empty".into(),
            });
        }
        if self.title.trim().is_empty() {
            errors.push(ValidationError {
                    field: "title",
                    message: "title cannot be empty".into(),
            });
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Validate for Track {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.track_id.trim().is_empty() {
            errors.push(ValidationError {
                    field: "track_id",
                    message: "track_id cannot be empty".into(),
            });
        }
        if self.title.trim().is_empty() {
            errors.push(ValidationError {
                    field: "title",
                    message: "title cannot be empty".into(),
            });
        }
        // I3: file_path is non-null iff status is done (or a redownload in flight).
        if self.file_path.is_some() && self.status == TrackStatus::New {
            errors.push(ValidationError {
                    field: "file_path",
                    message: "a new track must not have a file_path yet".into(),
            });
        }
        // I4: lyrics_local is non-null iff has_lyrics.
        if self.has_lyrics != self.lyrics_local.is_some() {
            errors.push(ValidationError {
                    field: "lyrics_local",
                    message: "lyrics_local must be set iff has_lyrics is true".into(),
            });
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Validate for ArtistSubscription {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.sync_interval_hours <= 0 {
            errors.push(ValidationError {
                    field: "sync_interval_hours",
                    message: "sync_interval_hours must be positive".into(),
            });
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Validate for Job {
    fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        // I6.
        if self.attempts > self.max_attempts {
            errors.push(ValidationError {
                    field: "attempts",
                    message: "attempts must not exceed max_attempts".into(),
            });
        }
        // I5.
        match self.status {
            JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled => {
                if self.finished_at.is_none() {
                    errors.push(ValidationError {
                            field: "finished_at",
                            message: "terminal jobs must have finished_at set".into(),
                    });
                }
            }
            JobStatus::Reserved => {
                if self.started_at.is_none() || self.reserved_by.is_none() {
                    errors.push(ValidationError {
                            field: "reserved_by",
                            message: "reserved jobs must have started_at and reserved_by set".into(),
                    });
                }
            }
            JobStatus::Queued => {}
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

// ============================================================================
// Filesystem naming and path layout
// ============================================================================

/// Keeps only alphanumerics, spaces, and `. - _ ()`; everything else is
/// dropped (not replaced) so the result never drifts in length from a
/// substitution policy. Matches the upstream extractor's own filter.
pub fn safe_component(input: &str) -> String {
    input
    .chars()
    .filter(|c| c.is_alphanumeric() || " .-_()".contains(*c))
    .collect::<String>()
    .trim()
    .to_string()
}

/// Builds `<music_root>/<safe(artist)>/<safe(album)>/<NN - title>.<ext>`.
pub fn generate_track_path(
    music_root: &Path,
    artist: &str,
    album: &str,
    track_number: Option<u32>,
    track_title: &str,
    extension: &str,
) -> PathBuf {
    let artist_component = safe_component(artist);
    let album_component = safe_component(album);
    let title_component = safe_component(track_title);
    let file_stem = match track_number {
        Some(n) if n > 0 => format!("{:02} - {}", n, title_component),
        _ => title_component,
    };
    let file_name = if extension.is_empty() {
        file_stem
    } else {
        format!("{}.{}", file_stem, extension.trim_start_matches('.'))
    };
    music_root
    .join(artist_component)
    .join(album_component)
    .join(file_name)
}

// ============================================================================
// Thumbnail selection — preserved bit-for-bit
// ============================================================================

/// Prefers the greatest known width; ties (including all-unknown widths)
/// fall back to the last url in the list. Changing this changes which file
/// `image_local` points at across re-syncs, so the tie-break order matters.
pub fn pick_best_thumbnail(thumbnails: &[Thumbnail]) -> Option<&Thumbnail> {
    thumbnails
    .iter()
    .enumerate()
    .max_by_key(|(idx, t)| (t.width.unwrap_or(0), *idx))
    .map(|(_, t)| t)
}

/// True if the persisted thumbnail set differs from the freshly fetched one,
/// ignoring order-irrelevant details the source ignores: only the set of
/// urls is compared.
pub fn thumbnails_changed(persisted: &[Thumbnail], fetched: &[Thumbnail]) -> bool {
    let p: std::collections::BTreeSet<&str> = persisted.iter().map(|t| t.url.as_str()).collect();
    let f: std::collections::BTreeSet<&str> = fetched.iter().map(|t| t.url.as_str()).collect();
    p != f
}

// ============================================================================
// Audio id / video id title match heuristic — deliberately loose
// ============================================================================

/// Strips a single trailing parenthesized suffix, e.g. `"Song (Live)"` →
/// `"Song"`. Only the first such suffix is stripped, matching the source.
fn strip_first_paren_suffix(s: &str) -> &str {
    if let Some(open) = s.find('(') {
        if s.trim_end().ends_with(')') {
            return s[..open].trim_end();
        }
    }
    s
}

/// Loose equality used to decide whether a playlist track and an album-
/// endpoint track describe the same recording: case-insensitive equality,
/// containment in either direction, or equality after stripping the first
/// parenthesized suffix from either side. Do not tighten this — calls the
/// looseness a compatibility requirement, not a bug.
pub fn titles_match(a: &str, b: &str) -> bool {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    if a_lower == b_lower {
        return true;
    }
    if a_lower.contains(&b_lower) || b_lower.contains(&a_lower) {
        return true;
    }
    let a_stripped = strip_first_paren_suffix(&a_lower).trim();
    let b_stripped = strip_first_paren_suffix(&b_lower).trim();
    a_stripped == b_stripped
}

// ============================================================================
// Album-subscription status aggregation
// ============================================================================

pub fn aggregate_download_status(track_statuses: &[TrackStatus]) -> DownloadStatus {
    if track_statuses.is_empty() {
        return DownloadStatus::Pending;
    }
    if track_statuses.iter().all(|s| *s == TrackStatus::Done) {
        return DownloadStatus::Completed;
    }
    if track_statuses
    .iter()
    .any(|s| *s == TrackStatus::Downloading)
    {
        return DownloadStatus::Downloading;
    }
    if track_statuses.iter().all(|s| *s == TrackStatus::Failed) {
        return DownloadStatus::Failed;
    }
    DownloadStatus::Pending
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_component_keeps_whitelist_only() {
        assert_eq!(safe_component("AC/DC"), "ACDC");
        assert_eq!(safe_component("Song (Live) - 2024!"), "Song (Live) - 2024");
    }

    #[test]
    fn generate_track_path_formats_track_number() {
        let base = PathBuf::from("/music");
        let path = generate_track_path(&base, "Arti:st", "Alb*um", Some(3), "Intro/Song", "flac");
        assert_eq!(path, Path::new("/music/Artist/Album/03 - IntroSong.flac"));
    }

    #[test]
    fn generate_track_path_no_number_omits_prefix() {
        let base = PathBuf::from("/music");
        let path = generate_track_path(&base, "Artist", "Album", None, "Song", "mp3");
        assert_eq!(path, Path::new("/music/Artist/Album/Song.mp3"));
    }

    #[test]
    fn pick_best_thumbnail_prefers_greatest_width() {
        let thumbs = vec![
            Thumbnail { url: "a".into(), width: Some(100), height: None },
            Thumbnail { url: "b".into(), width: Some(400), height: None },
            Thumbnail { url: "c".into(), width: Some(200), height: None },
        ];
        assert_eq!(pick_best_thumbnail(&thumbs).unwrap().url, "b");
    }

    #[test]
    fn pick_best_thumbnail_ties_fall_back_to_last() {
        let thumbs = vec![
            Thumbnail { url: "a".into(), width: Some(300), height: None },
            Thumbnail { url: "b".into(), width: Some(300), height: None },
        ];
        assert_eq!(pick_best_thumbnail(&thumbs).unwrap().url, "b");
    }

    #[test]
    fn pick_best_thumbnail_all_unknown_widths_falls_back_to_last() {
        let thumbs = vec![
            Thumbnail { url: "a".into(), width: None, height: None },
            Thumbnail { url: "b".into(), width: None, height: None },
        ];
        assert_eq!(pick_best_thumbnail(&thumbs).unwrap().url, "b");
    }

    #[test]
    fn thumbnails_changed_ignores_order() {
        let a = vec![
            Thumbnail { url: "x".into(), width: Some(1), height: None },
            Thumbnail { url: "y".into(), width: Some(2), height: None },
        ];
        let b = vec![
            Thumbnail { url: "y".into(), width: Some(2), height: None },
            Thumbnail { url: "x".into(), width: Some(1), height: None },
        ];
        assert!(!thumbnails_changed(&a, &b));
    }

    #[test]
    fn titles_match_case_insensitive_equality() {
        assert!(titles_match("Song Title", "song title"));
    }

    #[test]
    fn titles_match_containment_either_direction() {
        assert!(titles_match("Song", "Song (Extended Mix)"));
        assert!(titles_match("Song (Extended Mix)", "Song"));
    }

    #[test]
    fn titles_match_strips_parenthesized_suffix() {
        assert!(titles_match("Song Live", "Song (Live)"));
    }

    #[test]
    fn titles_match_unrelated_titles_fail() {
        assert!(!titles_match("Song One", "Completely Different"));
    }

    #[test]
    fn aggregate_status_empty_is_pending() {
        assert_eq!(aggregate_download_status(&[]), DownloadStatus::Pending);
    }

    #[test]
    fn aggregate_status_all_done_is_completed() {
        let s = [TrackStatus::Done, TrackStatus::Done];
        assert_eq!(aggregate_download_status(&s), DownloadStatus::Completed);
    }

    #[test]
    fn aggregate_status_any_downloading_wins() {
        let s = [TrackStatus::Done, TrackStatus::Downloading, TrackStatus::Failed];
        assert_eq!(aggregate_download_status(&s), DownloadStatus::Downloading);
    }

    #[test]
    fn aggregate_status_all_failed_is_failed() {
        let s = [TrackStatus::Failed, TrackStatus::Failed];
        assert_eq!(aggregate_download_status(&s), DownloadStatus::Failed);
    }

    #[test]
    fn aggregate_status_mixed_new_and_done_is_pending() {
        let s = [TrackStatus::Done, TrackStatus::New];
        assert_eq!(aggregate_download_status(&s), DownloadStatus::Pending);
    }

    #[test]
    fn aggregate_status_mixed_new_and_failed_is_pending() {
        let s = [TrackStatus::Failed, TrackStatus::New];
        assert_eq!(aggregate_download_status(&s), DownloadStatus::Pending);
    }

    #[test]
    fn track_validation_file_path_requires_non_new_status() {
        let mut t = Track::new("t1", "Song");
        t.file_path = Some("/music/a/b/c.flac".into());
        let errs = t.validate().unwrap_err();
        assert!(errs.iter().any(|e| e.field == "file_path"));
    }

    #[test]
    fn track_validation_lyrics_local_must_match_has_lyrics() {
        let mut t = Track::new("t1", "Song");
        t.has_lyrics = true;
        let errs = t.validate().unwrap_err();
        assert!(errs.iter().any(|e| e.field == "lyrics_local"));
    }

    #[test]
    fn job_validation_terminal_requires_finished_at() {
        let job = Job {
            id: 1,
            job_type: JobType::SyncArtist,
            payload: serde_json::json!({}),
            status: JobStatus::Done,
            attempts: 1,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            priority: 0,
            scheduled_at: None,
            started_at: Some(Utc::now()),
            finished_at: None,
            reserved_by: None,
            last_error: None,
            result: None,
            created_at: Utc::now(),
            user_id: None,
        };
        let errs = job.validate().unwrap_err();
        assert!(errs.iter().any(|e| e.field == "finished_at"));
    }

    #[test]
    fn job_type_round_trips_through_str() {
        for jt in [
            JobType::SyncArtist,
            JobType::ImportAlbum,
            JobType::DownloadTrack,
            JobType::DownloadLyrics,
        ] {
            let s = jt.as_str();
            assert_eq!(s.parse::<JobType>().unwrap(), jt);
        }
    }
}
