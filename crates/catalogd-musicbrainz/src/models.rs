// SPDX-License-Identifier: GPL-3.0-or-later
//! Wire-format types for the subset of the MusicBrainz / Cover Art Archive
//! JSON APIs this adapter consumes, plus their conversion into the
//! transport-agnostic DTOs `catalogd-external` defines.

use catalogd_domain::Thumbnail;
use catalogd_external::{
    RemoteAlbum, RemoteAlbumRef, RemoteArtist, RemotePlaylist, RemotePlaylistTrack,
    RemoteTrack, RemoteTrackArtist,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MbArtistLookup {
    pub id: String,
    pub name: String,
    #[serde(rename = "release-groups", default)]
    pub release_groups: Vec<MbReleaseGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MbReleaseGroup {
    pub id: String,
    pub title: String,
    #[serde(rename = "primary-type", default)]
    pub primary_type: Option<String>,
    #[serde(rename = "first-release-date", default)]
    pub first_release_date: Option<String>,
    #[serde(rename = "artist-credit", default)]
    pub artist_credit: Vec<MbArtistCredit>,
    #[serde(default)]
    pub releases: Vec<MbReleaseRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MbReleaseRef {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MbArtistCredit {
    pub name: String,
    pub artist: MbArtistRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MbArtistRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MbRelease {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub media: Vec<MbMedium>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MbMedium {
    #[serde(default)]
    pub tracks: Vec<MbTrack>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MbTrack {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub position: Option<u32>,
    #[serde(default)]
    pub length: Option<i32>,
    #[serde(default)]
    pub recording: Option<MbRecordingRef>,
    #[serde(rename = "artist-credit", default)]
    pub artist_credit: Vec<MbArtistCredit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MbRecordingRef {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverArtResponse {
    #[serde(default)]
    pub images: Vec<CoverArtImage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverArtImage {
    pub image: String,
    #[serde(default)]
    pub front: bool,
    #[serde(default)]
    pub thumbnails: CoverArtThumbnails,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoverArtThumbnails {
    pub small: Option<String>,
    pub large: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MbArtistSearchResponse {
    #[serde(default)]
    pub artists: Vec<MbArtistCredit2>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MbArtistCredit2 {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MbReleaseGroupSearchResponse {
    #[serde(rename = "release-groups", default)]
    pub release_groups: Vec<MbReleaseGroup>,
}

fn cover_art_thumbnails(cover: &CoverArtResponse) -> Vec<Thumbnail> {
    cover
    .images
    .iter()
    .filter(|i| i.front || cover.images.len() == 1)
    .flat_map(|i| {
            let mut out = Vec::new();
            if let Some(small) = &i.thumbnails.small {
                out.push(Thumbnail {
                        url: small.clone(),
                        width: Some(250),
                        height: Some(250),
                });
            }
            if let Some(large) = &i.thumbnails.large {
                out.push(Thumbnail {
                        url: large.clone(),
                        width: Some(500),
                        height: Some(500),
                });
            }
            if out.is_empty() {
                out.push(Thumbnail {
                        url: i.image.clone(),
                        width: None,
                        height: None,
                });
            }
            out
    })
    .collect()
}

fn parse_year(first_release_date: &Option<String>) -> Option<i32> {
    first_release_date
    .as_ref()
    .and_then(|d| d.get(0..4))
    .and_then(|y| y.parse().ok())
}

pub fn release_group_to_album_ref(rg: &MbReleaseGroup, cover: Option<&CoverArtResponse>) -> RemoteAlbumRef {
    RemoteAlbumRef {
        id: rg.id.clone(),
        title: rg.title.clone(),
        album_type: rg
        .primary_type
        .clone()
        .unwrap_or_else(|| "Album".to_string()),
        year: parse_year(&rg.first_release_date),
        thumbnails: cover.map(cover_art_thumbnails).unwrap_or_default(),
    }
}

pub fn artist_lookup_to_remote(
    artist: MbArtistLookup,
    covers: &std::collections::HashMap<String, CoverArtResponse>,
) -> RemoteArtist {
    let mut albums = Vec::new();
    let mut singles = Vec::new();
    for rg in &artist.release_groups {
        let cover = covers.get(&rg.id);
        let reference = release_group_to_album_ref(rg, cover);
        match rg.primary_type.as_deref() {
            Some("Single") => singles.push(reference),
            _ => albums.push(reference),
        }
    }
    RemoteArtist {
        id: artist.id,
        name: artist.name,
        // MusicBrainz carries no artist imagery of its own; a production
        // deployment would layer Fanart.tv/last.fm art on top of this call.
        thumbnails: Vec::new(),
        albums,
        singles,
    }
}

pub fn release_to_remote_album(
    rg: &MbReleaseGroup,
    release: &MbRelease,
    cover: Option<&CoverArtResponse>,
) -> RemoteAlbum {
    let artists = rg
    .artist_credit
    .iter()
    .map(|c| RemoteTrackArtist {
            id: Some(c.artist.id.clone()),
            name: Some(c.artist.name.clone()),
    })
    .collect();

    let tracks = release
    .media
    .iter()
    .flat_map(|m| m.tracks.iter())
    .map(|t| RemoteTrack {
            id: t
            .recording
            .as_ref()
            .map(|r| r.id.clone())
            .unwrap_or_else(|| t.id.clone()),
            title: t.title.clone(),
            duration: t.length.map(|ms| ms / 1000),
            artists: if t.artist_credit.is_empty() {
                artists.clone()
            } else {
                t.artist_credit
                .iter()
                .map(|c| RemoteTrackArtist {
                        id: Some(c.artist.id.clone()),
                        name: Some(c.artist.name.clone()),
                })
                .collect()
            },
            track_number: t.position,
            is_explicit: false,
    })
    .collect();

    RemoteAlbum {
        id: rg.id.clone(),
        title: rg.title.clone(),
        album_type: rg
        .primary_type
        .clone()
        .unwrap_or_else(|| "Album".to_string()),
        year: parse_year(&rg.first_release_date),
        thumbnails: cover.map(cover_art_thumbnails).unwrap_or_default(),
        // MusicBrainz releases are not addressable as a single playable
        // stream; there is no audio-playlist id to surface here.
        playlist_id: None,
        artists,
        tracks,
    }
}

/// MusicBrainz has no native playlist concept; this adapter models "the
/// playlist for a release" as that release's own tracklist, keyed by
/// recording id instead of an audio-service video id.
pub fn release_to_remote_playlist(release: &MbRelease) -> RemotePlaylist {
    let tracks = release
    .media
    .iter()
    .flat_map(|m| m.tracks.iter())
    .map(|t| RemotePlaylistTrack {
            audio_id: t
            .recording
            .as_ref()
            .map(|r| r.id.clone())
            .unwrap_or_else(|| t.id.clone()),
            title: t.title.clone(),
            duration: t.length.map(|ms| ms / 1000),
    })
    .collect();

    RemotePlaylist {
        id: release.id.clone(),
        title: release.title.clone(),
        thumbnails: Vec::new(),
        tracks,
    }
}
