// SPDX-License-Identifier: GPL-3.0-or-later
//! Concrete `catalogd_external::TagEmbedder` using `lofty` to write
//! title/album/artist/track-number/year, an embedded cover, and lyrics into
//! the downloaded audio file. Idempotent and non-fatal on failure.

use std::path::Path;

use async_trait::async_trait;
use catalogd_external::{EmbedTags, TagEmbedder};
use lofty::file::TaggedFileExt;
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::prelude::{Accessor, ItemKey, TagExt};
use lofty::probe::Probe;
use tracing::{debug, warn};

#[derive(Default)]
pub struct LoftyTagEmbedder;

#[async_trait]
impl TagEmbedder for LoftyTagEmbedder {
    async fn embed(&self, audio_path: &Path, tags: &EmbedTags) -> anyhow::Result<()> {
        let audio_path = audio_path.to_path_buf();
        let tags = tags.clone();
        tokio::task::spawn_blocking(move || embed_blocking(&audio_path, &tags)).await??;
        Ok(())
    }
}

fn embed_blocking(audio_path: &Path, tags: &EmbedTags) -> anyhow::Result<()> {
    let mut tagged_file = Probe::open(audio_path)?.read()?;
    let tag = match tagged_file.primary_tag_mut() {
        Some(tag) => tag,
        None => {
            let tag_type = tagged_file.primary_tag_type();
            tagged_file.insert_tag(lofty::tag::Tag::new(tag_type));
            tagged_file.primary_tag_mut().expect("tag just inserted")
        }
    };

    tag.set_title(tags.title.clone());
    tag.set_album(tags.album.clone());
    tag.set_artist(tags.artists.join(", "));
    tag.insert_text(ItemKey::AlbumArtist, tags.album_artist.clone());
    if let Some(n) = tags.track_number {
        tag.set_track(n);
    }
    if let Some(year) = tags.year {
        tag.set_year(year as u32);
    }

    if let Some(lyrics_path) = &tags.lyrics_path {
        match std::fs::read_to_string(lyrics_path) {
            Ok(lyrics) => tag.insert_text(ItemKey::Lyrics, lyrics),
            Err(e) => warn!(target: "application", error = %e, "could not read lyrics file, skipping"),
        }
    }

    if let Some(cover_path) = &tags.cover_path {
        match std::fs::read(cover_path) {
            Ok(bytes) => {
                let mime = match cover_path.extension().and_then(|e| e.to_str()) {
                    Some("png") => MimeType::Png,
                    _ => MimeType::Jpeg,
                };
                let picture = Picture::new_unchecked(PictureType::CoverFront, Some(mime), None, bytes);
                tag.push_picture(picture);
            }
            Err(e) => warn!(target: "application", error = %e, "could not read cover file, skipping"),
        }
    }

    tag.save_to_path(audio_path, lofty::config::WriteOptions::default())?;
    debug!(target: "application", path = %audio_path.display(), "embedded tags");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embed_on_missing_file_is_an_error_not_a_panic() {
        let embedder = LoftyTagEmbedder;
        let tags = EmbedTags {
            title: "Airbag".to_string(),
            album: "OK Computer".to_string(),
            artists: vec!["Radiohead".to_string()],
            album_artist: "Radiohead".to_string(),
            lyrics_path: None,
            cover_path: None,
            track_number: Some(1),
            year: Some(1997),
        };
        let result = embedder.embed(Path::new("/nonexistent/track.flac"), &tags).await;
        assert!(result.is_err());
    }
}
