// SPDX-License-Identifier: GPL-3.0-or-later
//! The four task handlers (C3): `sync_artist`, `import_album`,
//! `download_track`, `download_lyrics`. Each owns its own transactions and
//! commits at well-defined checkpoints; the worker (C4) translates
//! the returned [`HandlerOutcome`] into a queue outcome.

use std::path::PathBuf;
use std::sync::Arc;

use catalogd_domain::{
    pick_best_thumbnail, safe_component, thumbnails_changed, titles_match, Album, AlbumType,
    JobType, Track, TrackArtistRef, TrackStatus,
};
use catalogd_external::{
    EmbedTags, ExternalCatalogClient, ExtractTrackMetadata, AudioExtractor, LyricsOutcome,
    LyricsProvider, LyricsQuery, TagEmbedder,
};
use catalogd_infrastructure::queue::{enqueue, EnqueueRequest};
use catalogd_infrastructure::sqlite_adapters::{
    get_album, get_artist, get_track, get_track_tx, recompute_album_download_status,
    set_album_image_local, set_track_downloaded, set_track_lyrics, set_track_status, upsert_album,
    upsert_track,
};
use sqlx::SqlitePool;
use tracing::{instrument, warn};

/// Collaborators a task handler needs: the shared pool plus every external
/// collaborator it can call out to.
#[derive(Clone)]
pub struct TaskContext {
    pub pool: SqlitePool,
    pub catalog_client: Arc<dyn ExternalCatalogClient>,
    pub extractor: Arc<dyn AudioExtractor>,
    pub tag_embedder: Arc<dyn TagEmbedder>,
    pub lyrics_provider: Arc<dyn LyricsProvider>,
    pub http_client: reqwest::Client,
    pub music_root: PathBuf,
}

/// The `{ok, error?, retry_delay_seconds?}` envelope a handler returns to the worker.
#[derive(Debug, Clone, Default)]
pub struct HandlerOutcome {
    pub ok: bool,
    pub error: Option<String>,
    pub retry_delay_seconds: Option<i64>,
}

impl HandlerOutcome {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
            retry_delay_seconds: None,
        }
    }

    pub fn fail(error: impl Into<String>, retry_delay_seconds: Option<i64>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            retry_delay_seconds,
        }
    }
}

async fn download_image(client: &reqwest::Client, url: &str, dest: &std::path::Path) -> anyhow::Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = client.get(url).send().await?.error_for_status()?.bytes().await?;
    tokio::fs::write(dest, &bytes).await?;
    Ok(())
}

// ============================================================================
// 4.3.1 sync_artist
// ============================================================================

#[instrument(skip(ctx), fields(artist_id))]
pub async fn sync_artist(ctx: &TaskContext, artist_id: &str) -> HandlerOutcome {
    let remote = match ctx.catalog_client.get_artist(artist_id).await {
        Ok(r) => r,
        Err(e) => return fail_sync_artist(ctx, artist_id, e.to_string(), None).await,
    };

    let existing = match get_artist(&ctx.pool, artist_id).await {
        Ok(a) => a,
        Err(e) => return fail_sync_artist(ctx, artist_id, e.to_string(), None).await,
    };

    let banner_path = ctx.music_root.join(safe_component(&remote.name)).join("backdrop.jpg");
    let needs_banner = existing
    .as_ref()
    .map(|a| thumbnails_changed(&a.thumbnails, &remote.thumbnails) || !banner_path.is_file())
    .unwrap_or(true);

    let mut image_local = existing.as_ref().and_then(|a| a.image_local.clone());
    if needs_banner {
        if let Some(thumb) = pick_best_thumbnail(&remote.thumbnails) {
            match download_image(&ctx.http_client, &thumb.url, &banner_path).await {
                Ok(()) => image_local = Some(banner_path.to_string_lossy().to_string()),
                Err(e) => return fail_sync_artist(ctx, artist_id, e.to_string(), Some(300)).await,
            }
        }
    }

    let artist = catalogd_domain::Artist {
        artist_id: artist_id.to_string(),
        name: remote.name.clone(),
        thumbnails: remote.thumbnails.clone(),
        image_local,
        followed: existing.as_ref().map(|a| a.followed).unwrap_or(true),
        created_at: existing
        .as_ref()
        .map(|a| a.created_at)
        .unwrap_or_else(chrono::Utc::now),
    };

    let known_albums = match catalogd_infrastructure::sqlite_adapters::albums_for_artist(&ctx.pool, artist_id).await
    {
        Ok(a) => a,
        Err(e) => return fail_sync_artist(ctx, artist_id, e.to_string(), None).await,
    };
    let known_ids: std::collections::BTreeSet<String> =
    known_albums.into_iter().map(|a| a.album_id).collect();
    let new_releases: Vec<_> = remote
    .albums
    .iter()
    .chain(remote.singles.iter())
    .filter(|a| !known_ids.contains(&a.id))
    .cloned()
    .collect();

    let mut tx = match ctx.pool.begin().await {
        Ok(tx) => tx,
        Err(e) => return fail_sync_artist(ctx, artist_id, e.to_string(), None).await,
    };
    if let Err(e) = catalogd_infrastructure::sqlite_adapters::upsert_artist(&mut tx, &artist).await {
        return fail_sync_artist(ctx, artist_id, e.to_string(), None).await;
    }
    for release in &new_releases {
        let sub = catalogd_domain::AlbumSubscription::new(release.id.clone(), Some(artist_id.to_string()));
        if let Err(e) =
        catalogd_infrastructure::sqlite_adapters::ensure_album_subscription(&mut tx, &sub).await
        {
            return fail_sync_artist(ctx, artist_id, e.to_string(), None).await;
        }
    }
    if let Err(e) = tx.commit().await {
        return fail_sync_artist(ctx, artist_id, e.to_string(), None).await;
    }

    for release in &new_releases {
        let payload = serde_json::json!({ "browse_id": release.id, "artist_id": artist_id });
        let req = EnqueueRequest::new(JobType::ImportAlbum, payload).with_priority(3);
        if let Err(e) = enqueue(&ctx.pool, req).await {
            return fail_sync_artist(ctx, artist_id, e.to_string(), None).await;
        }
    }

    let mut tx = match ctx.pool.begin().await {
        Ok(tx) => tx,
        Err(e) => return fail_sync_artist(ctx, artist_id, e.to_string(), None).await,
    };
    if let Err(e) = catalogd_infrastructure::sqlite_adapters::mark_artist_synced(&mut tx, artist_id).await {
        return fail_sync_artist(ctx, artist_id, e.to_string(), None).await;
    }
    if let Err(e) = tx.commit().await {
        return fail_sync_artist(ctx, artist_id, e.to_string(), None).await;
    }

    HandlerOutcome::ok()
}

async fn fail_sync_artist(
    ctx: &TaskContext,
    artist_id: &str,
    error: String,
    retry_delay_seconds: Option<i64>,
) -> HandlerOutcome {
    if let Ok(mut tx) = ctx.pool.begin().await {
        let _ = catalogd_infrastructure::sqlite_adapters::mark_artist_sync_failed(&mut tx, artist_id, &error)
        .await;
        let _ = tx.commit().await;
    }
    warn!(target: "task:sync_artist", artist_id, %error, "sync_artist failed");
    HandlerOutcome::fail(error, retry_delay_seconds)
}

// ============================================================================
// 4.3.2 import_album
// ============================================================================

#[instrument(skip(ctx), fields(browse_id))]
pub async fn import_album(ctx: &TaskContext, browse_id: &str, artist_id: Option<&str>) -> HandlerOutcome {
    let remote = match ctx.catalog_client.get_album(browse_id).await {
        Ok(a) => a,
        Err(e) => return HandlerOutcome::fail(e.to_string(), None),
    };

    let artist_id = artist_id
    .map(|s| s.to_string())
    .or_else(|| remote.artists.first().and_then(|a| a.id.clone()));

    let existing_album = match get_album(&ctx.pool, &remote.id).await {
        Ok(a) => a,
        Err(e) => return HandlerOutcome::fail(e.to_string(), None),
    };

    let artist_name = match &artist_id {
        Some(aid) => get_artist(&ctx.pool, aid).await.ok().flatten().map(|a| a.name),
        None => None,
    }
    .unwrap_or_else(|| "Unknown Artist".to_string());

    let mut album = Album::new(remote.id.clone(), remote.title.clone());
    album.album_type = remote.album_type.parse().unwrap_or(AlbumType::Album);
    album.artist_id = artist_id.clone();
    album.thumbnails = remote.thumbnails.clone();
    album.playlist_id = remote.playlist_id.clone();
    album.year = remote.year;
    album.image_local = existing_album.as_ref().and_then(|a| a.image_local.clone());

    let cover_dest = ctx
    .music_root
    .join(safe_component(&artist_name))
    .join(safe_component(&album.title))
    .join("cover.jpg");
    let needs_cover = existing_album
    .as_ref()
    .map(|a| thumbnails_changed(&a.thumbnails, &remote.thumbnails) || !cover_dest.is_file())
    .unwrap_or(true);
    if needs_cover {
        if let Some(thumb) = pick_best_thumbnail(&remote.thumbnails) {
            match download_image(&ctx.http_client, &thumb.url, &cover_dest).await {
                Ok(()) => album.image_local = Some(cover_dest.to_string_lossy().to_string()),
                Err(e) => warn!(target: "task:import_album", browse_id, error = %e, "failed to download album cover"),
            }
        }
    }

    // Step 2: position → (audio_id, title, duration) map from the album's
    // own playlist, when it has one. A playlist fetch failure is non-fatal —
    // step 3 just falls back to the album endpoint's own track ids.
    let playlist_map: std::collections::HashMap<usize, (String, String)> = match &remote.playlist_id {
        Some(playlist_id) => match ctx.catalog_client.get_playlist(playlist_id).await {
            Ok(playlist) => playlist
            .tracks
            .into_iter()
            .enumerate()
            .map(|(idx, t)| (idx, (t.audio_id, t.title)))
            .collect(),
            Err(e) => {
                warn!(target: "task:import_album", browse_id, error = %e, "failed to fetch playlist, using album endpoint ids");
                std::collections::HashMap::new()
            }
        },
        None => std::collections::HashMap::new(),
    };

    let mut tx = match ctx.pool.begin().await {
        Ok(tx) => tx,
        Err(e) => return HandlerOutcome::fail(e.to_string(), None),
    };
    if let Err(e) = upsert_album(&mut tx, &album).await {
        return HandlerOutcome::fail(e.to_string(), None);
    }

    for (idx, track) in remote.tracks.iter().enumerate() {
        let chosen_id = match playlist_map.get(&idx) {
            Some((audio_id, playlist_title)) if titles_match(playlist_title, &track.title) => {
                audio_id.clone()
            }
            _ => track.id.clone(),
        };

        let mut new_track = Track::new(chosen_id, track.title.clone());
        new_track.duration = track.duration.map(i64::from);
        new_track.artists = track
        .artists
        .iter()
        .map(|a| TrackArtistRef {
                id: a.id.clone(),
                name: a.name.clone(),
        })
        .collect();
        new_track.album_id = Some(remote.id.clone());
        new_track.track_number = track.track_number.or(Some(idx as u32 + 1));

        if let Err(e) = upsert_track(&mut tx, &new_track).await {
            return HandlerOutcome::fail(e.to_string(), None);
        }
    }

    if let Err(e) = tx.commit().await {
        return HandlerOutcome::fail(e.to_string(), None);
    }

    let tracks = match catalogd_infrastructure::sqlite_adapters::tracks_for_album(&ctx.pool, &remote.id).await {
        Ok(t) => t,
        Err(e) => return HandlerOutcome::fail(e.to_string(), None),
    };
    for track in tracks
    .into_iter()
    .filter(|t| matches!(t.status, TrackStatus::New | TrackStatus::Failed))
    {
        let payload = serde_json::json!({
                "track_id": track.track_id,
                "album_id": remote.id,
                "artist_id": artist_id,
        });
        let req = EnqueueRequest::new(JobType::DownloadTrack, payload).with_priority(0);
        if let Err(e) = enqueue(&ctx.pool, req).await {
            warn!(target: "task:import_album", browse_id, track_id = %track.track_id, error = %e, "failed to enqueue download_track job");
        }
    }

    HandlerOutcome::ok()
}

// ============================================================================
// 4.3.3 download_track
// ============================================================================

#[instrument(skip(ctx), fields(track_id))]
pub async fn download_track(
    ctx: &TaskContext,
    track_id: &str,
    _album_id: Option<&str>,
    _artist_id: Option<&str>,
) -> HandlerOutcome {
    // T1
    let mut tx = match ctx.pool.begin().await {
        Ok(tx) => tx,
        Err(e) => return HandlerOutcome::fail(e.to_string(), None),
    };
    let track = match get_track_tx(&mut tx, track_id).await {
        Ok(Some(t)) => t,
        Ok(None) => {
            let _ = tx.rollback().await;
            return HandlerOutcome::fail("track not found", None);
        }
        Err(e) => return HandlerOutcome::fail(e.to_string(), None),
    };
    if let Err(e) = set_track_status(&mut tx, track_id, TrackStatus::Downloading).await {
        return HandlerOutcome::fail(e.to_string(), None);
    }
    if let Err(e) = tx.commit().await {
        return HandlerOutcome::fail(e.to_string(), None);
    }

    let album = match track.album_id.as_deref() {
        Some(album_id) => get_album(&ctx.pool, album_id).await.unwrap_or(None),
        None => None,
    };
    let artist_name = match album.as_ref().and_then(|a| a.artist_id.clone()) {
        Some(aid) => get_artist(&ctx.pool, &aid).await.ok().flatten().map(|a| a.name),
        None => None,
    }
    .unwrap_or_else(|| "Unknown Artist".to_string());
    let album_title = album
    .as_ref()
    .map(|a| a.title.clone())
    .unwrap_or_else(|| "Unknown Album".to_string());

    let destination_dir = ctx
    .music_root
    .join(safe_component(&artist_name))
    .join(safe_component(&album_title));

    let metadata = ExtractTrackMetadata {
        title: track.title.clone(),
        album: album_title.clone(),
        artist: artist_name.clone(),
        year: album.as_ref().and_then(|a| a.year),
        track_number: track.track_number,
        cover_path_override: None,
    };

    // External I/O — no transaction held.
    let extracted = match ctx.extractor.extract(track_id, &metadata, &destination_dir).await {
        Ok(extracted) => extracted,
        Err(e) if e.rate_limited => {
            if let Err(reset_err) = ctx.extractor.reset_session().await {
                warn!(target: "task:download_track", track_id, error = %reset_err, "failed to reset extractor session");
            }
            match ctx.extractor.extract(track_id, &metadata, &destination_dir).await {
                Ok(extracted) => extracted,
                Err(_) => {
                    return fail_download_track(ctx, track_id, "extractor rate limited".to_string(), 600).await
                }
            }
        }
        Err(e) => return fail_download_track(ctx, track_id, e.message, 300).await,
    };

    // T2
    let file_path = extracted.local_audio_path.to_string_lossy().to_string();
    let mut tx = match ctx.pool.begin().await {
        Ok(tx) => tx,
        Err(e) => return fail_download_track(ctx, track_id, e.to_string(), 300).await,
    };
    if get_track_tx(&mut tx, track_id).await.ok().flatten().is_none() {
        let _ = tx.rollback().await;
        return fail_download_track(ctx, track_id, "track vanished before completion".to_string(), 300).await;
    }
    if let Err(e) = set_track_downloaded(&mut tx, track_id, &file_path).await {
        return fail_download_track(ctx, track_id, e.to_string(), 300).await;
    }
    if let Err(e) = tx.commit().await {
        return fail_download_track(ctx, track_id, e.to_string(), 300).await;
    }

    let embed_tags = EmbedTags {
        title: track.title.clone(),
        album: album_title.clone(),
        artists: vec![artist_name.clone()],
        album_artist: artist_name.clone(),
        lyrics_path: None,
        cover_path: extracted.cover_path.clone(),
        track_number: track.track_number,
        year: album.as_ref().and_then(|a| a.year),
    };
    if let Err(e) = ctx.tag_embedder.embed(&extracted.local_audio_path, &embed_tags).await {
        warn!(target: "task:download_track", track_id, error = %e, "embedding tags failed, continuing");
    }

    // T3 (optional): cover → album directory. Errors logged and swallowed.
    if let Some(cover_path) = &extracted.cover_path {
        let cover_dest = destination_dir.join("cover.jpg");
        match tokio::fs::copy(cover_path, &cover_dest).await {
            Ok(_) => {
                if let Some(album_id) = track.album_id.as_deref() {
                    match ctx.pool.begin().await {
                        Ok(mut tx) => {
                            let result = set_album_image_local(
                                &mut tx,
                                album_id,
                                &cover_dest.to_string_lossy(),
                            )
                            .await;
                            match result {
                                Ok(()) => {
                                    if let Err(e) = tx.commit().await {
                                        warn!(target: "task:download_track", track_id, error = %e, "committing album cover path failed");
                                    }
                                }
                                Err(e) => {
                                    warn!(target: "task:download_track", track_id, error = %e, "persisting album cover path failed");
                                }
                            }
                        }
                        Err(e) => {
                            warn!(target: "task:download_track", track_id, error = %e, "opening transaction for album cover failed");
                        }
                    }
                }
            }
            Err(e) => {
                warn!(target: "task:download_track", track_id, error = %e, "moving cover into album directory failed");
            }
        }
    }

    // T4: recompute aggregate download status. Errors logged and swallowed.
    if let Some(album_id) = track.album_id.as_deref() {
        match ctx.pool.begin().await {
            Ok(mut tx) => match recompute_album_download_status(&ctx.pool, &mut tx, album_id).await {
                Ok(_) => {
                    if let Err(e) = tx.commit().await {
                        warn!(target: "task:download_track", track_id, error = %e, "committing aggregate status failed");
                    }
                }
                Err(e) => {
                    let _ = tx.rollback().await;
                    warn!(target: "task:download_track", track_id, error = %e, "recomputing aggregate status failed");
                }
            },
            Err(e) => {
                warn!(target: "task:download_track", track_id, error = %e, "opening transaction for aggregate status failed");
            }
        }
    }

    // T5: fan out the lyrics job. Errors logged and swallowed.
    let payload = serde_json::json!({ "track_id": track_id });
    if let Err(e) = enqueue(&ctx.pool, EnqueueRequest::new(JobType::DownloadLyrics, payload)).await {
        warn!(target: "task:download_track", track_id, error = %e, "failed to enqueue download_lyrics job");
    }

    HandlerOutcome::ok()
}

async fn fail_download_track(
    ctx: &TaskContext,
    track_id: &str,
    error: String,
    retry_delay_seconds: i64,
) -> HandlerOutcome {
    if let Ok(mut tx) = ctx.pool.begin().await {
        let _ = set_track_status(&mut tx, track_id, TrackStatus::Failed).await;
        let _ = tx.commit().await;
    }
    warn!(target: "task:download_track", track_id, %error, "download_track failed");
    HandlerOutcome::fail(error, Some(retry_delay_seconds))
}

// ============================================================================
// 4.3.4 download_lyrics
// ============================================================================

#[instrument(skip(ctx), fields(track_id))]
pub async fn download_lyrics(ctx: &TaskContext, track_id: &str) -> HandlerOutcome {
    let track = match get_track(&ctx.pool, track_id).await {
        Ok(Some(t)) => t,
        Ok(None) => return HandlerOutcome::fail("track not found", None),
        Err(e) => return HandlerOutcome::fail(e.to_string(), None),
    };

    let Some(file_path) = track.file_path.clone() else {
        return HandlerOutcome::fail("track has no downloaded file", None);
    };
    if !std::path::Path::new(&file_path).is_file() {
        return HandlerOutcome::fail("downloaded file missing from disk", None);
    }

    let album = match track.album_id.as_deref() {
        Some(album_id) => get_album(&ctx.pool, album_id).await.unwrap_or(None),
        None => None,
    };
    let artist_name = track
    .artists
    .first()
    .and_then(|a| a.name.clone())
    .unwrap_or_else(|| "Unknown Artist".to_string());
    let album_title = album
    .as_ref()
    .map(|a| a.title.clone())
    .unwrap_or_else(|| "Unknown Album".to_string());

    let query = LyricsQuery {
        track_name: track.title.clone(),
        artist_name,
        album_name: album_title,
        duration: track.duration.map(|d| d as i32),
    };

    let synced = match ctx.lyrics_provider.lookup_cached(&query).await {
        Ok(LyricsOutcome::Synced(lrc)) => Some(lrc),
        Ok(_) => match ctx.lyrics_provider.lookup_full(&query).await {
            Ok(LyricsOutcome::Synced(lrc)) => Some(lrc),
            Ok(_) => None,
            Err(e) => return HandlerOutcome::fail(e.to_string(), Some(3600)),
        },
        Err(e) => return HandlerOutcome::fail(e.to_string(), Some(3600)),
    };

    let Some(lrc) = synced else {
        return HandlerOutcome::fail("no synchronized lyrics available", Some(86400));
    };

    let lrc_path = std::path::Path::new(&file_path).with_extension("lrc");
    if let Err(e) = tokio::fs::write(&lrc_path, lrc.as_bytes()).await {
        return HandlerOutcome::fail(format!("writing lyrics file: {e}"), Some(3600));
    }

    let mut tx = match ctx.pool.begin().await {
        Ok(tx) => tx,
        Err(e) => return HandlerOutcome::fail(e.to_string(), Some(3600)),
    };
    if let Err(e) = set_track_lyrics(&mut tx, track_id, &lrc_path.to_string_lossy()).await {
        return HandlerOutcome::fail(e.to_string(), Some(3600));
    }
    if let Err(e) = tx.commit().await {
        return HandlerOutcome::fail(e.to_string(), Some(3600));
    }

    HandlerOutcome::ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_outcome_ok_has_no_error_or_delay() {
        let outcome = HandlerOutcome::ok();
        assert!(outcome.ok);
        assert!(outcome.error.is_none());
        assert!(outcome.retry_delay_seconds.is_none());
    }

    #[test]
    fn handler_outcome_fail_carries_message_and_delay() {
        let outcome = HandlerOutcome::fail("boom", Some(300));
        assert!(!outcome.ok);
        assert_eq!(outcome.error.as_deref(), Some("boom"));
        assert_eq!(outcome.retry_delay_seconds, Some(300));
    }
}
