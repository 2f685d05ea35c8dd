// SPDX-License-Identifier: GPL-3.0-or-later
//! Concrete `catalogd_external::AudioExtractor` that shells out to a
//! yt-dlp-compatible binary. The subprocess downloads into a
//! scratch directory; the database is never held while it runs. On success
//! the file is moved into its final `<music_root>/<safe(artist)>/
//! <safe(album)>/<NN - title>.<ext>` location.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use catalogd_domain::safe_component;
use catalogd_external::{AudioExtractor, ExtractTrackMetadata, ExtractedAudio, ExtractorError};
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, warn};

pub struct YtDlpExtractor {
    binary: String,
    format: String,
    preferred_codec: String,
    cookie_file: Option<PathBuf>,
    scratch_dir: PathBuf,
}

impl YtDlpExtractor {
    pub fn new(
        binary: String,
        format: String,
        preferred_codec: String,
        cookie_file: Option<PathBuf>,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            binary,
            format,
            preferred_codec,
            cookie_file,
            scratch_dir,
        }
    }
}

#[async_trait]
impl AudioExtractor for YtDlpExtractor {
    async fn extract(
        &self,
        video_id: &str,
        metadata: &ExtractTrackMetadata,
        destination_dir: &Path,
    ) -> Result<ExtractedAudio, ExtractorError> {
        cleanup_partial_files(&self.scratch_dir).await;
        fs::create_dir_all(&self.scratch_dir)
        .await
        .map_err(|e| ExtractorError::new(format!("creating scratch dir: {e}")))?;

        let output_template = self.scratch_dir.join("song.%(ext)s");
        let url = format!("https://www.youtube.com/watch?v={video_id}");

        let mut cmd = Command::new(&self.binary);
        cmd.arg("-f")
        .arg(&self.format)
        .arg("--extract-audio")
        .arg("--audio-format")
        .arg(&self.preferred_codec)
        .arg("--no-playlist")
        .arg("--retries")
        .arg("3")
        .arg("--continue")
        .arg("--quiet")
        .arg("--no-warnings")
        .arg("-o")
        .arg(&output_template);
        if let Some(cookie) = &self.cookie_file {
            cmd.arg("--cookies").arg(cookie);
        }
        cmd.arg(&url)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

        debug!(target: "extractor", video_id, "invoking audio extractor");
        let output = cmd
        .output()
        .await
        .map_err(|e| ExtractorError::new(format!("spawning extractor: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractorError::new(stderr.trim().to_string()));
        }

        let downloaded = find_downloaded_file(&self.scratch_dir, "song.")
        .await
        .ok_or_else(|| ExtractorError::new("downloaded file not found in scratch directory"))?;

        fs::create_dir_all(destination_dir)
        .await
        .map_err(|e| ExtractorError::new(format!("creating destination dir: {e}")))?;

        let extension = downloaded
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or(&self.preferred_codec)
        .to_string();

        let mut dest_path = destination_dir.join(track_filename(metadata, &extension));
        if fs::metadata(&dest_path).await.is_ok() {
            let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
            dest_path = destination_dir.join(track_filename_with_suffix(metadata, &extension, ts));
        }

        fs::rename(&downloaded, &dest_path)
        .await
        .map_err(|e| ExtractorError::new(format!("moving downloaded file: {e}")))?;

        let cover_path = metadata
        .cover_path_override
        .as_ref()
        .filter(|p| p.is_file())
        .cloned();

        Ok(ExtractedAudio {
                local_audio_path: dest_path,
                cover_path,
        })
    }

    async fn reset_session(&self) -> anyhow::Result<()> {
        let Some(cookie) = &self.cookie_file else {
            return Ok(());
        };
        if fs::metadata(cookie).await.is_ok() {
            fs::remove_file(cookie).await?;
            warn!(target: "extractor", path = %cookie.display(), "cleared extractor session credentials after rate limit");
        }
        Ok(())
    }
}

fn track_filename(metadata: &ExtractTrackMetadata, extension: &str) -> String {
    format!("{}.{}", track_stem(metadata), extension)
}

fn track_filename_with_suffix(metadata: &ExtractTrackMetadata, extension: &str, suffix: u64) -> String {
    format!("{}_{}.{}", track_stem(metadata), suffix, extension)
}

fn track_stem(metadata: &ExtractTrackMetadata) -> String {
    let title = safe_component(&metadata.title);
    match metadata.track_number {
        Some(n) if n > 0 => format!("{:02} - {}", n, title),
        _ => title,
    }
}

async fn cleanup_partial_files(dir: &Path) {
    let Ok(mut entries) = fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        if name.to_string_lossy().ends_with(".part") {
            let _ = fs::remove_file(entry.path()).await;
        }
    }
}

async fn find_downloaded_file(dir: &Path, prefix: &str) -> Option<PathBuf> {
    let mut entries = fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(prefix) && !name.ends_with(".part") {
            return Some(entry.path());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn metadata() -> ExtractTrackMetadata {
        ExtractTrackMetadata {
            title: "Airbag".to_string(),
            album: "OK Computer".to_string(),
            artist: "Radiohead".to_string(),
            year: Some(1997),
            track_number: Some(1),
            cover_path_override: None,
        }
    }

    async fn write_fake_binary(path: &Path, script: &str) {
        fs::write(path, script).await.unwrap();
        let mut perms = fs::metadata(path).await.unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).await.unwrap();
    }

    #[test]
    fn track_stem_pads_track_number() {
        assert_eq!(track_stem(&metadata()), "01 - Airbag");
    }

    #[test]
    fn track_stem_omits_zero_track_number() {
        let mut m = metadata();
        m.track_number = Some(0);
        assert_eq!(track_stem(&m), "Airbag");
    }

    #[tokio::test]
    async fn cleanup_partial_files_removes_only_part_files() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("song.part"), b"x").await.unwrap();
        fs::write(tmp.path().join("song.m4a"), b"x").await.unwrap();

        cleanup_partial_files(tmp.path()).await;

        assert!(!tmp.path().join("song.part").exists());
        assert!(tmp.path().join("song.m4a").exists());
    }

    #[tokio::test]
    async fn find_downloaded_file_skips_partial_and_unrelated_names() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("other.txt"), b"x").await.unwrap();
        fs::write(tmp.path().join("song.part"), b"x").await.unwrap();
        fs::write(tmp.path().join("song.m4a"), b"x").await.unwrap();

        let found = find_downloaded_file(tmp.path(), "song.").await.unwrap();
        assert_eq!(found.file_name().unwrap().to_str().unwrap(), "song.m4a");
    }

    #[tokio::test]
    async fn extract_moves_downloaded_file_into_destination() {
        let scratch = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let fake_binary = scratch.path().join("fake-yt-dlp.sh");
        write_fake_binary(
            &fake_binary,
            r#"#!/bin/sh
            out=""
            prev=""
            for arg in "$@"; do
            if [ "$prev" = "-o" ]; then
            out="$arg"
            fi
            prev="$arg"
            done
            real_out=$(printf '%s' "$out" | sed 's/%(ext)s/m4a/')
            echo "fake audio bytes" > "$real_out"
            exit 0
            "#,
        )
        .await;

        let extractor = YtDlpExtractor::new(
            fake_binary.to_string_lossy().to_string(),
            "bestaudio/best".to_string(),
            "m4a".to_string(),
            None,
            scratch.path().to_path_buf(),
        );

        let result = extractor
        .extract("dQw4w9WgXcQ", &metadata(), dest.path())
        .await
        .expect("extraction should succeed");

        assert_eq!(
            result.local_audio_path.file_name().unwrap().to_str().unwrap(),
            "01 - Airbag.m4a"
        );
        assert!(result.local_audio_path.exists());
        assert!(result.cover_path.is_none());
    }

    #[tokio::test]
    async fn extract_surfaces_rate_limit_error_from_stderr() {
        let scratch = tempfile::tempdir().unwrap();
        let dest = tempfile::tempdir().unwrap();
        let fake_binary = scratch.path().join("fake-yt-dlp.sh");
        write_fake_binary(
            &fake_binary,
            r#"#!/bin/sh
            echo "HTTP Error 429: Too Many Requests" 1>&2
            exit 1
            "#,
        )
        .await;

        let extractor = YtDlpExtractor::new(
            fake_binary.to_string_lossy().to_string(),
            "bestaudio/best".to_string(),
            "m4a".to_string(),
            None,
            scratch.path().to_path_buf(),
        );

        let result = extractor.extract("abc123", &metadata(), dest.path()).await;
        let err = result.expect_err("extraction should fail");
        assert!(err.rate_limited);
    }

    #[tokio::test]
    async fn reset_session_removes_cookie_file_if_present() {
        let tmp = tempfile::tempdir().unwrap();
        let cookie = tmp.path().join("cookies.txt");
        fs::write(&cookie, b"session=abc").await.unwrap();

        let extractor = YtDlpExtractor::new(
            "yt-dlp".to_string(),
            "bestaudio/best".to_string(),
            "m4a".to_string(),
            Some(cookie.clone()),
            tmp.path().join("scratch"),
        );

        extractor.reset_session().await.unwrap();
        assert!(!cookie.exists());
    }
}
