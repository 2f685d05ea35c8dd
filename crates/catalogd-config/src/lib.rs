// SPDX-License-Identifier: GPL-3.0-or-later
pub mod secrets;

use std::path::{Path, PathBuf};

use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://catalogd.db".to_string(),
            pool_max_size: 16,
            busy_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5150,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Boot-time defaults for the three scheduler cadences; an operator
/// can override each at runtime via the `Setting` table, refreshed every
/// `settings_refresh_seconds`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub sync_interval_hours: i64,
    pub job_cleanup_days: i64,
    pub token_cleanup_days: i64,
    pub tick_seconds: u64,
    pub settings_refresh_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_interval_hours: 6,
            job_cleanup_days: 3,
            token_cleanup_days: 1,
            tick_seconds: 60,
            settings_refresh_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub count: usize,
    pub poll_interval_ms: u64,
    pub idle_error_sleep_ms: u64,
    pub max_jobs: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 2,
            poll_interval_ms: 2_000,
            idle_error_sleep_ms: 3_000,
            max_jobs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    pub max_concurrent: usize,
    pub audio_quality: String,
    /// Extractor binary on `PATH` (a `yt-dlp`-compatible invocation).
    pub extractor_binary: String,
    /// Container/codec the extractor is asked to produce.
    pub preferred_codec: String,
    /// Optional cookie jar passed to the extractor for age/region-gated
    /// sources; cleared once on a rate-limit retry.
    pub cookie_file: Option<PathBuf>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            audio_quality: "best".to_string(),
            extractor_binary: "yt-dlp".to_string(),
            preferred_codec: "m4a".to_string(),
            cookie_file: None,
        }
    }
}

/// The filesystem contract of : a `music_root` the catalog writes audio
/// and artwork under, and a `config_root` holding the database, secrets,
/// and staging directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub music_root: PathBuf,
    pub config_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            music_root: PathBuf::from("/data"),
            config_root: PathBuf::from("/config"),
        }
    }
}

impl PathsConfig {
    pub fn cache_dir(&self) -> PathBuf {
        self.config_root.join("cache")
    }

    pub fn covers_dir(&self) -> PathBuf {
        self.config_root.join("covers")
    }

    pub fn lyrics_dir(&self) -> PathBuf {
        self.config_root.join("lyrics")
    }

    pub fn thumbnail_cache_dir(&self) -> PathBuf {
        self.config_root.join("thumbnail_cache")
    }

    /// Scratch directory the extractor downloads into before the track is
    /// moved to its final `music_root` location.
    pub fn downloads_dir(&self) -> PathBuf {
        self.config_root.join("downloads")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.config_root.join("secrets.json")
    }

    /// Creates `music_root` and every `config_root` subdirectory. Failure
    /// here is the "unreachable filesystem" unrecoverable-startup case of
    /// and should abort the process with a non-zero exit code.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [
            self.music_root.clone(),
            self.config_root.clone(),
            self.cache_dir(),
            self.covers_dir(),
            self.lyrics_dir(),
            self.thumbnail_cache_dir(),
            self.downloads_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub telemetry: TelemetryConfig,
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
    pub download: DownloadConfig,
    pub paths: PathsConfig,
}

/// Load configuration from defaults, optional TOML file, and environment
/// overrides (prefix `CATALOGD_`, double-underscore section separator).
pub fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("CATALOGD_").split("__"));

    let config: AppConfig = figment.extract()?;
    info!(target: "config", "configuration loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.scheduler.sync_interval_hours, 6);
        assert_eq!(cfg.worker.count, 2);
    }

    #[test]
    fn paths_derive_expected_subdirectories() {
        let paths = PathsConfig {
            music_root: PathBuf::from("/music"),
            config_root: PathBuf::from("/cfg"),
        };
        assert_eq!(paths.cache_dir(), PathBuf::from("/cfg/cache"));
        assert_eq!(paths.secrets_path(), PathBuf::from("/cfg/secrets.json"));
    }

    #[test]
    fn ensure_creates_every_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = PathsConfig {
            music_root: tmp.path().join("music"),
            config_root: tmp.path().join("config"),
        };
        paths.ensure().unwrap();
        assert!(paths.cache_dir().is_dir());
        assert!(paths.lyrics_dir().is_dir());
    }

    #[test]
    fn env_override_changes_http_port() {
        std::env::set_var("CATALOGD_HTTP__PORT", "9090");
        let cfg = load(None).unwrap();
        std::env::remove_var("CATALOGD_HTTP__PORT");
        assert_eq!(cfg.http.port, 9090);
    }
}
