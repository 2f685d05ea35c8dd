// SPDX-License-Identifier: GPL-3.0-or-later
//! Concrete `catalogd_external::LyricsProvider` over the lrclib.net-shaped
//! API: a cheap `/get-cached` endpoint tried first, falling back to the
//! fuller `/get` endpoint on miss. Only `syncedLyrics` counts
//! as a hit; plain-only responses are reported as not synced.

use std::sync::Arc;

use async_trait::async_trait;
use catalogd_external::{LyricsError as ExternalLyricsError, LyricsOutcome, LyricsProvider, LyricsQuery};
use moka::sync::Cache;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

pub struct LrcLibProvider {
    client: Client,
    rate_limiter: Arc<Semaphore>,
    cache: Cache<String, LyricsOutcomeCacheEntry>,
    base_url: String,
}

#[derive(Debug, Clone)]
enum LyricsOutcomeCacheEntry {
    Synced(String),
    NotSynced,
}

impl From<LyricsOutcomeCacheEntry> for LyricsOutcome {
    fn from(e: LyricsOutcomeCacheEntry) -> Self {
        match e {
            LyricsOutcomeCacheEntry::Synced(s) => LyricsOutcome::Synced(s),
            LyricsOutcomeCacheEntry::NotSynced => LyricsOutcome::NotSynced,
        }
    }
}

impl LrcLibProvider {
    pub fn new(base_url: Option<String>) -> Self {
        Self::new_with_limits_and_base_url(1, base_url)
    }

    pub fn new_with_limits(max_concurrent_requests: usize) -> Self {
        Self::new_with_limits_and_base_url(max_concurrent_requests, None)
    }

    pub fn new_with_limits_and_base_url(
        max_concurrent_requests: usize,
        base_url: Option<String>,
    ) -> Self {
        Self {
            client: Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| Client::new()),
            rate_limiter: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
            cache: Cache::new(10_000),
            base_url: base_url
            .unwrap_or_else(|| "https://lrclib.net/api".to_string())
            .trim_end_matches('/')
            .to_string(),
        }
    }

    #[instrument(skip(self, query), fields(track = %query.track_name, artist = %query.artist_name))]
    async fn fetch(&self, endpoint: &str, query: &LyricsQuery) -> Result<LyricsOutcome, ExternalLyricsError> {
        let cache_key = format!("{}:{}:{}", endpoint, query.artist_name, query.track_name);
        if endpoint == "get-cached" {
            if let Some(cached) = self.cache.get(&cache_key) {
                return Ok(cached.into());
            }
        }

        let _permit = self
        .rate_limiter
        .acquire()
        .await
        .map_err(|_| ExternalLyricsError::Network("rate limiter closed".to_string()))?;

        let mut url = Url::parse(&self.base_url)
        .map_err(|e| ExternalLyricsError::Network(format!("invalid base url: {e}")))?;
        url.path_segments_mut()
        .map_err(|_| ExternalLyricsError::Network("base url cannot be a base".to_string()))?
        .push(endpoint);
        url.query_pairs_mut()
        .append_pair("track_name", &query.track_name)
        .append_pair("artist_name", &query.artist_name)
        .append_pair("album_name", &query.album_name);
        if let Some(duration) = query.duration {
            url.query_pairs_mut()
            .append_pair("duration", &duration.to_string());
        }

        debug!(target: "lyrics", url = %url, "querying lyrics provider");

        let response = self
        .client
        .get(url)
        .send()
        .await
        .map_err(|e| ExternalLyricsError::Network(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(LyricsOutcome::NotFound);
        }
        let body = response
        .text()
        .await
        .map_err(|e| ExternalLyricsError::Network(e.to_string()))?;
        if !status.is_success() {
            return Err(ExternalLyricsError::Network(format!("HTTP {status}: {body}")));
        }

        let payload: LrcLibResponse = serde_json::from_str(&body)
        .map_err(|e| ExternalLyricsError::Network(format!("bad response body: {e}")))?;

        let outcome = match payload.synced_lyrics.filter(|s| !s.trim().is_empty()) {
            Some(lrc) => LyricsOutcomeCacheEntry::Synced(lrc),
            None => LyricsOutcomeCacheEntry::NotSynced,
        };
        if endpoint == "get-cached" {
            self.cache.insert(cache_key, outcome.clone());
        }
        Ok(outcome.into())
    }
}

#[async_trait]
impl LyricsProvider for LrcLibProvider {
    async fn lookup_cached(&self, query: &LyricsQuery) -> Result<LyricsOutcome, ExternalLyricsError> {
        self.fetch("get-cached", query).await
    }

    async fn lookup_full(&self, query: &LyricsQuery) -> Result<LyricsOutcome, ExternalLyricsError> {
        self.fetch("get", query).await
    }
}

#[derive(Debug, Deserialize)]
struct LrcLibResponse {
    #[serde(rename = "syncedLyrics")]
    synced_lyrics: Option<String>,
    #[allow(dead_code)]
    #[serde(rename = "plainLyrics")]
    plain_lyrics: Option<String>,
}
