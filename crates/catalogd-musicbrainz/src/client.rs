// SPDX-License-Identifier: GPL-3.0-or-later
//! Concrete `ExternalCatalogClient` backed by the public MusicBrainz API
//! and the Cover Art Archive. Illustrative, not the production source the
//! daemon necessarily ships with: MusicBrainz has no audio-streaming or
//! playlist concept, so `get_playlist`/`get_charts` are best-effort
//! adaptations documented at their call sites.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use catalogd_external::{
    Charts, ExternalCatalogClient, RemoteAlbum, RemoteArtist, RemotePlaylist, SearchFilter,
    SearchResultItem,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::error::{MusicBrainzError, Result};
use crate::models::{
    artist_lookup_to_remote, release_group_to_album_ref, release_to_remote_album,
    release_to_remote_playlist, CoverArtResponse, MbArtistLookup, MbArtistSearchResponse,
    MbRelease, MbReleaseGroupSearchResponse,
};
use crate::rate_limiter::RateLimiter;

const MUSICBRAINZ_API_BASE: &str = "https://musicbrainz.org/ws/2";
const COVER_ART_ARCHIVE_BASE: &str = "https://coverartarchive.org";
const USER_AGENT: &str = concat!(
    "catalogd/",
    env!("CARGO_PKG_VERSION"),
    " ( https://github.com/SvetaKrava/catalogd )"
);

/// MusicBrainz-backed catalog client with rate limiting.
#[derive(Debug, Clone)]
pub struct MusicBrainzClient {
    client: Client,
    base_url: String,
    cover_art_base_url: String,
    rate_limiter: RateLimiter,
}

impl MusicBrainzClient {
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> MusicBrainzClientBuilder {
        MusicBrainzClientBuilder::default()
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let _permit = self.rate_limiter.acquire().await;

        trace!(target: "musicbrainz", "GET {}", url);

        let response = self
            .client
            .get(url)
            .header("User-Agent", USER_AGENT)
            .send()
            .await?;

        let status = response.status();
        debug!(target: "musicbrainz", status = %status, "response received");

        if status == 404 {
            return Err(MusicBrainzError::NotFound(url.to_string()));
        }
        if status == 503 {
            return Err(MusicBrainzError::RateLimitExceeded);
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(MusicBrainzError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| MusicBrainzError::InvalidResponse(format!("failed to parse: {e}")))
    }

    async fn fetch_cover_art(&self, release_group_id: &str) -> Option<CoverArtResponse> {
        let url = format!("{}/release-group/{}", self.cover_art_base_url, release_group_id);
        self.get(&url).await.ok()
    }

    async fn fetch_release(&self, release_id: &str) -> Result<MbRelease> {
        let url = format!(
            "{}/release/{}?fmt=json&inc=recordings+artist-credits",
            self.base_url, release_id
        );
        self.get(&url).await
    }
}

#[async_trait]
impl ExternalCatalogClient for MusicBrainzClient {
    async fn get_artist(&self, artist_id: &str) -> anyhow::Result<RemoteArtist> {
        let url = format!(
            "{}/artist/{}?fmt=json&inc=release-groups",
            self.base_url, artist_id
        );
        let lookup: MbArtistLookup = self.get(&url).await?;

        let mut covers = HashMap::new();
        for rg in &lookup.release_groups {
            if let Some(cover) = self.fetch_cover_art(&rg.id).await {
                covers.insert(rg.id.clone(), cover);
            }
        }

        Ok(artist_lookup_to_remote(lookup, &covers))
    }

    async fn get_album(&self, browse_id: &str) -> anyhow::Result<RemoteAlbum> {
        let url = format!(
            "{}/release-group/{}?fmt=json&inc=artist-credits+releases",
            self.base_url, browse_id
        );
        let rg: crate::models::MbReleaseGroup = self.get(&url).await?;

        let cover = self.fetch_cover_art(&rg.id).await;
        let release = match rg.releases.first() {
            Some(r) => self.fetch_release(&r.id).await?,
            None => {
                return Err(MusicBrainzError::InvalidResponse(
                    "release group has no releases".to_string(),
                )
                .into())
            }
        };

        Ok(release_to_remote_album(&rg, &release, cover.as_ref()))
    }

    async fn get_playlist(&self, playlist_id: &str) -> anyhow::Result<RemotePlaylist> {
        let release = self.fetch_release(playlist_id).await?;
        Ok(release_to_remote_playlist(&release))
    }

    async fn search(
        &self,
        query: &str,
        filter: Option<SearchFilter>,
        limit: u32,
    ) -> anyhow::Result<Vec<SearchResultItem>> {
        match filter {
            Some(SearchFilter::Artists) | None => {
                let mut url = Url::parse(&format!("{}/artist", self.base_url))?;
                url.query_pairs_mut()
                    .append_pair("query", query)
                    .append_pair("fmt", "json")
                    .append_pair("limit", &limit.to_string());
                let resp: MbArtistSearchResponse = self.get(url.as_str()).await?;
                Ok(resp
                    .artists
                    .into_iter()
                    .map(|a| SearchResultItem {
                        id: a.id,
                        title: a.name,
                        kind: "artist".to_string(),
                    })
                    .collect())
            }
            Some(SearchFilter::Albums) => {
                let mut url = Url::parse(&format!("{}/release-group", self.base_url))?;
                url.query_pairs_mut()
                    .append_pair("query", query)
                    .append_pair("fmt", "json")
                    .append_pair("limit", &limit.to_string());
                let resp: MbReleaseGroupSearchResponse = self.get(url.as_str()).await?;
                Ok(resp
                    .release_groups
                    .into_iter()
                    .map(|rg| SearchResultItem {
                        id: rg.id.clone(),
                        title: rg.title.clone(),
                        kind: "album".to_string(),
                    })
                    .collect())
            }
            Some(SearchFilter::Songs) => {
                let mut url = Url::parse(&format!("{}/recording", self.base_url))?;
                url.query_pairs_mut()
                    .append_pair("query", query)
                    .append_pair("fmt", "json")
                    .append_pair("limit", &limit.to_string());
                #[derive(serde::Deserialize)]
                struct Recordings {
                    #[serde(default)]
                    recordings: Vec<crate::models::MbArtistCredit2>,
                }
                let resp: Recordings = self.get(url.as_str()).await?;
                Ok(resp
                    .recordings
                    .into_iter()
                    .map(|r| SearchResultItem {
                        id: r.id,
                        title: r.name,
                        kind: "song".to_string(),
                    })
                    .collect())
            }
        }
    }

    /// MusicBrainz has no charts concept; this falls back to an
    /// album-search proxy so the contract is still satisfiable end to end.
    async fn get_charts(&self, country: &str) -> anyhow::Result<Charts> {
        let mut url = Url::parse(&format!("{}/release-group", self.base_url))?;
        url.query_pairs_mut()
            .append_pair("query", "tag:pop")
            .append_pair("fmt", "json")
            .append_pair("limit", "20");
        let resp: MbReleaseGroupSearchResponse = self.get(url.as_str()).await?;
        let entries = resp
            .release_groups
            .iter()
            .map(|rg| {
                let reference = release_group_to_album_ref(rg, None);
                catalogd_external::ChartEntry {
                    title: reference.title,
                    subtitle: None,
                    thumbnails: reference.thumbnails,
                }
            })
            .collect();
        Ok(Charts {
            country: country.to_string(),
            entries,
        })
    }
}

impl Default for MusicBrainzClient {
    fn default() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| Client::new());

        MusicBrainzClient {
            client,
            base_url: MUSICBRAINZ_API_BASE.to_string(),
            cover_art_base_url: COVER_ART_ARCHIVE_BASE.to_string(),
            rate_limiter: RateLimiter::new(Duration::from_secs(1)),
        }
    }
}

/// Builder for configuring a MusicBrainz client (custom base URLs for
/// pointing at a mock server in tests, timeout, rate limit interval).
#[derive(Debug)]
pub struct MusicBrainzClientBuilder {
    base_url: String,
    cover_art_base_url: String,
    timeout: Duration,
    rate_limit_interval: Duration,
}

impl Default for MusicBrainzClientBuilder {
    fn default() -> Self {
        Self {
            base_url: MUSICBRAINZ_API_BASE.to_string(),
            cover_art_base_url: COVER_ART_ARCHIVE_BASE.to_string(),
            timeout: Duration::from_secs(15),
            rate_limit_interval: Duration::from_secs(1),
        }
    }
}

impl MusicBrainzClientBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn cover_art_base_url(mut self, url: impl Into<String>) -> Self {
        self.cover_art_base_url = url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn rate_limit_interval(mut self, interval: Duration) -> Self {
        self.rate_limit_interval = interval;
        self
    }

    pub fn build(self) -> Result<MusicBrainzClient> {
        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(MusicBrainzClient {
            client,
            base_url: self.base_url,
            cover_art_base_url: self.cover_art_base_url,
            rate_limiter: RateLimiter::new(self.rate_limit_interval),
        })
    }
}
