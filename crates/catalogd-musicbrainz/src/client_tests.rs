// SPDX-License-Identifier: GPL-3.0-or-later

#[cfg(test)]
mod tests {
    use crate::MusicBrainzClient;
    use catalogd_external::ExternalCatalogClient;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RADIOHEAD_MBID: &str = "a74b1b7f-71a5-4011-9441-d0b5e4122711";
    const OK_COMPUTER_MBID: &str = "b1392450-e666-3926-a536-22c65f834433";
    const RELEASE_MBID: &str = "6a0dbb15-ee48-3dc0-9802-3c7d3349b4c1";

    fn artist_lookup_response() -> serde_json::Value {
        serde_json::json!({
            "id": RADIOHEAD_MBID,
            "name": "Radiohead",
            "release-groups": [{
                "id": OK_COMPUTER_MBID,
                "title": "OK Computer",
                "primary-type": "Album",
                "first-release-date": "1997-05-21",
                "artist-credit": [],
                "releases": []
            }]
        })
    }

    fn release_group_lookup_response() -> serde_json::Value {
        serde_json::json!({
            "id": OK_COMPUTER_MBID,
            "title": "OK Computer",
            "primary-type": "Album",
            "first-release-date": "1997-05-21",
            "artist-credit": [{
                "name": "Radiohead",
                "artist": { "id": RADIOHEAD_MBID, "name": "Radiohead" }
            }],
            "releases": [{ "id": RELEASE_MBID }]
        })
    }

    fn release_response() -> serde_json::Value {
        serde_json::json!({
            "id": RELEASE_MBID,
            "title": "OK Computer",
            "media": [{
                "tracks": [{
                    "id": "t1",
                    "title": "Airbag",
                    "position": 1,
                    "length": 284000,
                    "recording": { "id": "rec-1" },
                    "artist-credit": []
                }]
            }]
        })
    }

    #[tokio::test]
    async fn get_artist_splits_albums_and_singles_by_primary_type() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/artist/{RADIOHEAD_MBID}")))
            .and(query_param("fmt", "json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(artist_lookup_response()))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/release-group/{OK_COMPUTER_MBID}")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = MusicBrainzClient::builder()
            .base_url(mock_server.uri())
            .cover_art_base_url(mock_server.uri())
            .build()
            .unwrap();

        let artist = client.get_artist(RADIOHEAD_MBID).await.unwrap();
        assert_eq!(artist.name, "Radiohead");
        assert_eq!(artist.albums.len(), 1);
        assert_eq!(artist.singles.len(), 0);
        assert_eq!(artist.albums[0].title, "OK Computer");
    }

    #[tokio::test]
    async fn get_album_fetches_release_group_then_its_first_release() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/release-group/{OK_COMPUTER_MBID}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(release_group_lookup_response()))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/release/{RELEASE_MBID}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(release_response()))
            .mount(&mock_server)
            .await;
        let client = MusicBrainzClient::builder().base_url(mock_server.uri()).build().unwrap();

        let album = client.get_album(OK_COMPUTER_MBID).await.unwrap();
        assert_eq!(album.title, "OK Computer");
        assert_eq!(album.tracks.len(), 1);
        assert_eq!(album.tracks[0].id, "rec-1");
        assert_eq!(album.tracks[0].duration, Some(284));
    }

    #[tokio::test]
    async fn get_playlist_treats_release_tracklist_as_playlist() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/release/{RELEASE_MBID}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(release_response()))
            .mount(&mock_server)
            .await;

        let client = MusicBrainzClient::builder()
            .base_url(mock_server.uri())
            .build()
            .unwrap();

        let playlist = client.get_playlist(RELEASE_MBID).await.unwrap();
        assert_eq!(playlist.tracks.len(), 1);
        assert_eq!(playlist.tracks[0].audio_id, "rec-1");
    }

    #[tokio::test]
    async fn not_found_propagates_as_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/artist/{RADIOHEAD_MBID}")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = MusicBrainzClient::builder()
            .base_url(mock_server.uri())
            .build()
            .unwrap();

        let result = client.get_artist(RADIOHEAD_MBID).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rate_limit_response_surfaces_as_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/artist/{RADIOHEAD_MBID}")))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let client = MusicBrainzClient::builder()
            .base_url(mock_server.uri())
            .build()
            .unwrap();

        let result = client.get_artist(RADIOHEAD_MBID).await;
        assert!(result.is_err());
    }
}
