use async_trait::async_trait;
use chrono::{Duration as TimeDelta, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

use mixtape_core::Platform;

use crate::{CatalogTrack, PlatformApi, PlatformError, PlatformPlaylist, RefreshedToken, SongQuery};

const API_BASE: &str = "https://api.spotify.com/v1";
const TOKEN_ENDPOINT: &str = "https://accounts.spotify.com/api/token";

/// Spotify caps playlist track writes at this many items per request.
pub const TRACK_BATCH_LIMIT: usize = 100;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const SEARCH_LIMIT: usize = 10;

lazy_static! {
    /// Matches a bare track id, a `spotify:track:` URI, or an open.spotify.com URL.
    static ref TRACK_ID_REGEX: Regex =
        Regex::new(r"^(?:spotify:track:|https?://open\.spotify\.com/track/)?([A-Za-z0-9]{22})")
            .expect("track id pattern compiles");
}

/// Normalizes any of the forms a Spotify track reference is stored in down to
/// the bare 22 character id.
pub fn normalize_track_id(value: &str) -> Option<String> {
    TRACK_ID_REGEX
        .captures(value.trim())
        .map(|captures| captures[1].to_string())
}

/// The form track references take in playlist write calls.
pub fn track_uri(id: &str) -> String {
    format!("spotify:track:{id}")
}

/// A client for the Spotify Web API.
pub struct SpotifyClient {
    client_id: String,
    client_secret: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SpotifyUser {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PlaylistResponse {
    id: String,
    name: String,
    external_urls: ExternalUrls,
}

#[derive(Debug, Deserialize)]
struct ExternalUrls {
    spotify: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    tracks: SearchTracks,
}

#[derive(Debug, Deserialize)]
struct SearchTracks {
    items: Vec<TrackObject>,
}

#[derive(Debug, Deserialize)]
struct TrackObject {
    id: String,
    name: String,
    artists: Vec<ArtistObject>,
    album: Option<AlbumObject>,
}

#[derive(Debug, Deserialize)]
struct ArtistObject {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AlbumObject {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
}

impl SpotifyClient {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            client_id,
            client_secret,
            http: reqwest::Client::new(),
        }
    }

    async fn me(&self, token: &str) -> Result<SpotifyUser, PlatformError> {
        let response = self
            .http
            .get(format!("{API_BASE}/me"))
            .bearer_auth(token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        Ok(ensure_success(response).await?.json().await?)
    }
}

#[async_trait]
impl PlatformApi for SpotifyClient {
    fn platform(&self) -> Platform {
        Platform::Spotify
    }

    async fn create_playlist(
        &self,
        token: &str,
        name: &str,
        description: &str,
    ) -> Result<PlatformPlaylist, PlatformError> {
        let user = self.me(token).await?;

        let response = self
            .http
            .post(format!("{API_BASE}/users/{}/playlists", user.id))
            .bearer_auth(token)
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({
                "name": name,
                "description": description,
                "public": false,
                "collaborative": true,
            }))
            .send()
            .await?;

        let playlist: PlaylistResponse = ensure_success(response).await?.json().await?;

        Ok(PlatformPlaylist {
            id: playlist.id,
            url: playlist.external_urls.spotify,
            name: playlist.name,
        })
    }

    async fn replace_tracks(
        &self,
        token: &str,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), PlatformError> {
        // Stored references may be bare ids, URIs, or share links.
        let uris: Vec<String> = track_ids
            .iter()
            .map(|id| match normalize_track_id(id) {
                Some(bare) => track_uri(&bare),
                None => track_uri(id),
            })
            .collect();
        let endpoint = format!("{API_BASE}/playlists/{playlist_id}/tracks");

        if uris.len() <= TRACK_BATCH_LIMIT {
            let response = self
                .http
                .put(&endpoint)
                .bearer_auth(token)
                .timeout(REQUEST_TIMEOUT)
                .json(&json!({ "uris": uris }))
                .send()
                .await?;

            ensure_success(response).await?;
            return Ok(());
        }

        // Above the cap: clear with an empty replace, then append in batches.
        let response = self
            .http
            .put(&endpoint)
            .bearer_auth(token)
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({ "uris": [] }))
            .send()
            .await?;

        ensure_success(response).await?;

        for batch in uris.chunks(TRACK_BATCH_LIMIT) {
            let response = self
                .http
                .post(&endpoint)
                .bearer_auth(token)
                .timeout(REQUEST_TIMEOUT)
                .json(&json!({ "uris": batch }))
                .send()
                .await?;

            ensure_success(response).await?;
        }

        Ok(())
    }

    async fn playlist_exists(
        &self,
        token: &str,
        playlist_id: &str,
    ) -> Result<bool, PlatformError> {
        let response = self
            .http
            .get(format!("{API_BASE}/playlists/{playlist_id}"))
            .query(&[("fields", "id")])
            .bearer_auth(token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }

        ensure_success(response).await?;
        Ok(true)
    }

    async fn rename_playlist(
        &self,
        token: &str,
        playlist_id: &str,
        name: &str,
    ) -> Result<(), PlatformError> {
        let response = self
            .http
            .put(format!("{API_BASE}/playlists/{playlist_id}"))
            .bearer_auth(token)
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({ "name": name }))
            .send()
            .await?;

        ensure_success(response).await?;
        Ok(())
    }

    async fn delete_playlist(&self, token: &str, playlist_id: &str) -> Result<(), PlatformError> {
        // Spotify has no playlist deletion; unfollowing is the closest thing.
        let response = self
            .http
            .delete(format!("{API_BASE}/playlists/{playlist_id}/followers"))
            .bearer_auth(token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        ensure_success(response).await?;
        Ok(())
    }

    async fn search_catalog(
        &self,
        token: &str,
        query: &SongQuery,
    ) -> Result<Vec<CatalogTrack>, PlatformError> {
        let mut term = format!("track:{} artist:{}", query.title, query.artist);

        if let Some(album) = &query.album {
            term.push_str(&format!(" album:{album}"));
        }

        let mut url = Url::parse(&format!("{API_BASE}/search")).expect("search url is valid");
        url.query_pairs_mut()
            .append_pair("q", &term)
            .append_pair("type", "track")
            .append_pair("limit", &SEARCH_LIMIT.to_string());

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let results: SearchResponse = ensure_success(response).await?.json().await?;

        let tracks = results
            .tracks
            .items
            .into_iter()
            .map(|track| CatalogTrack {
                id: track.id,
                title: track.name,
                artist: track
                    .artists
                    .first()
                    .map(|artist| artist.name.clone())
                    .unwrap_or_default(),
                album: track.album.map(|album| album.name),
            })
            .collect();

        Ok(tracks)
    }

    async fn probe_account(&self, token: &str) -> Result<(), PlatformError> {
        self.me(token).await.map(|_| ())
    }

    async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshedToken, PlatformError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let response = self
            .http
            .post(TOKEN_ENDPOINT)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .timeout(REQUEST_TIMEOUT)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            return Err(PlatformError::ReauthRequired);
        }

        if !status.is_success() {
            return Err(PlatformError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|err| PlatformError::Parse(err.to_string()))?;

        Ok(RefreshedToken {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: Utc::now() + TimeDelta::seconds(token.expires_in),
        })
    }
}

async fn ensure_success(response: Response) -> Result<Response, PlatformError> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();

    Err(match status {
        StatusCode::UNAUTHORIZED => PlatformError::Unauthorized(body),
        StatusCode::NOT_FOUND => PlatformError::NotFound(body),
        StatusCode::TOO_MANY_REQUESTS => PlatformError::RateLimited,
        status => PlatformError::Upstream {
            status: status.as_u16(),
            body,
        },
    })
}
