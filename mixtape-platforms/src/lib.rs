use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use mixtape_core::Platform;

mod apple;
mod scoring;
mod spotify;

pub use apple::*;
pub use scoring::*;
pub use spotify::*;

#[derive(Debug, Error)]
pub enum PlatformError {
    /// The request itself failed before a response arrived
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The platform rejected the credential
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The refresh token is missing, revoked, or rejected; the account must
    /// be re-linked before this platform can be used again
    #[error("refresh token is missing or no longer valid")]
    ReauthRequired,

    /// The platform's API has no implementation for this operation
    #[error("{platform} does not support {operation}")]
    Unsupported {
        platform: Platform,
        operation: &'static str,
    },

    /// No client was configured for the platform
    #[error("no client is configured for {0}")]
    NotConfigured(Platform),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("rate limited by the platform")]
    RateLimited,

    /// Any other non-success response
    #[error("platform returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("failed to parse platform response: {0}")]
    Parse(String),

    #[error("failed to sign developer token: {0}")]
    Signing(String),
}

impl PlatformError {
    /// Auth-shaped failures warrant an inline token refresh before retrying.
    pub fn is_auth_error(&self) -> bool {
        match self {
            PlatformError::Unauthorized(_) | PlatformError::ReauthRequired => true,
            PlatformError::Upstream { status, body } => {
                *status == 401
                    || body.to_lowercase().contains("unauthorized")
                    || body.to_lowercase().contains("token")
            }
            _ => false,
        }
    }

    /// Transient upstream failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::Http(err) => err.is_timeout() || err.is_connect(),
            PlatformError::RateLimited | PlatformError::Timeout(_) => true,
            PlatformError::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// A playlist as known to a platform.
#[derive(Debug, Clone)]
pub struct PlatformPlaylist {
    pub id: String,
    pub url: String,
    pub name: String,
}

/// A track candidate returned by a platform catalog search.
#[derive(Debug, Clone)]
pub struct CatalogTrack {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
}

/// The metadata triple used to search a platform catalog.
#[derive(Debug, Clone)]
pub struct SongQuery {
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
}

/// A rotated access credential returned by a platform token endpoint.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Platforms may rotate the refresh token along with the access token.
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// The capability surface every supported music platform implements.
///
/// Operations a platform's API genuinely lacks either warn and no-op (where
/// the caller must be allowed to proceed) or return [`PlatformError::Unsupported`].
#[async_trait]
pub trait PlatformApi {
    fn platform(&self) -> Platform;

    async fn create_playlist(
        &self,
        token: &str,
        name: &str,
        description: &str,
    ) -> Result<PlatformPlaylist, PlatformError>;

    /// Overwrites the playlist's entire track list.
    async fn replace_tracks(
        &self,
        token: &str,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), PlatformError>;

    /// Returns whether the playlist still exists upstream.
    async fn playlist_exists(&self, token: &str, playlist_id: &str)
        -> Result<bool, PlatformError>;

    async fn rename_playlist(
        &self,
        token: &str,
        playlist_id: &str,
        name: &str,
    ) -> Result<(), PlatformError>;

    /// Removes the playlist, or the closest thing the platform offers.
    async fn delete_playlist(&self, token: &str, playlist_id: &str) -> Result<(), PlatformError>;

    async fn search_catalog(
        &self,
        token: &str,
        query: &SongQuery,
    ) -> Result<Vec<CatalogTrack>, PlatformError>;

    /// Cheap authenticated call verifying the credential is usable.
    async fn probe_account(&self, token: &str) -> Result<(), PlatformError>;

    async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshedToken, PlatformError>;
}

/// A configured client for one of the supported platforms.
pub enum PlatformClient {
    Spotify(SpotifyClient),
    AppleMusic(AppleMusicClient),
}

#[async_trait]
impl PlatformApi for PlatformClient {
    fn platform(&self) -> Platform {
        match self {
            PlatformClient::Spotify(client) => client.platform(),
            PlatformClient::AppleMusic(client) => client.platform(),
        }
    }

    async fn create_playlist(
        &self,
        token: &str,
        name: &str,
        description: &str,
    ) -> Result<PlatformPlaylist, PlatformError> {
        match self {
            PlatformClient::Spotify(client) => client.create_playlist(token, name, description).await,
            PlatformClient::AppleMusic(client) => {
                client.create_playlist(token, name, description).await
            }
        }
    }

    async fn replace_tracks(
        &self,
        token: &str,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), PlatformError> {
        match self {
            PlatformClient::Spotify(client) => {
                client.replace_tracks(token, playlist_id, track_ids).await
            }
            PlatformClient::AppleMusic(client) => {
                client.replace_tracks(token, playlist_id, track_ids).await
            }
        }
    }

    async fn playlist_exists(
        &self,
        token: &str,
        playlist_id: &str,
    ) -> Result<bool, PlatformError> {
        match self {
            PlatformClient::Spotify(client) => client.playlist_exists(token, playlist_id).await,
            PlatformClient::AppleMusic(client) => client.playlist_exists(token, playlist_id).await,
        }
    }

    async fn rename_playlist(
        &self,
        token: &str,
        playlist_id: &str,
        name: &str,
    ) -> Result<(), PlatformError> {
        match self {
            PlatformClient::Spotify(client) => client.rename_playlist(token, playlist_id, name).await,
            PlatformClient::AppleMusic(client) => {
                client.rename_playlist(token, playlist_id, name).await
            }
        }
    }

    async fn delete_playlist(&self, token: &str, playlist_id: &str) -> Result<(), PlatformError> {
        match self {
            PlatformClient::Spotify(client) => client.delete_playlist(token, playlist_id).await,
            PlatformClient::AppleMusic(client) => client.delete_playlist(token, playlist_id).await,
        }
    }

    async fn search_catalog(
        &self,
        token: &str,
        query: &SongQuery,
    ) -> Result<Vec<CatalogTrack>, PlatformError> {
        match self {
            PlatformClient::Spotify(client) => client.search_catalog(token, query).await,
            PlatformClient::AppleMusic(client) => client.search_catalog(token, query).await,
        }
    }

    async fn probe_account(&self, token: &str) -> Result<(), PlatformError> {
        match self {
            PlatformClient::Spotify(client) => client.probe_account(token).await,
            PlatformClient::AppleMusic(client) => client.probe_account(token).await,
        }
    }

    async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> Result<RefreshedToken, PlatformError> {
        match self {
            PlatformClient::Spotify(client) => client.refresh_access_token(refresh_token).await,
            PlatformClient::AppleMusic(client) => client.refresh_access_token(refresh_token).await,
        }
    }
}

/// Routes platform operations to the configured client for each platform.
///
/// This is the seam the sync engine is generic over, so orchestration can be
/// tested against a fake gateway.
#[async_trait]
pub trait PlatformGateway: Send + Sync {
    fn is_configured(&self, platform: Platform) -> bool;

    async fn create_playlist(
        &self,
        platform: Platform,
        token: &str,
        name: &str,
        description: &str,
    ) -> Result<PlatformPlaylist, PlatformError>;

    async fn replace_tracks(
        &self,
        platform: Platform,
        token: &str,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), PlatformError>;

    async fn playlist_exists(
        &self,
        platform: Platform,
        token: &str,
        playlist_id: &str,
    ) -> Result<bool, PlatformError>;

    async fn rename_playlist(
        &self,
        platform: Platform,
        token: &str,
        playlist_id: &str,
        name: &str,
    ) -> Result<(), PlatformError>;

    async fn delete_playlist(
        &self,
        platform: Platform,
        token: &str,
        playlist_id: &str,
    ) -> Result<(), PlatformError>;

    async fn search_catalog(
        &self,
        platform: Platform,
        token: &str,
        query: &SongQuery,
    ) -> Result<Vec<CatalogTrack>, PlatformError>;

    async fn probe_account(&self, platform: Platform, token: &str) -> Result<(), PlatformError>;

    async fn refresh_access_token(
        &self,
        platform: Platform,
        refresh_token: &str,
    ) -> Result<RefreshedToken, PlatformError>;
}

/// Holds every configured platform client.
#[derive(Default)]
pub struct PlatformRegistry {
    clients: Vec<PlatformClient>,
}

impl PlatformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a client, replacing any previous client for its platform.
    pub fn register(&mut self, client: PlatformClient) {
        self.clients.retain(|c| c.platform() != client.platform());
        self.clients.push(client);
    }

    fn client(&self, platform: Platform) -> Result<&PlatformClient, PlatformError> {
        self.clients
            .iter()
            .find(|c| c.platform() == platform)
            .ok_or(PlatformError::NotConfigured(platform))
    }
}

#[async_trait]
impl PlatformGateway for PlatformRegistry {
    fn is_configured(&self, platform: Platform) -> bool {
        self.clients.iter().any(|c| c.platform() == platform)
    }

    async fn create_playlist(
        &self,
        platform: Platform,
        token: &str,
        name: &str,
        description: &str,
    ) -> Result<PlatformPlaylist, PlatformError> {
        self.client(platform)?
            .create_playlist(token, name, description)
            .await
    }

    async fn replace_tracks(
        &self,
        platform: Platform,
        token: &str,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), PlatformError> {
        self.client(platform)?
            .replace_tracks(token, playlist_id, track_ids)
            .await
    }

    async fn playlist_exists(
        &self,
        platform: Platform,
        token: &str,
        playlist_id: &str,
    ) -> Result<bool, PlatformError> {
        self.client(platform)?.playlist_exists(token, playlist_id).await
    }

    async fn rename_playlist(
        &self,
        platform: Platform,
        token: &str,
        playlist_id: &str,
        name: &str,
    ) -> Result<(), PlatformError> {
        self.client(platform)?
            .rename_playlist(token, playlist_id, name)
            .await
    }

    async fn delete_playlist(
        &self,
        platform: Platform,
        token: &str,
        playlist_id: &str,
    ) -> Result<(), PlatformError> {
        self.client(platform)?.delete_playlist(token, playlist_id).await
    }

    async fn search_catalog(
        &self,
        platform: Platform,
        token: &str,
        query: &SongQuery,
    ) -> Result<Vec<CatalogTrack>, PlatformError> {
        self.client(platform)?.search_catalog(token, query).await
    }

    async fn probe_account(&self, platform: Platform, token: &str) -> Result<(), PlatformError> {
        self.client(platform)?.probe_account(token).await
    }

    async fn refresh_access_token(
        &self,
        platform: Platform,
        refresh_token: &str,
    ) -> Result<RefreshedToken, PlatformError> {
        self.client(platform)?.refresh_access_token(refresh_token).await
    }
}
