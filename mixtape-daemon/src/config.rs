use std::env;
use thiserror::Error;

/// Everything the daemon reads from the environment at startup.
#[derive(Debug)]
pub struct DaemonConfig {
    pub database_url: String,
    pub spotify: Option<SpotifyConfig>,
    pub apple_music: Option<AppleMusicConfig>,
}

#[derive(Debug)]
pub struct SpotifyConfig {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug)]
pub struct AppleMusicConfig {
    pub team_id: String,
    pub key_id: String,
    /// Contents of the ES256 signing key (.p8)
    pub private_key: String,
    pub storefront: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("could not read {path}: {source}")]
    UnreadableKey {
        path: String,
        source: std::io::Error,
    },
}

const DEFAULT_STOREFRONT: &str = "us";

impl DaemonConfig {
    /// Reads the configuration from the environment. The database is
    /// required; each platform is enabled only when its variables are
    /// present, so a deployment can run Spotify-only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?;

        let spotify = match (env::var("SPOTIFY_CLIENT_ID"), env::var("SPOTIFY_CLIENT_SECRET")) {
            (Ok(client_id), Ok(client_secret)) => Some(SpotifyConfig {
                client_id,
                client_secret,
            }),
            (Ok(_), Err(_)) => return Err(ConfigError::Missing("SPOTIFY_CLIENT_SECRET")),
            (Err(_), Ok(_)) => return Err(ConfigError::Missing("SPOTIFY_CLIENT_ID")),
            (Err(_), Err(_)) => None,
        };

        let apple_music = match (env::var("APPLE_TEAM_ID"), env::var("APPLE_KEY_ID")) {
            (Ok(team_id), Ok(key_id)) => {
                let path = env::var("APPLE_PRIVATE_KEY_PATH")
                    .map_err(|_| ConfigError::Missing("APPLE_PRIVATE_KEY_PATH"))?;

                let private_key = std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::UnreadableKey { path, source })?;

                Some(AppleMusicConfig {
                    team_id,
                    key_id,
                    private_key,
                    storefront: env::var("APPLE_STOREFRONT")
                        .unwrap_or_else(|_| DEFAULT_STOREFRONT.to_string()),
                })
            }
            (Ok(_), Err(_)) => return Err(ConfigError::Missing("APPLE_KEY_ID")),
            (Err(_), Ok(_)) => return Err(ConfigError::Missing("APPLE_TEAM_ID")),
            (Err(_), Err(_)) => None,
        };

        Ok(Self {
            database_url,
            spotify,
            apple_music,
        })
    }
}
