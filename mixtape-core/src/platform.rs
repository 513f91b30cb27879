use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// A music platform mixtape can mirror group playlists to.
///
/// Adding support for a new platform means adding a variant here and a client
/// implementing the platform capability trait, nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    Spotify,
    AppleMusic,
}

#[derive(Debug, Error)]
#[error("unknown platform: {0}")]
pub struct UnknownPlatform(String);

impl Platform {
    /// Every supported platform, in a stable order.
    pub const ALL: [Platform; 2] = [Platform::Spotify, Platform::AppleMusic];

    /// The identifier used in the database and in platform id maps.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Spotify => "spotify",
            Platform::AppleMusic => "apple-music",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = UnknownPlatform;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "spotify" => Ok(Platform::Spotify),
            "apple-music" => Ok(Platform::AppleMusic),
            other => Err(UnknownPlatform(other.to_string())),
        }
    }
}
