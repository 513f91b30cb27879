use log::{debug, warn};

use mixtape_core::Platform;
use mixtape_platforms::{best_match, PlatformError, PlatformGateway, SongQuery};

use crate::{Database, PrimaryKey, SongData, SyncContext};

/// Confidence required when reconciling an existing playlist against a round.
pub const RECONCILE_CONFIDENCE: f64 = 0.6;

/// Confidence required when resolving tracks for a playlist's initial
/// creation. Intentionally stricter than [`RECONCILE_CONFIDENCE`].
pub const CREATION_CONFIDENCE: f64 = 0.7;

/// Resolves songs known on one platform to track ids on another, caching
/// discovered identities on the song.
pub struct CrossPlatformMatcher<G, Db> {
    context: SyncContext<G, Db>,
}

/// A resolved cross-platform identity.
#[derive(Debug, Clone)]
pub struct SongMatch {
    pub song_id: PrimaryKey,
    pub track_id: String,
    pub confidence: f64,
}

/// A song that could not be resolved on the target platform, and why.
#[derive(Debug, Clone)]
pub struct MatchFailure {
    pub song_id: PrimaryKey,
    pub reason: String,
}

impl<G, Db> CrossPlatformMatcher<G, Db>
where
    G: PlatformGateway,
    Db: Database,
{
    pub fn new(context: &SyncContext<G, Db>) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Searches the target platform's catalog for one song. A confident match
    /// is written back onto the song so future rounds skip the search; a
    /// failed write-back is logged and does not fail the resolution.
    pub async fn resolve(
        &self,
        token: &str,
        song: &SongData,
        target: Platform,
        threshold: f64,
    ) -> Result<Option<SongMatch>, PlatformError> {
        let query = SongQuery {
            title: song.title.clone(),
            artist: song.artist.clone(),
            album: song.album.clone(),
        };

        let candidates = self
            .context
            .gateway
            .search_catalog(target, token, &query)
            .await?;

        let Some((candidate, confidence)) = best_match(&query, candidates) else {
            debug!("no {target} candidates for song {}", song.id);
            return Ok(None);
        };

        if confidence < threshold {
            debug!(
                "best {target} candidate for song {} scored {confidence:.2}, below {threshold}",
                song.id
            );
            return Ok(None);
        }

        if let Err(err) = self
            .context
            .database
            .set_song_platform_id(song.id, target, &candidate.id)
            .await
        {
            warn!(
                "could not cache {target} id for song {}: {err}",
                song.id
            );
        }

        Ok(Some(SongMatch {
            song_id: song.id,
            track_id: candidate.id,
            confidence,
        }))
    }

    /// Resolves a batch of songs. Unmatched songs are dropped into the
    /// failure list; no single song aborts the batch.
    pub async fn match_songs(
        &self,
        token: &str,
        songs: &[SongData],
        target: Platform,
        threshold: f64,
    ) -> (Vec<SongMatch>, Vec<MatchFailure>) {
        let mut matches = Vec::new();
        let mut failures = Vec::new();

        for song in songs {
            match self.resolve(token, song, target, threshold).await {
                Ok(Some(found)) => matches.push(found),
                Ok(None) => failures.push(MatchFailure {
                    song_id: song.id,
                    reason: format!("no match above {threshold} on {target}"),
                }),
                Err(err) => failures.push(MatchFailure {
                    song_id: song.id,
                    reason: err.to_string(),
                }),
            }
        }

        (matches, failures)
    }
}
