use chrono::Utc;
use log::{error, info, warn};
use std::collections::HashSet;
use thiserror::Error;

use mixtape_core::{Platform, TOKEN_RETRY, TRACK_PUSH_RETRY};
use mixtape_platforms::{PlatformError, PlatformGateway};

use crate::{
    CrossPlatformMatcher, Database, DatabaseError, GroupData, GroupMemberData,
    GroupPlaylistData, MatchFailure, NewGroupPlaylist, PrimaryKey, SongData, SyncContext,
    SyncEvent, TokenError, TokenProvider, RECONCILE_CONFIDENCE,
};

/// Keeps each group's platform playlists existing and in step with its
/// submissions.
///
/// Platforms for one group are always processed sequentially, so a
/// create-or-fetch race can only happen between processes, where the
/// database's uniqueness constraint resolves it.
pub struct GroupPlaylistManager<G, Db> {
    context: SyncContext<G, Db>,
    tokens: TokenProvider<G, Db>,
    matcher: CrossPlatformMatcher<G, Db>,
}

#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("group has no member able to manage a {platform} playlist")]
    NoEligibleCreator { platform: Platform },

    #[error("no valid {platform} token could be obtained")]
    NoValidToken { platform: Platform },

    #[error(transparent)]
    Db(#[from] DatabaseError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Token(#[from] TokenError),
}

/// A playlist confirmed to exist for a group on a platform.
#[derive(Debug, Clone)]
pub struct EnsuredPlaylist {
    pub platform: Platform,
    pub playlist_id: String,
    pub url: String,
}

impl From<GroupPlaylistData> for EnsuredPlaylist {
    fn from(playlist: GroupPlaylistData) -> Self {
        EnsuredPlaylist {
            platform: playlist.platform,
            playlist_id: playlist.platform_playlist_id,
            url: playlist.playlist_url,
        }
    }
}

/// What happened to each platform during a round update.
#[derive(Debug, Default)]
pub struct RoundUpdateReport {
    pub updated: Vec<Platform>,
    pub failed: Vec<Platform>,
    /// Songs that could not be resolved on some platform
    pub unresolved: Vec<MatchFailure>,
}

impl RoundUpdateReport {
    /// True when no platform that was attempted failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// The platforms one member contributes to the group's target set.
#[derive(Debug, Clone)]
struct MemberPlatforms {
    preferred: Option<Platform>,
    linked: Vec<Platform>,
}

impl<G, Db> GroupPlaylistManager<G, Db>
where
    G: PlatformGateway,
    Db: Database,
{
    pub fn new(context: &SyncContext<G, Db>) -> Self {
        Self {
            context: context.clone(),
            tokens: TokenProvider::new(context),
            matcher: CrossPlatformMatcher::new(context),
        }
    }

    /// Guarantees the group has one valid playlist per platform its members
    /// use. Each platform is handled independently; one platform's failure
    /// never aborts the others. Returns the playlists that could be ensured.
    pub async fn ensure_group_playlists(
        &self,
        group_id: PrimaryKey,
        requesting_user: Option<PrimaryKey>,
    ) -> Result<Vec<EnsuredPlaylist>, PlaylistError> {
        let group = self.context.database.group_by_id(group_id).await?;
        let members = self.context.database.group_members(group_id).await?;

        let mut profiles = Vec::with_capacity(members.len());

        for member in &members {
            let preferred = self
                .context
                .database
                .preferences_by_user(member.user_id)
                .await?
                .and_then(|preferences| preferences.preferred_platform);

            let linked = self
                .context
                .database
                .music_accounts_by_user(member.user_id)
                .await?
                .iter()
                .map(|account| account.platform)
                .collect();

            profiles.push(MemberPlatforms { preferred, linked });
        }

        let mut ensured = Vec::new();

        for platform in target_platforms(&profiles) {
            match self
                .ensure_platform_playlist(&group, &members, platform, requesting_user)
                .await
            {
                Ok(playlist) => ensured.push(playlist),
                Err(err) => {
                    warn!(
                        "could not ensure {platform} playlist for group {}: {err}",
                        group.id
                    );
                }
            }
        }

        Ok(ensured)
    }

    /// Reconciles every active playlist of the round's group against the
    /// round's submissions with full-replace semantics. A day with no
    /// submissions empties the playlists rather than leaving stale tracks.
    pub async fn update_group_playlists_for_round(
        &self,
        round_id: PrimaryKey,
    ) -> Result<RoundUpdateReport, PlaylistError> {
        let round = self.context.database.round_by_id(round_id).await?;
        let group = self.context.database.group_by_id(round.group_id).await?;
        let members = self.context.database.group_members(group.id).await?;
        let submissions = self.context.database.submissions_for_round(round_id).await?;
        let playlists = self
            .context
            .database
            .active_playlists_for_group(group.id)
            .await?;

        let mut songs = Vec::with_capacity(submissions.len());
        for submission in &submissions {
            songs.push(self.context.database.song_by_id(submission.song_id).await?);
        }

        let mut report = RoundUpdateReport::default();

        for playlist in playlists {
            let platform = playlist.platform;

            match self
                .update_platform_playlist(&group, &members, &playlist, &songs)
                .await
            {
                Ok(unresolved) => {
                    report.updated.push(platform);
                    report.unresolved.extend(unresolved);

                    self.context.emit(SyncEvent::PlaylistUpdated {
                        group_id: group.id,
                        platform,
                        track_count: songs.len(),
                    });
                }
                Err(err) => {
                    error!(
                        "failed to update {platform} playlist for group {}: {err}",
                        group.id
                    );

                    report.failed.push(platform);

                    self.context.emit(SyncEvent::PlaylistUpdateFailed {
                        group_id: group.id,
                        platform,
                        error: err.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }

    /// Tears down every active playlist of a group, typically because the
    /// group itself is being deleted. Best effort; returns how many were
    /// removed upstream.
    pub async fn delete_group_playlists(&self, group_id: PrimaryKey) -> Result<usize, PlaylistError> {
        let group = self.context.database.group_by_id(group_id).await?;
        let members = self.context.database.group_members(group_id).await?;
        let playlists = self
            .context
            .database
            .active_playlists_for_group(group_id)
            .await?;

        let mut deleted = 0;

        for playlist in playlists {
            match self.remove_platform_playlist(&group, &members, &playlist).await {
                Ok(()) => deleted += 1,
                Err(err) => warn!(
                    "could not remove {} playlist for group {}: {err}",
                    playlist.platform, group.id
                ),
            }
        }

        Ok(deleted)
    }

    async fn ensure_platform_playlist(
        &self,
        group: &GroupData,
        members: &[GroupMemberData],
        platform: Platform,
        requesting_user: Option<PrimaryKey>,
    ) -> Result<EnsuredPlaylist, PlaylistError> {
        match self.context.database.active_playlist(group.id, platform).await {
            Ok(existing) => {
                if self.still_exists_upstream(&existing).await {
                    return Ok(existing.into());
                }

                info!(
                    "{platform} playlist for group {} is gone upstream, recreating",
                    group.id
                );

                self.context.database.supersede_playlist(existing.id).await?;
            }
            Err(DatabaseError::NotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }

        self.create_platform_playlist(group, members, platform, requesting_user)
            .await
    }

    async fn create_platform_playlist(
        &self,
        group: &GroupData,
        members: &[GroupMemberData],
        platform: Platform,
        requesting_user: Option<PrimaryKey>,
    ) -> Result<EnsuredPlaylist, PlaylistError> {
        let name = playlist_name(&group.name);
        let description = playlist_description(&group.name);

        for candidate in creator_candidates(group, members, requesting_user) {
            let token = match self.tokens.get_valid_user_token(candidate, platform).await {
                Ok(Some(token)) => token,
                Ok(None) => continue,
                Err(err) => {
                    warn!("skipping creator candidate {candidate} for {platform}: {err}");
                    continue;
                }
            };

            let created = self
                .context
                .gateway
                .create_playlist(platform, &token, &name, &description)
                .await?;

            return match self
                .context
                .database
                .create_group_playlist(NewGroupPlaylist {
                    group_id: group.id,
                    platform,
                    platform_playlist_id: created.id,
                    playlist_url: created.url,
                    playlist_name: created.name,
                    user_id: candidate,
                })
                .await
            {
                Ok(playlist) => {
                    self.context.emit(SyncEvent::PlaylistCreated {
                        group_id: group.id,
                        platform,
                        playlist_id: playlist.id,
                    });

                    Ok(playlist.into())
                }
                // A concurrent creator won the race; converge on their row.
                Err(DatabaseError::Conflict { .. }) => {
                    let existing = self
                        .context
                        .database
                        .active_playlist(group.id, platform)
                        .await?;

                    Ok(existing.into())
                }
                Err(err) => Err(err.into()),
            };
        }

        Err(PlaylistError::NoEligibleCreator { platform })
    }

    /// Probes whether the playlist is still present upstream. When the probe
    /// itself is impossible (no credential) or fails, the row is kept; only a
    /// definitive "gone" answer supersedes it.
    async fn still_exists_upstream(&self, playlist: &GroupPlaylistData) -> bool {
        let token = match self
            .tokens
            .get_valid_user_token(playlist.user_id, playlist.platform)
            .await
        {
            Ok(Some(token)) => token,
            _ => return true,
        };

        match self
            .context
            .gateway
            .playlist_exists(playlist.platform, &token, &playlist.platform_playlist_id)
            .await
        {
            Ok(exists) => exists,
            Err(err) => {
                warn!(
                    "could not verify {} playlist {} upstream: {err}",
                    playlist.platform, playlist.platform_playlist_id
                );
                true
            }
        }
    }

    async fn update_platform_playlist(
        &self,
        group: &GroupData,
        members: &[GroupMemberData],
        playlist: &GroupPlaylistData,
        songs: &[SongData],
    ) -> Result<Vec<MatchFailure>, PlaylistError> {
        let platform = playlist.platform;
        let manager = self.select_credentialed_member(group, members, platform).await?;

        // Every attempt independently validates and fetches the token.
        let tokens = &self.tokens;
        let token = TOKEN_RETRY
            .run(
                |_| async move {
                    tokens
                        .get_valid_user_token(manager, platform)
                        .await?
                        .ok_or(PlaylistError::NoValidToken { platform })
                },
                |_| true,
            )
            .await?;

        let mut track_ids = Vec::with_capacity(songs.len());
        let mut unresolved = Vec::new();

        for song in songs {
            if let Some(direct) = song.platform_id(platform) {
                track_ids.push(direct.to_string());
                continue;
            }

            match self
                .matcher
                .resolve(&token, song, platform, RECONCILE_CONFIDENCE)
                .await
            {
                Ok(Some(found)) => track_ids.push(found.track_id),
                Ok(None) => unresolved.push(MatchFailure {
                    song_id: song.id,
                    reason: format!("no confident {platform} match"),
                }),
                Err(err) => unresolved.push(MatchFailure {
                    song_id: song.id,
                    reason: err.to_string(),
                }),
            }
        }

        self.push_tracks(manager, playlist, &track_ids, token).await?;

        self.context
            .database
            .stamp_playlist_updated(playlist.id, Utc::now())
            .await?;

        Ok(unresolved)
    }

    /// Full-replace push with bounded retries. An auth-shaped failure
    /// triggers an inline token refresh before the next attempt.
    async fn push_tracks(
        &self,
        manager: PrimaryKey,
        playlist: &GroupPlaylistData,
        track_ids: &[String],
        mut token: String,
    ) -> Result<(), PlaylistError> {
        let platform = playlist.platform;
        let mut attempt = 1;

        loop {
            match self
                .context
                .gateway
                .replace_tracks(platform, &token, &playlist.platform_playlist_id, track_ids)
                .await
            {
                Ok(()) => return Ok(()),
                Err(err) if attempt < TRACK_PUSH_RETRY.max_attempts => {
                    warn!(
                        "track push attempt {attempt}/{} failed on {platform}: {err}",
                        TRACK_PUSH_RETRY.max_attempts
                    );

                    if err.is_auth_error() {
                        match self.tokens.refresh_user_token(manager, platform).await {
                            Ok(fresh) => token = fresh,
                            Err(refresh_err) => {
                                warn!("inline {platform} token refresh failed: {refresh_err}")
                            }
                        }
                    }

                    tokio::time::sleep(TRACK_PUSH_RETRY.delay_after(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn remove_platform_playlist(
        &self,
        group: &GroupData,
        members: &[GroupMemberData],
        playlist: &GroupPlaylistData,
    ) -> Result<(), PlaylistError> {
        let platform = playlist.platform;
        let owner = self.select_credentialed_member(group, members, platform).await?;

        let token = self
            .tokens
            .get_valid_user_token(owner, platform)
            .await?
            .ok_or(PlaylistError::NoValidToken { platform })?;

        self.context
            .gateway
            .delete_playlist(platform, &token, &playlist.platform_playlist_id)
            .await?;

        self.context.database.supersede_playlist(playlist.id).await?;

        Ok(())
    }

    /// The first member in creator priority order holding an account for the
    /// platform.
    async fn select_credentialed_member(
        &self,
        group: &GroupData,
        members: &[GroupMemberData],
        platform: Platform,
    ) -> Result<PrimaryKey, PlaylistError> {
        for candidate in creator_candidates(group, members, None) {
            match self.context.database.music_account(candidate, platform).await {
                Ok(_) => return Ok(candidate),
                Err(DatabaseError::NotFound { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(PlaylistError::NoEligibleCreator { platform })
    }
}

/// The union of platforms the members use: a member's explicit preference
/// when they hold an account for it, otherwise every platform they have
/// linked. Ordered stably.
fn target_platforms(members: &[MemberPlatforms]) -> Vec<Platform> {
    let mut wanted = HashSet::new();

    for member in members {
        match member.preferred.filter(|preferred| member.linked.contains(preferred)) {
            Some(preferred) => {
                wanted.insert(preferred);
            }
            None => wanted.extend(member.linked.iter().copied()),
        }
    }

    Platform::ALL
        .into_iter()
        .filter(|platform| wanted.contains(platform))
        .collect()
}

/// Creator priority: the requesting user when they belong to the group, then
/// the group admin, then the remaining members.
fn creator_candidates(
    group: &GroupData,
    members: &[GroupMemberData],
    requesting_user: Option<PrimaryKey>,
) -> Vec<PrimaryKey> {
    let mut candidates = Vec::with_capacity(members.len() + 1);

    if let Some(user) = requesting_user {
        if members.iter().any(|member| member.user_id == user) {
            candidates.push(user);
        }
    }

    if !candidates.contains(&group.admin_user_id) {
        candidates.push(group.admin_user_id);
    }

    for member in members {
        if !candidates.contains(&member.user_id) {
            candidates.push(member.user_id);
        }
    }

    candidates
}

fn playlist_name(group_name: &str) -> String {
    format!("{group_name} Daily Mix")
}

fn playlist_description(group_name: &str) -> String {
    format!("One song a day from everyone in {group_name}, compiled by mixtape.")
}
