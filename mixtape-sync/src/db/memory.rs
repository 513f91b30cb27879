//! An in-memory [`Database`] used by unit tests.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;

use mixtape_core::Platform;

use crate::{
    Database, DatabaseError, GroupData, GroupMemberData, GroupPlaylistData, MergePlan,
    MusicAccountData, NewDailyRound, NewGroupPlaylist, PlaylistState, PreferencesData,
    PrimaryKey, Result, RoundData, RoundStatus, SongData, SubmissionData, UpdatedTokens,
    UserData,
};

#[derive(Default)]
struct State {
    next_id: PrimaryKey,
    users: Vec<UserData>,
    aliases: Vec<(String, PrimaryKey, Platform)>,
    groups: Vec<GroupData>,
    members: Vec<GroupMemberData>,
    accounts: Vec<MusicAccountData>,
    preferences: Vec<PreferencesData>,
    rounds: Vec<RoundData>,
    submissions: Vec<SubmissionData>,
    songs: Vec<SongData>,
    playlists: Vec<GroupPlaylistData>,
}

impl State {
    fn next_id(&mut self) -> PrimaryKey {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<State>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, email: &str, display_name: &str) -> PrimaryKey {
        let mut state = self.state.lock();
        let id = state.next_id();

        state.users.push(UserData {
            id,
            email: email.to_string(),
            display_name: display_name.to_string(),
        });

        id
    }

    pub fn add_group(&self, name: &str, admin_user_id: PrimaryKey) -> PrimaryKey {
        let mut state = self.state.lock();
        let id = state.next_id();

        state.groups.push(GroupData {
            id,
            name: name.to_string(),
            admin_user_id,
            invite_code: format!("CODE{id:04}"),
            max_members: 12,
            is_public: false,
        });

        let member_id = state.next_id();
        state.members.push(GroupMemberData {
            id: member_id,
            group_id: id,
            user_id: admin_user_id,
        });

        id
    }

    pub fn add_member(&self, group_id: PrimaryKey, user_id: PrimaryKey) -> PrimaryKey {
        let mut state = self.state.lock();
        let id = state.next_id();

        state.members.push(GroupMemberData {
            id,
            group_id,
            user_id,
        });

        id
    }

    pub fn add_account(
        &self,
        user_id: PrimaryKey,
        platform: Platform,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> PrimaryKey {
        let mut state = self.state.lock();
        let id = state.next_id();

        state.accounts.push(MusicAccountData {
            id,
            user_id,
            platform,
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
            expires_at,
        });

        id
    }

    pub fn add_preferences(&self, user_id: PrimaryKey, preferred: Option<Platform>) {
        let mut state = self.state.lock();
        let id = state.next_id();

        state.preferences.push(PreferencesData {
            id,
            user_id,
            preferred_platform: preferred,
        });
    }

    pub fn add_song(
        &self,
        title: &str,
        artist: &str,
        platform_ids: &[(Platform, &str)],
    ) -> PrimaryKey {
        let mut state = self.state.lock();
        let id = state.next_id();

        state.songs.push(SongData {
            id,
            title: title.to_string(),
            artist: artist.to_string(),
            album: None,
            duration_secs: Some(180),
            platform_ids: platform_ids
                .iter()
                .map(|(platform, track_id)| {
                    (platform.as_str().to_string(), track_id.to_string())
                })
                .collect(),
        });

        id
    }

    pub fn add_round(&self, group_id: PrimaryKey, date: NaiveDate) -> PrimaryKey {
        let mut state = self.state.lock();
        let id = state.next_id();

        state.rounds.push(RoundData {
            id,
            group_id,
            date,
            deadline_at: Utc::now(),
            status: RoundStatus::Active,
        });

        id
    }

    pub fn add_submission(
        &self,
        round_id: PrimaryKey,
        user_id: PrimaryKey,
        song_id: PrimaryKey,
    ) -> PrimaryKey {
        let mut state = self.state.lock();
        let id = state.next_id();

        state.submissions.push(SubmissionData {
            id,
            round_id,
            user_id,
            song_id,
            comment: None,
            submitted_at: Utc::now(),
        });

        id
    }

    pub fn add_playlist(
        &self,
        group_id: PrimaryKey,
        platform: Platform,
        platform_playlist_id: &str,
        user_id: PrimaryKey,
    ) -> PrimaryKey {
        let mut state = self.state.lock();
        let id = state.next_id();

        state.playlists.push(GroupPlaylistData {
            id,
            group_id,
            platform,
            platform_playlist_id: platform_playlist_id.to_string(),
            playlist_url: format!("https://example.com/{platform_playlist_id}"),
            playlist_name: "Daily Mix".to_string(),
            user_id,
            last_updated: None,
            state: PlaylistState::Active,
        });

        id
    }

    pub fn round(&self, round_id: PrimaryKey) -> RoundData {
        self.state
            .lock()
            .rounds
            .iter()
            .find(|round| round.id == round_id)
            .expect("round exists")
            .clone()
    }

    pub fn playlist(&self, playlist_id: PrimaryKey) -> GroupPlaylistData {
        self.state
            .lock()
            .playlists
            .iter()
            .find(|playlist| playlist.id == playlist_id)
            .expect("playlist exists")
            .clone()
    }

    pub fn song(&self, song_id: PrimaryKey) -> SongData {
        self.state
            .lock()
            .songs
            .iter()
            .find(|song| song.id == song_id)
            .expect("song exists")
            .clone()
    }

    pub fn user_exists(&self, user_id: PrimaryKey) -> bool {
        self.state.lock().users.iter().any(|user| user.id == user_id)
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData> {
        self.state
            .lock()
            .users
            .iter()
            .find(|user| user.id == user_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "user",
                identifier: "id",
            })
    }

    async fn user_by_email(&self, email: &str) -> Result<UserData> {
        self.state
            .lock()
            .users
            .iter()
            .find(|user| user.email == email)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "user",
                identifier: "email",
            })
    }

    async fn user_by_alias(&self, alias_email: &str) -> Result<UserData> {
        let user_id = self
            .state
            .lock()
            .aliases
            .iter()
            .find(|(alias, _, _)| alias == alias_email)
            .map(|(_, user_id, _)| *user_id)
            .ok_or(DatabaseError::NotFound {
                resource: "email alias",
                identifier: "alias_email",
            })?;

        self.user_by_id(user_id).await
    }

    async fn group_by_id(&self, group_id: PrimaryKey) -> Result<GroupData> {
        self.state
            .lock()
            .groups
            .iter()
            .find(|group| group.id == group_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "group",
                identifier: "id",
            })
    }

    async fn list_groups(&self) -> Result<Vec<GroupData>> {
        Ok(self.state.lock().groups.clone())
    }

    async fn group_members(&self, group_id: PrimaryKey) -> Result<Vec<GroupMemberData>> {
        Ok(self
            .state
            .lock()
            .members
            .iter()
            .filter(|member| member.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn memberships_by_user(&self, user_id: PrimaryKey) -> Result<Vec<GroupMemberData>> {
        Ok(self
            .state
            .lock()
            .members
            .iter()
            .filter(|member| member.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn groups_administered_by(&self, user_id: PrimaryKey) -> Result<Vec<GroupData>> {
        Ok(self
            .state
            .lock()
            .groups
            .iter()
            .filter(|group| group.admin_user_id == user_id)
            .cloned()
            .collect())
    }

    async fn music_account(
        &self,
        user_id: PrimaryKey,
        platform: Platform,
    ) -> Result<MusicAccountData> {
        self.state
            .lock()
            .accounts
            .iter()
            .find(|account| account.user_id == user_id && account.platform == platform)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "music account",
                identifier: "user:platform",
            })
    }

    async fn music_accounts_by_user(
        &self,
        user_id: PrimaryKey,
    ) -> Result<Vec<MusicAccountData>> {
        Ok(self
            .state
            .lock()
            .accounts
            .iter()
            .filter(|account| account.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_account_tokens(&self, update: UpdatedTokens) -> Result<MusicAccountData> {
        let mut state = self.state.lock();

        let account = state
            .accounts
            .iter_mut()
            .find(|account| {
                account.user_id == update.user_id && account.platform == update.platform
            })
            .ok_or(DatabaseError::NotFound {
                resource: "music account",
                identifier: "user:platform",
            })?;

        account.access_token = update.access_token;
        account.refresh_token = update.refresh_token;
        account.expires_at = update.expires_at;

        Ok(account.clone())
    }

    async fn accounts_expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MusicAccountData>> {
        Ok(self
            .state
            .lock()
            .accounts
            .iter()
            .filter(|account| account.expires_at.is_some_and(|at| at < cutoff))
            .cloned()
            .collect())
    }

    async fn preferences_by_user(&self, user_id: PrimaryKey) -> Result<Option<PreferencesData>> {
        Ok(self
            .state
            .lock()
            .preferences
            .iter()
            .find(|preferences| preferences.user_id == user_id)
            .cloned())
    }

    async fn create_round(&self, new_round: NewDailyRound) -> Result<RoundData> {
        let mut state = self.state.lock();

        let exists = state
            .rounds
            .iter()
            .any(|round| round.group_id == new_round.group_id && round.date == new_round.date);

        if exists {
            return Err(DatabaseError::Conflict {
                resource: "daily round",
                field: "group:date",
                value: format!("{}:{}", new_round.group_id, new_round.date),
            });
        }

        let id = state.next_id();
        let round = RoundData {
            id,
            group_id: new_round.group_id,
            date: new_round.date,
            deadline_at: new_round.deadline_at,
            status: RoundStatus::Active,
        };

        state.rounds.push(round.clone());
        Ok(round)
    }

    async fn round_by_id(&self, round_id: PrimaryKey) -> Result<RoundData> {
        self.state
            .lock()
            .rounds
            .iter()
            .find(|round| round.id == round_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "daily round",
                identifier: "id",
            })
    }

    async fn active_rounds_for_date(&self, date: NaiveDate) -> Result<Vec<RoundData>> {
        Ok(self
            .state
            .lock()
            .rounds
            .iter()
            .filter(|round| round.date == date && round.status == RoundStatus::Active)
            .cloned()
            .collect())
    }

    async fn set_round_status(&self, round_id: PrimaryKey, status: RoundStatus) -> Result<()> {
        let mut state = self.state.lock();

        let round = state
            .rounds
            .iter_mut()
            .find(|round| round.id == round_id)
            .ok_or(DatabaseError::NotFound {
                resource: "daily round",
                identifier: "id",
            })?;

        round.status = status;
        Ok(())
    }

    async fn delete_rounds_before(&self, cutoff: NaiveDate) -> Result<u64> {
        let mut state = self.state.lock();

        let before = state.rounds.len();
        let deleted_ids: Vec<PrimaryKey> = state
            .rounds
            .iter()
            .filter(|round| round.date < cutoff)
            .map(|round| round.id)
            .collect();

        state.rounds.retain(|round| round.date >= cutoff);
        state
            .submissions
            .retain(|submission| !deleted_ids.contains(&submission.round_id));

        Ok((before - state.rounds.len()) as u64)
    }

    async fn submissions_for_round(&self, round_id: PrimaryKey) -> Result<Vec<SubmissionData>> {
        let mut submissions: Vec<_> = self
            .state
            .lock()
            .submissions
            .iter()
            .filter(|submission| submission.round_id == round_id)
            .cloned()
            .collect();

        submissions.sort_by_key(|submission| submission.submitted_at);
        Ok(submissions)
    }

    async fn submissions_by_user(&self, user_id: PrimaryKey) -> Result<Vec<SubmissionData>> {
        Ok(self
            .state
            .lock()
            .submissions
            .iter()
            .filter(|submission| submission.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn song_by_id(&self, song_id: PrimaryKey) -> Result<SongData> {
        self.state
            .lock()
            .songs
            .iter()
            .find(|song| song.id == song_id)
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "song",
                identifier: "id",
            })
    }

    async fn set_song_platform_id(
        &self,
        song_id: PrimaryKey,
        platform: Platform,
        platform_track_id: &str,
    ) -> Result<()> {
        let mut state = self.state.lock();

        let song = state
            .songs
            .iter_mut()
            .find(|song| song.id == song_id)
            .ok_or(DatabaseError::NotFound {
                resource: "song",
                identifier: "id",
            })?;

        song.platform_ids
            .insert(platform.as_str().to_string(), platform_track_id.to_string());

        Ok(())
    }

    async fn active_playlist(
        &self,
        group_id: PrimaryKey,
        platform: Platform,
    ) -> Result<GroupPlaylistData> {
        self.state
            .lock()
            .playlists
            .iter()
            .find(|playlist| {
                playlist.group_id == group_id
                    && playlist.platform == platform
                    && playlist.state == PlaylistState::Active
            })
            .cloned()
            .ok_or(DatabaseError::NotFound {
                resource: "group playlist",
                identifier: "group:platform",
            })
    }

    async fn active_playlists_for_group(
        &self,
        group_id: PrimaryKey,
    ) -> Result<Vec<GroupPlaylistData>> {
        Ok(self
            .state
            .lock()
            .playlists
            .iter()
            .filter(|playlist| {
                playlist.group_id == group_id && playlist.state == PlaylistState::Active
            })
            .cloned()
            .collect())
    }

    async fn create_group_playlist(&self, new: NewGroupPlaylist) -> Result<GroupPlaylistData> {
        let mut state = self.state.lock();

        let exists = state.playlists.iter().any(|playlist| {
            playlist.group_id == new.group_id
                && playlist.platform == new.platform
                && playlist.state == PlaylistState::Active
        });

        if exists {
            return Err(DatabaseError::Conflict {
                resource: "group playlist",
                field: "group:platform",
                value: format!("{}:{}", new.group_id, new.platform),
            });
        }

        let id = state.next_id();
        let playlist = GroupPlaylistData {
            id,
            group_id: new.group_id,
            platform: new.platform,
            platform_playlist_id: new.platform_playlist_id,
            playlist_url: new.playlist_url,
            playlist_name: new.playlist_name,
            user_id: new.user_id,
            last_updated: None,
            state: PlaylistState::Active,
        };

        state.playlists.push(playlist.clone());
        Ok(playlist)
    }

    async fn supersede_playlist(&self, playlist_id: PrimaryKey) -> Result<()> {
        let mut state = self.state.lock();

        let playlist = state
            .playlists
            .iter_mut()
            .find(|playlist| playlist.id == playlist_id)
            .ok_or(DatabaseError::NotFound {
                resource: "group playlist",
                identifier: "id",
            })?;

        playlist.state = PlaylistState::Superseded;
        Ok(())
    }

    async fn stamp_playlist_updated(
        &self,
        playlist_id: PrimaryKey,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock();

        if let Some(playlist) = state
            .playlists
            .iter_mut()
            .find(|playlist| playlist.id == playlist_id)
        {
            playlist.last_updated = Some(at);
        }

        Ok(())
    }

    async fn apply_merge(&self, plan: &MergePlan) -> Result<()> {
        let mut state = self.state.lock();

        for account in state.accounts.iter_mut() {
            if plan.accounts_to_reassign.contains(&account.id) {
                account.user_id = plan.primary_id;
            }
        }
        state
            .accounts
            .retain(|account| !plan.accounts_to_drop.contains(&account.id));

        let linked = state.accounts.iter().position(|account| {
            account.user_id == plan.tokens.user_id && account.platform == plan.tokens.platform
        });

        match linked {
            Some(index) => {
                let account = &mut state.accounts[index];
                account.access_token = plan.tokens.access_token.clone();
                account.refresh_token = plan.tokens.refresh_token.clone();
                account.expires_at = plan.tokens.expires_at;
            }
            None => {
                let id = state.next_id();
                state.accounts.push(MusicAccountData {
                    id,
                    user_id: plan.tokens.user_id,
                    platform: plan.tokens.platform,
                    access_token: plan.tokens.access_token.clone(),
                    refresh_token: plan.tokens.refresh_token.clone(),
                    expires_at: plan.tokens.expires_at,
                });
            }
        }

        for member in state.members.iter_mut() {
            if plan.memberships_to_reassign.contains(&member.id) {
                member.user_id = plan.primary_id;
            }
        }
        state
            .members
            .retain(|member| !plan.memberships_to_drop.contains(&member.id));

        for group in state.groups.iter_mut() {
            if plan.groups_to_transfer.contains(&group.id) {
                group.admin_user_id = plan.primary_id;
            }
        }

        for submission in state.submissions.iter_mut() {
            if plan.submissions_to_reassign.contains(&submission.id) {
                submission.user_id = plan.primary_id;
            }
        }
        state
            .submissions
            .retain(|submission| !plan.submissions_to_drop.contains(&submission.id));

        if plan.move_preferences {
            for preferences in state.preferences.iter_mut() {
                if preferences.user_id == plan.secondary_id {
                    preferences.user_id = plan.primary_id;
                }
            }
        } else {
            state
                .preferences
                .retain(|preferences| preferences.user_id != plan.secondary_id);
        }

        state.aliases.push((
            plan.alias.alias_email.clone(),
            plan.alias.user_id,
            plan.alias.platform,
        ));

        state.users.retain(|user| user.id != plan.secondary_id);

        Ok(())
    }
}
