use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{postgres::PgPoolOptions, query, query_as, types::Json, Error as SqlxError, PgPool};
use std::collections::HashMap;

use mixtape_core::Platform;

use crate::{
    Database, DatabaseError, EmailAliasData, GroupData, GroupMemberData, GroupPlaylistData,
    IntoDatabaseError, MergePlan, MusicAccountData, NewDailyRound, NewGroupPlaylist,
    PlaylistState, PreferencesData, PrimaryKey, Result, RoundData, RoundStatus, SongData,
    SubmissionData, UpdatedTokens, UserData,
};

/// A postgres database implementation for mixtape
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub async fn new(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| DatabaseError::Internal(Box::new(e)))?;

        Ok(Self { pool })
    }

    /// Applies the bundled schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::Internal(Box::new(e)))
    }
}

fn parse_platform(value: &str) -> Result<Platform> {
    value
        .parse()
        .map_err(|err| DatabaseError::Internal(Box::new(err)))
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: PrimaryKey,
    email: String,
    display_name: String,
}

impl From<UserRow> for UserData {
    fn from(row: UserRow) -> Self {
        UserData {
            id: row.id,
            email: row.email,
            display_name: row.display_name,
        }
    }
}

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: PrimaryKey,
    name: String,
    admin_user_id: PrimaryKey,
    invite_code: String,
    max_members: i32,
    is_public: bool,
}

impl From<GroupRow> for GroupData {
    fn from(row: GroupRow) -> Self {
        GroupData {
            id: row.id,
            name: row.name,
            admin_user_id: row.admin_user_id,
            invite_code: row.invite_code,
            max_members: row.max_members,
            is_public: row.is_public,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    id: PrimaryKey,
    group_id: PrimaryKey,
    user_id: PrimaryKey,
}

impl From<MemberRow> for GroupMemberData {
    fn from(row: MemberRow) -> Self {
        GroupMemberData {
            id: row.id,
            group_id: row.group_id,
            user_id: row.user_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: PrimaryKey,
    user_id: PrimaryKey,
    platform: String,
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl AccountRow {
    fn into_data(self) -> Result<MusicAccountData> {
        Ok(MusicAccountData {
            id: self.id,
            user_id: self.user_id,
            platform: parse_platform(&self.platform)?,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PreferencesRow {
    id: PrimaryKey,
    user_id: PrimaryKey,
    preferred_platform: Option<String>,
}

impl PreferencesRow {
    fn into_data(self) -> Result<PreferencesData> {
        let preferred_platform = self
            .preferred_platform
            .as_deref()
            .map(parse_platform)
            .transpose()?;

        Ok(PreferencesData {
            id: self.id,
            user_id: self.user_id,
            preferred_platform,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RoundRow {
    id: PrimaryKey,
    group_id: PrimaryKey,
    round_date: NaiveDate,
    deadline_at: DateTime<Utc>,
    status: String,
}

impl RoundRow {
    fn into_data(self) -> Result<RoundData> {
        let status = self
            .status
            .parse::<RoundStatus>()
            .map_err(|err| DatabaseError::Internal(err.into()))?;

        Ok(RoundData {
            id: self.id,
            group_id: self.group_id,
            date: self.round_date,
            deadline_at: self.deadline_at,
            status,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SubmissionRow {
    id: PrimaryKey,
    round_id: PrimaryKey,
    user_id: PrimaryKey,
    song_id: PrimaryKey,
    comment: Option<String>,
    submitted_at: DateTime<Utc>,
}

impl From<SubmissionRow> for SubmissionData {
    fn from(row: SubmissionRow) -> Self {
        SubmissionData {
            id: row.id,
            round_id: row.round_id,
            user_id: row.user_id,
            song_id: row.song_id,
            comment: row.comment,
            submitted_at: row.submitted_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SongRow {
    id: PrimaryKey,
    title: String,
    artist: String,
    album: Option<String>,
    duration_secs: Option<i32>,
    platform_ids: Json<HashMap<String, String>>,
}

impl From<SongRow> for SongData {
    fn from(row: SongRow) -> Self {
        SongData {
            id: row.id,
            title: row.title,
            artist: row.artist,
            album: row.album,
            duration_secs: row.duration_secs,
            platform_ids: row.platform_ids.0,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PlaylistRow {
    id: PrimaryKey,
    group_id: PrimaryKey,
    platform: String,
    platform_playlist_id: String,
    playlist_url: String,
    playlist_name: String,
    user_id: PrimaryKey,
    last_updated: Option<DateTime<Utc>>,
    is_active: bool,
}

impl PlaylistRow {
    fn into_data(self) -> Result<GroupPlaylistData> {
        let state = if self.is_active {
            PlaylistState::Active
        } else {
            PlaylistState::Superseded
        };

        Ok(GroupPlaylistData {
            id: self.id,
            group_id: self.group_id,
            platform: parse_platform(&self.platform)?,
            platform_playlist_id: self.platform_playlist_id,
            playlist_url: self.playlist_url,
            playlist_name: self.playlist_name,
            user_id: self.user_id,
            last_updated: self.last_updated,
            state,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AliasRow {
    id: PrimaryKey,
    alias_email: String,
    user_id: PrimaryKey,
    platform: String,
}

impl AliasRow {
    fn into_data(self) -> Result<EmailAliasData> {
        Ok(EmailAliasData {
            id: self.id,
            alias_email: self.alias_email,
            user_id: self.user_id,
            platform: parse_platform(&self.platform)?,
        })
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData> {
        query_as::<_, UserRow>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("user", "id"))
            .map(Into::into)
    }

    async fn user_by_email(&self, email: &str) -> Result<UserData> {
        query_as::<_, UserRow>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("user", "email"))
            .map(Into::into)
    }

    async fn user_by_alias(&self, alias_email: &str) -> Result<UserData> {
        let alias = query_as::<_, AliasRow>(
            "SELECT * FROM user_email_aliases WHERE alias_email = $1",
        )
        .bind(alias_email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("email alias", "alias_email"))?
        .into_data()?;

        self.user_by_id(alias.user_id).await
    }

    async fn group_by_id(&self, group_id: PrimaryKey) -> Result<GroupData> {
        query_as::<_, GroupRow>("SELECT * FROM groups WHERE id = $1")
            .bind(group_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("group", "id"))
            .map(Into::into)
    }

    async fn list_groups(&self) -> Result<Vec<GroupData>> {
        let rows = query_as::<_, GroupRow>("SELECT * FROM groups ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| e.any())?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn group_members(&self, group_id: PrimaryKey) -> Result<Vec<GroupMemberData>> {
        let rows = query_as::<_, MemberRow>(
            "SELECT * FROM group_members WHERE group_id = $1 ORDER BY id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn memberships_by_user(&self, user_id: PrimaryKey) -> Result<Vec<GroupMemberData>> {
        let rows = query_as::<_, MemberRow>(
            "SELECT * FROM group_members WHERE user_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn groups_administered_by(&self, user_id: PrimaryKey) -> Result<Vec<GroupData>> {
        let rows = query_as::<_, GroupRow>(
            "SELECT * FROM groups WHERE admin_user_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn music_account(
        &self,
        user_id: PrimaryKey,
        platform: Platform,
    ) -> Result<MusicAccountData> {
        query_as::<_, AccountRow>(
            "SELECT * FROM user_music_accounts WHERE user_id = $1 AND platform = $2",
        )
        .bind(user_id)
        .bind(platform.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("music account", "user:platform"))?
        .into_data()
    }

    async fn music_accounts_by_user(
        &self,
        user_id: PrimaryKey,
    ) -> Result<Vec<MusicAccountData>> {
        let rows = query_as::<_, AccountRow>(
            "SELECT * FROM user_music_accounts WHERE user_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        rows.into_iter().map(AccountRow::into_data).collect()
    }

    async fn update_account_tokens(&self, update: UpdatedTokens) -> Result<MusicAccountData> {
        query_as::<_, AccountRow>(
            "UPDATE user_music_accounts
             SET access_token = $3, refresh_token = $4, expires_at = $5
             WHERE user_id = $1 AND platform = $2
             RETURNING *",
        )
        .bind(update.user_id)
        .bind(update.platform.as_str())
        .bind(&update.access_token)
        .bind(&update.refresh_token)
        .bind(update.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("music account", "user:platform"))?
        .into_data()
    }

    async fn accounts_expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MusicAccountData>> {
        let rows = query_as::<_, AccountRow>(
            "SELECT * FROM user_music_accounts
             WHERE expires_at IS NOT NULL AND expires_at < $1
             ORDER BY expires_at",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        rows.into_iter().map(AccountRow::into_data).collect()
    }

    async fn preferences_by_user(&self, user_id: PrimaryKey) -> Result<Option<PreferencesData>> {
        let row = query_as::<_, PreferencesRow>(
            "SELECT * FROM user_music_preferences WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| e.any())?;

        row.map(PreferencesRow::into_data).transpose()
    }

    async fn create_round(&self, new_round: NewDailyRound) -> Result<RoundData> {
        query_as::<_, RoundRow>(
            "INSERT INTO daily_rounds (group_id, round_date, deadline_at, status)
             VALUES ($1, $2, $3, 'active')
             RETURNING *",
        )
        .bind(new_round.group_id)
        .bind(new_round.date)
        .bind(new_round.deadline_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            e.conflict_or(
                "daily round",
                "group:date",
                &format!("{}:{}", new_round.group_id, new_round.date),
            )
        })?
        .into_data()
    }

    async fn round_by_id(&self, round_id: PrimaryKey) -> Result<RoundData> {
        query_as::<_, RoundRow>("SELECT * FROM daily_rounds WHERE id = $1")
            .bind(round_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("daily round", "id"))?
            .into_data()
    }

    async fn active_rounds_for_date(&self, date: NaiveDate) -> Result<Vec<RoundData>> {
        let rows = query_as::<_, RoundRow>(
            "SELECT * FROM daily_rounds WHERE round_date = $1 AND status = 'active' ORDER BY id",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        rows.into_iter().map(RoundRow::into_data).collect()
    }

    async fn set_round_status(&self, round_id: PrimaryKey, status: RoundStatus) -> Result<()> {
        let result = query("UPDATE daily_rounds SET status = $2 WHERE id = $1")
            .bind(round_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "daily round",
                identifier: "id",
            });
        }

        Ok(())
    }

    async fn delete_rounds_before(&self, cutoff: NaiveDate) -> Result<u64> {
        query("DELETE FROM daily_rounds WHERE round_date < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|result| result.rows_affected())
    }

    async fn submissions_for_round(&self, round_id: PrimaryKey) -> Result<Vec<SubmissionData>> {
        let rows = query_as::<_, SubmissionRow>(
            "SELECT * FROM submissions WHERE round_id = $1 ORDER BY submitted_at",
        )
        .bind(round_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn submissions_by_user(&self, user_id: PrimaryKey) -> Result<Vec<SubmissionData>> {
        let rows = query_as::<_, SubmissionRow>(
            "SELECT * FROM submissions WHERE user_id = $1 ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn song_by_id(&self, song_id: PrimaryKey) -> Result<SongData> {
        query_as::<_, SongRow>("SELECT * FROM songs WHERE id = $1")
            .bind(song_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("song", "id"))
            .map(Into::into)
    }

    async fn set_song_platform_id(
        &self,
        song_id: PrimaryKey,
        platform: Platform,
        platform_track_id: &str,
    ) -> Result<()> {
        let result = query(
            "UPDATE songs
             SET platform_ids = jsonb_set(platform_ids, ARRAY[$2], to_jsonb($3::text))
             WHERE id = $1",
        )
        .bind(song_id)
        .bind(platform.as_str())
        .bind(platform_track_id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "song",
                identifier: "id",
            });
        }

        Ok(())
    }

    async fn active_playlist(
        &self,
        group_id: PrimaryKey,
        platform: Platform,
    ) -> Result<GroupPlaylistData> {
        query_as::<_, PlaylistRow>(
            "SELECT * FROM group_playlists
             WHERE group_id = $1 AND platform = $2 AND is_active",
        )
        .bind(group_id)
        .bind(platform.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.not_found_or("group playlist", "group:platform"))?
        .into_data()
    }

    async fn active_playlists_for_group(
        &self,
        group_id: PrimaryKey,
    ) -> Result<Vec<GroupPlaylistData>> {
        let rows = query_as::<_, PlaylistRow>(
            "SELECT * FROM group_playlists WHERE group_id = $1 AND is_active ORDER BY id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        rows.into_iter().map(PlaylistRow::into_data).collect()
    }

    async fn create_group_playlist(&self, new: NewGroupPlaylist) -> Result<GroupPlaylistData> {
        query_as::<_, PlaylistRow>(
            "INSERT INTO group_playlists
                 (group_id, platform, platform_playlist_id, playlist_url, playlist_name, user_id, is_active)
             VALUES ($1, $2, $3, $4, $5, $6, TRUE)
             RETURNING *",
        )
        .bind(new.group_id)
        .bind(new.platform.as_str())
        .bind(&new.platform_playlist_id)
        .bind(&new.playlist_url)
        .bind(&new.playlist_name)
        .bind(new.user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            e.conflict_or(
                "group playlist",
                "group:platform",
                &format!("{}:{}", new.group_id, new.platform),
            )
        })?
        .into_data()
    }

    async fn supersede_playlist(&self, playlist_id: PrimaryKey) -> Result<()> {
        let result = query("UPDATE group_playlists SET is_active = FALSE WHERE id = $1")
            .bind(playlist_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                resource: "group playlist",
                identifier: "id",
            });
        }

        Ok(())
    }

    async fn stamp_playlist_updated(
        &self,
        playlist_id: PrimaryKey,
        at: DateTime<Utc>,
    ) -> Result<()> {
        query("UPDATE group_playlists SET last_updated = $2 WHERE id = $1")
            .bind(playlist_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn apply_merge(&self, plan: &MergePlan) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        for account_id in &plan.accounts_to_reassign {
            query("UPDATE user_music_accounts SET user_id = $1 WHERE id = $2")
                .bind(plan.primary_id)
                .bind(account_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| e.any())?;
        }

        for account_id in &plan.accounts_to_drop {
            query("DELETE FROM user_music_accounts WHERE id = $1")
                .bind(account_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| e.any())?;
        }

        query(
            "INSERT INTO user_music_accounts (user_id, platform, access_token, refresh_token, expires_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (user_id, platform) DO UPDATE
             SET access_token = excluded.access_token,
                 refresh_token = excluded.refresh_token,
                 expires_at = excluded.expires_at",
        )
        .bind(plan.tokens.user_id)
        .bind(plan.tokens.platform.as_str())
        .bind(&plan.tokens.access_token)
        .bind(&plan.tokens.refresh_token)
        .bind(plan.tokens.expires_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| e.any())?;

        for member_id in &plan.memberships_to_reassign {
            query("UPDATE group_members SET user_id = $1 WHERE id = $2")
                .bind(plan.primary_id)
                .bind(member_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| e.any())?;
        }

        for member_id in &plan.memberships_to_drop {
            query("DELETE FROM group_members WHERE id = $1")
                .bind(member_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| e.any())?;
        }

        for group_id in &plan.groups_to_transfer {
            query("UPDATE groups SET admin_user_id = $1 WHERE id = $2")
                .bind(plan.primary_id)
                .bind(group_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| e.any())?;
        }

        for submission_id in &plan.submissions_to_reassign {
            query("UPDATE submissions SET user_id = $1 WHERE id = $2")
                .bind(plan.primary_id)
                .bind(submission_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| e.any())?;
        }

        for submission_id in &plan.submissions_to_drop {
            query("DELETE FROM submissions WHERE id = $1")
                .bind(submission_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| e.any())?;
        }

        if plan.move_preferences {
            query("UPDATE user_music_preferences SET user_id = $1 WHERE user_id = $2")
                .bind(plan.primary_id)
                .bind(plan.secondary_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| e.any())?;
        } else {
            query("DELETE FROM user_music_preferences WHERE user_id = $1")
                .bind(plan.secondary_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| e.any())?;
        }

        query("INSERT INTO user_email_aliases (alias_email, user_id, platform) VALUES ($1, $2, $3)")
            .bind(&plan.alias.alias_email)
            .bind(plan.alias.user_id)
            .bind(plan.alias.platform.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                e.conflict_or("email alias", "alias_email", &plan.alias.alias_email)
            })?;

        query("DELETE FROM users WHERE id = $1")
            .bind(plan.secondary_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        tx.commit().await.map_err(|e| e.any())
    }
}

impl IntoDatabaseError for SqlxError {
    fn any(self) -> DatabaseError {
        DatabaseError::Internal(Box::new(self))
    }

    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError {
        match self {
            SqlxError::RowNotFound => DatabaseError::NotFound {
                resource,
                identifier,
            },
            e => Self::any(e),
        }
    }

    fn conflict_or(
        self,
        resource: &'static str,
        field: &'static str,
        value: &str,
    ) -> DatabaseError {
        match &self {
            SqlxError::Database(db_err) if db_err.is_unique_violation() => {
                DatabaseError::Conflict {
                    resource,
                    field,
                    value: value.to_string(),
                }
            }
            _ => self.any(),
        }
    }
}
