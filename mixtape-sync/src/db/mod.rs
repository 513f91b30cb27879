use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use mixtape_core::Platform;

mod data;
pub use data::*;

mod pg;
pub use pg::*;

#[cfg(test)]
pub mod memory;

pub type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An unknown or internal error happened with the database
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A resource already exists
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        /// The resource in question
        resource: &'static str,
        /// The field that is conflicting
        field: &'static str,
        /// The conflicting value
        value: String,
    },
    /// A resource in the database doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
}

impl DatabaseError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, DatabaseError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::NotFound { .. })
    }
}

/// Helper trait to reduce boilerplate
pub trait IntoDatabaseError {
    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError;
    fn conflict_or(self, resource: &'static str, field: &'static str, value: &str)
        -> DatabaseError;
    fn any(self) -> DatabaseError;
}

/// Represents a type that can fetch and store mixtape data in a database
#[async_trait]
pub trait Database: Send + Sync {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData>;
    async fn user_by_email(&self, email: &str) -> Result<UserData>;
    /// Finds a user through one of their folded-in alias identities
    async fn user_by_alias(&self, alias_email: &str) -> Result<UserData>;

    async fn group_by_id(&self, group_id: PrimaryKey) -> Result<GroupData>;
    async fn list_groups(&self) -> Result<Vec<GroupData>>;
    async fn group_members(&self, group_id: PrimaryKey) -> Result<Vec<GroupMemberData>>;
    async fn memberships_by_user(&self, user_id: PrimaryKey) -> Result<Vec<GroupMemberData>>;
    async fn groups_administered_by(&self, user_id: PrimaryKey) -> Result<Vec<GroupData>>;

    async fn music_account(
        &self,
        user_id: PrimaryKey,
        platform: Platform,
    ) -> Result<MusicAccountData>;
    async fn music_accounts_by_user(&self, user_id: PrimaryKey)
        -> Result<Vec<MusicAccountData>>;
    async fn update_account_tokens(&self, update: UpdatedTokens) -> Result<MusicAccountData>;
    /// Accounts whose recorded expiry falls before the cutoff
    async fn accounts_expiring_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MusicAccountData>>;
    async fn preferences_by_user(&self, user_id: PrimaryKey) -> Result<Option<PreferencesData>>;

    /// Creates a round, or fails with a conflict if one already exists for
    /// the group and date
    async fn create_round(&self, new_round: NewDailyRound) -> Result<RoundData>;
    async fn round_by_id(&self, round_id: PrimaryKey) -> Result<RoundData>;
    async fn active_rounds_for_date(&self, date: NaiveDate) -> Result<Vec<RoundData>>;
    async fn set_round_status(&self, round_id: PrimaryKey, status: RoundStatus) -> Result<()>;
    /// Hard-deletes rounds dated before the cutoff, returning how many went
    async fn delete_rounds_before(&self, cutoff: NaiveDate) -> Result<u64>;
    async fn submissions_for_round(&self, round_id: PrimaryKey) -> Result<Vec<SubmissionData>>;
    async fn submissions_by_user(&self, user_id: PrimaryKey) -> Result<Vec<SubmissionData>>;

    async fn song_by_id(&self, song_id: PrimaryKey) -> Result<SongData>;
    /// Records a discovered cross-platform track id on the song
    async fn set_song_platform_id(
        &self,
        song_id: PrimaryKey,
        platform: Platform,
        platform_track_id: &str,
    ) -> Result<()>;

    /// The active playlist for the pair, or NotFound
    async fn active_playlist(
        &self,
        group_id: PrimaryKey,
        platform: Platform,
    ) -> Result<GroupPlaylistData>;
    async fn active_playlists_for_group(
        &self,
        group_id: PrimaryKey,
    ) -> Result<Vec<GroupPlaylistData>>;
    /// Creates an active playlist row, or fails with a conflict if the pair
    /// already has one
    async fn create_group_playlist(&self, new: NewGroupPlaylist) -> Result<GroupPlaylistData>;
    /// Flips the row out of the active state. The platform identifier is
    /// never mutated in place; replacement happens by inserting a new row.
    async fn supersede_playlist(&self, playlist_id: PrimaryKey) -> Result<()>;
    async fn stamp_playlist_updated(
        &self,
        playlist_id: PrimaryKey,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Applies an identity merge in a single all-or-nothing transaction
    async fn apply_merge(&self, plan: &MergePlan) -> Result<()>;
}
