use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;

use mixtape_core::Platform;

/// The type used for primary keys in the database.
pub type PrimaryKey = i64;

/// A mixtape account
#[derive(Debug, Clone)]
pub struct UserData {
    pub id: PrimaryKey,
    /// A real email, a synthesized platform-identifier email, or a phone number
    pub email: String,
    pub display_name: String,
}

/// A secondary identity folded into a user by an identity merge
#[derive(Debug, Clone)]
pub struct EmailAliasData {
    pub id: PrimaryKey,
    pub alias_email: String,
    pub user_id: PrimaryKey,
    pub platform: Platform,
}

/// A linked streaming platform account and its credentials.
/// Note: `user_id` and `platform` are unique together.
#[derive(Debug, Clone)]
pub struct MusicAccountData {
    pub id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub platform: Platform,
    pub access_token: String,
    /// Apple Music issues no refresh token
    pub refresh_token: Option<String>,
    /// None for credentials that do not expire on a recorded schedule
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PreferencesData {
    pub id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub preferred_platform: Option<Platform>,
}

/// A group of users sharing one song per day
#[derive(Debug, Clone)]
pub struct GroupData {
    pub id: PrimaryKey,
    pub name: String,
    pub admin_user_id: PrimaryKey,
    pub invite_code: String,
    pub max_members: i32,
    pub is_public: bool,
}

/// A member of a group.
/// Note: `group_id` and `user_id` are unique together.
#[derive(Debug, Clone)]
pub struct GroupMemberData {
    pub id: PrimaryKey,
    pub group_id: PrimaryKey,
    pub user_id: PrimaryKey,
}

/// One day's submission window for a group.
/// Note: `group_id` and `date` are unique together.
#[derive(Debug, Clone)]
pub struct RoundData {
    pub id: PrimaryKey,
    pub group_id: PrimaryKey,
    pub date: NaiveDate,
    pub deadline_at: DateTime<Utc>,
    pub status: RoundStatus,
}

/// The lifecycle of a daily round. Transitions out of `Active` are
/// irreversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Active,
    Completed,
    Partial,
    Failed,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Active => "active",
            RoundStatus::Completed => "completed",
            RoundStatus::Partial => "partial",
            RoundStatus::Failed => "failed",
        }
    }
}

impl FromStr for RoundStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(RoundStatus::Active),
            "completed" => Ok(RoundStatus::Completed),
            "partial" => Ok(RoundStatus::Partial),
            "failed" => Ok(RoundStatus::Failed),
            other => Err(format!("unknown round status: {other}")),
        }
    }
}

/// A user's song for a round.
/// Note: `round_id` and `user_id` are unique together; resubmitting
/// overwrites the song and comment.
#[derive(Debug, Clone)]
pub struct SubmissionData {
    pub id: PrimaryKey,
    pub round_id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub song_id: PrimaryKey,
    pub comment: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// A song, with its known identity on each platform
#[derive(Debug, Clone)]
pub struct SongData {
    pub id: PrimaryKey,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub duration_secs: Option<i32>,
    /// Platform name to platform-specific track identifier. Grown
    /// opportunistically whenever a cross-platform match is discovered.
    pub platform_ids: HashMap<String, String>,
}

impl SongData {
    /// The song's known track id on the given platform, if any.
    pub fn platform_id(&self, platform: Platform) -> Option<&str> {
        self.platform_ids.get(platform.as_str()).map(String::as_str)
    }
}

/// Whether a group playlist row is the live one for its platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistState {
    Active,
    /// Invalidated and replaced by a newer row; kept for audit history.
    Superseded,
}

/// A platform-hosted playlist mirroring a group's daily submissions.
/// Note: at most one `Active` row exists per `group_id` and `platform`.
#[derive(Debug, Clone)]
pub struct GroupPlaylistData {
    pub id: PrimaryKey,
    pub group_id: PrimaryKey,
    pub platform: Platform,
    pub platform_playlist_id: String,
    pub playlist_url: String,
    pub playlist_name: String,
    /// The user whose credential owns the playlist upstream
    pub user_id: PrimaryKey,
    pub last_updated: Option<DateTime<Utc>>,
    pub state: PlaylistState,
}

#[derive(Debug)]
pub struct NewDailyRound {
    pub group_id: PrimaryKey,
    pub date: NaiveDate,
    pub deadline_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewGroupPlaylist {
    pub group_id: PrimaryKey,
    pub platform: Platform,
    pub platform_playlist_id: String,
    pub playlist_url: String,
    pub playlist_name: String,
    /// The creator whose credential owns the playlist
    pub user_id: PrimaryKey,
}

#[derive(Debug)]
pub struct NewEmailAlias {
    pub alias_email: String,
    pub user_id: PrimaryKey,
    pub platform: Platform,
}

/// Replacement credentials for a user's platform account.
#[derive(Debug, Clone)]
pub struct UpdatedTokens {
    pub user_id: PrimaryKey,
    pub platform: Platform,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Everything an identity merge will change, computed up front so the
/// database can apply it in a single transaction.
#[derive(Debug)]
pub struct MergePlan {
    pub primary_id: PrimaryKey,
    pub secondary_id: PrimaryKey,
    /// The platform whose linking triggered the merge
    pub platform: Platform,
    /// The fresh credential overwriting the primary's account for that platform
    pub tokens: UpdatedTokens,
    /// Secondary accounts moving to the primary
    pub accounts_to_reassign: Vec<PrimaryKey>,
    /// Secondary accounts dropped because the primary already has that platform
    pub accounts_to_drop: Vec<PrimaryKey>,
    pub memberships_to_reassign: Vec<PrimaryKey>,
    /// Duplicate memberships dropped to keep (group, user) unique
    pub memberships_to_drop: Vec<PrimaryKey>,
    /// Groups whose admin moves from the secondary to the primary
    pub groups_to_transfer: Vec<PrimaryKey>,
    pub submissions_to_reassign: Vec<PrimaryKey>,
    /// Duplicate submissions dropped to keep (round, user) unique
    pub submissions_to_drop: Vec<PrimaryKey>,
    /// Move the secondary's preferences only when the primary has none
    pub move_preferences: bool,
    /// The secondary's former email, kept for future lookup continuity
    pub alias: NewEmailAlias,
}
