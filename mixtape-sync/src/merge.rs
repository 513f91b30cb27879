use chrono::{DateTime, Utc};
use log::info;
use std::collections::HashSet;
use thiserror::Error;

use mixtape_core::Platform;

use crate::{
    Database, DatabaseError, GroupMemberData, MergePlan, MusicAccountData, NewEmailAlias,
    PrimaryKey, SubmissionData, SyncContext, SyncEvent, UpdatedTokens, UserData,
};

/// Reconciles two user identities when a newly linked platform account
/// collides with a different existing user.
///
/// Linking never merges silently: a detected collision is handed back to the
/// caller, which must obtain an explicit choice of primary identity before
/// [`IdentityMergeCoordinator::perform_chosen_merge`] runs.
pub struct IdentityMergeCoordinator<Db> {
    database: std::sync::Arc<Db>,
    events: crate::EventSender,
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("cannot merge a user into itself")]
    SameUser,

    #[error("merge target {0} does not exist")]
    MissingUser(PrimaryKey),

    #[error(transparent)]
    Db(#[from] DatabaseError),
}

/// The result of checking a platform identity against existing users.
#[derive(Debug)]
pub enum MergeCheck {
    /// The identity is unclaimed, or already belongs to the linking user
    NoCollision,
    /// The identity belongs to someone else; the caller must ask the user
    /// which identity becomes primary
    MergeRequired {
        linking: UserData,
        existing: UserData,
    },
}

/// Fresh credentials for the platform whose linking triggered the merge.
#[derive(Debug, Clone)]
pub struct LinkedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// The identity email a platform account maps to when the platform provides
/// no real address.
pub fn synthesized_email(platform: Platform, platform_user_id: &str) -> String {
    format!("{platform_user_id}@{}.generated", platform.as_str())
}

impl<Db> IdentityMergeCoordinator<Db>
where
    Db: Database,
{
    pub fn new<G>(context: &SyncContext<G, Db>) -> Self {
        Self {
            database: context.database.clone(),
            events: context.event_sender.clone(),
        }
    }

    /// Checks whether linking the given platform identity to `linking_user`
    /// collides with a different existing user, searching real emails and
    /// merge aliases.
    pub async fn detect_collision(
        &self,
        linking_user: PrimaryKey,
        identity_email: &str,
    ) -> Result<MergeCheck, MergeError> {
        let holder = match self.database.user_by_email(identity_email).await {
            Ok(user) => Some(user),
            Err(DatabaseError::NotFound { .. }) => {
                match self.database.user_by_alias(identity_email).await {
                    Ok(user) => Some(user),
                    Err(DatabaseError::NotFound { .. }) => None,
                    Err(err) => return Err(err.into()),
                }
            }
            Err(err) => return Err(err.into()),
        };

        match holder {
            Some(existing) if existing.id != linking_user => {
                let linking = self
                    .database
                    .user_by_id(linking_user)
                    .await
                    .map_err(|err| match err {
                        DatabaseError::NotFound { .. } => MergeError::MissingUser(linking_user),
                        err => err.into(),
                    })?;

                Ok(MergeCheck::MergeRequired { linking, existing })
            }
            _ => Ok(MergeCheck::NoCollision),
        }
    }

    /// Folds the secondary identity into the primary in one all-or-nothing
    /// transaction: accounts, memberships, administered groups, submissions,
    /// and preferences move over, the secondary's email becomes an alias of
    /// the primary, and the secondary user is deleted.
    pub async fn perform_chosen_merge(
        &self,
        primary_id: PrimaryKey,
        secondary_id: PrimaryKey,
        platform: Platform,
        new_tokens: LinkedTokens,
    ) -> Result<(), MergeError> {
        if primary_id == secondary_id {
            return Err(MergeError::SameUser);
        }

        let _primary = self.require_user(primary_id).await?;
        let secondary = self.require_user(secondary_id).await?;

        let plan = self
            .build_plan(primary_id, &secondary, platform, new_tokens)
            .await?;

        self.database.apply_merge(&plan).await?;

        info!("merged user {secondary_id} into {primary_id} after linking {platform}");

        self.events
            .send(SyncEvent::UsersMerged {
                primary_id,
                secondary_id,
            })
            .expect("event is sent");

        Ok(())
    }

    async fn require_user(&self, user_id: PrimaryKey) -> Result<UserData, MergeError> {
        self.database
            .user_by_id(user_id)
            .await
            .map_err(|err| match err {
                DatabaseError::NotFound { .. } => MergeError::MissingUser(user_id),
                err => err.into(),
            })
    }

    async fn build_plan(
        &self,
        primary_id: PrimaryKey,
        secondary: &UserData,
        platform: Platform,
        new_tokens: LinkedTokens,
    ) -> Result<MergePlan, MergeError> {
        let primary_accounts = self.database.music_accounts_by_user(primary_id).await?;
        let secondary_accounts = self.database.music_accounts_by_user(secondary.id).await?;
        let (accounts_to_reassign, accounts_to_drop) =
            plan_accounts(&primary_accounts, &secondary_accounts);

        let primary_memberships = self.database.memberships_by_user(primary_id).await?;
        let secondary_memberships = self.database.memberships_by_user(secondary.id).await?;
        let (memberships_to_reassign, memberships_to_drop) =
            plan_memberships(&primary_memberships, &secondary_memberships);

        let groups_to_transfer = self
            .database
            .groups_administered_by(secondary.id)
            .await?
            .into_iter()
            .map(|group| group.id)
            .collect();

        let primary_submissions = self.database.submissions_by_user(primary_id).await?;
        let secondary_submissions = self.database.submissions_by_user(secondary.id).await?;
        let (submissions_to_reassign, submissions_to_drop) =
            plan_submissions(&primary_submissions, &secondary_submissions);

        let move_preferences = self.database.preferences_by_user(primary_id).await?.is_none()
            && self.database.preferences_by_user(secondary.id).await?.is_some();

        Ok(MergePlan {
            primary_id,
            secondary_id: secondary.id,
            platform,
            tokens: UpdatedTokens {
                user_id: primary_id,
                platform,
                access_token: new_tokens.access_token,
                refresh_token: new_tokens.refresh_token,
                expires_at: new_tokens.expires_at,
            },
            accounts_to_reassign,
            accounts_to_drop,
            memberships_to_reassign,
            memberships_to_drop,
            groups_to_transfer,
            submissions_to_reassign,
            submissions_to_drop,
            move_preferences,
            alias: NewEmailAlias {
                alias_email: secondary.email.clone(),
                user_id: primary_id,
                platform,
            },
        })
    }
}

/// Secondary accounts move to the primary unless the primary already holds
/// that platform, in which case the secondary's row is dropped to keep
/// (user, platform) unique.
fn plan_accounts(
    primary: &[MusicAccountData],
    secondary: &[MusicAccountData],
) -> (Vec<PrimaryKey>, Vec<PrimaryKey>) {
    let held: HashSet<Platform> = primary.iter().map(|account| account.platform).collect();

    split(secondary, |account| !held.contains(&account.platform), |account| account.id)
}

/// Secondary memberships move to the primary unless the primary already
/// belongs to that group, in which case the duplicate row is dropped to keep
/// (group, user) unique.
fn plan_memberships(
    primary: &[GroupMemberData],
    secondary: &[GroupMemberData],
) -> (Vec<PrimaryKey>, Vec<PrimaryKey>) {
    let joined: HashSet<PrimaryKey> = primary.iter().map(|member| member.group_id).collect();

    split(secondary, |member| !joined.contains(&member.group_id), |member| member.id)
}

/// Secondary submissions move to the primary unless the primary already
/// submitted to that round, in which case the duplicate is dropped to keep
/// (round, user) unique.
fn plan_submissions(
    primary: &[SubmissionData],
    secondary: &[SubmissionData],
) -> (Vec<PrimaryKey>, Vec<PrimaryKey>) {
    let submitted: HashSet<PrimaryKey> = primary
        .iter()
        .map(|submission| submission.round_id)
        .collect();

    split(
        secondary,
        |submission| !submitted.contains(&submission.round_id),
        |submission| submission.id,
    )
}

fn split<T>(
    items: &[T],
    keep: impl Fn(&T) -> bool,
    id: impl Fn(&T) -> PrimaryKey,
) -> (Vec<PrimaryKey>, Vec<PrimaryKey>) {
    let mut kept = Vec::new();
    let mut dropped = Vec::new();

    for item in items {
        if keep(item) {
            kept.push(id(item));
        } else {
            dropped.push(id(item));
        }
    }

    (kept, dropped)
}
