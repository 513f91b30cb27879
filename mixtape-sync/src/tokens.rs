use chrono::{Duration as TimeDelta, Utc};
use log::{info, warn};
use thiserror::Error;

use mixtape_core::Platform;
use mixtape_platforms::{PlatformError, PlatformGateway, DEMO_TOKEN_PREFIX};

use crate::{Database, DatabaseError, MusicAccountData, PrimaryKey, SyncContext, UpdatedTokens};

/// Obtains, validates, and refreshes per-user platform credentials.
pub struct TokenProvider<G, Db> {
    context: SyncContext<G, Db>,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("user has no linked {platform} account")]
    NoAccount { platform: Platform },

    /// The credential cannot be refreshed; the user must re-link the account
    #[error("{platform} access expired and cannot be refreshed without re-linking")]
    ReauthRequired { platform: Platform },

    #[error(transparent)]
    Db(#[from] DatabaseError),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

impl<G, Db> TokenProvider<G, Db>
where
    G: PlatformGateway,
    Db: Database,
{
    /// Tokens within this margin of their recorded expiry are treated as
    /// already expired, so a token never runs out mid-reconciliation.
    const EXPIRY_MARGIN_MINUTES: i64 = 5;

    pub fn new(context: &SyncContext<G, Db>) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Returns whether a usable credential exists for the user and platform.
    pub async fn ensure_valid_token(&self, user_id: PrimaryKey, platform: Platform) -> bool {
        match self.get_valid_user_token(user_id, platform).await {
            Ok(token) => token.is_some(),
            Err(err) => {
                warn!("could not validate {platform} token for user {user_id}: {err}");
                false
            }
        }
    }

    /// Returns a currently-valid access token for the user on the platform,
    /// refreshing or probing as the platform requires. `None` means the
    /// account is missing or needs re-linking; errors are reserved for
    /// failures worth retrying.
    pub async fn get_valid_user_token(
        &self,
        user_id: PrimaryKey,
        platform: Platform,
    ) -> Result<Option<String>, TokenError> {
        let account = match self.context.database.music_account(user_id, platform).await {
            Ok(account) => account,
            Err(DatabaseError::NotFound { .. }) => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        if self.has_fresh_expiry(&account) {
            return Ok(Some(account.access_token));
        }

        match platform {
            Platform::Spotify => match self.refresh_user_token(user_id, platform).await {
                Ok(token) => Ok(Some(token)),
                Err(TokenError::ReauthRequired { .. }) => {
                    info!("user {user_id} must re-link {platform}; refresh is not possible");
                    Ok(None)
                }
                Err(err) => Err(err),
            },
            Platform::AppleMusic => self.validate_apple_token(&account).await,
        }
    }

    /// Exchanges the stored refresh token for a fresh access token and
    /// persists the rotated credential.
    pub async fn refresh_user_token(
        &self,
        user_id: PrimaryKey,
        platform: Platform,
    ) -> Result<String, TokenError> {
        let account = self
            .context
            .database
            .music_account(user_id, platform)
            .await
            .map_err(|err| match err {
                DatabaseError::NotFound { .. } => TokenError::NoAccount { platform },
                err => err.into(),
            })?;

        let refresh_token = account
            .refresh_token
            .ok_or(TokenError::ReauthRequired { platform })?;

        let refreshed = self
            .context
            .gateway
            .refresh_access_token(platform, &refresh_token)
            .await
            .map_err(|err| match err {
                PlatformError::ReauthRequired => TokenError::ReauthRequired { platform },
                err if err.is_auth_error() => TokenError::ReauthRequired { platform },
                err => err.into(),
            })?;

        let updated = self
            .context
            .database
            .update_account_tokens(UpdatedTokens {
                user_id,
                platform,
                access_token: refreshed.access_token,
                // Keep the old refresh token when the platform doesn't rotate it
                refresh_token: refreshed.refresh_token.or(Some(refresh_token)),
                expires_at: Some(refreshed.expires_at),
            })
            .await?;

        Ok(updated.access_token)
    }

    /// Best-effort sweep refreshing accounts that expire within the window.
    /// Returns how many were refreshed; failures are logged, not escalated.
    pub async fn refresh_expiring_accounts(&self, within: TimeDelta) -> usize {
        let cutoff = Utc::now() + within;

        let accounts = match self.context.database.accounts_expiring_before(cutoff).await {
            Ok(accounts) => accounts,
            Err(err) => {
                warn!("token sweep could not list expiring accounts: {err}");
                return 0;
            }
        };

        let mut refreshed = 0;

        for account in accounts {
            if account.refresh_token.is_none() {
                continue;
            }

            match self
                .refresh_user_token(account.user_id, account.platform)
                .await
            {
                Ok(_) => refreshed += 1,
                Err(err) => warn!(
                    "token sweep could not refresh {} for user {}: {err}",
                    account.platform, account.user_id
                ),
            }
        }

        refreshed
    }

    fn has_fresh_expiry(&self, account: &MusicAccountData) -> bool {
        let margin = TimeDelta::minutes(Self::EXPIRY_MARGIN_MINUTES);

        account
            .expires_at
            .map(|expires_at| expires_at > Utc::now() + margin)
            .unwrap_or(false)
    }

    /// Apple Music issues no refresh token and records no expiry; validity is
    /// established by the demo naming convention or a bounded storefront probe.
    async fn validate_apple_token(
        &self,
        account: &MusicAccountData,
    ) -> Result<Option<String>, TokenError> {
        if account.access_token.starts_with(DEMO_TOKEN_PREFIX) {
            return Ok(Some(account.access_token.clone()));
        }

        match self
            .context
            .gateway
            .probe_account(account.platform, &account.access_token)
            .await
        {
            Ok(()) => Ok(Some(account.access_token.clone())),
            Err(err) if err.is_auth_error() => {
                info!(
                    "apple music token for user {} was rejected upstream",
                    account.user_id
                );
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }
}
