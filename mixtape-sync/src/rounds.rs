use chrono::{DateTime, Datelike, Duration as TimeDelta, NaiveDate, Utc, Weekday};
use futures_util::future::join_all;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use mixtape_platforms::PlatformGateway;

use crate::{
    Database, DatabaseError, GroupPlaylistManager, NewDailyRound, PrimaryKey, RoundData,
    RoundStatus, SyncContext, SyncEvent, TokenProvider,
};

/// Hour (UTC) at which new daily rounds are opened.
const ROUND_CREATION_HOUR: u32 = 0;

/// Hour (UTC) at which the previous day's rounds are processed.
const ROUND_PROCESSING_HOUR: u32 = 8;

/// Hour (UTC) of each round's submission deadline.
const DEADLINE_HOUR: u32 = 23;

/// How often the proactive token refresh sweep runs.
const TOKEN_SWEEP_INTERVAL_HOURS: i64 = 4;

/// Rounds older than this are hard-deleted by the weekly cleanup.
const ROUND_RETENTION_DAYS: i64 = 30;

const CLEANUP_WEEKDAY: Weekday = Weekday::Sun;
const CLEANUP_HOUR: u32 = 2;

/// Drives the time-based lifecycle: round creation, round processing, token
/// refreshing, and cleanup. Every job is idempotent and safe to re-run;
/// overlapping instances are absorbed by the database's unique constraints.
pub struct RoundScheduler<G, Db> {
    context: SyncContext<G, Db>,
    playlists: GroupPlaylistManager<G, Db>,
    tokens: TokenProvider<G, Db>,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Db(#[from] DatabaseError),
}

/// What processing a round produced. Completion ratio and update outcome are
/// deliberately separate signals; only [`RoundOutcome::status`] collapses
/// them into the persisted status.
#[derive(Debug, Clone, Copy)]
pub struct RoundOutcome {
    pub submitted: usize,
    pub member_count: usize,
    pub update_ok: bool,
}

impl RoundOutcome {
    pub fn status(&self) -> RoundStatus {
        if !self.update_ok {
            RoundStatus::Failed
        } else if self.submitted == self.member_count {
            RoundStatus::Completed
        } else {
            RoundStatus::Partial
        }
    }
}

impl<G, Db> RoundScheduler<G, Db>
where
    G: PlatformGateway,
    Db: Database,
{
    pub fn new(context: &SyncContext<G, Db>) -> Self {
        Self {
            context: context.clone(),
            playlists: GroupPlaylistManager::new(context),
            tokens: TokenProvider::new(context),
        }
    }

    /// Spawns the four timed jobs onto the current tokio runtime.
    pub fn start(self: &Arc<Self>)
    where
        G: 'static,
        Db: 'static,
    {
        info!(
            "starting scheduler: rounds at {ROUND_CREATION_HOUR:02}:00, processing at \
             {ROUND_PROCESSING_HOUR:02}:00, sweep every {TOKEN_SWEEP_INTERVAL_HOURS}h"
        );

        let scheduler = self.clone();
        tokio::spawn(async move {
            loop {
                sleep_until(next_daily(Utc::now(), ROUND_CREATION_HOUR)).await;

                let today = Utc::now().date_naive();
                match scheduler.create_daily_rounds(today).await {
                    Ok(created) => info!("opened {created} rounds for {today}"),
                    Err(err) => error!("daily round creation failed: {err}"),
                }
            }
        });

        let scheduler = self.clone();
        tokio::spawn(async move {
            loop {
                sleep_until(next_daily(Utc::now(), ROUND_PROCESSING_HOUR)).await;

                let yesterday = Utc::now().date_naive() - TimeDelta::days(1);
                match scheduler.process_completed_rounds(yesterday).await {
                    Ok(processed) => info!("processed {} rounds for {yesterday}", processed.len()),
                    Err(err) => error!("round processing failed: {err}"),
                }
            }
        });

        let scheduler = self.clone();
        tokio::spawn(async move {
            let period = Duration::from_secs(TOKEN_SWEEP_INTERVAL_HOURS as u64 * 3600);
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;

                let refreshed = scheduler
                    .tokens
                    .refresh_expiring_accounts(TimeDelta::hours(TOKEN_SWEEP_INTERVAL_HOURS))
                    .await;

                if refreshed > 0 {
                    info!("token sweep refreshed {refreshed} accounts");
                }
            }
        });

        let scheduler = self.clone();
        tokio::spawn(async move {
            loop {
                sleep_until(next_weekly(Utc::now(), CLEANUP_WEEKDAY, CLEANUP_HOUR)).await;

                match scheduler.cleanup_old_rounds(Utc::now().date_naive()).await {
                    Ok(deleted) => info!("cleanup removed {deleted} old rounds"),
                    Err(err) => error!("round cleanup failed: {err}"),
                }
            }
        });
    }

    /// Opens today's round for every group. A group that already has a round
    /// for the date is skipped, never an error. Returns how many were opened.
    pub async fn create_daily_rounds(&self, date: NaiveDate) -> Result<usize, SchedulerError> {
        let groups = self.context.database.list_groups().await?;
        let mut created = 0;

        for group in groups {
            let new_round = NewDailyRound {
                group_id: group.id,
                date,
                deadline_at: deadline_for(date),
            };

            match self.context.database.create_round(new_round).await {
                Ok(round) => {
                    created += 1;

                    self.context.emit(SyncEvent::RoundCreated {
                        group_id: group.id,
                        round_id: round.id,
                        date,
                    });
                }
                Err(DatabaseError::Conflict { .. }) => {}
                Err(err) => warn!("could not open round for group {}: {err}", group.id),
            }
        }

        Ok(created)
    }

    /// Processes every still-active round for the date: ensures the group's
    /// playlists, reconciles them against the submissions, and settles the
    /// round status. One round's failure never blocks the others.
    pub async fn process_completed_rounds(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<(PrimaryKey, RoundStatus)>, SchedulerError> {
        let rounds = self.context.database.active_rounds_for_date(date).await?;

        let statuses = join_all(rounds.iter().map(|round| self.process_round(round))).await;

        Ok(rounds
            .iter()
            .map(|round| round.id)
            .zip(statuses)
            .collect())
    }

    async fn process_round(&self, round: &RoundData) -> RoundStatus {
        let outcome = self.evaluate_round(round).await;
        let status = outcome.status();

        if let Err(err) = self.context.database.set_round_status(round.id, status).await {
            error!("could not persist status for round {}: {err}", round.id);
        }

        self.context.emit(SyncEvent::RoundProcessed {
            group_id: round.group_id,
            round_id: round.id,
            status,
        });

        status
    }

    async fn evaluate_round(&self, round: &RoundData) -> RoundOutcome {
        let failed = RoundOutcome {
            submitted: 0,
            member_count: 0,
            update_ok: false,
        };

        let members = match self.context.database.group_members(round.group_id).await {
            Ok(members) => members,
            Err(err) => {
                error!("could not load members for round {}: {err}", round.id);
                return failed;
            }
        };

        let submissions = match self.context.database.submissions_for_round(round.id).await {
            Ok(submissions) => submissions,
            Err(err) => {
                error!("could not load submissions for round {}: {err}", round.id);
                return failed;
            }
        };

        // Best effort: missing playlists are recreated before the update, but
        // an ensure failure alone doesn't fail the round.
        if let Err(err) = self
            .playlists
            .ensure_group_playlists(round.group_id, None)
            .await
        {
            warn!("could not ensure playlists for round {}: {err}", round.id);
        }

        let update_ok = match self
            .playlists
            .update_group_playlists_for_round(round.id)
            .await
        {
            Ok(report) => report.is_clean(),
            Err(err) => {
                error!("playlist update threw for round {}: {err}", round.id);
                false
            }
        };

        RoundOutcome {
            submitted: submissions.len(),
            member_count: members.len(),
            update_ok,
        }
    }

    /// Hard-deletes rounds older than the retention window, cascading to
    /// their submissions. Returns how many rounds were removed.
    pub async fn cleanup_old_rounds(&self, today: NaiveDate) -> Result<u64, SchedulerError> {
        let cutoff = today - TimeDelta::days(ROUND_RETENTION_DAYS);

        Ok(self.context.database.delete_rounds_before(cutoff).await?)
    }
}

fn deadline_for(date: NaiveDate) -> DateTime<Utc> {
    date.and_hms_opt(DEADLINE_HOUR, 0, 0)
        .expect("deadline hour is valid")
        .and_utc()
}

/// The next occurrence of the given UTC hour, strictly after `now`.
fn next_daily(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let today = now
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .expect("hour is valid")
        .and_utc();

    if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    }
}

/// The next occurrence of the given weekday and UTC hour, strictly after `now`.
fn next_weekly(now: DateTime<Utc>, weekday: Weekday, hour: u32) -> DateTime<Utc> {
    let mut candidate = next_daily(now, hour);

    while candidate.weekday() != weekday {
        candidate += TimeDelta::days(1);
    }

    candidate
}

async fn sleep_until(at: DateTime<Utc>) {
    let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

    tokio::time::sleep(delay).await;
}
