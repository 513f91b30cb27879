use chrono::NaiveDate;
use crossbeam::channel::{unbounded, Receiver, Sender};
use serde::Serialize;

use mixtape_core::Platform;

use crate::{PrimaryKey, RoundStatus};

pub type EventSender = Sender<SyncEvent>;
pub type EventReceiver = Receiver<SyncEvent>;

/// Events emitted by the sync engine. The surrounding application listens to
/// these to drive push notifications and activity feeds; they serialize
/// directly into notification payloads.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A new daily round was opened for a group
    RoundCreated {
        group_id: PrimaryKey,
        round_id: PrimaryKey,
        date: NaiveDate,
    },
    /// A round passed its deadline and was processed
    RoundProcessed {
        group_id: PrimaryKey,
        round_id: PrimaryKey,
        status: RoundStatus,
    },
    /// A platform playlist was created for a group
    PlaylistCreated {
        group_id: PrimaryKey,
        platform: Platform,
        playlist_id: PrimaryKey,
    },
    /// A platform playlist's track list was replaced
    PlaylistUpdated {
        group_id: PrimaryKey,
        platform: Platform,
        track_count: usize,
    },
    /// A platform playlist could not be updated after exhausting retries
    PlaylistUpdateFailed {
        group_id: PrimaryKey,
        platform: Platform,
        error: String,
    },
    /// Two user identities were consolidated
    UsersMerged {
        primary_id: PrimaryKey,
        secondary_id: PrimaryKey,
    },
}

pub fn event_channel() -> (EventSender, EventReceiver) {
    unbounded()
}
