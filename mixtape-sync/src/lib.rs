mod db;
mod events;
mod matching;
mod merge;
mod playlists;
mod rounds;
mod tokens;

#[cfg(test)]
mod testing;

use std::sync::Arc;

pub use db::*;
pub use events::*;
pub use matching::*;
pub use merge::*;
pub use playlists::*;
pub use rounds::*;
pub use tokens::*;

use mixtape_platforms::PlatformGateway;

/// The mixtape sync engine, facilitating daily rounds, group playlist
/// reconciliation, and identity merges.
pub struct SyncEngine<G, Db> {
    context: SyncContext<G, Db>,

    pub tokens: TokenProvider<G, Db>,
    pub playlists: GroupPlaylistManager<G, Db>,
    pub rounds: Arc<RoundScheduler<G, Db>>,
    pub merge: IdentityMergeCoordinator<Db>,

    event_receiver: EventReceiver,
}

/// A type passed to the engine's components, to access the database, the
/// platform gateway, and the event stream.
pub struct SyncContext<G, Db> {
    pub gateway: Arc<G>,
    pub database: Arc<Db>,

    event_sender: EventSender,
}

impl<G, Db> SyncEngine<G, Db>
where
    G: PlatformGateway,
    Db: Database,
{
    pub fn new(gateway: G, database: Db) -> Self {
        let (event_sender, event_receiver) = event_channel();

        let context = SyncContext {
            gateway: Arc::new(gateway),
            database: Arc::new(database),
            event_sender,
        };

        let tokens = TokenProvider::new(&context);
        let playlists = GroupPlaylistManager::new(&context);
        let rounds = Arc::new(RoundScheduler::new(&context));
        let merge = IdentityMergeCoordinator::new(&context);

        Self {
            context,
            tokens,
            playlists,
            rounds,
            merge,
            event_receiver,
        }
    }

    /// Spawns the four scheduler jobs onto the current tokio runtime.
    pub fn start_scheduler(&self)
    where
        G: 'static,
        Db: 'static,
    {
        self.rounds.start();
    }

    /// A receiver for the engine's event stream. May be cloned freely.
    pub fn events(&self) -> EventReceiver {
        self.event_receiver.clone()
    }

    pub fn context(&self) -> SyncContext<G, Db> {
        self.context.clone()
    }
}

impl<G, Db> SyncContext<G, Db> {
    pub fn emit(&self, event: SyncEvent) {
        self.event_sender.send(event).expect("event is sent");
    }
}

impl<G, Db> Clone for SyncContext<G, Db> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            database: self.database.clone(),
            event_sender: self.event_sender.clone(),
        }
    }
}
