//! Shared fakes for the engine's unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use mixtape_core::Platform;
use mixtape_platforms::{
    CatalogTrack, PlatformError, PlatformGateway, PlatformPlaylist, RefreshedToken, SongQuery,
};

use crate::memory::MemoryDatabase;
use crate::{event_channel, EventReceiver, SyncContext};

type RaceHook = Box<dyn Fn() + Send + Sync>;

/// A recording [`PlatformGateway`] with scriptable failures.
#[derive(Default)]
pub struct FakeGateway {
    refreshed: Option<RefreshedToken>,
    probe_fails: bool,
    replace_fails: bool,
    auth_failures_remaining: AtomicU32,
    search_results: Mutex<HashMap<String, Vec<CatalogTrack>>>,
    missing_upstream: Mutex<HashSet<String>>,
    race_hook: Mutex<Option<RaceHook>>,
    next_playlist: AtomicU32,

    /// Every (platform, playlist, tracks) replace call, in order
    pub replacements: Mutex<Vec<(Platform, String, Vec<String>)>>,
    /// Every (platform, name) create call, in order
    pub created: Mutex<Vec<(Platform, String)>>,
    /// Every playlist id passed to delete
    pub deleted: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_refreshed_token(mut self, token: RefreshedToken) -> Self {
        self.refreshed = Some(token);
        self
    }

    pub fn with_probe_failures(mut self) -> Self {
        self.probe_fails = true;
        self
    }

    pub fn with_replace_failures(mut self) -> Self {
        self.replace_fails = true;
        self
    }

    /// The first `count` replace calls fail with an auth-shaped error.
    pub fn with_auth_failures(self, count: u32) -> Self {
        self.auth_failures_remaining.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_search_results(self, title: &str, tracks: Vec<CatalogTrack>) -> Self {
        self.search_results.lock().insert(title.to_string(), tracks);
        self
    }

    /// Marks a playlist id as deleted upstream.
    pub fn with_missing_upstream(self, playlist_id: &str) -> Self {
        self.missing_upstream.lock().insert(playlist_id.to_string());
        self
    }

    /// Runs once right after the next playlist creation, before the caller
    /// persists its row. Used to simulate a concurrent creator winning the race.
    pub fn with_race_hook(self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        *self.race_hook.lock() = Some(Box::new(hook));
        self
    }
}

#[async_trait]
impl PlatformGateway for FakeGateway {
    fn is_configured(&self, _platform: Platform) -> bool {
        true
    }

    async fn create_playlist(
        &self,
        platform: Platform,
        _token: &str,
        name: &str,
        _description: &str,
    ) -> Result<PlatformPlaylist, PlatformError> {
        self.created.lock().push((platform, name.to_string()));

        let id = format!("pl-{}", self.next_playlist.fetch_add(1, Ordering::SeqCst));

        if let Some(hook) = self.race_hook.lock().take() {
            hook();
        }

        Ok(PlatformPlaylist {
            url: format!("https://example.com/{id}"),
            name: name.to_string(),
            id,
        })
    }

    async fn replace_tracks(
        &self,
        platform: Platform,
        _token: &str,
        playlist_id: &str,
        track_ids: &[String],
    ) -> Result<(), PlatformError> {
        let auth_failures = self.auth_failures_remaining.load(Ordering::SeqCst);

        if auth_failures > 0 {
            self.auth_failures_remaining
                .store(auth_failures - 1, Ordering::SeqCst);
            return Err(PlatformError::Unauthorized("token expired".to_string()));
        }

        if self.replace_fails {
            return Err(PlatformError::Upstream {
                status: 503,
                body: "unavailable".to_string(),
            });
        }

        self.replacements
            .lock()
            .push((platform, playlist_id.to_string(), track_ids.to_vec()));

        Ok(())
    }

    async fn playlist_exists(
        &self,
        _platform: Platform,
        _token: &str,
        playlist_id: &str,
    ) -> Result<bool, PlatformError> {
        Ok(!self.missing_upstream.lock().contains(playlist_id))
    }

    async fn rename_playlist(
        &self,
        _platform: Platform,
        _token: &str,
        _playlist_id: &str,
        _name: &str,
    ) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn delete_playlist(
        &self,
        _platform: Platform,
        _token: &str,
        playlist_id: &str,
    ) -> Result<(), PlatformError> {
        self.deleted.lock().push(playlist_id.to_string());
        Ok(())
    }

    async fn search_catalog(
        &self,
        _platform: Platform,
        _token: &str,
        query: &SongQuery,
    ) -> Result<Vec<CatalogTrack>, PlatformError> {
        Ok(self
            .search_results
            .lock()
            .get(&query.title)
            .cloned()
            .unwrap_or_default())
    }

    async fn probe_account(&self, _platform: Platform, _token: &str) -> Result<(), PlatformError> {
        if self.probe_fails {
            return Err(PlatformError::Unauthorized("probe rejected".to_string()));
        }

        Ok(())
    }

    async fn refresh_access_token(
        &self,
        _platform: Platform,
        _refresh_token: &str,
    ) -> Result<RefreshedToken, PlatformError> {
        self.refreshed
            .clone()
            .ok_or(PlatformError::ReauthRequired)
    }
}

/// A catalog track fixture.
pub fn catalog_track(id: &str, title: &str, artist: &str) -> CatalogTrack {
    CatalogTrack {
        id: id.to_string(),
        title: title.to_string(),
        artist: artist.to_string(),
        album: None,
    }
}

pub fn test_context(
    gateway: FakeGateway,
    database: impl Into<Arc<MemoryDatabase>>,
) -> SyncContext<FakeGateway, MemoryDatabase> {
    let (context, receiver) = test_context_with_events(gateway, database);

    // Keep the channel open for contexts that never read events.
    std::mem::forget(receiver);

    context
}

pub fn test_context_with_events(
    gateway: FakeGateway,
    database: impl Into<Arc<MemoryDatabase>>,
) -> (SyncContext<FakeGateway, MemoryDatabase>, EventReceiver) {
    let (event_sender, event_receiver) = event_channel();

    let context = SyncContext {
        gateway: Arc::new(gateway),
        database: database.into(),
        event_sender,
    };

    (context, event_receiver)
}
