use colored::Colorize;
use log::{debug, error, info, warn};
use thiserror::Error;

use mixtape_platforms::{AppleMusicClient, PlatformClient, PlatformRegistry, SpotifyClient};
use mixtape_sync::{DatabaseError, PgDatabase, SyncEngine};

use crate::config::{ConfigError, DaemonConfig};

mod config;
mod logging;

#[derive(Debug, Error)]
enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("could not initialize database: {0}")]
    Database(#[from] DatabaseError),
}

impl DaemonError {
    fn hint(&self) -> String {
        match self {
            DaemonError::Config(_) => {
                "Set the missing environment variable and start the daemon again.".to_string()
            }
            DaemonError::Database(_) => {
                "This is a database error. Make sure the Postgres instance is reachable at DATABASE_URL, then try again."
                    .to_string()
            }
        }
    }
}

#[tokio::main]
async fn main() {
    logging::init_logger();

    match run().await {
        Ok(()) => {}
        Err(error) => {
            error!(
                "{} Read the error below to troubleshoot the issue.",
                "mixtape failed to start!".bold().red()
            );
            error!("{error}");
            error!("{}", format!("Hint: {}", error.hint()).dimmed().italic());
        }
    }
}

async fn run() -> Result<(), DaemonError> {
    info!("Loading configuration...");
    let config = DaemonConfig::from_env()?;

    info!("Connecting to database...");
    let database = PgDatabase::new(&config.database_url).await?;

    info!("Applying migrations...");
    database.migrate().await?;

    let mut registry = PlatformRegistry::new();

    if let Some(spotify) = config.spotify {
        registry.register(PlatformClient::Spotify(SpotifyClient::new(
            spotify.client_id,
            spotify.client_secret,
        )));
        info!("Spotify client configured.");
    }

    if let Some(apple) = config.apple_music {
        registry.register(PlatformClient::AppleMusic(AppleMusicClient::new(
            apple.team_id,
            apple.key_id,
            apple.private_key,
            apple.storefront,
        )));
        info!("Apple Music client configured.");
    }

    let engine = SyncEngine::new(registry, database);

    engine.start_scheduler();
    info!("Initialized successfully.");

    // Surface engine events; the notification service consumes this stream
    // in the full deployment.
    let events = engine.events();
    tokio::task::spawn_blocking(move || {
        for event in events.iter() {
            debug!("event: {event:?}");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .expect("interrupt signal is received");

    warn!("Interrupted, shutting down.");

    Ok(())
}
