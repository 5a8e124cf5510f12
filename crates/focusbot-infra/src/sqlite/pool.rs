//! SQLite connection management.
//!
//! Writes to a SQLite database are serialized no matter how many
//! connections exist, so `DatabasePool` keeps exactly one writer connection
//! and routes SELECTs through a separate read-only pool that never contends
//! with it. Both sides run in WAL journal mode with foreign keys on, and
//! schema migrations are applied through the writer before any reads start.

use focusbot_types::config::EngineConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

const READER_CONNECTIONS: u32 = 8;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Reader/writer pool pair for one SQLite database.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open (creating if missing) the database at `database_url`, run
    /// migrations, and return the pool pair.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT)
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;

        // Migrations go through the single writer; the reader pool opens
        // read-only against the migrated schema.
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .connect_with(options.read_only(true))
            .await?;

        Ok(Self { reader, writer })
    }

    /// Open the database named by `config.database_url`, falling back to
    /// the default location when unset.
    pub async fn from_config(config: &EngineConfig) -> Result<Self, sqlx::Error> {
        match &config.database_url {
            Some(url) => Self::new(url).await,
            None => Self::new(&default_database_url()).await,
        }
    }
}

/// The default database URL: `$FOCUSBOT_DATA_DIR/focusbot.db`, or
/// `~/.focusbot/focusbot.db` when the env var is unset.
pub fn default_database_url() -> String {
    let data_dir = std::env::var("FOCUSBOT_DATA_DIR").unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{home}/.focusbot")
    });
    format!("sqlite://{data_dir}/focusbot.db")
}
