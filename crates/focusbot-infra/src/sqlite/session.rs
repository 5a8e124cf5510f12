//! SQLite session repository implementation.
//!
//! Implements `SessionRepository` from `focusbot-core` using sqlx with split
//! read/write pools. Interval durations are stored as integer milliseconds;
//! timestamps as RFC 3339 strings.

use chrono::{DateTime, Utc};
use focusbot_core::repository::SessionRepository;
use focusbot_types::error::RepositoryError;
use focusbot_types::id::{
    GuildId, MessageId, SessionId, TextChannelId, VoiceChannelId,
};
use focusbot_types::session::{
    SessionRecord, SessionSettings, SessionStats, SessionStatus,
};
use sqlx::Row;
use std::time::Duration;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `SessionRepository`.
pub struct SqliteSessionRepository {
    pool: DatabasePool,
}

impl SqliteSessionRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn duration_from_ms(ms: i64) -> Result<Duration, RepositoryError> {
    u64::try_from(ms)
        .map(Duration::from_millis)
        .map_err(|_| RepositoryError::Query(format!("negative duration: {ms}")))
}

fn duration_to_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<SessionRecord, RepositoryError> {
    let guild_id: String = row
        .try_get("guild_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let text_channel_id: String = row
        .try_get("text_channel_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let voice_channel_id: String = row
        .try_get("voice_channel_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let message_id: String = row
        .try_get("message_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let current_interval: String = row
        .try_get("current_interval")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let interval_started_at: Option<String> = row
        .try_get("interval_started_at")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let time_remaining_ms: i64 = row
        .try_get("time_remaining_at_start_ms")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let status: String = row
        .try_get("status")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let completed_focus: u32 = row
        .try_get("completed_focus")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let skipped: u32 = row
        .try_get("skipped")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

    Ok(SessionRecord {
        guild_id: GuildId::new(&guild_id),
        text_channel_id: TextChannelId::new(&text_channel_id),
        voice_channel_id: VoiceChannelId::new(&voice_channel_id),
        message_id: MessageId::new(&message_id),
        current_interval: current_interval
            .parse()
            .map_err(|e| RepositoryError::Query(format!("invalid interval: {e}")))?,
        interval_started_at: interval_started_at
            .as_deref()
            .map(parse_datetime)
            .transpose()?,
        time_remaining_at_start: duration_from_ms(time_remaining_ms)?,
        status: status
            .parse()
            .map_err(|e| RepositoryError::Query(format!("invalid status: {e}")))?,
        stats: SessionStats {
            completed_focus,
            skipped,
        },
    })
}

fn row_to_settings(row: &sqlx::sqlite::SqliteRow) -> Result<SessionSettings, RepositoryError> {
    let focus_ms: i64 = row
        .try_get("focus_ms")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let short_break_ms: i64 = row
        .try_get("short_break_ms")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let long_break_ms: i64 = row
        .try_get("long_break_ms")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let intervals_per_long_break: u32 = row
        .try_get("intervals_per_long_break")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let suppress_mute: bool = row
        .try_get("suppress_mute")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let suppress_deafen: bool = row
        .try_get("suppress_deafen")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

    Ok(SessionSettings {
        focus: duration_from_ms(focus_ms)?,
        short_break: duration_from_ms(short_break_ms)?,
        long_break: duration_from_ms(long_break_ms)?,
        intervals_per_long_break,
        suppress_mute,
        suppress_deafen,
    })
}

async fn insert_session_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    record: &SessionRecord,
) -> Result<SessionId, RepositoryError> {
    let result = sqlx::query(
        "INSERT INTO sessions (guild_id, text_channel_id, voice_channel_id, message_id,
                               current_interval, interval_started_at, time_remaining_at_start_ms,
                               status, completed_focus, skipped)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.guild_id.as_str())
    .bind(record.text_channel_id.as_str())
    .bind(record.voice_channel_id.as_str())
    .bind(record.message_id.as_str())
    .bind(record.current_interval.to_string())
    .bind(record.interval_started_at.as_ref().map(format_datetime))
    .bind(duration_to_ms(record.time_remaining_at_start))
    .bind(record.status.to_string())
    .bind(record.stats.completed_focus)
    .bind(record.stats.skipped)
    .execute(&mut **tx)
    .await
    .map_err(|e| RepositoryError::Query(e.to_string()))?;

    Ok(SessionId(result.last_insert_rowid()))
}

async fn insert_settings_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    session_id: SessionId,
    settings: &SessionSettings,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO session_settings (session_id, focus_ms, short_break_ms, long_break_ms,
                                       intervals_per_long_break, suppress_mute, suppress_deafen)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(session_id.0)
    .bind(duration_to_ms(settings.focus))
    .bind(duration_to_ms(settings.short_break))
    .bind(duration_to_ms(settings.long_break))
    .bind(settings.intervals_per_long_break)
    .bind(settings.suppress_mute)
    .bind(settings.suppress_deafen)
    .execute(&mut **tx)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(ref db_err) = e {
            if db_err.message().contains("UNIQUE") {
                return RepositoryError::Conflict(format!(
                    "settings already exist for session {session_id}"
                ));
            }
        }
        RepositoryError::Query(e.to_string())
    })?;
    Ok(())
}

async fn update_session_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    id: SessionId,
    record: &SessionRecord,
) -> Result<(), RepositoryError> {
    let result = sqlx::query(
        "UPDATE sessions
         SET guild_id = ?, text_channel_id = ?, voice_channel_id = ?, message_id = ?,
             current_interval = ?, interval_started_at = ?, time_remaining_at_start_ms = ?,
             status = ?, completed_focus = ?, skipped = ?
         WHERE id = ?",
    )
    .bind(record.guild_id.as_str())
    .bind(record.text_channel_id.as_str())
    .bind(record.voice_channel_id.as_str())
    .bind(record.message_id.as_str())
    .bind(record.current_interval.to_string())
    .bind(record.interval_started_at.as_ref().map(format_datetime))
    .bind(duration_to_ms(record.time_remaining_at_start))
    .bind(record.status.to_string())
    .bind(record.stats.completed_focus)
    .bind(record.stats.skipped)
    .bind(id.0)
    .execute(&mut **tx)
    .await
    .map_err(|e| RepositoryError::Query(e.to_string()))?;

    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound);
    }
    Ok(())
}

impl SessionRepository for SqliteSessionRepository {
    async fn insert_session(&self, record: &SessionRecord) -> Result<SessionId, RepositoryError> {
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let id = insert_session_tx(&mut tx, record).await?;
        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(id)
    }

    async fn update_session(
        &self,
        id: SessionId,
        record: &SessionRecord,
    ) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        update_session_tx(&mut tx, id, record).await?;
        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<SessionRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    async fn delete_session(&self, id: SessionId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    async fn get_sessions_by_status(
        &self,
        statuses: &[SessionStatus],
    ) -> Result<Vec<(SessionId, SessionRecord)>, RepositoryError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT * FROM sessions WHERE status IN ({placeholders}) ORDER BY id ASC"
        );
        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(status.to_string());
        }

        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row
                .try_get("id")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            sessions.push((SessionId(id), row_to_record(row)?));
        }
        Ok(sessions)
    }

    async fn insert_settings(
        &self,
        session_id: SessionId,
        settings: &SessionSettings,
    ) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        insert_settings_tx(&mut tx, session_id, settings).await?;
        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))
    }

    async fn get_settings(
        &self,
        session_id: SessionId,
    ) -> Result<SessionSettings, RepositoryError> {
        let row = sqlx::query("SELECT * FROM session_settings WHERE session_id = ?")
            .bind(session_id.0)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => row_to_settings(&row),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn delete_settings(&self, session_id: SessionId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM session_settings WHERE session_id = ?")
            .bind(session_id.0)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(())
    }

    async fn create_session(
        &self,
        record: &SessionRecord,
        settings: &SessionSettings,
    ) -> Result<SessionId, RepositoryError> {
        // Session row + settings row in one transaction.
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let id = insert_session_tx(&mut tx, record).await?;
        insert_settings_tx(&mut tx, id, settings).await?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(id)
    }

    async fn end_session(
        &self,
        id: SessionId,
        record: &SessionRecord,
    ) -> Result<(), RepositoryError> {
        // Final state update + settings delete in one transaction.
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        update_session_tx(&mut tx, id, record).await?;
        sqlx::query("DELETE FROM session_settings WHERE session_id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))
    }
}
