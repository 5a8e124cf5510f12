//! SQLite participant repository implementation.
//!
//! The `participants` table carries a UNIQUE(voice_channel_id, user_id)
//! constraint; violations surface as `RepositoryError::Conflict` so the
//! provider can map them to its own duplicate error.

use focusbot_core::repository::ParticipantRepository;
use focusbot_types::error::RepositoryError;
use focusbot_types::id::{
    GuildId, ParticipantId, SessionId, UserId, VoiceChannelId,
};
use focusbot_types::participant::ParticipantRecord;
use sqlx::Row;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ParticipantRepository`.
pub struct SqliteParticipantRepository {
    pool: DatabasePool,
}

impl SqliteParticipantRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<ParticipantRecord, RepositoryError> {
    let session_id: i64 = row
        .try_get("session_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let guild_id: String = row
        .try_get("guild_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let voice_channel_id: String = row
        .try_get("voice_channel_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let user_id: String = row
        .try_get("user_id")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let is_muted: bool = row
        .try_get("is_muted")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    let is_deafened: bool = row
        .try_get("is_deafened")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

    Ok(ParticipantRecord {
        session_id: SessionId(session_id),
        guild_id: GuildId::new(&guild_id),
        voice_channel_id: VoiceChannelId::new(&voice_channel_id),
        user_id: UserId::new(&user_id),
        is_muted,
        is_deafened,
    })
}

impl ParticipantRepository for SqliteParticipantRepository {
    async fn insert_participant(
        &self,
        record: &ParticipantRecord,
    ) -> Result<ParticipantId, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO participants (session_id, guild_id, voice_channel_id, user_id,
                                       is_muted, is_deafened)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(record.session_id.0)
        .bind(record.guild_id.as_str())
        .bind(record.voice_channel_id.as_str())
        .bind(record.user_id.as_str())
        .bind(record.is_muted)
        .bind(record.is_deafened)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.message().contains("UNIQUE") {
                    return RepositoryError::Conflict(format!(
                        "user {} is already attached to voice channel {}",
                        record.user_id, record.voice_channel_id
                    ));
                }
            }
            RepositoryError::Query(e.to_string())
        })?;

        Ok(ParticipantId(result.last_insert_rowid()))
    }

    async fn update_participant(
        &self,
        id: ParticipantId,
        record: &ParticipantRecord,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE participants
             SET session_id = ?, guild_id = ?, voice_channel_id = ?, user_id = ?,
                 is_muted = ?, is_deafened = ?
             WHERE id = ?",
        )
        .bind(record.session_id.0)
        .bind(record.guild_id.as_str())
        .bind(record.voice_channel_id.as_str())
        .bind(record.user_id.as_str())
        .bind(record.is_muted)
        .bind(record.is_deafened)
        .bind(id.0)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn delete_participant(
        &self,
        id: ParticipantId,
    ) -> Result<ParticipantRecord, RepositoryError> {
        // Fetch-then-delete on the single writer connection; the returned
        // record tells the caller which cache entry to evict.
        let row = sqlx::query("SELECT * FROM participants WHERE id = ?")
            .bind(id.0)
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let Some(row) = row else {
            return Err(RepositoryError::NotFound);
        };
        let record = row_to_record(&row)?;

        sqlx::query("DELETE FROM participants WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(record)
    }

    async fn get_all_participants(
        &self,
    ) -> Result<Vec<(ParticipantId, ParticipantRecord)>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM participants ORDER BY id ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut participants = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row
                .try_get("id")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            participants.push((ParticipantId(id), row_to_record(row)?));
        }
        Ok(participants)
    }

    async fn get_participant_by_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<(ParticipantId, ParticipantRecord)>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM participants WHERE user_id = ? LIMIT 1")
            .bind(user_id.as_str())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let id: i64 = row
                    .try_get("id")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some((ParticipantId(id), row_to_record(&row)?)))
            }
            None => Ok(None),
        }
    }
}
