//! ParticipantRepository trait definition.

use focusbot_types::error::RepositoryError;
use focusbot_types::id::ParticipantId;
use focusbot_types::id::UserId;
use focusbot_types::participant::ParticipantRecord;

/// Repository trait for participant persistence.
///
/// Implementations live in focusbot-infra (e.g., `SqliteParticipantRepository`).
pub trait ParticipantRepository: Send + Sync {
    /// Insert a participant record, returning the assigned ID.
    ///
    /// Fails with [`RepositoryError::Conflict`] if a record already exists
    /// for the same (voice channel, user) pair.
    fn insert_participant(
        &self,
        record: &ParticipantRecord,
    ) -> impl std::future::Future<Output = Result<ParticipantId, RepositoryError>> + Send;

    /// Overwrite an existing participant record (voice-state resync).
    fn update_participant(
        &self,
        id: ParticipantId,
        record: &ParticipantRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete a participant, returning the deleted record.
    fn delete_participant(
        &self,
        id: ParticipantId,
    ) -> impl std::future::Future<Output = Result<ParticipantRecord, RepositoryError>> + Send;

    /// All persisted participants (boot-time cache restore).
    fn get_all_participants(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<(ParticipantId, ParticipantRecord)>, RepositoryError>>
    + Send;

    /// Look up a participant by user ID.
    fn get_participant_by_user(
        &self,
        user_id: &UserId,
    ) -> impl std::future::Future<
        Output = Result<Option<(ParticipantId, ParticipantRecord)>, RepositoryError>,
    > + Send;
}
