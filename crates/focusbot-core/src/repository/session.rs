//! SessionRepository trait definition.
//!
//! CRUD for session and session-settings records. Multi-statement
//! operations that must be atomic (creating a session with its settings,
//! ending a session and deleting its settings) are composite methods so the
//! implementation can own the transaction boundary.

use focusbot_types::error::RepositoryError;
use focusbot_types::id::SessionId;
use focusbot_types::session::{SessionRecord, SessionSettings, SessionStatus};

/// Repository trait for session and session-settings persistence.
///
/// Implementations live in focusbot-infra (e.g., `SqliteSessionRepository`).
pub trait SessionRepository: Send + Sync {
    /// Insert a session record, returning the assigned ID.
    fn insert_session(
        &self,
        record: &SessionRecord,
    ) -> impl std::future::Future<Output = Result<SessionId, RepositoryError>> + Send;

    /// Overwrite the mutable state of an existing session.
    fn update_session(
        &self,
        id: SessionId,
        record: &SessionRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a session by ID.
    fn get_session(
        &self,
        id: SessionId,
    ) -> impl std::future::Future<Output = Result<Option<SessionRecord>, RepositoryError>> + Send;

    /// Delete a session row entirely.
    fn delete_session(
        &self,
        id: SessionId,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// All sessions whose status is one of `statuses` (boot-time restore).
    fn get_sessions_by_status(
        &self,
        statuses: &[SessionStatus],
    ) -> impl std::future::Future<Output = Result<Vec<(SessionId, SessionRecord)>, RepositoryError>> + Send;

    /// Insert the settings row for a session.
    fn insert_settings(
        &self,
        session_id: SessionId,
        settings: &SessionSettings,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get the settings row for a session.
    fn get_settings(
        &self,
        session_id: SessionId,
    ) -> impl std::future::Future<Output = Result<SessionSettings, RepositoryError>> + Send;

    /// Delete the settings row for a session.
    fn delete_settings(
        &self,
        session_id: SessionId,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Atomically insert a session record and its settings.
    ///
    /// Either both rows exist afterwards or neither does.
    fn create_session(
        &self,
        record: &SessionRecord,
        settings: &SessionSettings,
    ) -> impl std::future::Future<Output = Result<SessionId, RepositoryError>> + Send;

    /// Atomically persist a session's final state and delete its settings.
    fn end_session(
        &self,
        id: SessionId,
        record: &SessionRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
