//! Error types shared across the Focusbot crates.

use thiserror::Error;

use crate::id::{TextChannelId, UserId, VoiceChannelId};

/// Errors from repository operations (used by trait definitions in focusbot-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors from session lifecycle operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session for channel {0}")]
    NotFound(TextChannelId),

    #[error("session already exists for channel {0}")]
    AlreadyExists(TextChannelId),

    #[error("voice channel {0} already belongs to a session")]
    VoiceChannelBusy(VoiceChannelId),

    #[error("invalid session settings: {0}")]
    InvalidSettings(String),

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),
}

/// Errors from participant tracking operations.
#[derive(Debug, Error)]
pub enum ParticipantError {
    #[error("no participant for user {user} in voice channel {voice_channel}")]
    NotFound {
        user: UserId,
        voice_channel: VoiceChannelId,
    },

    #[error("user {user} is already attached to voice channel {voice_channel}")]
    AlreadyAttached {
        user: UserId,
        voice_channel: VoiceChannelId,
    },

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),
}

/// Errors from the external voice-state adapter.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("voice gateway error: {0}")]
    Gateway(String),

    #[error("no live voice state for user {0}")]
    StateUnavailable(UserId),
}
