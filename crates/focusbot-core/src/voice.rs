//! Voice-state adapter trait.
//!
//! The narrow interface onto the chat platform's live voice state. The
//! gateway client implementing this lives outside the engine; the engine
//! treats it as an append-safe external service callable concurrently.

use focusbot_types::error::VoiceError;
use focusbot_types::id::{GuildId, UserId};
use focusbot_types::participant::VoiceState;

/// Adapter for reading and writing live mute/deafen state.
pub trait VoiceStateAdapter: Send + Sync {
    /// Fetch a user's current voice state.
    fn get_voice_state(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
    ) -> impl std::future::Future<Output = Result<VoiceState, VoiceError>> + Send;

    /// Set a user's server mute/deafen flags.
    fn update_voice_state(
        &self,
        guild_id: &GuildId,
        user_id: &UserId,
        mute: bool,
        deaf: bool,
    ) -> impl std::future::Future<Output = Result<(), VoiceError>> + Send;
}
