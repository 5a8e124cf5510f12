//! Participant records and voice state.
//!
//! A participant is a user attached to a session's voice channel. The
//! record carries the mute/deafen flags observed when they joined (or at
//! the last resync) so the autoshusher can restore them during breaks.

use serde::{Deserialize, Serialize};

use crate::id::{GuildId, SessionId, UserId, VoiceChannelId};

/// A user's live mute/deafen flags as reported by the voice gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceState {
    pub mute: bool,
    pub deaf: bool,
}

/// The persisted state of one session participant.
///
/// At most one record exists per (voice channel, user) pair while the user
/// is attached; the record is deleted on leave or session end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub session_id: SessionId,
    pub guild_id: GuildId,
    pub voice_channel_id: VoiceChannelId,
    pub user_id: UserId,
    /// Mute flag to restore during breaks.
    pub is_muted: bool,
    /// Deafen flag to restore during breaks.
    pub is_deafened: bool,
}

impl ParticipantRecord {
    /// The voice state this record would restore.
    pub fn restored_state(&self) -> VoiceState {
        VoiceState {
            mute: self.is_muted,
            deaf: self.is_deafened,
        }
    }

    /// Whether the cached flags differ from an observed live state.
    pub fn diverges_from(&self, live: VoiceState) -> bool {
        self.is_muted != live.mute || self.is_deafened != live.deaf
    }
}
