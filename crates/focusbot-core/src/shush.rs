//! Break-aware voice-state enforcement.
//!
//! During focus intervals every participant is server-muted (and deafened,
//! per settings); during breaks their own pre-session flags come back. The
//! cached flags are resynced from the live gateway state before enforcing,
//! so a user who manually muted themselves during a break keeps that
//! choice after the next focus interval.
//!
//! All gateway calls for one pass fan out concurrently in a `JoinSet` and
//! are joined before returning; an individual failure is logged and never
//! aborts the siblings.

use std::sync::Arc;

use focusbot_types::id::VoiceChannelId;
use focusbot_types::participant::VoiceState;
use focusbot_types::session::SessionSettings;
use tokio::task::JoinSet;

use crate::participant::{Participant, ParticipantsProvider};
use crate::repository::ParticipantRepository;
use crate::session::Session;
use crate::voice::VoiceStateAdapter;

pub struct Autoshusher<P, V>
where
    P: ParticipantRepository + 'static,
    V: VoiceStateAdapter + 'static,
{
    participants: Arc<ParticipantsProvider<P>>,
    voice: Arc<V>,
}

impl<P, V> Autoshusher<P, V>
where
    P: ParticipantRepository + 'static,
    V: VoiceStateAdapter + 'static,
{
    pub fn new(participants: Arc<ParticipantsProvider<P>>, voice: Arc<V>) -> Self {
        Self { participants, voice }
    }

    /// Apply the voice policy for the session's current interval to every
    /// participant in its voice channel.
    ///
    /// Holds the voice-channel lock for the whole pass, so joins and
    /// leaves cannot interleave with enforcement.
    pub async fn autoshush(&self, session: &Session) {
        let voice_channel = session.record.voice_channel_id.clone();
        let _voice_lock = self
            .participants
            .acquire_voice_channel_lock(&voice_channel)
            .await;

        let participants = self.participants.get_all(&voice_channel);
        if participants.is_empty() {
            return;
        }

        let focus = !session.record.current_interval.is_break();
        tracing::debug!(
            voice_channel = %voice_channel,
            count = participants.len(),
            focus,
            "autoshush pass"
        );

        let mut tasks = JoinSet::new();
        for participant in participants {
            let participants = self.participants.clone();
            let voice = self.voice.clone();
            let settings = session.settings.clone();
            tasks.spawn(async move {
                if focus {
                    enforce_focus_state(&participants, &*voice, participant, &settings).await;
                } else {
                    restore_participant(&*voice, &participant).await;
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }

    /// Restore every cached participant's original voice state, across all
    /// voice channels. Runs on engine shutdown so nobody stays muted after
    /// the process goes away.
    pub async fn restore_all(&self) {
        for voice_channel in self.participants.voice_channel_ids() {
            self.restore_voice_channel(&voice_channel).await;
        }
    }

    async fn restore_voice_channel(&self, voice_channel: &VoiceChannelId) {
        let _voice_lock = self
            .participants
            .acquire_voice_channel_lock(voice_channel)
            .await;

        let mut tasks = JoinSet::new();
        for participant in self.participants.get_all(voice_channel) {
            let voice = self.voice.clone();
            tasks.spawn(async move { restore_participant(&*voice, &participant).await });
        }
        while tasks.join_next().await.is_some() {}
    }
}

/// Focus-interval enforcement for one participant.
///
/// The live state is fetched first; if the user changed their own flags
/// since the last pass, the cached record is resynced before enforcement
/// so a later break restores the state they actually chose.
async fn enforce_focus_state<P: ParticipantRepository>(
    participants: &ParticipantsProvider<P>,
    voice: &impl VoiceStateAdapter,
    mut participant: Participant,
    settings: &SessionSettings,
) {
    match voice
        .get_voice_state(&participant.record.guild_id, &participant.record.user_id)
        .await
    {
        Ok(live) => {
            if participant.record.diverges_from(live) {
                match participants
                    .update_voice_state(
                        &participant.record.user_id,
                        &participant.record.voice_channel_id,
                        live,
                    )
                    .await
                {
                    Ok(updated) => participant = updated,
                    Err(err) => {
                        tracing::error!(
                            user_id = %participant.record.user_id,
                            error = %err,
                            "failed to resync participant voice state"
                        );
                    }
                }
            }
        }
        Err(err) => {
            tracing::error!(
                user_id = %participant.record.user_id,
                error = %err,
                "failed to fetch live voice state"
            );
        }
    }

    let enforced = VoiceState {
        mute: participant.record.is_muted || !settings.suppress_mute,
        deaf: participant.record.is_deafened || !settings.suppress_deafen,
    };
    if let Err(err) = voice
        .update_voice_state(
            &participant.record.guild_id,
            &participant.record.user_id,
            enforced.mute,
            enforced.deaf,
        )
        .await
    {
        tracing::error!(
            user_id = %participant.record.user_id,
            error = %err,
            "failed to enforce focus voice state"
        );
    }
}

async fn restore_participant(voice: &impl VoiceStateAdapter, participant: &Participant) {
    let restored = participant.record.restored_state();
    if let Err(err) = voice
        .update_voice_state(
            &participant.record.guild_id,
            &participant.record.user_id,
            restored.mute,
            restored.deaf,
        )
        .await
    {
        tracing::error!(
            user_id = %participant.record.user_id,
            error = %err,
            "failed to restore voice state"
        );
    }
}
