//! Cached participant lists, keyed by voice channel.
//!
//! The cache mirrors the `participants` table; every mutation persists
//! first and touches the cache only on success, so the two never disagree
//! in the cache's favor. Mutations are not internally serialized: callers
//! doing a read-modify-write sequence (join, leave, autoshush) hold the
//! per-voice-channel lock from [`ParticipantsProvider::acquire_voice_channel_lock`]
//! around it. The lock table is lazy; a voice channel's mutex is created on
//! first acquisition and shared thereafter.

use std::sync::Arc;

use dashmap::DashMap;
use focusbot_types::error::{ParticipantError, RepositoryError};
use focusbot_types::id::{ParticipantId, UserId, VoiceChannelId};
use focusbot_types::participant::{ParticipantRecord, VoiceState};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::repository::ParticipantRepository;

/// A cached participant: the persisted record plus its row id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub record: ParticipantRecord,
}

/// Write-through cache of session participants.
pub struct ParticipantsProvider<P: ParticipantRepository> {
    repo: Arc<P>,
    cache: DashMap<VoiceChannelId, Vec<Participant>>,
    locks: DashMap<VoiceChannelId, Arc<Mutex<()>>>,
}

impl<P: ParticipantRepository> ParticipantsProvider<P> {
    pub fn new(repo: Arc<P>) -> Self {
        Self {
            repo,
            cache: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Acquire the serialization lock for one voice channel.
    ///
    /// The guard is owned, so it can cross await points and task
    /// boundaries. Unrelated voice channels are never blocked.
    pub async fn acquire_voice_channel_lock(
        &self,
        voice_channel: &VoiceChannelId,
    ) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(voice_channel.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        lock.lock_owned().await
    }

    /// Attach a participant: persist the record, then cache it.
    ///
    /// A user already attached to the voice channel (in cache or, via the
    /// table's unique constraint, in storage) is rejected.
    pub async fn insert(
        &self,
        record: &ParticipantRecord,
    ) -> Result<Participant, ParticipantError> {
        if self
            .get(&record.user_id, &record.voice_channel_id)
            .is_some()
        {
            return Err(ParticipantError::AlreadyAttached {
                user: record.user_id.clone(),
                voice_channel: record.voice_channel_id.clone(),
            });
        }

        let id = match self.repo.insert_participant(record).await {
            Ok(id) => id,
            Err(RepositoryError::Conflict(_)) => {
                return Err(ParticipantError::AlreadyAttached {
                    user: record.user_id.clone(),
                    voice_channel: record.voice_channel_id.clone(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        let participant = Participant {
            id,
            record: record.clone(),
        };
        self.cache
            .entry(record.voice_channel_id.clone())
            .or_default()
            .push(participant.clone());
        tracing::debug!(
            participant_id = %id,
            user_id = %record.user_id,
            voice_channel = %record.voice_channel_id,
            "participant attached"
        );
        Ok(participant)
    }

    /// Detach a participant: persist the deletion, then evict from cache.
    /// Returns the deleted record.
    pub async fn delete(
        &self,
        id: ParticipantId,
    ) -> Result<ParticipantRecord, ParticipantError> {
        let record = self.repo.delete_participant(id).await?;

        if let Some(mut entry) = self.cache.get_mut(&record.voice_channel_id) {
            entry.retain(|participant| participant.id != id);
            let emptied = entry.is_empty();
            drop(entry);
            if emptied {
                self.cache
                    .remove_if(&record.voice_channel_id, |_, list| list.is_empty());
            }
        }
        tracing::debug!(
            participant_id = %id,
            user_id = %record.user_id,
            voice_channel = %record.voice_channel_id,
            "participant detached"
        );
        Ok(record)
    }

    /// Resync a participant's stored mute/deafen flags to an externally
    /// observed voice state.
    pub async fn update_voice_state(
        &self,
        user: &UserId,
        voice_channel: &VoiceChannelId,
        observed: VoiceState,
    ) -> Result<Participant, ParticipantError> {
        let cached = self.get(user, voice_channel).ok_or_else(|| {
            ParticipantError::NotFound {
                user: user.clone(),
                voice_channel: voice_channel.clone(),
            }
        })?;

        let mut updated = cached.clone();
        updated.record.is_muted = observed.mute;
        updated.record.is_deafened = observed.deaf;
        self.repo
            .update_participant(updated.id, &updated.record)
            .await?;

        if let Some(mut entry) = self.cache.get_mut(voice_channel) {
            if let Some(slot) = entry
                .iter_mut()
                .find(|participant| participant.id == updated.id)
            {
                *slot = updated.clone();
            }
        }
        Ok(updated)
    }

    /// The cached participant for a (user, voice channel) pair, if any.
    pub fn get(&self, user: &UserId, voice_channel: &VoiceChannelId) -> Option<Participant> {
        self.cache.get(voice_channel)?.iter().find_map(|participant| {
            (participant.record.user_id == *user).then(|| participant.clone())
        })
    }

    /// Snapshot of a voice channel's participant list.
    pub fn get_all(&self, voice_channel: &VoiceChannelId) -> Vec<Participant> {
        self.cache
            .get(voice_channel)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// Every voice channel with at least one cached participant.
    pub fn voice_channel_ids(&self) -> Vec<VoiceChannelId> {
        self.cache.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Cached participant count for a voice channel.
    pub fn participant_count(&self, voice_channel: &VoiceChannelId) -> usize {
        self.cache
            .get(voice_channel)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    /// Load every persisted participant into the cache on process start.
    ///
    /// Records are trusted as-is; live voice states are reconciled lazily
    /// by the next autoshush pass.
    pub async fn restore_cache(&self) -> Result<usize, ParticipantError> {
        let rows = self.repo.get_all_participants().await?;
        let count = rows.len();
        for (id, record) in rows {
            self.cache
                .entry(record.voice_channel_id.clone())
                .or_default()
                .push(Participant { id, record });
        }
        tracing::info!(count, "participant cache restored");
        Ok(count)
    }
}
