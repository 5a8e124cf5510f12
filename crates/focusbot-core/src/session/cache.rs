//! Concurrency-safe store of live sessions keyed by text channel.
//!
//! Built on `DashMap` (lock-striped) rather than a mutex table behind an
//! outer mutex: slot lookup never blocks on unrelated keys, and the per-key
//! critical section is an `Arc<tokio::sync::Mutex<Session>>` owned by the
//! slot. Each live slot also owns the `CancellationToken` that stops its
//! reconciliation loop and the gate mutex that bounds hook fan-out.
//!
//! Starting a session is two-phase: [`SessionCache::hold`] reserves both the
//! text-channel key and the voice-channel index entry before the database
//! transaction commits, so a concurrent start for either channel sees it as
//! occupied while no session value exists yet. The returned [`Reservation`]
//! releases both on drop unless it is committed.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use focusbot_types::error::SessionError;
use focusbot_types::id::{GuildId, TextChannelId, VoiceChannelId};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use super::entity::Session;

/// Handles associated with one cached session; not part of the durable
/// record, alive only as long as the slot.
#[derive(Clone)]
pub struct LiveSession {
    session: Arc<Mutex<Session>>,
    cancel: CancellationToken,
    /// Try-locked around update-hook dispatch so overlapping invocations
    /// are skipped rather than queued.
    hook_gate: Arc<Mutex<()>>,
}

impl LiveSession {
    /// Lock the session for a read-modify-write sequence.
    pub async fn lock(&self) -> OwnedMutexGuard<Session> {
        self.session.clone().lock_owned().await
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn hook_gate(&self) -> Arc<Mutex<()>> {
        self.hook_gate.clone()
    }
}

enum Slot {
    /// Key reserved ahead of a pending start transaction.
    Held,
    Live(LiveSession),
}

/// Keyed store of live sessions with derived indices.
#[derive(Default)]
pub struct SessionCache {
    slots: DashMap<TextChannelId, Slot>,
    /// Which text channel's session occupies each voice channel. One entry
    /// per voice channel, reserved together with the slot in
    /// [`SessionCache::hold`].
    voice_index: DashMap<VoiceChannelId, TextChannelId>,
    guild_counts: DashMap<GuildId, u32>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `key` and `voice_channel` ahead of the start transaction.
    ///
    /// Fails if either is already reserved or live; the voice-index entry
    /// is claimed here, not at commit, so two concurrent starts for the
    /// same voice channel under different keys resolve to one winner. Drop
    /// the reservation to release both (transaction failure); call
    /// [`Reservation::commit`] to register the session.
    pub fn hold(
        &self,
        key: TextChannelId,
        voice_channel: VoiceChannelId,
    ) -> Result<Reservation<'_>, SessionError> {
        match self.slots.entry(key.clone()) {
            Entry::Occupied(_) => return Err(SessionError::AlreadyExists(key)),
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Held);
            }
        }

        match self.voice_index.entry(voice_channel.clone()) {
            Entry::Occupied(_) => {
                self.slots.remove(&key);
                return Err(SessionError::VoiceChannelBusy(voice_channel));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(key.clone());
            }
        }

        Ok(Reservation {
            cache: self,
            key: Some(key),
            voice_channel,
        })
    }

    /// Lock and return the session for `key`, if live.
    pub async fn get(&self, key: &TextChannelId) -> Option<OwnedMutexGuard<Session>> {
        let live = self.live(key)?;
        Some(live.lock().await)
    }

    /// The cached handles for `key`, if live.
    ///
    /// The dashmap shard guard is dropped before returning, so the result
    /// is safe to hold across await points.
    pub fn live(&self, key: &TextChannelId) -> Option<LiveSession> {
        let slot = self.slots.get(key)?;
        match slot.value() {
            Slot::Live(live) => Some(live.clone()),
            Slot::Held => None,
        }
    }

    /// Whether `key` is reserved or live.
    pub fn has(&self, key: &TextChannelId) -> bool {
        self.slots.contains_key(key)
    }

    /// Whether this voice channel is reserved or occupied by a session.
    pub fn has_voice_channel(&self, id: &VoiceChannelId) -> bool {
        self.voice_index.contains_key(id)
    }

    /// The session key occupying a voice channel, if any.
    pub fn key_for_voice_channel(&self, id: &VoiceChannelId) -> Option<TextChannelId> {
        self.voice_index.get(id).map(|entry| entry.value().clone())
    }

    /// Live session count for a guild.
    pub fn guild_session_count(&self, guild_id: &GuildId) -> u32 {
        self.guild_counts
            .get(guild_id)
            .map(|entry| *entry.value())
            .unwrap_or(0)
    }

    /// Remove `key`, cancelling its reconciliation loop.
    ///
    /// Waits for any in-flight critical section on the session to finish,
    /// deletes the index entries, and returns the final snapshot.
    pub async fn remove(&self, key: &TextChannelId) -> Option<Session> {
        let (_, slot) = self.slots.remove(key)?;
        let Slot::Live(live) = slot else {
            return None;
        };

        live.cancel.cancel();
        let snapshot = live.lock().await.clone();

        self.voice_index.remove(&snapshot.record.voice_channel_id);
        self.decrement_guild(&snapshot.record.guild_id);
        Some(snapshot)
    }

    fn decrement_guild(&self, guild_id: &GuildId) {
        if let Entry::Occupied(mut occupied) = self.guild_counts.entry(guild_id.clone()) {
            if *occupied.get() <= 1 {
                occupied.remove();
            } else {
                *occupied.get_mut() -= 1;
            }
        }
    }
}

/// A reserved (text channel, voice channel) pair. Commit it to register the
/// session; drop it to release the reservation.
pub struct Reservation<'a> {
    cache: &'a SessionCache,
    key: Option<TextChannelId>,
    voice_channel: VoiceChannelId,
}

impl Reservation<'_> {
    /// Register `session` under the reserved key and update the indices.
    ///
    /// The loop token is a child of `parent`: cancelling the parent (manager
    /// shutdown) cancels every session's loop.
    ///
    /// # Panics
    ///
    /// Panics if the reserved slot was tampered with -- a programming
    /// invariant violation, not a runtime condition.
    pub fn commit(mut self, session: Session, parent: &CancellationToken) -> LiveSession {
        let key = self.key.take().expect("reservation already consumed");
        let guild_id = session.record.guild_id.clone();

        let live = LiveSession {
            session: Arc::new(Mutex::new(session)),
            cancel: parent.child_token(),
            hook_gate: Arc::new(Mutex::new(())),
        };

        let previous = self
            .cache
            .slots
            .insert(key.clone(), Slot::Live(live.clone()));
        assert!(
            matches!(previous, Some(Slot::Held)),
            "session cache slot for {key} was not held"
        );

        *self.cache.guild_counts.entry(guild_id).or_insert(0) += 1;

        live
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        // Only an uncommitted reservation still carries its key.
        if let Some(key) = self.key.take() {
            if let Entry::Occupied(occupied) = self.cache.slots.entry(key.clone()) {
                if matches!(occupied.get(), Slot::Held) {
                    occupied.remove();
                }
            }
            self.cache
                .voice_index
                .remove_if(&self.voice_channel, |_, mapped| *mapped == key);
        }
    }
}
