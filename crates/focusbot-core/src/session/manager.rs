//! Session lifecycle orchestration and per-session reconciliation loops.
//!
//! The manager owns one background task per live session. Each task ticks
//! on a fixed interval, advances the state machine when the current
//! interval has run out, persists the transition, and dispatches the
//! injected update hook with (before, after) snapshots. All loop tasks are
//! children of one process-lifetime `CancellationToken` and are joined
//! through a `TaskTracker` on shutdown.
//!
//! Starting a session is two-phase against the cache (`hold` before the
//! insert transaction, `commit` after), so concurrent start requests for
//! the same channel resolve to exactly one winner.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use focusbot_types::config::EngineConfig;
use focusbot_types::error::SessionError;
use focusbot_types::id::{GuildId, MessageId, TextChannelId, UserId, VoiceChannelId};
use focusbot_types::participant::{ParticipantRecord, VoiceState};
use focusbot_types::session::{SessionSettings, SessionStatus};
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::participant::ParticipantsProvider;
use crate::repository::{ParticipantRepository, SessionRepository};

use super::cache::{LiveSession, SessionCache};
use super::entity::Session;

/// Callback invoked after every persisted session transition with
/// (before, after) snapshots. Rendering and any further side effects live
/// behind it; the engine never knows what it does.
pub type SessionUpdateHook =
    Arc<dyn Fn(Session, Session) -> BoxFuture<'static, ()> + Send + Sync>;

/// Everything needed to start a session.
#[derive(Debug, Clone)]
pub struct StartSessionRequest {
    pub guild_id: GuildId,
    pub text_channel_id: TextChannelId,
    pub voice_channel_id: VoiceChannelId,
    pub message_id: MessageId,
    pub settings: SessionSettings,
    /// The user who started the session; auto-attached as the first
    /// participant.
    pub starter: UserId,
    /// The starter's voice state at start time, to restore during breaks.
    pub starter_voice: VoiceState,
}

/// Manager tunables.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Reconciliation loop tick.
    pub tick: Duration,
    /// Sessions whose last progress predates this are force-ended on
    /// restore instead of resumed.
    pub staleness_threshold: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(20),
            staleness_threshold: Duration::from_secs(3600),
        }
    }
}

impl From<&EngineConfig> for ManagerOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            tick: config.tick(),
            staleness_threshold: config.staleness_threshold(),
        }
    }
}

/// Orchestrates session lifecycle: start, skip, end, boot-time restore,
/// shutdown, and the background loop per live session.
pub struct SessionManager<R, P>
where
    R: SessionRepository + 'static,
    P: ParticipantRepository + 'static,
{
    cache: Arc<SessionCache>,
    repo: Arc<R>,
    participants: Arc<ParticipantsProvider<P>>,
    hook: SessionUpdateHook,
    options: ManagerOptions,
    shutdown_token: CancellationToken,
    tasks: TaskTracker,
}

impl<R, P> SessionManager<R, P>
where
    R: SessionRepository + 'static,
    P: ParticipantRepository + 'static,
{
    pub fn new(
        repo: Arc<R>,
        participants: Arc<ParticipantsProvider<P>>,
        hook: SessionUpdateHook,
        options: ManagerOptions,
    ) -> Self {
        Self {
            cache: Arc::new(SessionCache::new()),
            repo,
            participants,
            hook,
            options,
            shutdown_token: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Whether a live session exists for this text channel.
    pub fn has_session(&self, channel: &TextChannelId) -> bool {
        self.cache.has(channel)
    }

    /// Whether a live session occupies this voice channel.
    pub fn has_voice_session(&self, voice_channel: &VoiceChannelId) -> bool {
        self.cache.has_voice_channel(voice_channel)
    }

    /// Live session count for a guild.
    pub fn guild_session_count(&self, guild: &GuildId) -> u32 {
        self.cache.guild_session_count(guild)
    }

    /// Start a session and its reconciliation loop.
    ///
    /// Rejects occupied text and voice channels, reserves the key before
    /// the insert transaction (so a concurrent start for the same channel
    /// loses cleanly), and attaches the starter as the first participant.
    pub async fn start_session(
        &self,
        request: StartSessionRequest,
    ) -> Result<Session, SessionError> {
        request.settings.validate()?;

        let key = request.text_channel_id.clone();

        // Reserve both channels up front; dropping the reservation on any
        // early return below releases them.
        let reservation = self
            .cache
            .hold(key.clone(), request.voice_channel_id.clone())?;

        let record = Session::initial_record(
            request.guild_id.clone(),
            key.clone(),
            request.voice_channel_id.clone(),
            request.message_id,
            &request.settings,
            Utc::now(),
        );
        let id = self.repo.create_session(&record, &request.settings).await?;
        let session = Session::new(id, record, request.settings);

        let live = reservation.commit(session.clone(), &self.shutdown_token);

        // Attach the starter. Failure here is not fatal to the session;
        // they can rejoin the voice channel to attach.
        {
            let _voice_lock = self
                .participants
                .acquire_voice_channel_lock(&request.voice_channel_id)
                .await;
            let participant = ParticipantRecord {
                session_id: id,
                guild_id: request.guild_id,
                voice_channel_id: request.voice_channel_id,
                user_id: request.starter,
                is_muted: request.starter_voice.mute,
                is_deafened: request.starter_voice.deaf,
            };
            if let Err(err) = self.participants.insert(&participant).await {
                tracing::warn!(
                    session_id = %id,
                    user_id = %participant.user_id,
                    error = %err,
                    "failed to attach session starter"
                );
            }
        }

        self.spawn_loop(key, &live);
        tracing::info!(session_id = %id, channel = %session.record.text_channel_id, "session started");
        Ok(session)
    }

    /// Skip the rest of the current interval.
    pub async fn skip_interval(&self, channel: &TextChannelId) -> Result<Session, SessionError> {
        let live = self
            .cache
            .live(channel)
            .ok_or_else(|| SessionError::NotFound(channel.clone()))?;

        let mut guard = live.lock().await;
        let before = guard.clone();
        let mut after = guard.clone();
        after.skip(Utc::now());

        // Persist before mutating the cached value, so a storage failure
        // leaves memory and database in agreement.
        self.repo.update_session(after.id, &after.record).await?;
        *guard = after.clone();
        drop(guard);

        dispatch_hook(&self.tasks, &self.hook, &live, before, after.clone());
        Ok(after)
    }

    /// End a session: persist the final state, drop its settings, fire the
    /// hook, stop its loop, and detach its participants.
    pub async fn end_session(&self, channel: &TextChannelId) -> Result<Session, SessionError> {
        let live = self
            .cache
            .live(channel)
            .ok_or_else(|| SessionError::NotFound(channel.clone()))?;

        let (before, after) = {
            let mut guard = live.lock().await;
            let before = guard.clone();
            let mut after = guard.clone();
            after.mark_ended();
            self.repo.end_session(after.id, &after.record).await?;
            *guard = after.clone();
            (before, after)
        };

        dispatch_hook(&self.tasks, &self.hook, &live, before, after.clone());
        self.cache.remove(channel).await;
        self.detach_participants(&after.record.voice_channel_id).await;

        tracing::info!(session_id = %after.id, channel = %channel, "session ended");
        Ok(after)
    }

    /// End the session occupying `voice_channel`, if any -- the cleanup
    /// path for a voice channel that has emptied out.
    pub async fn end_session_for_voice_channel(
        &self,
        voice_channel: &VoiceChannelId,
    ) -> Result<Option<Session>, SessionError> {
        match self.cache.key_for_voice_channel(voice_channel) {
            Some(key) => self.end_session(&key).await.map(Some),
            None => Ok(None),
        }
    }

    /// Load persisted Running/Paused sessions on process start.
    ///
    /// Sessions stale past the configured threshold are force-ended
    /// (abandoned while we were down); everything else is fast-forwarded
    /// through any missed transitions and resumed. The hook fires once per
    /// restored or ended session.
    pub async fn restore_sessions(&self) -> Result<(), SessionError> {
        let rows = self
            .repo
            .get_sessions_by_status(&[SessionStatus::Running, SessionStatus::Paused])
            .await?;

        let mut restored = 0u32;
        let mut abandoned = 0u32;
        for (id, record) in rows {
            let settings = match self.repo.get_settings(id).await {
                Ok(settings) => settings,
                Err(err) => {
                    tracing::error!(session_id = %id, error = %err, "failed to load settings; skipping restore");
                    continue;
                }
            };
            let mut session = Session::new(id, record, settings);
            let original = session.clone();
            let now = Utc::now();

            if session.is_stale(now, self.options.staleness_threshold) {
                session.mark_ended();
                if let Err(err) = self.repo.end_session(id, &session.record).await {
                    tracing::error!(session_id = %id, error = %err, "failed to end stale session");
                    continue;
                }
                let hook = self.hook.clone();
                self.tasks.spawn(async move { hook(original, session).await });
                abandoned += 1;
                continue;
            }

            let steps = session.catch_up(now);
            if steps > 0 {
                if let Err(err) = self.repo.update_session(id, &session.record).await {
                    tracing::error!(session_id = %id, error = %err, "failed to persist catch-up");
                    continue;
                }
                tracing::debug!(session_id = %id, steps, "caught up missed intervals");
            }

            let key = session.record.text_channel_id.clone();
            let voice_channel = session.record.voice_channel_id.clone();
            let reservation = match self.cache.hold(key.clone(), voice_channel) {
                Ok(reservation) => reservation,
                Err(err) => {
                    tracing::warn!(session_id = %id, error = %err, "duplicate session key during restore");
                    continue;
                }
            };
            let live = reservation.commit(session.clone(), &self.shutdown_token);
            self.spawn_loop(key, &live);
            dispatch_hook(&self.tasks, &self.hook, &live, original, session);
            restored += 1;
        }

        tracing::info!(restored, abandoned, "session restore complete");
        Ok(())
    }

    /// Cancel every session loop and block until all background tasks
    /// (loops and in-flight hook invocations) have exited.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!("session manager shut down");
    }

    fn spawn_loop(&self, key: TextChannelId, live: &LiveSession) {
        let cache = self.cache.clone();
        let repo = self.repo.clone();
        let hook = self.hook.clone();
        let tasks = self.tasks.clone();
        let cancel = live.cancel_token().clone();
        let tick = self.options.tick;
        self.tasks.spawn(run_reconciliation_loop(
            cache, repo, hook, tasks, key, cancel, tick,
        ));
    }

    async fn detach_participants(&self, voice_channel: &VoiceChannelId) {
        let _voice_lock = self
            .participants
            .acquire_voice_channel_lock(voice_channel)
            .await;
        for participant in self.participants.get_all(voice_channel) {
            if let Err(err) = self.participants.delete(participant.id).await {
                tracing::error!(
                    participant_id = %participant.id,
                    voice_channel = %voice_channel,
                    error = %err,
                    "failed to detach participant"
                );
            }
        }
    }
}

/// One session's background loop: tick, catch the interval up if it has
/// run out, persist, dispatch the hook. Exits on cancellation or when the
/// key vanishes from the cache.
async fn run_reconciliation_loop<R: SessionRepository>(
    cache: Arc<SessionCache>,
    repo: Arc<R>,
    hook: SessionUpdateHook,
    tasks: TaskTracker,
    key: TextChannelId,
    cancel: CancellationToken,
    tick: Duration,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(tick) => {}
        }

        let Some(live) = cache.live(&key) else {
            tracing::warn!(channel = %key, "session vanished from cache; stopping loop");
            break;
        };

        let mut guard = live.lock().await;
        // An ended (or paused) session may still be cached for a moment
        // while its removal is in flight; never advance it.
        if guard.record.status != SessionStatus::Running {
            continue;
        }
        let now = Utc::now();
        if guard.time_remaining(now) > chrono::Duration::zero() {
            continue;
        }

        let before = guard.clone();
        let mut after = guard.clone();
        after.advance(now, true);

        // Persist before mutating the cached value; on failure memory
        // still holds the old record and the next tick retries the same
        // transition.
        if let Err(err) = repo.update_session(after.id, &after.record).await {
            tracing::error!(session_id = %after.id, error = %err, "failed to persist interval transition");
            continue;
        }
        *guard = after.clone();
        drop(guard);

        tracing::debug!(
            session_id = %after.id,
            interval = %after.record.current_interval,
            "interval advanced"
        );
        dispatch_hook(&tasks, &hook, &live, before, after);
    }
    tracing::debug!(channel = %key, "reconciliation loop stopped");
}

/// Fire the update hook asynchronously, gated per session: if the previous
/// invocation is still running the new one is skipped, not queued. The
/// next transition's hook call reflects current state, so bounded
/// staleness is acceptable here.
fn dispatch_hook(
    tasks: &TaskTracker,
    hook: &SessionUpdateHook,
    live: &LiveSession,
    before: Session,
    after: Session,
) {
    let Ok(permit) = live.hook_gate().try_lock_owned() else {
        tracing::debug!(
            session_id = %after.id,
            "previous update hook still running; skipping"
        );
        return;
    };
    let hook = hook.clone();
    tasks.spawn(async move {
        let _permit = permit;
        hook(before, after).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use focusbot_types::error::RepositoryError;
    use focusbot_types::id::{ParticipantId, SessionId};
    use focusbot_types::session::{Interval, SessionRecord};
    use futures_util::FutureExt;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct MockSessionRepo {
        sessions: StdMutex<HashMap<i64, SessionRecord>>,
        settings: StdMutex<HashMap<i64, SessionSettings>>,
        next_id: AtomicI64,
        fail_create: AtomicBool,
        fail_update: AtomicBool,
    }

    impl MockSessionRepo {
        fn session(&self, id: SessionId) -> Option<SessionRecord> {
            self.sessions.lock().unwrap().get(&id.0).cloned()
        }

        fn has_settings(&self, id: SessionId) -> bool {
            self.settings.lock().unwrap().contains_key(&id.0)
        }

        fn seed(&self, record: SessionRecord, settings: SessionSettings) -> SessionId {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            self.sessions.lock().unwrap().insert(id, record);
            self.settings.lock().unwrap().insert(id, settings);
            SessionId(id)
        }
    }

    impl SessionRepository for MockSessionRepo {
        async fn insert_session(
            &self,
            record: &SessionRecord,
        ) -> Result<SessionId, RepositoryError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            self.sessions.lock().unwrap().insert(id, record.clone());
            Ok(SessionId(id))
        }

        async fn update_session(
            &self,
            id: SessionId,
            record: &SessionRecord,
        ) -> Result<(), RepositoryError> {
            if self.fail_update.load(Ordering::SeqCst) {
                return Err(RepositoryError::Query("injected failure".to_string()));
            }
            self.sessions.lock().unwrap().insert(id.0, record.clone());
            Ok(())
        }

        async fn get_session(
            &self,
            id: SessionId,
        ) -> Result<Option<SessionRecord>, RepositoryError> {
            Ok(self.session(id))
        }

        async fn delete_session(&self, id: SessionId) -> Result<(), RepositoryError> {
            self.sessions.lock().unwrap().remove(&id.0);
            Ok(())
        }

        async fn get_sessions_by_status(
            &self,
            statuses: &[SessionStatus],
        ) -> Result<Vec<(SessionId, SessionRecord)>, RepositoryError> {
            let mut rows: Vec<_> = self
                .sessions
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, record)| statuses.contains(&record.status))
                .map(|(id, record)| (SessionId(*id), record.clone()))
                .collect();
            rows.sort_by_key(|(id, _)| id.0);
            Ok(rows)
        }

        async fn insert_settings(
            &self,
            session_id: SessionId,
            settings: &SessionSettings,
        ) -> Result<(), RepositoryError> {
            self.settings
                .lock()
                .unwrap()
                .insert(session_id.0, settings.clone());
            Ok(())
        }

        async fn get_settings(
            &self,
            session_id: SessionId,
        ) -> Result<SessionSettings, RepositoryError> {
            self.settings
                .lock()
                .unwrap()
                .get(&session_id.0)
                .cloned()
                .ok_or(RepositoryError::NotFound)
        }

        async fn delete_settings(&self, session_id: SessionId) -> Result<(), RepositoryError> {
            self.settings.lock().unwrap().remove(&session_id.0);
            Ok(())
        }

        async fn create_session(
            &self,
            record: &SessionRecord,
            settings: &SessionSettings,
        ) -> Result<SessionId, RepositoryError> {
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(RepositoryError::Query("injected failure".to_string()));
            }
            let id = self.insert_session(record).await?;
            self.insert_settings(id, settings).await?;
            Ok(id)
        }

        async fn end_session(
            &self,
            id: SessionId,
            record: &SessionRecord,
        ) -> Result<(), RepositoryError> {
            self.update_session(id, record).await?;
            self.delete_settings(id).await
        }
    }

    #[derive(Default)]
    struct MockParticipantRepo {
        rows: StdMutex<HashMap<i64, ParticipantRecord>>,
        next_id: AtomicI64,
    }

    impl ParticipantRepository for MockParticipantRepo {
        async fn insert_participant(
            &self,
            record: &ParticipantRecord,
        ) -> Result<ParticipantId, RepositoryError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            self.rows.lock().unwrap().insert(id, record.clone());
            Ok(ParticipantId(id))
        }

        async fn update_participant(
            &self,
            id: ParticipantId,
            record: &ParticipantRecord,
        ) -> Result<(), RepositoryError> {
            self.rows.lock().unwrap().insert(id.0, record.clone());
            Ok(())
        }

        async fn delete_participant(
            &self,
            id: ParticipantId,
        ) -> Result<ParticipantRecord, RepositoryError> {
            self.rows
                .lock()
                .unwrap()
                .remove(&id.0)
                .ok_or(RepositoryError::NotFound)
        }

        async fn get_all_participants(
            &self,
        ) -> Result<Vec<(ParticipantId, ParticipantRecord)>, RepositoryError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .map(|(id, record)| (ParticipantId(*id), record.clone()))
                .collect())
        }

        async fn get_participant_by_user(
            &self,
            user_id: &UserId,
        ) -> Result<Option<(ParticipantId, ParticipantRecord)>, RepositoryError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|(_, record)| record.user_id == *user_id)
                .map(|(id, record)| (ParticipantId(*id), record.clone())))
        }
    }

    type Harness = (
        Arc<SessionManager<MockSessionRepo, MockParticipantRepo>>,
        Arc<MockSessionRepo>,
        Arc<ParticipantsProvider<MockParticipantRepo>>,
        mpsc::UnboundedReceiver<(Session, Session)>,
    );

    fn harness(options: ManagerOptions) -> Harness {
        let repo = Arc::new(MockSessionRepo::default());
        let participants = Arc::new(ParticipantsProvider::new(Arc::new(
            MockParticipantRepo::default(),
        )));
        let (tx, rx) = mpsc::unbounded_channel();
        let hook: SessionUpdateHook = Arc::new(move |before, after| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((before, after));
            }
            .boxed()
        });
        let manager = Arc::new(SessionManager::new(
            repo.clone(),
            participants.clone(),
            hook,
            options,
        ));
        (manager, repo, participants, rx)
    }

    fn quick_settings() -> SessionSettings {
        SessionSettings {
            focus: Duration::from_millis(40),
            short_break: Duration::from_millis(40),
            long_break: Duration::from_millis(40),
            intervals_per_long_break: 2,
            suppress_mute: false,
            suppress_deafen: false,
        }
    }

    fn request(text: &str, voice: &str) -> StartSessionRequest {
        StartSessionRequest {
            guild_id: GuildId::new("g1"),
            text_channel_id: TextChannelId::new(text),
            voice_channel_id: VoiceChannelId::new(voice),
            message_id: MessageId::new("m1"),
            settings: SessionSettings::default(),
            starter: UserId::new("starter"),
            starter_voice: VoiceState::default(),
        }
    }

    #[tokio::test]
    async fn start_session_registers_and_attaches_starter() {
        let (manager, repo, participants, _rx) = harness(ManagerOptions::default());

        let session = manager.start_session(request("tc1", "vc1")).await.unwrap();

        assert!(manager.has_session(&TextChannelId::new("tc1")));
        assert!(manager.has_voice_session(&VoiceChannelId::new("vc1")));
        assert_eq!(manager.guild_session_count(&GuildId::new("g1")), 1);
        assert_eq!(session.record.current_interval, Interval::Focus);
        assert!(repo.has_settings(session.id));

        let starter = participants
            .get(&UserId::new("starter"), &VoiceChannelId::new("vc1"))
            .unwrap();
        assert_eq!(starter.record.session_id, session.id);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn start_session_rejects_duplicate_channel() {
        let (manager, _, _, _rx) = harness(ManagerOptions::default());

        manager.start_session(request("tc1", "vc1")).await.unwrap();
        let err = manager.start_session(request("tc1", "vc2")).await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadyExists(_)));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn start_session_rejects_occupied_voice_channel() {
        let (manager, _, _, _rx) = harness(ManagerOptions::default());

        manager.start_session(request("tc1", "vc1")).await.unwrap();
        let err = manager.start_session(request("tc2", "vc1")).await.unwrap_err();
        assert!(matches!(err, SessionError::VoiceChannelBusy(_)));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn start_session_rejects_invalid_settings() {
        let (manager, _, _, _rx) = harness(ManagerOptions::default());

        let mut req = request("tc1", "vc1");
        req.settings.intervals_per_long_break = 0;
        let err = manager.start_session(req).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidSettings(_)));
        assert!(!manager.has_session(&TextChannelId::new("tc1")));
    }

    #[tokio::test]
    async fn failed_transaction_releases_hold() {
        let (manager, repo, _, _rx) = harness(ManagerOptions::default());
        repo.fail_create.store(true, Ordering::SeqCst);

        let err = manager.start_session(request("tc1", "vc1")).await.unwrap_err();
        assert!(matches!(err, SessionError::Storage(_)));
        assert!(!manager.has_session(&TextChannelId::new("tc1")));

        // The key is free again for the next attempt.
        repo.fail_create.store(false, Ordering::SeqCst);
        manager.start_session(request("tc1", "vc1")).await.unwrap();

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_starts_yield_one_winner() {
        let (manager, _, _, _rx) = harness(ManagerOptions::default());
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let manager = manager.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                manager.start_session(request("tc1", "vc1")).await
            }));
        }

        let mut ok = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(SessionError::AlreadyExists(_)) | Err(SessionError::VoiceChannelBusy(_)) => {
                    conflicts += 1
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 1);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_starts_for_same_voice_channel_yield_one_winner() {
        let (manager, _, _, _rx) = harness(ManagerOptions::default());
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let mut handles = Vec::new();
        for text in ["tc1", "tc2"] {
            let manager = manager.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                manager.start_session(request(text, "vc1")).await
            }));
        }

        let mut winners = Vec::new();
        let mut busy = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(session) => winners.push(session),
                Err(SessionError::VoiceChannelBusy(_)) => busy += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(winners.len(), 1);
        assert_eq!(busy, 1);

        // The voice index maps to the winner; ending it clears the mapping
        // rather than leaving a dangling entry behind.
        let winner_key = winners[0].record.text_channel_id.clone();
        assert!(manager.has_voice_session(&VoiceChannelId::new("vc1")));
        manager.end_session(&winner_key).await.unwrap();
        assert!(!manager.has_voice_session(&VoiceChannelId::new("vc1")));

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn skip_interval_advances_without_credit() {
        let (manager, repo, _, mut rx) = harness(ManagerOptions::default());
        let session = manager.start_session(request("tc1", "vc1")).await.unwrap();

        let skipped = manager
            .skip_interval(&TextChannelId::new("tc1"))
            .await
            .unwrap();

        assert_eq!(skipped.record.current_interval, Interval::ShortBreak);
        assert_eq!(skipped.record.stats.completed_focus, 0);
        assert_eq!(skipped.record.stats.skipped, 1);

        let persisted = repo.session(session.id).unwrap();
        assert_eq!(persisted.current_interval, Interval::ShortBreak);

        let (before, after) = rx.recv().await.unwrap();
        assert_eq!(before.record.current_interval, Interval::Focus);
        assert_eq!(after.record.current_interval, Interval::ShortBreak);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn skip_interval_unknown_channel_is_not_found() {
        let (manager, _, _, _rx) = harness(ManagerOptions::default());
        let err = manager
            .skip_interval(&TextChannelId::new("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn end_session_persists_and_detaches() {
        let (manager, repo, participants, mut rx) = harness(ManagerOptions::default());
        let session = manager.start_session(request("tc1", "vc1")).await.unwrap();

        let ended = manager.end_session(&TextChannelId::new("tc1")).await.unwrap();

        assert_eq!(ended.record.status, SessionStatus::Ended);
        assert!(!manager.has_session(&TextChannelId::new("tc1")));
        assert!(!manager.has_voice_session(&VoiceChannelId::new("vc1")));
        assert_eq!(repo.session(session.id).unwrap().status, SessionStatus::Ended);
        assert!(!repo.has_settings(session.id));
        assert!(participants.get_all(&VoiceChannelId::new("vc1")).is_empty());

        let (_, after) = rx.recv().await.unwrap();
        assert_eq!(after.record.status, SessionStatus::Ended);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn reconciliation_loop_advances_expired_interval() {
        let options = ManagerOptions {
            tick: Duration::from_millis(10),
            ..Default::default()
        };
        let (manager, _, _, mut rx) = harness(options);

        let mut req = request("tc1", "vc1");
        req.settings = quick_settings();
        manager.start_session(req).await.unwrap();

        let (before, after) =
            tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("loop never advanced")
                .unwrap();
        assert_eq!(before.record.current_interval, Interval::Focus);
        assert_eq!(after.record.current_interval, Interval::ShortBreak);
        assert_eq!(after.record.stats.completed_focus, 1);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn loop_retries_transition_after_persist_failure() {
        let options = ManagerOptions {
            tick: Duration::from_millis(10),
            ..Default::default()
        };
        let (manager, repo, _, mut rx) = harness(options);
        repo.fail_update.store(true, Ordering::SeqCst);

        let mut req = request("tc1", "vc1");
        req.settings = quick_settings();
        let session = manager.start_session(req).await.unwrap();

        // Several ticks hit the persistence failure: no hook fires and
        // neither memory nor the database moves past the focus interval.
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(
            repo.session(session.id).unwrap().current_interval,
            Interval::Focus
        );

        // Once storage recovers the next tick lands the same transition.
        repo.fail_update.store(false, Ordering::SeqCst);
        let (before, after) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("transition never persisted")
            .unwrap();
        assert_eq!(before.record.current_interval, Interval::Focus);
        assert_eq!(after.record.current_interval, Interval::ShortBreak);
        assert_eq!(
            repo.session(session.id).unwrap().current_interval,
            Interval::ShortBreak
        );

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn loop_never_advances_ended_session() {
        let options = ManagerOptions {
            tick: Duration::from_millis(10),
            ..Default::default()
        };
        let (manager, repo, _, mut rx) = harness(options);

        let mut req = request("tc1", "vc1");
        req.settings = quick_settings();
        let session = manager.start_session(req).await.unwrap();

        // Mark the cached session ended without removing it, mimicking the
        // window where the final state is persisted but removal from the
        // cache has not happened yet.
        {
            let live = manager.cache.live(&TextChannelId::new("tc1")).unwrap();
            let mut guard = live.lock().await;
            guard.mark_ended();
        }

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(repo.session(session.id).unwrap().stats.completed_focus, 0);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn end_session_stops_the_loop() {
        let options = ManagerOptions {
            tick: Duration::from_millis(10),
            ..Default::default()
        };
        let (manager, _, _, mut rx) = harness(options);

        let mut req = request("tc1", "vc1");
        req.settings = quick_settings();
        manager.start_session(req).await.unwrap();
        manager.end_session(&TextChannelId::new("tc1")).await.unwrap();

        // Consume the end hook, then expect silence: a still-running loop
        // would advance the 40ms focus interval several times over.
        let (_, after) = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("end hook never fired")
            .unwrap();
        assert_eq!(after.record.status, SessionStatus::Ended);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn end_session_for_voice_channel_resolves_key() {
        let (manager, _, _, _rx) = harness(ManagerOptions::default());
        manager.start_session(request("tc1", "vc1")).await.unwrap();

        let ended = manager
            .end_session_for_voice_channel(&VoiceChannelId::new("vc1"))
            .await
            .unwrap();
        assert!(ended.is_some());
        assert!(!manager.has_session(&TextChannelId::new("tc1")));

        let none = manager
            .end_session_for_voice_channel(&VoiceChannelId::new("vc1"))
            .await
            .unwrap();
        assert!(none.is_none());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn restore_resumes_fresh_session_with_catch_up() {
        let (manager, repo, _, mut rx) = harness(ManagerOptions::default());

        let settings = SessionSettings {
            focus: Duration::from_secs(60),
            short_break: Duration::from_secs(60),
            long_break: Duration::from_secs(60),
            intervals_per_long_break: 2,
            suppress_mute: false,
            suppress_deafen: false,
        };
        // 90 seconds into a 60-second focus interval: one missed transition.
        let mut record = Session::initial_record(
            GuildId::new("g1"),
            TextChannelId::new("tc1"),
            VoiceChannelId::new("vc1"),
            MessageId::new("m1"),
            &settings,
            Utc::now() - chrono::Duration::seconds(90),
        );
        record.status = SessionStatus::Running;
        let id = repo.seed(record, settings);

        manager.restore_sessions().await.unwrap();

        assert!(manager.has_session(&TextChannelId::new("tc1")));
        let persisted = repo.session(id).unwrap();
        assert_eq!(persisted.current_interval, Interval::ShortBreak);
        assert_eq!(persisted.stats.completed_focus, 1);

        let (original, restored) = rx.recv().await.unwrap();
        assert_eq!(original.record.current_interval, Interval::Focus);
        assert_eq!(restored.record.current_interval, Interval::ShortBreak);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn restore_force_ends_stale_session() {
        let (manager, repo, _, mut rx) = harness(ManagerOptions::default());

        let settings = SessionSettings::default();
        // Last progress two hours ago, threshold one hour: abandoned.
        let record = Session::initial_record(
            GuildId::new("g1"),
            TextChannelId::new("tc1"),
            VoiceChannelId::new("vc1"),
            MessageId::new("m1"),
            &settings,
            Utc::now() - chrono::Duration::hours(2),
        );
        let id = repo.seed(record, settings);

        manager.restore_sessions().await.unwrap();

        assert!(!manager.has_session(&TextChannelId::new("tc1")));
        assert_eq!(repo.session(id).unwrap().status, SessionStatus::Ended);
        assert!(!repo.has_settings(id));

        let (original, ended) = rx.recv().await.unwrap();
        assert_eq!(original.record.status, SessionStatus::Running);
        assert_eq!(ended.record.status, SessionStatus::Ended);
        // Exactly one hook invocation for the abandoned session.
        assert!(rx.try_recv().is_err());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn restore_leaves_paused_session_untouched() {
        let (manager, repo, _, _rx) = harness(ManagerOptions::default());

        let settings = SessionSettings::default();
        let mut record = Session::initial_record(
            GuildId::new("g1"),
            TextChannelId::new("tc1"),
            VoiceChannelId::new("vc1"),
            MessageId::new("m1"),
            &settings,
            Utc::now() - chrono::Duration::minutes(50),
        );
        record.status = SessionStatus::Paused;
        let id = repo.seed(record, settings);

        manager.restore_sessions().await.unwrap();

        assert!(manager.has_session(&TextChannelId::new("tc1")));
        // Paused sessions never catch up.
        let persisted = repo.session(id).unwrap();
        assert_eq!(persisted.current_interval, Interval::Focus);
        assert_eq!(persisted.stats.completed_focus, 0);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_all_loops() {
        let options = ManagerOptions {
            tick: Duration::from_millis(10),
            ..Default::default()
        };
        let (manager, _, _, mut rx) = harness(options);

        let mut req = request("tc1", "vc1");
        req.settings = quick_settings();
        manager.start_session(req).await.unwrap();
        let mut req2 = request("tc2", "vc2");
        req2.settings = quick_settings();
        manager.start_session(req2).await.unwrap();

        manager.shutdown().await;

        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }
}
