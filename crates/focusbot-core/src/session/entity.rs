//! The session entity and its interval state machine.
//!
//! Pure logic: every time-dependent method takes `now` explicitly, so the
//! reconciliation loop, boot-time catch-up, and tests all share one
//! deterministic code path. Catch-up after downtime is just `advance`
//! applied repeatedly -- each step moves `interval_started_at` forward by
//! the previous interval's full duration, so N missed transitions replay
//! exactly.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use focusbot_types::id::{GuildId, MessageId, SessionId, TextChannelId, VoiceChannelId};
use focusbot_types::session::{
    Interval, SessionRecord, SessionSettings, SessionStats, SessionStatus,
};

fn to_chrono(d: std::time::Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or(ChronoDuration::MAX)
}

/// One live focus session: persisted record + immutable settings.
///
/// Owned exclusively by its cache slot while live; values handed to hooks
/// and callers are snapshots (`Clone`), never shared mutable state.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub record: SessionRecord,
    pub settings: SessionSettings,
}

impl Session {
    pub fn new(id: SessionId, record: SessionRecord, settings: SessionSettings) -> Self {
        Self {
            id,
            record,
            settings,
        }
    }

    /// The record for a session about to start: first Focus interval,
    /// clock running from `now`.
    pub fn initial_record(
        guild_id: GuildId,
        text_channel_id: TextChannelId,
        voice_channel_id: VoiceChannelId,
        message_id: MessageId,
        settings: &SessionSettings,
        now: DateTime<Utc>,
    ) -> SessionRecord {
        SessionRecord {
            guild_id,
            text_channel_id,
            voice_channel_id,
            message_id,
            current_interval: Interval::Focus,
            interval_started_at: Some(now),
            time_remaining_at_start: settings.focus,
            status: SessionStatus::Running,
            stats: SessionStats::default(),
        }
    }

    /// Configured duration of the current interval.
    pub fn current_duration(&self) -> std::time::Duration {
        self.settings.duration_of(self.record.current_interval)
    }

    /// Time left in the current interval.
    ///
    /// Negative values are expected between reconciliation ticks; the loop
    /// catches up lazily. While paused, the remaining time is frozen.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> ChronoDuration {
        let at_start = to_chrono(self.record.time_remaining_at_start);
        match (self.record.status, self.record.interval_started_at) {
            (SessionStatus::Paused, _) | (_, None) => at_start,
            (_, Some(started)) => at_start - (now - started),
        }
    }

    /// Whether the session's last recorded progress predates `threshold`.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: std::time::Duration) -> bool {
        match self.record.interval_started_at {
            Some(started) => now - started > to_chrono(threshold),
            None => false,
        }
    }

    fn next_interval(&self) -> Interval {
        match self.record.current_interval {
            Interval::Focus => {
                let completed = self.record.stats.completed_focus;
                // intervals_per_long_break is validated non-zero at creation
                if completed > 0 && completed % self.settings.intervals_per_long_break == 0 {
                    Interval::LongBreak
                } else {
                    Interval::ShortBreak
                }
            }
            Interval::ShortBreak | Interval::LongBreak => Interval::Focus,
        }
    }

    /// Advance to the next interval.
    ///
    /// With `credit_stats`, a completed Focus interval is counted before
    /// choosing the break type. A running session's new interval starts
    /// where the old one ended (old start + old remaining-at-start), which
    /// is what makes repeated calls replay missed transitions correctly;
    /// a paused or never-started session starts from `now`.
    pub fn advance(&mut self, now: DateTime<Utc>, credit_stats: bool) {
        if credit_stats && self.record.current_interval == Interval::Focus {
            self.record.stats.completed_focus += 1;
        }

        let next = self.next_interval();
        self.record.current_interval = next;

        self.record.interval_started_at = match (self.record.status, self.record.interval_started_at)
        {
            (SessionStatus::Running, Some(started)) => {
                Some(started + to_chrono(self.record.time_remaining_at_start))
            }
            _ => Some(now),
        };
        self.record.time_remaining_at_start = self.settings.duration_of(next);
    }

    /// Manually skip the rest of the current interval.
    ///
    /// No focus credit; the next interval starts from `now` rather than
    /// from the old interval's scheduled end.
    pub fn skip(&mut self, now: DateTime<Utc>) {
        let next = self.next_interval();
        self.record.current_interval = next;
        self.record.interval_started_at = Some(now);
        self.record.time_remaining_at_start = self.settings.duration_of(next);
        self.record.stats.skipped += 1;
    }

    /// Replay every transition missed while the process was down.
    ///
    /// Returns the number of intervals advanced. Terminates because
    /// validated settings have non-zero durations, so each step moves the
    /// start time forward.
    pub fn catch_up(&mut self, now: DateTime<Utc>) -> u32 {
        let mut steps = 0;
        while self.record.status == SessionStatus::Running
            && self.time_remaining(now) <= ChronoDuration::zero()
        {
            self.advance(now, true);
            steps += 1;
        }
        steps
    }

    /// Mark the session ended.
    pub fn mark_ended(&mut self) {
        self.record.status = SessionStatus::Ended;
    }
}
