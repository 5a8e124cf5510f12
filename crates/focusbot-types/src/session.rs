//! Session records, settings, and interval types.
//!
//! A focus session cycles through work and break intervals. The persisted
//! shape is split the same way the schema is: `SessionRecord` (mutable
//! state + stats, one row per session) and `SessionSettings` (immutable
//! after creation, deleted when the session ends).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::SessionError;
use crate::id::{GuildId, MessageId, TextChannelId, VoiceChannelId};

/// The interval a session is currently in.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (current_interval IN ('focus', 'short_break', 'long_break'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    Focus,
    ShortBreak,
    LongBreak,
}

impl Interval {
    /// Whether this interval is a break (short or long).
    pub fn is_break(&self) -> bool {
        matches!(self, Interval::ShortBreak | Interval::LongBreak)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Focus => write!(f, "focus"),
            Interval::ShortBreak => write!(f, "short_break"),
            Interval::LongBreak => write!(f, "long_break"),
        }
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "focus" => Ok(Interval::Focus),
            "short_break" => Ok(Interval::ShortBreak),
            "long_break" => Ok(Interval::LongBreak),
            other => Err(format!("invalid interval: '{other}'")),
        }
    }
}

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Paused,
    Ended,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Paused => write!(f, "paused"),
            SessionStatus::Ended => write!(f, "ended"),
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(SessionStatus::Running),
            "paused" => Ok(SessionStatus::Paused),
            "ended" => Ok(SessionStatus::Ended),
            other => Err(format!("invalid session status: '{other}'")),
        }
    }
}

/// Immutable per-session timer configuration.
///
/// Validated at construction: all durations must be non-zero and
/// `intervals_per_long_break` must be positive (the interval-advance
/// algorithm takes a modulo by it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub focus: Duration,
    pub short_break: Duration,
    pub long_break: Duration,
    /// Completed focus intervals between long breaks.
    pub intervals_per_long_break: u32,
    /// When set, the session never force-mutes participants.
    pub suppress_mute: bool,
    /// When set, the session never force-deafens participants.
    pub suppress_deafen: bool,
}

impl SessionSettings {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.intervals_per_long_break == 0 {
            return Err(SessionError::InvalidSettings(
                "intervals_per_long_break must be positive".to_string(),
            ));
        }
        if self.focus.is_zero() || self.short_break.is_zero() || self.long_break.is_zero() {
            return Err(SessionError::InvalidSettings(
                "interval durations must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The configured duration of the given interval.
    pub fn duration_of(&self, interval: Interval) -> Duration {
        match interval {
            Interval::Focus => self.focus,
            Interval::ShortBreak => self.short_break,
            Interval::LongBreak => self.long_break,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            focus: Duration::from_secs(25 * 60),
            short_break: Duration::from_secs(5 * 60),
            long_break: Duration::from_secs(15 * 60),
            intervals_per_long_break: 4,
            suppress_mute: false,
            suppress_deafen: false,
        }
    }
}

/// Per-session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Focus intervals completed to term (skips are not credited).
    pub completed_focus: u32,
    /// Manual skip operations.
    pub skipped: u32,
}

/// The persisted, mutable state of one session.
///
/// `time_remaining_at_start` is the duration that was left when
/// `interval_started_at` was recorded; actual remaining time is derived
/// lazily and may go negative between reconciliation ticks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub guild_id: GuildId,
    pub text_channel_id: TextChannelId,
    pub voice_channel_id: VoiceChannelId,
    pub message_id: MessageId,
    pub current_interval: Interval,
    /// Absent only for a session that has never started ticking
    /// (e.g. persisted while paused before its first interval).
    pub interval_started_at: Option<DateTime<Utc>>,
    pub time_remaining_at_start: Duration,
    pub status: SessionStatus,
    pub stats: SessionStats,
}
