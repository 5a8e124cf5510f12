//! Typed identifiers for the chat platform and persistence layer.
//!
//! Platform IDs (guilds, channels, users, messages) are snowflake strings
//! handed to us by the gateway; wrapping them in newtypes keeps the two
//! channel namespaces (text vs. voice) from being mixed up at call sites.
//! Row IDs (`SessionId`, `ParticipantId`) are assigned by the database on
//! insert.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! snowflake_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

snowflake_id! {
    /// A guild (server) on the chat platform.
    GuildId
}

snowflake_id! {
    /// A text channel; the primary lookup key for live sessions.
    TextChannelId
}

snowflake_id! {
    /// A voice channel; unique across live sessions and the key for
    /// participant tracking.
    VoiceChannelId
}

snowflake_id! {
    /// A platform user.
    UserId
}

snowflake_id! {
    /// The pinned status message a session renders into.
    MessageId
}

/// Database row ID of a persisted session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Database row ID of a persisted participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub i64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
