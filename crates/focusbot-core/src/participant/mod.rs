//! Participant tracking: the cached per-voice-channel attendance list and
//! its lock table.

pub mod provider;

pub use provider::{Participant, ParticipantsProvider};
