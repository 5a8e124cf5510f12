//! Session concurrency and state-synchronization engine for Focusbot.
//!
//! This crate defines the "ports" (repository and adapter traits) that the
//! infrastructure layer implements, plus the engine itself: the interval
//! state machine, the keyed session cache, the session manager with its
//! per-session reconciliation loops, the participants provider, and the
//! voice-state autoshusher. It depends only on `focusbot-types` -- never on
//! `focusbot-infra` or any database/IO crate.

pub mod participant;
pub mod repository;
pub mod session;
pub mod shush;
pub mod voice;
