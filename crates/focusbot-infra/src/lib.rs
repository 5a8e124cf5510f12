//! Infrastructure implementations for Focusbot.
//!
//! SQLite-backed repositories behind the ports defined in `focusbot-core`,
//! plus the configuration loader.

pub mod config;
pub mod sqlite;
