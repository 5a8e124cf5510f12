//! Shared domain types for Focusbot.
//!
//! This crate contains the core domain types used across the Focusbot
//! engine: session and participant records, interval settings, voice state,
//! and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod config;
pub mod error;
pub mod id;
pub mod participant;
pub mod session;
