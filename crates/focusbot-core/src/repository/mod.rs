//! Repository trait definitions (ports).
//!
//! Implementations live in `focusbot-infra`. All traits use native async fn
//! in traits (RPITIT, Rust 2024 edition).

pub mod participant;
pub mod session;

pub use participant::ParticipantRepository;
pub use session::SessionRepository;
