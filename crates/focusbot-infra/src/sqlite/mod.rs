//! SQLite-backed repository implementations.

pub mod participant;
pub mod pool;
pub mod session;

pub use participant::SqliteParticipantRepository;
pub use pool::DatabasePool;
pub use session::SqliteSessionRepository;
