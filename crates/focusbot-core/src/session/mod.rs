//! Live session handling: the interval state machine, the keyed cache of
//! live sessions, and the manager that drives per-session reconciliation
//! loops.

pub mod cache;
pub mod entity;
pub mod manager;

pub use cache::SessionCache;
pub use entity::Session;
pub use manager::{SessionManager, SessionUpdateHook, StartSessionRequest};
