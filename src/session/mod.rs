//! Session subsystem.
//!
//! # Data Flow
//! ```text
//! POST /create-session
//!     → directory (resolve stand/user/role → origin + credential)
//!     → registry.rs (validate, generate id, insert)
//!     → snapshot.rs (rewrite whole table, optional)
//!
//! /p/<sid>/... and tunnels
//!     → registry.rs lookup (expire-on-read)
//!     → Arc<Session> shared read-only with the forwarder / tunnel
//! ```
//!
//! # Design Decisions
//! - Records are immutable; the registry only inserts and removes
//! - Expiry is lazy; `delete_expired` exists for explicit sweeps
//! - Snapshot failures are logged, never fatal

pub mod record;
pub mod registry;
pub mod snapshot;

pub use record::{Session, SessionId, SessionMetadata};
pub use registry::{SessionError, SessionRegistry};
pub use snapshot::{JsonFileStore, SnapshotError, SnapshotStore};
