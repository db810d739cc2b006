//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup in main: config, logging, metrics, state, listener
//! - Ordered shutdown: stop accept, drain, close

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
