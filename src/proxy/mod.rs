//! Request forwarding engine.
//!
//! # Data Flow
//! ```text
//! /p/<sid>/<path>?<query>  (session already resolved)
//!     → upstream.rs (target URL, header allow list, credential injection)
//!     → forward.rs  (send with timeout, no redirect following)
//!     → redirect.rs (same-origin Location → /p/<sid>/...)
//!     → rewrite     (HTML / CSS / script bodies) or byte-exact stream
//!     → error.rs    (transport failures → 502 / 504 page)
//! ```

pub mod error;
pub mod forward;
pub mod redirect;
pub mod upstream;

pub use error::UpstreamError;
pub use forward::Forwarder;
