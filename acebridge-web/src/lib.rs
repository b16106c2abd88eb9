//! Acebridge Web - HTTP front for the relay engine
//!
//! Serves the playback proxy surface mirroring the engine's own paths, a
//! JSON API for stream sessions and link health checks.

pub mod error;
pub mod handlers;
pub mod server;

// Re-export main types
pub use error::ApiError;
pub use server::{AppState, router, run_server};
