//! Binding of locally chosen content ids to upstream playback sessions.

pub mod manager;

pub use manager::{SessionManager, StreamSession};
