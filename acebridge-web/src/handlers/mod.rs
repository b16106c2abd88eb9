//! HTTP request handlers organized by functionality

pub mod check;
pub mod proxy;
pub mod status;
pub mod stream;

// Re-export handler functions
pub use check::{check_link, check_links, check_status, start_check};
pub use proxy::playback_proxy;
pub use status::api_status;
pub use stream::{
    stream_manifest, stream_sessions, stream_start, stream_stats, stream_stop, stream_version,
};
