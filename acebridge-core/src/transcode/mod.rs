//! Transcode decision and encoding.
//!
//! A stream's first segment is inspected once per infohash to decide whether
//! browsers can play it as-is. Streams that need work are piped through an
//! external encoder whose arguments are fixed at startup by a hardware
//! capability probe.

pub mod cache;
pub mod encoder;
pub mod pipe;
pub mod prober;

use async_trait::async_trait;
pub use cache::{DecisionCache, TranscodeVerdict};
pub use encoder::{EncoderMode, EncoderProfile, detect_encoder_mode};
pub use pipe::{TranscodeInput, TranscodingPipe};
pub use prober::{FfprobeProber, ProbeError, ProbeReport};

/// MIME type of every media segment we hand to clients.
pub const MPEG_TS: &str = "video/mp2t";

/// Decides whether a buffered media chunk needs transcoding.
#[async_trait]
pub trait StreamProber: Send + Sync {
    /// Returns `true` when the chunk is not reliably playable in a browser.
    ///
    /// Implementations never fail: uncertainty resolves to `true`.
    async fn needs_transcode(&self, segment: &[u8]) -> bool;
}

/// Encoder process failures.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("failed to spawn encoder {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("encoder pipe {pipe} unavailable")]
    PipeUnavailable { pipe: &'static str },

    #[error("encoder exited with {status} before producing output")]
    ExitedWithoutOutput { status: String },

    #[error("encoder output failed: {0}")]
    Output(#[from] std::io::Error),
}
