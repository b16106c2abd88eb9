//! Segment inspection with ffprobe.
//!
//! Browsers cannot decode MP2 audio and render interlaced video badly, which
//! is exactly what many broadcast-sourced P2P streams carry.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::StreamProber;
use crate::config::TranscodeConfig;

/// Reasons a probe could not produce a report.
///
/// Never surfaced to clients: any of these resolves to "transcode".
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("probe artifact I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("probe exceeded {0:?}")]
    Timeout(Duration),

    #[error("ffprobe exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    #[error("unparseable ffprobe output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Elementary streams reported by `ffprobe -show_streams -of json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbeReport {
    #[serde(default)]
    pub streams: Vec<ProbedStream>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbedStream {
    #[serde(default)]
    pub codec_type: Option<String>,
    #[serde(default)]
    pub codec_name: Option<String>,
    #[serde(default)]
    pub field_order: Option<String>,
}

impl ProbeReport {
    /// Parses raw ffprobe JSON output.
    ///
    /// # Errors
    /// - `ProbeError::Parse` - Output is not ffprobe stream JSON
    pub fn from_json(raw: &[u8]) -> Result<Self, ProbeError> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// True if any audio stream is MP2 or any video stream is interlaced.
    ///
    /// A missing field order or `unknown` counts as progressive.
    pub fn needs_transcode(&self) -> bool {
        self.streams.iter().any(|s| match s.codec_type.as_deref() {
            Some("audio") => s.codec_name.as_deref() == Some("mp2"),
            Some("video") => matches!(
                s.field_order.as_deref(),
                Some(order) if order != "progressive" && order != "unknown"
            ),
            _ => false,
        })
    }
}

/// [`StreamProber`] backed by the ffprobe binary.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_path: PathBuf,
    timeout: Duration,
    scratch_dir: Option<PathBuf>,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
            timeout,
            scratch_dir: None,
        }
    }

    /// Places probe artifacts in `dir` instead of the system temp directory.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn from_config(config: &TranscodeConfig) -> Self {
        Self::new(config.ffprobe_path.clone(), config.probe_timeout)
    }

    /// Writes `segment` to a temporary file and inspects it.
    ///
    /// The temporary file is removed when this returns, on every path.
    ///
    /// # Errors
    /// - `ProbeError::Io` - Temporary file could not be written or ffprobe not spawned
    /// - `ProbeError::Timeout` - ffprobe did not finish within the probe budget
    /// - `ProbeError::Exit` - ffprobe exited unsuccessfully
    /// - `ProbeError::Parse` - ffprobe output was not valid JSON
    pub async fn probe(&self, segment: &[u8]) -> Result<ProbeReport, ProbeError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("acebridge-probe-").suffix(".ts");
        let artifact = match &self.scratch_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        let mut file = tokio::fs::File::from_std(artifact.reopen()?);
        file.write_all(segment).await?;
        file.flush().await?;
        drop(file);

        self.probe_file(artifact.path()).await
    }

    /// Inspects a media file already on disk.
    ///
    /// # Errors
    /// Same as [`FfprobeProber::probe`], minus the artifact write.
    pub async fn probe_file(&self, path: &Path) -> Result<ProbeReport, ProbeError> {
        let child = Command::new(&self.ffprobe_path)
            .args(["-v", "error", "-show_streams", "-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(ProbeError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        ProbeReport::from_json(&output.stdout)
    }
}

#[async_trait]
impl StreamProber for FfprobeProber {
    async fn needs_transcode(&self, segment: &[u8]) -> bool {
        match self.probe(segment).await {
            Ok(report) => {
                debug!("Probed {} streams", report.streams.len());
                report.needs_transcode()
            }
            Err(e) => {
                warn!("Probe failed, defaulting to transcode: {}", e);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRESSIVE_AAC: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264", "field_order": "progressive"},
            {"index": 1, "codec_type": "audio", "codec_name": "aac"}
        ]
    }"#;

    const INTERLACED_AAC: &str = r#"{
        "streams": [
            {"codec_type": "video", "codec_name": "h264", "field_order": "tt"},
            {"codec_type": "audio", "codec_name": "aac"}
        ]
    }"#;

    const PROGRESSIVE_MP2: &str = r#"{
        "streams": [
            {"codec_type": "video", "codec_name": "h264", "field_order": "progressive"},
            {"codec_type": "audio", "codec_name": "mp2"}
        ]
    }"#;

    #[test]
    fn test_progressive_aac_plays_as_is() {
        let report = ProbeReport::from_json(PROGRESSIVE_AAC.as_bytes()).unwrap();
        assert!(!report.needs_transcode());
    }

    #[test]
    fn test_mp2_audio_needs_transcode() {
        let report = ProbeReport::from_json(PROGRESSIVE_MP2.as_bytes()).unwrap();
        assert!(report.needs_transcode());
    }

    #[test]
    fn test_interlaced_video_needs_transcode() {
        let report = ProbeReport::from_json(INTERLACED_AAC.as_bytes()).unwrap();
        assert!(report.needs_transcode());
    }

    #[test]
    fn test_unknown_or_missing_field_order_is_progressive() {
        let raw = r#"{"streams": [
            {"codec_type": "video", "field_order": "unknown"},
            {"codec_type": "video"},
            {"codec_type": "data", "codec_name": "mp2"}
        ]}"#;
        let report = ProbeReport::from_json(raw.as_bytes()).unwrap();
        assert!(!report.needs_transcode());
    }

    #[test]
    fn test_garbage_output_is_parse_error() {
        assert!(matches!(
            ProbeReport::from_json(b"not json"),
            Err(ProbeError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_binary_defaults_to_transcode() {
        let prober = FfprobeProber::new("/nonexistent/ffprobe", Duration::from_secs(1));

        assert!(matches!(
            prober.probe(b"\x47\x40\x00\x10").await,
            Err(ProbeError::Io(_))
        ));
        assert!(prober.needs_transcode(b"\x47\x40\x00\x10").await);
    }

    #[tokio::test]
    async fn test_failing_binary_defaults_to_transcode() {
        let prober = FfprobeProber::new("false", Duration::from_secs(5));

        assert!(matches!(
            prober.probe(b"segment").await,
            Err(ProbeError::Exit { .. })
        ));
        assert!(prober.needs_transcode(b"segment").await);
    }

    #[tokio::test]
    async fn test_probe_artifact_removed_on_every_path() {
        let scratch = tempfile::tempdir().unwrap();

        let failing = FfprobeProber::new("false", Duration::from_secs(5))
            .with_scratch_dir(scratch.path());
        let _ = failing.probe(b"segment").await;

        let succeeding = FfprobeProber::new("true", Duration::from_secs(5))
            .with_scratch_dir(scratch.path());
        let _ = succeeding.probe(b"segment").await;

        let leftovers = std::fs::read_dir(scratch.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_probe_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let bin = tempfile::tempdir().unwrap();
        let script = bin.path().join("slow-ffprobe");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let scratch = tempfile::tempdir().unwrap();
        let prober =
            FfprobeProber::new(&script, Duration::from_millis(100)).with_scratch_dir(scratch.path());

        let started = std::time::Instant::now();
        assert!(matches!(
            prober.probe(b"segment").await,
            Err(ProbeError::Timeout(_))
        ));
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(prober.needs_transcode(b"segment").await);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }
}
