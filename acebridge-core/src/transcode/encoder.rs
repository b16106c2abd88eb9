//! Encoder capability detection and argument sets.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::info;

use crate::config::TranscodeConfig;

/// How the encoder produces H.264, fixed once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderMode {
    /// libx264 with yadif deinterlacing
    Software,
    /// VAAPI hardware encoding on the given render node
    Vaapi { device: String },
}

impl fmt::Display for EncoderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderMode::Software => write!(f, "software (libx264)"),
            EncoderMode::Vaapi { device } => write!(f, "vaapi ({device})"),
        }
    }
}

/// Program and arguments for one encoder invocation.
///
/// The encoder reads MPEG-TS on stdin and writes MPEG-TS on stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderProfile {
    program: PathBuf,
    args: Vec<String>,
}

impl EncoderProfile {
    /// Browser-safe 720p H.264/AAC transcode for `mode`.
    ///
    /// Input timestamps are preserved so transcoded segments line up with
    /// the upstream playlist.
    pub fn for_mode(ffmpeg_path: impl Into<PathBuf>, mode: &EncoderMode) -> Self {
        let mut args: Vec<String> = vec!["-copyts".into()];

        match mode {
            EncoderMode::Vaapi { device } => {
                args.extend(
                    [
                        "-hwaccel",
                        "vaapi",
                        "-hwaccel_device",
                        device.as_str(),
                        "-hwaccel_output_format",
                        "vaapi",
                        "-i",
                        "pipe:0",
                        "-vf",
                        "deinterlace_vaapi,scale_vaapi=w=1280:h=720",
                        "-c:v",
                        "h264_vaapi",
                        "-qp",
                        "23",
                    ]
                    .map(String::from),
                );
            }
            EncoderMode::Software => {
                args.extend(
                    [
                        "-i",
                        "pipe:0",
                        "-vf",
                        "yadif,scale=1280:720",
                        "-c:v",
                        "libx264",
                        "-preset",
                        "ultrafast",
                        "-tune",
                        "zerolatency",
                        "-crf",
                        "23",
                    ]
                    .map(String::from),
                );
            }
        }

        args.extend(
            [
                "-c:a",
                "aac",
                "-b:a",
                "128k",
                "-mpegts_copyts",
                "1",
                "-f",
                "mpegts",
                "-y",
                "pipe:1",
            ]
            .map(String::from),
        );

        Self {
            program: ffmpeg_path.into(),
            args,
        }
    }

    /// Arbitrary stdin-to-stdout filter program.
    pub fn custom(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Probes once whether hardware encoding works on this host.
///
/// Encodes a single frame of a synthetic source through VAAPI. Any failure,
/// including exceeding the capability timeout, selects software encoding.
pub async fn detect_encoder_mode(config: &TranscodeConfig) -> EncoderMode {
    if config.force_software {
        info!("Software encoding forced by configuration");
        return EncoderMode::Software;
    }

    let device_arg = format!("vaapi=va:{}", config.hw_device);
    let attempt = Command::new(&config.ffmpeg_path)
        .args(["-init_hw_device", &device_arg])
        .args(["-f", "lavfi", "-i", "nullsrc=s=64x64:d=0.1"])
        .args(["-vf", "format=nv12,hwupload"])
        .args(["-c:v", "h264_vaapi", "-frames:v", "1"])
        .args(["-f", "null", "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match tokio::time::timeout(config.capability_timeout, attempt).await {
        Ok(Ok(status)) if status.success() => {
            info!("VAAPI hardware encoding available on {}", config.hw_device);
            EncoderMode::Vaapi {
                device: config.hw_device.clone(),
            }
        }
        _ => {
            info!("VAAPI not available, using software encoding");
            EncoderMode::Software
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_software_args() {
        let profile = EncoderProfile::for_mode("ffmpeg", &EncoderMode::Software);
        let args = profile.args();

        assert_eq!(args[0], "-copyts");
        assert!(has_pair(args, "-i", "pipe:0"));
        assert!(has_pair(args, "-vf", "yadif,scale=1280:720"));
        assert!(has_pair(args, "-c:v", "libx264"));
        assert!(has_pair(args, "-preset", "ultrafast"));
        assert!(has_pair(args, "-tune", "zerolatency"));
        assert!(has_pair(args, "-b:a", "128k"));
        assert!(has_pair(args, "-mpegts_copyts", "1"));
        assert!(has_pair(args, "-f", "mpegts"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn test_vaapi_args() {
        let mode = EncoderMode::Vaapi {
            device: "/dev/dri/renderD129".to_string(),
        };
        let profile = EncoderProfile::for_mode("/usr/bin/ffmpeg", &mode);
        let args = profile.args();

        assert_eq!(profile.program(), Path::new("/usr/bin/ffmpeg"));
        assert!(has_pair(args, "-hwaccel_device", "/dev/dri/renderD129"));
        assert!(has_pair(
            args,
            "-vf",
            "deinterlace_vaapi,scale_vaapi=w=1280:h=720"
        ));
        assert!(has_pair(args, "-c:v", "h264_vaapi"));
        assert!(has_pair(args, "-c:a", "aac"));
        // -copyts must precede the input to apply to it
        let copyts = args.iter().position(|a| a == "-copyts").unwrap();
        let input = args.iter().position(|a| a == "pipe:0").unwrap();
        assert!(copyts < input);
    }

    #[tokio::test]
    async fn test_forced_software_skips_probe() {
        let config = TranscodeConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/ffmpeg"),
            force_software: true,
            ..TranscodeConfig::default()
        };
        assert_eq!(detect_encoder_mode(&config).await, EncoderMode::Software);
    }

    #[tokio::test]
    async fn test_failed_probe_falls_back_to_software() {
        let config = TranscodeConfig {
            ffmpeg_path: PathBuf::from("false"),
            capability_timeout: Duration::from_secs(5),
            ..TranscodeConfig::default()
        };
        assert_eq!(detect_encoder_mode(&config).await, EncoderMode::Software);
    }

    #[tokio::test]
    async fn test_successful_probe_selects_vaapi() {
        let config = TranscodeConfig {
            ffmpeg_path: PathBuf::from("true"),
            hw_device: "/dev/dri/renderD128".to_string(),
            ..TranscodeConfig::default()
        };
        assert_eq!(
            detect_encoder_mode(&config).await,
            EncoderMode::Vaapi {
                device: "/dev/dri/renderD128".to_string()
            }
        );
    }
}
