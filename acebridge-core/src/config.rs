//! Centralized configuration for Acebridge.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Acebridge components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    pub upstream: UpstreamConfig,
    pub transcode: TranscodeConfig,
    pub health: HealthCheckConfig,
    pub server: ServerConfig,
}

/// Upstream P2P engine connection settings.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the engine's HTTP API, without trailing slash
    pub base_url: String,
    /// Path prefix the engine serves playback under, mirrored by our proxy
    pub proxy_prefix: String,
    /// Timeout for stream start, manifest and control requests
    pub control_timeout: Duration,
    /// Timeout for stat polling
    pub stats_timeout: Duration,
    /// Timeout for the stop command
    pub command_timeout: Duration,
    /// User agent sent when the client did not supply one
    pub user_agent: &'static str,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://acestream:6878".to_string(),
            proxy_prefix: "ace".to_string(),
            control_timeout: Duration::from_secs(30),
            stats_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            user_agent: "acebridge/0.1.0",
        }
    }
}

/// Probing and encoding configuration.
#[derive(Debug, Clone)]
pub struct TranscodeConfig {
    /// Encoder binary
    pub ffmpeg_path: PathBuf,
    /// Inspection binary
    pub ffprobe_path: PathBuf,
    /// Upper bound for a single probe run
    pub probe_timeout: Duration,
    /// How long a cached transcode verdict stays valid
    pub verdict_ttl: Duration,
    /// Render node used for VAAPI encoding
    pub hw_device: String,
    /// Upper bound for the startup hardware encode attempt
    pub capability_timeout: Duration,
    /// Skip the hardware probe and always encode in software
    pub force_software: bool,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            probe_timeout: Duration::from_secs(10),
            verdict_ttl: Duration::from_secs(4 * 60 * 60),
            hw_device: "/dev/dri/renderD128".to_string(),
            capability_timeout: Duration::from_secs(10),
            force_software: false,
        }
    }
}

/// Link health check timing and thresholds.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Time given to the swarm to converge before reading stats
    pub warmup: Duration,
    /// Pause between consecutive links in a sweep
    pub inter_link_delay: Duration,
    /// Minimum peer count classified as healthy
    pub ok_peer_threshold: u32,
    /// Run a full sweep on this interval (None = manual only)
    pub sweep_interval: Option<Duration>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(15),
            inter_link_delay: Duration::from_secs(5),
            ok_peer_threshold: 5,
            sweep_interval: None,
        }
    }
}

impl HealthCheckConfig {
    /// Sweep interval for a period given in hours.
    ///
    /// Zero disables scheduled sweeps. Returns `Err` with the offending value
    /// when the period does not fit in a `Duration` of seconds.
    pub fn sweep_interval_from_hours(hours: u64) -> Result<Option<Duration>, u64> {
        if hours == 0 {
            return Ok(None);
        }
        hours
            .checked_mul(60 * 60)
            .map(|secs| Some(Duration::from_secs(secs)))
            .ok_or(hours)
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Prefix of the session-bound stream API
    pub stream_api_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            stream_api_prefix: "/api/stream".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Allows runtime configuration via environment variables while
    /// maintaining sensible defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) =
            std::env::var("ACEBRIDGE_UPSTREAM_URL").or_else(|_| std::env::var("ACESTREAM_URL"))
        {
            config.upstream.base_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(path) = std::env::var("ACEBRIDGE_FFMPEG") {
            config.transcode.ffmpeg_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("ACEBRIDGE_FFPROBE") {
            config.transcode.ffprobe_path = PathBuf::from(path);
        }

        if let Ok(device) = std::env::var("ACEBRIDGE_HW_DEVICE") {
            config.transcode.hw_device = device;
        }

        if let Ok(force) = std::env::var("ACEBRIDGE_FORCE_SOFTWARE") {
            config.transcode.force_software = force.parse().unwrap_or(false);
        }

        if let Ok(hours) = std::env::var("ACEBRIDGE_SWEEP_INTERVAL_HOURS") {
            if let Ok(Ok(interval)) = hours
                .parse::<u64>()
                .map(HealthCheckConfig::sweep_interval_from_hours)
            {
                config.health.sweep_interval = interval;
            }
        }

        if let Ok(port) = std::env::var("ACEBRIDGE_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                config.server.port = port;
            }
        }

        config
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Health check delays are zeroed and the encoder never touches hardware.
    pub fn for_testing() -> Self {
        let mut config = Self::default();
        config.upstream.base_url = "http://127.0.0.1:6878".to_string();
        config.health.warmup = Duration::ZERO;
        config.health.inter_link_delay = Duration::ZERO;
        config.transcode.force_software = true;
        config
    }
}
