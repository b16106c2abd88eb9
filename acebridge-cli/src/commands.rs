//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use acebridge_core::config::{BridgeConfig, HealthCheckConfig};
use acebridge_core::health::{HealthChecker, LinkRef, MemoryLinkStore, SweepOutcome};
use acebridge_core::session::SessionManager;
use acebridge_core::transcode::{EncoderProfile, FfprobeProber, detect_encoder_mode};
use acebridge_core::upstream::UpstreamClient;
use anyhow::Context;
use clap::Subcommand;
use tracing::info;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
        /// Base URL of the engine's HTTP API
        #[arg(short, long)]
        upstream: Option<String>,
        /// JSON file listing links for health checks
        #[arg(long)]
        links: Option<PathBuf>,
        /// Sweep all links every N hours
        #[arg(long)]
        sweep_hours: Option<u64>,
        /// Skip the hardware encoder probe
        #[arg(long)]
        force_software: bool,
    },
    /// Inspect a media file and print the transcode verdict
    Probe {
        /// Transport stream segment or other media file
        file: PathBuf,
    },
    /// Check link viability without starting the server
    Check {
        /// Content ids to check
        #[arg(required = true)]
        hashes: Vec<String>,
        /// Base URL of the engine's HTTP API
        #[arg(short, long)]
        upstream: Option<String>,
        /// Seconds to let the swarm converge before reading stats
        #[arg(long)]
        warmup: Option<u64>,
    },
    /// Report which encoder the server would use
    Capabilities,
}

/// Handle the CLI command
///
/// # Errors
/// Returns the underlying failure of the command that ran
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve {
            host,
            port,
            upstream,
            links,
            sweep_hours,
            force_software,
        } => {
            let mut config = BridgeConfig::from_env();
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(upstream) = upstream {
                config.upstream.base_url = upstream.trim_end_matches('/').to_string();
            }
            if let Some(hours) = sweep_hours {
                config.health.sweep_interval = HealthCheckConfig::sweep_interval_from_hours(hours)
                    .map_err(|hours| anyhow::anyhow!("--sweep-hours {hours} is out of range"))?;
            }
            config.transcode.force_software |= force_software;

            serve(config, links).await
        }
        Commands::Probe { file } => probe(file).await,
        Commands::Check {
            hashes,
            upstream,
            warmup,
        } => {
            let mut config = BridgeConfig::from_env();
            if let Some(upstream) = upstream {
                config.upstream.base_url = upstream.trim_end_matches('/').to_string();
            }
            if let Some(secs) = warmup {
                config.health.warmup = Duration::from_secs(secs);
            }

            check(config, hashes).await
        }
        Commands::Capabilities => capabilities(BridgeConfig::from_env()).await,
    }
}

/// Run the HTTP server until it fails
///
/// # Errors
/// - Link file unreadable or malformed
/// - Listener could not be bound
pub async fn serve(config: BridgeConfig, links: Option<PathBuf>) -> anyhow::Result<()> {
    let links = match links {
        Some(path) => {
            let store = MemoryLinkStore::load(&path).await?;
            info!("Loaded {} links from {}", store.reports().len(), path.display());
            store
        }
        None => MemoryLinkStore::default(),
    };

    acebridge_web::run_server(config, links).await?;
    Ok(())
}

/// Probe a media file with ffprobe
///
/// # Errors
/// - ffprobe missing, failed, or produced unparseable output
pub async fn probe(file: PathBuf) -> anyhow::Result<()> {
    let config = BridgeConfig::from_env();
    let prober = FfprobeProber::from_config(&config.transcode);

    let report = prober
        .probe_file(&file)
        .await
        .with_context(|| format!("probing {}", file.display()))?;

    println!("File: {}", file.display());
    for stream in &report.streams {
        println!(
            "  {:<6} {:<10} {}",
            stream.codec_type.as_deref().unwrap_or("?"),
            stream.codec_name.as_deref().unwrap_or("?"),
            stream.field_order.as_deref().unwrap_or("-"),
        );
    }
    let verdict = if report.needs_transcode() {
        "transcode"
    } else {
        "passthrough"
    };
    println!("Verdict: {verdict}");

    Ok(())
}

/// Check each link in turn and print one JSON result per line
///
/// Links are swept in order with the configured delay between them.
///
/// # Errors
/// - Result serialization failed
pub async fn check(config: BridgeConfig, hashes: Vec<String>) -> anyhow::Result<()> {
    let upstream = UpstreamClient::new(&config.upstream);
    let sessions = Arc::new(SessionManager::new(
        Arc::new(upstream),
        format!("{}/manifest", config.server.stream_api_prefix),
        config.upstream.stats_timeout,
    ));
    let checker = HealthChecker::new(sessions, config.health.clone());

    let store = MemoryLinkStore::new(
        hashes
            .into_iter()
            .map(|hash| LinkRef {
                label: hash.clone(),
                hash,
            })
            .collect(),
    );

    let SweepOutcome::Completed(reports) = checker.sweep(&store).await? else {
        anyhow::bail!("link sweep already running");
    };
    for report in reports {
        let line = serde_json::json!({ "hash": report.link.hash, "result": report.result });
        println!("{}", serde_json::to_string(&line)?);
    }

    Ok(())
}

/// Print the detected encoder mode and the arguments it implies
///
/// # Errors
/// Currently infallible; detection falls back to software encoding
pub async fn capabilities(config: BridgeConfig) -> anyhow::Result<()> {
    let mode = detect_encoder_mode(&config.transcode).await;
    let profile = EncoderProfile::for_mode(config.transcode.ffmpeg_path.clone(), &mode);

    println!("Encoder mode: {mode}");
    println!(
        "Command: {} {}",
        profile.program().display(),
        profile.args().join(" ")
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_serve_rejects_out_of_range_sweep_hours() {
        let err = handle_command(Commands::Serve {
            host: None,
            port: None,
            upstream: None,
            links: None,
            sweep_hours: Some(9_999_999_999_999_999),
            force_software: false,
        })
        .await
        .unwrap_err();

        assert!(err.to_string().contains("out of range"));
    }
}
