//! Sequential link checker with a single-sweep gate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{HealthCheckError, LinkCheckResult, LinkReport, LinkStatus, LinkStore, classify};
use crate::config::HealthCheckConfig;
use crate::session::SessionManager;

/// Requester recorded on sessions opened by checks.
const CHECK_REQUESTER: &str = "health-check";

/// Live position of a running sweep. All zero when idle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepProgress {
    pub running: bool,
    /// 1-based index of the link being checked
    pub current: usize,
    pub total: usize,
    pub label: String,
}

/// Result of asking for a blocking sweep.
#[derive(Debug)]
pub enum SweepOutcome {
    Completed(Vec<LinkReport>),
    AlreadyRunning(SweepProgress),
}

/// Result of asking for a background sweep.
#[derive(Debug, PartialEq, Eq)]
pub enum SweepStart {
    Started,
    AlreadyRunning(SweepProgress),
}

struct SweepGate {
    running: AtomicBool,
    progress: watch::Sender<SweepProgress>,
}

impl SweepGate {
    fn try_acquire(self: &Arc<Self>) -> Option<SweepPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SweepPermit { gate: self.clone() })
    }
}

/// Held for the duration of one sweep. Releases the gate and clears
/// progress when dropped, including on error or cancellation.
struct SweepPermit {
    gate: Arc<SweepGate>,
}

impl SweepPermit {
    fn publish(&self, update: impl FnOnce(&mut SweepProgress)) {
        self.gate.progress.send_modify(update);
    }
}

impl Drop for SweepPermit {
    fn drop(&mut self) {
        self.gate.progress.send_replace(SweepProgress::default());
        self.gate.running.store(false, Ordering::Release);
    }
}

/// Runs link checks against the engine through the session manager.
#[derive(Clone)]
pub struct HealthChecker {
    sessions: Arc<SessionManager>,
    config: HealthCheckConfig,
    gate: Arc<SweepGate>,
}

impl HealthChecker {
    pub fn new(sessions: Arc<SessionManager>, config: HealthCheckConfig) -> Self {
        let (progress, _) = watch::channel(SweepProgress::default());
        Self {
            sessions,
            config,
            gate: Arc::new(SweepGate {
                running: AtomicBool::new(false),
                progress,
            }),
        }
    }

    pub fn is_sweeping(&self) -> bool {
        self.gate.running.load(Ordering::Acquire)
    }

    /// Snapshot of the current sweep position.
    pub fn progress(&self) -> SweepProgress {
        self.gate.progress.borrow().clone()
    }

    /// Receiver notified on every progress change.
    pub fn subscribe(&self) -> watch::Receiver<SweepProgress> {
        self.gate.progress.subscribe()
    }

    /// Checks one link. Never fails: every error classifies as `fail`.
    ///
    /// The stream is stopped afterwards whenever it was started.
    pub async fn check_link(&self, hash: &str) -> LinkCheckResult {
        let started = self
            .sessions
            .start(hash, Some(CHECK_REQUESTER.to_string()))
            .await;

        let (status, peer_count) = match started {
            Ok(_) => {
                tokio::time::sleep(self.config.warmup).await;
                let outcome = match self.sessions.stats(hash).await {
                    Some(stats) => (
                        classify(stats.peers, self.config.ok_peer_threshold),
                        stats.peers,
                    ),
                    None => (LinkStatus::Fail, 0),
                };
                self.sessions.stop(hash).await;
                outcome
            }
            Err(e) => {
                debug!(hash, "Link check could not start stream: {}", e);
                (LinkStatus::Fail, 0)
            }
        };

        info!(hash, %status, peers = peer_count, "Link checked");
        LinkCheckResult {
            status,
            peer_count,
            checked_at: Utc::now(),
        }
    }

    /// Checks one link outside of a sweep.
    ///
    /// Holds the sweep gate while checking, so sweeps and other single
    /// checks are refused until it finishes.
    ///
    /// # Errors
    /// - `HealthCheckError::SweepInProgress` - A sweep or check owns the engine right now
    pub async fn check_single(&self, hash: &str) -> Result<LinkCheckResult, HealthCheckError> {
        let permit = self
            .gate
            .try_acquire()
            .ok_or(HealthCheckError::SweepInProgress)?;
        permit.publish(|p| {
            *p = SweepProgress {
                running: true,
                current: 1,
                total: 1,
                label: hash.to_string(),
            }
        });

        let result = self.check_link(hash).await;
        drop(permit);
        Ok(result)
    }

    /// Runs a full sweep and waits for it, unless one is already running.
    ///
    /// # Errors
    /// - `HealthCheckError::Store` - The link list could not be read
    pub async fn sweep(&self, store: &dyn LinkStore) -> Result<SweepOutcome, HealthCheckError> {
        match self.gate.try_acquire() {
            Some(permit) => self.run_sweep(permit, store).await.map(SweepOutcome::Completed),
            None => Ok(SweepOutcome::AlreadyRunning(self.progress())),
        }
    }

    /// Starts a sweep in the background, unless one is already running.
    ///
    /// The gate is taken before returning, so a second call made right after
    /// this one reports progress instead of starting again.
    pub fn start_sweep(&self, store: Arc<dyn LinkStore>) -> SweepStart {
        let Some(permit) = self.gate.try_acquire() else {
            return SweepStart::AlreadyRunning(self.progress());
        };
        permit.publish(|p| p.running = true);

        let checker = self.clone();
        tokio::spawn(async move {
            if let Err(e) = checker.run_sweep(permit, store.as_ref()).await {
                warn!("Link sweep failed: {}", e);
            }
        });
        SweepStart::Started
    }

    /// Sweeps every `interval`, skipping ticks that find a sweep running.
    pub fn spawn_periodic(&self, store: Arc<dyn LinkStore>, interval: Duration) -> JoinHandle<()> {
        let checker = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                info!("Scheduled link sweep starting");
                match checker.sweep(store.as_ref()).await {
                    Ok(SweepOutcome::Completed(reports)) => {
                        info!("Scheduled link sweep completed: {} links", reports.len());
                    }
                    Ok(SweepOutcome::AlreadyRunning(progress)) => {
                        info!(
                            "Scheduled link sweep skipped, sweep at {}/{}",
                            progress.current, progress.total
                        );
                    }
                    Err(e) => warn!("Scheduled link sweep failed: {}", e),
                }
            }
        })
    }

    async fn run_sweep(
        &self,
        permit: SweepPermit,
        store: &dyn LinkStore,
    ) -> Result<Vec<LinkReport>, HealthCheckError> {
        let links = store.links().await?;
        let total = links.len();
        info!("Link sweep started over {} links", total);

        permit.publish(|p| {
            *p = SweepProgress {
                running: true,
                current: 0,
                total,
                label: String::new(),
            }
        });

        let mut reports = Vec::with_capacity(total);
        for (index, link) in links.into_iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.config.inter_link_delay).await;
            }

            permit.publish(|p| {
                p.current = index + 1;
                p.label = link.label.clone();
            });

            let result = self.check_link(&link.hash).await;
            if let Err(e) = store.record(&link.hash, &result).await {
                warn!(hash = %link.hash, "Failed to record link result: {}", e);
            }

            reports.push(LinkReport {
                link,
                result: Some(result),
            });
        }

        let healthy = reports
            .iter()
            .filter(|r| r.result.as_ref().is_some_and(|res| res.status == LinkStatus::Ok))
            .count();
        info!("Link sweep finished: {}/{} healthy", healthy, total);

        drop(permit);
        Ok(reports)
    }
}
