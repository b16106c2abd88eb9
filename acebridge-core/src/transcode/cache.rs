//! Per-infohash cache of transcode verdicts.
//!
//! Verdicts expire after a TTL and are then recomputed from a fresh segment.
//! Expired entries are overwritten on the next probe rather than purged; the
//! key space is bounded by the distinct streams ever seen.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::upstream::InfoHash;

/// Cached probe outcome for one infohash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeVerdict {
    pub infohash: InfoHash,
    pub needs_transcode: bool,
    pub decided_at: Instant,
}

impl TranscodeVerdict {
    pub fn age(&self) -> Duration {
        self.decided_at.elapsed()
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age() < ttl
    }
}

/// Shared verdict store with per-key probe serialization.
///
/// Readers take a shared lock only. Probing is serialized per infohash via
/// [`DecisionCache::probe_lock`] so concurrent first requests for the same
/// stream run one probe between them.
#[derive(Debug)]
pub struct DecisionCache {
    ttl: Duration,
    verdicts: RwLock<HashMap<InfoHash, TranscodeVerdict>>,
    probe_locks: Mutex<HashMap<InfoHash, Arc<tokio::sync::Mutex<()>>>>,
}

impl DecisionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            verdicts: RwLock::new(HashMap::new()),
            probe_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh verdict for `infohash`, or `None` if missing or expired.
    pub fn get(&self, infohash: &InfoHash) -> Option<TranscodeVerdict> {
        self.verdicts
            .read()
            .get(infohash)
            .filter(|v| v.is_fresh(self.ttl))
            .cloned()
    }

    /// Stores a new verdict, replacing any previous one.
    pub fn put(&self, infohash: InfoHash, needs_transcode: bool) -> TranscodeVerdict {
        let verdict = TranscodeVerdict {
            infohash: infohash.clone(),
            needs_transcode,
            decided_at: Instant::now(),
        };
        self.verdicts.write().insert(infohash, verdict.clone());
        verdict
    }

    /// Async lock that must be held while probing `infohash`.
    ///
    /// Holders re-check [`DecisionCache::get`] after acquiring it; a verdict
    /// stored by the previous holder makes a second probe unnecessary.
    pub fn probe_lock(&self, infohash: &InfoHash) -> Arc<tokio::sync::Mutex<()>> {
        self.probe_locks
            .lock()
            .entry(infohash.clone())
            .or_default()
            .clone()
    }

    /// Number of stored verdicts, fresh or not.
    pub fn len(&self) -> usize {
        self.verdicts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.verdicts.read().is_empty()
    }
}
