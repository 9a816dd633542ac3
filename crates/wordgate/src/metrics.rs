//! Metrics collector (spec §4.M): in-memory counters, a rejection-code
//! breakdown, a bounded ring of processing times, and the latest pool/IMAP
//! health snapshots. Derived rates are computed on read, never stored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::pool::PoolStatus;
use crate::state::ImapSummary;

const PROCESSING_TIME_RING_SIZE: usize = 100;

#[derive(Debug, Default)]
struct Counters {
    tasks_received: AtomicU64,
    tasks_accepted: AtomicU64,
    tasks_rejected: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub tasks_received: u64,
    pub tasks_accepted: u64,
    pub tasks_rejected: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub rejection_codes: HashMap<String, u64>,
    pub acceptance_rate: f64,
    pub success_rate: f64,
    pub avg_processing_time_ms: f64,
    pub recent_processing_times_ms: Vec<u64>,
    pub pool: Option<PoolStatus>,
    pub imap: Option<ImapSummary>,
}

/// Process-wide metrics store. Cheap to clone (it's an `Arc` internally via
/// the caller holding `Arc<MetricsCollector>`); all operations take `&self`.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: Counters,
    rejection_codes: RwLock<HashMap<String, u64>>,
    processing_times_ms: RwLock<Vec<u64>>,
    pool_status: RwLock<Option<PoolStatus>>,
    imap_status: RwLock<Option<ImapSummary>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.counters.tasks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.counters.tasks_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self, code: &str) {
        self.counters.tasks_rejected.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut codes) = self.rejection_codes.write() {
            *codes.entry(code.to_string()).or_default() += 1;
        }
    }

    pub fn record_completed(&self, processing_time_ms: u64) {
        self.counters.tasks_completed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut ring) = self.processing_times_ms.write() {
            ring.push(processing_time_ms);
            if ring.len() > PROCESSING_TIME_RING_SIZE {
                let overflow = ring.len() - PROCESSING_TIME_RING_SIZE;
                ring.drain(0..overflow);
            }
        }
    }

    pub fn record_failed(&self) {
        self.counters.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_pool_status(&self, status: PoolStatus) {
        if let Ok(mut slot) = self.pool_status.write() {
            *slot = Some(status);
        }
    }

    pub fn set_imap_status(&self, status: ImapSummary) {
        if let Ok(mut slot) = self.imap_status.write() {
            *slot = Some(status);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let received = self.counters.tasks_received.load(Ordering::Relaxed);
        let accepted = self.counters.tasks_accepted.load(Ordering::Relaxed);
        let rejected = self.counters.tasks_rejected.load(Ordering::Relaxed);
        let completed = self.counters.tasks_completed.load(Ordering::Relaxed);
        let failed = self.counters.tasks_failed.load(Ordering::Relaxed);

        let rejection_codes = self.rejection_codes.read().map(|m| m.clone()).unwrap_or_default();
        let recent = self.processing_times_ms.read().map(|v| v.clone()).unwrap_or_default();
        let avg_processing_time_ms = if recent.is_empty() {
            0.0
        } else {
            recent.iter().sum::<u64>() as f64 / recent.len() as f64
        };

        let decided = accepted + rejected;
        let acceptance_rate = if decided == 0 { 0.0 } else { accepted as f64 / decided as f64 };
        let finished = completed + failed;
        let success_rate = if finished == 0 { 0.0 } else { completed as f64 / finished as f64 };

        MetricsSnapshot {
            tasks_received: received,
            tasks_accepted: accepted,
            tasks_rejected: rejected,
            tasks_completed: completed,
            tasks_failed: failed,
            rejection_codes,
            acceptance_rate,
            success_rate,
            avg_processing_time_ms,
            recent_processing_times_ms: recent,
            pool: self.pool_status.read().ok().and_then(|s| *s),
            imap: self.imap_status.read().ok().and_then(|s| s.clone()),
        }
    }

    pub fn export_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or_default()
    }
}
