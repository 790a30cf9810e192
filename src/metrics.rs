//! Request counters and latency statistics.
//!
//! Purely observational: nothing in the decision pipeline reads these values.
//! Counters are monotonic atomics; latency goes through small mutex-guarded
//! histograms with fixed millisecond buckets, one per request kind so a whole
//! batch never skews single-request percentiles.

use crate::cache::CacheStats;
use crate::types::Mode;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Upper bounds (inclusive) of the latency buckets, in milliseconds
pub const LATENCY_BUCKETS_MS: [f64; 9] = [5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Classification,
    Qa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Chat,
    Classify,
    Batch,
}

#[derive(Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone)]
struct LatencyHistogram {
    count: u64,
    sum_ms: f64,
    min_ms: f64,
    max_ms: f64,
    // last slot counts everything above the largest bound
    buckets: [u64; LATENCY_BUCKETS_MS.len() + 1],
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self {
            count: 0,
            sum_ms: 0.0,
            min_ms: 0.0,
            max_ms: 0.0,
            buckets: [0; LATENCY_BUCKETS_MS.len() + 1],
        }
    }
}

impl LatencyHistogram {
    fn record(&mut self, ms: f64) {
        let ms = if ms.is_finite() { ms.max(0.0) } else { 0.0 };
        if self.count == 0 {
            self.min_ms = ms;
            self.max_ms = ms;
        } else {
            self.min_ms = self.min_ms.min(ms);
            self.max_ms = self.max_ms.max(ms);
        }
        self.count += 1;
        self.sum_ms += ms;

        let slot = LATENCY_BUCKETS_MS
            .iter()
            .position(|bound| ms <= *bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.buckets[slot] += 1;
    }

    /// Upper bound of the bucket holding the q-quantile, capped at the observed max.
    fn quantile(&self, q: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let rank = ((q * self.count as f64).ceil() as u64).max(1);
        let mut seen = 0;
        for (slot, n) in self.buckets.iter().enumerate() {
            seen += n;
            if seen >= rank {
                return LATENCY_BUCKETS_MS
                    .get(slot)
                    .map_or(self.max_ms, |bound| bound.min(self.max_ms));
            }
        }
        self.max_ms
    }

    fn snapshot(&self) -> LatencySnapshot {
        let buckets = self
            .buckets
            .iter()
            .enumerate()
            .map(|(slot, count)| BucketCount {
                le_ms: LATENCY_BUCKETS_MS.get(slot).copied(),
                count: *count,
            })
            .collect();

        LatencySnapshot {
            count: self.count,
            mean_ms: if self.count == 0 {
                0.0
            } else {
                self.sum_ms / self.count as f64
            },
            min_ms: self.min_ms,
            max_ms: self.max_ms,
            p50_ms: self.quantile(0.50),
            p95_ms: self.quantile(0.95),
            buckets,
        }
    }
}

pub struct MetricsCollector {
    started_at: Instant,

    chat_requests: AtomicU64,
    classify_requests: AtomicU64,
    batch_requests: AtomicU64,
    batch_items: AtomicU64,

    knowledge_responses: AtomicU64,
    conversational_responses: AtomicU64,
    fallback_responses: AtomicU64,

    timeouts: AtomicU64,
    classifier_degraded: AtomicU64,
    qa_failures: AtomicU64,

    classification_cache: CacheCounters,
    qa_cache: CacheCounters,

    chat_latency: Mutex<LatencyHistogram>,
    classify_latency: Mutex<LatencyHistogram>,
    batch_latency: Mutex<LatencyHistogram>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            chat_requests: AtomicU64::new(0),
            classify_requests: AtomicU64::new(0),
            batch_requests: AtomicU64::new(0),
            batch_items: AtomicU64::new(0),
            knowledge_responses: AtomicU64::new(0),
            conversational_responses: AtomicU64::new(0),
            fallback_responses: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            classifier_degraded: AtomicU64::new(0),
            qa_failures: AtomicU64::new(0),
            classification_cache: CacheCounters::default(),
            qa_cache: CacheCounters::default(),
            chat_latency: Mutex::new(LatencyHistogram::default()),
            classify_latency: Mutex::new(LatencyHistogram::default()),
            batch_latency: Mutex::new(LatencyHistogram::default()),
        }
    }

    pub fn record_request(&self, kind: RequestKind) {
        let counter = match kind {
            RequestKind::Chat => &self.chat_requests,
            RequestKind::Classify => &self.classify_requests,
            RequestKind::Batch => &self.batch_requests,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_items(&self, items: usize) {
        self.batch_items.fetch_add(items as u64, Ordering::Relaxed);
    }

    pub fn record_mode(&self, mode: Mode) {
        let counter = match mode {
            Mode::Knowledge => &self.knowledge_responses,
            Mode::Conversational => &self.conversational_responses,
            Mode::Fallback => &self.fallback_responses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self, kind: CacheKind) {
        self.cache_counters(kind).hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self, kind: CacheKind) {
        self.cache_counters(kind).misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_classifier_degraded(&self) {
        self.classifier_degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_qa_failure(&self) {
        self.qa_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch records one sample for the whole batch.
    pub fn record_latency(&self, kind: RequestKind, ms: f64) {
        self.histogram(kind).lock().record(ms);
    }

    fn histogram(&self, kind: RequestKind) -> &Mutex<LatencyHistogram> {
        match kind {
            RequestKind::Chat => &self.chat_latency,
            RequestKind::Classify => &self.classify_latency,
            RequestKind::Batch => &self.batch_latency,
        }
    }

    fn cache_counters(&self, kind: CacheKind) -> &CacheCounters {
        match kind {
            CacheKind::Classification => &self.classification_cache,
            CacheKind::Qa => &self.qa_cache,
        }
    }

    fn cache_snapshot(&self, kind: CacheKind, stats: CacheStats) -> CacheSnapshot {
        let counters = self.cache_counters(kind);
        let hits = counters.hits.load(Ordering::Relaxed);
        let misses = counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheSnapshot {
            name: stats.name,
            hits,
            misses,
            hit_ratio: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            entries: stats.entries,
            capacity: stats.capacity,
            insertions: stats.insertions,
            evictions: stats.evictions,
            expirations: stats.expirations,
        }
    }

    /// Read-only view, merged with the caches' own occupancy stats.
    pub fn snapshot(&self, classification: CacheStats, qa: CacheStats) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            requests: RequestCounts {
                chat: load(&self.chat_requests),
                classify: load(&self.classify_requests),
                batch: load(&self.batch_requests),
                batch_items: load(&self.batch_items),
            },
            modes: ModeCounts {
                knowledge: load(&self.knowledge_responses),
                conversational: load(&self.conversational_responses),
                fallback: load(&self.fallback_responses),
            },
            degradations: DegradationCounts {
                timeouts: load(&self.timeouts),
                classifier_degraded: load(&self.classifier_degraded),
                qa_failures: load(&self.qa_failures),
            },
            caches: vec![
                self.cache_snapshot(CacheKind::Classification, classification),
                self.cache_snapshot(CacheKind::Qa, qa),
            ],
            latency: LatencyBreakdown {
                chat: self.chat_latency.lock().snapshot(),
                classify: self.classify_latency.lock().snapshot(),
                batch: self.batch_latency.lock().snapshot(),
            },
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestCounts {
    pub chat: u64,
    pub classify: u64,
    pub batch: u64,
    pub batch_items: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModeCounts {
    pub knowledge: u64,
    pub conversational: u64,
    pub fallback: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DegradationCounts {
    pub timeouts: u64,
    pub classifier_degraded: u64,
    pub qa_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheSnapshot {
    pub name: &'static str,
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub entries: usize,
    pub capacity: usize,
    pub insertions: u64,
    pub evictions: u64,
    pub expirations: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketCount {
    /// `None` for the overflow bucket
    pub le_ms: Option<f64>,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencySnapshot {
    pub count: u64,
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub buckets: Vec<BucketCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencyBreakdown {
    pub chat: LatencySnapshot,
    pub classify: LatencySnapshot,
    pub batch: LatencySnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub requests: RequestCounts,
    pub modes: ModeCounts,
    pub degradations: DegradationCounts,
    pub caches: Vec<CacheSnapshot>,
    pub latency: LatencyBreakdown,
}

impl MetricsSnapshot {
    pub fn cache(&self, name: &str) -> Option<&CacheSnapshot> {
        self.caches.iter().find(|c| c.name == name)
    }
}
