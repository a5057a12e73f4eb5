//! # Statistics Module
//!
//! Collects metrics about pipeline runs driven by the downloader task.
//!
//! ## Key Metrics Tracked
//!
//! - **Request Metrics**: received, downloaded, succeeded, failed, ignored and rescheduled
//! - **Response Metrics**: delivered, status code distribution and body bytes
//! - **Middleware Metrics**: invalid handler outputs
//! - **Backpressure**: how often the task waited for the active size to drop
//!
//! ## Example
//!
//! ```rust,ignore
//! let stats = pipeline.stats();
//! println!("{}", stats.to_json_string_pretty()?);
//! println!("{}", stats);
//! ```

use crate::error::PipelineError;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

struct StatsSnapshot {
    requests_received: usize,
    requests_downloaded: usize,
    requests_succeeded: usize,
    requests_failed: usize,
    requests_ignored: usize,
    requests_rescheduled: usize,
    invalid_outputs: usize,
    backpressure_waits: usize,
    total_bytes_received: usize,
    response_status_counts: HashMap<u16, usize>,
    elapsed_duration: Duration,
}

impl StatsSnapshot {
    fn requests_per_second(&self) -> f64 {
        let total_seconds = self.elapsed_duration.as_secs();
        if total_seconds > 0 {
            self.requests_received as f64 / total_seconds as f64
        } else {
            0.0
        }
    }

    fn formatted_bytes(&self) -> String {
        const KB: usize = 1024;
        const MB: usize = 1024 * KB;
        const GB: usize = 1024 * MB;

        if self.total_bytes_received >= GB {
            format!("{:.2} GB", self.total_bytes_received as f64 / GB as f64)
        } else if self.total_bytes_received >= MB {
            format!("{:.2} MB", self.total_bytes_received as f64 / MB as f64)
        } else if self.total_bytes_received >= KB {
            format!("{:.2} KB", self.total_bytes_received as f64 / KB as f64)
        } else {
            format!("{} B", self.total_bytes_received)
        }
    }
}

/// Counters updated by the downloader task.
#[derive(Debug, serde::Serialize)]
pub struct StatCollector {
    #[serde(skip)]
    pub start_time: Instant,

    pub requests_received: AtomicUsize,
    /// Runs that reached the transport.
    pub requests_downloaded: AtomicUsize,
    pub requests_succeeded: AtomicUsize,
    pub requests_failed: AtomicUsize,
    pub requests_ignored: AtomicUsize,
    pub requests_rescheduled: AtomicUsize,
    pub invalid_outputs: AtomicUsize,
    pub backpressure_waits: AtomicUsize,

    pub response_status_counts: Arc<dashmap::DashMap<u16, usize>>,
    pub total_bytes_received: AtomicUsize,
}

impl StatCollector {
    pub(crate) fn new() -> Self {
        StatCollector {
            start_time: Instant::now(),
            requests_received: AtomicUsize::new(0),
            requests_downloaded: AtomicUsize::new(0),
            requests_succeeded: AtomicUsize::new(0),
            requests_failed: AtomicUsize::new(0),
            requests_ignored: AtomicUsize::new(0),
            requests_rescheduled: AtomicUsize::new(0),
            invalid_outputs: AtomicUsize::new(0),
            backpressure_waits: AtomicUsize::new(0),
            response_status_counts: Arc::new(dashmap::DashMap::new()),
            total_bytes_received: AtomicUsize::new(0),
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        let mut status_counts: HashMap<u16, usize> = HashMap::new();
        for entry in self.response_status_counts.iter() {
            let (key, value) = entry.pair();
            status_counts.insert(*key, *value);
        }

        StatsSnapshot {
            requests_received: self.requests_received.load(Ordering::SeqCst),
            requests_downloaded: self.requests_downloaded.load(Ordering::SeqCst),
            requests_succeeded: self.requests_succeeded.load(Ordering::SeqCst),
            requests_failed: self.requests_failed.load(Ordering::SeqCst),
            requests_ignored: self.requests_ignored.load(Ordering::SeqCst),
            requests_rescheduled: self.requests_rescheduled.load(Ordering::SeqCst),
            invalid_outputs: self.invalid_outputs.load(Ordering::SeqCst),
            backpressure_waits: self.backpressure_waits.load(Ordering::SeqCst),
            total_bytes_received: self.total_bytes_received.load(Ordering::SeqCst),
            response_status_counts: status_counts,
            elapsed_duration: self.start_time.elapsed(),
        }
    }

    pub(crate) fn increment_requests_received(&self) {
        self.requests_received.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_downloaded(&self) {
        self.requests_downloaded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_succeeded(&self) {
        self.requests_succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_ignored(&self) {
        self.requests_ignored.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_rescheduled(&self) {
        self.requests_rescheduled.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_invalid_outputs(&self) {
        self.invalid_outputs.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_backpressure_waits(&self) {
        self.backpressure_waits.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a response status code.
    pub(crate) fn record_response_status(&self, status_code: u16) {
        *self.response_status_counts.entry(status_code).or_insert(0) += 1;
    }

    pub(crate) fn add_bytes_received(&self, bytes: usize) {
        self.total_bytes_received.fetch_add(bytes, Ordering::SeqCst);
    }

    pub fn to_json_string(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_string_pretty(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Default for StatCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StatCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();

        writeln!(f, "\nDownloader Statistics")?;
        writeln!(f, "---------------------")?;
        writeln!(f, "  duration : {:?}", snapshot.elapsed_duration)?;
        writeln!(f, "  speed    : req/s: {:.2}", snapshot.requests_per_second())?;
        writeln!(
            f,
            "  requests : received: {}, downloaded: {}, ok: {}, fail: {}, ignored: {}, rescheduled: {}",
            snapshot.requests_received,
            snapshot.requests_downloaded,
            snapshot.requests_succeeded,
            snapshot.requests_failed,
            snapshot.requests_ignored,
            snapshot.requests_rescheduled
        )?;
        writeln!(
            f,
            "  response : bytes: {}, invalid outputs: {}, backpressure waits: {}",
            snapshot.formatted_bytes(),
            snapshot.invalid_outputs,
            snapshot.backpressure_waits
        )?;

        let status_string = if snapshot.response_status_counts.is_empty() {
            "none".to_string()
        } else {
            let mut counts: Vec<_> = snapshot.response_status_counts.iter().collect();
            counts.sort();
            counts
                .iter()
                .map(|(code, count)| format!("{}: {}", code, count))
                .collect::<Vec<String>>()
                .join(", ")
        };

        writeln!(f, "  status   : {}\n", status_string)
    }
}
