//! # Active Size Tracker
//!
//! Accounts for the body bytes of every response currently alive somewhere in the
//! crawler, so the engine can stop issuing downloads while too much payload is held
//! in memory.
//!
//! Membership does not keep a response alive. Tracking attaches a [`SizeRelease`] to
//! the response itself; when the last [`Response`] handle is dropped the release
//! runs, removing the entry and subtracting the bytes exactly once. Releases may run
//! on any thread, so the counter is atomic and the membership map is a `DashMap`.

use crate::response::Response;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct TrackerShared {
    active_size: AtomicUsize,
    members: DashMap<u64, usize>,
}

/// Subtracts one response's bytes from its tracker when dropped.
pub(crate) struct SizeRelease {
    shared: Arc<TrackerShared>,
    response_id: u64,
    size: usize,
}

impl Drop for SizeRelease {
    fn drop(&mut self) {
        self.shared.members.remove(&self.response_id);
        let previous = self.shared.active_size.fetch_sub(self.size, Ordering::SeqCst);
        debug!(
            "response_active_size={} -= size={} -> {}",
            previous,
            self.size,
            previous - self.size
        );
    }
}

/// Cumulative in-flight response size, shared by every run of one manager.
#[derive(Debug, Clone, Default)]
pub struct ActiveSizeTracker {
    shared: Arc<TrackerShared>,
}

impl ActiveSizeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts `response` into the active size unless it is already tracked here.
    ///
    /// Returns `true` when the response was newly tracked.
    pub fn track(&self, response: &Response) -> bool {
        let mut releases = response.releases().lock();
        if releases
            .iter()
            .any(|release| Arc::ptr_eq(&release.shared, &self.shared))
        {
            return false;
        }

        let size = response.body_len();
        self.shared.members.insert(response.id(), size);
        let previous = self.shared.active_size.fetch_add(size, Ordering::SeqCst);
        debug!(
            "response_active_size={} += size={} -> {}",
            previous,
            size,
            previous + size
        );
        releases.push(SizeRelease {
            shared: Arc::clone(&self.shared),
            response_id: response.id(),
            size,
        });
        true
    }

    /// Total body bytes of all tracked, still-alive responses.
    pub fn current_size(&self) -> usize {
        self.shared.active_size.load(Ordering::SeqCst)
    }

    /// Number of tracked, still-alive responses.
    pub fn tracked_responses(&self) -> usize {
        self.shared.members.len()
    }

    pub fn is_tracked(&self, response: &Response) -> bool {
        self.shared.members.contains_key(&response.id())
    }
}
