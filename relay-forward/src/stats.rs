use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for a bound endpoint. These are shared between the relay and whoever asked for
/// them through [`Relay::endpoint_stats`](crate::Relay::endpoint_stats).
#[derive(Debug, Default)]
pub struct EndpointStats {
    /// Units scheduled on the endpoint queue
    queued: AtomicU64,
    /// Units handed on for transmission, either immediately or after queueing
    sent: AtomicU64,
    /// Units destroyed by the policy or the egress discipline
    dropped: AtomicU64,
    /// Submits that failed
    errors: AtomicU64,
    /// Congestion-marked units handed on
    marked: AtomicU64,
}

impl EndpointStats {
    #[inline]
    pub(crate) fn increment_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_sent(&self, marked: bool) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        if marked {
            self.marked.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn increment_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn increment_errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn marked(&self) -> u64 {
        self.marked.load(Ordering::Relaxed)
    }
}
