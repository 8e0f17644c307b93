use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use tokio::sync::{futures::Notified, Notify};

/// The producers feeding a device.
///
/// [`resume`](Upstream::resume) is the resume signal: the device has room again and blocked
/// producers may transmit. It is called from the dequeue path with the sub-queue's lock held,
/// so implementations must not transmit to or dequeue from the same device inline.
pub trait Upstream: Send + Sync + 'static {
    fn resume(&self);
}

impl fmt::Debug for dyn Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Upstream")
    }
}

/// An [`Upstream`] that ignores resume signals.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUpstream;

impl Upstream for NoopUpstream {
    fn resume(&self) {}
}

/// An [`Upstream`] that wakes async producers waiting for the device to become writable.
#[derive(Debug, Default)]
pub struct NotifyUpstream {
    notify: Notify,
    resumes: AtomicU64,
}

impl NotifyUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the next resume signal. Only signals sent after the call are observed.
    pub async fn writable(&self) {
        self.notify.notified().await;
    }

    /// Returns a future for the next resume signal. Enabling it before checking the device
    /// avoids missing a signal sent in between.
    pub fn notified(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// The number of resume signals received.
    #[inline]
    pub fn resumes(&self) -> u64 {
        self.resumes.load(Ordering::Relaxed)
    }
}

impl Upstream for NotifyUpstream {
    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::Relaxed);
        self.notify.notify_waiters();
    }
}
