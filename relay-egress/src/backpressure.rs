use std::sync::Arc;

use tracing::{debug, trace};

use relay_common::{Fifo, Unit};

use crate::{Discipline, DisciplineStats, EgressError, EgressOptions, Upstream, Verdict};

/// Identity of the [`Backpressure`] discipline.
pub const BACKPRESSURE_ID: &str = "relay_backpressure";

/// A bounded FIFO that signals producers after congestion.
///
/// When a unit has to be dropped because `max_size` units are queued, the discipline arms its
/// notification budget. As the queue later drains through `enable_threshold`, it starts sending
/// one resume signal per dequeue to the [`Upstream`] until the budget is spent. Spreading the
/// signals over successive dequeues keeps producers from all resuming on the same instant.
#[derive(Debug)]
pub struct Backpressure {
    queue: Fifo<Unit>,
    max_size: usize,
    enable_threshold: usize,
    budget_cap: u16,
    /// Resume signals left in this cycle.
    budget: u16,
    notifying: bool,
    upstream: Arc<dyn Upstream>,
    stats: DisciplineStats,
}

impl Backpressure {
    /// Creates the discipline, reserving `max_size` slots according to `options.alloc`.
    pub fn new(options: &EgressOptions, upstream: Arc<dyn Upstream>) -> Result<Self, EgressError> {
        options.validate()?;
        let queue = Fifo::with_capacity(options.max_size, options.alloc)?;

        Ok(Self {
            queue,
            max_size: options.max_size,
            enable_threshold: options.enable_threshold,
            budget_cap: options.notification_budget,
            budget: 0,
            notifying: false,
            upstream,
            stats: DisciplineStats::default(),
        })
    }

    /// Resume signals left in the current cycle.
    #[inline]
    pub fn budget(&self) -> u16 {
        self.budget
    }

    /// Returns `true` while the discipline is signalling producers.
    #[inline]
    pub fn is_notifying(&self) -> bool {
        self.notifying
    }
}

impl Discipline for Backpressure {
    fn id(&self) -> &'static str {
        BACKPRESSURE_ID
    }

    fn enqueue(&mut self, unit: Unit) -> Verdict {
        if self.queue.len() < self.max_size {
            self.queue.push(unit);
            self.stats.enqueued += 1;
            return Verdict::Queued;
        }

        // Full: arm a fresh cycle
        self.budget = self.budget_cap;
        self.notifying = false;
        self.stats.dropped += 1;
        trace!(max_size = self.max_size, "Transmit queue full, dropping unit");

        Verdict::Dropped
    }

    fn dequeue(&mut self) -> Option<Unit> {
        let unit = self.queue.pop()?;
        self.stats.dequeued += 1;

        if self.queue.len() == self.enable_threshold && self.budget == self.budget_cap {
            self.notifying = true;
        }

        if self.notifying && self.budget > 0 {
            self.budget -= 1;
            self.stats.resumes += 1;
            debug!(len = self.queue.len(), budget = self.budget, "Resuming upstream");
            self.upstream.resume();
        }

        Some(unit)
    }

    fn peek(&self) -> Option<&Unit> {
        self.queue.peek()
    }

    fn reset(&mut self) {
        self.queue.flush();
        self.budget = 0;
        self.notifying = false;
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn stats(&self) -> DisciplineStats {
        self.stats
    }
}
