use std::fmt;

use relay_common::{Fifo, Unit};

/// Identity of the [`Passthrough`] discipline.
pub const PASSTHROUGH_ID: &str = "passthrough";

/// Default limit of the passthrough discipline, the usual transmit queue length of a host
/// interface.
const DEFAULT_TX_QUEUE_LEN: usize = 1000;

/// The outcome of [`Discipline::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum Verdict {
    Queued,
    /// The unit was destroyed.
    Dropped,
}

/// Counters kept by every discipline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisciplineStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped: u64,
    /// Resume signals sent upstream.
    pub resumes: u64,
}

/// The contract of a pluggable egress queueing discipline attached to a transmit sub-queue.
pub trait Discipline: Send + fmt::Debug {
    /// The identity of the discipline kind.
    fn id(&self) -> &'static str;

    fn enqueue(&mut self, unit: Unit) -> Verdict;

    fn dequeue(&mut self) -> Option<Unit>;

    fn peek(&self) -> Option<&Unit>;

    /// Destroys every buffered unit and returns the discipline to its initial state.
    fn reset(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn stats(&self) -> DisciplineStats;
}

/// The default discipline: a bounded FIFO that never signals producers.
#[derive(Debug)]
pub struct Passthrough {
    queue: Fifo<Unit>,
    limit: usize,
    stats: DisciplineStats,
}

impl Default for Passthrough {
    fn default() -> Self {
        Self::new()
    }
}

impl Passthrough {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_TX_QUEUE_LEN)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self { queue: Fifo::new(), limit, stats: DisciplineStats::default() }
    }
}

impl Discipline for Passthrough {
    fn id(&self) -> &'static str {
        PASSTHROUGH_ID
    }

    fn enqueue(&mut self, unit: Unit) -> Verdict {
        if self.queue.len() >= self.limit {
            self.stats.dropped += 1;
            return Verdict::Dropped;
        }

        self.queue.push(unit);
        self.stats.enqueued += 1;
        Verdict::Queued
    }

    fn dequeue(&mut self) -> Option<Unit> {
        let unit = self.queue.pop()?;
        self.stats.dequeued += 1;
        Some(unit)
    }

    fn peek(&self) -> Option<&Unit> {
        self.queue.peek()
    }

    fn reset(&mut self) {
        self.queue.flush();
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn stats(&self) -> DisciplineStats {
        self.stats
    }
}
