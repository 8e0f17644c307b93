use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info, trace, warn};

use relay_common::{AllocContext, EndpointId, Fifo, Unit, UnitClass};

use crate::{param, Enqueue, PolicyError, PolicySet};

const DEFAULT_Q_THRESHOLD: usize = 20;
const DEFAULT_Q_MAX: usize = 200;

/// A DCTCP-style marking policy set.
///
/// Each endpoint has a single FIFO shared by both classes. While the queue holds between
/// `q_threshold` and `q_max` units, arriving units are congestion-marked. At `q_max`, data
/// units are dropped but management units are still admitted.
#[derive(Debug)]
pub struct DctcpPolicy {
    q_threshold: AtomicUsize,
    q_max: AtomicUsize,
}

/// Queue state of the [`DctcpPolicy`].
#[derive(Debug)]
pub struct DctcpQueue {
    endpoint: EndpointId,
    queue: Fifo<Unit>,
    /// Number of management units in `queue`.
    mgmt: usize,
}

impl Default for DctcpPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl DctcpPolicy {
    pub fn new() -> Self {
        Self {
            q_threshold: AtomicUsize::new(DEFAULT_Q_THRESHOLD),
            q_max: AtomicUsize::new(DEFAULT_Q_MAX),
        }
    }

    #[inline]
    pub fn q_max(&self) -> usize {
        self.q_max.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn q_threshold(&self) -> usize {
        self.q_threshold.load(Ordering::Relaxed)
    }
}

impl PolicySet for DctcpPolicy {
    type Queue = DctcpQueue;

    fn name(&self) -> &'static str {
        "dctcp"
    }

    fn create_queue(
        &self,
        endpoint: EndpointId,
        ctx: AllocContext,
    ) -> Result<DctcpQueue, PolicyError> {
        let queue = Fifo::with_capacity(self.q_max(), ctx)?;
        debug!(%endpoint, "Created DCTCP queue");

        Ok(DctcpQueue { endpoint, queue, mgmt: 0 })
    }

    fn destroy_queue(&self, mut queue: DctcpQueue) {
        let flushed = queue.queue.flush();
        debug!(endpoint = %queue.endpoint, flushed, "Destroyed DCTCP queue");
    }

    fn enqueue(&self, queue: &mut DctcpQueue, mut unit: Unit, must_enqueue: bool) -> Enqueue {
        let len = queue.queue.len();
        let q_max = self.q_max();

        if len >= q_max {
            if !unit.is_management() {
                trace!(endpoint = %queue.endpoint, q_max, "DCTCP queue full, dropping unit");
                return Enqueue::Dropped;
            }
        } else if len >= self.q_threshold() {
            unit.mark_congested();
            trace!(endpoint = %queue.endpoint, len, "Marked unit with ECN");
        }

        if !must_enqueue && queue.queue.is_empty() {
            return Enqueue::SendNow(unit);
        }

        if unit.is_management() {
            queue.mgmt += 1;
        }
        queue.queue.push(unit);
        Enqueue::Scheduled
    }

    fn dequeue(&self, queue: &mut DctcpQueue) -> Option<Unit> {
        let unit = queue.queue.pop()?;
        if unit.is_management() {
            queue.mgmt -= 1;
        }

        Some(unit)
    }

    fn set_param(&self, name: &str, value: &str) -> Result<(), PolicyError> {
        match name {
            "q_threshold" => {
                let q_threshold = param::parse(name, value)?;
                self.q_threshold.store(q_threshold, Ordering::Relaxed);
                info!(q_threshold, "Queue marking threshold set");
            }
            "q_max" => {
                let q_max = param::parse(name, value)?;
                self.q_max.store(q_max, Ordering::Relaxed);
                info!(q_max, "Queue max occupancy set");
            }
            _ => warn!(name, value, "No such parameter, ignoring"),
        }

        Ok(())
    }

    fn queue_depth(&self, queue: &DctcpQueue, class: UnitClass) -> usize {
        match class {
            UnitClass::Management => queue.mgmt,
            UnitClass::Data => queue.queue.len() - queue.mgmt,
        }
    }

    fn threshold(&self) -> usize {
        self.q_threshold()
    }
}
