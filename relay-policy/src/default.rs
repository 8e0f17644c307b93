use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use relay_common::{AllocContext, EndpointId, Fifo, Unit, UnitClass};

use crate::{param, Enqueue, PolicyError, PolicySet};

/// Default maximum number of queued data units per endpoint.
pub const DEFAULT_Q_MAX: usize = 1000;

/// Default queue length above which data units are congestion-marked.
pub const DEFAULT_Q_THRE: usize = 35;

/// Storage reserved up front for the management queue, which is not capacity-bound.
const MGMT_RESERVE: usize = 64;

/// The default policy set.
///
/// Every endpoint gets a management FIFO and a data FIFO. Management units always leave first.
/// Data units are tail-dropped once `q_max` are queued and congestion-marked while more than
/// `q_thre` are queued.
#[derive(Debug)]
pub struct DefaultPolicy {
    q_max: AtomicUsize,
    q_thre: AtomicUsize,
    /// Held by [`set_param`](PolicySet::set_param) so that `q_thre <= q_max` is checked and
    /// stored as one step. Readers only load the atomics.
    update: Mutex<()>,
}

/// Queue state of the [`DefaultPolicy`].
#[derive(Debug)]
pub struct DefaultQueue {
    endpoint: EndpointId,
    mgmt: Fifo<Unit>,
    data: Fifo<Unit>,
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultPolicy {
    pub fn new() -> Self {
        Self {
            q_max: AtomicUsize::new(DEFAULT_Q_MAX),
            q_thre: AtomicUsize::new(DEFAULT_Q_THRE),
            update: Mutex::new(()),
        }
    }

    #[inline]
    pub fn q_max(&self) -> usize {
        self.q_max.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn q_thre(&self) -> usize {
        self.q_thre.load(Ordering::Relaxed)
    }
}

impl PolicySet for DefaultPolicy {
    type Queue = DefaultQueue;

    fn name(&self) -> &'static str {
        "default"
    }

    fn create_queue(
        &self,
        endpoint: EndpointId,
        ctx: AllocContext,
    ) -> Result<DefaultQueue, PolicyError> {
        let data = Fifo::with_capacity(self.q_max(), ctx)?;
        let mgmt = Fifo::with_capacity(MGMT_RESERVE, ctx)?;

        debug!(%endpoint, q_max = self.q_max(), q_thre = self.q_thre(), "Created queues");
        Ok(DefaultQueue { endpoint, mgmt, data })
    }

    fn destroy_queue(&self, mut queue: DefaultQueue) {
        let flushed = queue.mgmt.flush() + queue.data.flush();
        debug!(endpoint = %queue.endpoint, flushed, "Destroyed queues");
    }

    fn enqueue(&self, queue: &mut DefaultQueue, mut unit: Unit, must_enqueue: bool) -> Enqueue {
        if unit.is_management() {
            if !must_enqueue && queue.mgmt.is_empty() {
                return Enqueue::SendNow(unit);
            }

            queue.mgmt.push(unit);
            return Enqueue::Scheduled;
        }

        let len = queue.data.len();
        if len >= self.q_max() {
            trace!(endpoint = %queue.endpoint, len, "Data queue full, dropping unit");
            return Enqueue::Dropped;
        }

        if len > self.q_thre() {
            unit.mark_congested();
        }

        if !must_enqueue && queue.data.is_empty() {
            return Enqueue::SendNow(unit);
        }

        queue.data.push(unit);
        Enqueue::Scheduled
    }

    fn dequeue(&self, queue: &mut DefaultQueue) -> Option<Unit> {
        if !queue.mgmt.is_empty() {
            return queue.mgmt.pop();
        }

        queue.data.pop()
    }

    fn set_param(&self, name: &str, value: &str) -> Result<(), PolicyError> {
        let _guard = self.update.lock();

        match name {
            "q_max" => {
                let q_max: usize = param::parse(name, value)?;
                if q_max < self.q_thre() {
                    return Err(PolicyError::InvalidArgument(format!(
                        "q_max {q_max} is below q_thre {}",
                        self.q_thre()
                    )));
                }
                self.q_max.store(q_max, Ordering::Relaxed);
                info!(q_max, "Queue max occupancy set");
            }
            "q_thre" => {
                let q_thre: usize = param::parse(name, value)?;
                if q_thre > self.q_max() {
                    return Err(PolicyError::InvalidArgument(format!(
                        "q_thre {q_thre} exceeds q_max {}",
                        self.q_max()
                    )));
                }
                self.q_thre.store(q_thre, Ordering::Relaxed);
                info!(q_thre, "Queue marking threshold set");
            }
            _ => warn!(name, value, "No such parameter, ignoring"),
        }

        Ok(())
    }

    fn queue_depth(&self, queue: &DefaultQueue, class: UnitClass) -> usize {
        match class {
            UnitClass::Management => queue.mgmt.len(),
            UnitClass::Data => queue.data.len(),
        }
    }

    fn threshold(&self) -> usize {
        self.q_thre()
    }
}
