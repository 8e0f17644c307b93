use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info, trace, warn};

use relay_common::{AllocContext, EndpointId, Fifo, Unit, UnitClass};

use crate::{param, Enqueue, PolicyError, PolicySet};

const DEFAULT_Q_MAX: usize = 1000;
const DEFAULT_QTH_MIN: usize = 35;
const DEFAULT_QTH_MAX: usize = 300;
const DEFAULT_WLOG: u32 = 3;
const DEFAULT_MAX_P: f64 = 0.1;

/// Largest accepted averaging weight exponent.
const MAX_WLOG: u32 = 31;

const MGMT_RESERVE: usize = 64;

/// Random early detection, signalled through congestion marks.
///
/// Every data enqueue updates an exponentially weighted average of the data queue length:
/// `avg += (len - avg) / 2^wlog`. Below `qth_min` units are admitted untouched. Between
/// `qth_min` and `qth_max` a unit is marked with probability
/// `max_p * (avg - qth_min) / (qth_max - qth_min)`. At or above `qth_max`, or once `q_max` units
/// are queued, data units are dropped. Management units use their own FIFO and are served first,
/// as with the [`DefaultPolicy`](crate::DefaultPolicy).
#[derive(Debug)]
pub struct RedPolicy {
    q_max: AtomicUsize,
    qth_min: AtomicUsize,
    qth_max: AtomicUsize,
    wlog: AtomicU32,
    /// `f64` bits.
    max_p: AtomicU64,
    /// Serializes [`set_param`](PolicySet::set_param), which checks `qth_min < qth_max` across
    /// two atomics.
    update: Mutex<()>,
}

/// Queue state of the [`RedPolicy`].
#[derive(Debug)]
pub struct RedQueue {
    endpoint: EndpointId,
    mgmt: Fifo<Unit>,
    data: Fifo<Unit>,
    avg: f64,
    rng: StdRng,
}

impl RedQueue {
    /// The current average data queue length.
    pub fn average(&self) -> f64 {
        self.avg
    }
}

impl Default for RedPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RedPolicy {
    pub fn new() -> Self {
        Self {
            q_max: AtomicUsize::new(DEFAULT_Q_MAX),
            qth_min: AtomicUsize::new(DEFAULT_QTH_MIN),
            qth_max: AtomicUsize::new(DEFAULT_QTH_MAX),
            wlog: AtomicU32::new(DEFAULT_WLOG),
            max_p: AtomicU64::new(DEFAULT_MAX_P.to_bits()),
            update: Mutex::new(()),
        }
    }

    #[inline]
    pub fn q_max(&self) -> usize {
        self.q_max.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn qth_min(&self) -> usize {
        self.qth_min.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn qth_max(&self) -> usize {
        self.qth_max.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn wlog(&self) -> u32 {
        self.wlog.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn max_p(&self) -> f64 {
        f64::from_bits(self.max_p.load(Ordering::Relaxed))
    }

    /// Marking probability for the given average.
    fn probability(&self, avg: f64) -> f64 {
        let min = self.qth_min() as f64;
        let max = self.qth_max() as f64;

        self.max_p() * (avg - min) / (max - min)
    }
}

impl PolicySet for RedPolicy {
    type Queue = RedQueue;

    fn name(&self) -> &'static str {
        "red"
    }

    fn create_queue(
        &self,
        endpoint: EndpointId,
        ctx: AllocContext,
    ) -> Result<RedQueue, PolicyError> {
        let data = Fifo::with_capacity(self.q_max(), ctx)?;
        let mgmt = Fifo::with_capacity(MGMT_RESERVE, ctx)?;

        debug!(
            %endpoint,
            qth_min = self.qth_min(),
            qth_max = self.qth_max(),
            "Created RED queues"
        );
        Ok(RedQueue {
            endpoint,
            mgmt,
            data,
            avg: 0.0,
            rng: StdRng::seed_from_u64(u64::from(endpoint.get())),
        })
    }

    fn destroy_queue(&self, mut queue: RedQueue) {
        let flushed = queue.mgmt.flush() + queue.data.flush();
        debug!(endpoint = %queue.endpoint, flushed, "Destroyed RED queues");
    }

    fn enqueue(&self, queue: &mut RedQueue, mut unit: Unit, must_enqueue: bool) -> Enqueue {
        if unit.is_management() {
            if !must_enqueue && queue.mgmt.is_empty() {
                return Enqueue::SendNow(unit);
            }

            queue.mgmt.push(unit);
            return Enqueue::Scheduled;
        }

        let len = queue.data.len();
        if len >= self.q_max() {
            trace!(endpoint = %queue.endpoint, len, "RED queue full, dropping unit");
            return Enqueue::Dropped;
        }

        let weight = 1.0 / f64::from(1u32 << self.wlog());
        queue.avg += (len as f64 - queue.avg) * weight;

        if queue.avg >= self.qth_max() as f64 {
            trace!(endpoint = %queue.endpoint, avg = queue.avg, "Average above qth_max, dropping");
            return Enqueue::Dropped;
        }

        if queue.avg >= self.qth_min() as f64 {
            let p = self.probability(queue.avg);
            if queue.rng.gen::<f64>() < p {
                unit.mark_congested();
            }
        }

        if !must_enqueue && queue.data.is_empty() {
            return Enqueue::SendNow(unit);
        }

        queue.data.push(unit);
        Enqueue::Scheduled
    }

    fn dequeue(&self, queue: &mut RedQueue) -> Option<Unit> {
        if !queue.mgmt.is_empty() {
            return queue.mgmt.pop();
        }

        queue.data.pop()
    }

    fn set_param(&self, name: &str, value: &str) -> Result<(), PolicyError> {
        let _guard = self.update.lock();

        match name {
            "q_max" => {
                let q_max = param::parse(name, value)?;
                self.q_max.store(q_max, Ordering::Relaxed);
                info!(q_max, "Queue max occupancy set");
            }
            "qth_min" => {
                let qth_min: usize = param::parse(name, value)?;
                if qth_min >= self.qth_max() {
                    return Err(PolicyError::InvalidArgument(format!(
                        "qth_min {qth_min} must be below qth_max {}",
                        self.qth_max()
                    )));
                }
                self.qth_min.store(qth_min, Ordering::Relaxed);
                info!(qth_min, "RED minimum threshold set");
            }
            "qth_max" => {
                let qth_max: usize = param::parse(name, value)?;
                if qth_max <= self.qth_min() {
                    return Err(PolicyError::InvalidArgument(format!(
                        "qth_max {qth_max} must be above qth_min {}",
                        self.qth_min()
                    )));
                }
                self.qth_max.store(qth_max, Ordering::Relaxed);
                info!(qth_max, "RED maximum threshold set");
            }
            "wlog" => {
                let wlog: u32 = param::parse(name, value)?;
                if wlog > MAX_WLOG {
                    return Err(PolicyError::InvalidArgument(format!(
                        "wlog {wlog} exceeds {MAX_WLOG}"
                    )));
                }
                self.wlog.store(wlog, Ordering::Relaxed);
                info!(wlog, "RED averaging weight set");
            }
            "max_p" => {
                let max_p: f64 = param::parse(name, value)?;
                if !(max_p > 0.0 && max_p <= 1.0) {
                    return Err(PolicyError::InvalidArgument(format!(
                        "max_p {max_p} is not in (0, 1]"
                    )));
                }
                self.max_p.store(max_p.to_bits(), Ordering::Relaxed);
                info!(max_p, "RED maximum marking probability set");
            }
            _ => warn!(name, value, "No such parameter, ignoring"),
        }

        Ok(())
    }

    fn queue_depth(&self, queue: &RedQueue, class: UnitClass) -> usize {
        match class {
            UnitClass::Management => queue.mgmt.len(),
            UnitClass::Data => queue.data.len(),
        }
    }

    fn threshold(&self) -> usize {
        self.qth_min()
    }
}
