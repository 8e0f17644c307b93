use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use relay_common::Unit;

use crate::{
    Backpressure, Discipline, DisciplineStats, EgressError, EgressOptions, Passthrough, Upstream,
    Verdict, BACKPRESSURE_ID,
};

/// A transmit sub-queue and its attached discipline.
#[derive(Debug)]
struct TxQueue {
    discipline: Mutex<Box<dyn Discipline>>,
    /// Set by the host while the sub-queue cannot be reconfigured.
    frozen: AtomicBool,
}

impl TxQueue {
    fn new() -> Self {
        Self {
            discipline: Mutex::new(Box::new(Passthrough::new())),
            frozen: AtomicBool::new(false),
        }
    }

    /// Replaces the attached discipline, returning the previous one.
    fn attach(&self, discipline: Box<dyn Discipline>) -> Box<dyn Discipline> {
        std::mem::replace(&mut *self.discipline.lock(), discipline)
    }
}

/// A network device with one or more transmit sub-queues.
#[derive(Debug)]
pub struct Device {
    name: String,
    queues: Vec<TxQueue>,
    upstream: Arc<dyn Upstream>,
    /// Serializes [`install`] and [`restore`].
    config: Mutex<()>,
}

impl Device {
    /// Creates a device with `num_tx_queues` sub-queues running the [`Passthrough`] discipline.
    /// Resume signals of installed disciplines go to `upstream`.
    pub fn new(name: impl Into<String>, num_tx_queues: usize, upstream: Arc<dyn Upstream>) -> Self {
        let queues = (0..num_tx_queues).map(|_| TxQueue::new()).collect();
        Self { name: name.into(), queues, upstream, config: Mutex::new(()) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_tx_queues(&self) -> usize {
        self.queues.len()
    }

    pub fn upstream(&self) -> &Arc<dyn Upstream> {
        &self.upstream
    }

    fn queue(&self, index: usize) -> Result<&TxQueue, EgressError> {
        self.queues
            .get(index)
            .ok_or_else(|| EgressError::NoSuchQueue { device: self.name.clone(), index })
    }

    /// Hands `unit` to sub-queue `index`.
    pub fn transmit(&self, index: usize, unit: Unit) -> Result<Verdict, EgressError> {
        Ok(self.queue(index)?.discipline.lock().enqueue(unit))
    }

    /// Takes the next unit off sub-queue `index`, as the driver does when it has room.
    pub fn dequeue(&self, index: usize) -> Result<Option<Unit>, EgressError> {
        Ok(self.queue(index)?.discipline.lock().dequeue())
    }

    /// Returns a copy of the unit [`dequeue`](Self::dequeue) would return next, leaving it
    /// buffered.
    pub fn peek(&self, index: usize) -> Result<Option<Unit>, EgressError> {
        Ok(self.queue(index)?.discipline.lock().peek().cloned())
    }

    /// Number of units buffered on sub-queue `index`.
    pub fn queue_len(&self, index: usize) -> Result<usize, EgressError> {
        Ok(self.queue(index)?.discipline.lock().len())
    }

    /// The identity of the discipline attached to sub-queue `index`.
    pub fn discipline_id(&self, index: usize) -> Result<&'static str, EgressError> {
        Ok(self.queue(index)?.discipline.lock().id())
    }

    pub fn queue_stats(&self, index: usize) -> Result<DisciplineStats, EgressError> {
        Ok(self.queue(index)?.discipline.lock().stats())
    }

    /// Flushes sub-queue `index` and resets its discipline. The producers are resumed, since
    /// the flushed sub-queue will not drain through its enable threshold again.
    pub fn reset(&self, index: usize) -> Result<(), EgressError> {
        self.queue(index)?.discipline.lock().reset();
        self.upstream.resume();
        Ok(())
    }

    /// Marks sub-queue `index` as frozen. Attaching a new discipline to a frozen sub-queue
    /// fails with [`EgressError::QueueFrozen`].
    pub fn freeze(&self, index: usize) -> Result<(), EgressError> {
        self.queue(index)?.frozen.store(true, Ordering::Release);
        Ok(())
    }

    pub fn thaw(&self, index: usize) -> Result<(), EgressError> {
        self.queue(index)?.frozen.store(false, Ordering::Release);
        Ok(())
    }
}

/// Installs the [`Backpressure`] discipline on every sub-queue of `device`.
pub fn install(
    device: &Device,
    max_size: usize,
    enable_threshold: usize,
) -> Result<(), EgressError> {
    let options = EgressOptions::default().max_size(max_size).enable_threshold(enable_threshold);
    install_with(device, options)
}

/// Installs the [`Backpressure`] discipline on every sub-queue of `device`, replacing whatever
/// was attached and destroying the units it buffered. Does nothing if the device already carries
/// the discipline.
///
/// ## Errors
/// - [`EgressError::InvalidArgument`] if `enable_threshold >= max_size`.
/// - [`EgressError::ResourceExhausted`] if a sub-queue could not be allocated.
/// - [`EgressError::QueueFrozen`] if the host refused to reconfigure a sub-queue.
///
/// On failure, the sub-queues configured so far are restored.
pub fn install_with(device: &Device, options: EgressOptions) -> Result<(), EgressError> {
    options.validate()?;

    let _guard = device.config.lock();

    if let Some(root) = device.queues.first() {
        if root.discipline.lock().id() == BACKPRESSURE_ID {
            debug!(device = %device.name, "Backpressure already installed");
            return Ok(());
        }
    }

    for (index, queue) in device.queues.iter().enumerate() {
        if let Err(e) = graft(device, index, queue, &options) {
            error!(device = %device.name, index, "Failed to install backpressure: {e}");
            restore_queues(device, &device.queues[..index]);
            return Err(e);
        }
    }

    info!(
        device = %device.name,
        queues = device.queues.len(),
        max_size = options.max_size,
        enable_threshold = options.enable_threshold,
        "Installed backpressure"
    );

    Ok(())
}

fn graft(
    device: &Device,
    index: usize,
    queue: &TxQueue,
    options: &EgressOptions,
) -> Result<(), EgressError> {
    if queue.frozen.load(Ordering::Acquire) {
        return Err(EgressError::QueueFrozen(index));
    }

    let discipline = Backpressure::new(options, Arc::clone(&device.upstream))?;
    let old = queue.attach(Box::new(discipline));
    if !old.is_empty() {
        warn!(device = %device.name, index, flushed = old.len(), "Replaced discipline");
    }

    Ok(())
}

/// Reverts every sub-queue of `device` to the [`Passthrough`] discipline, destroying the units
/// they buffered, and resumes the producers held back by the removed disciplines.
pub fn restore(device: &Device) {
    let _guard = device.config.lock();
    restore_queues(device, &device.queues);
    device.upstream.resume();
    info!(device = %device.name, "Restored default queueing");
}

fn restore_queues(device: &Device, queues: &[TxQueue]) {
    for queue in queues {
        let old = queue.attach(Box::new(Passthrough::new()));
        debug!(device = %device.name, discipline = old.id(), flushed = old.len(), "Detached");
    }
}
