//! Egress backpressure for device transmit queues.
//!
//! A [`Device`] owns one [`Discipline`] per transmit sub-queue. By default every sub-queue runs
//! the [`Passthrough`] discipline. [`install`] replaces them with the [`Backpressure`]
//! discipline, which enforces a hard capacity and, after it had to drop a unit, spreads a
//! bounded number of resume signals to the device's [`Upstream`] producers as it drains.
//! [`restore`] reverts the device to passthrough queueing.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use relay_common::Unit;
//! use relay_egress::{install, restore, Device, NotifyUpstream, Verdict};
//!
//! let upstream = Arc::new(NotifyUpstream::new());
//! let device = Device::new("eth0", 1, upstream.clone());
//!
//! install(&device, 2, 1).unwrap();
//! assert_eq!(device.transmit(0, Unit::data("a")).unwrap(), Verdict::Queued);
//! assert_eq!(device.transmit(0, Unit::data("b")).unwrap(), Verdict::Queued);
//! assert_eq!(device.transmit(0, Unit::data("c")).unwrap(), Verdict::Dropped);
//!
//! // Draining back to the enable threshold signals the producers
//! device.dequeue(0).unwrap();
//! assert_eq!(upstream.resumes(), 1);
//!
//! restore(&device);
//! ```

use thiserror::Error;

use relay_common::{AllocContext, AllocError};

mod backpressure;
pub use backpressure::{Backpressure, BACKPRESSURE_ID};

mod device;
pub use device::{install, install_with, restore, Device};

mod discipline;
pub use discipline::{Discipline, DisciplineStats, Passthrough, Verdict, PASSTHROUGH_ID};

mod upstream;
pub use upstream::{NoopUpstream, NotifyUpstream, Upstream};

/// Default number of resume signals per drop-triggered drain cycle.
pub const DEFAULT_NOTIFICATION_BUDGET: u16 = 5;

const DEFAULT_MAX_SIZE: usize = 1000;
const DEFAULT_ENABLE_THRESHOLD: usize = 200;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EgressError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(#[from] AllocError),
    #[error("Transmit queue {0} is frozen")]
    QueueFrozen(usize),
    #[error("No transmit queue {index} on device {device}")]
    NoSuchQueue { device: String, index: usize },
}

/// Parameters of the [`Backpressure`] discipline, supplied at install time.
#[derive(Debug, Clone)]
pub struct EgressOptions {
    /// Hard capacity of each sub-queue.
    pub max_size: usize,
    /// The queue length at which a drain cycle starts signalling producers. Must be below
    /// `max_size`.
    pub enable_threshold: usize,
    /// Resume signals emitted per drain cycle.
    pub notification_budget: u16,
    /// How the sub-queue storage is allocated.
    pub alloc: AllocContext,
}

impl Default for EgressOptions {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            enable_threshold: DEFAULT_ENABLE_THRESHOLD,
            notification_budget: DEFAULT_NOTIFICATION_BUDGET,
            alloc: AllocContext::Blocking,
        }
    }
}

impl EgressOptions {
    /// Sets the hard capacity of each sub-queue.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Sets the queue length at which producers start being signalled.
    pub fn enable_threshold(mut self, enable_threshold: usize) -> Self {
        self.enable_threshold = enable_threshold;
        self
    }

    /// Sets the number of resume signals per drain cycle.
    pub fn notification_budget(mut self, notification_budget: u16) -> Self {
        self.notification_budget = notification_budget;
        self
    }

    /// Sets the allocation context used when the sub-queues are created.
    pub fn alloc(mut self, alloc: AllocContext) -> Self {
        self.alloc = alloc;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), EgressError> {
        if self.enable_threshold >= self.max_size {
            return Err(EgressError::InvalidArgument(format!(
                "enable threshold {} must be below max size {}",
                self.enable_threshold, self.max_size
            )));
        }

        Ok(())
    }
}
