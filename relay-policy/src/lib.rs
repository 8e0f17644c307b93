//! Per-endpoint queueing policy sets.
//!
//! A [`PolicySet`] owns the algorithm that decides, for every unit submitted to an endpoint,
//! whether it is handed straight back for transmission, queued, marked or dropped, and in which
//! order queued units leave. The forwarding engine only relies on the capability set
//! `{create_queue, destroy_queue, enqueue, dequeue, set_param}`, so alternative algorithms can be
//! registered in a [`PolicyRegistry`] and selected by name.
//!
//! # Built-in policy sets
//!
//! - [`DefaultPolicy`] (`"default"`): separate management and data FIFOs, management first,
//!   tail-drop at `q_max` and congestion marking above `q_thre`.
//! - [`DctcpPolicy`] (`"dctcp"`): a single FIFO with a DCTCP-style marking window.
//! - [`RedPolicy`] (`"red"`): random early detection over an averaged queue length.
//!
//! Policy sets never lock, block or sleep. They are called with the endpoint's exclusion held by
//! the caller.

use std::{any::Any, fmt};

use thiserror::Error;
use tracing::error;

use relay_common::{AllocContext, AllocError, EndpointId, Unit, UnitClass};

mod dctcp;
pub use dctcp::{DctcpPolicy, DctcpQueue};

mod default;
pub use default::{DefaultPolicy, DefaultQueue};

mod param;
pub use param::PolicyParam;

mod red;
pub use red::{RedPolicy, RedQueue};

mod registry;
pub use registry::PolicyRegistry;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(#[from] AllocError),
    #[error("Invalid value {value:?} for parameter {name}")]
    InvalidValue { name: String, value: String },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Unknown policy set: {0}")]
    UnknownPolicy(String),
    #[error("Policy set already published: {0}")]
    AlreadyPublished(String),
    #[error("Queue belongs to policy set {found}, not {expected}")]
    QueueMismatch { expected: &'static str, found: &'static str },
}

/// The outcome of [`PolicySet::enqueue`].
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub enum Enqueue {
    /// The unit was not buffered and is handed back to the caller for immediate transmission.
    SendNow(Unit),
    /// The unit is queued and will be returned by a later dequeue.
    Scheduled,
    /// The unit was destroyed because the queue is full.
    Dropped,
}

impl Enqueue {
    #[inline]
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled)
    }

    #[inline]
    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped)
    }
}

/// A queueing and marking algorithm for per-endpoint queues.
///
/// Parameters are shared by every queue the set creates, so they are updated through `&self`.
/// Implementations keep them in atomics so that the forwarding path reads them without locks.
pub trait PolicySet: Send + Sync + 'static {
    /// The per-endpoint queue state.
    type Queue: Send + 'static;

    /// The name the policy set is published under.
    fn name(&self) -> &'static str;

    /// Allocates the queue state of `endpoint`, obtaining memory according to `ctx`.
    fn create_queue(
        &self,
        endpoint: EndpointId,
        ctx: AllocContext,
    ) -> Result<Self::Queue, PolicyError>;

    /// Flushes the queue, destroying every unit it still holds.
    fn destroy_queue(&self, queue: Self::Queue);

    /// Decides the fate of `unit`. If `must_enqueue` is `false` and nothing is waiting ahead of
    /// the unit, the policy may hand it back with [`Enqueue::SendNow`].
    fn enqueue(&self, queue: &mut Self::Queue, unit: Unit, must_enqueue: bool) -> Enqueue;

    /// Returns the next unit to transmit.
    fn dequeue(&self, queue: &mut Self::Queue) -> Option<Unit>;

    /// Updates a parameter. Unknown names are ignored.
    fn set_param(&self, name: &str, value: &str) -> Result<(), PolicyError>;

    /// Number of queued units of the given class.
    fn queue_depth(&self, queue: &Self::Queue, class: UnitClass) -> usize;

    /// The queue length above which units are congestion-marked.
    fn threshold(&self) -> usize;
}

/// An opaque, type-erased queue created by a [`DynPolicySet`].
pub struct QueueHandle {
    endpoint: EndpointId,
    policy: &'static str,
    inner: Box<dyn Any + Send>,
}

impl QueueHandle {
    #[inline]
    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    /// The name of the policy set that created this queue.
    #[inline]
    pub fn policy(&self) -> &'static str {
        self.policy
    }
}

impl fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandle")
            .field("endpoint", &self.endpoint)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Object-safe form of [`PolicySet`], implemented for every policy set. This is what the
/// registry hands out and what the forwarding engine holds.
pub trait DynPolicySet: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn create_queue(
        &self,
        endpoint: EndpointId,
        ctx: AllocContext,
    ) -> Result<QueueHandle, PolicyError>;

    fn destroy_queue(&self, queue: QueueHandle);

    /// Like [`PolicySet::enqueue`]. A queue created by a different policy set is a caller bug:
    /// the unit is destroyed and [`PolicyError::QueueMismatch`] returned.
    fn enqueue(
        &self,
        queue: &mut QueueHandle,
        unit: Unit,
        must_enqueue: bool,
    ) -> Result<Enqueue, PolicyError>;

    fn dequeue(&self, queue: &mut QueueHandle) -> Option<Unit>;

    fn set_param(&self, name: &str, value: &str) -> Result<(), PolicyError>;

    fn queue_depth(&self, queue: &QueueHandle, class: UnitClass) -> usize;

    fn threshold(&self) -> usize;
}

impl fmt::Debug for dyn DynPolicySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynPolicySet").field("name", &self.name()).finish()
    }
}

impl<P: PolicySet> DynPolicySet for P {
    fn name(&self) -> &'static str {
        PolicySet::name(self)
    }

    fn create_queue(
        &self,
        endpoint: EndpointId,
        ctx: AllocContext,
    ) -> Result<QueueHandle, PolicyError> {
        let queue = PolicySet::create_queue(self, endpoint, ctx)?;
        Ok(QueueHandle { endpoint, policy: PolicySet::name(self), inner: Box::new(queue) })
    }

    fn destroy_queue(&self, queue: QueueHandle) {
        let policy = queue.policy;
        match queue.inner.downcast::<P::Queue>() {
            Ok(queue) => PolicySet::destroy_queue(self, *queue),
            Err(_) => {
                error!(expected = PolicySet::name(self), found = policy, "Destroying foreign queue")
            }
        }
    }

    fn enqueue(
        &self,
        queue: &mut QueueHandle,
        unit: Unit,
        must_enqueue: bool,
    ) -> Result<Enqueue, PolicyError> {
        let found = queue.policy;
        let endpoint = queue.endpoint;
        match queue.inner.downcast_mut::<P::Queue>() {
            Some(queue) => Ok(PolicySet::enqueue(self, queue, unit, must_enqueue)),
            None => {
                let expected = PolicySet::name(self);
                error!(%endpoint, expected, found, "Enqueue on foreign queue, dropping unit");
                Err(PolicyError::QueueMismatch { expected: PolicySet::name(self), found })
            }
        }
    }

    fn dequeue(&self, queue: &mut QueueHandle) -> Option<Unit> {
        let found = queue.policy;
        let endpoint = queue.endpoint;
        match queue.inner.downcast_mut::<P::Queue>() {
            Some(queue) => PolicySet::dequeue(self, queue),
            None => {
                let expected = PolicySet::name(self);
                error!(%endpoint, expected, found, "Dequeue on foreign queue");
                None
            }
        }
    }

    fn set_param(&self, name: &str, value: &str) -> Result<(), PolicyError> {
        PolicySet::set_param(self, name, value)
    }

    fn queue_depth(&self, queue: &QueueHandle, class: UnitClass) -> usize {
        queue
            .inner
            .downcast_ref::<P::Queue>()
            .map_or(0, |queue| PolicySet::queue_depth(self, queue, class))
    }

    fn threshold(&self) -> usize {
        PolicySet::threshold(self)
    }
}
