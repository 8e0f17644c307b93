use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use relay_common::{AllocContext, EndpointId, Unit, UnitClass};
use relay_egress::{Device, Upstream, Verdict};
use relay_policy::{
    DynPolicySet, Enqueue, PolicyError, PolicyParam, PolicyRegistry, PolicySet, QueueHandle,
};

use crate::{EndpointMap, EndpointStats, MapError, RelayError, RelayOptions};

/// The outcome of [`Relay::submit`].
#[derive(Debug, PartialEq, Eq)]
#[must_use]
pub enum Submitted {
    /// The unit was not queued. The caller transmits it right away.
    SendNow(Unit),
    /// The unit is queued on the endpoint and will be returned by [`Relay::drain`] or moved by
    /// [`Relay::pump`].
    Scheduled,
    /// The unit was destroyed because the endpoint queue is full.
    Dropped,
}

/// Transmission state of a bound endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PortState {
    /// Units may bypass the queue.
    Enabled = 0,
    /// The egress side is congested: every unit is queued until the device resumes.
    Disabled = 1,
    /// The endpoint is being unbound.
    Deallocated = 2,
}

impl PortState {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Enabled,
            1 => Self::Disabled,
            _ => Self::Deallocated,
        }
    }
}

/// A bound endpoint.
#[derive(Debug)]
struct Port<H> {
    endpoint: EndpointId,
    instance: Mutex<H>,
    /// Lazily created by the first submit. Holding this lock is the per-endpoint exclusion the
    /// policy set relies on.
    queue: Mutex<Option<QueueHandle>>,
    state: AtomicU8,
    stats: Arc<EndpointStats>,
}

impl<H> Port<H> {
    fn new(endpoint: EndpointId, instance: H) -> Self {
        Self {
            endpoint,
            instance: Mutex::new(instance),
            queue: Mutex::new(None),
            state: AtomicU8::new(PortState::Enabled as u8),
            stats: Arc::default(),
        }
    }

    #[inline]
    fn state(&self) -> PortState {
        PortState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves from `from` to `to`. Returns `false` if the port was not in state `from`.
    #[inline]
    fn transition(&self, from: PortState, to: PortState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// The forwarding engine.
///
/// Lock order is policy, then endpoint map, then endpoint queue, then device sub-queue. The
/// endpoint map lock is never held while taking an endpoint queue lock.
pub struct Relay<H> {
    endpoints: RwLock<EndpointMap<Arc<Port<H>>>>,
    policy: RwLock<Arc<dyn DynPolicySet>>,
    registry: Mutex<PolicyRegistry>,
    options: RelayOptions,
}

impl<H> std::fmt::Debug for Relay<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("endpoints", &self.endpoints.read().len())
            .field("policy", &self.policy.read().name())
            .field("options", &self.options)
            .finish()
    }
}

impl<H> Relay<H> {
    /// Creates a relay using the built-in policy sets.
    pub fn new(options: RelayOptions) -> Result<Self, RelayError> {
        Self::with_registry(PolicyRegistry::with_defaults(), options)
    }

    /// Creates a relay that selects its policy sets from `registry`.
    pub fn with_registry(
        registry: PolicyRegistry,
        options: RelayOptions,
    ) -> Result<Self, RelayError> {
        let policy = registry.instantiate(&options.policy, &options.params)?;
        debug!(policy = policy.name(), "Created relay");

        Ok(Self {
            endpoints: RwLock::new(EndpointMap::new()),
            policy: RwLock::new(policy),
            registry: Mutex::new(registry),
            options,
        })
    }

    fn port(&self, endpoint: EndpointId) -> Result<Arc<Port<H>>, RelayError> {
        match self.endpoints.read().lookup(endpoint) {
            Ok(port) => Ok(Arc::clone(port)),
            Err(_) => Err(RelayError::NotBound(endpoint)),
        }
    }

    /// Binds `instance` to `endpoint`. Rebinding a bound endpoint replaces its instance and
    /// keeps its queue.
    pub fn bind(&self, endpoint: EndpointId, instance: H) -> Result<(), RelayError> {
        let mut endpoints = self.endpoints.write();

        match endpoints.lookup(endpoint) {
            Ok(port) => {
                *port.instance.lock() = instance;
                debug!(%endpoint, "Rebound endpoint");
            }
            Err(_) => {
                endpoints.set(endpoint, Arc::new(Port::new(endpoint, instance)))?;
                debug!(%endpoint, "Bound endpoint");
            }
        }

        Ok(())
    }

    /// Unbinds `endpoint`, destroying every unit still queued for it.
    pub fn unbind(&self, endpoint: EndpointId) -> Result<(), RelayError> {
        let policy = self.policy.read();

        let port = self.endpoints.write().remove(endpoint).map_err(|e| match e {
            MapError::NotFound(id) => RelayError::NotBound(id),
            e => RelayError::Map(e),
        })?;
        port.state.store(PortState::Deallocated as u8, Ordering::Release);

        if let Some(queue) = port.queue.lock().take() {
            let flushed = [UnitClass::Management, UnitClass::Data]
                .into_iter()
                .map(|class| policy.queue_depth(&queue, class))
                .sum::<usize>();
            policy.destroy_queue(queue);
            debug!(%endpoint, flushed, "Unbound endpoint");
        } else {
            debug!(%endpoint, "Unbound endpoint");
        }

        Ok(())
    }

    /// Returns `true` if `endpoint` is bound.
    pub fn is_bound(&self, endpoint: EndpointId) -> bool {
        self.endpoints.read().contains(endpoint)
    }

    /// The number of bound endpoints.
    pub fn num_endpoints(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn port_state(&self, endpoint: EndpointId) -> Result<PortState, RelayError> {
        Ok(self.port(endpoint)?.state())
    }

    /// Submits `unit` to the queue of `endpoint`.
    ///
    /// Unless `must_enqueue` is set or the endpoint is held back by egress congestion, a unit
    /// with nothing ahead of it is handed back as [`Submitted::SendNow`].
    ///
    /// ## Errors
    /// The unit is destroyed on every error.
    /// - [`RelayError::NotBound`] if the endpoint is not bound.
    /// - [`RelayError::Deallocated`] if the endpoint is concurrently being unbound.
    /// - [`RelayError::Policy`] if the endpoint queue could not be created.
    pub fn submit(
        &self,
        endpoint: EndpointId,
        unit: Unit,
        must_enqueue: bool,
    ) -> Result<Submitted, RelayError> {
        let policy = self.policy.read();
        let port = self.port(endpoint)?;
        let mut slot = port.queue.lock();

        let state = port.state();
        if state == PortState::Deallocated {
            port.stats.increment_errors();
            return Err(RelayError::Deallocated(endpoint));
        }
        let must_enqueue = must_enqueue || state == PortState::Disabled;

        let queue = match slot.take() {
            Some(queue) => queue,
            None => match policy.create_queue(endpoint, self.options.alloc) {
                Ok(queue) => queue,
                Err(e) => {
                    error!(%endpoint, "Failed to create endpoint queue: {e}");
                    port.stats.increment_errors();
                    return Err(e.into());
                }
            },
        };
        let queue = slot.insert(queue);

        match policy.enqueue(queue, unit, must_enqueue) {
            Ok(Enqueue::SendNow(unit)) => {
                port.stats.increment_sent(unit.is_congested());
                Ok(Submitted::SendNow(unit))
            }
            Ok(Enqueue::Scheduled) => {
                port.stats.increment_queued();
                trace!(%endpoint, "Scheduled unit");
                Ok(Submitted::Scheduled)
            }
            Ok(Enqueue::Dropped) => {
                port.stats.increment_dropped();
                debug!(%endpoint, "Endpoint queue full, dropped unit");
                Ok(Submitted::Dropped)
            }
            Err(PolicyError::QueueMismatch { .. }) => {
                port.stats.increment_errors();
                Err(RelayError::PolicyMismatch(endpoint))
            }
            Err(e) => {
                port.stats.increment_errors();
                Err(e.into())
            }
        }
    }

    /// Takes the next unit off the queue of `endpoint`, management units first.
    pub fn drain(&self, endpoint: EndpointId) -> Option<Unit> {
        let policy = self.policy.read();
        let port = self.port(endpoint).ok()?;
        let mut slot = port.queue.lock();

        let unit = policy.dequeue(slot.as_mut()?)?;
        port.stats.increment_sent(unit.is_congested());

        Some(unit)
    }

    /// Moves up to `max_units` queued units of `endpoint` to sub-queue `tx_index` of `device`,
    /// returning how many were accepted.
    ///
    /// If the device drops a unit, the endpoint is disabled: later submits are queued until the
    /// device signals this relay through [`Upstream::resume`].
    pub fn pump(
        &self,
        endpoint: EndpointId,
        device: &Device,
        tx_index: usize,
        max_units: usize,
    ) -> Result<usize, RelayError> {
        // Validates the index, so no unit is lost to a bad sub-queue below
        device.queue_len(tx_index)?;

        let policy = self.policy.read();
        let port = self.port(endpoint)?;
        let mut slot = port.queue.lock();
        let Some(queue) = slot.as_mut() else {
            return Ok(0);
        };

        let mut moved = 0;
        while moved < max_units {
            let Some(unit) = policy.dequeue(queue) else {
                break;
            };

            let marked = unit.is_congested();
            match device.transmit(tx_index, unit)? {
                Verdict::Queued => {
                    port.stats.increment_sent(marked);
                    moved += 1;
                }
                Verdict::Dropped => {
                    port.stats.increment_dropped();
                    if port.transition(PortState::Enabled, PortState::Disabled) {
                        warn!(%endpoint, device = device.name(), "Egress full, disabled endpoint");
                    }
                    break;
                }
            }
        }

        Ok(moved)
    }

    /// Updates a parameter of the active policy set.
    pub fn set_param(&self, name: &str, value: &str) -> Result<(), RelayError> {
        Ok(self.policy.read().set_param(name, value)?)
    }

    /// The name of the active policy set.
    pub fn policy(&self) -> &'static str {
        self.policy.read().name()
    }

    /// Publishes a policy set so that it can be chosen with [`select_policy`](Self::select_policy).
    pub fn publish<P, F>(&self, name: impl Into<String>, factory: F) -> Result<(), RelayError>
    where
        P: PolicySet,
        F: Fn() -> P + Send + Sync + 'static,
    {
        Ok(self.registry.lock().publish(name, factory)?)
    }

    /// Replaces the active policy set with a fresh instance of `name`.
    ///
    /// The units queued on every endpoint are moved, in dequeue order, into queues of the new
    /// policy set. Units the new set refuses are dropped and counted. If a new queue cannot be
    /// allocated, nothing changes.
    pub fn select_policy(&self, name: &str, params: &[PolicyParam]) -> Result<(), RelayError> {
        let next = self.registry.lock().instantiate(name, params)?;

        let mut policy = self.policy.write();
        let ports: Vec<_> = self.endpoints.read().iter().map(|(_, p)| Arc::clone(p)).collect();

        // Allocate first so that a failure leaves every endpoint untouched
        let mut fresh = Vec::with_capacity(ports.len());
        for port in &ports {
            if port.queue.lock().is_some() {
                let queue = next.create_queue(port.endpoint, AllocContext::Blocking)?;
                fresh.push((port, queue));
            }
        }

        for (port, mut queue) in fresh {
            let mut slot = port.queue.lock();
            if let Some(mut old) = slot.take() {
                let mut dropped = 0;
                while let Some(unit) = policy.dequeue(&mut old) {
                    if !matches!(next.enqueue(&mut queue, unit, true), Ok(Enqueue::Scheduled)) {
                        port.stats.increment_dropped();
                        dropped += 1;
                    }
                }
                policy.destroy_queue(old);

                if dropped > 0 {
                    warn!(endpoint = %port.endpoint, dropped, "Dropped units while migrating");
                }
            }
            *slot = Some(queue);
        }

        info!(from = policy.name(), to = next.name(), "Selected policy set");
        *policy = next;

        Ok(())
    }

    /// Number of units of `class` queued on `endpoint`.
    pub fn queue_depth(&self, endpoint: EndpointId, class: UnitClass) -> usize {
        let policy = self.policy.read();
        let Ok(port) = self.port(endpoint) else {
            return 0;
        };

        let slot = port.queue.lock();
        slot.as_ref().map_or(0, |queue| policy.queue_depth(queue, class))
    }

    /// The congestion marking threshold of the active policy set.
    pub fn threshold(&self) -> usize {
        self.policy.read().threshold()
    }

    pub fn endpoint_stats(&self, endpoint: EndpointId) -> Result<Arc<EndpointStats>, RelayError> {
        Ok(Arc::clone(&self.port(endpoint)?.stats))
    }

    /// Re-enables every endpoint disabled by egress congestion.
    fn enable_all(&self) -> usize {
        self.endpoints
            .read()
            .iter()
            .filter(|(_, port)| port.transition(PortState::Disabled, PortState::Enabled))
            .count()
    }
}

impl<H: Clone> Relay<H> {
    /// Returns the instance bound to `endpoint`.
    pub fn instance(&self, endpoint: EndpointId) -> Result<H, RelayError> {
        Ok(self.port(endpoint)?.instance.lock().clone())
    }
}

impl<H: Send + 'static> Upstream for Relay<H> {
    fn resume(&self) {
        let enabled = self.enable_all();
        if enabled > 0 {
            debug!(enabled, "Egress resumed, re-enabled endpoints");
        }
    }
}

impl<H> Drop for Relay<H> {
    fn drop(&mut self) {
        let policy = self.policy.get_mut();
        for (_, port) in self.endpoints.get_mut().iter() {
            if let Some(queue) = port.queue.lock().take() {
                policy.destroy_queue(queue);
            }
        }
    }
}
