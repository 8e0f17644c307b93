//! The forwarding engine of a relay.
//!
//! [`Relay`] binds local endpoints to caller-chosen instance handles in an [`EndpointMap`],
//! keeps one policy-managed queue per bound endpoint and moves units from those queues to the
//! transmit sub-queues of an egress [`Device`](relay_egress::Device). When a device signals
//! that it has room again, the relay re-enables the endpoints it had to hold back.

use thiserror::Error;

use relay_common::{AllocContext, EndpointId};
use relay_egress::EgressError;
use relay_policy::{PolicyError, PolicyParam};

mod map;
pub use map::{EndpointMap, MapError};

mod relay;
pub use relay::{PortState, Relay, Submitted};

mod stats;
pub use stats::EndpointStats;

/// The policy set a relay starts with.
const DEFAULT_POLICY: &str = "default";

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Endpoint map error: {0}")]
    Map(#[from] MapError),
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),
    #[error("Egress error: {0}")]
    Egress(#[from] EgressError),
    #[error("Endpoint {0} is not bound")]
    NotBound(EndpointId),
    #[error("Endpoint {0} is being deallocated")]
    Deallocated(EndpointId),
    #[error("Queue of endpoint {0} was created by another policy set")]
    PolicyMismatch(EndpointId),
}

#[derive(Debug, Clone)]
pub struct RelayOptions {
    /// The name of the policy set to instantiate.
    policy: String,
    /// Parameters applied to the policy set after instantiation.
    params: Vec<PolicyParam>,
    /// How endpoint queues are allocated on the forwarding path.
    alloc: AllocContext,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            policy: DEFAULT_POLICY.to_string(),
            params: Vec::new(),
            alloc: AllocContext::NonBlocking,
        }
    }
}

impl RelayOptions {
    /// Sets the policy set, by registry name. Default: `"default"`.
    pub fn policy(mut self, name: impl Into<String>) -> Self {
        self.policy = name.into();
        self
    }

    /// Adds a parameter to apply to the policy set. Parameters are applied in the order they
    /// were added.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(PolicyParam::new(name, value));
        self
    }

    /// Sets the allocation context for endpoint queues. Queues are created lazily on the first
    /// submit, so the default is [`AllocContext::NonBlocking`].
    pub fn alloc(mut self, alloc: AllocContext) -> Self {
        self.alloc = alloc;
        self
    }
}
