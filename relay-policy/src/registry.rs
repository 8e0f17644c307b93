use std::{fmt, sync::Arc};

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::{
    DctcpPolicy, DefaultPolicy, DynPolicySet, PolicyError, PolicyParam, PolicySet, RedPolicy,
};

type Factory = Box<dyn Fn() -> Arc<dyn DynPolicySet> + Send + Sync>;

/// A name → factory table of the policy sets available to a relay.
///
/// The registry is an ordinary value: it is populated by explicit [`publish`](Self::publish)
/// calls and dropped with its owner. Mutation takes `&mut self`, so owners that share it must
/// serialize writers themselves.
pub struct PolicyRegistry {
    factories: FxHashMap<String, Factory>,
}

impl fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyRegistry").field("policies", &self.names()).finish()
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl PolicyRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self { factories: FxHashMap::default() }
    }

    /// Creates a registry with the built-in `default`, `dctcp` and `red` policy sets published.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.insert("default", DefaultPolicy::new);
        registry.insert("dctcp", DctcpPolicy::new);
        registry.insert("red", RedPolicy::new);
        registry
    }

    fn insert<P, F>(&mut self, name: &str, factory: F)
    where
        P: PolicySet,
        F: Fn() -> P + Send + Sync + 'static,
    {
        self.factories.insert(
            name.to_string(),
            Box::new(move || Arc::new(factory()) as Arc<dyn DynPolicySet>),
        );
    }

    /// Publishes a policy set under `name`.
    ///
    /// ## Errors
    /// - [`PolicyError::AlreadyPublished`] if the name is taken.
    pub fn publish<P, F>(&mut self, name: impl Into<String>, factory: F) -> Result<(), PolicyError>
    where
        P: PolicySet,
        F: Fn() -> P + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(PolicyError::AlreadyPublished(name));
        }

        info!(policy = %name, "Published policy set");
        self.insert(&name, factory);
        Ok(())
    }

    /// Removes the policy set published under `name`. Instances already handed out are not
    /// affected.
    pub fn unpublish(&mut self, name: &str) -> Result<(), PolicyError> {
        match self.factories.remove(name) {
            Some(_) => {
                info!(policy = name, "Unpublished policy set");
                Ok(())
            }
            None => Err(PolicyError::UnknownPolicy(name.to_string())),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Returns the published names in lexicographic order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Builds a fresh instance of the policy set published under `name` and applies `params`
    /// to it in order.
    pub fn instantiate(
        &self,
        name: &str,
        params: &[PolicyParam],
    ) -> Result<Arc<dyn DynPolicySet>, PolicyError> {
        let factory =
            self.factories.get(name).ok_or_else(|| PolicyError::UnknownPolicy(name.to_string()))?;

        let policy = factory();
        for param in params {
            policy.set_param(&param.name, &param.value)?;
        }

        debug!(policy = name, params = params.len(), "Instantiated policy set");
        Ok(policy)
    }
}
