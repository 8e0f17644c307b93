use rustc_hash::FxHashMap;
use thiserror::Error;

use relay_common::EndpointId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MapError {
    #[error("Invalid endpoint id {0}")]
    InvalidArgument(EndpointId),
    #[error("Endpoint {0} not found")]
    NotFound(EndpointId),
}

/// Associates local endpoint ids with the instance handles bound to them.
///
/// The map owns its handles as values only: removing an entry, or dropping the map, drops the
/// handle but never tears down the instance it refers to. The map does no locking of its own.
#[derive(Debug)]
pub struct EndpointMap<H> {
    entries: FxHashMap<EndpointId, H>,
}

impl<H> Default for EndpointMap<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> EndpointMap<H> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self { entries: FxHashMap::default() }
    }

    pub fn lookup(&self, id: EndpointId) -> Result<&H, MapError> {
        self.entries.get(&id).ok_or(MapError::NotFound(id))
    }

    pub fn lookup_mut(&mut self, id: EndpointId) -> Result<&mut H, MapError> {
        self.entries.get_mut(&id).ok_or(MapError::NotFound(id))
    }

    /// Binds `instance` to `id`, overwriting any previous binding in place.
    ///
    /// ## Errors
    /// - [`MapError::InvalidArgument`] for the reserved id.
    pub fn set(&mut self, id: EndpointId, instance: H) -> Result<(), MapError> {
        if !id.is_valid() {
            return Err(MapError::InvalidArgument(id));
        }

        self.entries.insert(id, instance);
        Ok(())
    }

    /// Removes the binding of `id`, returning its handle.
    pub fn remove(&mut self, id: EndpointId) -> Result<H, MapError> {
        self.entries.remove(&id).ok_or(MapError::NotFound(id))
    }

    #[inline]
    pub fn contains(&self, id: EndpointId) -> bool {
        self.entries.contains_key(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the bindings in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (EndpointId, &H)> + '_ {
        self.entries.iter().map(|(id, h)| (*id, h))
    }

    /// The bound ids, in arbitrary order.
    pub fn ids(&self) -> impl Iterator<Item = EndpointId> + '_ {
        self.entries.keys().copied()
    }
}
