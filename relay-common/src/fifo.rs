use std::collections::VecDeque;

use thiserror::Error;

/// How a creation API is allowed to obtain memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AllocContext {
    /// The caller runs off the forwarding path and may wait on the allocator.
    #[default]
    Blocking,
    /// The caller runs on the forwarding path.
    NonBlocking,
}

/// Returned when a reservation overflows or the allocator is exhausted, in either context.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("Resource exhausted: could not reserve {requested} slots ({ctx:?})")]
    ResourceExhausted { requested: usize, ctx: AllocContext },
}

/// A FIFO queue whose storage is reserved up front, so that pushing up to the reserved capacity
/// never allocates.
#[derive(Debug)]
pub struct Fifo<T> {
    inner: VecDeque<T>,
}

impl<T> Default for Fifo<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Fifo<T> {
    /// Creates an empty FIFO without reserving any storage.
    pub const fn new() -> Self {
        Self { inner: VecDeque::new() }
    }

    /// Creates an empty FIFO with room for `capacity` items. Reservation is fallible in every
    /// context, so `ctx` never turns an oversized request into an abort.
    pub fn with_capacity(capacity: usize, ctx: AllocContext) -> Result<Self, AllocError> {
        let mut inner = VecDeque::new();
        inner
            .try_reserve_exact(capacity)
            .map_err(|_| AllocError::ResourceExhausted { requested: capacity, ctx })?;
        Ok(Self { inner })
    }

    #[inline]
    pub fn push(&mut self, item: T) {
        self.inner.push_back(item);
    }

    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        self.inner.pop_front()
    }

    #[inline]
    pub fn peek(&self) -> Option<&T> {
        self.inner.front()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Destroys every queued item and returns how many there were. The reserved storage is kept.
    pub fn flush(&mut self) -> usize {
        let n = self.inner.len();
        self.inner.clear();
        n
    }

    pub fn iter(&self) -> std::collections::vec_deque::Iter<'_, T> {
        self.inner.iter()
    }
}

impl<'a, T> IntoIterator for &'a Fifo<T> {
    type Item = &'a T;
    type IntoIter = std::collections::vec_deque::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
