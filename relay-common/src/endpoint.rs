use std::fmt;

/// Identifier of a local communication endpoint.
///
/// The raw value `0` is reserved and never identifies a live endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(u32);

impl EndpointId {
    /// The reserved sentinel.
    pub const RESERVED: Self = Self(0);

    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Returns `false` for the reserved sentinel.
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.0 != Self::RESERVED.0
    }
}

impl From<u32> for EndpointId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
