use bytes::Bytes;

/// The class of a [`Unit`]. Management units are always served before data units queued for
/// the same endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitClass {
    Data,
    Management,
}

/// A transported unit, as seen by the queueing core.
///
/// Only the fields a queueing decision needs are modelled: the class and the congestion mark.
/// The payload is carried opaquely. Whoever holds a `Unit` owns it; dropping it releases it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    class: UnitClass,
    /// Explicit congestion notification flag.
    congested: bool,
    payload: Bytes,
}

impl Unit {
    #[inline]
    pub fn new(class: UnitClass, payload: Bytes) -> Self {
        Self { class, congested: false, payload }
    }

    /// Creates a data-class unit.
    #[inline]
    pub fn data(payload: impl Into<Bytes>) -> Self {
        Self::new(UnitClass::Data, payload.into())
    }

    /// Creates a management-class unit.
    #[inline]
    pub fn management(payload: impl Into<Bytes>) -> Self {
        Self::new(UnitClass::Management, payload.into())
    }

    #[inline]
    pub fn class(&self) -> UnitClass {
        self.class
    }

    #[inline]
    pub fn is_management(&self) -> bool {
        self.class == UnitClass::Management
    }

    /// Returns `true` if a queue marked this unit as having crossed a congestion threshold.
    #[inline]
    pub fn is_congested(&self) -> bool {
        self.congested
    }

    /// Sets the congestion mark. Marking is a signal only, it never drops the unit.
    #[inline]
    pub fn mark_congested(&mut self) {
        self.congested = true;
    }

    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    #[inline]
    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}
