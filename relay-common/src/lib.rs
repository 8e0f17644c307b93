//! Types shared by the relay crates: endpoint identifiers, the queued [`Unit`] and the
//! allocation-aware [`Fifo`] every queue is built on.

mod endpoint;
pub use endpoint::EndpointId;

mod fifo;
pub use fifo::{AllocContext, AllocError, Fifo};

mod unit;
pub use unit::{Unit, UnitClass};
