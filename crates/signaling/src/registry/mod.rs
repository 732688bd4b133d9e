//! Entity registries
//!
//! Plain synchronous bookkeeping of what exists engine-side and who owns it.
//! Locks are never held across an `.await`; the controller re-validates
//! after every engine call instead.

pub mod media;
pub mod transports;

pub use media::{
    Cascade, CloseReason, ClosedConsumer, ConsumerEntry, ConsumerId, ConsumerState, MediaRegistry,
    ProducerClosedNotice, ProducerEntry, ProducerId, ProducerState,
};
pub use transports::{TransportEntry, TransportId, TransportRegistry, TransportRole, TransportState};
