//! Session relay and ordering engine.
//!
//! [`SessionRelay`] wires the registry, connection hub, sequence allocator,
//! message broadcaster and audio relay together. Transport code only talks
//! to the facade.

pub mod audio;
pub mod broadcaster;
pub mod error;
pub mod hub;
pub mod registry;
pub mod relay;
pub mod sequence;

#[cfg(test)]
pub(crate) mod testing;

pub use audio::AudioSignalRelay;
pub use broadcaster::MessageBroadcaster;
pub use error::RelayError;
pub use hub::{ConnectionHub, Delivery, Membership, OutboundReceiver, Outbox, Overflow};
pub use registry::SessionRegistry;
pub use relay::{RelayConfig, SessionRelay};
pub use sequence::SequenceAllocator;
