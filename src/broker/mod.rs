//! The broker core: topic routing, in-flight acknowledgment tracking and the
//! client registry, plus the [`Broker`] that orchestrates them.

pub mod engine;
pub mod message;
pub mod registry;
pub mod store;
pub mod topic;

pub use engine::Broker;
pub use message::{ClientMessage, DeliveryStatus, QoS};
pub use registry::ClientRegistry;
pub use store::MessageStore;
pub use topic::TopicTrie;
