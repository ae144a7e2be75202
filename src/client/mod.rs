//! The `client` module defines the representation of a client session.
//!
//! A [`Client`] pairs a logical identity with the connection currently
//! carrying it, and owns the per-session acknowledgment state.

pub mod pubsub_client;
pub use pubsub_client::Client;
