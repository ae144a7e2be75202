//! # tiermq
//!
//! `tiermq` is an in-memory publish/subscribe broker with MQTT-style topic
//! routing: hierarchical topics, `+`/`#` wildcard filters and QoS 0/1/2
//! delivery with per-session acknowledgment tracking.
//!
//! ## Core Modules
//!
//! - `broker`: the topic trie, the in-flight message store, the client
//!   registry and the `Broker` that orchestrates them.
//! - `client`: a client session bound to its current connection.
//! - `config`: loading and merging server configuration.
//! - `transport`: the connection abstraction, the JSON protocol, the
//!   per-connection session loop and the WebSocket server.
//! - `utils`: the shared error type and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod transport;
pub mod utils;

pub use broker::{Broker, QoS};
pub use utils::BrokerError;
