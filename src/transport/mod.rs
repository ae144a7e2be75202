//! The `transport` module is responsible for the connection side of the
//! broker.
//!
//! It defines the `Connection` abstraction the core talks to, the JSON
//! protocol packets, the per-connection session loop that turns packets into
//! broker operations, and a WebSocket server implementing all of it.

pub mod connection;
pub mod message;
pub mod session;
pub mod websocket;

pub use connection::Connection;
pub use message::{ClientPacket, ServerPacket};
pub use websocket::{WsServer, start_websocket_server};

#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod websocket_tests;
