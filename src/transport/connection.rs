//! The connection abstraction the broker core talks to.
//!
//! A `Connection` is the physical transport behind a client session. The core
//! only needs to know where it comes from, how to push bytes down it and how
//! to kill it. Inbound traffic arrives separately as a stream of decoded
//! packets (see [`crate::transport::session`]).

use std::fmt::Debug;
use std::net::SocketAddr;

use crate::utils::BrokerError;

pub trait Connection: Debug + Send + Sync {
    fn remote_addr(&self) -> SocketAddr;

    /// Queue an encoded packet for delivery. Must not block.
    fn send(&self, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Forcibly terminate the connection. The receive side must observe an
    /// error and end shortly after. Calling `close` twice is harmless.
    fn close(&self);

    fn is_closed(&self) -> bool;
}
