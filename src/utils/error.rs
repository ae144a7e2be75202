//! The `error` module defines the error type shared by the broker core, the
//! transport and the binary.
//!
//! Validation failures (`InvalidFilter`, `InvalidTopic`, `InvalidQos`) are
//! never fatal to the broker; they are returned to the caller, which decides
//! how to answer the client. `Bind` is the only error that aborts start-up.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid topic filter: {0:?}")]
    InvalidFilter(String),

    #[error("invalid topic name: {0:?}")]
    InvalidTopic(String),

    #[error("invalid QoS level: {0}")]
    InvalidQos(u8),

    #[error("no free packet id for client {0}")]
    PacketIdsExhausted(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("failed to encode packet: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl From<tungstenite::Error> for BrokerError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                BrokerError::ConnectionClosed
            }
            other => BrokerError::Transport(other.to_string()),
        }
    }
}
