//! Message definitions for the broker
//!
//! `ClientMessage` is the in-flight record kept for a QoS >= 1 delivery until
//! the receiving client finishes its acknowledgment handshake.
//!
//! Notes on fields:
//! - `packet_id`: 16-bit id, unique among one client's live in-flight records
//! - `owner`: identity of the client the message was handed to. The record
//!   does not own the client; the registry resolves the identity when needed.
//! - `status`: position in the QoS 1 or QoS 2 acknowledgment state machine
//! - `created_at`: milliseconds since UNIX epoch, set when the record is built

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::BrokerError;

/// Delivery guarantee level.
///
/// Ordered so that `min` yields the effective level of a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    /// The level a subscriber receives a message at: never above what either
    /// the publisher or the subscriber asked for.
    pub fn effective(published: QoS, subscribed: QoS) -> QoS {
        published.min(subscribed)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for QoS {
    type Error = BrokerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(BrokerError::InvalidQos(other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> u8 {
        qos as u8
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Acknowledgment state of an in-flight message.
///
/// QoS 1: `Sent -> Acknowledged`.
/// QoS 2: `Sent -> Received -> Released -> Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryStatus {
    Sent,
    Acknowledged,
    Received,
    Released,
    Complete,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Acknowledged | DeliveryStatus::Complete)
    }

    /// Whether `self -> next` is a legal step for a message delivered at `qos`.
    pub fn can_advance(self, qos: QoS, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;

        match qos {
            QoS::AtMostOnce => false,
            QoS::AtLeastOnce => matches!((self, next), (Sent, Acknowledged)),
            QoS::ExactlyOnce => matches!(
                (self, next),
                (Sent, Received) | (Received, Released) | (Released, Complete)
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMessage {
    pub packet_id: u16,
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub owner: String,
    pub status: DeliveryStatus,
    pub created_at: i64,
}

impl ClientMessage {
    pub fn new(packet_id: u16, topic: &str, payload: &[u8], qos: QoS, owner: &str) -> Self {
        Self {
            packet_id,
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            owner: owner.to_string(),
            status: DeliveryStatus::Sent,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}
