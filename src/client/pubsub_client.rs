//! Client representation
//!
//! `Client` models one logical session bound to one live connection. It owns
//! the session's in-flight message stores and the packet-id allocator used
//! for QoS >= 1 deliveries.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

use tracing::trace;
use uuid::Uuid;

use crate::broker::message::{ClientMessage, QoS};
use crate::broker::store::MessageStore;
use crate::transport::connection::Connection;
use crate::transport::message::ServerPacket;
use crate::utils::BrokerError;

#[derive(Debug)]
pub struct Client {
    /// Logical identity, unique across the registry.
    pub id: String,

    /// Distinguishes this connection from earlier ones under the same id.
    pub connection_id: Uuid,

    /// Outbound QoS >= 1 messages waiting for the client's acknowledgments.
    pub store: MessageStore,

    /// Inbound QoS 2 publishes waiting for the client's release.
    pub incoming: MessageStore,

    connection: Arc<dyn Connection>,
    next_packet_id: AtomicU16,
}

impl Client {
    pub fn new(id: impl Into<String>, connection: Arc<dyn Connection>) -> Self {
        Self {
            id: id.into(),
            connection_id: Uuid::new_v4(),
            store: MessageStore::new(),
            incoming: MessageStore::new(),
            connection,
            next_packet_id: AtomicU16::new(1),
        }
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_addr()
    }

    pub fn close(&self) {
        self.connection.close();
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Encode `packet` and hand it to the connection.
    pub fn send(&self, packet: &ServerPacket) -> Result<(), BrokerError> {
        self.connection.send(packet.encode()?)
    }

    /// Next packet id not held by a live outbound record. Zero is never used.
    pub fn next_packet_id(&self) -> Result<u16, BrokerError> {
        for _ in 0..=u16::MAX {
            let id = self.next_packet_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 && !self.store.contains(id) {
                return Ok(id);
            }
        }
        Err(BrokerError::PacketIdsExhausted(self.id.clone()))
    }

    /// Hand a message to this client at `qos`.
    ///
    /// For QoS >= 1 a packet id is allocated and the in-flight record is
    /// stored before anything is written to the connection, so an
    /// acknowledgment can always be correlated. Returns the packet id used.
    pub fn deliver(&self, topic: &str, payload: &[u8], qos: QoS) -> Result<Option<u16>, BrokerError> {
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce | QoS::ExactlyOnce => {
                let id = self.next_packet_id()?;
                self.store
                    .store(id, ClientMessage::new(id, topic, payload, qos, &self.id));
                Some(id)
            }
        };

        let packet = ServerPacket::Publish {
            packet_id,
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            qos: qos.as_u8(),
        };

        if let Err(e) = self.send(&packet) {
            if let Some(id) = packet_id {
                self.store.remove(id);
            }
            return Err(e);
        }

        trace!(client_id = %self.id, topic, ?packet_id, %qos, "delivered");
        Ok(packet_id)
    }
}
