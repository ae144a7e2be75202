//! In-flight message tracking
//!
//! A `MessageStore` belongs to exactly one client session. Packet ids are
//! only unique within that session, so stores are never shared between
//! clients.
//!
//! Every operation takes the store lock once and does all of its work inside
//! that critical section; a status update and the removal of a terminal
//! record can never be observed half-applied.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::broker::message::{ClientMessage, DeliveryStatus};

#[derive(Debug, Default)]
pub struct MessageStore {
    messages: RwLock<HashMap<u16, ClientMessage>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the record for `packet_id`.
    ///
    /// The caller is responsible for not reusing an id that is still live.
    pub fn store(&self, packet_id: u16, mut message: ClientMessage) {
        message.packet_id = packet_id;
        self.messages.write().insert(packet_id, message);
    }

    /// Set the status of `packet_id` and optionally drop the record.
    ///
    /// Returns `false` when no record exists; that is not an error.
    pub fn acknowledge(&self, packet_id: u16, status: DeliveryStatus, delete: bool) -> bool {
        let mut messages = self.messages.write();
        match messages.get_mut(&packet_id) {
            Some(message) => {
                message.status = status;
                if delete {
                    messages.remove(&packet_id);
                }
                true
            }
            None => false,
        }
    }

    /// Like [`acknowledge`](Self::acknowledge), but only applies steps that
    /// are legal for the record's QoS and drops the record once terminal.
    pub fn advance(&self, packet_id: u16, next: DeliveryStatus) -> bool {
        let mut messages = self.messages.write();
        let Some(message) = messages.get_mut(&packet_id) else {
            return false;
        };

        if !message.status.can_advance(message.qos, next) {
            tracing::debug!(
                packet_id,
                from = ?message.status,
                to = ?next,
                qos = %message.qos,
                "ignoring out-of-order acknowledgment"
            );
            return false;
        }

        message.status = next;
        if next.is_terminal() {
            messages.remove(&packet_id);
        }
        true
    }

    /// Handle a PUBREC for an outbound QoS 2 record: move it to `Released`,
    /// passing through `Received` when needed.
    ///
    /// A record that is already `Released` is left as is and still reported,
    /// so a repeated PUBREC gets its PUBREL again. Returns `false` when the
    /// record is missing or cannot be released.
    pub fn release(&self, packet_id: u16) -> bool {
        let mut messages = self.messages.write();
        let Some(message) = messages.get_mut(&packet_id) else {
            return false;
        };

        let releasable = match message.status {
            DeliveryStatus::Released => true,
            DeliveryStatus::Received => {
                DeliveryStatus::Received.can_advance(message.qos, DeliveryStatus::Released)
            }
            status => {
                status.can_advance(message.qos, DeliveryStatus::Received)
                    && DeliveryStatus::Received.can_advance(message.qos, DeliveryStatus::Released)
            }
        };
        if releasable {
            message.status = DeliveryStatus::Released;
        }
        releasable
    }

    pub fn remove(&self, packet_id: u16) -> Option<ClientMessage> {
        self.messages.write().remove(&packet_id)
    }

    pub fn get(&self, packet_id: u16) -> Option<ClientMessage> {
        self.messages.read().get(&packet_id).cloned()
    }

    pub fn contains(&self, packet_id: u16) -> bool {
        self.messages.read().contains_key(&packet_id)
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    /// Ids of every live record, in ascending order.
    pub fn packet_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.messages.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
