//! Broker engine
//!
//! This module ties the routing and session structures together:
//! - the topic trie resolving published topics to subscribers
//! - the client registry holding the live connection per identity
//! - per-client message stores tracking QoS 1/2 handshakes
//!
//! Concurrency and usage notes:
//! - `Broker` is shared as `Arc<Broker>` by every connection task. Each
//!   structure it owns carries its own lock, so the broker itself needs none.
//! - The trie lock is released before any delivery happens; deliveries only
//!   queue bytes on the client's connection and never wait on the network.
//! - No lock is held while taking another one, except that registering a
//!   client closes the evicted connection under the registry lock. Closing
//!   only raises a signal.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::broker::message::QoS;
use crate::broker::registry::ClientRegistry;
use crate::broker::topic::{self, SubscriberId, TopicTrie};
use crate::client::Client;
use crate::utils::BrokerError;

#[derive(Debug, Default)]
pub struct Broker {
    topics: RwLock<TopicTrie>,
    clients: ClientRegistry,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    /// Register a freshly connected client, evicting any previous connection
    /// under the same identity.
    ///
    /// A clean session starts without any subscription left behind by an
    /// earlier session under the identity. Otherwise the stored
    /// subscriptions are resumed. Returns whether a stored session is
    /// present, which is never the case for a clean session.
    pub fn connect(&self, client: Arc<Client>, clean_session: bool) -> bool {
        info!(client_id = %client.id, remote = %client.remote_addr(), clean_session, "client connected");
        let client_id = client.id.clone();
        self.clients.add_client(client);

        let mut topics = self.topics.write();
        if clean_session {
            let removed = topics.remove_client(&client_id);
            if removed > 0 {
                debug!(client_id, removed, "discarded previous session subscriptions");
            }
            false
        } else {
            topics.has_client(&client_id)
        }
    }

    /// Tear down `client`'s registration.
    ///
    /// Nothing happens if the identity has already been taken over by a newer
    /// connection. Clean sessions also drop their subscriptions.
    pub fn disconnect(&self, client: &Client, clean_session: bool) -> bool {
        if !self.clients.remove_if_current(client) {
            debug!(client_id = %client.id, "stale session ended after takeover");
            return false;
        }

        if clean_session {
            let removed = self.topics.write().remove_client(&client.id);
            debug!(client_id = %client.id, removed, "dropped subscriptions");
        }
        info!(client_id = %client.id, "client disconnected");
        true
    }

    /// Subscribe `client_id` to `filter`. Returns the granted QoS.
    pub fn subscribe(&self, client_id: &str, filter: &[u8], qos: QoS) -> Result<QoS, BrokerError> {
        let filter = topic::parse_filter(filter)?;
        self.topics.write().subscribe(client_id, filter, qos)?;
        debug!(client_id, filter, %qos, "subscribed");
        Ok(qos)
    }

    pub fn unsubscribe(&self, client_id: &str, filter: &[u8]) -> Result<bool, BrokerError> {
        let filter = topic::parse_filter(filter)?;
        let removed = self.topics.write().unsubscribe(client_id, filter)?;
        debug!(client_id, filter, removed, "unsubscribed");
        Ok(removed)
    }

    /// Subscribers of `topic` with the QoS they subscribed at.
    pub fn matches(&self, topic: &[u8]) -> Result<Vec<(SubscriberId, QoS)>, BrokerError> {
        let topic = topic::parse_topic(topic)?;
        Ok(self.topics.read().matches(topic))
    }

    /// Route a message to every matching subscriber that is currently
    /// connected, each at `min(qos, subscribed QoS)`.
    ///
    /// A failed delivery to one client is logged and does not affect the
    /// others. Returns the number of clients the message was handed to.
    pub fn publish(&self, topic: &[u8], payload: &[u8], qos: QoS) -> Result<usize, BrokerError> {
        let topic = topic::parse_topic(topic)?;
        let matched = self.topics.read().matches(topic);

        let mut delivered = 0;
        for (client_id, subscribed) in matched {
            let Some(client) = self.clients.get(&client_id) else {
                debug!(client_id, topic, "subscriber offline, skipping");
                continue;
            };

            let effective = QoS::effective(qos, subscribed);
            match client.deliver(topic, payload, effective) {
                Ok(_) => delivered += 1,
                Err(e) => warn!(client_id, topic, error = %e, "delivery failed"),
            }
        }

        debug!(topic, %qos, delivered, "published");
        Ok(delivered)
    }

    pub fn subscription_count(&self) -> usize {
        self.topics.read().subscription_count()
    }
}
