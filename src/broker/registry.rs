//! Client registry
//!
//! Maps a client identity to the one live connection serving it. A client
//! reconnecting under an identity that is still registered evicts the old
//! connection: lookup, close and insert happen inside a single write-lock
//! critical section, so two concurrent reconnections cannot both keep their
//! predecessor alive.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::broker::topic::SubscriberId;
use crate::client::Client;

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<SubscriberId, Arc<Client>>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client`, closing any connection already registered under the
    /// same identity. Returns the evicted client, if there was one.
    pub fn add_client(&self, client: Arc<Client>) -> Option<Arc<Client>> {
        let mut clients = self.clients.write();

        let evicted = clients.remove(&client.id);
        if let Some(previous) = &evicted {
            info!(
                client_id = %previous.id,
                remote = %previous.remote_addr(),
                "disconnecting existing client"
            );
            previous.close();
        }

        clients.insert(client.id.clone(), client);
        evicted
    }

    /// Remove the mapping for `client_id`. Absent ids are a no-op.
    pub fn remove_client(&self, client_id: &str) -> Option<Arc<Client>> {
        self.clients.write().remove(client_id)
    }

    /// Remove `client` only if it is still the registered connection for its
    /// identity. A session that was evicted must not unregister its successor.
    pub fn remove_if_current(&self, client: &Client) -> bool {
        let mut clients = self.clients.write();
        let is_current = clients
            .get(&client.id)
            .is_some_and(|current| current.connection_id == client.connection_id);
        if is_current {
            clients.remove(&client.id);
        }
        is_current
    }

    pub fn get(&self, client_id: &str) -> Option<Arc<Client>> {
        self.clients.read().get(client_id).cloned()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.clients.read().contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}
