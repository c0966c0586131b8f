//! Server-side bookkeeping of transport clients
//!
//! A client enters as `Pending` when its transport connects and becomes
//! `Established` once its session handshake is accepted. Capacity counts
//! both states so a flood of half-open connections cannot crowd out the
//! configured limit.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::info;

use crate::types::ClientId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Connected, waiting for its session request
    Pending,
    Established,
}

/// A transport client known to the server
#[derive(Debug)]
pub struct ConnectedClient {
    pub id: ClientId,
    pub state: ClientState,
    /// When the transport reported the connection
    pub connected_at: Instant,
    /// Last time any frame arrived from this client
    pub last_seen: Instant,
}

impl ConnectedClient {
    pub fn new(id: ClientId) -> Self {
        let now = Instant::now();
        Self {
            id,
            state: ClientState::Pending,
            connected_at: now,
            last_seen: now,
        }
    }

    /// Still pending after `timeout`
    pub fn handshake_expired(&self, timeout: Duration) -> bool {
        self.state == ClientState::Pending && self.connected_at.elapsed() > timeout
    }
}

pub struct ClientManager {
    clients: BTreeMap<ClientId, ConnectedClient>,
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: BTreeMap::new(),
            max_clients,
        }
    }

    /// Registers a pending client; false when the server is at capacity
    pub fn add_pending(&mut self, client_id: ClientId) -> bool {
        if self.clients.len() >= self.max_clients {
            return false;
        }
        self.clients.insert(client_id, ConnectedClient::new(client_id));
        true
    }

    /// Pending -> Established; false for unknown or already established clients
    pub fn establish(&mut self, client_id: ClientId) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) if client.state == ClientState::Pending => {
                client.state = ClientState::Established;
                info!("Client {} established", client_id);
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, client_id: ClientId) -> Option<ConnectedClient> {
        self.clients.remove(&client_id)
    }

    pub fn touch(&mut self, client_id: ClientId) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.last_seen = Instant::now();
        }
    }

    pub fn state(&self, client_id: ClientId) -> Option<ClientState> {
        self.clients.get(&client_id).map(|c| c.state)
    }

    pub fn get(&self, client_id: ClientId) -> Option<&ConnectedClient> {
        self.clients.get(&client_id)
    }

    pub fn established_ids(&self) -> Vec<ClientId> {
        self.clients
            .values()
            .filter(|c| c.state == ClientState::Established)
            .map(|c| c.id)
            .collect()
    }

    pub fn expired_handshakes(&self, timeout: Duration) -> Vec<ClientId> {
        self.clients
            .values()
            .filter(|c| c.handshake_expired(timeout))
            .map(|c| c.id)
            .collect()
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn clear(&mut self) {
        self.clients.clear();
    }
}
