//! The contract between the manager and whatever moves bytes
//!
//! Transports are driven by polling: the manager calls [`Transport::poll_events`]
//! once per tick and reacts to what happened since the last call. Frames handed
//! to the send methods are already encoded; transports never look inside them.

mod local;

pub use local::{LinkConditioner, LocalClientTransport, LocalHub, LocalServerTransport};

use std::time::Duration;

use crate::error::NetError;
use crate::types::{Channel, ClientId};

/// Something that happened on the wire since the last poll
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Client side: the connection to the server is up
    Connected,
    /// Client side: the connection is gone
    Disconnected { reason: String },
    /// Server side: a new transport-level connection, not yet handshaked
    ClientConnected(ClientId),
    ClientDisconnected(ClientId),
    /// Server side: a frame from a client
    ServerReceived { client_id: ClientId, payload: Vec<u8> },
    /// Client side: a frame from the server
    ClientReceived { payload: Vec<u8> },
}

/// Per-connection statistics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClientInfo {
    pub latency: Duration,
    /// Frames sent to the client
    pub sent: u64,
    /// Frames received from the client
    pub received: u64,
    /// Percentage of unreliable frames lost in transit
    pub loss_percentage: f32,
}

pub trait Transport: Send {
    fn start_server(&mut self) -> Result<(), NetError>;

    fn start_client(&mut self) -> Result<(), NetError>;

    /// A server that is also a local client; the local client never touches the wire
    fn start_host(&mut self) -> Result<(), NetError> {
        self.start_server()
    }

    fn close(&mut self);

    fn send_to_server(&mut self, payload: &[u8], channel: Channel);

    fn send_to_client(&mut self, client_id: ClientId, payload: &[u8], channel: Channel);

    fn broadcast(&mut self, payload: &[u8], channel: Channel) {
        for client_id in self.connected_clients() {
            self.send_to_client(client_id, payload, channel);
        }
    }

    fn broadcast_except(&mut self, except: ClientId, payload: &[u8], channel: Channel) {
        for client_id in self.connected_clients() {
            if client_id != except {
                self.send_to_client(client_id, payload, channel);
            }
        }
    }

    fn disconnect_client(&mut self, client_id: ClientId, reason: &str);

    fn connected_clients(&self) -> Vec<ClientId>;

    fn poll_events(&mut self) -> Vec<TransportEvent>;

    fn client_info(&self, client_id: ClientId) -> Option<ClientInfo>;
}
