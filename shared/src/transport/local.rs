//! In-process transport routing frames between peers that share a [`LocalHub`]
//!
//! Every peer owns an unbounded tokio channel; sends push straight into the
//! receiver's channel and `poll_events` drains its own. Reliable frames are
//! always delivered in order. Unreliable frames pass through the hub's
//! [`LinkConditioner`] and may be dropped.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error, warn};
use rand::Rng;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use super::{ClientInfo, Transport, TransportEvent};
use crate::error::NetError;
use crate::types::{Channel, ClientId};

/// Packet loss applied to unreliable frames
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LinkConditioner {
    /// Probability in `0.0..=1.0` that an unreliable frame is dropped
    pub loss: f32,
}

impl LinkConditioner {
    pub fn new(loss: f32) -> Self {
        Self {
            loss: loss.clamp(0.0, 1.0),
        }
    }

    fn should_drop(&self, channel: Channel) -> bool {
        channel == Channel::Unreliable && self.loss > 0.0 && rand::thread_rng().gen::<f32>() < self.loss
    }
}

#[derive(Debug, Default)]
struct LinkStats {
    sent: u64,
    received: u64,
    unreliable: u64,
    dropped: u64,
}

struct ClientLink {
    tx: UnboundedSender<TransportEvent>,
    stats: LinkStats,
}

struct HubState {
    server: Option<UnboundedSender<TransportEvent>>,
    clients: BTreeMap<ClientId, ClientLink>,
    next_client_id: ClientId,
    conditioner: LinkConditioner,
}

/// Shared switchboard; clone it to hand out transports for one server and many clients
#[derive(Clone)]
pub struct LocalHub {
    state: Arc<Mutex<HubState>>,
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalHub {
    pub fn new() -> Self {
        Self::with_conditioner(LinkConditioner::default())
    }

    pub fn with_conditioner(conditioner: LinkConditioner) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                server: None,
                clients: BTreeMap::new(),
                // 0 is reserved for a host's local client
                next_client_id: 1,
                conditioner,
            })),
        }
    }

    pub fn server(&self) -> LocalServerTransport {
        LocalServerTransport {
            hub: self.clone(),
            rx: None,
        }
    }

    pub fn client(&self) -> LocalClientTransport {
        LocalClientTransport {
            hub: self.clone(),
            client_id: None,
            rx: None,
        }
    }

    pub fn set_conditioner(&self, conditioner: LinkConditioner) {
        if let Some(mut state) = self.lock() {
            state.conditioner = conditioner;
        }
    }

    fn lock(&self) -> Option<MutexGuard<'_, HubState>> {
        match self.state.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                error!("Local hub state poisoned");
                None
            }
        }
    }
}

fn drain(rx: &mut Option<UnboundedReceiver<TransportEvent>>) -> Vec<TransportEvent> {
    let mut events = Vec::new();
    if let Some(rx) = rx.as_mut() {
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
    }
    events
}

pub struct LocalServerTransport {
    hub: LocalHub,
    rx: Option<UnboundedReceiver<TransportEvent>>,
}

impl Transport for LocalServerTransport {
    fn start_server(&mut self) -> Result<(), NetError> {
        let mut state = self.hub.lock().ok_or(NetError::NotRunning)?;
        if state.server.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(NetError::AlreadyRunning);
        }
        let (tx, rx) = unbounded_channel();
        state.server = Some(tx);
        self.rx = Some(rx);
        Ok(())
    }

    fn start_client(&mut self) -> Result<(), NetError> {
        warn!("Server transport cannot act as a client");
        Err(NetError::AlreadyRunning)
    }

    fn close(&mut self) {
        if let Some(mut state) = self.hub.lock() {
            for (client_id, link) in std::mem::take(&mut state.clients) {
                debug!("Closing local link to client {}", client_id);
                let _ = link.tx.send(TransportEvent::Disconnected {
                    reason: "Server closed".to_string(),
                });
            }
            state.server = None;
        }
        self.rx = None;
    }

    fn send_to_server(&mut self, _payload: &[u8], _channel: Channel) {
        warn!("Server transport has no server to send to");
    }

    fn send_to_client(&mut self, client_id: ClientId, payload: &[u8], channel: Channel) {
        let Some(mut state) = self.hub.lock() else {
            return;
        };
        let conditioner = state.conditioner;
        let Some(link) = state.clients.get_mut(&client_id) else {
            debug!("Dropping frame for unknown client {}", client_id);
            return;
        };
        link.stats.sent += 1;
        if channel == Channel::Unreliable {
            link.stats.unreliable += 1;
            if conditioner.should_drop(channel) {
                link.stats.dropped += 1;
                return;
            }
        }
        let _ = link.tx.send(TransportEvent::ClientReceived {
            payload: payload.to_vec(),
        });
    }

    fn disconnect_client(&mut self, client_id: ClientId, reason: &str) {
        let Some(mut state) = self.hub.lock() else {
            return;
        };
        if let Some(link) = state.clients.remove(&client_id) {
            let _ = link.tx.send(TransportEvent::Disconnected {
                reason: reason.to_string(),
            });
            if let Some(server) = state.server.as_ref() {
                let _ = server.send(TransportEvent::ClientDisconnected(client_id));
            }
        }
    }

    fn connected_clients(&self) -> Vec<ClientId> {
        self.hub
            .lock()
            .map(|state| state.clients.keys().copied().collect())
            .unwrap_or_default()
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        drain(&mut self.rx)
    }

    fn client_info(&self, client_id: ClientId) -> Option<ClientInfo> {
        let state = self.hub.lock()?;
        let stats = &state.clients.get(&client_id)?.stats;
        let loss_percentage = if stats.unreliable == 0 {
            0.0
        } else {
            stats.dropped as f32 / stats.unreliable as f32 * 100.0
        };
        Some(ClientInfo {
            latency: std::time::Duration::ZERO,
            sent: stats.sent,
            received: stats.received,
            loss_percentage,
        })
    }
}

pub struct LocalClientTransport {
    hub: LocalHub,
    client_id: Option<ClientId>,
    rx: Option<UnboundedReceiver<TransportEvent>>,
}

impl LocalClientTransport {
    /// Id the hub assigned to this connection, not the handshake id
    pub fn link_id(&self) -> Option<ClientId> {
        self.client_id
    }
}

impl Transport for LocalClientTransport {
    fn start_server(&mut self) -> Result<(), NetError> {
        warn!("Client transport cannot host a server");
        Err(NetError::AlreadyRunning)
    }

    fn start_client(&mut self) -> Result<(), NetError> {
        if self.client_id.is_some() {
            return Err(NetError::AlreadyRunning);
        }
        let mut state = self.hub.lock().ok_or(NetError::NotRunning)?;
        let (tx, rx) = unbounded_channel();
        self.rx = Some(rx);

        let Some(server) = state.server.clone().filter(|tx| !tx.is_closed()) else {
            // Refusal surfaces on the next poll, like a real connect attempt
            let _ = tx.send(TransportEvent::Disconnected {
                reason: "Connection refused".to_string(),
            });
            return Ok(());
        };

        let client_id = state.next_client_id;
        state.next_client_id += 1;
        let _ = tx.send(TransportEvent::Connected);
        state.clients.insert(
            client_id,
            ClientLink {
                tx,
                stats: LinkStats::default(),
            },
        );
        let _ = server.send(TransportEvent::ClientConnected(client_id));
        self.client_id = Some(client_id);
        Ok(())
    }

    fn close(&mut self) {
        if let (Some(client_id), Some(mut state)) = (self.client_id.take(), self.hub.lock()) {
            if state.clients.remove(&client_id).is_some() {
                if let Some(server) = state.server.as_ref() {
                    let _ = server.send(TransportEvent::ClientDisconnected(client_id));
                }
            }
        }
        self.rx = None;
    }

    fn send_to_server(&mut self, payload: &[u8], channel: Channel) {
        let Some(client_id) = self.client_id else {
            debug!("Dropping frame sent before connecting");
            return;
        };
        let Some(mut state) = self.hub.lock() else {
            return;
        };
        let conditioner = state.conditioner;
        let Some(server) = state.server.clone() else {
            return;
        };
        let Some(link) = state.clients.get_mut(&client_id) else {
            // Server already dropped this link
            return;
        };
        if channel == Channel::Unreliable {
            link.stats.unreliable += 1;
            if conditioner.should_drop(channel) {
                link.stats.dropped += 1;
                return;
            }
        }
        link.stats.received += 1;
        let _ = server.send(TransportEvent::ServerReceived {
            client_id,
            payload: payload.to_vec(),
        });
    }

    fn send_to_client(&mut self, client_id: ClientId, _payload: &[u8], _channel: Channel) {
        warn!("Client transport cannot send to client {}", client_id);
    }

    fn disconnect_client(&mut self, client_id: ClientId, _reason: &str) {
        warn!("Client transport cannot disconnect client {}", client_id);
    }

    fn connected_clients(&self) -> Vec<ClientId> {
        Vec::new()
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let events = drain(&mut self.rx);
        if events
            .iter()
            .any(|e| matches!(e, TransportEvent::Disconnected { .. }))
        {
            self.client_id = None;
        }
        events
    }

    fn client_info(&self, _client_id: ClientId) -> Option<ClientInfo> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected_pair(hub: &LocalHub) -> (LocalServerTransport, LocalClientTransport) {
        let mut server = hub.server();
        server.start_server().unwrap();
        let mut client = hub.client();
        client.start_client().unwrap();
        (server, client)
    }

    #[test]
    fn test_connect_reports_both_sides() {
        let hub = LocalHub::new();
        let (mut server, mut client) = connected_pair(&hub);

        assert_eq!(client.poll_events(), vec![TransportEvent::Connected]);
        assert_eq!(server.poll_events(), vec![TransportEvent::ClientConnected(1)]);
        assert_eq!(server.connected_clients(), vec![1]);
        assert_eq!(client.link_id(), Some(1));
    }

    #[test]
    fn test_connect_without_server_is_refused() {
        let hub = LocalHub::new();
        let mut client = hub.client();
        client.start_client().unwrap();
        assert!(matches!(
            client.poll_events().as_slice(),
            [TransportEvent::Disconnected { .. }]
        ));
    }

    #[test]
    fn test_frames_flow_both_ways_in_order() {
        let hub = LocalHub::new();
        let (mut server, mut client) = connected_pair(&hub);
        server.poll_events();
        client.poll_events();

        client.send_to_server(&[1], Channel::Reliable);
        client.send_to_server(&[2], Channel::Reliable);
        server.send_to_client(1, &[9], Channel::Reliable);

        assert_eq!(
            server.poll_events(),
            vec![
                TransportEvent::ServerReceived { client_id: 1, payload: vec![1] },
                TransportEvent::ServerReceived { client_id: 1, payload: vec![2] },
            ]
        );
        assert_eq!(client.poll_events(), vec![TransportEvent::ClientReceived { payload: vec![9] }]);

        let info = server.client_info(1).unwrap();
        assert_eq!(info.sent, 1);
        assert_eq!(info.received, 2);
    }

    #[test]
    fn test_broadcast_except_skips_one_client() {
        let hub = LocalHub::new();
        let (mut server, mut first) = connected_pair(&hub);
        let mut second = hub.client();
        second.start_client().unwrap();
        first.poll_events();
        second.poll_events();

        server.broadcast_except(1, &[5], Channel::Reliable);
        assert!(first.poll_events().is_empty());
        assert_eq!(second.poll_events(), vec![TransportEvent::ClientReceived { payload: vec![5] }]);
    }

    #[test]
    fn test_full_loss_drops_only_unreliable() {
        let hub = LocalHub::with_conditioner(LinkConditioner::new(1.0));
        let (mut server, mut client) = connected_pair(&hub);
        client.poll_events();

        server.send_to_client(1, &[1], Channel::Unreliable);
        server.send_to_client(1, &[2], Channel::Reliable);

        assert_eq!(client.poll_events(), vec![TransportEvent::ClientReceived { payload: vec![2] }]);
        let info = server.client_info(1).unwrap();
        assert_eq!(info.loss_percentage, 100.0);
    }

    #[test]
    fn test_disconnect_client_notifies_both_sides() {
        let hub = LocalHub::new();
        let (mut server, mut client) = connected_pair(&hub);
        server.poll_events();
        client.poll_events();

        server.disconnect_client(1, "Server full");
        assert_eq!(
            client.poll_events(),
            vec![TransportEvent::Disconnected { reason: "Server full".to_string() }]
        );
        assert_eq!(server.poll_events(), vec![TransportEvent::ClientDisconnected(1)]);
        assert!(client.link_id().is_none());
    }

    #[test]
    fn test_client_close_reports_disconnect() {
        let hub = LocalHub::new();
        let (mut server, mut client) = connected_pair(&hub);
        server.poll_events();

        client.close();
        assert_eq!(server.poll_events(), vec![TransportEvent::ClientDisconnected(1)]);
        assert!(server.connected_clients().is_empty());
    }

    #[test]
    fn test_second_server_is_rejected() {
        let hub = LocalHub::new();
        let mut first = hub.server();
        first.start_server().unwrap();
        let mut second = hub.server();
        assert!(matches!(second.start_server(), Err(NetError::AlreadyRunning)));

        first.close();
        assert!(second.start_server().is_ok());
    }
}
