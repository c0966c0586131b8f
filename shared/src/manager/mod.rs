//! The replication engine
//!
//! [`NetworkManager`] is an explicit context object: it owns the packet
//! registry, the identity table, the transport, and the application hooks.
//! Nothing about the network session lives in globals.
//!
//! # Flow
//!
//! - Server-originated state changes (spawn, despawn, owner, active, scene)
//!   are broadcast to remote clients and queued on a loopback, then applied
//!   locally through the very handler a client would run.
//! - Clients never mutate shared state directly. They send requests; the
//!   server validates them against the sender and rebroadcasts.
//! - Value writes mark their behaviour dirty. [`NetworkManager::tick`]
//!   flushes one values packet per dirty behaviour.
//!
//! Call [`NetworkManager::tick`] at the configured rate and drain the
//! queued [`NetworkEvent`]s afterwards.

mod clients;
mod objects;
mod rpc;
mod scenes;
mod session;
mod values;

pub use clients::{ClientManager, ClientState, ConnectedClient};
pub use objects::{SpawnHandle, SpawnRequest};

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use log::{debug, info, warn};

use crate::behaviour::NetworkBehaviour;
use crate::config::NetworkConfig;
use crate::error::NetError;
use crate::events::NetworkEvent;
use crate::hooks::NetworkHooks;
use crate::id::NetworkId;
use crate::identity::{IdentityRegistry, NetworkIdentity};
use crate::packets::*;
use crate::prefab::PrefabRegistry;
use crate::registry::{Packet, PacketId, PacketRegistry};
use crate::scene::LoadedScene;
use crate::session::{SessionState, SessionTable};
use crate::transport::{ClientInfo, Transport};
use crate::types::{BehaviourId, Channel, ClientId, EndType, EventId, NetworkRole, Origin, SceneId, HOST_CLIENT_ID, NO_EVENT};

type PacketHandler<H> = fn(&mut NetworkManager<H>, Origin, &[u8]) -> Result<(), NetError>;

pub struct NetworkManager<H: NetworkHooks> {
    config: NetworkConfig,
    registry: PacketRegistry,
    handlers: Vec<Option<PacketHandler<H>>>,
    client_id_packet: PacketId,
    session_request_packet: PacketId,
    prefabs: PrefabRegistry,
    transport: Box<dyn Transport>,
    hooks: H,
    role: NetworkRole,
    identities: IdentityRegistry,
    dirty: BTreeSet<(NetworkId, BehaviourId)>,
    loopback: VecDeque<Vec<u8>>,
    clients: ClientManager,
    sessions: SessionTable<H::Session>,
    local_session: Option<<H::Session as SessionState>::Synced>,
    scenes: Vec<LoadedScene>,
    /// Scene objects despawned while their scene stays loaded
    removed_scene_objects: BTreeMap<NetworkId, SceneId>,
    /// Event ids of operations this peer issued and has not seen applied
    pending_events: BTreeSet<EventId>,
    events: VecDeque<NetworkEvent>,
}

impl<H: NetworkHooks> NetworkManager<H> {
    /// Builds a stopped manager with every built-in packet registered
    pub fn new(config: NetworkConfig, transport: Box<dyn Transport>, hooks: H) -> Result<Self, NetError> {
        let clients = ClientManager::new(config.max_clients);
        let mut manager = Self {
            config,
            registry: PacketRegistry::new(),
            handlers: Vec::new(),
            client_id_packet: 0,
            session_request_packet: 0,
            prefabs: PrefabRegistry::new(),
            transport,
            hooks,
            role: NetworkRole::default(),
            identities: IdentityRegistry::new(),
            dirty: BTreeSet::new(),
            loopback: VecDeque::new(),
            clients,
            sessions: SessionTable::new(),
            local_session: None,
            scenes: Vec::new(),
            removed_scene_objects: BTreeMap::new(),
            pending_events: BTreeSet::new(),
            events: VecDeque::new(),
        };

        // Registration order is the wire contract; keep it stable
        manager.client_id_packet = manager.add_handler::<NetworkClientIdPacket>(session::handle_client_id)?;
        manager.session_request_packet = manager.add_handler::<H::Request>(session::handle_session_request)?;
        manager.add_handler::<NetworkSessionDataPacket>(session::handle_session_data)?;
        manager.add_handler::<NetworkPreExistingInfoPacket>(session::handle_pre_existing_info)?;
        manager.add_handler::<NetworkObjectSpawnPacket>(objects::handle_spawn)?;
        manager.add_handler::<NetworkObjectDespawnPacket>(objects::handle_despawn)?;
        manager.add_handler::<NetworkObjectOwnerPacket>(objects::handle_owner)?;
        manager.add_handler::<NetworkObjectActivePacket>(objects::handle_active)?;
        manager.add_handler::<NetworkObjectMoveScenePacket>(objects::handle_move_scene)?;
        manager.add_handler::<NetworkValuesPacket>(values::handle_values)?;
        manager.add_handler::<NetworkLoadScenePacket>(scenes::handle_load_scene)?;
        manager.add_handler::<NetworkUnloadScenePacket>(scenes::handle_unload_scene)?;
        manager.add_handler::<NetworkBehaviourPacket>(rpc::handle_behaviour_packet)?;

        Ok(manager)
    }

    fn add_handler<P: Packet>(&mut self, handler: PacketHandler<H>) -> Result<PacketId, NetError> {
        let id = self.registry.register::<P>()?;
        let slot = id as usize;
        if self.handlers.len() <= slot {
            self.handlers.resize(slot + 1, None);
        }
        self.handlers[slot] = Some(handler);
        Ok(id)
    }

    /// Registers an application packet for behaviour messaging; fails once started
    pub fn register_packet<P: Packet>(&mut self) -> Result<PacketId, NetError> {
        self.registry.register::<P>()
    }

    pub fn register_prefab(
        &mut self,
        id: NetworkId,
        name: impl Into<String>,
        factory: impl Fn() -> Result<Vec<NetworkBehaviour>, NetError> + Send + Sync + 'static,
    ) {
        self.prefabs.register(id, name, factory);
    }

    pub fn start_server(&mut self) -> Result<(), NetError> {
        self.ensure_stopped()?;
        self.transport.start_server()?;
        self.registry.lock();
        self.role = NetworkRole {
            end_type: EndType::Server,
            local_client_id: None,
            server_running: true,
        };
        info!("Server started ({} packet types)", self.registry.len());
        Ok(())
    }

    /// Server plus a local client with id 0
    pub fn start_host(&mut self) -> Result<(), NetError> {
        self.ensure_stopped()?;
        self.transport.start_host()?;
        self.registry.lock();
        self.role = NetworkRole {
            end_type: EndType::Host,
            local_client_id: Some(HOST_CLIENT_ID),
            server_running: true,
        };
        if let Err(e) = self.establish_host_session() {
            self.transport.close();
            self.reset();
            return Err(e);
        }
        info!("Host started ({} packet types)", self.registry.len());
        Ok(())
    }

    pub fn start_client(&mut self) -> Result<(), NetError> {
        self.ensure_stopped()?;
        self.transport.start_client()?;
        self.registry.lock();
        self.role = NetworkRole {
            end_type: EndType::Client,
            local_client_id: None,
            server_running: false,
        };
        self.local_session = Some(self.hooks.create_empty_session_data());
        info!("Client started, waiting for the transport");
        Ok(())
    }

    /// Closes the transport and drops all replicated state
    pub fn stop(&mut self) {
        if !self.role.is_active() {
            return;
        }
        info!("Stopping {:?}", self.role.end_type);
        self.transport.close();
        self.reset();
    }

    fn ensure_stopped(&self) -> Result<(), NetError> {
        if self.role.is_active() {
            return Err(NetError::AlreadyRunning);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.role = NetworkRole::default();
        self.identities.clear();
        self.dirty.clear();
        self.loopback.clear();
        self.clients.clear();
        self.sessions.clear();
        self.local_session = None;
        self.scenes.clear();
        self.removed_scene_objects.clear();
        self.pending_events.clear();
    }

    /// One network step: receive, handshake upkeep, session sync, value flush
    pub fn tick(&mut self) {
        if !self.role.is_active() {
            return;
        }
        for event in self.transport.poll_events() {
            self.handle_transport_event(event);
        }
        self.drain_loopback();
        if self.role.is_server() {
            self.expire_handshakes();
            self.sync_sessions();
        }
        self.flush_dirty_values();
    }

    pub fn drain_events(&mut self) -> Vec<NetworkEvent> {
        self.events.drain(..).collect()
    }

    pub fn role(&self) -> NetworkRole {
        self.role
    }

    pub fn is_active(&self) -> bool {
        self.role.is_active()
    }

    pub fn is_server(&self) -> bool {
        self.role.is_server()
    }

    /// Set once the handshake completed, or immediately on a host
    pub fn local_client_id(&self) -> Option<ClientId> {
        self.role.local_client_id
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn registry(&self) -> &PacketRegistry {
        &self.registry
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    pub fn identities(&self) -> &IdentityRegistry {
        &self.identities
    }

    pub fn identity(&self, id: NetworkId) -> Option<&NetworkIdentity> {
        self.identities.get(&id)
    }

    pub fn loaded_scenes(&self) -> &[LoadedScene] {
        &self.scenes
    }

    /// Remote clients that completed their handshake
    pub fn connected_clients(&self) -> Vec<ClientId> {
        self.clients.established_ids()
    }

    pub fn client_info(&self, client_id: ClientId) -> Option<ClientInfo> {
        self.transport.client_info(client_id)
    }

    fn emit(&mut self, event: NetworkEvent) {
        self.events.push_back(event);
    }

    fn next_event_id(&mut self) -> EventId {
        loop {
            let id: EventId = rand::random();
            if id != NO_EVENT && self.pending_events.insert(id) {
                return id;
            }
        }
    }

    /// Fires `OperationCompleted` when `event_id` belongs to this peer
    fn complete_event(&mut self, event_id: EventId) {
        if event_id != NO_EVENT && self.pending_events.remove(&event_id) {
            self.emit(NetworkEvent::OperationCompleted { event_id });
        }
    }

    fn send_packet_to_server<P: Packet>(&mut self, packet: &P, channel: Channel) -> Result<(), NetError> {
        let frame = self.registry.encode(packet)?;
        self.transport.send_to_server(&frame, channel);
        Ok(())
    }

    fn send_packet_to_client<P: Packet>(&mut self, client_id: ClientId, packet: &P, channel: Channel) -> Result<(), NetError> {
        let frame = self.registry.encode(packet)?;
        self.transport.send_to_client(client_id, &frame, channel);
        Ok(())
    }

    fn broadcast_packet<P: Packet>(&mut self, packet: &P, channel: Channel) -> Result<(), NetError> {
        let frame = self.registry.encode(packet)?;
        self.transport.broadcast(&frame, channel);
        Ok(())
    }

    fn broadcast_packet_except<P: Packet>(&mut self, except: ClientId, packet: &P, channel: Channel) -> Result<(), NetError> {
        let frame = self.registry.encode(packet)?;
        self.transport.broadcast_except(except, &frame, channel);
        Ok(())
    }

    /// Server state change: reliable broadcast, then local apply via loopback
    fn broadcast_state<P: Packet>(&mut self, packet: &P) -> Result<(), NetError> {
        let frame = self.registry.encode(packet)?;
        self.transport.broadcast(&frame, Channel::Reliable);
        self.loopback.push_back(frame);
        Ok(())
    }

    /// Server broadcasts and applies; a client asks the server
    fn issue<P: Packet>(&mut self, packet: &P) -> Result<(), NetError> {
        if self.role.is_server() {
            self.broadcast_state(packet)?;
            self.drain_loopback();
            Ok(())
        } else {
            self.send_packet_to_server(packet, Channel::Reliable)
        }
    }

    fn drain_loopback(&mut self) {
        while let Some(frame) = self.loopback.pop_front() {
            self.dispatch(Origin::Local, &frame);
        }
    }

    fn dispatch(&mut self, origin: Origin, frame: &[u8]) {
        let (packet_id, body) = match PacketRegistry::split_frame(frame) {
            Ok(parts) => parts,
            Err(e) => {
                warn!("Dropping frame from {:?}: {}", origin, e);
                return;
            }
        };
        let name = self.registry.name_of(packet_id).unwrap_or("unknown");

        if origin == Origin::Server && self.role.local_client_id.is_none() && packet_id != self.client_id_packet {
            // Covered by the catch-up snapshot that follows the client id
            debug!("Ignoring {} received before the handshake completed", name);
            return;
        }

        if let Origin::Client(client_id) = origin {
            if self.clients.state(client_id) == Some(ClientState::Pending) && packet_id != self.session_request_packet {
                debug!("Ignoring {} from client {} before its handshake", name, client_id);
                return;
            }
        }

        let Some(handler) = self.handlers.get(packet_id as usize).copied().flatten() else {
            if self.registry.name_of(packet_id).is_some() {
                debug!("Dropping bare {} outside a behaviour packet", name);
            } else {
                debug!("Dropping unknown packet id {} from {:?}", packet_id, origin);
            }
            return;
        };

        if let Err(e) = handler(self, origin, body) {
            if e.is_wire_fault() {
                warn!("Dropped malformed {} from {:?}: {}", name, origin, e);
            } else {
                warn!("Rejected {} from {:?}: {}", name, origin, e);
            }
        }
        if origin != Origin::Local {
            self.drain_loopback();
        }
    }
}

#[cfg(test)]
mod tests;
