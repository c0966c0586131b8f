//! Connection lifecycle, the session handshake, and late-joiner catch-up
//!
//! Server side a client moves through:
//!
//! 1. transport connect: admitted as pending, or refused with "Server full"
//! 2. session request: the hooks accept or reject it
//! 3. accept: session created or restored by key, then the client id,
//!    the synced session data, and the catch-up snapshot are sent in
//!    that order on the reliable channel
//!
//! A client ignores everything from the server until its id arrives;
//! anything broadcast before that is already part of the snapshot.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};

use super::{ClientState, NetworkManager};
use crate::error::NetError;
use crate::events::NetworkEvent;
use crate::hooks::NetworkHooks;
use crate::id::NetworkId;
use crate::identity::NetworkIdentity;
use crate::packets::{
    NetworkClientIdPacket, NetworkObjectOwnerPacket, NetworkPreExistingInfoPacket,
    NetworkSessionDataPacket, PreExistingObject, SessionRequest,
};
use crate::scene::SceneObject;
use crate::session::{SessionData, SessionEstablishingResponse, SessionState};
use crate::transport::TransportEvent;
use crate::types::{Channel, ClientId, EndType, Origin, Owner, HOST_CLIENT_ID, NO_EVENT};
use crate::wire;

impl<H: NetworkHooks> NetworkManager<H> {
    /// Server side session of a connected client
    pub fn session(&self, client_id: ClientId) -> Option<&H::Session> {
        self.sessions.get(client_id).map(|s| s.state())
    }

    /// Changes to the synced part reach the client on the next tick
    pub fn session_mut(&mut self, client_id: ClientId) -> Option<&mut H::Session> {
        self.sessions.get_mut(client_id).map(|s| s.state_mut())
    }

    /// Client side copy of this peer's synced session data
    pub fn local_session_data(&self) -> Option<&<H::Session as SessionState>::Synced> {
        self.local_session.as_ref()
    }

    /// Disconnects a client from the server side
    pub fn kick(&mut self, client_id: ClientId, reason: &str) -> Result<(), NetError> {
        if !self.role.is_server() {
            return Err(NetError::PermissionDenied { operation: "disconnect clients" });
        }
        self.transport.disconnect_client(client_id, reason);
        Ok(())
    }

    pub(super) fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                debug!("Transport connected, requesting a session");
                let request = self.hooks.create_session_request();
                if let Err(e) = self.send_packet_to_server(&request, Channel::Reliable) {
                    warn!("Failed to send session request: {}", e);
                }
            }
            TransportEvent::Disconnected { reason } => {
                info!("Disconnected: {}", reason);
                self.reset();
                self.emit(NetworkEvent::Disconnected { reason });
            }
            TransportEvent::ClientConnected(client_id) => {
                if !self.clients.add_pending(client_id) {
                    info!("Refusing client {}: server full", client_id);
                    self.transport.disconnect_client(client_id, "Server full");
                    return;
                }
                info!("Client {} connected, awaiting handshake", client_id);
            }
            TransportEvent::ClientDisconnected(client_id) => self.client_left(client_id),
            TransportEvent::ServerReceived { client_id, payload } => {
                if self.clients.state(client_id).is_none() {
                    debug!("Dropping frame from unknown client {}", client_id);
                    return;
                }
                self.clients.touch(client_id);
                self.dispatch(Origin::Client(client_id), &payload);
            }
            TransportEvent::ClientReceived { payload } => {
                self.dispatch(Origin::Server, &payload);
            }
        }
    }

    fn client_left(&mut self, client_id: ClientId) {
        let Some(client) = self.clients.remove(client_id) else {
            return;
        };
        info!("Client {} disconnected", client_id);
        if client.state != ClientState::Established {
            return;
        }
        let owned = self.release_owned_objects(client_id);
        if self.sessions.detach(client_id, owned) {
            debug!("Session of client {} kept for a reconnect", client_id);
        }
        self.emit(NetworkEvent::ClientDisconnected { client_id });
    }

    pub(super) fn expire_handshakes(&mut self) {
        for client_id in self.clients.expired_handshakes(self.config.handshake_timeout) {
            info!("Client {} did not complete its handshake", client_id);
            self.clients.remove(client_id);
            self.transport.disconnect_client(client_id, "Handshake timed out");
        }
    }

    /// Pushes changed synced session data to its client
    pub(super) fn sync_sessions(&mut self) {
        let changed: Vec<_> = self
            .sessions
            .iter_mut()
            .filter_map(|session| session.take_changed().map(|synced| (session.client_id(), synced)))
            .collect();
        for (client_id, synced) in changed {
            if client_id == HOST_CLIENT_ID && self.role.end_type == EndType::Host {
                self.apply_local_session(synced);
                continue;
            }
            let result = wire::encode(&synced)
                .and_then(|payload| self.send_packet_to_client(client_id, &NetworkSessionDataPacket { payload }, Channel::Reliable));
            if let Err(e) = result {
                warn!("Failed to sync session of client {}: {}", client_id, e);
            }
        }
    }

    fn apply_local_session(&mut self, synced: <H::Session as SessionState>::Synced) {
        self.hooks.on_local_session_data_changed(&synced);
        self.local_session = Some(synced);
        self.emit(NetworkEvent::SessionDataChanged);
    }

    /// The host's own client goes through the hooks like a remote one
    pub(super) fn establish_host_session(&mut self) -> Result<(), NetError> {
        let request = self.hooks.create_session_request();
        if let SessionEstablishingResponse::Reject { reason } = self.hooks.on_session_request(HOST_CLIENT_ID, &request) {
            return Err(NetError::SessionRejected { reason });
        }
        let state = self.hooks.create_session_data(HOST_CLIENT_ID, &request);
        let mut session = SessionData::new(HOST_CLIENT_ID, request.session_key().map(str::to_owned), state);
        if let Some(synced) = session.take_changed() {
            self.apply_local_session(synced);
        }
        self.sessions.insert(session);
        self.emit(NetworkEvent::Connected {
            client_id: HOST_CLIENT_ID,
        });
        self.emit(NetworkEvent::ClientConnected {
            client_id: HOST_CLIENT_ID,
        });
        Ok(())
    }

    fn establish_client(&mut self, client_id: ClientId, request: H::Request) -> Result<(), NetError> {
        // Anything queued locally must be part of the snapshot
        self.drain_loopback();

        let key = request.session_key().map(str::to_owned);
        let previous = key.as_deref().and_then(|k| self.sessions.take_detached(k));
        let restored = previous.is_some();
        let (state, owned) = match previous {
            Some(previous) => {
                let (state, owned) = previous.into_parts();
                info!("Restoring session for client {}", client_id);
                (self.hooks.restore_session_data(client_id, &request, state), owned)
            }
            None => (self.hooks.create_session_data(client_id, &request), Vec::new()),
        };

        let mut session = SessionData::new(client_id, key.clone(), state);
        let synced = session.take_changed();
        self.sessions.insert(session);
        self.clients.establish(client_id);

        self.send_packet_to_client(client_id, &NetworkClientIdPacket { client_id }, Channel::Reliable)?;
        if let Some(synced) = synced {
            let payload = wire::encode(&synced)?;
            self.send_packet_to_client(client_id, &NetworkSessionDataPacket { payload }, Channel::Reliable)?;
        }
        let snapshot = self.pre_existing_info()?;
        self.send_packet_to_client(client_id, &snapshot, Channel::Reliable)?;

        if let (true, Some(session_key)) = (restored, key) {
            for id in owned {
                let unclaimed = self
                    .identities
                    .get(&id)
                    .is_some_and(|identity| identity.owner() == Owner::Server);
                if unclaimed {
                    self.broadcast_state(&NetworkObjectOwnerPacket {
                        id,
                        owner: Owner::Client(client_id),
                        event_id: NO_EVENT,
                    })?;
                }
            }
            self.emit(NetworkEvent::SessionRestored { client_id, session_key });
        }
        self.emit(NetworkEvent::ClientConnected { client_id });
        Ok(())
    }

    /// Everything a late joiner needs to reach the current state
    fn pre_existing_info(&self) -> Result<NetworkPreExistingInfoPacket, NetError> {
        let mut info = NetworkPreExistingInfoPacket {
            scene_names: self.scenes.iter().map(|scene| scene.name.clone()).collect(),
            removed_objects: self.removed_scene_objects.keys().copied().collect(),
            ..Default::default()
        };
        for identity in self.identities.iter() {
            if identity.is_scene_object() {
                info.pre_existing_objects.push(identity.pre_existing());
            } else {
                info.spawned_objects.push(identity.spawn_packet(NO_EVENT));
            }
        }
        info.network_values = self.value_snapshots()?;
        Ok(info)
    }

    fn apply_pre_existing_info(&mut self, info: NetworkPreExistingInfoPacket) {
        let removed: BTreeSet<_> = info.removed_objects.iter().copied().collect();
        for scene_name in &info.scene_names {
            self.load_scene_locally(scene_name, true, &removed);
        }
        let mut stray = Vec::new();
        for state in &info.pre_existing_objects {
            let Some(identity) = self.identities.get_mut(&state.id) else {
                stray.push(state);
                continue;
            };
            identity.set_owner(state.owner);
            identity.set_active(state.is_active);
            identity.set_scene(state.scene_id);
        }
        if !stray.is_empty() {
            self.restore_stray_scene_objects(&stray);
        }
        for spawn in &info.spawned_objects {
            if let Err(e) = self.instantiate(spawn, true) {
                warn!("Failed to instantiate {}: {}", spawn.id, e);
            }
        }
        for values in &info.network_values {
            if let Err(e) = self.apply_values(values) {
                warn!("Failed to apply values of {}: {}", values.id, e);
            }
        }
        info!(
            "Caught up: {} scenes, {} objects",
            info.scene_names.len(),
            self.identities.len()
        );
    }
}

impl<H: NetworkHooks> NetworkManager<H> {
    /// Recreates scene objects that outlived their scene by moving out of it
    /// before it unloaded. Each origin scene's definition is resolved once
    /// and only the listed objects are taken from it.
    fn restore_stray_scene_objects(&mut self, stray: &[&PreExistingObject]) {
        let mut definitions: BTreeMap<&str, Option<Vec<SceneObject>>> = BTreeMap::new();
        for state in stray {
            let objects = definitions
                .entry(state.origin_scene.as_str())
                .or_insert_with(|| self.hooks.load_scene(&state.origin_scene).map(|d| d.objects));
            let placed = objects
                .as_mut()
                .and_then(|objects| objects.iter().position(|o| o.id == state.id).map(|i| objects.swap_remove(i)));
            let Some(object) = placed else {
                warn!(
                    "Scene object {} missing locally and not placed by '{}'",
                    state.id, state.origin_scene
                );
                continue;
            };
            let identity = match NetworkIdentity::new(
                state.id,
                NetworkId::EMPTY,
                state.owner,
                state.scene_id,
                state.is_active,
                object.transform,
                object.behaviours,
            ) {
                Ok(identity) => identity.placed_by(&state.origin_scene),
                Err(e) => {
                    warn!("Skipping scene object {}: {}", state.id, e);
                    continue;
                }
            };
            if let Err(duplicate) = self.identities.insert(identity) {
                warn!("Scene object {} already exists", duplicate.id());
                continue;
            }
            debug!("Restored {} from unloaded scene '{}'", state.id, state.origin_scene);
            self.emit(NetworkEvent::Spawned {
                id: state.id,
                retroactive: true,
            });
        }
    }
}

pub(super) fn handle_client_id<H: NetworkHooks>(m: &mut NetworkManager<H>, origin: Origin, body: &[u8]) -> Result<(), NetError> {
    let packet: NetworkClientIdPacket = wire::decode(body)?;
    if origin != Origin::Server {
        return Err(NetError::PermissionDenied { operation: "assign client ids" });
    }
    info!("Assigned client id {}", packet.client_id);
    m.role.local_client_id = Some(packet.client_id);
    m.emit(NetworkEvent::Connected {
        client_id: packet.client_id,
    });
    Ok(())
}

pub(super) fn handle_session_request<H: NetworkHooks>(m: &mut NetworkManager<H>, origin: Origin, body: &[u8]) -> Result<(), NetError> {
    let Origin::Client(client_id) = origin else {
        return Ok(());
    };
    if m.clients.state(client_id) != Some(ClientState::Pending) {
        warn!("Client {} sent a second session request", client_id);
        return Ok(());
    }
    let request: H::Request = wire::decode(body)?;

    let response = match request.session_key() {
        Some(key) if m.sessions.key_in_use(key) => SessionEstablishingResponse::reject("Session already in use"),
        _ => m.hooks.on_session_request(client_id, &request),
    };

    match response {
        SessionEstablishingResponse::Accept => m.establish_client(client_id, request),
        SessionEstablishingResponse::Reject { reason } => {
            info!("Rejected client {}: {}", client_id, reason);
            m.clients.remove(client_id);
            m.transport.disconnect_client(client_id, &reason);
            m.emit(NetworkEvent::SessionRejected { client_id, reason });
            Ok(())
        }
    }
}

pub(super) fn handle_session_data<H: NetworkHooks>(m: &mut NetworkManager<H>, origin: Origin, body: &[u8]) -> Result<(), NetError> {
    let packet: NetworkSessionDataPacket = wire::decode(body)?;
    if origin != Origin::Server {
        return Err(NetError::PermissionDenied { operation: "send session data" });
    }
    let synced = wire::decode(&packet.payload)?;
    m.apply_local_session(synced);
    Ok(())
}

pub(super) fn handle_pre_existing_info<H: NetworkHooks>(m: &mut NetworkManager<H>, origin: Origin, body: &[u8]) -> Result<(), NetError> {
    let info: NetworkPreExistingInfoPacket = wire::decode(body)?;
    if origin != Origin::Server {
        return Err(NetError::PermissionDenied { operation: "send catch-up snapshots" });
    }
    m.apply_pre_existing_info(info);
    Ok(())
}
