//! Spawn, despawn, ownership, activation, and scene membership

use log::{debug, info, warn};

use super::NetworkManager;
use crate::error::NetError;
use crate::events::NetworkEvent;
use crate::hooks::NetworkHooks;
use crate::id::NetworkId;
use crate::identity::NetworkIdentity;
use crate::packets::{
    NetworkObjectActivePacket, NetworkObjectDespawnPacket, NetworkObjectMoveScenePacket,
    NetworkObjectOwnerPacket, NetworkObjectSpawnPacket,
};
use crate::transform::Transform;
use crate::registry::Packet;
use crate::types::{ClientId, EventId, Origin, Owner, SceneId, NO_EVENT};
use crate::wire;

/// Parameters for [`NetworkManager::spawn`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnRequest {
    pub prefab_id: NetworkId,
    pub owner: Owner,
    pub transform: Transform,
    pub scene_id: SceneId,
    pub is_active: bool,
}

impl SpawnRequest {
    pub fn new(prefab_id: NetworkId) -> Self {
        Self {
            prefab_id,
            owner: Owner::Server,
            transform: Transform::default(),
            scene_id: 0,
            is_active: true,
        }
    }

    pub fn owned_by(mut self, owner: Owner) -> Self {
        self.owner = owner;
        self
    }

    pub fn at(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn in_scene(mut self, scene_id: SceneId) -> Self {
        self.scene_id = scene_id;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// Returned by [`NetworkManager::spawn`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnHandle {
    pub event_id: EventId,
    /// Assigned immediately on a server; empty on a client until the
    /// matching `Spawned` event arrives
    pub id: NetworkId,
}

impl<H: NetworkHooks> NetworkManager<H> {
    /// Spawns a prefab on every peer
    ///
    /// A server assigns the id, broadcasts, and instantiates locally before
    /// returning. A client only asks; the object appears when the server's
    /// spawn packet arrives and `OperationCompleted` fires with the returned
    /// event id.
    pub fn spawn(&mut self, request: SpawnRequest) -> Result<SpawnHandle, NetError> {
        if !self.role.is_active() {
            return Err(NetError::NotRunning);
        }
        if !self.prefabs.contains(&request.prefab_id) {
            return Err(NetError::UnknownPrefab(request.prefab_id));
        }
        if !self.role.is_server() && !self.config.allow_client_spawns {
            return Err(NetError::PermissionDenied {
                operation: "spawn objects from a client",
            });
        }

        let event_id = self.next_event_id();
        let id = if self.role.is_server() {
            NetworkId::new_unique(|candidate| self.identities.contains(candidate))
        } else {
            NetworkId::EMPTY
        };
        let packet = NetworkObjectSpawnPacket {
            id,
            prefab_id: request.prefab_id,
            owner: request.owner,
            transform: request.transform,
            is_active: request.is_active,
            scene_id: request.scene_id,
            event_id,
        };
        if let Err(e) = self.issue(&packet) {
            self.pending_events.remove(&event_id);
            return Err(e);
        }
        Ok(SpawnHandle { event_id, id })
    }

    pub fn despawn(&mut self, id: NetworkId) -> Result<EventId, NetError> {
        self.authorize_local(id, "despawn this object")?;
        let event_id = self.next_event_id();
        self.issue_tracked(event_id, &NetworkObjectDespawnPacket { id, event_id })
    }

    pub fn set_owner(&mut self, id: NetworkId, owner: Owner) -> Result<EventId, NetError> {
        self.authorize_local(id, "change the owner of this object")?;
        let event_id = self.next_event_id();
        self.issue_tracked(event_id, &NetworkObjectOwnerPacket { id, owner, event_id })
    }

    pub fn set_active(&mut self, id: NetworkId, is_active: bool) -> Result<EventId, NetError> {
        self.authorize_local(id, "change whether this object is active")?;
        let event_id = self.next_event_id();
        self.issue_tracked(event_id, &NetworkObjectActivePacket { id, is_active, event_id })
    }

    pub fn move_to_scene(&mut self, id: NetworkId, scene_id: SceneId) -> Result<(), NetError> {
        self.authorize_local(id, "move this object between scenes")?;
        self.issue(&NetworkObjectMoveScenePacket { id, scene_id })
    }

    fn issue_tracked<P: Packet>(&mut self, event_id: EventId, packet: &P) -> Result<EventId, NetError> {
        match self.issue(packet) {
            Ok(()) => Ok(event_id),
            Err(e) => {
                self.pending_events.remove(&event_id);
                Err(e)
            }
        }
    }

    fn authorize_local(&self, id: NetworkId, operation: &'static str) -> Result<(), NetError> {
        if !self.role.is_active() {
            return Err(NetError::NotRunning);
        }
        let identity = self.identities.get(&id).ok_or(NetError::UnknownIdentity(id))?;
        if !identity.has_authority(&self.role) {
            return Err(NetError::PermissionDenied { operation });
        }
        Ok(())
    }

    /// Server side check of a client request against the object's owner.
    /// Ok(false) when the object is already gone.
    fn authorize_remote(&self, client_id: ClientId, id: NetworkId, operation: &'static str) -> Result<bool, NetError> {
        if !self.role.is_server() {
            return Err(NetError::PermissionDenied { operation });
        }
        let Some(identity) = self.identities.get(&id) else {
            debug!("Client {} addressed missing object {}", client_id, id);
            return Ok(false);
        };
        if identity.owner() != Owner::Client(client_id) {
            return Err(NetError::PermissionDenied { operation });
        }
        Ok(true)
    }

    pub(super) fn instantiate(&mut self, packet: &NetworkObjectSpawnPacket, retroactive: bool) -> Result<(), NetError> {
        if self.identities.contains(&packet.id) {
            debug!("Ignoring duplicate spawn of {}", packet.id);
            return Ok(());
        }
        let behaviours = self.prefabs.instantiate(&packet.prefab_id)?;
        let identity = NetworkIdentity::new(
            packet.id,
            packet.prefab_id,
            packet.owner,
            packet.scene_id,
            packet.is_active,
            packet.transform,
            behaviours,
        )?;
        if self.identities.insert(identity).is_err() {
            return Ok(());
        }
        debug!("Spawned {} from prefab {}", packet.id, packet.prefab_id);
        self.emit(NetworkEvent::Spawned {
            id: packet.id,
            retroactive,
        });
        self.complete_event(packet.event_id);
        Ok(())
    }

    pub(super) fn remove_identity(&mut self, id: NetworkId) -> bool {
        let Some(identity) = self.identities.remove(&id) else {
            return false;
        };
        self.dirty.retain(|(dirty_id, _)| *dirty_id != id);
        if identity.is_scene_object() {
            self.removed_scene_objects.insert(id, identity.scene_id());
        }
        self.emit(NetworkEvent::Despawned { id });
        true
    }

    /// Owner becomes the server, or the objects are despawned when configured
    pub(super) fn release_owned_objects(&mut self, client_id: ClientId) -> Vec<NetworkId> {
        let owned = self.identities.ids_owned_by(Owner::Client(client_id));
        if owned.is_empty() {
            return owned;
        }
        let despawn = self.config.despawn_owned_on_disconnect;
        info!(
            "Client {} left {} objects, {}",
            client_id,
            owned.len(),
            if despawn { "despawning" } else { "returning them to the server" }
        );
        for id in &owned {
            let result = if despawn {
                self.broadcast_state(&NetworkObjectDespawnPacket { id: *id, event_id: NO_EVENT })
            } else {
                self.broadcast_state(&NetworkObjectOwnerPacket {
                    id: *id,
                    owner: Owner::Server,
                    event_id: NO_EVENT,
                })
            };
            if let Err(e) = result {
                warn!("Failed to release {}: {}", id, e);
            }
        }
        self.drain_loopback();
        if despawn {
            Vec::new()
        } else {
            owned
        }
    }
}

pub(super) fn handle_spawn<H: NetworkHooks>(m: &mut NetworkManager<H>, origin: Origin, body: &[u8]) -> Result<(), NetError> {
    let mut packet: NetworkObjectSpawnPacket = wire::decode(body)?;
    match origin {
        Origin::Client(client_id) => {
            if !m.role.is_server() || !m.config.allow_client_spawns {
                return Err(NetError::PermissionDenied {
                    operation: "spawn objects from a client",
                });
            }
            if packet.owner != Owner::Server && packet.owner != Owner::Client(client_id) {
                return Err(NetError::PermissionDenied {
                    operation: "spawn objects for another client",
                });
            }
            if !m.prefabs.contains(&packet.prefab_id) {
                return Err(NetError::UnknownPrefab(packet.prefab_id));
            }
            packet.id = NetworkId::new_unique(|candidate| m.identities.contains(candidate));
            m.broadcast_state(&packet)
        }
        Origin::Server | Origin::Local => m.instantiate(&packet, false),
    }
}

pub(super) fn handle_despawn<H: NetworkHooks>(m: &mut NetworkManager<H>, origin: Origin, body: &[u8]) -> Result<(), NetError> {
    let packet: NetworkObjectDespawnPacket = wire::decode(body)?;
    match origin {
        Origin::Client(client_id) => {
            if m.authorize_remote(client_id, packet.id, "despawn an object it does not own")? {
                m.broadcast_state(&packet)?;
            }
            Ok(())
        }
        Origin::Server | Origin::Local => {
            if !m.remove_identity(packet.id) {
                debug!("Despawn of {} already applied", packet.id);
            }
            m.complete_event(packet.event_id);
            Ok(())
        }
    }
}

pub(super) fn handle_owner<H: NetworkHooks>(m: &mut NetworkManager<H>, origin: Origin, body: &[u8]) -> Result<(), NetError> {
    let packet: NetworkObjectOwnerPacket = wire::decode(body)?;
    match origin {
        Origin::Client(client_id) => {
            if m.authorize_remote(client_id, packet.id, "give away an object it does not own")? {
                m.broadcast_state(&packet)?;
            }
            Ok(())
        }
        Origin::Server | Origin::Local => {
            let changed = m
                .identities
                .get_mut(&packet.id)
                .is_some_and(|identity| identity.set_owner(packet.owner));
            if changed {
                m.emit(NetworkEvent::OwnerChanged {
                    id: packet.id,
                    owner: packet.owner,
                });
            }
            m.complete_event(packet.event_id);
            Ok(())
        }
    }
}

pub(super) fn handle_active<H: NetworkHooks>(m: &mut NetworkManager<H>, origin: Origin, body: &[u8]) -> Result<(), NetError> {
    let packet: NetworkObjectActivePacket = wire::decode(body)?;
    match origin {
        Origin::Client(client_id) => {
            if m.authorize_remote(client_id, packet.id, "toggle an object it does not own")? {
                m.broadcast_state(&packet)?;
            }
            Ok(())
        }
        Origin::Server | Origin::Local => {
            let changed = m
                .identities
                .get_mut(&packet.id)
                .is_some_and(|identity| identity.set_active(packet.is_active));
            if changed {
                m.emit(NetworkEvent::ActiveChanged {
                    id: packet.id,
                    is_active: packet.is_active,
                });
            }
            m.complete_event(packet.event_id);
            Ok(())
        }
    }
}

pub(super) fn handle_move_scene<H: NetworkHooks>(m: &mut NetworkManager<H>, origin: Origin, body: &[u8]) -> Result<(), NetError> {
    let packet: NetworkObjectMoveScenePacket = wire::decode(body)?;
    match origin {
        Origin::Client(client_id) => {
            if m.authorize_remote(client_id, packet.id, "move an object it does not own")? {
                m.broadcast_state(&packet)?;
            }
            Ok(())
        }
        Origin::Server | Origin::Local => {
            let changed = m
                .identities
                .get_mut(&packet.id)
                .is_some_and(|identity| identity.set_scene(packet.scene_id));
            if changed {
                m.emit(NetworkEvent::SceneChanged {
                    id: packet.id,
                    scene_id: packet.scene_id,
                });
            }
            Ok(())
        }
    }
}
