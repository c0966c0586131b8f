use std::collections::BTreeSet;

use log::{debug, info, warn};

use super::NetworkManager;
use crate::error::NetError;
use crate::events::NetworkEvent;
use crate::hooks::NetworkHooks;
use crate::id::NetworkId;
use crate::identity::NetworkIdentity;
use crate::packets::{NetworkLoadScenePacket, NetworkUnloadScenePacket};
use crate::scene::{LoadedScene, SceneDefinition};
use crate::types::{EventId, Origin, NO_EVENT};
use crate::wire;

impl<H: NetworkHooks> NetworkManager<H> {
    /// Loads a scene everywhere; offline it only loads locally. The scene
    /// is resolved through the hooks before anything is broadcast, so a
    /// name the server cannot load never reaches the clients.
    pub fn load_scene(&mut self, scene_name: &str) -> Result<(), NetError> {
        if self.role.is_active() && !self.role.is_server() {
            return Err(NetError::PermissionDenied { operation: "load scenes" });
        }
        if self.is_scene_loaded(scene_name) {
            debug!("Scene '{}' already loaded", scene_name);
            return Ok(());
        }
        let definition = self
            .hooks
            .load_scene(scene_name)
            .ok_or_else(|| NetError::UnknownScene(scene_name.to_string()))?;
        self.place_scene(scene_name, definition, false, &BTreeSet::new());
        if !self.role.is_active() {
            return Ok(());
        }
        // Already loaded here, so the loopback copy is a no-op
        self.issue(&NetworkLoadScenePacket {
            scene_name: scene_name.to_string(),
        })
    }

    /// Unloads a scene everywhere, despawning the objects inside it
    pub fn unload_scene(&mut self, scene_name: &str) -> Result<EventId, NetError> {
        if !self.role.is_active() {
            self.unload_scene_locally(scene_name);
            return Ok(NO_EVENT);
        }
        if !self.role.is_server() {
            return Err(NetError::PermissionDenied { operation: "unload scenes" });
        }
        let event_id = self.next_event_id();
        let packet = NetworkUnloadScenePacket {
            scene_name: scene_name.to_string(),
            event_id,
        };
        if let Err(e) = self.issue(&packet) {
            self.pending_events.remove(&event_id);
            return Err(e);
        }
        Ok(event_id)
    }

    pub fn is_scene_loaded(&self, scene_name: &str) -> bool {
        self.scenes.iter().any(|scene| scene.name == scene_name)
    }

    /// Registers the scene's pre-placed objects, skipping ids in `removed`
    pub(super) fn load_scene_locally(&mut self, scene_name: &str, retroactive: bool, removed: &BTreeSet<NetworkId>) {
        if self.is_scene_loaded(scene_name) {
            return;
        }
        let Some(definition) = self.hooks.load_scene(scene_name) else {
            warn!("Scene '{}' could not be loaded", scene_name);
            return;
        };
        self.place_scene(scene_name, definition, retroactive, removed);
    }

    fn place_scene(
        &mut self,
        scene_name: &str,
        definition: SceneDefinition,
        retroactive: bool,
        removed: &BTreeSet<NetworkId>,
    ) {
        let scene_id = definition.scene_id;
        for object in definition.objects {
            if removed.contains(&object.id) {
                self.removed_scene_objects.insert(object.id, scene_id);
                continue;
            }
            let identity = match NetworkIdentity::new(
                object.id,
                NetworkId::EMPTY,
                object.owner,
                scene_id,
                object.is_active,
                object.transform,
                object.behaviours,
            ) {
                Ok(identity) => identity.placed_by(scene_name),
                Err(e) => {
                    warn!("Skipping scene object {}: {}", object.id, e);
                    continue;
                }
            };
            if let Err(duplicate) = self.identities.insert(identity) {
                warn!("Scene '{}' places {} which already exists", scene_name, duplicate.id());
                continue;
            }
            self.emit(NetworkEvent::Spawned {
                id: object.id,
                retroactive,
            });
        }
        info!("Loaded scene '{}' ({})", scene_name, scene_id);
        self.scenes.push(LoadedScene {
            name: scene_name.to_string(),
            scene_id,
        });
        self.emit(NetworkEvent::SceneLoaded {
            scene_name: scene_name.to_string(),
            scene_id,
        });
    }

    fn unload_scene_locally(&mut self, scene_name: &str) {
        let Some(position) = self.scenes.iter().position(|scene| scene.name == scene_name) else {
            debug!("Scene '{}' is not loaded", scene_name);
            return;
        };
        let scene = self.scenes.remove(position);
        for id in self.identities.ids_in_scene(scene.scene_id) {
            self.remove_identity(id);
        }
        self.removed_scene_objects
            .retain(|_, scene_id| *scene_id != scene.scene_id);
        info!("Unloaded scene '{}'", scene.name);
        self.emit(NetworkEvent::SceneUnloaded {
            scene_name: scene.name,
            scene_id: scene.scene_id,
        });
    }
}

pub(super) fn handle_load_scene<H: NetworkHooks>(m: &mut NetworkManager<H>, origin: Origin, body: &[u8]) -> Result<(), NetError> {
    let packet: NetworkLoadScenePacket = wire::decode(body)?;
    if let Origin::Client(_) = origin {
        return Err(NetError::PermissionDenied { operation: "load scenes" });
    }
    m.load_scene_locally(&packet.scene_name, false, &BTreeSet::new());
    Ok(())
}

pub(super) fn handle_unload_scene<H: NetworkHooks>(m: &mut NetworkManager<H>, origin: Origin, body: &[u8]) -> Result<(), NetError> {
    let packet: NetworkUnloadScenePacket = wire::decode(body)?;
    if let Origin::Client(_) = origin {
        return Err(NetError::PermissionDenied { operation: "unload scenes" });
    }
    m.unload_scene_locally(&packet.scene_name);
    m.complete_event(packet.event_id);
    Ok(())
}
