//! Replicated objects and the table holding them

use std::collections::BTreeMap;

use crate::behaviour::NetworkBehaviour;
use crate::error::NetError;
use crate::id::NetworkId;
use crate::packets::{NetworkObjectSpawnPacket, PreExistingObject};
use crate::transform::Transform;
use crate::types::{BehaviourId, EventId, NetworkRole, Owner, SceneId};

/// One replicated object
///
/// Authority is never stored here; it is derived from the local role and
/// the owner each time it is asked for.
#[derive(Debug)]
pub struct NetworkIdentity {
    id: NetworkId,
    owner: Owner,
    prefab_id: NetworkId,
    scene_id: SceneId,
    is_active: bool,
    transform: Transform,
    behaviours: Vec<NetworkBehaviour>,
    // Scene whose definition placed this object
    origin_scene: Option<String>,
}

impl NetworkIdentity {
    pub fn new(
        id: NetworkId,
        prefab_id: NetworkId,
        owner: Owner,
        scene_id: SceneId,
        is_active: bool,
        transform: Transform,
        mut behaviours: Vec<NetworkBehaviour>,
    ) -> Result<Self, NetError> {
        if behaviours.len() > BehaviourId::MAX as usize + 1 {
            return Err(NetError::detached(format!(
                "identity {} has {} behaviours, at most 256 are addressable",
                id,
                behaviours.len()
            )));
        }
        for (index, behaviour) in behaviours.iter_mut().enumerate() {
            behaviour.set_id(index as BehaviourId);
        }
        Ok(Self {
            id,
            owner,
            prefab_id,
            scene_id,
            is_active,
            transform,
            behaviours,
            origin_scene: None,
        })
    }

    pub(crate) fn placed_by(mut self, scene_name: &str) -> Self {
        self.origin_scene = Some(scene_name.to_string());
        self
    }

    /// Name of the scene that placed this object, None for prefab spawns
    pub fn origin_scene(&self) -> Option<&str> {
        self.origin_scene.as_deref()
    }

    pub fn id(&self) -> NetworkId {
        self.id
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn prefab_id(&self) -> NetworkId {
        self.prefab_id
    }

    pub fn scene_id(&self) -> SceneId {
        self.scene_id
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Pre-placed by a scene rather than spawned from a prefab
    pub fn is_scene_object(&self) -> bool {
        self.prefab_id.is_empty()
    }

    pub fn has_authority(&self, role: &NetworkRole) -> bool {
        role.has_authority(self.owner)
    }

    pub fn behaviours(&self) -> &[NetworkBehaviour] {
        &self.behaviours
    }

    pub fn behaviour(&self, id: BehaviourId) -> Option<&NetworkBehaviour> {
        self.behaviours.get(id as usize)
    }

    pub fn behaviour_mut(&mut self, id: BehaviourId) -> Option<&mut NetworkBehaviour> {
        self.behaviours.get_mut(id as usize)
    }

    pub fn behaviour_by_name(&self, name: &str) -> Option<&NetworkBehaviour> {
        self.behaviours.iter().find(|b| b.name() == name)
    }

    /// Returns false when the owner was already `owner`
    pub(crate) fn set_owner(&mut self, owner: Owner) -> bool {
        std::mem::replace(&mut self.owner, owner) != owner
    }

    pub(crate) fn set_active(&mut self, is_active: bool) -> bool {
        std::mem::replace(&mut self.is_active, is_active) != is_active
    }

    pub(crate) fn set_scene(&mut self, scene_id: SceneId) -> bool {
        std::mem::replace(&mut self.scene_id, scene_id) != scene_id
    }

    pub(crate) fn spawn_packet(&self, event_id: EventId) -> NetworkObjectSpawnPacket {
        NetworkObjectSpawnPacket {
            id: self.id,
            prefab_id: self.prefab_id,
            owner: self.owner,
            transform: self.transform,
            is_active: self.is_active,
            scene_id: self.scene_id,
            event_id,
        }
    }

    pub(crate) fn pre_existing(&self) -> PreExistingObject {
        PreExistingObject {
            id: self.id,
            owner: self.owner,
            is_active: self.is_active,
            scene_id: self.scene_id,
            origin_scene: self.origin_scene.clone().unwrap_or_default(),
        }
    }
}

/// Live identities ordered by id
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    identities: BTreeMap<NetworkId, NetworkIdentity>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects duplicates, returning the identity back
    pub fn insert(&mut self, identity: NetworkIdentity) -> Result<(), NetworkIdentity> {
        if self.identities.contains_key(&identity.id) {
            return Err(identity);
        }
        self.identities.insert(identity.id, identity);
        Ok(())
    }

    pub fn remove(&mut self, id: &NetworkId) -> Option<NetworkIdentity> {
        self.identities.remove(id)
    }

    pub fn get(&self, id: &NetworkId) -> Option<&NetworkIdentity> {
        self.identities.get(id)
    }

    pub fn get_mut(&mut self, id: &NetworkId) -> Option<&mut NetworkIdentity> {
        self.identities.get_mut(id)
    }

    pub fn contains(&self, id: &NetworkId) -> bool {
        self.identities.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkIdentity> {
        self.identities.values()
    }

    pub fn ids_in_scene(&self, scene_id: SceneId) -> Vec<NetworkId> {
        self.iter()
            .filter(|identity| identity.scene_id == scene_id)
            .map(|identity| identity.id)
            .collect()
    }

    pub fn ids_owned_by(&self, owner: Owner) -> Vec<NetworkId> {
        self.iter()
            .filter(|identity| identity.owner == owner)
            .map(|identity| identity.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn clear(&mut self) {
        self.identities.clear();
    }
}
