use crate::behaviour::NetworkBehaviour;
use crate::id::NetworkId;
use crate::transform::Transform;
use crate::types::{Owner, SceneId};

/// A pre-placed object, created on every peer when its scene loads
#[derive(Debug)]
pub struct SceneObject {
    pub id: NetworkId,
    pub owner: Owner,
    pub is_active: bool,
    pub transform: Transform,
    pub behaviours: Vec<NetworkBehaviour>,
}

impl SceneObject {
    pub fn new(id: NetworkId, behaviours: Vec<NetworkBehaviour>) -> Self {
        Self {
            id,
            owner: Owner::Server,
            is_active: true,
            transform: Transform::default(),
            behaviours,
        }
    }
}

/// What loading a scene produces locally
#[derive(Debug)]
pub struct SceneDefinition {
    pub scene_id: SceneId,
    pub objects: Vec<SceneObject>,
}

impl SceneDefinition {
    pub fn empty(scene_name: &str) -> Self {
        Self {
            scene_id: scene_id_for(scene_name),
            objects: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedScene {
    pub name: String,
    pub scene_id: SceneId,
}

/// Stable non-negative id derived from a scene name (FNV-1a)
pub fn scene_id_for(scene_name: &str) -> SceneId {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in scene_name.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    (hash & 0x7fff_ffff) as SceneId
}
