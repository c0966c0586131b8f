use std::collections::BTreeMap;

use crate::behaviour::NetworkBehaviour;
use crate::error::NetError;
use crate::id::NetworkId;

type PrefabFactory = Box<dyn Fn() -> Result<Vec<NetworkBehaviour>, NetError> + Send + Sync>;

struct Prefab {
    name: String,
    factory: PrefabFactory,
}

/// Prefab id -> behaviour list factory; must match on every peer
#[derive(Default)]
pub struct PrefabRegistry {
    prefabs: BTreeMap<NetworkId, Prefab>,
}

impl PrefabRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: NetworkId,
        name: impl Into<String>,
        factory: impl Fn() -> Result<Vec<NetworkBehaviour>, NetError> + Send + Sync + 'static,
    ) {
        let name = name.into();
        if let Some(previous) = self.prefabs.get(&id) {
            log::warn!("Prefab {} ({}) replaced by '{}'", id, previous.name, name);
        }
        self.prefabs.insert(
            id,
            Prefab {
                name,
                factory: Box::new(factory),
            },
        );
    }

    pub fn contains(&self, id: &NetworkId) -> bool {
        self.prefabs.contains_key(id)
    }

    pub fn name_of(&self, id: &NetworkId) -> Option<&str> {
        self.prefabs.get(id).map(|p| p.name.as_str())
    }

    /// Fresh behaviour list with default values
    pub fn instantiate(&self, id: &NetworkId) -> Result<Vec<NetworkBehaviour>, NetError> {
        let prefab = self.prefabs.get(id).ok_or(NetError::UnknownPrefab(*id))?;
        (prefab.factory)()
    }

    pub fn len(&self) -> usize {
        self.prefabs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefabs.is_empty()
    }
}
