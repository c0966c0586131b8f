//! Wire packets exchanged by the manager

use serde::{Deserialize, Serialize};

use crate::id::NetworkId;
use crate::registry::Packet;
use crate::transform::Transform;
use crate::types::{BehaviourId, ClientId, EventId, Owner, SceneId};

/// Announces a new identity; every peer instantiates only on receipt
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkObjectSpawnPacket {
    /// Empty when a client asks the server to spawn
    pub id: NetworkId,
    pub prefab_id: NetworkId,
    pub owner: Owner,
    pub transform: Transform,
    pub is_active: bool,
    pub scene_id: SceneId,
    pub event_id: EventId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkObjectDespawnPacket {
    pub id: NetworkId,
    pub event_id: EventId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkObjectOwnerPacket {
    pub id: NetworkId,
    pub owner: Owner,
    pub event_id: EventId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkObjectActivePacket {
    pub id: NetworkId,
    pub is_active: bool,
    pub event_id: EventId,
}

/// Count-prefixed `(index, value)` pairs for one behaviour
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkValuesPacket {
    pub id: NetworkId,
    pub behaviour_id: BehaviourId,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkObjectMoveScenePacket {
    pub id: NetworkId,
    pub scene_id: SceneId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkLoadScenePacket {
    pub scene_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkUnloadScenePacket {
    pub scene_name: String,
    pub event_id: EventId,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkClientIdPacket {
    pub client_id: ClientId,
}

/// Synced portion of the receiving client's session data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSessionDataPacket {
    pub payload: Vec<u8>,
}

/// Framed application packet addressed to one behaviour
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkBehaviourPacket {
    pub id: NetworkId,
    pub behaviour_id: BehaviourId,
    pub payload: Vec<u8>,
}

/// Current state of a pre-placed scene object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreExistingObject {
    pub id: NetworkId,
    pub owner: Owner,
    pub is_active: bool,
    pub scene_id: SceneId,
    /// Scene that placed the object, which may since have been unloaded
    pub origin_scene: String,
}

/// Catch-up snapshot sent once to a late joiner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkPreExistingInfoPacket {
    pub pre_existing_objects: Vec<PreExistingObject>,
    /// Scene objects despawned since their scene loaded
    pub removed_objects: Vec<NetworkId>,
    /// Loaded scenes in load order
    pub scene_names: Vec<String>,
    pub spawned_objects: Vec<NetworkObjectSpawnPacket>,
    pub network_values: Vec<NetworkValuesPacket>,
}

/// Handshake request sent by a client right after connecting
///
/// Applications extend the handshake by implementing [`SessionRequest`] on
/// their own packet type; this base form only carries the restore key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSessionEstablishRequestPacket {
    pub session_key: Option<String>,
}

/// Handshake request contract
pub trait SessionRequest: Packet {
    /// Key matched against disconnected sessions to restore them
    fn session_key(&self) -> Option<&str>;
}

impl SessionRequest for NetworkSessionEstablishRequestPacket {
    fn session_key(&self) -> Option<&str> {
        self.session_key.as_deref()
    }
}

impl Packet for NetworkObjectSpawnPacket {}
impl Packet for NetworkObjectDespawnPacket {}
impl Packet for NetworkObjectOwnerPacket {}
impl Packet for NetworkObjectActivePacket {}
impl Packet for NetworkValuesPacket {}
impl Packet for NetworkObjectMoveScenePacket {}
impl Packet for NetworkLoadScenePacket {}
impl Packet for NetworkUnloadScenePacket {}
impl Packet for NetworkClientIdPacket {}
impl Packet for NetworkSessionDataPacket {}
impl Packet for NetworkBehaviourPacket {}
impl Packet for NetworkPreExistingInfoPacket {}
impl Packet for NetworkSessionEstablishRequestPacket {}
