use crate::id::NetworkId;
use crate::registry::AnyPacket;
use crate::types::{BehaviourId, ClientId, EventId, Owner, SceneId, ValueIndex};

/// Notifications queued by the manager and drained by the application
#[derive(Debug)]
pub enum NetworkEvent {
    /// The handshake finished and a client id was assigned locally
    Connected { client_id: ClientId },
    Disconnected { reason: String },
    /// Server side: a client completed its handshake
    ClientConnected { client_id: ClientId },
    ClientDisconnected { client_id: ClientId },
    SessionRejected { client_id: ClientId, reason: String },
    SessionRestored { client_id: ClientId, session_key: String },
    /// Client side: new synced session data arrived
    SessionDataChanged,
    /// `retroactive` is set for objects created by late-joiner catch-up
    Spawned { id: NetworkId, retroactive: bool },
    Despawned { id: NetworkId },
    OwnerChanged { id: NetworkId, owner: Owner },
    ActiveChanged { id: NetworkId, is_active: bool },
    SceneChanged { id: NetworkId, scene_id: SceneId },
    ValueChanged { id: NetworkId, behaviour: BehaviourId, index: ValueIndex },
    SceneLoaded { scene_name: String, scene_id: SceneId },
    SceneUnloaded { scene_name: String, scene_id: SceneId },
    /// An operation issued by this peer was applied here
    OperationCompleted { event_id: EventId },
    /// A behaviour packet a client addressed to the server
    ServerPacket {
        id: NetworkId,
        behaviour: BehaviourId,
        client_id: ClientId,
        packet: Box<dyn AnyPacket>,
    },
    /// A behaviour packet the server addressed to this client
    ClientPacket {
        id: NetworkId,
        behaviour: BehaviourId,
        packet: Box<dyn AnyPacket>,
    },
}
