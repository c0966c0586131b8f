use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection id assigned by the server
pub type ClientId = u32;
/// Scene membership tag carried by every identity
pub type SceneId = i32;
/// Completion token attached to guarded operations; 0 means none
pub type EventId = u32;
/// Index of a behaviour inside its identity
pub type BehaviourId = u8;
/// Index of a value inside its behaviour
pub type ValueIndex = u8;

/// Client id of the local client on a host
pub const HOST_CLIENT_ID: ClientId = 0;
pub const NO_EVENT: EventId = 0;

/// Network role of the local process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EndType {
    #[default]
    None,
    Server,
    Client,
    /// Server and client in one process
    Host,
}

impl EndType {
    pub fn is_server(&self) -> bool {
        matches!(self, EndType::Server | EndType::Host)
    }

    pub fn is_client(&self) -> bool {
        matches!(self, EndType::Client | EndType::Host)
    }
}

/// Who owns an identity. Encoded as an i32 owner id, -1 meaning the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum Owner {
    #[default]
    Server,
    Client(ClientId),
}

impl Owner {
    pub const SERVER_ID: i32 = -1;

    pub fn client_id(&self) -> Option<ClientId> {
        match self {
            Owner::Server => None,
            Owner::Client(id) => Some(*id),
        }
    }
}

impl From<i32> for Owner {
    fn from(raw: i32) -> Self {
        if raw < 0 {
            Owner::Server
        } else {
            Owner::Client(raw as ClientId)
        }
    }
}

impl From<Owner> for i32 {
    fn from(owner: Owner) -> Self {
        match owner {
            Owner::Server => Owner::SERVER_ID,
            Owner::Client(id) => id as i32,
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Server => write!(f, "server"),
            Owner::Client(id) => write!(f, "client {}", id),
        }
    }
}

/// Delivery class requested from the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Reliable,
    Unreliable,
}

/// Where a packet being handled came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Loopback of a packet this process broadcast as server
    Local,
    /// Received by a client from the server
    Server,
    /// Received by the server from a client
    Client(ClientId),
}

/// Local role snapshot used by every authority decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkRole {
    pub end_type: EndType,
    pub local_client_id: Option<ClientId>,
    pub server_running: bool,
}

impl NetworkRole {
    pub fn is_active(&self) -> bool {
        self.end_type != EndType::None
    }

    pub fn is_server(&self) -> bool {
        self.end_type.is_server() && self.server_running
    }

    /// Authority over an object owned by `owner`, recomputed on every call
    pub fn has_authority(&self, owner: Owner) -> bool {
        has_authority(
            self.end_type,
            owner,
            self.local_client_id,
            self.server_running,
        )
    }
}

/// Server/host with a running server owns server objects; a client/host
/// owns objects assigned to its local client id.
pub fn has_authority(
    end_type: EndType,
    owner: Owner,
    local_client_id: Option<ClientId>,
    server_running: bool,
) -> bool {
    let as_server = end_type.is_server() && server_running && owner == Owner::Server;
    let as_client = end_type.is_client()
        && local_client_id.is_some()
        && owner.client_id() == local_client_id;
    as_server || as_client
}
