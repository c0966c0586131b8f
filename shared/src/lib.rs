//! # Netsync Shared Library
//!
//! Server-authoritative state replication for networked applications. A
//! single [`NetworkManager`] runs as a server, a client, or a host (both at
//! once) and keeps a table of replicated objects in sync across peers.
//!
//! ## Core Concepts
//!
//! ### Identities and Behaviours
//! Every replicated object is a [`NetworkIdentity`] with a unique
//! [`NetworkId`], an owner, and an ordered list of [`NetworkBehaviour`]s.
//! Behaviours hold typed [`NetworkValue`]s addressed by index; the index and
//! the behaviour's position in its identity form the wire address of a value.
//!
//! ### Authority
//! Authority is never stored. It is derived from the local role and the
//! object's owner each time it is needed: the running server owns server
//! objects, a client owns objects assigned to its client id, and a host is
//! both.
//!
//! ### Packet Registry
//! Packets are identified on the wire by their registration index. Both ends
//! must register the same types in the same order; the manager registers its
//! built-in packets first, applications append their own, and the registry
//! locks once networking starts.
//!
//! ## Wire Format
//!
//! Frames are `[u16 packet id LE][body]`. Bodies use bincode with
//! little-endian fixed-width integers and u64 length prefixes. Value
//! payloads are a u8 count followed by `(u8 index, value)` pairs.
//!
//! ## Module Organization
//!
//! - `registry`, `packets`, `wire`: the packet contract and its encoding
//! - `value`, `behaviour`, `identity`, `prefab`, `scene`: replicated state
//! - `session`, `hooks`: per-client session records and application callbacks
//! - `transport`: the byte-moving contract and an in-process implementation
//! - `manager`: the engine tying it together

pub mod behaviour;
pub mod config;
pub mod error;
pub mod events;
pub mod hooks;
pub mod id;
pub mod identity;
pub mod manager;
pub mod packets;
pub mod prefab;
pub mod registry;
pub mod scene;
pub mod session;
pub mod transform;
pub mod transport;
pub mod types;
pub mod value;
pub mod wire;

pub use behaviour::NetworkBehaviour;
pub use config::NetworkConfig;
pub use error::NetError;
pub use events::NetworkEvent;
pub use hooks::{DefaultHooks, NetworkHooks};
pub use id::NetworkId;
pub use identity::{IdentityRegistry, NetworkIdentity};
pub use manager::{NetworkManager, SpawnHandle, SpawnRequest};
pub use packets::{NetworkSessionEstablishRequestPacket, SessionRequest};
pub use prefab::PrefabRegistry;
pub use registry::{AnyPacket, Packet, PacketId, PacketRegistry};
pub use scene::{scene_id_for, LoadedScene, SceneDefinition, SceneObject};
pub use session::{SessionData, SessionEstablishingResponse, SessionState, SessionTable};
pub use transform::{Color, Transform};
pub use transport::{ClientInfo, LinkConditioner, LocalHub, Transport, TransportEvent};
pub use types::{
    BehaviourId, Channel, ClientId, EndType, EventId, NetworkRole, Origin, Owner, SceneId, ValueIndex,
    HOST_CLIENT_ID, NO_EVENT,
};
pub use value::{ModifierType, NetValue, NetworkValue, ValueRef, WriteAccess, WriteOutcome};

pub use glam::{Quat, Vec2, Vec3, Vec4};
