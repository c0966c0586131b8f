//! Packet type <-> wire id mapping
//!
//! Ids are assigned densely in registration order, so every peer must
//! register the same packet types in the same order before networking starts.
//! Nothing checks this at runtime; divergent orders make peers silently
//! misinterpret each other's packets. [`PacketRegistry::fingerprint`] lets a
//! deployment compare registries out of band.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::fmt::Debug;

use crate::error::NetError;
use crate::wire;

pub type PacketId = u16;

const INITIAL_CAPACITY: usize = 16;

/// Contract every wire packet fulfils
pub trait Packet: Serialize + DeserializeOwned + Default + Debug + Send + 'static {}

/// Object-safe view of a registered packet
pub trait AnyPacket: Debug + Send {
    fn type_name(&self) -> &'static str;
    fn packet_type_id(&self) -> TypeId;
    fn encode_body(&self) -> Result<Vec<u8>, NetError>;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<P: Packet> AnyPacket for P {
    fn type_name(&self) -> &'static str {
        std::any::type_name::<P>()
    }

    fn packet_type_id(&self) -> TypeId {
        TypeId::of::<P>()
    }

    fn encode_body(&self) -> Result<Vec<u8>, NetError> {
        wire::encode(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

impl dyn AnyPacket {
    pub fn is<P: Packet>(&self) -> bool {
        self.packet_type_id() == TypeId::of::<P>()
    }

    pub fn downcast_ref<P: Packet>(&self) -> Option<&P> {
        self.as_any().downcast_ref::<P>()
    }

    pub fn downcast<P: Packet>(self: Box<Self>) -> Option<Box<P>> {
        self.into_any().downcast::<P>().ok()
    }
}

struct PacketEntry {
    type_id: TypeId,
    name: &'static str,
    create: fn() -> Box<dyn AnyPacket>,
    decode: fn(&[u8]) -> Result<Box<dyn AnyPacket>, NetError>,
}

fn create_packet<P: Packet>() -> Box<dyn AnyPacket> {
    Box::new(P::default())
}

fn decode_packet<P: Packet>(body: &[u8]) -> Result<Box<dyn AnyPacket>, NetError> {
    let packet: P = wire::decode(body)?;
    Ok(Box::new(packet))
}

/// Dense table of registered packet types
pub struct PacketRegistry {
    entries: Vec<PacketEntry>,
    locked: bool,
}

impl Default for PacketRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(INITIAL_CAPACITY),
            locked: false,
        }
    }

    /// Appends `P` and returns its wire id. Registering a type twice keeps
    /// the original id.
    pub fn register<P: Packet>(&mut self) -> Result<PacketId, NetError> {
        if self.locked {
            return Err(NetError::ProtocolLocked);
        }
        if let Some(id) = self.id_of::<P>() {
            log::warn!(
                "Packet {} registered twice, keeping id {}",
                std::any::type_name::<P>(),
                id
            );
            return Ok(id);
        }
        if self.entries.len() >= PacketId::MAX as usize {
            return Err(NetError::malformed("packet registry is full"));
        }

        // grow by doubling
        if self.entries.len() == self.entries.capacity() {
            let additional = self.entries.capacity().max(1);
            self.entries.reserve_exact(additional);
        }

        let id = self.entries.len() as PacketId;
        self.entries.push(PacketEntry {
            type_id: TypeId::of::<P>(),
            name: std::any::type_name::<P>(),
            create: create_packet::<P>,
            decode: decode_packet::<P>,
        });
        Ok(id)
    }

    fn id_of_type(&self, type_id: TypeId) -> Option<PacketId> {
        self.entries
            .iter()
            .position(|entry| entry.type_id == type_id)
            .map(|index| index as PacketId)
    }

    pub fn id_of<P: Packet>(&self) -> Option<PacketId> {
        self.id_of_type(TypeId::of::<P>())
    }

    pub fn id_of_packet(&self, packet: &dyn AnyPacket) -> Option<PacketId> {
        self.id_of_type(packet.packet_type_id())
    }

    /// Default-constructs the packet registered under `id`
    pub fn create(&self, id: PacketId) -> Option<Box<dyn AnyPacket>> {
        self.entries.get(id as usize).map(|entry| (entry.create)())
    }

    pub fn name_of(&self, id: PacketId) -> Option<&'static str> {
        self.entries.get(id as usize).map(|entry| entry.name)
    }

    /// Frames a packet as `[id][body]`
    pub fn encode(&self, packet: &dyn AnyPacket) -> Result<Vec<u8>, NetError> {
        let id = self
            .id_of_packet(packet)
            .ok_or(NetError::UnregisteredPacket {
                type_name: packet.type_name(),
            })?;
        let body = packet.encode_body()?;
        Ok(Self::frame(id, &body))
    }

    pub fn frame(id: PacketId, body: &[u8]) -> Vec<u8> {
        let mut frame = Vec::with_capacity(body.len() + 2);
        frame.extend_from_slice(&id.to_le_bytes());
        frame.extend_from_slice(body);
        frame
    }

    /// Splits a frame into its packet id and body without decoding
    pub fn split_frame(frame: &[u8]) -> Result<(PacketId, &[u8]), NetError> {
        if frame.len() < 2 {
            return Err(NetError::malformed(format!(
                "frame of {} bytes has no packet id",
                frame.len()
            )));
        }
        let id = PacketId::from_le_bytes([frame[0], frame[1]]);
        Ok((id, &frame[2..]))
    }

    pub fn decode(&self, frame: &[u8]) -> Result<(PacketId, Box<dyn AnyPacket>), NetError> {
        let (id, body) = Self::split_frame(frame)?;
        let entry = self
            .entries
            .get(id as usize)
            .ok_or(NetError::UnknownPacket { packet_id: id })?;
        Ok((id, (entry.decode)(body)?))
    }

    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Order-sensitive hash of the registered type names (FNV-1a)
    pub fn fingerprint(&self) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for (index, entry) in self.entries.iter().enumerate() {
            for byte in (index as u32)
                .to_le_bytes()
                .iter()
                .chain(entry.name.as_bytes())
            {
                hash ^= *byte as u64;
                hash = hash.wrapping_mul(0x0100_0000_01b3);
            }
        }
        hash
    }
}
