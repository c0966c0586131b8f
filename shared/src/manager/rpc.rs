//! Application packets addressed to one behaviour of one object

use log::debug;

use super::NetworkManager;
use crate::error::NetError;
use crate::events::NetworkEvent;
use crate::hooks::NetworkHooks;
use crate::id::NetworkId;
use crate::packets::NetworkBehaviourPacket;
use crate::registry::Packet;
use crate::types::{BehaviourId, Channel, ClientId, EndType, Origin, HOST_CLIENT_ID};
use crate::wire;

impl<H: NetworkHooks> NetworkManager<H> {
    /// Client to server. `packet` must be registered with
    /// [`register_packet`](Self::register_packet) before starting.
    pub fn send_to_server<P: Packet>(
        &mut self,
        id: NetworkId,
        behaviour: BehaviourId,
        packet: &P,
        channel: Channel,
    ) -> Result<(), NetError> {
        if !self.role.end_type.is_client() {
            return Err(NetError::PermissionDenied {
                operation: "send behaviour packets to the server",
            });
        }
        let frame = self.behaviour_frame(id, behaviour, packet)?;
        if self.role.end_type == EndType::Host {
            let (_, packet) = self.registry.decode(&frame)?;
            self.emit(NetworkEvent::ServerPacket {
                id,
                behaviour,
                client_id: HOST_CLIENT_ID,
                packet,
            });
            return Ok(());
        }
        self.send_packet_to_server(
            &NetworkBehaviourPacket {
                id,
                behaviour_id: behaviour,
                payload: frame,
            },
            channel,
        )
    }

    /// Server to one client, or to every client when `target` is None
    pub fn send_to_clients<P: Packet>(
        &mut self,
        id: NetworkId,
        behaviour: BehaviourId,
        packet: &P,
        channel: Channel,
        target: Option<ClientId>,
    ) -> Result<(), NetError> {
        if !self.role.is_server() {
            return Err(NetError::PermissionDenied {
                operation: "send behaviour packets to clients",
            });
        }
        let frame = self.behaviour_frame(id, behaviour, packet)?;
        let is_host = self.role.end_type == EndType::Host;
        let local = match target {
            None => is_host,
            Some(client_id) => is_host && client_id == HOST_CLIENT_ID,
        };
        if local {
            let (_, packet) = self.registry.decode(&frame)?;
            self.emit(NetworkEvent::ClientPacket { id, behaviour, packet });
        }
        let wrapped = NetworkBehaviourPacket {
            id,
            behaviour_id: behaviour,
            payload: frame,
        };
        match target {
            None => self.broadcast_packet(&wrapped, channel),
            Some(client_id) if local && client_id == HOST_CLIENT_ID => Ok(()),
            Some(client_id) => self.send_packet_to_client(client_id, &wrapped, channel),
        }
    }

    fn behaviour_frame<P: Packet>(&self, id: NetworkId, behaviour: BehaviourId, packet: &P) -> Result<Vec<u8>, NetError> {
        self.behaviour(id, behaviour)?;
        self.registry.encode(packet)
    }
}

pub(super) fn handle_behaviour_packet<H: NetworkHooks>(m: &mut NetworkManager<H>, origin: Origin, body: &[u8]) -> Result<(), NetError> {
    let packet: NetworkBehaviourPacket = wire::decode(body)?;
    if m.behaviour(packet.id, packet.behaviour_id).is_err() {
        debug!("Behaviour packet for missing {}/{}", packet.id, packet.behaviour_id);
        return Ok(());
    }
    let (_, inner) = m.registry.decode(&packet.payload)?;
    match origin {
        Origin::Client(client_id) => m.emit(NetworkEvent::ServerPacket {
            id: packet.id,
            behaviour: packet.behaviour_id,
            client_id,
            packet: inner,
        }),
        Origin::Server => m.emit(NetworkEvent::ClientPacket {
            id: packet.id,
            behaviour: packet.behaviour_id,
            packet: inner,
        }),
        Origin::Local => {}
    }
    Ok(())
}
