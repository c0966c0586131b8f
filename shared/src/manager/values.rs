//! Network value access and dirty-state flushing

use log::{debug, error};

use super::NetworkManager;
use crate::behaviour::NetworkBehaviour;
use crate::error::NetError;
use crate::events::NetworkEvent;
use crate::hooks::NetworkHooks;
use crate::id::NetworkId;
use crate::packets::NetworkValuesPacket;
use crate::types::{BehaviourId, Channel, ClientId, Origin, Owner, ValueIndex};
use crate::value::{ModifierType, NetValue, ValueRef, WriteAccess, WriteOutcome};
use crate::wire;

impl<H: NetworkHooks> NetworkManager<H> {
    /// Resolves a typed handle by behaviour name, checking the stored type
    pub fn value_ref<T: NetValue>(&self, id: NetworkId, behaviour: &str, index: ValueIndex) -> Result<ValueRef<T>, NetError> {
        let identity = self.identities.get(&id).ok_or(NetError::UnknownIdentity(id))?;
        let behaviour = identity
            .behaviour_by_name(behaviour)
            .ok_or_else(|| NetError::detached(format!("{} has no behaviour '{}'", id, behaviour)))?;
        behaviour.value::<T>(index)?;
        Ok(ValueRef::new(id, behaviour.id(), index))
    }

    pub fn value<T: NetValue>(&self, value: ValueRef<T>) -> Result<&T, NetError> {
        let behaviour = self.behaviour(value.identity, value.behaviour)?;
        Ok(behaviour.value::<T>(value.index)?.get())
    }

    /// Writes a value, marking its behaviour for the next flush
    ///
    /// Equal values are a no-op. Without a running session the write only
    /// applies locally. Otherwise the value's modifier is checked against
    /// the local role before anything changes.
    pub fn set_value<T: NetValue>(&mut self, value: ValueRef<T>, new: T) -> Result<WriteOutcome, NetError> {
        let identity = self
            .identities
            .get_mut(&value.identity)
            .ok_or_else(|| NetError::detached(format!("no identity {}", value.identity)))?;
        let access = if self.role.is_active() {
            WriteAccess::for_role(&self.role, identity.owner())
        } else {
            WriteAccess::offline()
        };
        let behaviour = identity
            .behaviour_mut(value.behaviour)
            .ok_or_else(|| NetError::detached(format!("{} has no behaviour {}", value.identity, value.behaviour)))?;
        let outcome = behaviour.value_mut::<T>(value.index)?.set(new, &access)?;
        if outcome == WriteOutcome::Dirty {
            behaviour.mark_value_dirty(value.index);
            self.dirty.insert((value.identity, value.behaviour));
        }
        if outcome != WriteOutcome::Unchanged {
            self.emit(NetworkEvent::ValueChanged {
                id: value.identity,
                behaviour: value.behaviour,
                index: value.index,
            });
        }
        Ok(outcome)
    }

    /// Listener called with `(old, new)` after every change, local or remote
    pub fn subscribe<T: NetValue>(
        &mut self,
        value: ValueRef<T>,
        listener: impl FnMut(&T, &T) + Send + 'static,
    ) -> Result<(), NetError> {
        let behaviour = self.behaviour_mut(value.identity, value.behaviour)?;
        behaviour.value_mut::<T>(value.index)?.subscribe(listener);
        Ok(())
    }

    pub fn behaviour(&self, id: NetworkId, behaviour: BehaviourId) -> Result<&NetworkBehaviour, NetError> {
        self.identities
            .get(&id)
            .ok_or(NetError::UnknownIdentity(id))?
            .behaviour(behaviour)
            .ok_or_else(|| NetError::detached(format!("{} has no behaviour {}", id, behaviour)))
    }

    fn behaviour_mut(&mut self, id: NetworkId, behaviour: BehaviourId) -> Result<&mut NetworkBehaviour, NetError> {
        self.identities
            .get_mut(&id)
            .ok_or(NetError::UnknownIdentity(id))?
            .behaviour_mut(behaviour)
            .ok_or_else(|| NetError::detached(format!("{} has no behaviour {}", id, behaviour)))
    }

    /// Sends every value of one object to one client, e.g. after it reconnects
    pub fn send_values_to_client(&mut self, client_id: ClientId, id: NetworkId) -> Result<(), NetError> {
        if !self.role.is_server() {
            return Err(NetError::PermissionDenied {
                operation: "send values to a client",
            });
        }
        let identity = self.identities.get(&id).ok_or(NetError::UnknownIdentity(id))?;
        let mut packets = Vec::new();
        for behaviour in identity.behaviours() {
            if let Some(payload) = behaviour.full_payload()? {
                packets.push(NetworkValuesPacket {
                    id,
                    behaviour_id: behaviour.id(),
                    payload,
                });
            }
        }
        for packet in packets {
            self.send_packet_to_client(client_id, &packet, Channel::Reliable)?;
        }
        Ok(())
    }

    /// Full value snapshot of every live object
    pub(super) fn value_snapshots(&self) -> Result<Vec<NetworkValuesPacket>, NetError> {
        let mut packets = Vec::new();
        for identity in self.identities.iter() {
            for behaviour in identity.behaviours() {
                if let Some(payload) = behaviour.full_payload()? {
                    packets.push(NetworkValuesPacket {
                        id: identity.id(),
                        behaviour_id: behaviour.id(),
                        payload,
                    });
                }
            }
        }
        Ok(packets)
    }

    /// One values packet per dirty behaviour, holding every index changed since the last flush
    pub(super) fn flush_dirty_values(&mut self) {
        if self.dirty.is_empty() {
            return;
        }
        let dirty = std::mem::take(&mut self.dirty);
        for (id, behaviour_id) in dirty {
            let Some(behaviour) = self
                .identities
                .get_mut(&id)
                .and_then(|identity| identity.behaviour_mut(behaviour_id))
            else {
                continue;
            };
            let payload = match behaviour.take_dirty_payload() {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(e) => {
                    error!("Failed to encode values of {}/{}: {}", id, behaviour_id, e);
                    continue;
                }
            };
            let packet = NetworkValuesPacket { id, behaviour_id, payload };
            let result = if self.role.is_server() {
                self.broadcast_packet(&packet, Channel::Reliable)
            } else {
                self.send_packet_to_server(&packet, Channel::Reliable)
            };
            if let Err(e) = result {
                error!("Failed to send values of {}/{}: {}", id, behaviour_id, e);
            }
        }
    }

    /// Applies a values payload, firing events for values that changed
    pub(super) fn apply_values(&mut self, packet: &NetworkValuesPacket) -> Result<(), NetError> {
        let Some(identity) = self.identities.get_mut(&packet.id) else {
            debug!("Values for missing object {}", packet.id);
            return Ok(());
        };
        let behaviour = identity.behaviour_mut(packet.behaviour_id).ok_or_else(|| {
            NetError::malformed(format!("{} has no behaviour {}", packet.id, packet.behaviour_id))
        })?;
        let changed = behaviour.apply_payload(&packet.payload)?;
        for index in changed {
            self.emit(NetworkEvent::ValueChanged {
                id: packet.id,
                behaviour: packet.behaviour_id,
                index,
            });
        }
        Ok(())
    }
}

pub(super) fn handle_values<H: NetworkHooks>(m: &mut NetworkManager<H>, origin: Origin, body: &[u8]) -> Result<(), NetError> {
    let packet: NetworkValuesPacket = wire::decode(body)?;
    match origin {
        Origin::Client(client_id) => {
            if !m.role.is_server() {
                return Ok(());
            }
            let Some(identity) = m.identities.get(&packet.id) else {
                debug!("Client {} wrote values of missing object {}", client_id, packet.id);
                return Ok(());
            };
            if m.config.validate_client_writes {
                let owner = identity.owner();
                let behaviour = identity.behaviour(packet.behaviour_id).ok_or_else(|| {
                    NetError::malformed(format!("{} has no behaviour {}", packet.id, packet.behaviour_id))
                })?;
                let verdict = behaviour.validate_payload(&packet.payload, |modifier| match modifier {
                    ModifierType::Everybody => true,
                    ModifierType::OwnerOnly => owner == Owner::Client(client_id),
                    ModifierType::Server => false,
                });
                match verdict {
                    Err(e @ NetError::PermissionDenied { .. }) => {
                        // The sender already applied its write; overwrite it with ours
                        let correction = behaviour.full_payload()?.map(|payload| NetworkValuesPacket {
                            id: packet.id,
                            behaviour_id: packet.behaviour_id,
                            payload,
                        });
                        if let Some(correction) = correction {
                            m.send_packet_to_client(client_id, &correction, Channel::Reliable)?;
                        }
                        return Err(e);
                    }
                    other => {
                        other?;
                    }
                }
            }
            m.apply_values(&packet)?;
            m.broadcast_packet_except(client_id, &packet, Channel::Reliable)
        }
        Origin::Server => m.apply_values(&packet),
        Origin::Local => Ok(()),
    }
}
