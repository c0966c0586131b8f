//! Value container attached to an identity, with per-tick dirty tracking

use std::fmt;

use crate::error::NetError;
use crate::types::{BehaviourId, ValueIndex};
use crate::value::{ModifierType, NetValue, NetworkValue, ValueSlot};
use crate::wire;

const MAX_VALUES: usize = u8::MAX as usize;

/// A named bag of network values owned by exactly one identity
///
/// Values are addressed by their index in insertion order. The behaviour id
/// is its position in the owning identity's behaviour list and is only
/// unique within that identity.
pub struct NetworkBehaviour {
    name: String,
    id: BehaviourId,
    values: Vec<Box<dyn ValueSlot>>,
    pending: Vec<ValueIndex>,
}

impl NetworkBehaviour {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: 0,
            values: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> BehaviourId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: BehaviourId) {
        self.id = id;
    }

    /// Attaches a value and returns its slot index
    pub fn add_value<T: NetValue>(&mut self, mut value: NetworkValue<T>) -> Result<ValueIndex, NetError> {
        if self.values.len() >= MAX_VALUES {
            return Err(NetError::TooManyValues);
        }
        let index = self.values.len() as ValueIndex;
        value.attach(index);
        self.values.push(Box::new(value));
        Ok(index)
    }

    /// Builder form of [`add_value`](Self::add_value)
    pub fn with_value<T: NetValue>(mut self, value: T, modifier: ModifierType) -> Result<Self, NetError> {
        self.add_value(NetworkValue::new(value, modifier))?;
        Ok(self)
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn value<T: NetValue>(&self, index: ValueIndex) -> Result<&NetworkValue<T>, NetError> {
        let slot = self.slot(index)?;
        let type_name = slot.value_type();
        slot.as_any()
            .downcast_ref::<NetworkValue<T>>()
            .ok_or_else(|| type_mismatch::<T>(&self.name, index, type_name))
    }

    pub fn value_mut<T: NetValue>(&mut self, index: ValueIndex) -> Result<&mut NetworkValue<T>, NetError> {
        let type_name = self.slot(index)?.value_type();
        let name = &self.name;
        let values = &mut self.values;
        values[index as usize]
            .as_any_mut()
            .downcast_mut::<NetworkValue<T>>()
            .ok_or_else(|| type_mismatch::<T>(name, index, type_name))
    }

    fn slot(&self, index: ValueIndex) -> Result<&dyn ValueSlot, NetError> {
        self.values
            .get(index as usize)
            .map(|slot| slot.as_ref())
            .ok_or_else(|| {
                NetError::detached(format!(
                    "behaviour '{}' has no value at index {}",
                    self.name, index
                ))
            })
    }

    pub fn modifier_of(&self, index: ValueIndex) -> Option<ModifierType> {
        self.values.get(index as usize).map(|slot| slot.modifier())
    }

    /// Queues an index for the next flush. Returns true when this is the
    /// behaviour's first pending change, i.e. it must join the dirty set.
    pub fn mark_value_dirty(&mut self, index: ValueIndex) -> bool {
        let first = self.pending.is_empty();
        if !self.pending.contains(&index) {
            self.pending.push(index);
        }
        first
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn dirty_indices(&self) -> &[ValueIndex] {
        &self.pending
    }

    /// Drains the pending queue into one payload, None when nothing is dirty
    pub fn take_dirty_payload(&mut self) -> Result<Option<Vec<u8>>, NetError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let indices = std::mem::take(&mut self.pending);
        self.encode(&indices).map(Some)
    }

    /// Snapshot of every value, None when the behaviour holds no values
    pub fn full_payload(&self) -> Result<Option<Vec<u8>>, NetError> {
        if self.values.is_empty() {
            return Ok(None);
        }
        let indices: Vec<ValueIndex> = (0..self.values.len()).map(|i| i as ValueIndex).collect();
        self.encode(&indices).map(Some)
    }

    fn encode(&self, indices: &[ValueIndex]) -> Result<Vec<u8>, NetError> {
        let mut payload = Vec::new();
        wire::encode_into(&mut payload, &(indices.len() as u8))?;
        for index in indices {
            wire::encode_into(&mut payload, index)?;
            self.slot(*index)?.write_value(&mut payload)?;
        }
        Ok(payload)
    }

    /// Walks a payload without applying it and returns its indices. Every
    /// index must be in range, decode cleanly, and pass `allowed`.
    pub fn validate_payload(
        &self,
        payload: &[u8],
        mut allowed: impl FnMut(ModifierType) -> bool,
    ) -> Result<Vec<ValueIndex>, NetError> {
        let mut cursor = payload;
        let count: u8 = wire::decode_from(&mut cursor)?;
        let mut indices = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let index: ValueIndex = wire::decode_from(&mut cursor)?;
            let slot = self.values.get(index as usize).ok_or_else(|| {
                NetError::malformed(format!(
                    "value index {} out of range for behaviour '{}' ({} values)",
                    index,
                    self.name,
                    self.values.len()
                ))
            })?;
            slot.skip_value(&mut cursor)?;
            if !allowed(slot.modifier()) {
                return Err(NetError::PermissionDenied {
                    operation: "write this value remotely",
                });
            }
            indices.push(index);
        }
        if !cursor.is_empty() {
            return Err(NetError::malformed(format!(
                "{} trailing bytes after values payload",
                cursor.len()
            )));
        }
        Ok(indices)
    }

    /// Applies a payload produced by [`take_dirty_payload`](Self::take_dirty_payload)
    /// or [`full_payload`](Self::full_payload). The payload is validated in
    /// full first, so a malformed one changes nothing. Returns the indices
    /// whose value changed.
    pub fn apply_payload(&mut self, payload: &[u8]) -> Result<Vec<ValueIndex>, NetError> {
        self.validate_payload(payload, |_| true)?;

        let mut cursor = payload;
        let count: u8 = wire::decode_from(&mut cursor)?;
        let mut changed = Vec::new();
        for _ in 0..count {
            let index: ValueIndex = wire::decode_from(&mut cursor)?;
            if self.values[index as usize].read_value(&mut cursor)? {
                changed.push(index);
            }
        }
        Ok(changed)
    }
}

fn type_mismatch<T>(behaviour: &str, index: ValueIndex, stored: &str) -> NetError {
    NetError::detached(format!(
        "value {} of behaviour '{}' holds {}, not {}",
        index,
        behaviour,
        stored,
        std::any::type_name::<T>()
    ))
}

impl fmt::Debug for NetworkBehaviour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkBehaviour")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("values", &self.values.len())
            .field("pending", &self.pending)
            .finish()
    }
}
