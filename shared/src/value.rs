//! Typed, permission-gated replicated fields

use glam::{Quat, Vec2, Vec3, Vec4};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

use crate::error::NetError;
use crate::id::NetworkId;
use crate::transform::Color;
use crate::types::{BehaviourId, NetworkRole, Owner, ValueIndex};
use crate::wire;

/// Who may write a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModifierType {
    /// Whoever has authority over the owning identity
    OwnerOnly,
    /// The running server or host
    Server,
    Everybody,
}

/// Types a [`NetworkValue`] can hold. Each has a fixed-width encoding
/// (strings are length-prefixed).
pub trait NetValue: Serialize + DeserializeOwned + Clone + PartialEq + fmt::Debug + Send + 'static {}

impl NetValue for bool {}
impl NetValue for u8 {}
impl NetValue for i16 {}
impl NetValue for i32 {}
impl NetValue for i64 {}
impl NetValue for f32 {}
impl NetValue for f64 {}
impl NetValue for String {}
impl NetValue for Vec2 {}
impl NetValue for Vec3 {}
impl NetValue for Vec4 {}
impl NetValue for Quat {}
impl NetValue for Color {}
impl NetValue for NetworkId {}

/// Local role facts a write is checked against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteAccess {
    pub session_active: bool,
    pub is_server: bool,
    pub has_authority: bool,
}

impl WriteAccess {
    pub fn offline() -> Self {
        Self {
            session_active: false,
            is_server: false,
            has_authority: false,
        }
    }

    pub fn for_role(role: &NetworkRole, owner: Owner) -> Self {
        Self {
            session_active: role.is_active(),
            is_server: role.is_server(),
            has_authority: role.has_authority(owner),
        }
    }
}

/// Result of a local write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// New value equal to the stored one
    Unchanged,
    /// Applied without a network session, nothing to flush
    AppliedOffline,
    /// Applied and must be flushed to peers
    Dirty,
}

type Listener<T> = Box<dyn FnMut(&T, &T) + Send>;

/// Replicated cell attached to a behaviour slot
pub struct NetworkValue<T: NetValue> {
    value: T,
    modifier: ModifierType,
    index: Option<ValueIndex>,
    listeners: Vec<Listener<T>>,
}

impl<T: NetValue> NetworkValue<T> {
    pub fn new(value: T, modifier: ModifierType) -> Self {
        Self {
            value,
            modifier,
            index: None,
            listeners: Vec::new(),
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn modifier(&self) -> ModifierType {
        self.modifier
    }

    /// Slot inside the owning behaviour, None until attached
    pub fn index(&self) -> Option<ValueIndex> {
        self.index
    }

    pub fn is_attached(&self) -> bool {
        self.index.is_some()
    }

    /// Adds a callback fired with `(old, new)` on every accepted change
    pub fn subscribe(&mut self, listener: impl FnMut(&T, &T) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn check_permission(&self, access: &WriteAccess) -> bool {
        match self.modifier {
            ModifierType::OwnerOnly => access.has_authority,
            ModifierType::Server => access.is_server,
            ModifierType::Everybody => true,
        }
    }

    /// Local write
    ///
    /// Equal values are ignored. Otherwise the value must be attached, and
    /// while a session is active the local role must pass
    /// [`check_permission`](Self::check_permission). The stored value is left
    /// untouched on error.
    pub fn set(&mut self, value: T, access: &WriteAccess) -> Result<WriteOutcome, NetError> {
        if self.value == value {
            return Ok(WriteOutcome::Unchanged);
        }
        if !self.is_attached() {
            return Err(NetError::detached(format!(
                "{} value written before being added to a behaviour",
                std::any::type_name::<T>()
            )));
        }
        if !access.session_active {
            self.apply(value);
            return Ok(WriteOutcome::AppliedOffline);
        }
        if !self.check_permission(access) {
            return Err(NetError::PermissionDenied {
                operation: match self.modifier {
                    ModifierType::OwnerOnly => "write an owner-only value",
                    ModifierType::Server => "write a server value",
                    ModifierType::Everybody => "write a value",
                },
            });
        }
        self.apply(value);
        Ok(WriteOutcome::Dirty)
    }

    fn apply(&mut self, value: T) {
        let old = std::mem::replace(&mut self.value, value);
        for listener in self.listeners.iter_mut() {
            listener(&old, &self.value);
        }
    }

    pub fn serialize(&self, out: &mut Vec<u8>) -> Result<(), NetError> {
        wire::encode_into(out, &self.value)
    }

    /// Trusted incoming write: no permission check, no dirty marking.
    /// Returns whether the stored value changed.
    pub fn deserialize(&mut self, input: &mut &[u8]) -> Result<bool, NetError> {
        let value: T = wire::decode_from(input)?;
        if self.value == value {
            return Ok(false);
        }
        self.apply(value);
        Ok(true)
    }
}

impl<T: NetValue + Default> Default for NetworkValue<T> {
    fn default() -> Self {
        Self::new(T::default(), ModifierType::OwnerOnly)
    }
}

impl<T: NetValue> fmt::Debug for NetworkValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkValue")
            .field("value", &self.value)
            .field("modifier", &self.modifier)
            .field("index", &self.index)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Type-erased value slot stored by a behaviour
pub trait ValueSlot: Send {
    fn modifier(&self) -> ModifierType;
    fn value_type(&self) -> &'static str;
    fn attach(&mut self, index: ValueIndex);
    fn write_value(&self, out: &mut Vec<u8>) -> Result<(), NetError>;
    fn read_value(&mut self, input: &mut &[u8]) -> Result<bool, NetError>;
    /// Decodes and discards one value, used to validate a payload before applying it
    fn skip_value(&self, input: &mut &[u8]) -> Result<(), NetError>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: NetValue> ValueSlot for NetworkValue<T> {
    fn modifier(&self) -> ModifierType {
        self.modifier
    }

    fn value_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn attach(&mut self, index: ValueIndex) {
        self.index = Some(index);
    }

    fn write_value(&self, out: &mut Vec<u8>) -> Result<(), NetError> {
        self.serialize(out)
    }

    fn read_value(&mut self, input: &mut &[u8]) -> Result<bool, NetError> {
        self.deserialize(input)
    }

    fn skip_value(&self, input: &mut &[u8]) -> Result<(), NetError> {
        wire::decode_from::<T>(input).map(|_| ())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Typed address of a value slot: identity, behaviour, index
pub struct ValueRef<T> {
    pub identity: NetworkId,
    pub behaviour: BehaviourId,
    pub index: ValueIndex,
    _marker: PhantomData<fn() -> T>,
}

impl<T: NetValue> ValueRef<T> {
    pub fn new(identity: NetworkId, behaviour: BehaviourId, index: ValueIndex) -> Self {
        Self {
            identity,
            behaviour,
            index,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for ValueRef<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ValueRef<T> {}

impl<T> PartialEq for ValueRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
            && self.behaviour == other.behaviour
            && self.index == other.index
    }
}

impl<T> fmt::Debug for ValueRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ValueRef<{}>({}/{}/{})",
            std::any::type_name::<T>(),
            self.identity,
            self.behaviour,
            self.index
        )
    }
}
