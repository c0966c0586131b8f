//! Per-client session records kept by the server
//!
//! A session outlives its connection when the client presented a key: on
//! disconnect the record is parked, and a later handshake carrying the same
//! key restores it instead of creating a fresh one.

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::id::NetworkId;
use crate::types::ClientId;

/// Application state the server keeps per client
pub trait SessionState: Send + 'static {
    /// The part replicated to the owning client
    type Synced: Serialize + DeserializeOwned + Clone + PartialEq + Default + Debug + Send + 'static;

    fn synced(&self) -> Self::Synced;
}

impl SessionState for () {
    type Synced = ();

    fn synced(&self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEstablishingResponse {
    Accept,
    Reject { reason: String },
}

impl SessionEstablishingResponse {
    pub fn reject(reason: impl Into<String>) -> Self {
        Self::Reject { reason: reason.into() }
    }
}

pub struct SessionData<S: SessionState> {
    client_id: ClientId,
    key: Option<String>,
    state: S,
    last_synced: Option<S::Synced>,
    /// Objects owned when the connection dropped
    owned: Vec<NetworkId>,
}

impl<S: SessionState> SessionData<S> {
    pub fn new(client_id: ClientId, key: Option<String>, state: S) -> Self {
        Self {
            client_id,
            key,
            state,
            last_synced: None,
            owned: Vec::new(),
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    pub fn owned_at_disconnect(&self) -> &[NetworkId] {
        &self.owned
    }

    pub fn into_parts(self) -> (S, Vec<NetworkId>) {
        (self.state, self.owned)
    }

    /// Some(synced) when it differs from what the client last received
    pub fn take_changed(&mut self) -> Option<S::Synced> {
        let synced = self.state.synced();
        if self.last_synced.as_ref() == Some(&synced) {
            return None;
        }
        self.last_synced = Some(synced.clone());
        Some(synced)
    }
}

impl<S: SessionState> Debug for SessionData<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionData")
            .field("client_id", &self.client_id)
            .field("key", &self.key)
            .field("last_synced", &self.last_synced)
            .field("owned", &self.owned)
            .finish()
    }
}

/// Live sessions by client id plus keyed sessions awaiting a reconnect
pub struct SessionTable<S: SessionState> {
    active: BTreeMap<ClientId, SessionData<S>>,
    detached: BTreeMap<String, SessionData<S>>,
}

impl<S: SessionState> Default for SessionTable<S> {
    fn default() -> Self {
        Self {
            active: BTreeMap::new(),
            detached: BTreeMap::new(),
        }
    }
}

impl<S: SessionState> SessionTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: SessionData<S>) {
        self.active.insert(session.client_id, session);
    }

    pub fn get(&self, client_id: ClientId) -> Option<&SessionData<S>> {
        self.active.get(&client_id)
    }

    pub fn get_mut(&mut self, client_id: ClientId) -> Option<&mut SessionData<S>> {
        self.active.get_mut(&client_id)
    }

    /// Parks a keyed session; unkeyed sessions are dropped. Returns true when parked.
    pub fn detach(&mut self, client_id: ClientId, owned: Vec<NetworkId>) -> bool {
        let Some(mut session) = self.active.remove(&client_id) else {
            return false;
        };
        let Some(key) = session.key.clone() else {
            return false;
        };
        session.owned = owned;
        session.last_synced = None;
        if self.detached.insert(key.clone(), session).is_some() {
            log::debug!("Replaced parked session '{}'", key);
        }
        true
    }

    pub fn take_detached(&mut self, key: &str) -> Option<SessionData<S>> {
        self.detached.remove(key)
    }

    /// A key already bound to a connected client
    pub fn key_in_use(&self, key: &str) -> bool {
        self.active.values().any(|s| s.key.as_deref() == Some(key))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SessionData<S>> {
        self.active.values_mut()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn detached_len(&self) -> usize {
        self.detached.len()
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.detached.clear();
    }
}
