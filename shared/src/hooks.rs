use crate::packets::{NetworkSessionEstablishRequestPacket, SessionRequest};
use crate::scene::SceneDefinition;
use crate::session::{SessionEstablishingResponse, SessionState};
use crate::types::ClientId;

/// Application callbacks the manager consults
///
/// Only the request and session construction are required; every other
/// hook has a sensible default.
pub trait NetworkHooks: Send + 'static {
    type Request: SessionRequest;
    type Session: SessionState;

    /// Client side: what to send once the transport connects
    fn create_session_request(&mut self) -> Self::Request;

    /// Server side: decide whether the requesting client may join
    fn on_session_request(&mut self, _client_id: ClientId, _request: &Self::Request) -> SessionEstablishingResponse {
        SessionEstablishingResponse::Accept
    }

    fn create_session_data(&mut self, client_id: ClientId, request: &Self::Request) -> Self::Session;

    /// Called instead of `create_session_data` when the request key matches a parked session
    fn restore_session_data(
        &mut self,
        _client_id: ClientId,
        _request: &Self::Request,
        previous: Self::Session,
    ) -> Self::Session {
        previous
    }

    /// Client side: synced data before the server sends any
    fn create_empty_session_data(&mut self) -> <Self::Session as SessionState>::Synced {
        Default::default()
    }

    fn on_local_session_data_changed(&mut self, _data: &<Self::Session as SessionState>::Synced) {}

    /// Resolve a scene name into the objects it places; None refuses the load
    fn load_scene(&mut self, scene_name: &str) -> Option<SceneDefinition> {
        Some(SceneDefinition::empty(scene_name))
    }
}

/// Hooks for applications with no session state
#[derive(Debug, Default, Clone)]
pub struct DefaultHooks {
    pub session_key: Option<String>,
}

impl NetworkHooks for DefaultHooks {
    type Request = NetworkSessionEstablishRequestPacket;
    type Session = ();

    fn create_session_request(&mut self) -> Self::Request {
        NetworkSessionEstablishRequestPacket {
            session_key: self.session_key.clone(),
        }
    }

    fn create_session_data(&mut self, _client_id: ClientId, _request: &Self::Request) {}
}
