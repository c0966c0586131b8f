//! Demo lobby protocol
//!
//! Players join with a nickname, which doubles as the session key: a player
//! who drops and rejoins under the same nickname gets their session back.
//! Each player controls an avatar object and can send chat messages to the
//! server through the avatar's behaviour. The server keeps per-player
//! scores and a scoreboard object placed by the "Lobby" scene.

use log::info;
use netsync_shared::{
    scene_id_for, ClientId, Color, ModifierType, NetError, NetworkBehaviour, NetworkConfig, NetworkHooks,
    NetworkId, NetworkManager, Packet, SceneDefinition, SceneObject, SessionEstablishingResponse, SessionRequest,
    SessionState, Transport, ValueRef, Vec3,
};
use serde::{Deserialize, Serialize};

pub const LOBBY_SCENE: &str = "Lobby";
pub const AVATAR_PREFAB: NetworkId = NetworkId::from_parts(0x4156_4154, 0x0000_0001);
pub const SCOREBOARD: NetworkId = NetworkId::from_parts(0x5343_4f52, 0x0000_0001);
pub const MAX_NICKNAME_LEN: usize = 16;

/// Behaviour ids on an avatar
pub const AVATAR_BEHAVIOUR: u8 = 0;
pub const STATS_BEHAVIOUR: u8 = 1;

pub fn avatar_nickname(id: NetworkId) -> ValueRef<String> {
    ValueRef::new(id, AVATAR_BEHAVIOUR, 0)
}

pub fn avatar_position(id: NetworkId) -> ValueRef<Vec3> {
    ValueRef::new(id, AVATAR_BEHAVIOUR, 1)
}

pub fn avatar_color(id: NetworkId) -> ValueRef<Color> {
    ValueRef::new(id, AVATAR_BEHAVIOUR, 2)
}

pub fn avatar_score(id: NetworkId) -> ValueRef<i32> {
    ValueRef::new(id, STATS_BEHAVIOUR, 0)
}

pub fn avatar_cheers(id: NetworkId) -> ValueRef<i32> {
    ValueRef::new(id, STATS_BEHAVIOUR, 1)
}

pub fn scoreboard_leader() -> ValueRef<String> {
    ValueRef::new(SCOREBOARD, 0, 0)
}

pub fn scoreboard_top_score() -> ValueRef<i32> {
    ValueRef::new(SCOREBOARD, 0, 1)
}

/// Handshake request carrying the nickname and the sender's packet layout
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LobbyJoinRequest {
    pub nickname: String,
    /// Registry fingerprint of the sender, compared against the server's
    pub protocol: u64,
}

impl Packet for LobbyJoinRequest {}

impl SessionRequest for LobbyJoinRequest {
    fn session_key(&self) -> Option<&str> {
        Some(self.nickname.as_str())
    }
}

/// Chat line sent to the server through an avatar
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
}

impl Packet for ChatMessage {}

#[derive(Debug, Clone, PartialEq)]
pub struct LobbySession {
    pub nickname: String,
    pub joins: u32,
    pub score: i32,
    /// Server-only bookkeeping, never sent to the player
    pub chat_lines: u32,
}

/// The part of a session the player sees
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LobbyProfile {
    pub nickname: String,
    pub joins: u32,
    pub score: i32,
}

impl SessionState for LobbySession {
    type Synced = LobbyProfile;

    fn synced(&self) -> LobbyProfile {
        LobbyProfile {
            nickname: self.nickname.clone(),
            joins: self.joins,
            score: self.score,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LobbyHooks {
    /// Nickname this peer joins with
    pub nickname: String,
    /// This peer's registry fingerprint, set by [`lobby_manager`]
    pub protocol: u64,
    /// Latest profile received from the server
    pub profile: Option<LobbyProfile>,
}

impl LobbyHooks {
    pub fn new(nickname: impl Into<String>) -> Self {
        Self {
            nickname: nickname.into(),
            ..Self::default()
        }
    }
}

impl NetworkHooks for LobbyHooks {
    type Request = LobbyJoinRequest;
    type Session = LobbySession;

    fn create_session_request(&mut self) -> LobbyJoinRequest {
        LobbyJoinRequest {
            nickname: self.nickname.clone(),
            protocol: self.protocol,
        }
    }

    fn on_session_request(&mut self, client_id: ClientId, request: &LobbyJoinRequest) -> SessionEstablishingResponse {
        if request.protocol != self.protocol {
            info!(
                "Client {} runs protocol {:016x}, expected {:016x}",
                client_id, request.protocol, self.protocol
            );
            return SessionEstablishingResponse::reject("Protocol mismatch");
        }
        let nickname = request.nickname.trim();
        if nickname.is_empty() {
            return SessionEstablishingResponse::reject("Nickname required");
        }
        if nickname.chars().count() > MAX_NICKNAME_LEN {
            return SessionEstablishingResponse::reject("Nickname too long");
        }
        SessionEstablishingResponse::Accept
    }

    fn create_session_data(&mut self, client_id: ClientId, request: &LobbyJoinRequest) -> LobbySession {
        info!("'{}' joined as client {}", request.nickname, client_id);
        LobbySession {
            nickname: request.nickname.clone(),
            joins: 1,
            score: 0,
            chat_lines: 0,
        }
    }

    fn restore_session_data(
        &mut self,
        client_id: ClientId,
        _request: &LobbyJoinRequest,
        mut previous: LobbySession,
    ) -> LobbySession {
        previous.joins += 1;
        info!(
            "'{}' rejoined as client {} (join #{})",
            previous.nickname, client_id, previous.joins
        );
        previous
    }

    fn on_local_session_data_changed(&mut self, data: &LobbyProfile) {
        self.profile = Some(data.clone());
    }

    fn load_scene(&mut self, scene_name: &str) -> Option<SceneDefinition> {
        if scene_name != LOBBY_SCENE {
            return None;
        }
        let scoreboard = scoreboard().ok()?;
        Some(SceneDefinition {
            scene_id: scene_id_for(scene_name),
            objects: vec![SceneObject::new(SCOREBOARD, vec![scoreboard])],
        })
    }
}

fn scoreboard() -> Result<NetworkBehaviour, NetError> {
    NetworkBehaviour::new("scoreboard")
        .with_value(String::new(), ModifierType::Server)?
        .with_value(0i32, ModifierType::Server)
}

/// avatar: nickname and position by the owner, color by the server;
/// stats: score by the server, cheers by anyone
pub fn avatar_behaviours() -> Result<Vec<NetworkBehaviour>, NetError> {
    let avatar = NetworkBehaviour::new("avatar")
        .with_value(String::new(), ModifierType::OwnerOnly)?
        .with_value(Vec3::ZERO, ModifierType::OwnerOnly)?
        .with_value(Color::WHITE, ModifierType::Server)?;
    let stats = NetworkBehaviour::new("stats")
        .with_value(0i32, ModifierType::Server)?
        .with_value(0i32, ModifierType::Everybody)?;
    Ok(vec![avatar, stats])
}

/// A manager speaking the lobby protocol; identical on every peer
pub fn lobby_manager(
    config: NetworkConfig,
    transport: Box<dyn Transport>,
    nickname: &str,
) -> Result<NetworkManager<LobbyHooks>, NetError> {
    let mut manager = NetworkManager::new(config, transport, LobbyHooks::new(nickname))?;
    manager.register_packet::<ChatMessage>()?;
    manager.register_prefab(AVATAR_PREFAB, "avatar", avatar_behaviours);
    manager.hooks_mut().protocol = manager.registry().fingerprint();
    Ok(manager)
}
