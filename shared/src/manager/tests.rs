use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::*;
use crate::scene::{SceneDefinition, SceneObject};
use crate::session::SessionEstablishingResponse;
use crate::transport::LocalHub;
use crate::types::Owner;
use crate::value::{ModifierType, ValueRef, WriteOutcome};
use crate::wire;

const PREFAB: NetworkId = NetworkId::from_parts(1, 100);
const DOOR: NetworkId = NetworkId::from_parts(50, 1);
const LAMP: NetworkId = NetworkId::from_parts(50, 2);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Chat {
    text: String,
}

impl Packet for Chat {}

struct Points {
    points: u32,
}

impl SessionState for Points {
    type Synced = u32;

    fn synced(&self) -> u32 {
        self.points
    }
}

#[derive(Default)]
struct TestHooks {
    key: Option<String>,
    reject: Option<String>,
    local_points: Vec<u32>,
}

impl NetworkHooks for TestHooks {
    type Request = NetworkSessionEstablishRequestPacket;
    type Session = Points;

    fn create_session_request(&mut self) -> Self::Request {
        NetworkSessionEstablishRequestPacket {
            session_key: self.key.clone(),
        }
    }

    fn on_session_request(&mut self, _client_id: ClientId, _request: &Self::Request) -> SessionEstablishingResponse {
        match &self.reject {
            Some(reason) => SessionEstablishingResponse::reject(reason.clone()),
            None => SessionEstablishingResponse::Accept,
        }
    }

    fn create_session_data(&mut self, client_id: ClientId, _request: &Self::Request) -> Points {
        Points { points: 100 + client_id }
    }

    fn on_local_session_data_changed(&mut self, data: &u32) {
        self.local_points.push(*data);
    }

    fn load_scene(&mut self, scene_name: &str) -> Option<SceneDefinition> {
        if scene_name != "Arena" {
            return None;
        }
        Some(SceneDefinition {
            scene_id: 5,
            objects: vec![
                SceneObject::new(DOOR, vec![stats().unwrap()]),
                SceneObject::new(LAMP, vec![stats().unwrap()]),
            ],
        })
    }
}

type Manager = NetworkManager<TestHooks>;

/// health: server only, name: owner only, score: anyone
fn stats() -> Result<NetworkBehaviour, NetError> {
    NetworkBehaviour::new("stats")
        .with_value(10i32, ModifierType::Server)?
        .with_value(String::new(), ModifierType::OwnerOnly)?
        .with_value(0i32, ModifierType::Everybody)
}

fn health(id: NetworkId) -> ValueRef<i32> {
    ValueRef::new(id, 0, 0)
}

fn name(id: NetworkId) -> ValueRef<String> {
    ValueRef::new(id, 0, 1)
}

fn score(id: NetworkId) -> ValueRef<i32> {
    ValueRef::new(id, 0, 2)
}

fn manager(transport: Box<dyn Transport>, hooks: TestHooks, config: NetworkConfig) -> Manager {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut manager = NetworkManager::new(config, transport, hooks).unwrap();
    manager.register_packet::<Chat>().unwrap();
    manager.register_prefab(PREFAB, "crate", || Ok(vec![stats()?]));
    manager
}

fn server(hub: &LocalHub, config: NetworkConfig) -> Manager {
    let mut server = manager(Box::new(hub.server()), TestHooks::default(), config);
    server.start_server().unwrap();
    server
}

fn client(hub: &LocalHub, key: Option<&str>) -> Manager {
    let hooks = TestHooks {
        key: key.map(str::to_string),
        ..TestHooks::default()
    };
    let mut client = manager(Box::new(hub.client()), hooks, NetworkConfig::default());
    client.start_client().unwrap();
    client
}

fn pump(server: &mut Manager, clients: &mut [&mut Manager]) {
    for _ in 0..5 {
        server.tick();
        for client in clients.iter_mut() {
            client.tick();
        }
    }
}

fn connected(config: NetworkConfig) -> (LocalHub, Manager, Manager) {
    let hub = LocalHub::new();
    let mut server = server(&hub, config);
    let mut client = client(&hub, None);
    pump(&mut server, &mut [&mut client]);
    server.drain_events();
    client.drain_events();
    (hub, server, client)
}

fn spawn_on_server(server: &mut Manager) -> NetworkId {
    server.spawn(SpawnRequest::new(PREFAB)).unwrap().id
}

#[test]
fn test_builtin_packets_have_fixed_ids() {
    let hub = LocalHub::new();
    let server = server(&hub, NetworkConfig::default());
    let registry = server.registry();
    assert_eq!(registry.id_of::<NetworkClientIdPacket>(), Some(0));
    assert_eq!(registry.id_of::<NetworkSessionEstablishRequestPacket>(), Some(1));
    assert_eq!(registry.id_of::<NetworkObjectSpawnPacket>(), Some(4));
    assert_eq!(registry.id_of::<NetworkValuesPacket>(), Some(9));
    assert_eq!(registry.id_of::<Chat>(), Some(13));
    assert!(registry.is_locked());
}

#[test]
fn test_register_after_start_is_locked() {
    let hub = LocalHub::new();
    let mut server = server(&hub, NetworkConfig::default());

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Late;
    impl Packet for Late {}

    assert!(matches!(server.register_packet::<Late>(), Err(NetError::ProtocolLocked)));
    assert!(matches!(server.start_server(), Err(NetError::AlreadyRunning)));
}

#[test]
fn test_handshake_assigns_id_and_session_data() {
    let hub = LocalHub::new();
    let mut server = server(&hub, NetworkConfig::default());
    let mut client = client(&hub, None);
    assert_eq!(client.local_client_id(), None);

    pump(&mut server, &mut [&mut client]);

    assert_eq!(client.local_client_id(), Some(1));
    assert_eq!(client.local_session_data(), Some(&101));
    assert_eq!(client.hooks().local_points, vec![101]);
    assert_eq!(server.connected_clients(), vec![1]);

    let client_events = client.drain_events();
    assert!(client_events
        .iter()
        .any(|e| matches!(e, NetworkEvent::Connected { client_id: 1 })));
    assert!(server
        .drain_events()
        .iter()
        .any(|e| matches!(e, NetworkEvent::ClientConnected { client_id: 1 })));
}

#[test]
fn test_session_data_changes_are_pushed() {
    let (_hub, mut server, mut client) = connected(NetworkConfig::default());

    server.session_mut(1).unwrap().points = 7;
    pump(&mut server, &mut [&mut client]);
    assert_eq!(client.local_session_data(), Some(&7));

    // Unchanged data is not resent
    pump(&mut server, &mut [&mut client]);
    assert_eq!(client.hooks().local_points, vec![101, 7]);
}

#[test]
fn test_spawn_replicates_and_completes() {
    let (_hub, mut server, mut client) = connected(NetworkConfig::default());

    let handle = server.spawn(SpawnRequest::new(PREFAB)).unwrap();
    assert!(server.identity(handle.id).is_some());
    assert!(server
        .drain_events()
        .iter()
        .any(|e| matches!(e, NetworkEvent::OperationCompleted { event_id } if *event_id == handle.event_id)));

    pump(&mut server, &mut [&mut client]);
    let replica = client.identity(handle.id).unwrap();
    assert_eq!(replica.owner(), Owner::Server);
    assert_eq!(replica.prefab_id(), PREFAB);
    assert!(client
        .drain_events()
        .iter()
        .any(|e| matches!(e, NetworkEvent::Spawned { id, retroactive: false } if *id == handle.id)));
}

#[test]
fn test_client_spawn_needs_permission() {
    let (_hub, _server, mut client) = connected(NetworkConfig::default());
    assert!(matches!(
        client.spawn(SpawnRequest::new(PREFAB)),
        Err(NetError::PermissionDenied { .. })
    ));
    assert!(matches!(
        client.spawn(SpawnRequest::new(NetworkId::from_parts(9, 9))),
        Err(NetError::UnknownPrefab(_))
    ));
}

#[test]
fn test_client_spawn_request_completes_on_origin() {
    let config = NetworkConfig {
        allow_client_spawns: true,
        ..NetworkConfig::default()
    };
    let (_hub, mut server, mut client) = connected(config);

    let handle = client
        .spawn(SpawnRequest::new(PREFAB).owned_by(Owner::Client(1)))
        .unwrap();
    assert!(handle.id.is_empty());

    pump(&mut server, &mut [&mut client]);
    let events = client.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, NetworkEvent::OperationCompleted { event_id } if *event_id == handle.event_id)));
    let spawned = server.identities().ids_owned_by(Owner::Client(1));
    assert_eq!(spawned.len(), 1);
    assert!(client.identity(spawned[0]).unwrap().has_authority(&client.role()));
}

#[test]
fn test_client_cannot_spawn_for_another_client() {
    let config = NetworkConfig {
        allow_client_spawns: true,
        ..NetworkConfig::default()
    };
    let (_hub, mut server, mut client) = connected(config);

    client
        .spawn(SpawnRequest::new(PREFAB).owned_by(Owner::Client(42)))
        .unwrap();
    pump(&mut server, &mut [&mut client]);
    assert!(server.identities().is_empty());
}

#[test]
fn test_despawn_applied_twice_fires_once() {
    let (_hub, mut server, mut client) = connected(NetworkConfig::default());
    let id = spawn_on_server(&mut server);
    pump(&mut server, &mut [&mut client]);
    client.drain_events();

    let frame = client
        .registry
        .encode(&NetworkObjectDespawnPacket { id, event_id: NO_EVENT })
        .unwrap();
    client.dispatch(Origin::Server, &frame);
    client.dispatch(Origin::Server, &frame);

    let despawned = client
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, NetworkEvent::Despawned { .. }))
        .count();
    assert_eq!(despawned, 1);
    assert!(client.identity(id).is_none());
}

#[test]
fn test_client_cannot_despawn_server_object() {
    let (_hub, mut server, mut client) = connected(NetworkConfig::default());
    let id = spawn_on_server(&mut server);
    pump(&mut server, &mut [&mut client]);

    assert!(matches!(client.despawn(id), Err(NetError::PermissionDenied { .. })));

    // Forged request straight to the server
    client
        .send_packet_to_server(&NetworkObjectDespawnPacket { id, event_id: NO_EVENT }, Channel::Reliable)
        .unwrap();
    pump(&mut server, &mut [&mut client]);
    assert!(server.identity(id).is_some());
}

#[test]
fn test_owner_and_active_changes_replicate() {
    let (_hub, mut server, mut client) = connected(NetworkConfig::default());
    let id = spawn_on_server(&mut server);

    server.set_owner(id, Owner::Client(1)).unwrap();
    pump(&mut server, &mut [&mut client]);
    assert!(client.identity(id).unwrap().has_authority(&client.role()));
    assert!(!server.identity(id).unwrap().has_authority(&server.role()));

    // The owner may now toggle it
    let event_id = client.set_active(id, false).unwrap();
    pump(&mut server, &mut [&mut client]);
    assert!(!server.identity(id).unwrap().is_active());
    assert!(!client.identity(id).unwrap().is_active());
    assert!(client
        .drain_events()
        .iter()
        .any(|e| matches!(e, NetworkEvent::OperationCompleted { event_id: done } if *done == event_id)));
}

#[test]
fn test_dirty_values_coalesce_into_one_packet() {
    let (_hub, mut server, mut client) = connected(NetworkConfig::default());
    let id = spawn_on_server(&mut server);
    pump(&mut server, &mut [&mut client]);

    assert_eq!(server.set_value(health(id), 40).unwrap(), WriteOutcome::Dirty);
    assert_eq!(server.set_value(health(id), 35).unwrap(), WriteOutcome::Dirty);
    assert_eq!(server.set_value(name(id), "box".to_string()).unwrap(), WriteOutcome::Dirty);
    assert_eq!(server.set_value(score(id), 3).unwrap(), WriteOutcome::Dirty);

    let before = server.client_info(1).unwrap().sent;
    server.tick();
    assert_eq!(server.client_info(1).unwrap().sent - before, 1);

    pump(&mut server, &mut [&mut client]);
    assert_eq!(*client.value(health(id)).unwrap(), 35);
    assert_eq!(client.value(name(id)).unwrap(), "box");
    assert_eq!(*client.value(score(id)).unwrap(), 3);

    // Nothing left to flush
    let before = server.client_info(1).unwrap().sent;
    server.tick();
    assert_eq!(server.client_info(1).unwrap().sent, before);
}

#[test]
fn test_equal_write_is_noop() {
    let (_hub, mut server, _client) = connected(NetworkConfig::default());
    let id = spawn_on_server(&mut server);
    server.drain_events();

    assert_eq!(server.set_value(health(id), 10).unwrap(), WriteOutcome::Unchanged);
    assert!(server.drain_events().is_empty());
}

#[test]
fn test_client_writes_follow_modifiers() {
    let (_hub, mut server, mut client) = connected(NetworkConfig::default());
    let id = spawn_on_server(&mut server);
    pump(&mut server, &mut [&mut client]);

    assert!(matches!(
        client.set_value(health(id), 1),
        Err(NetError::PermissionDenied { .. })
    ));
    assert!(matches!(
        client.set_value(name(id), "mine".to_string()),
        Err(NetError::PermissionDenied { .. })
    ));
    assert_eq!(client.set_value(score(id), 9).unwrap(), WriteOutcome::Dirty);

    pump(&mut server, &mut [&mut client]);
    assert_eq!(*server.value(score(id)).unwrap(), 9);
    assert_eq!(*server.value(health(id)).unwrap(), 10);
}

fn forged_health_write(client: &mut Manager, id: NetworkId, value: i32) {
    let mut payload = Vec::new();
    wire::encode_into(&mut payload, &1u8).unwrap();
    wire::encode_into(&mut payload, &0u8).unwrap();
    wire::encode_into(&mut payload, &value).unwrap();
    client
        .send_packet_to_server(
            &NetworkValuesPacket {
                id,
                behaviour_id: 0,
                payload,
            },
            Channel::Reliable,
        )
        .unwrap();
}

#[test]
fn test_server_rejects_forged_value_write() {
    let (_hub, mut server, mut client) = connected(NetworkConfig::default());
    let id = spawn_on_server(&mut server);
    pump(&mut server, &mut [&mut client]);

    forged_health_write(&mut client, id, 999);
    pump(&mut server, &mut [&mut client]);
    assert_eq!(*server.value(health(id)).unwrap(), 10);
}

#[test]
fn test_write_racing_ownership_loss_is_corrected() {
    let config = NetworkConfig {
        allow_client_spawns: true,
        ..NetworkConfig::default()
    };
    let (_hub, mut server, mut client) = connected(config);
    client
        .spawn(SpawnRequest::new(PREFAB).owned_by(Owner::Client(1)))
        .unwrap();
    pump(&mut server, &mut [&mut client]);
    let id = server.identities().ids_owned_by(Owner::Client(1))[0];

    // Hand the object back, then write before the server confirms
    client.set_owner(id, Owner::Server).unwrap();
    assert_eq!(client.set_value(name(id), "mine".to_string()).unwrap(), WriteOutcome::Dirty);
    assert_eq!(*client.value(name(id)).unwrap(), "mine");
    pump(&mut server, &mut [&mut client]);

    assert_eq!(server.identity(id).unwrap().owner(), Owner::Server);
    assert_eq!(*server.value(name(id)).unwrap(), "");
    assert_eq!(client.identity(id).unwrap().owner(), Owner::Server);
    assert_eq!(*client.value(name(id)).unwrap(), "");
}

#[test]
fn test_unvalidated_server_accepts_client_write() {
    let config = NetworkConfig {
        validate_client_writes: false,
        ..NetworkConfig::default()
    };
    let (_hub, mut server, mut client) = connected(config);
    let id = spawn_on_server(&mut server);
    pump(&mut server, &mut [&mut client]);

    forged_health_write(&mut client, id, 999);
    pump(&mut server, &mut [&mut client]);
    assert_eq!(*server.value(health(id)).unwrap(), 999);
}

#[test]
fn test_malformed_values_change_nothing() {
    let (_hub, mut server, mut client) = connected(NetworkConfig::default());
    let id = spawn_on_server(&mut server);
    pump(&mut server, &mut [&mut client]);

    // Valid score write followed by an out of range index
    let mut payload = Vec::new();
    wire::encode_into(&mut payload, &2u8).unwrap();
    wire::encode_into(&mut payload, &2u8).unwrap();
    wire::encode_into(&mut payload, &77i32).unwrap();
    wire::encode_into(&mut payload, &9u8).unwrap();
    wire::encode_into(&mut payload, &1i32).unwrap();
    client
        .send_packet_to_server(&NetworkValuesPacket { id, behaviour_id: 0, payload }, Channel::Reliable)
        .unwrap();
    pump(&mut server, &mut [&mut client]);
    assert_eq!(*server.value(score(id)).unwrap(), 0);
}

#[test]
fn test_late_joiner_receives_current_state() {
    let hub = LocalHub::new();
    let mut server = server(&hub, NetworkConfig::default());
    server.load_scene("Arena").unwrap();
    let id = spawn_on_server(&mut server);
    server.set_value(health(id), 55).unwrap();
    server.set_value(score(LAMP), 4).unwrap();
    server.set_owner(LAMP, Owner::Client(1)).unwrap();
    server.despawn(DOOR).unwrap();
    server.tick();

    let mut late = client(&hub, None);
    pump(&mut server, &mut [&mut late]);

    assert!(late.is_scene_loaded("Arena"));
    assert!(late.identity(DOOR).is_none());
    assert_eq!(late.identity(LAMP).unwrap().owner(), Owner::Client(1));
    assert_eq!(*late.value(score(LAMP)).unwrap(), 4);
    assert_eq!(*late.value(health(id)).unwrap(), 55);

    let events = late.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, NetworkEvent::Spawned { id: spawned, retroactive: true } if *spawned == id)));
    assert!(!events
        .iter()
        .any(|e| matches!(e, NetworkEvent::Spawned { id, .. } if *id == DOOR)));
}

#[test]
fn test_late_joiner_receives_object_moved_out_of_unloaded_scene() {
    let hub = LocalHub::new();
    let mut server = server(&hub, NetworkConfig::default());
    server.load_scene("Arena").unwrap();
    server.set_value(health(DOOR), 42).unwrap();
    server.move_to_scene(DOOR, 0).unwrap();
    server.tick();
    server.unload_scene("Arena").unwrap();
    server.tick();
    assert!(server.identity(LAMP).is_none());
    assert_eq!(server.identity(DOOR).unwrap().origin_scene(), Some("Arena"));

    let mut late = client(&hub, None);
    pump(&mut server, &mut [&mut late]);

    assert!(!late.is_scene_loaded("Arena"));
    assert!(late.identity(LAMP).is_none());
    let door = late.identity(DOOR).unwrap();
    assert_eq!(door.scene_id(), 0);
    assert!(door.is_scene_object());
    assert_eq!(*late.value(health(DOOR)).unwrap(), 42);
    assert!(late
        .drain_events()
        .iter()
        .any(|e| matches!(e, NetworkEvent::Spawned { id, retroactive: true } if *id == DOOR)));
}

#[test]
fn test_unload_scene_despawns_members() {
    let (_hub, mut server, mut client) = connected(NetworkConfig::default());
    server.load_scene("Arena").unwrap();
    let outside = spawn_on_server(&mut server);
    pump(&mut server, &mut [&mut client]);
    assert!(client.identity(LAMP).is_some());

    let event_id = server.unload_scene("Arena").unwrap();
    pump(&mut server, &mut [&mut client]);

    assert!(client.identity(LAMP).is_none());
    assert!(client.identity(DOOR).is_none());
    assert!(client.identity(outside).is_some());
    assert!(!client.is_scene_loaded("Arena"));
    assert!(server
        .drain_events()
        .iter()
        .any(|e| matches!(e, NetworkEvent::OperationCompleted { event_id: done } if *done == event_id)));
}

#[test]
fn test_clients_cannot_load_scenes() {
    let (_hub, _server, mut client) = connected(NetworkConfig::default());
    assert!(matches!(client.load_scene("Arena"), Err(NetError::PermissionDenied { .. })));
}

#[test]
fn test_unresolvable_scene_is_not_broadcast() {
    let (_hub, mut server, mut client) = connected(NetworkConfig::default());
    server.drain_events();
    client.drain_events();

    assert!(matches!(server.load_scene("Nowhere"), Err(NetError::UnknownScene(name)) if name == "Nowhere"));
    pump(&mut server, &mut [&mut client]);

    assert!(!server.is_scene_loaded("Nowhere"));
    assert!(!client.is_scene_loaded("Nowhere"));
    assert!(!server
        .drain_events()
        .iter()
        .any(|e| matches!(e, NetworkEvent::SceneLoaded { .. })));
    assert!(!client
        .drain_events()
        .iter()
        .any(|e| matches!(e, NetworkEvent::SceneLoaded { .. })));
}

#[test]
fn test_server_loads_scene_once_before_broadcast() {
    let (_hub, mut server, mut client) = connected(NetworkConfig::default());
    server.drain_events();
    server.load_scene("Arena").unwrap();
    assert!(server.identity(DOOR).is_some());
    pump(&mut server, &mut [&mut client]);

    let loaded = server
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, NetworkEvent::SceneLoaded { .. }))
        .count();
    assert_eq!(loaded, 1);
    assert!(client.is_scene_loaded("Arena"));
}

#[test]
fn test_offline_scene_and_writes_apply_locally() {
    let hub = LocalHub::new();
    let mut offline = manager(Box::new(hub.client()), TestHooks::default(), NetworkConfig::default());
    offline.load_scene("Arena").unwrap();
    assert_eq!(offline.set_value(health(LAMP), 3).unwrap(), WriteOutcome::AppliedOffline);
    assert_eq!(*offline.value(health(LAMP)).unwrap(), 3);
    assert!(offline.dirty.is_empty());
}

#[test]
fn test_owner_disconnect_returns_objects_to_server() {
    let config = NetworkConfig {
        allow_client_spawns: true,
        ..NetworkConfig::default()
    };
    let (_hub, mut server, mut client) = connected(config);
    client
        .spawn(SpawnRequest::new(PREFAB).owned_by(Owner::Client(1)))
        .unwrap();
    pump(&mut server, &mut [&mut client]);
    let id = server.identities().ids_owned_by(Owner::Client(1))[0];

    client.stop();
    pump(&mut server, &mut []);
    assert_eq!(server.identity(id).unwrap().owner(), Owner::Server);
    assert!(server
        .drain_events()
        .iter()
        .any(|e| matches!(e, NetworkEvent::ClientDisconnected { client_id: 1 })));
}

#[test]
fn test_owner_disconnect_can_despawn() {
    let config = NetworkConfig {
        allow_client_spawns: true,
        despawn_owned_on_disconnect: true,
        ..NetworkConfig::default()
    };
    let (_hub, mut server, mut client) = connected(config);
    client
        .spawn(SpawnRequest::new(PREFAB).owned_by(Owner::Client(1)))
        .unwrap();
    pump(&mut server, &mut [&mut client]);
    assert_eq!(server.identities().len(), 1);

    client.stop();
    pump(&mut server, &mut []);
    assert!(server.identities().is_empty());
}

#[test]
fn test_reconnect_with_key_restores_session_and_objects() {
    let config = NetworkConfig {
        allow_client_spawns: true,
        ..NetworkConfig::default()
    };
    let hub = LocalHub::new();
    let mut server = server(&hub, config);
    let mut first = client(&hub, Some("abc"));
    pump(&mut server, &mut [&mut first]);
    first
        .spawn(SpawnRequest::new(PREFAB).owned_by(Owner::Client(1)))
        .unwrap();
    pump(&mut server, &mut [&mut first]);
    let id = server.identities().ids_owned_by(Owner::Client(1))[0];
    server.session_mut(1).unwrap().points = 7;
    pump(&mut server, &mut [&mut first]);

    first.stop();
    pump(&mut server, &mut []);
    assert!(server.session(1).is_none());
    server.drain_events();

    let mut second = client(&hub, Some("abc"));
    pump(&mut server, &mut [&mut second]);

    assert_eq!(second.local_client_id(), Some(2));
    assert_eq!(server.session(2).unwrap().points, 7);
    assert_eq!(second.local_session_data(), Some(&7));
    assert_eq!(server.identity(id).unwrap().owner(), Owner::Client(2));
    assert!(second.identity(id).unwrap().has_authority(&second.role()));
    assert!(server
        .drain_events()
        .iter()
        .any(|e| matches!(e, NetworkEvent::SessionRestored { client_id: 2, session_key } if session_key == "abc")));
}

#[test]
fn test_key_in_use_is_rejected() {
    let hub = LocalHub::new();
    let mut server = server(&hub, NetworkConfig::default());
    let mut first = client(&hub, Some("abc"));
    let mut second = client(&hub, Some("abc"));
    pump(&mut server, &mut [&mut first, &mut second]);

    assert_eq!(first.local_client_id(), Some(1));
    assert!(!second.is_active());
}

#[test]
fn test_rejected_session_disconnects_with_reason() {
    let hub = LocalHub::new();
    let hooks = TestHooks {
        reject: Some("Banned".to_string()),
        ..TestHooks::default()
    };
    let mut server = manager(Box::new(hub.server()), hooks, NetworkConfig::default());
    server.start_server().unwrap();
    let mut client = client(&hub, None);
    pump(&mut server, &mut [&mut client]);

    assert!(!client.is_active());
    assert!(client
        .drain_events()
        .iter()
        .any(|e| matches!(e, NetworkEvent::Disconnected { reason } if reason == "Banned")));
    assert!(server
        .drain_events()
        .iter()
        .any(|e| matches!(e, NetworkEvent::SessionRejected { client_id: 1, .. })));
    assert!(server.connected_clients().is_empty());
}

#[test]
fn test_server_full() {
    let hub = LocalHub::new();
    let config = NetworkConfig {
        max_clients: 1,
        ..NetworkConfig::default()
    };
    let mut server = server(&hub, config);
    let mut first = client(&hub, None);
    let mut second = client(&hub, None);
    pump(&mut server, &mut [&mut first, &mut second]);

    assert_eq!(first.local_client_id(), Some(1));
    assert!(second
        .drain_events()
        .iter()
        .any(|e| matches!(e, NetworkEvent::Disconnected { reason } if reason == "Server full")));
}

#[test]
fn test_handshake_timeout_drops_silent_client() {
    let hub = LocalHub::new();
    let config = NetworkConfig {
        handshake_timeout: Duration::from_millis(1),
        ..NetworkConfig::default()
    };
    let mut server = server(&hub, config);
    let mut silent = hub.client();
    silent.start_client().unwrap();

    server.tick();
    std::thread::sleep(Duration::from_millis(5));
    server.tick();

    let events = silent.poll_events();
    assert!(events.iter().any(|e| matches!(
        e,
        crate::transport::TransportEvent::Disconnected { reason } if reason == "Handshake timed out"
    )));
}

#[test]
fn test_behaviour_packets_both_directions() {
    let (_hub, mut server, mut client) = connected(NetworkConfig::default());
    let id = spawn_on_server(&mut server);
    pump(&mut server, &mut [&mut client]);
    server.drain_events();

    client
        .send_to_server(id, 0, &Chat { text: "hi".to_string() }, Channel::Reliable)
        .unwrap();
    pump(&mut server, &mut [&mut client]);
    let received = server.drain_events().into_iter().find_map(|e| match e {
        NetworkEvent::ServerPacket { client_id, packet, .. } => Some((client_id, packet)),
        _ => None,
    });
    let (from, packet) = received.unwrap();
    assert_eq!(from, 1);
    assert_eq!(packet.downcast_ref::<Chat>().unwrap().text, "hi");

    server
        .send_to_clients(id, 0, &Chat { text: "yo".to_string() }, Channel::Reliable, None)
        .unwrap();
    pump(&mut server, &mut [&mut client]);
    assert!(client.drain_events().iter().any(|e| matches!(
        e,
        NetworkEvent::ClientPacket { packet, .. } if packet.downcast_ref::<Chat>().map(|c| c.text.as_str()) == Some("yo")
    )));
}

#[test]
fn test_behaviour_packet_needs_registered_type() {
    let (_hub, mut server, _client) = connected(NetworkConfig::default());
    let id = spawn_on_server(&mut server);

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Unknown;
    impl Packet for Unknown {}

    assert!(matches!(
        server.send_to_clients(id, 0, &Unknown, Channel::Reliable, None),
        Err(NetError::UnregisteredPacket { .. })
    ));
    assert!(server.send_to_clients(id, 7, &Chat::default(), Channel::Reliable, None).is_err());
}

#[test]
fn test_host_local_client() {
    let hub = LocalHub::new();
    let mut host = manager(Box::new(hub.server()), TestHooks::default(), NetworkConfig::default());
    host.start_host().unwrap();

    assert_eq!(host.local_client_id(), Some(HOST_CLIENT_ID));
    assert_eq!(host.local_session_data(), Some(&100));
    assert!(host
        .drain_events()
        .iter()
        .any(|e| matches!(e, NetworkEvent::Connected { client_id: 0 })));

    let own = host
        .spawn(SpawnRequest::new(PREFAB).owned_by(Owner::Client(HOST_CLIENT_ID)))
        .unwrap()
        .id;
    let remote = host
        .spawn(SpawnRequest::new(PREFAB).owned_by(Owner::Client(3)))
        .unwrap()
        .id;
    let shared = spawn_on_server(&mut host);
    let role = host.role();
    assert!(host.identity(own).unwrap().has_authority(&role));
    assert!(!host.identity(remote).unwrap().has_authority(&role));
    assert!(host.identity(shared).unwrap().has_authority(&role));

    assert_eq!(host.set_value(name(own), "host".to_string()).unwrap(), WriteOutcome::Dirty);

    host.send_to_server(own, 0, &Chat { text: "self".to_string() }, Channel::Reliable)
        .unwrap();
    assert!(host.drain_events().iter().any(|e| matches!(
        e,
        NetworkEvent::ServerPacket { client_id: 0, .. }
    )));
}

#[test]
fn test_host_with_remote_client() {
    let hub = LocalHub::new();
    let mut host = manager(Box::new(hub.server()), TestHooks::default(), NetworkConfig::default());
    host.start_host().unwrap();
    let id = spawn_on_server(&mut host);
    let mut remote = client(&hub, None);
    pump(&mut host, &mut [&mut remote]);

    assert_eq!(remote.local_client_id(), Some(1));
    assert!(remote.identity(id).is_some());
}

#[test]
fn test_disconnect_resets_client_state() {
    let (_hub, mut server, mut client) = connected(NetworkConfig::default());
    spawn_on_server(&mut server);
    pump(&mut server, &mut [&mut client]);
    assert_eq!(client.identities().len(), 1);

    server.kick(1, "Bye").unwrap();
    pump(&mut server, &mut [&mut client]);
    assert!(!client.is_active());
    assert!(client.identities().is_empty());
    assert_eq!(client.local_session_data(), None);
}
