use std::time::Duration;

use clap::Parser;
use log::{debug, error, info, warn};
use netsync_client::{ClientRuntime, ServerBrowser, ServerDirectory, ServerListing};
use netsync_server::lobby::{
    avatar_cheers, avatar_color, avatar_nickname, avatar_position, avatar_score, scoreboard_leader,
    scoreboard_top_score, AVATAR_BEHAVIOUR, AVATAR_PREFAB, LOBBY_SCENE,
};
use netsync_server::{lobby_manager, ChatMessage, LobbyHooks, NetworkRuntime, RuntimeHandle};
use netsync_shared::{
    Channel, ClientId, Color, LinkConditioner, LocalHub, NetError, NetworkConfig, NetworkEvent, NetworkId,
    NetworkManager, Owner, SpawnRequest, Vec3, HOST_CLIENT_ID,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SERVER_ADDRESS: &str = "local";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs an in-process lobby host and a set of simulated players that join
/// late, move their avatars, chat, drop out and come back.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Tick rate (updates per second)
        #[clap(short, long, default_value = "30")]
        tick_rate: u32,
        /// Number of simulated players joining after the host
        #[clap(short, long, default_value = "3")]
        clients: usize,
        /// Ticks each player stays connected per visit
        #[clap(long, default_value = "60")]
        ticks: u64,
        /// Probability of dropping an unreliable frame (0.0 - 1.0)
        #[clap(short, long, default_value = "0.0")]
        loss: f32,
        /// Maximum concurrent clients
        #[clap(short, long, default_value = "16")]
        max_clients: usize,
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = NetworkConfig {
        tick_rate: args.tick_rate,
        max_clients: args.max_clients,
        allow_client_spawns: true,
        ..NetworkConfig::default()
    };
    let hub = LocalHub::with_conditioner(LinkConditioner::new(args.loss));
    let directory = ServerDirectory::new();

    let mut host = lobby_manager(config.clone(), Box::new(hub.server()), "host")?;
    host.start_host()?;
    host.load_scene(LOBBY_SCENE)?;
    let avatar = host
        .spawn(SpawnRequest::new(AVATAR_PREFAB).owned_by(Owner::Client(HOST_CLIENT_ID)))?
        .id;
    host.set_value(avatar_nickname(avatar), "host".to_string())?;
    host.set_value(avatar_color(avatar), Color::rgba(1.0, 0.8, 0.0, 1.0))?;
    info!("Host running lobby with {} objects", host.identities().len());

    announce(&directory, &host);

    let (runtime, handle, mut events) = NetworkRuntime::new(host);
    let server_task = tokio::spawn(runtime.run());

    // Host reactions to what the players do
    let event_task = {
        let handle = handle.clone();
        let directory = directory.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                on_host_event(&handle, &directory, event);
            }
        })
    };

    tokio::select! {
        _ = run_players(&hub, &directory, &config, args.clients, args.ticks) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    handle.shutdown();
    let host = server_task.await?;
    if let Err(e) = event_task.await {
        error!("Event task panicked: {}", e);
    }

    let leader = host.value(scoreboard_leader()).cloned().unwrap_or_default();
    let top_score = host.value(scoreboard_top_score()).copied().unwrap_or_default();
    info!(
        "Lobby closed with {} objects; leader '{}' with {} points",
        host.identities().len(),
        leader,
        top_score
    );

    Ok(())
}

/// Players join one after another, each a few ticks later than the last
async fn run_players(hub: &LocalHub, directory: &ServerDirectory, config: &NetworkConfig, count: usize, ticks: u64) {
    let mut players = Vec::new();
    for index in 0..count {
        tokio::time::sleep(config.tick_duration() * 10).await;
        let nickname = format!("player{}", index + 1);
        players.push(tokio::spawn(simulate_player(
            hub.clone(),
            directory.clone(),
            config.clone(),
            nickname,
            ticks,
        )));
    }

    for player in players {
        match player.await {
            Ok(Ok(report)) => info!(
                "{}: client {} then {}, {} joins, score {}",
                report.nickname, report.first_id, report.second_id, report.joins, report.score
            ),
            Ok(Err(e)) => error!("Player failed: {}", e),
            Err(e) => error!("Player task panicked: {}", e),
        }
    }
}

struct PlayerReport {
    nickname: String,
    first_id: ClientId,
    second_id: ClientId,
    joins: u32,
    score: i32,
}

async fn simulate_player(
    hub: LocalHub,
    directory: ServerDirectory,
    config: NetworkConfig,
    nickname: String,
    ticks: u64,
) -> Result<PlayerReport, NetError> {
    let mut rng = StdRng::from_entropy();

    let mut browser = ServerBrowser::new();
    browser.search(&directory);
    let listing = browser
        .collect(Duration::from_millis(50))
        .await
        .iter()
        .find(|listing| !listing.is_full())
        .cloned()
        .ok_or(NetError::NotRunning)?;
    info!("{} found '{}' ({} players)", nickname, listing.name, listing.players);

    let manager = lobby_manager(config, Box::new(hub.client()), &nickname)?;
    let mut client = ClientRuntime::new(manager);

    // First visit: spawn an avatar and play
    let first_id = client.connect(CONNECT_TIMEOUT).await?;
    let spawn = client
        .manager_mut()
        .spawn(SpawnRequest::new(AVATAR_PREFAB).owned_by(Owner::Client(first_id)))?;
    let avatar = wait_for_avatar(&mut client, first_id, ticks).await?;
    debug!("{} spawned avatar {} (event {})", nickname, avatar, spawn.event_id);
    client
        .manager_mut()
        .set_value(avatar_nickname(avatar), nickname.clone())?;
    play(&mut client, avatar, &nickname, ticks, &mut rng).await?;

    // Drop out and come back under the same nickname
    client.disconnect();
    tokio::time::sleep(client.manager().config().tick_duration() * 5).await;
    let second_id = client.reconnect(CONNECT_TIMEOUT).await?;
    let avatar = wait_for_avatar(&mut client, second_id, ticks).await?;
    info!("{} is back as client {} with avatar {}", nickname, second_id, avatar);
    play(&mut client, avatar, &nickname, ticks, &mut rng).await?;

    let profile = client.manager().hooks().profile.clone().unwrap_or_default();
    client.disconnect();

    Ok(PlayerReport {
        nickname,
        first_id,
        second_id,
        joins: profile.joins,
        score: profile.score,
    })
}

/// Ticks until an avatar owned by `client_id` exists locally
async fn wait_for_avatar(
    client: &mut ClientRuntime<LobbyHooks>,
    client_id: ClientId,
    max_ticks: u64,
) -> Result<NetworkId, NetError> {
    for _ in 0..max_ticks.max(1) {
        if let Some(id) = owned_avatar(client.manager(), client_id) {
            return Ok(id);
        }
        client.run_ticks(1).await;
        for event in client.drain_events() {
            if let NetworkEvent::Disconnected { reason } = event {
                return Err(NetError::SessionRejected { reason });
            }
        }
    }
    owned_avatar(client.manager(), client_id).ok_or(NetError::UnknownPrefab(AVATAR_PREFAB))
}

fn owned_avatar(manager: &NetworkManager<LobbyHooks>, client_id: ClientId) -> Option<NetworkId> {
    manager
        .identities()
        .iter()
        .find(|identity| identity.prefab_id() == AVATAR_PREFAB && identity.owner() == Owner::Client(client_id))
        .map(|identity| identity.id())
}

/// Wanders around, chats now and then, cheers for someone else
async fn play(
    client: &mut ClientRuntime<LobbyHooks>,
    avatar: NetworkId,
    nickname: &str,
    ticks: u64,
    rng: &mut StdRng,
) -> Result<(), NetError> {
    let mut position = Vec3::ZERO;
    for tick in 0..ticks {
        position += Vec3::new(rng.gen_range(-1.0..1.0), 0.0, rng.gen_range(-1.0..1.0));
        client.manager_mut().set_value(avatar_position(avatar), position)?;

        if tick % 20 == 0 {
            let chat = ChatMessage {
                text: format!("{} checking in at tick {}", nickname, tick),
            };
            client
                .manager_mut()
                .send_to_server(avatar, AVATAR_BEHAVIOUR, &chat, Channel::Reliable)?;
        }

        if tick == ticks / 2 {
            cheer_someone(client, avatar)?;
        }

        client.run_ticks(1).await;
        for event in client.drain_events() {
            match event {
                NetworkEvent::Disconnected { reason } => return Err(NetError::SessionRejected { reason }),
                NetworkEvent::SessionDataChanged => {
                    if let Some(profile) = &client.manager().hooks().profile {
                        debug!("{} now has {} points", nickname, profile.score);
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn cheer_someone(client: &mut ClientRuntime<LobbyHooks>, own: NetworkId) -> Result<(), NetError> {
    let manager = client.manager_mut();
    let other = manager
        .identities()
        .iter()
        .find(|identity| identity.prefab_id() == AVATAR_PREFAB && identity.id() != own)
        .map(|identity| identity.id());
    if let Some(other) = other {
        let cheers = manager.value(avatar_cheers(other)).copied()?;
        manager.set_value(avatar_cheers(other), cheers + 1)?;
    }
    Ok(())
}

fn on_host_event(handle: &RuntimeHandle<LobbyHooks>, directory: &ServerDirectory, event: NetworkEvent) {
    let result = match event {
        NetworkEvent::ClientConnected { client_id } | NetworkEvent::ClientDisconnected { client_id } => {
            debug!("Client {} came or went", client_id);
            let directory = directory.clone();
            handle.apply(move |manager| announce(&directory, manager))
        }
        NetworkEvent::SessionRestored { client_id, session_key } => {
            info!("'{}' restored as client {}", session_key, client_id);
            Ok(())
        }
        NetworkEvent::ServerPacket {
            id, client_id, packet, ..
        } => match packet.downcast_ref::<ChatMessage>() {
            Some(chat) => {
                info!("[client {}] {}", client_id, chat.text);
                handle.apply(move |manager| award_point(manager, client_id, id))
            }
            None => Ok(()),
        },
        _ => Ok(()),
    };
    if let Err(e) = result {
        warn!("Host runtime unavailable: {}", e);
    }
}

/// Each chat line is worth a point, on the session and on the avatar
fn award_point(manager: &mut NetworkManager<LobbyHooks>, client_id: ClientId, avatar: NetworkId) {
    let Some(session) = manager.session_mut(client_id) else {
        return;
    };
    session.score += 1;
    session.chat_lines += 1;
    let (nickname, score) = (session.nickname.clone(), session.score);

    if let Err(e) = manager.set_value(avatar_score(avatar), score) {
        warn!("Failed to update score of {}: {}", avatar, e);
    }
    let top_score = manager.value(scoreboard_top_score()).copied().unwrap_or_default();
    if score > top_score {
        let updated = manager
            .set_value(scoreboard_top_score(), score)
            .and_then(|_| manager.set_value(scoreboard_leader(), nickname));
        if let Err(e) = updated {
            warn!("Failed to update scoreboard: {}", e);
        }
    }
}

fn announce(directory: &ServerDirectory, manager: &NetworkManager<LobbyHooks>) {
    directory.announce(ServerListing {
        name: "netsync lobby".to_string(),
        address: SERVER_ADDRESS.to_string(),
        players: manager.connected_clients().len(),
        max_players: manager.config().max_clients,
    });
}
