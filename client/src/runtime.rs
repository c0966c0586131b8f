//! Client runtime: connect, wait for the handshake, reconnect
//!
//! The runtime ticks its manager on the configured interval while waiting.
//! Events that arrive during the handshake are kept and handed out by the
//! next [`ClientRuntime::drain_events`], so nothing the server sent
//! alongside the session (spawns, scene loads) is lost.

use std::time::Duration;

use log::{info, warn};
use netsync_shared::{ClientId, NetError, NetworkEvent, NetworkHooks, NetworkManager};
use tokio::time::{interval, MissedTickBehavior};

pub const HANDSHAKE_TIMED_OUT: &str = "Handshake timed out";

pub struct ClientRuntime<H: NetworkHooks> {
    manager: NetworkManager<H>,
    tick_duration: Duration,
    backlog: Vec<NetworkEvent>,
}

impl<H: NetworkHooks> ClientRuntime<H> {
    pub fn new(manager: NetworkManager<H>) -> Self {
        Self {
            tick_duration: manager.config().tick_duration(),
            manager,
            backlog: Vec::new(),
        }
    }

    /// Starts the client and resolves once the server accepted the session.
    /// A rejection or a dropped connection surfaces as
    /// [`NetError::SessionRejected`] carrying the server's reason.
    pub async fn connect(&mut self, timeout: Duration) -> Result<ClientId, NetError> {
        self.manager.start_client()?;
        info!("Connecting to server...");

        match tokio::time::timeout(timeout, self.await_handshake()).await {
            Ok(Ok(client_id)) => {
                info!("Connected! Client ID: {}", client_id);
                Ok(client_id)
            }
            Ok(Err(e)) => {
                warn!("Connection failed: {}", e);
                Err(e)
            }
            Err(_) => {
                warn!("No session after {:?}", timeout);
                self.manager.stop();
                Err(NetError::SessionRejected {
                    reason: HANDSHAKE_TIMED_OUT.to_string(),
                })
            }
        }
    }

    /// Drops the current connection and connects again. Hooks that present
    /// a session key get their previous session back.
    pub async fn reconnect(&mut self, timeout: Duration) -> Result<ClientId, NetError> {
        if self.manager.is_active() {
            self.manager.stop();
            self.collect_events();
        }
        self.connect(timeout).await
    }

    pub fn disconnect(&mut self) {
        self.manager.stop();
        self.collect_events();
    }

    /// Ticks `count` times on the configured interval
    pub async fn run_ticks(&mut self, count: u64) {
        let mut ticker = interval(self.tick_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        for _ in 0..count {
            ticker.tick().await;
            self.manager.tick();
            self.collect_events();
        }
    }

    pub fn tick(&mut self) {
        self.manager.tick();
        self.collect_events();
    }

    pub fn is_connected(&self) -> bool {
        self.manager.local_client_id().is_some()
    }

    pub fn drain_events(&mut self) -> Vec<NetworkEvent> {
        self.collect_events();
        std::mem::take(&mut self.backlog)
    }

    pub fn manager(&self) -> &NetworkManager<H> {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut NetworkManager<H> {
        &mut self.manager
    }

    pub fn into_manager(self) -> NetworkManager<H> {
        self.manager
    }

    async fn await_handshake(&mut self) -> Result<ClientId, NetError> {
        let mut ticker = interval(self.tick_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.manager.tick();
            let mut outcome = None;
            for event in self.manager.drain_events() {
                match &event {
                    NetworkEvent::Connected { client_id } if outcome.is_none() => {
                        outcome = Some(Ok(*client_id));
                    }
                    NetworkEvent::Disconnected { reason } => {
                        outcome = Some(Err(NetError::SessionRejected { reason: reason.clone() }));
                    }
                    _ => {}
                }
                self.backlog.push(event);
            }
            if let Some(outcome) = outcome {
                return outcome;
            }
        }
    }

    fn collect_events(&mut self) {
        self.backlog.extend(self.manager.drain_events());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsync_shared::{
        DefaultHooks, LocalHub, NetworkConfig, NetworkSessionEstablishRequestPacket, SessionEstablishingResponse,
    };
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::task::JoinHandle;
    use tokio_test::{assert_err, assert_ok};

    /// Turns away every client whose key is "banned"
    #[derive(Default)]
    struct BouncerHooks;

    impl NetworkHooks for BouncerHooks {
        type Request = NetworkSessionEstablishRequestPacket;
        type Session = ();

        fn create_session_request(&mut self) -> Self::Request {
            NetworkSessionEstablishRequestPacket::default()
        }

        fn on_session_request(&mut self, _client_id: ClientId, request: &Self::Request) -> SessionEstablishingResponse {
            match request.session_key.as_deref() {
                Some("banned") => SessionEstablishingResponse::reject("Banned"),
                _ => SessionEstablishingResponse::Accept,
            }
        }

        fn create_session_data(&mut self, _client_id: ClientId, _request: &Self::Request) {}
    }

    fn config() -> NetworkConfig {
        NetworkConfig {
            tick_rate: 200,
            ..NetworkConfig::default()
        }
    }

    fn spawn_server(hub: &LocalHub) -> (JoinHandle<NetworkManager<BouncerHooks>>, Arc<AtomicBool>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut server = NetworkManager::new(config(), Box::new(hub.server()), BouncerHooks).unwrap();
        server.start_server().unwrap();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let task = tokio::spawn(async move {
            while !flag.load(Ordering::Relaxed) {
                server.tick();
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            server
        });
        (task, stop)
    }

    fn client(hub: &LocalHub, key: &str) -> ClientRuntime<DefaultHooks> {
        let hooks = DefaultHooks {
            session_key: Some(key.to_string()),
        };
        ClientRuntime::new(NetworkManager::new(config(), Box::new(hub.client()), hooks).unwrap())
    }

    #[tokio::test]
    async fn test_connect_resolves_with_client_id() {
        let hub = LocalHub::new();
        let (server, stop) = spawn_server(&hub);

        let mut runtime = client(&hub, "ada");
        let client_id = assert_ok!(runtime.connect(Duration::from_secs(2)).await);
        assert_eq!(client_id, 1);
        assert!(runtime.is_connected());
        assert!(runtime
            .drain_events()
            .iter()
            .any(|e| matches!(e, NetworkEvent::Connected { client_id: 1 })));

        stop.store(true, Ordering::Relaxed);
        let server = server.await.unwrap();
        assert_eq!(server.connected_clients(), vec![1]);
    }

    #[tokio::test]
    async fn test_rejection_carries_reason() {
        let hub = LocalHub::new();
        let (server, stop) = spawn_server(&hub);

        let mut runtime = client(&hub, "banned");
        let result = runtime.connect(Duration::from_secs(2)).await;
        match result {
            Err(NetError::SessionRejected { reason }) => assert_eq!(reason, "Banned"),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(!runtime.is_connected());

        stop.store(true, Ordering::Relaxed);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_server_is_refused() {
        let hub = LocalHub::new();
        let mut runtime = client(&hub, "ada");
        let error = assert_err!(runtime.connect(Duration::from_secs(1)).await);
        assert!(matches!(error, NetError::SessionRejected { reason } if reason == "Connection refused"));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let hub = LocalHub::new();
        // Started but never ticked, so the handshake never completes
        let mut server = NetworkManager::new(config(), Box::new(hub.server()), BouncerHooks).unwrap();
        server.start_server().unwrap();

        let mut runtime = client(&hub, "ada");
        let result = runtime.connect(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(NetError::SessionRejected { reason }) if reason == HANDSHAKE_TIMED_OUT));
        assert!(!runtime.manager().is_active());
    }

    #[tokio::test]
    async fn test_reconnect_restores_session() {
        let hub = LocalHub::new();
        let (server, stop) = spawn_server(&hub);

        let mut runtime = client(&hub, "ada");
        let first = assert_ok!(runtime.connect(Duration::from_secs(2)).await);
        let second = assert_ok!(runtime.reconnect(Duration::from_secs(2)).await);
        assert_ne!(first, second);

        // The restore notice is raised on the server after the new client id
        stop.store(true, Ordering::Relaxed);
        let mut server = server.await.unwrap();
        assert!(server.drain_events().iter().any(|e| matches!(
            e,
            NetworkEvent::SessionRestored { client_id, session_key } if *client_id == second && session_key == "ada"
        )));
    }
}
