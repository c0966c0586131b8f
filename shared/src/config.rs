use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables shared by the manager and the runtimes driving it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Ticks per second for runtimes that drive `NetworkManager::tick`
    pub tick_rate: u32,
    /// Transport clients admitted at once, pending handshakes included
    pub max_clients: usize,
    /// Whether clients may request spawns
    pub allow_client_spawns: bool,
    /// Check incoming client value writes against each value's modifier
    pub validate_client_writes: bool,
    /// Despawn a leaving client's objects instead of handing them to the server
    pub despawn_owned_on_disconnect: bool,
    /// Connections that have not completed the handshake by then are dropped
    pub handshake_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tick_rate: 30,
            max_clients: 16,
            allow_client_spawns: false,
            validate_client_writes: true,
            despawn_owned_on_disconnect: false,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl NetworkConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }
}
