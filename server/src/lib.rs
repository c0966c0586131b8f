//! # Netsync Server Library
//!
//! Runs a network manager as a long-lived service and provides a small
//! demo protocol exercising the whole replication layer.
//!
//! ## Modules
//!
//! - `runtime`: fixed-interval tick loop owning the manager, driven through
//!   a cloneable handle
//! - `lobby`: nickname-keyed sessions, player avatars, chat, and a
//!   scoreboard scene

pub mod lobby;
pub mod runtime;

pub use lobby::{lobby_manager, ChatMessage, LobbyHooks, LobbyJoinRequest, LobbyProfile, LobbySession};
pub use runtime::{NetworkRuntime, RuntimeCommand, RuntimeHandle};
