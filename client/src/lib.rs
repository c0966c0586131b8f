//! # Netsync Client Library
//!
//! Client-side plumbing on top of the shared network manager.
//!
//! ## Modules
//!
//! - `discovery`: finding servers, where a newer search or a cancel makes
//!   responses to older searches irrelevant
//! - `runtime`: connecting a client manager, waiting for its session, and
//!   reconnecting with the same session key

pub mod discovery;
pub mod runtime;

pub use discovery::{DiscoveryResponse, ServerBrowser, ServerDirectory, ServerListing};
pub use runtime::{ClientRuntime, HANDSHAKE_TIMED_OUT};
