//! Server discovery with generation-based cancellation
//!
//! A [`ServerDirectory`] stands in for the discovery medium: servers
//! announce listings into it and a query answers asynchronously, one
//! response per listing, tagged with the generation that asked.
//!
//! [`ServerBrowser`] bumps its generation on every new search and on
//! cancel, so responses to an older search that arrive late are dropped
//! instead of polluting the current results.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerListing {
    pub name: String,
    pub address: String,
    pub players: usize,
    pub max_players: usize,
}

impl ServerListing {
    pub fn is_full(&self) -> bool {
        self.players >= self.max_players
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryResponse {
    pub generation: u64,
    pub listing: ServerListing,
}

/// Shared table of announced servers
#[derive(Debug, Clone, Default)]
pub struct ServerDirectory {
    listings: Arc<Mutex<Vec<ServerListing>>>,
    response_delay: Duration,
}

impl ServerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Responses are delivered after `delay`, like a slow network would
    pub fn with_response_delay(delay: Duration) -> Self {
        Self {
            listings: Arc::default(),
            response_delay: delay,
        }
    }

    /// Adds a listing or replaces the one with the same address
    pub fn announce(&self, listing: ServerListing) {
        let Ok(mut listings) = self.listings.lock() else {
            warn!("Server directory lock poisoned");
            return;
        };
        match listings.iter_mut().find(|l| l.address == listing.address) {
            Some(existing) => *existing = listing,
            None => listings.push(listing),
        }
    }

    pub fn withdraw(&self, address: &str) {
        if let Ok(mut listings) = self.listings.lock() {
            listings.retain(|l| l.address != address);
        }
    }

    /// Answers a search in the background
    pub fn query(&self, generation: u64, reply: mpsc::UnboundedSender<DiscoveryResponse>) {
        let snapshot = match self.listings.lock() {
            Ok(listings) => listings.clone(),
            Err(_) => {
                warn!("Server directory lock poisoned");
                return;
            }
        };
        let delay = self.response_delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            for listing in snapshot {
                if reply.send(DiscoveryResponse { generation, listing }).is_err() {
                    break;
                }
            }
        });
    }
}

pub struct ServerBrowser {
    generation: u64,
    searching: bool,
    listings: Vec<ServerListing>,
    reply_tx: mpsc::UnboundedSender<DiscoveryResponse>,
    reply_rx: mpsc::UnboundedReceiver<DiscoveryResponse>,
}

impl Default for ServerBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBrowser {
    pub fn new() -> Self {
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        Self {
            generation: 0,
            searching: false,
            listings: Vec::new(),
            reply_tx,
            reply_rx,
        }
    }

    /// Starts a new search, discarding results of any earlier one
    pub fn search(&mut self, directory: &ServerDirectory) -> u64 {
        self.generation += 1;
        self.searching = true;
        self.listings.clear();
        debug!("Starting server search #{}", self.generation);
        directory.query(self.generation, self.reply_tx.clone());
        self.generation
    }

    pub fn cancel(&mut self) {
        if self.searching {
            debug!("Cancelled server search #{}", self.generation);
        }
        self.generation += 1;
        self.searching = false;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_searching(&self) -> bool {
        self.searching
    }

    /// Takes in whatever responses arrived; returns how many were accepted
    pub fn poll(&mut self) -> usize {
        let mut accepted = 0;
        while let Ok(response) = self.reply_rx.try_recv() {
            if self.accept(response) {
                accepted += 1;
            }
        }
        accepted
    }

    /// Waits up to `window` for responses, then ends the search
    pub async fn collect(&mut self, window: Duration) -> &[ServerListing] {
        let deadline = tokio::time::Instant::now() + window;
        while self.searching {
            match tokio::time::timeout_at(deadline, self.reply_rx.recv()).await {
                Ok(Some(response)) => {
                    self.accept(response);
                }
                Ok(None) | Err(_) => break,
            }
        }
        self.searching = false;
        &self.listings
    }

    pub fn listings(&self) -> &[ServerListing] {
        &self.listings
    }

    fn accept(&mut self, response: DiscoveryResponse) -> bool {
        if !self.searching || response.generation != self.generation {
            debug!(
                "Dropping stale response from {} (search #{}, current #{})",
                response.listing.address, response.generation, self.generation
            );
            return false;
        }
        match self
            .listings
            .iter_mut()
            .find(|l| l.address == response.listing.address)
        {
            Some(existing) => *existing = response.listing,
            None => self.listings.push(response.listing),
        }
        true
    }
}
