// GossipPoller - periodic party info exchange
//
// Every round: snapshot the directory, push it to each known party other
// than ourselves, and merge back whatever the party answers with.

use crate::sync::{normalize_url, DirectoryError, PartyInfo, PeerDirectory, ProtocolError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// Default time between gossip rounds
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GossipError {
    /// Connection refused or similar; the peer is skipped for this round
    #[error("Peer {0} is unreachable")]
    Unreachable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),
}

// ============================================================================
// P2P CLIENT TRAIT
// ============================================================================

/// Transport used to exchange party info with a peer
#[async_trait]
pub trait P2pClient: Send + Sync {
    /// Send our encoded snapshot to `url`, returning the peer's encoded snapshot
    async fn get_party_info(&self, url: &str, encoded: &[u8]) -> Result<Vec<u8>, GossipError>;
}

/// Outcome of one gossip round
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoundStats {
    pub contacted: usize,
    pub unreachable: usize,
    /// Parties first learned during the round
    pub discovered: usize,
}

pub struct GossipPoller {
    directory: Arc<PeerDirectory>,
    client: Arc<dyn P2pClient>,
    poll_interval: Duration,
}

impl GossipPoller {
    pub fn new(directory: Arc<PeerDirectory>, client: Arc<dyn P2pClient>) -> Self {
        Self {
            directory,
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the round interval (at least one millisecond)
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run a single round
    ///
    /// Unreachable peers are skipped. Any other failure aborts the rest of
    /// the round and is returned.
    pub async fn run_once(&self) -> Result<RoundStats, GossipError> {
        let snapshot = self.directory.snapshot();
        let encoded = snapshot.to_bytes()?;
        let own_url = self.directory.own_url().to_string();

        let mut stats = RoundStats::default();
        for party in snapshot.parties.iter().filter(|p| p.url != own_url) {
            match self.client.get_party_info(&party.url, &encoded).await {
                Ok(response) => {
                    let info = PartyInfo::from_bytes(&response)?;
                    let unsaved = self.directory.find_unsaved_parties(&info).len();
                    self.directory.store(&info)?;
                    stats.discovered += unsaved.saturating_sub(self.directory.find_unsaved_parties(&info).len());
                    stats.contacted += 1;
                }
                Err(GossipError::Unreachable(url)) => {
                    warn!("Peer {} is unreachable, skipping", url);
                    stats.unreachable += 1;
                }
                Err(e) => {
                    error!("Error while polling party info from {}: {}", party.url, e);
                    return Err(e);
                }
            }
        }

        debug!(
            contacted = stats.contacted,
            unreachable = stats.unreachable,
            discovered = stats.discovered,
            "Gossip round complete"
        );
        Ok(stats)
    }

    /// Poll until a shutdown signal arrives
    pub async fn run(self: Arc<Self>, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = interval(self.poll_interval);
        info!("Starting party info poller every {:?}", self.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("Gossip round aborted: {}", e);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down party info poller");
                    break;
                }
            }
        }
    }
}

// ============================================================================
// MOCK CLIENT
// ============================================================================

/// In-memory client answering with fixed snapshots per URL, for testing
#[derive(Default)]
pub struct MockP2pClient {
    responses: HashMap<String, Result<PartyInfo, GossipError>>,
    calls: Mutex<Vec<(String, PartyInfo)>>,
}

impl MockP2pClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests to `url` with `info`
    pub fn with_response(mut self, url: &str, info: PartyInfo) -> Self {
        self.responses.insert(normalize_url(url), Ok(info));
        self
    }

    /// Fail requests to `url` with `error`
    pub fn with_error(mut self, url: &str, error: GossipError) -> Self {
        self.responses.insert(normalize_url(url), Err(error));
        self
    }

    /// Every (url, decoded snapshot) pair sent so far
    pub fn calls(&self) -> Vec<(String, PartyInfo)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn called_urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|(url, _)| url).collect()
    }
}

#[async_trait]
impl P2pClient for MockP2pClient {
    async fn get_party_info(&self, url: &str, encoded: &[u8]) -> Result<Vec<u8>, GossipError> {
        let sent = PartyInfo::from_bytes(encoded)?;
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((url.to_string(), sent));
        }

        match self.responses.get(&normalize_url(url)) {
            Some(Ok(info)) => Ok(info.to_bytes()?),
            Some(Err(e)) => Err(e.clone()),
            None => Err(GossipError::Unreachable(url.to_string())),
        }
    }
}
