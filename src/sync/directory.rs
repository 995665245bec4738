// PeerDirectory - the gossiped registry of nodes and the keys they host
//
// Created once at node startup and shared by reference. All reads and
// writes go through one lock so concurrent merges never lose updates.

use crate::identity::PublicKey;
use crate::sync::{normalize_url, Party, PartyInfo, Recipient};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Directory errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Recipient not found for key: {0}")]
    KeyNotFound(PublicKey),

    #[error("Peer {0} not found in known peer list")]
    AutoDiscoveryDisabled(String),
}

/// Static directory settings
#[derive(Clone, Debug, Default)]
pub struct DirectoryConfig {
    /// This node's advertised URL
    pub server_url: String,
    /// Statically configured peer URLs
    pub peers: Vec<String>,
    /// Only accept gossip from, and about, configured peers
    pub disable_peer_discovery: bool,
}

impl DirectoryConfig {
    pub fn new(server_url: impl AsRef<str>) -> Self {
        Self {
            server_url: normalize_url(server_url.as_ref()),
            ..Default::default()
        }
    }

    pub fn with_peers<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.peers = peers.into_iter().map(|p| normalize_url(p.as_ref())).collect();
        self
    }

    pub fn with_peer_discovery_disabled(mut self, disabled: bool) -> Self {
        self.disable_peer_discovery = disabled;
        self
    }
}

#[derive(Default)]
struct DirectoryState {
    recipients: BTreeMap<PublicKey, String>,
    parties: BTreeMap<String, Party>,
    /// Removed recipients, kept with their URL so they can be readmitted
    excluded: BTreeMap<PublicKey, String>,
}

pub struct PeerDirectory {
    config: DirectoryConfig,
    state: Mutex<DirectoryState>,
}

impl PeerDirectory {
    /// Create the directory, registering our own keys at our advertised URL
    pub fn new(config: DirectoryConfig, own_keys: impl IntoIterator<Item = PublicKey>) -> Self {
        let own_url = normalize_url(&config.server_url);
        let peers: Vec<String> = config.peers.iter().map(|p| normalize_url(p)).collect();
        let mut state = DirectoryState::default();

        state.parties.insert(own_url.clone(), Party::new(&own_url));
        for peer in &peers {
            state.parties.insert(peer.clone(), Party::new(peer));
        }
        for key in own_keys {
            state.recipients.insert(key, own_url.clone());
        }

        Self {
            config: DirectoryConfig {
                server_url: own_url,
                peers,
                disable_peer_discovery: config.disable_peer_discovery,
            },
            state: Mutex::new(state),
        }
    }

    pub fn own_url(&self) -> &str {
        &self.config.server_url
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_configured_peer(&self, url: &str) -> bool {
        self.config.peers.iter().any(|peer| url.starts_with(peer.as_str()))
    }

    /// Merge an incoming snapshot
    ///
    /// The sending node's party entry is always refreshed to "now", since
    /// hearing from it directly is the liveness signal. A node contacting us
    /// directly also lifts any exclusion on keys hosted at its URL.
    pub fn store(&self, incoming: &PartyInfo) -> Result<(), DirectoryError> {
        let sender_url = normalize_url(&incoming.url);

        if self.config.disable_peer_discovery && !self.is_configured_peer(&sender_url) {
            warn!("Rejecting party info from unknown peer {}", sender_url);
            return Err(DirectoryError::AutoDiscoveryDisabled(sender_url));
        }

        let mut state = self.lock();

        let readmitted: Vec<PublicKey> = state
            .excluded
            .iter()
            .filter(|(_, url)| **url == sender_url)
            .map(|(key, _)| *key)
            .collect();
        for key in readmitted {
            debug!("Lifting exclusion of {} after direct contact", key);
            state.excluded.remove(&key);
        }

        for recipient in &incoming.recipients {
            let url = normalize_url(&recipient.url);
            if self.config.disable_peer_discovery && url != sender_url {
                continue;
            }
            if state.excluded.contains_key(&recipient.key) {
                debug!("Ignoring excluded key {}", recipient.key);
                continue;
            }
            state.recipients.insert(recipient.key, url);
        }

        if !self.config.disable_peer_discovery {
            let excluded_urls: BTreeSet<String> = state.excluded.values().cloned().collect();
            for party in &incoming.parties {
                let url = normalize_url(&party.url);
                if excluded_urls.contains(&url) {
                    continue;
                }
                state.parties.entry(url.clone()).or_insert_with(|| Party::new(&url));
            }
        }

        state
            .parties
            .insert(sender_url.clone(), Party::new(&sender_url).contacted_at(Utc::now()));

        Ok(())
    }

    /// Remove every key hosted at `url` and keep gossip from re-adding them
    ///
    /// A no-op when peer discovery is disabled, since the peer list is static.
    pub fn remove_recipient(&self, url: &str) -> PartyInfo {
        if self.config.disable_peer_discovery {
            return self.snapshot();
        }

        let url = normalize_url(url);
        {
            let mut state = self.lock();
            let removed: Vec<PublicKey> = state
                .recipients
                .iter()
                .filter(|(_, hosted_at)| **hosted_at == url)
                .map(|(key, _)| *key)
                .collect();

            for key in removed {
                info!("Removing recipient {} at {}", key, url);
                state.recipients.remove(&key);
                state.excluded.insert(key, url.clone());
            }
            state.parties.remove(&url);
        }

        self.snapshot()
    }

    /// Lift the exclusion of keys hosted at `url` and restore them
    pub fn include_recipient(&self, url: &str) -> Vec<Recipient> {
        let url = normalize_url(url);
        let mut state = self.lock();

        let restored: Vec<Recipient> = state
            .excluded
            .iter()
            .filter(|(_, hosted_at)| **hosted_at == url)
            .map(|(key, hosted_at)| Recipient::new(*key, hosted_at))
            .collect();

        for recipient in &restored {
            state.excluded.remove(&recipient.key);
            state.recipients.insert(recipient.key, recipient.url.clone());
        }
        state.parties.entry(url.clone()).or_insert_with(|| Party::new(&url));

        restored
    }

    pub fn find_recipient_by_public_key(&self, key: &PublicKey) -> Result<Recipient, DirectoryError> {
        let state = self.lock();
        match state.recipients.get(key) {
            Some(url) => Ok(Recipient::new(*key, url)),
            None => {
                warn!("No recipient found for key {}", key);
                Err(DirectoryError::KeyNotFound(*key))
            }
        }
    }

    /// Copy of the current view
    pub fn snapshot(&self) -> PartyInfo {
        let state = self.lock();
        PartyInfo {
            url: self.config.server_url.clone(),
            recipients: state
                .recipients
                .iter()
                .map(|(key, url)| Recipient::new(*key, url))
                .collect(),
            parties: state.parties.values().cloned().collect(),
        }
    }

    /// Parties in `incoming` that this directory does not know yet
    pub fn find_unsaved_parties(&self, incoming: &PartyInfo) -> Vec<Party> {
        let state = self.lock();
        incoming
            .parties
            .iter()
            .filter(|party| !state.parties.contains_key(&normalize_url(&party.url)))
            .cloned()
            .collect()
    }

    /// Keys currently barred from re-entering through gossip
    pub fn excluded_keys(&self) -> BTreeSet<PublicKey> {
        self.lock().excluded.keys().copied().collect()
    }
}
