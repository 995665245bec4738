// Protocol - party info exchanged between nodes during gossip
//
// A snapshot carries the sending node's advertised URL, every key it knows
// (with the URL of the node hosting it) and every node URL it knows.

use crate::identity::PublicKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),
}

/// Normalize a node URL so that `http://a:1` and `http://a:1/` compare equal
pub fn normalize_url(url: &str) -> String {
    format!("{}/", url.trim().trim_end_matches('/'))
}

/// A public key and the URL of the node hosting it
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Recipient {
    pub key: PublicKey,
    pub url: String,
}

impl Recipient {
    pub fn new(key: PublicKey, url: impl AsRef<str>) -> Self {
        Self {
            key,
            url: normalize_url(url.as_ref()),
        }
    }
}

/// A known node; identity is the URL alone
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Party {
    pub url: String,
    pub last_contacted: Option<DateTime<Utc>>,
}

impl Party {
    pub fn new(url: impl AsRef<str>) -> Self {
        Self {
            url: normalize_url(url.as_ref()),
            last_contacted: None,
        }
    }

    pub fn contacted_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_contacted = Some(at);
        self
    }
}

impl PartialEq for Party {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Party {}

impl Hash for Party {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

impl PartialOrd for Party {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Party {
    fn cmp(&self, other: &Self) -> Ordering {
        self.url.cmp(&other.url)
    }
}

/// Directory snapshot as sent over the wire
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyInfo {
    pub url: String,
    pub recipients: Vec<Recipient>,
    pub parties: Vec<Party>,
}

impl PartyInfo {
    pub fn new(url: impl AsRef<str>, recipients: Vec<Recipient>, parties: Vec<Party>) -> Self {
        Self {
            url: normalize_url(url.as_ref()),
            recipients,
            parties,
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        postcard::to_allocvec(self).map_err(|e| ProtocolError::SerializationFailed(e.to_string()))
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        postcard::from_bytes(bytes).map_err(|e| ProtocolError::DeserializationFailed(e.to_string()))
    }

    /// Keys hosted at a given node URL
    pub fn keys_at(&self, url: &str) -> Vec<PublicKey> {
        let url = normalize_url(url);
        self.recipients
            .iter()
            .filter(|r| r.url == url)
            .map(|r| r.key)
            .collect()
    }
}
