// HttpP2pClient - outbound calls to other nodes
//
// Recipient URLs are resolved through the peer directory. A refused
// connection is reported separately from other failures so callers can
// treat an offline node as transient.

use crate::identity::PublicKey;
use crate::payload::{EncodedPayload, PayloadEncoder};
use crate::sync::{normalize_url, GossipError, P2pClient, PeerDirectory};
use crate::transaction::{PayloadPublisher, PublishError};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default timeout for a single peer request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpP2pClient {
    client: Client,
    directory: Arc<PeerDirectory>,
    encoder: PayloadEncoder,
}

impl HttpP2pClient {
    pub fn new(directory: Arc<PeerDirectory>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            directory,
            encoder: PayloadEncoder::new(),
        })
    }

    async fn post_bytes(&self, url: &str, body: Vec<u8>) -> Result<reqwest::Response, reqwest::Error> {
        self.client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
    }
}

#[async_trait]
impl P2pClient for HttpP2pClient {
    async fn get_party_info(&self, url: &str, encoded: &[u8]) -> Result<Vec<u8>, GossipError> {
        let target = format!("{}partyinfo", normalize_url(url));

        let response = self.post_bytes(&target, encoded.to_vec()).await.map_err(|e| {
            if e.is_connect() {
                GossipError::Unreachable(url.to_string())
            } else {
                GossipError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GossipError::Transport(format!("{} responded with {}", target, status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| GossipError::Transport(e.to_string()))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl PayloadPublisher for HttpP2pClient {
    async fn publish_payload(&self, payload: &EncodedPayload, recipient: &PublicKey) -> Result<(), PublishError> {
        let target = self
            .directory
            .find_recipient_by_public_key(recipient)
            .map_err(|_| PublishError::KeyNotFound(*recipient))?;
        let body = self
            .encoder
            .encode(payload)
            .map_err(|e| PublishError::PublishFailed(e.to_string()))?;

        let url = format!("{}push", target.url);
        let response = self.post_bytes(&url, body).await.map_err(|e| {
            if e.is_connect() {
                PublishError::NodeOffline(target.url.clone())
            } else {
                PublishError::PublishFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::PublishFailed(format!(
                "Unable to push payload to recipient url {}: {}",
                target.url, status
            )));
        }

        debug!("Published {} to {}", payload.hash(), target.url);
        Ok(())
    }
}
