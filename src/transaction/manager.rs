// TransactionManager - send / store / resend / receive lifecycle
//
// Every entry point that persists consults the privacy helper first.
// Publishing fans out per recipient: one unreachable node never blocks or
// fails the others, and never fails the persisted result.

use crate::enclave::{Enclave, EnclaveError};
use crate::identity::PublicKey;
use crate::payload::{CodecError, EncodedPayload, MessageHash, PayloadEncoder};
use crate::privacy::{PrivacyError, PrivacyHelper};
use crate::storage::{RawTransactionStore, StoreError, TransactionStore};
use crate::transaction::{
    PayloadPublisher, PublishFailure, ReceiveRequest, ReceiveResponse, ResendManager,
    ResendRequest, ResendResponse, ResendType, SendRequest, SendResponse, SendSignedRequest,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default page size when walking the store for a batch resend
pub const DEFAULT_RESEND_FETCH_SIZE: usize = 1000;

/// Errors surfaced by the transaction entry points
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error(transparent)]
    Privacy(#[from] PrivacyError),

    #[error("{0}")]
    KeyNotFound(String),

    #[error("{0}")]
    RecipientKeyNotFound(String),

    #[error("Message with hash {0} was not found")]
    TransactionNotFound(MessageHash),

    #[error("{0}")]
    ParticipantsMismatch(String),

    #[error("{0}")]
    InvalidPayload(String),

    #[error("{0}")]
    NotOwnMessage(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Enclave error: {0}")]
    Enclave(#[from] EnclaveError),
}

pub struct TransactionManager {
    enclave: Arc<dyn Enclave>,
    store: Arc<dyn TransactionStore>,
    raw_store: Arc<dyn RawTransactionStore>,
    publisher: Arc<dyn PayloadPublisher>,
    privacy: PrivacyHelper,
    resend_manager: ResendManager,
    encoder: PayloadEncoder,
    resend_fetch_size: usize,
}

impl TransactionManager {
    pub fn new(
        enclave: Arc<dyn Enclave>,
        store: Arc<dyn TransactionStore>,
        raw_store: Arc<dyn RawTransactionStore>,
        publisher: Arc<dyn PayloadPublisher>,
        enhanced_privacy: bool,
    ) -> Self {
        Self {
            privacy: PrivacyHelper::new(store.clone(), enhanced_privacy),
            resend_manager: ResendManager::new(enclave.clone(), store.clone()),
            enclave,
            store,
            raw_store,
            publisher,
            encoder: PayloadEncoder::new(),
            resend_fetch_size: DEFAULT_RESEND_FETCH_SIZE,
        }
    }

    pub fn with_resend_fetch_size(mut self, size: usize) -> Self {
        self.resend_fetch_size = size.max(1);
        self
    }

    /// Encrypt, persist and distribute a new transaction
    pub async fn send(&self, request: SendRequest) -> Result<SendResponse, TransactionError> {
        let sender = request
            .sender
            .unwrap_or_else(|| self.enclave.default_public_key());
        let recipients = self.recipient_list(&sender, &request.recipients);

        let affected = self
            .privacy
            .find_affected_from_send(&request.affected_contract_transactions)?;
        self.privacy
            .validate_send_request(request.privacy_mode, &recipients, &affected)?;

        let payload = self.enclave.encrypt_payload(
            &request.payload,
            &sender,
            &recipients,
            request.privacy_mode,
            &affected,
            &request.exec_hash,
        )?;

        self.persist_and_publish(payload).await
    }

    /// Distribute a raw transaction previously stored with [`Self::store_raw`]
    pub async fn send_signed(&self, request: SendSignedRequest) -> Result<SendResponse, TransactionError> {
        let raw = self
            .raw_store
            .retrieve_raw_by_hash(&request.hash)?
            .ok_or_else(|| TransactionError::TransactionNotFound(request.hash.clone()))?;
        let recipients = self.recipient_list(raw.from(), &request.recipients);

        let affected = self
            .privacy
            .find_affected_from_send(&request.affected_contract_transactions)?;
        self.privacy
            .validate_send_request(request.privacy_mode, &recipients, &affected)?;

        let payload = self.enclave.encrypt_payload_from_raw(
            &raw,
            &recipients,
            request.privacy_mode,
            &affected,
            &request.exec_hash,
        )?;

        self.persist_and_publish(payload).await
    }

    /// Encrypt a transaction for its sender only and keep it for later distribution
    pub fn store_raw(&self, message: &[u8], from: Option<PublicKey>) -> Result<MessageHash, TransactionError> {
        let sender = from.unwrap_or_else(|| self.enclave.default_public_key());
        let raw = self.enclave.encrypt_raw_payload(message, &sender)?;
        Ok(self.raw_store.save_raw(&raw)?)
    }

    /// Handle a payload pushed by a peer
    ///
    /// Payloads failing a non-PSV consistency check are dropped without an
    /// error; the returned hash is the same either way.
    pub fn store_payload(&self, incoming: &[u8]) -> Result<MessageHash, TransactionError> {
        let payload = self.encoder.decode(incoming)?;
        let hash = payload.hash();

        let affected = self.privacy.find_affected_from_payload(&payload)?;
        let invalid = self.enclave.find_invalid_security_hashes(&payload, &affected);
        let payload = self.privacy.sanitise(&hash, &payload, &invalid)?;

        if !self.privacy.validate_payload(&hash, &payload, &affected)? {
            info!("Dropping transaction {} that failed privacy validation", hash);
            return Ok(hash);
        }

        let encoded = self.encoder.encode(&payload)?;
        if self.enclave.public_keys().contains(payload.sender_key()) {
            self.resend_manager.accept_own_message(&encoded)?;
        } else {
            self.store.save(&hash, &encoded)?;
        }

        debug!("Stored payload {}", hash);
        Ok(hash)
    }

    /// Resend stored transactions to a node that has lost them
    pub async fn resend(&self, request: ResendRequest) -> Result<ResendResponse, TransactionError> {
        match request.resend_type {
            ResendType::All => {
                self.resend_all(&request.public_key).await?;
                Ok(ResendResponse::default())
            }
            ResendType::Individual => {
                let hash = request.key.ok_or_else(|| {
                    TransactionError::InvalidRequest("Individual resend requires a transaction hash".to_string())
                })?;
                let row = self
                    .store
                    .retrieve_by_hash(&hash)?
                    .ok_or_else(|| TransactionError::TransactionNotFound(hash.clone()))?;
                let payload = self.encoder.decode(&row.encoded_payload)?;

                let outgoing = if payload.sender_key() == &request.public_key {
                    self.with_own_recipient(&payload)?
                } else {
                    self.encoder.for_recipient(&payload, &request.public_key)?
                };

                Ok(ResendResponse {
                    payload: Some(self.encoder.encode(&outgoing)?),
                })
            }
        }
    }

    /// Decrypt a stored transaction
    pub fn receive(&self, request: ReceiveRequest) -> Result<ReceiveResponse, TransactionError> {
        if request.raw {
            let raw = self
                .raw_store
                .retrieve_raw_by_hash(&request.hash)?
                .ok_or_else(|| TransactionError::TransactionNotFound(request.hash.clone()))?;
            let message = self.enclave.unencrypt_raw_payload(&raw)?;
            return Ok(ReceiveResponse {
                payload: message,
                privacy_mode: Default::default(),
                affected_contract_transactions: Vec::new(),
                exec_hash: Vec::new(),
            });
        }

        let row = self
            .store
            .retrieve_by_hash(&request.hash)?
            .ok_or_else(|| TransactionError::TransactionNotFound(request.hash.clone()))?;
        let payload = self.encoder.decode(&row.encoded_payload)?;

        let candidates: Vec<PublicKey> = match request.to {
            Some(key) => vec![key],
            None => self.enclave.public_keys().into_iter().collect(),
        };

        let message = candidates
            .iter()
            .find_map(|key| self.enclave.unencrypt_transaction(&payload, Some(key)).ok())
            .ok_or_else(|| {
                TransactionError::RecipientKeyNotFound(format!(
                    "No suitable recipient keys found to decrypt payload for {}",
                    request.hash
                ))
            })?;

        Ok(ReceiveResponse {
            payload: message,
            privacy_mode: payload.privacy_mode(),
            affected_contract_transactions: payload.affected_contract_transactions().keys().cloned().collect(),
            exec_hash: payload.exec_hash().to_vec(),
        })
    }

    pub fn delete(&self, hash: &MessageHash) -> Result<(), TransactionError> {
        if !self.store.delete(hash)? {
            return Err(TransactionError::TransactionNotFound(hash.clone()));
        }
        info!("Deleted transaction {}", hash);
        Ok(())
    }

    /// Explicit recipients, then forwarding keys, then the sender; no duplicates
    fn recipient_list(&self, sender: &PublicKey, explicit: &[PublicKey]) -> Vec<PublicKey> {
        let mut recipients: Vec<PublicKey> = Vec::with_capacity(explicit.len() + 1);
        let candidates = explicit
            .iter()
            .copied()
            .chain(self.enclave.forwarding_keys())
            .chain(std::iter::once(*sender));
        for key in candidates {
            if !recipients.contains(&key) {
                recipients.push(key);
            }
        }
        recipients
    }

    async fn persist_and_publish(&self, payload: EncodedPayload) -> Result<SendResponse, TransactionError> {
        let hash = payload.hash();
        self.store.save(&hash, &self.encoder.encode(&payload)?)?;

        let own_keys = self.enclave.public_keys();
        let mut deliveries = Vec::new();
        for key in payload.recipient_keys().iter().filter(|k| !own_keys.contains(*k)) {
            deliveries.push((*key, self.encoder.for_recipient(&payload, key)?));
        }

        let results = join_all(deliveries.iter().map(|(key, pruned)| async move {
            (*key, self.publisher.publish_payload(pruned, key).await)
        }))
        .await;

        let failures: Vec<PublishFailure> = results
            .into_iter()
            .filter_map(|(recipient, result)| result.err().map(|error| PublishFailure { recipient, error }))
            .inspect(|failure| {
                warn!(
                    "Unable to publish transaction {} to {}: {}",
                    hash, failure.recipient, failure.error
                )
            })
            .collect();

        Ok(SendResponse { hash, failures })
    }

    async fn resend_all(&self, requestor: &PublicKey) -> Result<(), TransactionError> {
        let count = self.store.transaction_count()?;
        let mut offset = 0;

        while offset < count {
            let batch = self.store.retrieve_transactions(offset, self.resend_fetch_size)?;
            if batch.is_empty() {
                break;
            }
            offset += batch.len();

            let mut outgoing = Vec::new();
            for row in &batch {
                let payload = self.encoder.decode(&row.encoded_payload)?;
                if payload.sender_key() == requestor {
                    outgoing.push((row.hash.clone(), self.with_own_recipient(&payload)?));
                } else if payload.recipient_keys().contains(requestor) {
                    outgoing.push((row.hash.clone(), self.encoder.for_recipient(&payload, requestor)?));
                }
            }

            let results = join_all(outgoing.iter().map(|(hash, payload)| async move {
                (hash, self.publisher.publish_payload(payload, requestor).await)
            }))
            .await;

            for (hash, result) in results {
                if let Err(e) = result {
                    warn!("Unable to resend transaction {} to {}: {}", hash, requestor, e);
                }
            }
        }

        Ok(())
    }

    /// A sender-side view of a payload stored by a recipient (no keys, one box)
    fn with_own_recipient(&self, payload: &EncodedPayload) -> Result<EncodedPayload, TransactionError> {
        if !payload.recipient_keys().is_empty() {
            return Ok(payload.clone());
        }

        let key = self
            .enclave
            .public_keys()
            .into_iter()
            .find(|key| self.enclave.unencrypt_transaction(payload, Some(key)).is_ok())
            .ok_or_else(|| {
                TransactionError::KeyNotFound(format!(
                    "No key found as recipient of message {}",
                    STANDARD.encode(payload.cipher_text())
                ))
            })?;
        Ok(self.encoder.with_recipient(payload, &key)?)
    }
}
