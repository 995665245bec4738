// ResendManager - reconciles this node's own transactions echoed back by peers
//
// A counterparty that resends one of our transactions to us carries the
// recipients it knows about. The stored row keeps its identity (hash) and
// gains the box of any recipient it could not open for yet.
//
// Boxes line up with the leading recipient keys. A PSV copy pruned for one
// recipient lists every key but carries a single box, so keys without a box
// always trail the boxed ones in a stored row.

use crate::enclave::Enclave;
use crate::identity::PublicKey;
use crate::payload::{CodecError, EncodedPayload, PayloadEncoder, PrivacyMode};
use crate::storage::TransactionStore;
use crate::transaction::TransactionError;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;
use tracing::debug;

pub struct ResendManager {
    enclave: Arc<dyn Enclave>,
    store: Arc<dyn TransactionStore>,
    encoder: PayloadEncoder,
}

impl ResendManager {
    pub fn new(enclave: Arc<dyn Enclave>, store: Arc<dyn TransactionStore>) -> Self {
        Self {
            enclave,
            store,
            encoder: PayloadEncoder::new(),
        }
    }

    /// Accept a payload whose sender is one of this node's keys
    pub fn accept_own_message(&self, incoming_bytes: &[u8]) -> Result<(), TransactionError> {
        let incoming = self.encoder.decode(incoming_bytes)?;

        let sender = *incoming.sender_key();
        if !self.enclave.public_keys().contains(&sender) {
            return Err(TransactionError::NotOwnMessage(format!(
                "Message {} does not have one the nodes own keys as a sender",
                STANDARD.encode(incoming.cipher_text())
            )));
        }

        let message = self
            .enclave
            .unencrypt_transaction(&incoming, None)
            .map_err(|_| TransactionError::InvalidPayload("Invalid payload provided".to_string()))?;

        let hash = incoming.hash();

        let existing = match self.store.retrieve_by_hash(&hash)? {
            Some(row) => self.encoder.decode(&row.encoded_payload)?,
            None => {
                debug!("First sighting of own transaction {}", hash);
                let stored = if incoming.recipient_box_for(&sender).is_some() {
                    incoming
                } else {
                    let own_box = self.enclave.create_new_recipient_box(&incoming, &sender)?;
                    let mut keys = incoming.recipient_keys().to_vec();
                    let mut boxes = incoming.recipient_boxes().to_vec();
                    place_box(&mut keys, &mut boxes, sender, own_box);
                    incoming.to_builder().recipient_keys(keys).recipient_boxes(boxes).build()?
                };
                self.store.save(&hash, &self.encoder.encode(&stored)?)?;
                return Ok(());
            }
        };

        let existing_message = self
            .enclave
            .unencrypt_transaction(&existing, None)
            .map_err(|_| TransactionError::InvalidPayload("Invalid payload provided".to_string()))?;
        if existing_message != message {
            return Err(TransactionError::InvalidPayload("Invalid payload provided".to_string()));
        }

        if existing.privacy_mode() == PrivacyMode::PrivateStateValidation
            && existing.participants() != incoming.participants()
        {
            return Err(TransactionError::ParticipantsMismatch(format!(
                "Participants mismatch for two versions of transaction {}",
                hash
            )));
        }

        let merged = merge_recipients(&existing, &incoming)?;
        if merged != existing {
            debug!(
                "Own transaction {} now has {} recipient boxes",
                hash,
                merged.recipient_boxes().len()
            );
            self.store.save(&hash, &self.encoder.encode(&merged)?)?;
        }

        Ok(())
    }
}

/// Existing recipients plus every keyed box of `incoming` the row lacks
fn merge_recipients(existing: &EncodedPayload, incoming: &EncodedPayload) -> Result<EncodedPayload, CodecError> {
    let mut keys = existing.recipient_keys().to_vec();
    let mut boxes = existing.recipient_boxes().to_vec();
    for (key, recipient_box) in incoming.recipient_keys().iter().zip(incoming.recipient_boxes()) {
        place_box(&mut keys, &mut boxes, *key, recipient_box.clone());
    }
    existing.to_builder().recipient_keys(keys).recipient_boxes(boxes).build()
}

/// Move `key` to the end of the boxed keys and store its box there
///
/// No-op when the key already has a box, or when the row holds keyless boxes.
fn place_box(keys: &mut Vec<PublicKey>, boxes: &mut Vec<Vec<u8>>, key: PublicKey, recipient_box: Vec<u8>) {
    let slot = boxes.len();
    if slot > keys.len() {
        return;
    }
    match keys.iter().position(|k| *k == key) {
        Some(index) if index < slot => return,
        Some(index) => {
            keys.remove(index);
        }
        None => {}
    }
    keys.insert(slot, key);
    boxes.push(recipient_box);
}
