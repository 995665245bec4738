// PrivacyHelper - consistency rules between a transaction and the
// transactions it declares as affected
//
// Two directions:
// - outbound: every declared dependency must resolve, and PSV dependencies
//   must share the exact recipient set of the new transaction
// - inbound: dependencies are resolved best-effort; mode disagreements are
//   reported as `false` (silent drop), PSV participant mismatches are errors

use crate::identity::PublicKey;
use crate::payload::{AffectedTransaction, CodecError, EncodedPayload, PayloadEncoder, PrivacyMode, TxHash};
use crate::storage::{StoreError, TransactionStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised by privacy validation
#[derive(Error, Debug)]
pub enum PrivacyError {
    #[error("{0}")]
    PrivacyViolation(String),

    #[error("{0}")]
    EnhancedPrivacyNotSupported(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Stateless rule engine over the transaction store
pub struct PrivacyHelper {
    store: Arc<dyn TransactionStore>,
    encoder: PayloadEncoder,
    enhanced_privacy: bool,
}

impl PrivacyHelper {
    pub fn new(store: Arc<dyn TransactionStore>, enhanced_privacy: bool) -> Self {
        Self {
            store,
            encoder: PayloadEncoder::new(),
            enhanced_privacy,
        }
    }

    pub fn enhanced_privacy(&self) -> bool {
        self.enhanced_privacy
    }

    /// Resolve the affected transactions named by an outbound request
    ///
    /// Every hash must be stored locally; the first one that is not fails
    /// the whole request.
    pub fn find_affected_from_send(&self, hashes: &[TxHash]) -> Result<Vec<AffectedTransaction>, PrivacyError> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }

        let affected = self.resolve(hashes)?;
        if let Some(missing) = hashes
            .iter()
            .find(|hash| !affected.iter().any(|tx| tx.hash() == *hash))
        {
            return Err(PrivacyError::PrivacyViolation(format!(
                "Unable to find affectedContractTransaction {}",
                missing
            )));
        }

        Ok(affected)
    }

    /// Resolve the affected transactions declared by an inbound payload,
    /// dropping the ones this node never received
    pub fn find_affected_from_payload(&self, payload: &EncodedPayload) -> Result<Vec<AffectedTransaction>, PrivacyError> {
        let hashes: Vec<TxHash> = payload.affected_contract_transactions().keys().cloned().collect();
        if hashes.is_empty() {
            return Ok(Vec::new());
        }

        let affected = self.resolve(&hashes)?;
        if affected.len() < hashes.len() {
            debug!(
                declared = hashes.len(),
                resolved = affected.len(),
                "Some affected transactions are not stored locally"
            );
        }
        Ok(affected)
    }

    /// Check an outbound request against its resolved dependencies
    pub fn validate_send_request(
        &self,
        privacy_mode: PrivacyMode,
        recipients: &[PublicKey],
        affected: &[AffectedTransaction],
    ) -> Result<bool, PrivacyError> {
        self.check_enhanced_privacy(privacy_mode)?;

        let requested: BTreeSet<PublicKey> = recipients.iter().copied().collect();

        for tx in affected {
            let affected_mode = tx.payload().privacy_mode();

            if privacy_mode == PrivacyMode::PrivateStateValidation && affected_mode != PrivacyMode::PrivateStateValidation {
                return Err(PrivacyError::PrivacyViolation(format!(
                    "Private state validation flag mismatched with Affected Txn {}",
                    tx.hash()
                )));
            }

            if affected_mode == PrivacyMode::PrivateStateValidation {
                let affected_recipients: BTreeSet<PublicKey> =
                    tx.payload().recipient_keys().iter().copied().collect();
                if affected_recipients != requested {
                    return Err(PrivacyError::PrivacyViolation(format!(
                        "Recipients mismatched for Affected Txn {}",
                        tx.hash()
                    )));
                }
            }
        }

        Ok(true)
    }

    /// Check an inbound payload against its resolved dependencies
    ///
    /// `Ok(false)` means the payload should be dropped without telling the
    /// sending peer anything.
    pub fn validate_payload(
        &self,
        hash: &TxHash,
        payload: &EncodedPayload,
        affected: &[AffectedTransaction],
    ) -> Result<bool, PrivacyError> {
        let privacy_mode = payload.privacy_mode();
        self.check_enhanced_privacy(privacy_mode)?;

        if let Some(tx) = affected.iter().find(|tx| tx.payload().privacy_mode() != privacy_mode) {
            info!(
                "ACOTH {} has privacy mode {:?} but transaction {} has {:?}, ignoring",
                tx.hash(),
                tx.payload().privacy_mode(),
                hash,
                privacy_mode
            );
            return Ok(false);
        }

        if privacy_mode != PrivacyMode::PrivateStateValidation {
            return Ok(true);
        }

        if affected.len() != payload.affected_contract_transactions().len() {
            info!("Not all ACOTHs of PSV transaction {} were found, ignoring", hash);
            return Ok(false);
        }

        let sender = payload.sender_key();
        if let Some(tx) = affected.iter().find(|tx| !tx.payload().participants().contains(sender)) {
            info!(
                "Sender of transaction {} is not a participant of ACOTH {}, ignoring",
                hash,
                tx.hash()
            );
            return Ok(false);
        }

        let participants = payload.participants();
        if let Some(tx) = affected.iter().find(|tx| tx.payload().participants() != participants) {
            return Err(PrivacyError::PrivacyViolation(format!(
                "Recipients mismatched for Affected Txn {}",
                tx.hash()
            )));
        }

        Ok(true)
    }

    /// Drop affected entries whose security hash did not verify
    ///
    /// PSV transactions are not allowed to carry any such entry.
    pub fn sanitise(
        &self,
        hash: &TxHash,
        payload: &EncodedPayload,
        invalid_hashes: &BTreeSet<TxHash>,
    ) -> Result<EncodedPayload, PrivacyError> {
        if invalid_hashes.is_empty() {
            return Ok(payload.clone());
        }

        if payload.privacy_mode() == PrivacyMode::PrivateStateValidation {
            let invalid: Vec<String> = invalid_hashes.iter().map(TxHash::to_base64).collect();
            return Err(PrivacyError::PrivacyViolation(format!(
                "Invalid security hashes identified for PSC TX {}. Invalid ACOTHs: {}",
                hash,
                invalid.join(",")
            )));
        }

        let mut affected = payload.affected_contract_transactions().clone();
        affected.retain(|tx_hash, _| !invalid_hashes.contains(tx_hash));

        Ok(payload.to_builder().affected_contract_transactions(affected).build()?)
    }

    fn check_enhanced_privacy(&self, privacy_mode: PrivacyMode) -> Result<(), PrivacyError> {
        if privacy_mode.is_enhanced() && !self.enhanced_privacy {
            return Err(PrivacyError::EnhancedPrivacyNotSupported(
                "Privacy enhancements are disabled on this node".to_string(),
            ));
        }
        Ok(())
    }

    fn resolve(&self, hashes: &[TxHash]) -> Result<Vec<AffectedTransaction>, PrivacyError> {
        self.store
            .find_by_hashes(hashes)?
            .into_iter()
            .map(|row| -> Result<AffectedTransaction, PrivacyError> {
                let payload = self.encoder.decode(&row.encoded_payload)?;
                Ok(AffectedTransaction::new(row.hash, payload))
            })
            .collect()
    }
}
