// Enclave Traits
// The boundary between transaction handling and the keys/crypto that seal payloads

use crate::identity::PublicKey;
use crate::payload::{AffectedTransaction, EncodedPayload, PrivacyMode, RawTransaction, TxHash};
use std::collections::BTreeSet;
use thiserror::Error;

/// Errors raised by an enclave
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnclaveError {
    #[error("Key {0} is not managed by this enclave")]
    KeyNotFound(PublicKey),

    #[error("Unable to decrypt payload")]
    DecryptionFailed,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Invalid nonce length: {0}")]
    InvalidNonce(usize),

    #[error("Payload has no recipient box")]
    NoRecipientBox,
}

/// Holds this node's private keys and performs all sealing/unsealing
///
/// `unencrypt_transaction` takes the recipient key whose box should be
/// opened; `None` lets the enclave pick any box it holds a key for (either
/// as the sender or as the recipient of that box).
pub trait Enclave: Send + Sync {
    /// Key used when a request does not name a sender
    fn default_public_key(&self) -> PublicKey;

    /// All keys this node manages
    fn public_keys(&self) -> BTreeSet<PublicKey>;

    /// Keys that receive a copy of every outbound transaction
    fn forwarding_keys(&self) -> BTreeSet<PublicKey>;

    fn encrypt_payload(
        &self,
        message: &[u8],
        sender: &PublicKey,
        recipients: &[PublicKey],
        privacy_mode: PrivacyMode,
        affected: &[AffectedTransaction],
        exec_hash: &[u8],
    ) -> Result<EncodedPayload, EnclaveError>;

    /// Promote a stored raw transaction into a multi-recipient payload
    fn encrypt_payload_from_raw(
        &self,
        raw: &RawTransaction,
        recipients: &[PublicKey],
        privacy_mode: PrivacyMode,
        affected: &[AffectedTransaction],
        exec_hash: &[u8],
    ) -> Result<EncodedPayload, EnclaveError>;

    fn encrypt_raw_payload(&self, message: &[u8], sender: &PublicKey) -> Result<RawTransaction, EnclaveError>;

    fn unencrypt_raw_payload(&self, raw: &RawTransaction) -> Result<Vec<u8>, EnclaveError>;

    fn unencrypt_transaction(
        &self,
        payload: &EncodedPayload,
        recipient: Option<&PublicKey>,
    ) -> Result<Vec<u8>, EnclaveError>;

    /// Seal the payload's master key for another recipient (sender side only)
    fn create_new_recipient_box(
        &self,
        payload: &EncodedPayload,
        recipient: &PublicKey,
    ) -> Result<Vec<u8>, EnclaveError>;

    /// Affected transactions whose security hash no longer matches
    fn find_invalid_security_hashes(
        &self,
        payload: &EncodedPayload,
        affected: &[AffectedTransaction],
    ) -> BTreeSet<TxHash>;
}
