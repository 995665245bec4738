// Request/response types for the transaction entry points

use crate::identity::PublicKey;
use crate::payload::{MessageHash, PrivacyMode, TxHash};
use crate::transaction::PublishError;
use serde::{Deserialize, Serialize};

/// A new transaction to encrypt and distribute
#[derive(Clone, Debug, Default)]
pub struct SendRequest {
    /// Sender key; the enclave's default key when absent
    pub sender: Option<PublicKey>,
    pub recipients: Vec<PublicKey>,
    pub payload: Vec<u8>,
    pub privacy_mode: PrivacyMode,
    pub affected_contract_transactions: Vec<TxHash>,
    pub exec_hash: Vec<u8>,
}

/// Distribute a previously stored raw transaction
#[derive(Clone, Debug)]
pub struct SendSignedRequest {
    pub hash: MessageHash,
    pub recipients: Vec<PublicKey>,
    pub privacy_mode: PrivacyMode,
    pub affected_contract_transactions: Vec<TxHash>,
    pub exec_hash: Vec<u8>,
}

/// A recipient that could not be reached during a send
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishFailure {
    pub recipient: PublicKey,
    pub error: PublishError,
}

/// Outcome of a send: the stored hash plus any per-recipient failures
#[derive(Clone, Debug)]
pub struct SendResponse {
    pub hash: MessageHash,
    pub failures: Vec<PublishFailure>,
}

impl SendResponse {
    pub fn is_fully_published(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResendType {
    All,
    Individual,
}

/// Ask this node to resend transactions involving `public_key`
#[derive(Clone, Debug)]
pub struct ResendRequest {
    pub public_key: PublicKey,
    pub resend_type: ResendType,
    /// Transaction to resend, required for [`ResendType::Individual`]
    pub key: Option<MessageHash>,
}

/// Encoded payload for an individual resend, nothing for a batch
#[derive(Clone, Debug, Default)]
pub struct ResendResponse {
    pub payload: Option<Vec<u8>>,
}

/// Fetch and decrypt a stored transaction
#[derive(Clone, Debug)]
pub struct ReceiveRequest {
    pub hash: MessageHash,
    /// Key to decrypt with; every managed key is tried when absent
    pub to: Option<PublicKey>,
    pub raw: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiveResponse {
    pub payload: Vec<u8>,
    pub privacy_mode: PrivacyMode,
    pub affected_contract_transactions: Vec<TxHash>,
    pub exec_hash: Vec<u8>,
}
