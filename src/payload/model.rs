use crate::identity::PublicKey;
use crate::payload::CodecError;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_512};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Content-derived identifier of a transaction (SHA3-512 of the cipher text)
///
/// Two independently built payloads that share a cipher text collide to the
/// same hash, which is what makes storage and resend idempotent.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageHash(Vec<u8>);

/// Affected contract transactions are referenced by the same hash
pub type TxHash = MessageHash;

impl MessageHash {
    /// Hash a cipher text into its message hash
    pub fn from_cipher_text(cipher_text: &[u8]) -> Self {
        Self(Sha3_512::digest(cipher_text).to_vec())
    }

    /// Wrap existing hash bytes
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        STANDARD.decode(encoded.trim()).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }
}

impl fmt::Display for MessageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for MessageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageHash({})", self.to_base64())
    }
}

/// Integrity token carried per affected transaction
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecurityHash(Vec<u8>);

impl SecurityHash {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Nonce used for the cipher text or the recipient boxes
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nonce(Vec<u8>);

impl Nonce {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Privacy semantics of a transaction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrivacyMode {
    StandardPrivate,
    PartyProtection,
    PrivateStateValidation,
}

impl PrivacyMode {
    /// Numeric privacy flag as carried by client requests
    pub fn flag(&self) -> u8 {
        match self {
            Self::StandardPrivate => 0,
            Self::PartyProtection => 1,
            Self::PrivateStateValidation => 3,
        }
    }

    pub fn from_flag(flag: u8) -> Option<Self> {
        match flag {
            0 => Some(Self::StandardPrivate),
            1 => Some(Self::PartyProtection),
            3 => Some(Self::PrivateStateValidation),
            _ => None,
        }
    }

    /// Modes other than standard private need privacy enhancements enabled
    pub fn is_enhanced(&self) -> bool {
        !matches!(self, Self::StandardPrivate)
    }
}

impl Default for PrivacyMode {
    fn default() -> Self {
        Self::StandardPrivate
    }
}

/// The data that is sent to other nodes
///
/// `recipient_boxes[i]` is the master key sealed for `recipient_keys[i]`.
/// A payload with no recipient keys is a copy held by a recipient, which
/// only carries its own box. Instances are never mutated in place: pruning
/// and merging go through [`EncodedPayload::to_builder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedPayload {
    sender_key: PublicKey,
    cipher_text: Vec<u8>,
    cipher_text_nonce: Nonce,
    recipient_boxes: Vec<Vec<u8>>,
    recipient_nonce: Nonce,
    recipient_keys: Vec<PublicKey>,
    privacy_mode: PrivacyMode,
    affected_contract_transactions: BTreeMap<TxHash, SecurityHash>,
    exec_hash: Vec<u8>,
}

impl EncodedPayload {
    /// Start building a payload
    pub fn builder() -> EncodedPayloadBuilder {
        EncodedPayloadBuilder::new()
    }

    /// Start building a modified copy of this payload
    pub fn to_builder(&self) -> EncodedPayloadBuilder {
        EncodedPayloadBuilder {
            sender_key: Some(self.sender_key),
            cipher_text: self.cipher_text.clone(),
            cipher_text_nonce: self.cipher_text_nonce.clone(),
            recipient_boxes: self.recipient_boxes.clone(),
            recipient_nonce: self.recipient_nonce.clone(),
            recipient_keys: self.recipient_keys.clone(),
            privacy_mode: self.privacy_mode,
            affected_contract_transactions: self.affected_contract_transactions.clone(),
            exec_hash: self.exec_hash.clone(),
        }
    }

    pub fn sender_key(&self) -> &PublicKey {
        &self.sender_key
    }

    pub fn cipher_text(&self) -> &[u8] {
        &self.cipher_text
    }

    pub fn cipher_text_nonce(&self) -> &Nonce {
        &self.cipher_text_nonce
    }

    pub fn recipient_boxes(&self) -> &[Vec<u8>] {
        &self.recipient_boxes
    }

    pub fn recipient_nonce(&self) -> &Nonce {
        &self.recipient_nonce
    }

    pub fn recipient_keys(&self) -> &[PublicKey] {
        &self.recipient_keys
    }

    pub fn privacy_mode(&self) -> PrivacyMode {
        self.privacy_mode
    }

    pub fn affected_contract_transactions(&self) -> &BTreeMap<TxHash, SecurityHash> {
        &self.affected_contract_transactions
    }

    pub fn exec_hash(&self) -> &[u8] {
        &self.exec_hash
    }

    /// Content hash of this transaction
    pub fn hash(&self) -> MessageHash {
        MessageHash::from_cipher_text(&self.cipher_text)
    }

    /// Sender together with all recipients
    pub fn participants(&self) -> BTreeSet<PublicKey> {
        std::iter::once(self.sender_key)
            .chain(self.recipient_keys.iter().copied())
            .collect()
    }

    /// Position of a key in the recipient list
    pub fn recipient_index(&self, key: &PublicKey) -> Option<usize> {
        self.recipient_keys.iter().position(|k| k == key)
    }

    /// The sealed master key for a recipient, if present
    pub fn recipient_box_for(&self, key: &PublicKey) -> Option<&[u8]> {
        self.recipient_index(key)
            .and_then(|i| self.recipient_boxes.get(i))
            .map(Vec::as_slice)
    }
}

/// Builder for [`EncodedPayload`]
#[derive(Clone, Debug, Default)]
pub struct EncodedPayloadBuilder {
    sender_key: Option<PublicKey>,
    cipher_text: Vec<u8>,
    cipher_text_nonce: Nonce,
    recipient_boxes: Vec<Vec<u8>>,
    recipient_nonce: Nonce,
    recipient_keys: Vec<PublicKey>,
    privacy_mode: PrivacyMode,
    affected_contract_transactions: BTreeMap<TxHash, SecurityHash>,
    exec_hash: Vec<u8>,
}

impl EncodedPayloadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender_key(mut self, key: PublicKey) -> Self {
        self.sender_key = Some(key);
        self
    }

    pub fn cipher_text(mut self, cipher_text: impl Into<Vec<u8>>) -> Self {
        self.cipher_text = cipher_text.into();
        self
    }

    pub fn cipher_text_nonce(mut self, nonce: Nonce) -> Self {
        self.cipher_text_nonce = nonce;
        self
    }

    pub fn recipient_boxes(mut self, boxes: Vec<Vec<u8>>) -> Self {
        self.recipient_boxes = boxes;
        self
    }

    pub fn recipient_nonce(mut self, nonce: Nonce) -> Self {
        self.recipient_nonce = nonce;
        self
    }

    pub fn recipient_keys(mut self, keys: Vec<PublicKey>) -> Self {
        self.recipient_keys = keys;
        self
    }

    /// Append one recipient key and its box
    pub fn add_recipient(mut self, key: PublicKey, recipient_box: Vec<u8>) -> Self {
        self.recipient_keys.push(key);
        self.recipient_boxes.push(recipient_box);
        self
    }

    pub fn privacy_mode(mut self, mode: PrivacyMode) -> Self {
        self.privacy_mode = mode;
        self
    }

    pub fn affected_contract_transactions(
        mut self,
        affected: BTreeMap<TxHash, SecurityHash>,
    ) -> Self {
        self.affected_contract_transactions = affected;
        self
    }

    pub fn exec_hash(mut self, exec_hash: impl Into<Vec<u8>>) -> Self {
        self.exec_hash = exec_hash.into();
        self
    }

    /// Build the payload; the sender key is the only required field
    pub fn build(self) -> Result<EncodedPayload, CodecError> {
        Ok(EncodedPayload {
            sender_key: self.sender_key.ok_or(CodecError::MissingSender)?,
            cipher_text: self.cipher_text,
            cipher_text_nonce: self.cipher_text_nonce,
            recipient_boxes: self.recipient_boxes,
            recipient_nonce: self.recipient_nonce,
            recipient_keys: self.recipient_keys,
            privacy_mode: self.privacy_mode,
            affected_contract_transactions: self.affected_contract_transactions,
            exec_hash: self.exec_hash,
        })
    }
}

/// A resolved dependency of a transaction
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AffectedTransaction {
    hash: TxHash,
    payload: EncodedPayload,
}

impl AffectedTransaction {
    pub fn new(hash: TxHash, payload: EncodedPayload) -> Self {
        Self { hash, payload }
    }

    pub fn hash(&self) -> &TxHash {
        &self.hash
    }

    pub fn payload(&self) -> &EncodedPayload {
        &self.payload
    }
}

/// A pre-signed transaction encrypted for its sender only
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    encrypted_payload: Vec<u8>,
    encrypted_key: Vec<u8>,
    nonce: Nonce,
    from: PublicKey,
}

impl RawTransaction {
    pub fn new(encrypted_payload: Vec<u8>, encrypted_key: Vec<u8>, nonce: Nonce, from: PublicKey) -> Self {
        Self {
            encrypted_payload,
            encrypted_key,
            nonce,
            from,
        }
    }

    pub fn encrypted_payload(&self) -> &[u8] {
        &self.encrypted_payload
    }

    pub fn encrypted_key(&self) -> &[u8] {
        &self.encrypted_key
    }

    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    pub fn from(&self) -> &PublicKey {
        &self.from
    }

    /// Raw transactions are addressed by the hash of their cipher text too
    pub fn hash(&self) -> MessageHash {
        MessageHash::from_cipher_text(&self.encrypted_payload)
    }
}
