// KeyStoreEnclave - sealed-box enclave over X25519 + XChaCha20-Poly1305
//
// Every transaction gets a fresh master key. The message is encrypted once
// under the master key, and the master key is sealed once per recipient
// under a key derived from the sender/recipient X25519 shared secret.

use crate::enclave::{Enclave, EnclaveError};
use crate::identity::{KeyPair, PublicKey, KEY_LENGTH};
use crate::payload::{
    AffectedTransaction, EncodedPayload, Nonce, PrivacyMode, RawTransaction, SecurityHash, TxHash,
};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use sha3::{Digest, Sha3_256, Sha3_512};
use std::collections::{BTreeMap, BTreeSet};
use zeroize::Zeroizing;

/// Size of nonce in bytes (192 bits for XChaCha20)
pub const NONCE_SIZE: usize = 24;

type MasterKey = Zeroizing<[u8; KEY_LENGTH]>;

/// Enclave backed by key pairs held in memory
#[derive(Debug)]
pub struct KeyStoreEnclave {
    keys: BTreeMap<PublicKey, KeyPair>,
    default_key: PublicKey,
    forwarding_keys: BTreeSet<PublicKey>,
}

impl KeyStoreEnclave {
    /// Create an enclave; the first key pair becomes the default key.
    /// Returns `None` when no key pairs are given.
    pub fn new(keys: Vec<KeyPair>) -> Option<Self> {
        let default_key = keys.first()?.public_key();
        Some(Self {
            keys: keys.into_iter().map(|k| (k.public_key(), k)).collect(),
            default_key,
            forwarding_keys: BTreeSet::new(),
        })
    }

    pub fn with_forwarding_keys(mut self, keys: impl IntoIterator<Item = PublicKey>) -> Self {
        self.forwarding_keys = keys.into_iter().collect();
        self
    }

    fn key_pair(&self, key: &PublicKey) -> Result<&KeyPair, EnclaveError> {
        self.keys.get(key).ok_or(EnclaveError::KeyNotFound(*key))
    }

    /// Recover the master key from any box this enclave can open
    fn open_master_key(
        &self,
        payload: &EncodedPayload,
        recipient: Option<&PublicKey>,
    ) -> Result<MasterKey, EnclaveError> {
        if payload.recipient_boxes().is_empty() {
            return Err(EnclaveError::NoRecipientBox);
        }
        let sender = payload.sender_key();
        let sender_pair = self.keys.get(sender);

        for (index, sealed) in payload.recipient_boxes().iter().enumerate() {
            let box_key = payload.recipient_keys().get(index);
            if let (Some(wanted), Some(actual)) = (recipient, box_key) {
                if wanted != actual {
                    continue;
                }
            }

            let mut secrets = Vec::new();
            match box_key {
                Some(key) => {
                    if let Some(pair) = sender_pair {
                        secrets.push(pair.shared_secret(key));
                    }
                    if let Some(pair) = self.keys.get(key) {
                        secrets.push(pair.shared_secret(sender));
                    }
                }
                // recipient copy without keys: any of ours might open it
                None => match recipient {
                    Some(key) => secrets.push(self.key_pair(key)?.shared_secret(sender)),
                    None => secrets.extend(self.keys.values().map(|p| p.shared_secret(sender))),
                },
            }

            for secret in secrets {
                if let Ok(master) = open_box(&secret, payload.recipient_nonce(), sealed) {
                    return Ok(master);
                }
            }
        }

        Err(EnclaveError::DecryptionFailed)
    }

    fn security_hash(&self, affected: &AffectedTransaction) -> Result<SecurityHash, EnclaveError> {
        let master = self.open_master_key(affected.payload(), None)?;
        let digest = Sha3_512::new()
            .chain_update(affected.payload().cipher_text())
            .chain_update(master.as_slice())
            .finalize();
        Ok(SecurityHash::from_bytes(digest.to_vec()))
    }

    #[allow(clippy::too_many_arguments)]
    fn seal_for_recipients(
        &self,
        sender: &PublicKey,
        master: &MasterKey,
        cipher_text: Vec<u8>,
        cipher_text_nonce: Nonce,
        recipients: &[PublicKey],
        privacy_mode: PrivacyMode,
        affected: &[AffectedTransaction],
        exec_hash: &[u8],
    ) -> Result<EncodedPayload, EnclaveError> {
        let sender_pair = self.key_pair(sender)?;
        let recipient_nonce = random_nonce();

        let mut boxes = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let shared = sender_pair.shared_secret(recipient);
            boxes.push(seal(&box_key(&shared), &recipient_nonce, master.as_slice())?);
        }

        let mut affected_hashes = BTreeMap::new();
        for tx in affected {
            affected_hashes.insert(tx.hash().clone(), self.security_hash(tx)?);
        }

        EncodedPayload::builder()
            .sender_key(*sender)
            .cipher_text(cipher_text)
            .cipher_text_nonce(cipher_text_nonce)
            .recipient_keys(recipients.to_vec())
            .recipient_boxes(boxes)
            .recipient_nonce(recipient_nonce)
            .privacy_mode(privacy_mode)
            .affected_contract_transactions(affected_hashes)
            .exec_hash(exec_hash.to_vec())
            .build()
            .map_err(|e| EnclaveError::EncryptionFailed(e.to_string()))
    }
}

impl Enclave for KeyStoreEnclave {
    fn default_public_key(&self) -> PublicKey {
        self.default_key
    }

    fn public_keys(&self) -> BTreeSet<PublicKey> {
        self.keys.keys().copied().collect()
    }

    fn forwarding_keys(&self) -> BTreeSet<PublicKey> {
        self.forwarding_keys.clone()
    }

    fn encrypt_payload(
        &self,
        message: &[u8],
        sender: &PublicKey,
        recipients: &[PublicKey],
        privacy_mode: PrivacyMode,
        affected: &[AffectedTransaction],
        exec_hash: &[u8],
    ) -> Result<EncodedPayload, EnclaveError> {
        let master = random_master_key();
        let cipher_text_nonce = random_nonce();
        let cipher_text = seal(&master, &cipher_text_nonce, message)?;

        self.seal_for_recipients(
            sender,
            &master,
            cipher_text,
            cipher_text_nonce,
            recipients,
            privacy_mode,
            affected,
            exec_hash,
        )
    }

    fn encrypt_payload_from_raw(
        &self,
        raw: &RawTransaction,
        recipients: &[PublicKey],
        privacy_mode: PrivacyMode,
        affected: &[AffectedTransaction],
        exec_hash: &[u8],
    ) -> Result<EncodedPayload, EnclaveError> {
        let sender_pair = self.key_pair(raw.from())?;
        let shared = sender_pair.shared_secret(raw.from());
        let master = open_box(&shared, raw.nonce(), raw.encrypted_key())?;

        self.seal_for_recipients(
            raw.from(),
            &master,
            raw.encrypted_payload().to_vec(),
            raw.nonce().clone(),
            recipients,
            privacy_mode,
            affected,
            exec_hash,
        )
    }

    fn encrypt_raw_payload(&self, message: &[u8], sender: &PublicKey) -> Result<RawTransaction, EnclaveError> {
        let sender_pair = self.key_pair(sender)?;
        let master = random_master_key();
        let nonce = random_nonce();

        let encrypted_payload = seal(&master, &nonce, message)?;
        let shared = sender_pair.shared_secret(sender);
        let encrypted_key = seal(&box_key(&shared), &nonce, master.as_slice())?;

        Ok(RawTransaction::new(encrypted_payload, encrypted_key, nonce, *sender))
    }

    fn unencrypt_raw_payload(&self, raw: &RawTransaction) -> Result<Vec<u8>, EnclaveError> {
        let shared = self.key_pair(raw.from())?.shared_secret(raw.from());
        let master = open_box(&shared, raw.nonce(), raw.encrypted_key())?;
        open(&master, raw.nonce(), raw.encrypted_payload())
    }

    fn unencrypt_transaction(
        &self,
        payload: &EncodedPayload,
        recipient: Option<&PublicKey>,
    ) -> Result<Vec<u8>, EnclaveError> {
        let master = self.open_master_key(payload, recipient)?;
        open(&master, payload.cipher_text_nonce(), payload.cipher_text())
    }

    fn create_new_recipient_box(
        &self,
        payload: &EncodedPayload,
        recipient: &PublicKey,
    ) -> Result<Vec<u8>, EnclaveError> {
        let sender_pair = self.key_pair(payload.sender_key())?;
        let master = self.open_master_key(payload, None)?;
        let shared = sender_pair.shared_secret(recipient);
        seal(&box_key(&shared), payload.recipient_nonce(), master.as_slice())
    }

    fn find_invalid_security_hashes(
        &self,
        payload: &EncodedPayload,
        affected: &[AffectedTransaction],
    ) -> BTreeSet<TxHash> {
        affected
            .iter()
            .filter(|tx| {
                let claimed = payload.affected_contract_transactions().get(tx.hash());
                match (claimed, self.security_hash(tx)) {
                    (Some(claimed), Ok(computed)) => claimed != &computed,
                    _ => true,
                }
            })
            .map(|tx| tx.hash().clone())
            .collect()
    }
}

fn random_master_key() -> MasterKey {
    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    OsRng.fill_bytes(key.as_mut_slice());
    key
}

fn random_nonce() -> Nonce {
    let mut bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut bytes);
    Nonce::from_bytes(bytes.to_vec())
}

/// Derive the symmetric box key from an X25519 shared secret
fn box_key(shared: &[u8; KEY_LENGTH]) -> MasterKey {
    let digest = Sha3_256::new()
        .chain_update(b"privmesh:box:")
        .chain_update(shared)
        .finalize();
    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    key.copy_from_slice(&digest);
    key
}

fn open_box(shared: &[u8; KEY_LENGTH], nonce: &Nonce, sealed: &[u8]) -> Result<MasterKey, EnclaveError> {
    let plain = Zeroizing::new(open(&box_key(shared), nonce, sealed)?);
    let bytes: [u8; KEY_LENGTH] = plain
        .as_slice()
        .try_into()
        .map_err(|_| EnclaveError::DecryptionFailed)?;
    Ok(Zeroizing::new(bytes))
}

fn cipher(key: &[u8; KEY_LENGTH], nonce: &Nonce) -> Result<(XChaCha20Poly1305, XNonce), EnclaveError> {
    if nonce.as_bytes().len() != NONCE_SIZE {
        return Err(EnclaveError::InvalidNonce(nonce.as_bytes().len()));
    }
    let aead = XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| EnclaveError::EncryptionFailed(e.to_string()))?;
    Ok((aead, *XNonce::from_slice(nonce.as_bytes())))
}

fn seal(key: &[u8; KEY_LENGTH], nonce: &Nonce, plaintext: &[u8]) -> Result<Vec<u8>, EnclaveError> {
    let (aead, nonce) = cipher(key, nonce)?;
    aead.encrypt(&nonce, plaintext)
        .map_err(|e| EnclaveError::EncryptionFailed(e.to_string()))
}

fn open(key: &[u8; KEY_LENGTH], nonce: &Nonce, sealed: &[u8]) -> Result<Vec<u8>, EnclaveError> {
    let (aead, nonce) = cipher(key, nonce)?;
    aead.decrypt(&nonce, sealed)
        .map_err(|_| EnclaveError::DecryptionFailed)
}
