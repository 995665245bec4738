use crate::identity::PublicKey;
use crate::payload::{EncodedPayload, PrivacyMode};
use thiserror::Error;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Failed to encode payload: {0}")]
    EncodeError(String),

    #[error("Failed to decode payload: {0}")]
    DecodeError(String),

    #[error("Recipient {0} is not a recipient of this payload")]
    InvalidRecipient(PublicKey),

    #[error("Payload has no sender key")]
    MissingSender,
}

/// Codec for serializing payloads and reshaping their recipient lists
#[derive(Clone, Copy, Debug, Default)]
pub struct PayloadEncoder;

impl PayloadEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode a payload to binary bytes (postcard)
    pub fn encode(&self, payload: &EncodedPayload) -> Result<Vec<u8>, CodecError> {
        postcard::to_allocvec(payload).map_err(|e| CodecError::EncodeError(e.to_string()))
    }

    /// Decode a payload from binary bytes
    pub fn decode(&self, bytes: &[u8]) -> Result<EncodedPayload, CodecError> {
        postcard::from_bytes(bytes).map_err(|e| CodecError::DecodeError(e.to_string()))
    }

    /// Prune a payload down to the box of a single recipient
    ///
    /// Private state validation payloads keep every recipient key, with the
    /// target moved to the front, so the receiver can still check the full
    /// participant set. Other modes keep only the target key.
    pub fn for_recipient(
        &self,
        payload: &EncodedPayload,
        recipient: &PublicKey,
    ) -> Result<EncodedPayload, CodecError> {
        let index = payload
            .recipient_index(recipient)
            .ok_or(CodecError::InvalidRecipient(*recipient))?;
        let recipient_box = payload
            .recipient_boxes()
            .get(index)
            .cloned()
            .ok_or(CodecError::InvalidRecipient(*recipient))?;

        let keys = if payload.privacy_mode() == PrivacyMode::PrivateStateValidation {
            std::iter::once(*recipient)
                .chain(payload.recipient_keys().iter().copied().filter(|k| k != recipient))
                .collect()
        } else {
            vec![*recipient]
        };

        payload
            .to_builder()
            .recipient_keys(keys)
            .recipient_boxes(vec![recipient_box])
            .build()
    }

    /// Attach a recipient key to a payload without touching the other entries
    ///
    /// Used on copies that carry a box but no key (as stored by a recipient):
    /// the key is appended so it lines up with the box it opens.
    pub fn with_recipient(
        &self,
        payload: &EncodedPayload,
        recipient: &PublicKey,
    ) -> Result<EncodedPayload, CodecError> {
        if payload.recipient_keys().contains(recipient) {
            return Ok(payload.clone());
        }

        let mut keys = payload.recipient_keys().to_vec();
        keys.push(*recipient);

        payload.to_builder().recipient_keys(keys).build()
    }
}
