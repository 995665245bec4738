// Store Payload Tests
// Inbound payloads pushed by peers: affected transaction checks and storage

use crate::{keys, TestNode};
use privmesh::payload::{EncodedPayload, MessageHash, PayloadEncoder, PrivacyMode, SecurityHash};
use privmesh::privacy::PrivacyError;
use privmesh::storage::TransactionStore;
use privmesh::transaction::{ReceiveRequest, TransactionError};

fn tamper(bytes: &[u8], edit: impl FnOnce(EncodedPayload) -> EncodedPayload) -> Vec<u8> {
    let encoder = PayloadEncoder::new();
    let payload = encoder.decode(bytes).unwrap();
    encoder.encode(&edit(payload)).unwrap()
}

fn receive(node: &TestNode, hash: &MessageHash) -> Result<Vec<u8>, TransactionError> {
    node.manager
        .receive(ReceiveRequest {
            hash: hash.clone(),
            to: None,
            raw: false,
        })
        .map(|r| r.payload)
}

/// A sends U to B (and whoever else), B stores it, returns U's hash
async fn deliver(a: &TestNode, b: &TestNode, recipients: &[privmesh::identity::PublicKey], mode: PrivacyMode) -> MessageHash {
    let u = a.send(b"U", recipients, mode, &[]).await;
    b.manager.store_payload(&a.last_published_bytes(&b.key())).unwrap();
    u.hash()
}

// ============================================================================
// PLAIN STORAGE
// ============================================================================

#[tokio::test]
async fn test_stored_payload_can_be_received() {
    let a = TestNode::new(keys(1));
    let b = TestNode::new(keys(1));

    let sent = a.send(b"hello B", &[b.key()], PrivacyMode::StandardPrivate, &[]).await;
    let hash = b.manager.store_payload(&a.last_published_bytes(&b.key())).unwrap();

    assert_eq!(hash, sent.hash());
    assert_eq!(receive(&b, &hash).unwrap(), b"hello B");
}

#[tokio::test]
async fn test_storing_twice_is_idempotent() {
    let a = TestNode::new(keys(1));
    let b = TestNode::new(keys(1));

    a.send(b"M", &[b.key()], PrivacyMode::StandardPrivate, &[]).await;
    let bytes = a.last_published_bytes(&b.key());

    let first = b.manager.store_payload(&bytes).unwrap();
    let second = b.manager.store_payload(&bytes).unwrap();

    assert_eq!(first, second);
    assert_eq!(b.store.transaction_count().unwrap(), 1);
}

#[tokio::test]
async fn test_garbage_is_rejected() {
    let b = TestNode::new(keys(1));
    let result = b.manager.store_payload(b"definitely not a payload");
    assert!(matches!(result, Err(TransactionError::Codec(_))));
}

// ============================================================================
// PARTY PROTECTION
// ============================================================================

#[tokio::test]
async fn test_party_protection_with_known_affected() {
    let a = TestNode::new(keys(1));
    let b = TestNode::new(keys(1));

    let u = deliver(&a, &b, &[b.key()], PrivacyMode::PartyProtection).await;
    let t = a.send(b"T", &[b.key()], PrivacyMode::PartyProtection, &[u.clone()]).await;
    b.manager.store_payload(&a.last_published_bytes(&b.key())).unwrap();

    let stored = b.stored(&t.hash()).unwrap();
    assert!(stored.affected_contract_transactions().contains_key(&u));
}

#[tokio::test]
async fn test_mode_mismatch_is_dropped_silently() {
    let a = TestNode::new(keys(1));
    let b = TestNode::new(keys(1));

    let u = deliver(&a, &b, &[b.key()], PrivacyMode::PartyProtection).await;
    let t = a.send(b"T", &[b.key()], PrivacyMode::StandardPrivate, &[u]).await;

    let hash = b.manager.store_payload(&a.last_published_bytes(&b.key())).unwrap();

    assert_eq!(hash, t.hash());
    assert!(b.stored(&hash).is_none());
    assert!(matches!(receive(&b, &hash), Err(TransactionError::TransactionNotFound(_))));
}

#[tokio::test]
async fn test_forged_security_hash_is_pruned() {
    let a = TestNode::new(keys(1));
    let b = TestNode::new(keys(1));

    let u = deliver(&a, &b, &[b.key()], PrivacyMode::PartyProtection).await;
    let t = a.send(b"T", &[b.key()], PrivacyMode::PartyProtection, &[u.clone()]).await;

    let forged = tamper(&a.last_published_bytes(&b.key()), |p| {
        let mut affected = p.affected_contract_transactions().clone();
        affected.insert(u.clone(), SecurityHash::from_bytes(vec![0u8; 64]));
        p.to_builder().affected_contract_transactions(affected).build().unwrap()
    });
    b.manager.store_payload(&forged).unwrap();

    let stored = b.stored(&t.hash()).unwrap();
    assert!(stored.affected_contract_transactions().is_empty());
    assert_eq!(receive(&b, &t.hash()).unwrap(), b"T");
}

#[tokio::test]
async fn test_unknown_affected_is_tolerated() {
    let a = TestNode::new(keys(1));
    let b = TestNode::new(keys(1));
    let c = TestNode::new(keys(1));

    // U only ever reaches C
    let u = a.send(b"U", &[c.key()], PrivacyMode::PartyProtection, &[]).await;
    let t = a.send(b"T", &[b.key()], PrivacyMode::PartyProtection, &[u.hash()]).await;

    b.manager.store_payload(&a.last_published_bytes(&b.key())).unwrap();
    assert!(b.stored(&t.hash()).is_some());
}

#[tokio::test]
async fn test_enhanced_payload_rejected_when_disabled() {
    let a = TestNode::new(keys(1));
    let b = TestNode::with_options(
        keys(1),
        privmesh::transaction::MockPayloadPublisher::new(),
        false,
        vec![],
    );

    a.send(b"M", &[b.key()], PrivacyMode::PartyProtection, &[]).await;
    let result = b.manager.store_payload(&a.last_published_bytes(&b.key()));

    assert!(matches!(
        result,
        Err(TransactionError::Privacy(PrivacyError::EnhancedPrivacyNotSupported(_)))
    ));
}

// ============================================================================
// PRIVATE STATE VALIDATION
// ============================================================================

#[tokio::test]
async fn test_psv_with_consistent_affected_is_stored() {
    let a = TestNode::new(keys(1));
    let b = TestNode::new(keys(1));
    let c = keys(1).remove(0).public_key();

    let u = deliver(&a, &b, &[b.key(), c], PrivacyMode::PrivateStateValidation).await;
    let t = a
        .send(b"T", &[b.key(), c], PrivacyMode::PrivateStateValidation, &[u])
        .await;
    b.manager.store_payload(&a.last_published_bytes(&b.key())).unwrap();

    let stored = b.stored(&t.hash()).unwrap();
    assert_eq!(stored.recipient_keys()[0], b.key());
    assert_eq!(stored.participants(), t.participants());
}

#[tokio::test]
async fn test_psv_invalid_security_hash_is_an_error() {
    let a = TestNode::new(keys(1));
    let b = TestNode::new(keys(1));

    let u = deliver(&a, &b, &[b.key()], PrivacyMode::PrivateStateValidation).await;
    let t = a
        .send(b"T", &[b.key()], PrivacyMode::PrivateStateValidation, &[u.clone()])
        .await;

    let forged = tamper(&a.last_published_bytes(&b.key()), |p| {
        let mut affected = p.affected_contract_transactions().clone();
        affected.insert(u.clone(), SecurityHash::from_bytes(vec![1u8; 64]));
        p.to_builder().affected_contract_transactions(affected).build().unwrap()
    });

    match b.manager.store_payload(&forged) {
        Err(TransactionError::Privacy(PrivacyError::PrivacyViolation(msg))) => {
            assert_eq!(
                msg,
                format!(
                    "Invalid security hashes identified for PSC TX {}. Invalid ACOTHs: {}",
                    t.hash(),
                    u.to_base64()
                )
            );
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(b.stored(&t.hash()).is_none());
}

#[tokio::test]
async fn test_psv_participant_mismatch_is_an_error() {
    let a = TestNode::new(keys(1));
    let b = TestNode::new(keys(1));
    let d = keys(1).remove(0).public_key();

    let u = deliver(&a, &b, &[b.key()], PrivacyMode::PrivateStateValidation).await;
    a.send(b"T", &[b.key()], PrivacyMode::PrivateStateValidation, &[u.clone()])
        .await;

    let widened = tamper(&a.last_published_bytes(&b.key()), |p| {
        let mut keys = p.recipient_keys().to_vec();
        keys.push(d);
        p.to_builder().recipient_keys(keys).build().unwrap()
    });

    match b.manager.store_payload(&widened) {
        Err(TransactionError::Privacy(PrivacyError::PrivacyViolation(msg))) => {
            assert_eq!(msg, format!("Recipients mismatched for Affected Txn {}", u));
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_psv_sender_outside_affected_is_dropped() {
    let a = TestNode::new(keys(1));
    let b = TestNode::new(keys(1));
    let impostor = keys(1).remove(0).public_key();

    let u = deliver(&a, &b, &[b.key()], PrivacyMode::PrivateStateValidation).await;
    let t = a
        .send(b"T", &[b.key()], PrivacyMode::PrivateStateValidation, &[u])
        .await;

    let spoofed = tamper(&a.last_published_bytes(&b.key()), |p| {
        p.to_builder().sender_key(impostor).build().unwrap()
    });

    let hash = b.manager.store_payload(&spoofed).unwrap();
    assert_eq!(hash, t.hash());
    assert!(b.stored(&hash).is_none());
}

#[tokio::test]
async fn test_psv_with_missing_affected_is_dropped() {
    let a = TestNode::new(keys(1));
    let b = TestNode::new(keys(1));

    // B never stores U
    let u = a.send(b"U", &[b.key()], PrivacyMode::PrivateStateValidation, &[]).await;
    let t = a
        .send(b"T", &[b.key()], PrivacyMode::PrivateStateValidation, &[u.hash()])
        .await;

    b.manager.store_payload(&a.last_published_bytes(&b.key())).unwrap();
    assert!(b.stored(&t.hash()).is_none());
}
