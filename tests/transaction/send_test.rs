// Send Tests
// Encryption, persistence and per-recipient publishing of new transactions

use crate::{keys, TestNode};
use privmesh::enclave::Enclave;
use privmesh::privacy::PrivacyError;
use privmesh::storage::TransactionStore;
use privmesh::transaction::{
    MockPayloadPublisher, PublishError, SendRequest, SendSignedRequest, TransactionError,
};
use privmesh::payload::{MessageHash, PrivacyMode};

// ============================================================================
// BASIC SEND
// ============================================================================

#[tokio::test]
async fn test_send_stores_full_payload_keyed_by_cipher_text_hash() {
    let node = TestNode::new(keys(1));
    let [b, c] = [keys(1).remove(0).public_key(), keys(1).remove(0).public_key()];

    let stored = node.send(b"M", &[b, c], PrivacyMode::StandardPrivate, &[]).await;

    assert_eq!(stored.hash(), MessageHash::from_cipher_text(stored.cipher_text()));
    assert_eq!(stored.recipient_keys(), &[b, c, node.key()]);
    assert_eq!(stored.recipient_boxes().len(), 3);
    assert_eq!(node.store.transaction_count().unwrap(), 1);
}

#[tokio::test]
async fn test_send_publishes_pruned_copy_to_each_recipient() {
    let node = TestNode::new(keys(1));
    let b = keys(1).remove(0);
    let c = keys(1).remove(0);

    node.send(b"M", &[b.public_key(), c.public_key()], PrivacyMode::StandardPrivate, &[])
        .await;

    for recipient in [&b, &c] {
        let published = node.publisher.published_to(&recipient.public_key());
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].recipient_keys(), &[recipient.public_key()]);
        assert_eq!(published[0].recipient_boxes().len(), 1);

        let receiver = TestNode::new(vec![recipient.clone()]);
        let message = receiver.enclave.unencrypt_transaction(&published[0], None).unwrap();
        assert_eq!(message, b"M");
    }
}

#[tokio::test]
async fn test_send_uses_explicit_sender() {
    let own = keys(2);
    let second = own[1].public_key();
    let node = TestNode::new(own);
    let b = keys(1).remove(0).public_key();

    let response = node
        .manager
        .send(SendRequest {
            sender: Some(second),
            recipients: vec![b],
            payload: b"from second".to_vec(),
            ..Default::default()
        })
        .await
        .unwrap();

    let stored = node.stored(&response.hash).unwrap();
    assert_eq!(stored.sender_key(), &second);
    assert_eq!(stored.recipient_keys(), &[b, second]);
}

#[tokio::test]
async fn test_send_never_publishes_to_own_keys() {
    let own = keys(2);
    let other_own = own[1].public_key();
    let node = TestNode::new(own);
    let b = keys(1).remove(0).public_key();

    node.send(b"M", &[other_own, b], PrivacyMode::StandardPrivate, &[]).await;

    assert_eq!(node.publisher.call_count(), 1);
    assert_eq!(node.publisher.published_to(&b).len(), 1);
    assert!(node.publisher.published_to(&other_own).is_empty());
}

#[tokio::test]
async fn test_send_copies_forwarding_keys() {
    let forward = keys(1).remove(0).public_key();
    let node = TestNode::with_options(keys(1), MockPayloadPublisher::new(), true, vec![forward]);
    let b = keys(1).remove(0).public_key();

    let stored = node.send(b"M", &[b], PrivacyMode::StandardPrivate, &[]).await;

    assert_eq!(stored.recipient_keys(), &[b, forward, node.key()]);
    assert_eq!(node.publisher.published_to(&forward).len(), 1);
}

#[tokio::test]
async fn test_duplicate_recipients_are_collapsed() {
    let node = TestNode::new(keys(1));
    let b = keys(1).remove(0).public_key();

    let stored = node.send(b"M", &[b, b, node.key()], PrivacyMode::StandardPrivate, &[]).await;

    assert_eq!(stored.recipient_keys(), &[b, node.key()]);
    assert_eq!(node.publisher.call_count(), 1);
}

// ============================================================================
// PUBLISH FAILURES
// ============================================================================

#[tokio::test]
async fn test_offline_recipient_does_not_stop_others() {
    let b = keys(1).remove(0).public_key();
    let c = keys(1).remove(0).public_key();
    let node = TestNode::with_options(keys(1), MockPayloadPublisher::new().with_offline(b), true, vec![]);

    let response = node
        .manager
        .send(SendRequest {
            recipients: vec![b, c],
            payload: b"M".to_vec(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(node.stored(&response.hash).is_some());
    assert_eq!(node.publisher.published_to(&c).len(), 1);
    assert!(node.publisher.published_to(&b).is_empty());

    assert_eq!(response.failures.len(), 1);
    assert_eq!(response.failures[0].recipient, b);
    assert!(matches!(response.failures[0].error, PublishError::NodeOffline(_)));
    assert!(!response.is_fully_published());
}

#[tokio::test]
async fn test_slow_recipients_are_published_concurrently() {
    let recipients: Vec<_> = keys(5).iter().map(|k| k.public_key()).collect();
    let node = TestNode::with_options(keys(1), MockPayloadPublisher::new().with_delay_ms(200), true, vec![]);

    let started = std::time::Instant::now();
    node.send(b"M", &recipients, PrivacyMode::StandardPrivate, &[]).await;

    assert_eq!(node.publisher.call_count(), 5);
    assert!(started.elapsed() < std::time::Duration::from_millis(900));
}

#[tokio::test]
async fn test_every_failure_is_reported() {
    let b = keys(1).remove(0).public_key();
    let c = keys(1).remove(0).public_key();
    let publisher = MockPayloadPublisher::new().with_offline(b).with_failure(c);
    let node = TestNode::with_options(keys(1), publisher, true, vec![]);

    let response = node
        .manager
        .send(SendRequest {
            recipients: vec![b, c],
            payload: b"M".to_vec(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(response.failures.len(), 2);
    assert!(node.stored(&response.hash).is_some());
}

// ============================================================================
// PRIVACY CHECKS ON SEND
// ============================================================================

#[tokio::test]
async fn test_unknown_affected_transaction_fails_before_storing() {
    let node = TestNode::new(keys(1));
    let missing = MessageHash::from_cipher_text(b"never stored");

    let result = node
        .manager
        .send(SendRequest {
            recipients: vec![keys(1).remove(0).public_key()],
            payload: b"M".to_vec(),
            privacy_mode: PrivacyMode::PartyProtection,
            affected_contract_transactions: vec![missing.clone()],
            ..Default::default()
        })
        .await;

    match result {
        Err(TransactionError::Privacy(PrivacyError::PrivacyViolation(msg))) => {
            assert_eq!(msg, format!("Unable to find affectedContractTransaction {}", missing));
        }
        other => panic!("unexpected result: {:?}", other.map(|r| r.hash)),
    }
    assert_eq!(node.store.transaction_count().unwrap(), 0);
    assert_eq!(node.publisher.call_count(), 0);
}

#[tokio::test]
async fn test_psv_recipients_mismatch_names_affected_transaction() {
    let node = TestNode::new(keys(1));
    let x = keys(1).remove(0).public_key();
    let y = keys(1).remove(0).public_key();

    let u = node.send(b"U", &[x, y], PrivacyMode::PrivateStateValidation, &[]).await;

    let result = node
        .manager
        .send(SendRequest {
            recipients: vec![x],
            payload: b"T".to_vec(),
            privacy_mode: PrivacyMode::PrivateStateValidation,
            affected_contract_transactions: vec![u.hash()],
            ..Default::default()
        })
        .await;

    match result {
        Err(TransactionError::Privacy(PrivacyError::PrivacyViolation(msg))) => {
            assert_eq!(msg, format!("Recipients mismatched for Affected Txn {}", u.hash()));
        }
        other => panic!("unexpected result: {:?}", other.map(|r| r.hash)),
    }
    assert_eq!(node.store.transaction_count().unwrap(), 1);
}

#[tokio::test]
async fn test_psv_with_matching_recipients_succeeds() {
    let node = TestNode::new(keys(1));
    let x = keys(1).remove(0).public_key();
    let y = keys(1).remove(0).public_key();

    let u = node.send(b"U", &[x, y], PrivacyMode::PrivateStateValidation, &[]).await;
    let t = node
        .send(b"T", &[y, x], PrivacyMode::PrivateStateValidation, &[u.hash()])
        .await;

    assert!(t.affected_contract_transactions().contains_key(&u.hash()));
}

#[tokio::test]
async fn test_psv_on_non_psv_affected_is_flag_mismatch() {
    let node = TestNode::new(keys(1));
    let x = keys(1).remove(0).public_key();

    let u = node.send(b"U", &[x], PrivacyMode::PartyProtection, &[]).await;

    let result = node
        .manager
        .send(SendRequest {
            recipients: vec![x],
            payload: b"T".to_vec(),
            privacy_mode: PrivacyMode::PrivateStateValidation,
            affected_contract_transactions: vec![u.hash()],
            ..Default::default()
        })
        .await;

    match result {
        Err(TransactionError::Privacy(PrivacyError::PrivacyViolation(msg))) => {
            assert_eq!(
                msg,
                format!("Private state validation flag mismatched with Affected Txn {}", u.hash())
            );
        }
        other => panic!("unexpected result: {:?}", other.map(|r| r.hash)),
    }
}

#[tokio::test]
async fn test_enhanced_modes_rejected_when_disabled() {
    let node = TestNode::with_options(keys(1), MockPayloadPublisher::new(), false, vec![]);

    for mode in [PrivacyMode::PartyProtection, PrivacyMode::PrivateStateValidation] {
        let result = node
            .manager
            .send(SendRequest {
                recipients: vec![keys(1).remove(0).public_key()],
                payload: b"M".to_vec(),
                privacy_mode: mode,
                ..Default::default()
            })
            .await;

        assert!(matches!(
            result,
            Err(TransactionError::Privacy(PrivacyError::EnhancedPrivacyNotSupported(_)))
        ));
    }
    assert_eq!(node.store.transaction_count().unwrap(), 0);
}

// ============================================================================
// PRE-SIGNED (RAW) TRANSACTIONS
// ============================================================================

#[tokio::test]
async fn test_send_signed_distributes_raw_transaction() {
    let node = TestNode::new(keys(1));
    let b = keys(1).remove(0);

    let raw_hash = node.manager.store_raw(b"signed", None).unwrap();
    let response = node
        .manager
        .send_signed(SendSignedRequest {
            hash: raw_hash.clone(),
            recipients: vec![b.public_key()],
            privacy_mode: PrivacyMode::StandardPrivate,
            affected_contract_transactions: vec![],
            exec_hash: vec![],
        })
        .await
        .unwrap();

    assert_eq!(response.hash, raw_hash);
    let published = node.publisher.published_to(&b.public_key());
    let receiver = TestNode::new(vec![b]);
    assert_eq!(
        receiver.enclave.unencrypt_transaction(&published[0], None).unwrap(),
        b"signed"
    );
}

#[tokio::test]
async fn test_send_signed_unknown_hash() {
    let node = TestNode::new(keys(1));
    let hash = MessageHash::from_cipher_text(b"nothing");

    let result = node
        .manager
        .send_signed(SendSignedRequest {
            hash: hash.clone(),
            recipients: vec![],
            privacy_mode: PrivacyMode::StandardPrivate,
            affected_contract_transactions: vec![],
            exec_hash: vec![],
        })
        .await;

    assert!(matches!(result, Err(TransactionError::TransactionNotFound(h)) if h == hash));
}
