// Transaction Tests
// send / store / resend / receive through real enclaves and sled stores

mod send_test;
mod store_payload_test;

use privmesh::enclave::KeyStoreEnclave;
use privmesh::identity::{KeyPair, PublicKey};
use privmesh::payload::{EncodedPayload, PayloadEncoder, PrivacyMode, TxHash};
use privmesh::storage::MeshStore;
use privmesh::transaction::{MockPayloadPublisher, SendRequest, TransactionManager};
use std::sync::Arc;
use tempfile::TempDir;

/// A node with its own keys, store and recording publisher
pub struct TestNode {
    pub keys: Vec<KeyPair>,
    pub manager: TransactionManager,
    pub store: Arc<MeshStore>,
    pub publisher: Arc<MockPayloadPublisher>,
    pub enclave: Arc<KeyStoreEnclave>,
    _dir: TempDir,
}

impl TestNode {
    pub fn new(keys: Vec<KeyPair>) -> Self {
        Self::with_options(keys, MockPayloadPublisher::new(), true, vec![])
    }

    pub fn with_options(
        keys: Vec<KeyPair>,
        publisher: MockPayloadPublisher,
        enhanced_privacy: bool,
        forwarding: Vec<PublicKey>,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MeshStore::open(dir.path()).unwrap());
        let enclave = Arc::new(
            KeyStoreEnclave::new(keys.clone())
                .unwrap()
                .with_forwarding_keys(forwarding),
        );
        let publisher = Arc::new(publisher);
        let manager = TransactionManager::new(
            enclave.clone(),
            store.clone(),
            store.clone(),
            publisher.clone(),
            enhanced_privacy,
        );

        Self {
            keys,
            manager,
            store,
            publisher,
            enclave,
            _dir: dir,
        }
    }

    /// The node's default key
    pub fn key(&self) -> PublicKey {
        self.keys[0].public_key()
    }

    /// Send and return the fully stored payload
    pub async fn send(
        &self,
        message: &[u8],
        recipients: &[PublicKey],
        mode: PrivacyMode,
        affected: &[TxHash],
    ) -> EncodedPayload {
        let response = self
            .manager
            .send(SendRequest {
                sender: None,
                recipients: recipients.to_vec(),
                payload: message.to_vec(),
                privacy_mode: mode,
                affected_contract_transactions: affected.to_vec(),
                exec_hash: vec![],
            })
            .await
            .unwrap();
        self.stored(&response.hash).unwrap()
    }

    /// Decode the stored row for a hash
    pub fn stored(&self, hash: &TxHash) -> Option<EncodedPayload> {
        use privmesh::storage::TransactionStore;
        self.store
            .retrieve_by_hash(hash)
            .unwrap()
            .map(|row| PayloadEncoder::new().decode(&row.encoded_payload).unwrap())
    }

    /// The last payload published to a recipient, encoded for the wire
    pub fn last_published_bytes(&self, recipient: &PublicKey) -> Vec<u8> {
        let payload = self.publisher.published_to(recipient).pop().unwrap();
        PayloadEncoder::new().encode(&payload).unwrap()
    }
}

pub fn keys(n: usize) -> Vec<KeyPair> {
    (0..n).map(|_| KeyPair::generate()).collect()
}
