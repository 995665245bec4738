// privmesh - privacy transaction node
//
// Holds sealed transaction payloads, distributes them to the nodes entitled
// to read them, reconciles its own transactions as they are echoed back,
// and gossips a directory of peer nodes and the keys they host.

pub mod config;
pub mod enclave;
pub mod identity;
pub mod p2p;
pub mod payload;
pub mod privacy;
pub mod storage;
pub mod sync;
pub mod transaction;

pub use config::{ConfigError, NodeConfig};
pub use enclave::{Enclave, KeyStoreEnclave};
pub use identity::{KeyPair, PublicKey};
pub use payload::{EncodedPayload, MessageHash, PayloadEncoder, PrivacyMode};
pub use storage::MeshStore;
pub use sync::{GossipPoller, PeerDirectory};
pub use transaction::{TransactionError, TransactionManager};
