// Sync module - HOW NODES FIND EACH OTHER
// Peer directory, party info wire model and the gossip poller

mod directory;
mod poller;
mod protocol;

pub use directory::{DirectoryConfig, DirectoryError, PeerDirectory};
pub use poller::{GossipError, GossipPoller, MockP2pClient, P2pClient, RoundStats, DEFAULT_POLL_INTERVAL};
pub use protocol::{normalize_url, Party, PartyInfo, ProtocolError, Recipient};
