// Client Tests
// HttpP2pClient against nodes served on local ports

use crate::{bind, dead_url, serve_on, TestNode};
use privmesh::identity::KeyPair;
use privmesh::p2p::HttpP2pClient;
use privmesh::payload::PrivacyMode;
use privmesh::sync::{
    DirectoryConfig, GossipError, GossipPoller, P2pClient, PartyInfo, PeerDirectory, Recipient,
};
use privmesh::transaction::{
    PayloadPublisher, PublishError, ReceiveRequest, SendRequest,
};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

/// A node that publishes over HTTP, knowing `peer_key` lives at `peer_url`
fn http_node(peer_key: privmesh::identity::PublicKey, peer_url: &str) -> TestNode {
    let peer_url = peer_url.to_string();
    TestNode::build(DirectoryConfig::new("http://127.0.0.1:1/"), true, move |directory| {
        directory
            .store(&PartyInfo::new(&peer_url, vec![Recipient::new(peer_key, &peer_url)], vec![]))
            .unwrap();
        Arc::new(HttpP2pClient::new(directory, TIMEOUT).unwrap())
    })
}

#[tokio::test]
async fn test_send_is_delivered_to_remote_node() {
    let (listener, b_url) = bind().await;
    let b = TestNode::new(&b_url, true);
    serve_on(listener, &b);

    let a = http_node(b.key(), &b_url);
    let response = a
        .state
        .manager
        .send(SendRequest {
            recipients: vec![b.key()],
            payload: b"over the wire".to_vec(),
            privacy_mode: PrivacyMode::StandardPrivate,
            ..Default::default()
        })
        .await
        .unwrap();

    assert!(response.is_fully_published());
    let received = b
        .state
        .manager
        .receive(ReceiveRequest {
            hash: response.hash,
            to: None,
            raw: false,
        })
        .unwrap();
    assert_eq!(received.payload, b"over the wire");
}

#[tokio::test]
async fn test_offline_recipient_is_reported() {
    let offline_url = dead_url().await;
    let offline_key = KeyPair::generate().public_key();
    let a = http_node(offline_key, &offline_url);

    let response = a
        .state
        .manager
        .send(SendRequest {
            recipients: vec![offline_key],
            payload: b"nobody home".to_vec(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(response.failures.len(), 1);
    assert_eq!(
        response.failures[0].error,
        PublishError::NodeOffline(offline_url)
    );
}

#[tokio::test]
async fn test_publish_to_unknown_key() {
    let directory = Arc::new(PeerDirectory::new(DirectoryConfig::new("http://127.0.0.1:1"), vec![]));
    let client = HttpP2pClient::new(directory, TIMEOUT).unwrap();
    let stranger = KeyPair::generate().public_key();

    let sender = TestNode::new("http://127.0.0.1:2", true);
    let payload = privmesh::payload::EncodedPayload::builder()
        .sender_key(sender.key())
        .build()
        .unwrap();

    assert_eq!(
        client.publish_payload(&payload, &stranger).await,
        Err(PublishError::KeyNotFound(stranger))
    );
}

#[tokio::test]
async fn test_party_info_round_trip() {
    let (listener, b_url) = bind().await;
    let b = TestNode::new(&b_url, true);
    serve_on(listener, &b);

    let a_key = KeyPair::generate().public_key();
    let a_url = "http://127.0.0.1:3/";
    let ours = PartyInfo::new(a_url, vec![Recipient::new(a_key, a_url)], vec![]);

    let directory = Arc::new(PeerDirectory::new(DirectoryConfig::new(a_url), vec![a_key]));
    let client = HttpP2pClient::new(directory, TIMEOUT).unwrap();
    let bytes = client.get_party_info(&b_url, &ours.to_bytes().unwrap()).await.unwrap();

    let theirs = PartyInfo::from_bytes(&bytes).unwrap();
    assert_eq!(theirs.url, b_url);
    assert_eq!(theirs.keys_at(&b_url), vec![b.key()]);
    assert_eq!(b.state.directory.find_recipient_by_public_key(&a_key).unwrap().url, a_url);
}

#[tokio::test]
async fn test_party_info_to_dead_peer_is_unreachable() {
    let url = dead_url().await;
    let directory = Arc::new(PeerDirectory::new(DirectoryConfig::new("http://127.0.0.1:1"), vec![]));
    let client = HttpP2pClient::new(directory.clone(), TIMEOUT).unwrap();
    let snapshot = directory.snapshot().to_bytes().unwrap();

    assert_eq!(
        client.get_party_info(&url, &snapshot).await,
        Err(GossipError::Unreachable(url))
    );
}

#[tokio::test]
async fn test_gossip_between_live_nodes() {
    let (listener, b_url) = bind().await;
    let b = TestNode::new(&b_url, true);
    serve_on(listener, &b);

    let a_key = KeyPair::generate().public_key();
    let config = DirectoryConfig::new("http://127.0.0.1:4/").with_peers([b_url.as_str()]);
    let directory = Arc::new(PeerDirectory::new(config, vec![a_key]));
    let client = Arc::new(HttpP2pClient::new(directory.clone(), TIMEOUT).unwrap());
    let poller = GossipPoller::new(directory.clone(), client);

    let stats = poller.run_once().await.unwrap();

    assert_eq!(stats.contacted, 1);
    assert_eq!(directory.find_recipient_by_public_key(&b.key()).unwrap().url, b_url);
    assert!(b.state.directory.find_recipient_by_public_key(&a_key).is_ok());
}
