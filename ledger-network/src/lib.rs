use std::collections::HashMap;

use ledger_proto::block_chain_client::BlockChainClient;
use ledger_proto::HandshakeMessage;
use parking_lot::RwLock;
use tonic::transport::Channel;
use tracing::debug;

pub type PeerClient = BlockChainClient<Channel>;

#[derive(Clone)]
pub struct PeerEntry {
    pub client: PeerClient,
    pub handshake: HandshakeMessage,
}

// keyed by the peer's advertised listen address
#[derive(Default)]
pub struct PeerTable {
    peers: RwLock<HashMap<String, PeerEntry>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, client: PeerClient, handshake: HandshakeMessage) {
        debug!(peer = %handshake.listen_address, height = handshake.height, "peer recorded");
        self.peers
            .write()
            .insert(handshake.listen_address.clone(), PeerEntry { client, handshake });
    }

    pub fn remove(&self, listen_address: &str) -> bool {
        self.peers.write().remove(listen_address).is_some()
    }

    pub fn contains(&self, listen_address: &str) -> bool {
        self.peers.read().contains_key(listen_address)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.peers.read().keys().cloned().collect()
    }

    // snapshot for fan-out; broadcasts never hold the lock across I/O
    pub fn entries(&self) -> Vec<(String, PeerClient)> {
        self.peers
            .read()
            .iter()
            .map(|(address, entry)| (address.clone(), entry.client.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }
}

pub async fn dial(listen_address: &str) -> Result<PeerClient, tonic::transport::Error> {
    BlockChainClient::connect(format!("http://{listen_address}")).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::transport::Endpoint;

    fn lazy_client() -> PeerClient {
        let channel = Endpoint::from_static("http://127.0.0.1:1").connect_lazy();
        BlockChainClient::new(channel)
    }

    fn handshake(listen_address: &str) -> HandshakeMessage {
        HandshakeMessage {
            version: "blocker-0.1".into(),
            height: 0,
            listen_address: listen_address.into(),
            peer_list: vec![],
        }
    }

    #[tokio::test]
    async fn peers_are_unique_per_address() {
        let table = PeerTable::new();
        table.add(lazy_client(), handshake("127.0.0.1:4000"));
        table.add(lazy_client(), handshake("127.0.0.1:4000"));
        table.add(lazy_client(), handshake("127.0.0.1:5000"));

        assert_eq!(table.len(), 2);
        let mut addresses = table.addresses();
        addresses.sort();
        assert_eq!(addresses, vec!["127.0.0.1:4000", "127.0.0.1:5000"]);
    }

    #[tokio::test]
    async fn remove_drops_the_entry() {
        let table = PeerTable::new();
        table.add(lazy_client(), handshake("127.0.0.1:4000"));

        assert!(table.contains("127.0.0.1:4000"));
        assert!(table.remove("127.0.0.1:4000"));
        assert!(!table.remove("127.0.0.1:4000"));
        assert!(table.is_empty());
    }
}
