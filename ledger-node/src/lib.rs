use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use ledger_chain::{Chain, ChainError};
use ledger_config::NodeConfig;
use ledger_core::{hash_block, hash_transaction, now_unix_nano, sign_block};
use ledger_crypto::PrivateKey;
use ledger_mempool::Mempool;
use ledger_network::{dial, PeerClient, PeerTable};
use ledger_proto::block_chain_server::{BlockChain, BlockChainServer};
use ledger_proto::{Ack, Block, HandshakeMessage, Header, Transaction};
use ledger_storage::{utxo_key, MemoryBlockStore, MemoryTxStore, MemoryUtxoStore};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

pub struct Node {
    config: NodeConfig,
    chain: Arc<Chain>,
    mempool: Arc<Mempool>,
    peers: Arc<PeerTable>,
    private_key: Option<PrivateKey>,
}

impl Node {
    pub fn new(config: NodeConfig) -> Result<Arc<Self>> {
        let chain = Arc::new(Chain::new(
            Arc::new(MemoryBlockStore::new()),
            Arc::new(MemoryTxStore::new()),
            Arc::new(MemoryUtxoStore::new()),
        )?);
        let private_key = config.private_key.as_deref().map(PrivateKey::from_string);
        Ok(Arc::new(Self {
            chain,
            mempool: Arc::new(Mempool::new()),
            peers: Arc::new(PeerTable::new()),
            private_key,
            config,
        }))
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    pub fn listen_address(&self) -> &str {
        &self.config.listen_address
    }

    pub async fn start(self: Arc<Self>) -> Result<()> {
        let addr: SocketAddr = self.config.listen_address.parse()?;
        // bind before bootstrap dials out, so a peer's dial-back finds us
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(listen_address = %self.config.listen_address, version = %self.config.version, "node running");

        let bootstrap_list = self.config.bootstrap_servers.clone();
        if !bootstrap_list.is_empty() {
            let node = self.clone();
            tokio::spawn(async move { node.bootstrap(bootstrap_list).await });
        }
        if self.private_key.is_some() {
            let node = self.clone();
            tokio::spawn(async move { node.validator_loop().await });
        }

        let service = NodeService { node: self };
        Server::builder()
            .add_service(BlockChainServer::new(service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await?;
        Ok(())
    }

    fn our_handshake(&self) -> HandshakeMessage {
        HandshakeMessage {
            version: self.config.version.clone(),
            height: self.chain.height(),
            listen_address: self.config.listen_address.clone(),
            peer_list: self.peers.addresses(),
        }
    }

    fn can_connect_with(&self, address: &str) -> bool {
        address != self.config.listen_address && !self.peers.contains(address)
    }

    // Per-address failures are logged and skipped; bootstrap never fails
    // as a whole. Peers advertised in replies join the worklist.
    pub async fn bootstrap(&self, addresses: Vec<String>) {
        let mut worklist: VecDeque<String> = addresses.into();
        let mut attempted: HashSet<String> = HashSet::new();
        while let Some(address) = worklist.pop_front() {
            if !attempted.insert(address.clone()) || !self.can_connect_with(&address) {
                continue;
            }
            debug!(%address, "dialing bootstrap peer");
            let mut client = match dial(&address).await {
                Ok(client) => client,
                Err(e) => {
                    warn!(%address, error = %e, "bootstrap dial failed");
                    continue;
                }
            };
            let reply = match client.handshake(self.our_handshake()).await {
                Ok(reply) => reply.into_inner(),
                Err(e) => {
                    warn!(%address, error = %e, "bootstrap handshake failed");
                    continue;
                }
            };
            worklist.extend(reply.peer_list.iter().cloned());
            self.add_peer(client, reply);
        }
    }

    fn add_peer(&self, client: PeerClient, handshake: HandshakeMessage) {
        debug!(
            local = %self.config.listen_address,
            peer = %handshake.listen_address,
            height = handshake.height,
            "new peer connected"
        );
        self.peers.add(client, handshake);
    }

    // best-effort fan-out, one task per peer
    fn broadcast_transaction(&self, tx: Transaction) {
        for (address, mut client) in self.peers.entries() {
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Err(e) = client.handle_transaction(tx).await {
                    warn!(peer = %address, error = %e, "transaction broadcast failed");
                }
            });
        }
    }

    async fn validator_loop(&self) {
        let private_key = self
            .private_key
            .clone()
            .expect("validator loop without a key");
        info!(block_time_secs = self.config.block_time_secs, "starting validator loop");
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.block_time_secs));
        loop {
            ticker.tick().await;
            let transactions = self.mempool.clear();
            info!(count = transactions.len(), "drained mempool");
            if transactions.is_empty() {
                continue;
            }
            if let Err(e) = self.produce_block(&private_key, transactions) {
                warn!(error = %e, "block production failed");
            }
        }
    }

    // Drained transactions that no longer validate, or that contend for a
    // utxo already claimed within this block, are dropped.
    fn produce_block(
        &self,
        private_key: &PrivateKey,
        transactions: Vec<Transaction>,
    ) -> Result<(), ChainError> {
        let mut claimed: HashSet<String> = HashSet::new();
        let mut valid = Vec::with_capacity(transactions.len());
        for tx in transactions {
            if let Err(e) = self.chain.validate_transaction(&tx) {
                warn!(error = %e, "dropping pending transaction");
                continue;
            }
            let keys: Vec<String> = tx
                .inputs
                .iter()
                .map(|input| {
                    utxo_key(
                        &hex::encode(&input.previous_tx_hash),
                        input.previous_out_index,
                    )
                })
                .collect();
            if keys.iter().any(|key| claimed.contains(key)) {
                warn!("dropping pending transaction contending for a spent output");
                continue;
            }
            claimed.extend(keys);
            valid.push(tx);
        }
        if valid.is_empty() {
            return Ok(());
        }

        let tip = self.chain.get_block_by_height(self.chain.height())?;
        let mut block = Block {
            header: Some(Header {
                version: 1,
                height: self.chain.height() + 1,
                previous_hash: hash_block(&tip),
                root_hash: vec![],
                timestamp: now_unix_nano(),
            }),
            transactions: valid,
            public_key: vec![],
            signature: vec![],
        };
        sign_block(private_key, &mut block);

        self.chain.add_block(&block)?;
        info!(
            height = self.chain.height(),
            txs = block.transactions.len(),
            hash = %hex::encode(hash_block(&block)),
            "sealed block"
        );
        Ok(())
    }
}

#[derive(Clone)]
struct NodeService {
    node: Arc<Node>,
}

#[tonic::async_trait]
impl BlockChain for NodeService {
    async fn handshake(
        &self,
        request: Request<HandshakeMessage>,
    ) -> Result<Response<HandshakeMessage>, Status> {
        let msg = request.into_inner();
        let client = dial(&msg.listen_address).await.map_err(|e| {
            Status::unavailable(format!("dialing back {}: {e}", msg.listen_address))
        })?;

        let peer_list = msg.peer_list.clone();
        self.node.add_peer(client, msg);
        if !peer_list.is_empty() {
            let node = self.node.clone();
            tokio::spawn(async move { node.bootstrap(peer_list).await });
        }

        Ok(Response::new(self.node.our_handshake()))
    }

    async fn handle_transaction(&self, request: Request<Transaction>) -> Result<Response<Ack>, Status> {
        let tx = request.into_inner();
        let hash = hex::encode(hash_transaction(&tx));
        if self.node.mempool.add(tx.clone()) {
            debug!(%hash, "admitted transaction");
            self.node.broadcast_transaction(tx);
        }
        Ok(Response::new(Ack {}))
    }
}

pub async fn run_node(config_path: PathBuf) -> Result<()> {
    let cfg = NodeConfig::load(&config_path)?;
    init_logging();
    info!("starting ledger node with config {:?}", config_path);
    let node = Node::new(cfg)?;
    node.start().await
}

fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_chain::GENESIS_SEED;
    use ledger_core::sign_transaction;
    use ledger_proto::{TxInput, TxOutput};

    fn validator_node() -> Arc<Node> {
        let mut cfg = NodeConfig::example();
        cfg.listen_address = "127.0.0.1:0".into();
        cfg.private_key = Some(GENESIS_SEED.to_string());
        Node::new(cfg).unwrap()
    }

    fn spend_genesis_tx(node: &Node, amount: i64) -> Transaction {
        let key = PrivateKey::from_string(GENESIS_SEED);
        let genesis = node.chain().get_block_by_height(0).unwrap();
        let mut tx = Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_tx_hash: hash_transaction(&genesis.transactions[0]),
                previous_out_index: 0,
                public_key: key.public().bytes().to_vec(),
                signature: vec![],
            }],
            outputs: vec![TxOutput {
                amount,
                address: key.public().address().bytes().to_vec(),
            }],
        };
        let sig = sign_transaction(&key, &tx);
        tx.inputs[0].signature = sig.bytes().to_vec();
        tx
    }

    #[test]
    fn seals_pending_transactions_into_a_block() {
        let node = validator_node();
        let key = PrivateKey::from_string(GENESIS_SEED);

        assert!(node.mempool().add(spend_genesis_tx(&node, 1000)));
        let drained = node.mempool().clear();
        assert_eq!(drained.len(), 1);

        node.produce_block(&key, drained).unwrap();
        assert_eq!(node.chain().height(), 1);
        assert_eq!(
            node.chain()
                .get_block_by_height(1)
                .unwrap()
                .transactions
                .len(),
            1
        );
    }

    #[test]
    fn empty_drain_seals_nothing() {
        let node = validator_node();
        let key = PrivateKey::from_string(GENESIS_SEED);
        node.produce_block(&key, vec![]).unwrap();
        assert_eq!(node.chain().height(), 0);
    }

    #[test]
    fn contending_spends_collapse_to_one() {
        let node = validator_node();
        let key = PrivateKey::from_string(GENESIS_SEED);

        // two distinct transactions draining the same genesis output
        let first = spend_genesis_tx(&node, 1000);
        let second = spend_genesis_tx(&node, 999);

        node.produce_block(&key, vec![first, second]).unwrap();
        assert_eq!(node.chain().height(), 1);
        assert_eq!(
            node.chain()
                .get_block_by_height(1)
                .unwrap()
                .transactions
                .len(),
            1
        );
    }
}
