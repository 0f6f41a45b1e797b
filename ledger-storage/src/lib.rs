use std::collections::HashMap;

use ledger_core::{hash_block, hash_transaction};
use ledger_proto::{Block, Transaction};
use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("block with hash {0} not found")]
    BlockNotFound(String),
    #[error("transaction with hash {0} not found")]
    TxNotFound(String),
    #[error("utxo {0} not found")]
    UtxoNotFound(String),
}

pub trait BlockStore: Send + Sync {
    fn put(&self, block: &Block) -> Result<(), StoreError>;
    fn get(&self, hash: &str) -> Result<Block, StoreError>;
}

pub trait TxStore: Send + Sync {
    fn put(&self, tx: &Transaction) -> Result<(), StoreError>;
    fn get(&self, hash: &str) -> Result<Transaction, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub hash: String,
    pub out_index: u32,
    pub amount: i64,
    pub spent: bool,
}

pub fn utxo_key(hash: &str, out_index: u32) -> String {
    format!("{hash}_{out_index}")
}

// keyed by utxo_key
pub trait UtxoStore: Send + Sync {
    fn put(&self, utxo: &Utxo) -> Result<(), StoreError>;
    fn get(&self, key: &str) -> Result<Utxo, StoreError>;
}

#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: RwLock<HashMap<String, Block>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockStore for MemoryBlockStore {
    fn put(&self, block: &Block) -> Result<(), StoreError> {
        let hash = hex::encode(hash_block(block));
        self.blocks.write().insert(hash, block.clone());
        Ok(())
    }

    fn get(&self, hash: &str) -> Result<Block, StoreError> {
        self.blocks
            .read()
            .get(hash)
            .cloned()
            .ok_or_else(|| StoreError::BlockNotFound(hash.to_string()))
    }
}

#[derive(Default)]
pub struct MemoryTxStore {
    txs: RwLock<HashMap<String, Transaction>>,
}

impl MemoryTxStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TxStore for MemoryTxStore {
    fn put(&self, tx: &Transaction) -> Result<(), StoreError> {
        let hash = hex::encode(hash_transaction(tx));
        self.txs.write().insert(hash, tx.clone());
        Ok(())
    }

    fn get(&self, hash: &str) -> Result<Transaction, StoreError> {
        self.txs
            .read()
            .get(hash)
            .cloned()
            .ok_or_else(|| StoreError::TxNotFound(hash.to_string()))
    }
}

#[derive(Default)]
pub struct MemoryUtxoStore {
    utxos: RwLock<HashMap<String, Utxo>>,
}

impl MemoryUtxoStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UtxoStore for MemoryUtxoStore {
    fn put(&self, utxo: &Utxo) -> Result<(), StoreError> {
        let key = utxo_key(&utxo.hash, utxo.out_index);
        self.utxos.write().insert(key, utxo.clone());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Utxo, StoreError> {
        self.utxos
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::UtxoNotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::random_hash;
    use ledger_proto::Header;

    fn sample_block() -> Block {
        Block {
            header: Some(Header {
                version: 1,
                height: 7,
                previous_hash: random_hash(),
                root_hash: vec![],
                timestamp: 0,
            }),
            transactions: vec![],
            public_key: vec![],
            signature: vec![],
        }
    }

    #[test]
    fn block_store_roundtrip() {
        let store = MemoryBlockStore::new();
        let block = sample_block();
        store.put(&block).unwrap();

        let fetched = store.get(&hex::encode(hash_block(&block))).unwrap();
        assert_eq!(fetched, block);

        assert!(matches!(
            store.get("deadbeef"),
            Err(StoreError::BlockNotFound(_))
        ));
    }

    #[test]
    fn tx_store_roundtrip() {
        let store = MemoryTxStore::new();
        let tx = Transaction {
            version: 1,
            inputs: vec![],
            outputs: vec![],
        };
        store.put(&tx).unwrap();

        let fetched = store.get(&hex::encode(hash_transaction(&tx))).unwrap();
        assert_eq!(fetched, tx);
        assert!(matches!(store.get("00"), Err(StoreError::TxNotFound(_))));
    }

    #[test]
    fn utxo_store_spend_cycle() {
        let store = MemoryUtxoStore::new();
        let mut utxo = Utxo {
            hash: hex::encode(random_hash()),
            out_index: 1,
            amount: 42,
            spent: false,
        };
        store.put(&utxo).unwrap();

        let key = utxo_key(&utxo.hash, utxo.out_index);
        assert!(!store.get(&key).unwrap().spent);

        utxo.spent = true;
        store.put(&utxo).unwrap();
        assert!(store.get(&key).unwrap().spent);

        assert!(matches!(
            store.get(&utxo_key(&utxo.hash, 2)),
            Err(StoreError::UtxoNotFound(_))
        ));
    }
}
