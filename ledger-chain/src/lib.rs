use std::sync::Arc;

use ledger_core::{hash_block, hash_header, hash_transaction, sign_block, verify_block, verify_transaction};
use ledger_crypto::{PrivateKey, PublicKey};
use ledger_proto::{Block, Header, Transaction, TxInput, TxOutput};
use ledger_storage::{utxo_key, BlockStore, StoreError, TxStore, Utxo, UtxoStore};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::debug;

/// Seed of the key that signs genesis and owns its minted output.
pub const GENESIS_SEED: &str = "9cc4f38df849cf7144e33fd8f8a53962eb00038333f6adaca9d0c37be693530c";
const GENESIS_OUTPUT_AMOUNT: i64 = 1000;

static GENESIS_KEY: Lazy<PrivateKey> = Lazy::new(|| PrivateKey::from_string(GENESIS_SEED));

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid block signature")]
    InvalidBlockSignature,
    #[error("invalid transaction signature")]
    InvalidTxSignature,
    #[error("invalid previous hash: expected {expected}, got {got}")]
    InvalidPreviousHash { expected: String, got: String },
    #[error("utxo {0} already spent")]
    AlreadySpent(String),
    #[error("insufficient balance: inputs {inputs}, outputs {outputs}")]
    InsufficientBalance { inputs: i64, outputs: i64 },
    #[error("height {requested} too high, tip is at {height}")]
    HeightTooHigh { requested: i32, height: i32 },
    #[error("input key does not own utxo {0}")]
    UtxoOwnerMismatch(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

// Accepted headers in height order, append-only.
#[derive(Default)]
pub struct HeaderList {
    headers: Vec<Header>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, header: Header) {
        self.headers.push(header);
    }

    pub fn get(&self, index: usize) -> &Header {
        assert!(index < self.headers.len(), "header index past tip");
        &self.headers[index]
    }

    pub fn height(&self) -> i32 {
        self.headers.len() as i32 - 1
    }
}

pub struct Chain {
    block_store: Arc<dyn BlockStore>,
    tx_store: Arc<dyn TxStore>,
    utxo_store: Arc<dyn UtxoStore>,
    headers: RwLock<HeaderList>,
    // add_block is validate-then-apply; the lock serializes acceptances.
    apply_lock: Mutex<()>,
}

impl Chain {
    pub fn new(
        block_store: Arc<dyn BlockStore>,
        tx_store: Arc<dyn TxStore>,
        utxo_store: Arc<dyn UtxoStore>,
    ) -> Result<Self, ChainError> {
        let chain = Self {
            block_store,
            tx_store,
            utxo_store,
            headers: RwLock::new(HeaderList::new()),
            apply_lock: Mutex::new(()),
        };
        chain.apply_block(&genesis_block())?;
        Ok(chain)
    }

    pub fn height(&self) -> i32 {
        self.headers.read().height()
    }

    pub fn add_block(&self, block: &Block) -> Result<(), ChainError> {
        let _guard = self.apply_lock.lock();
        self.validate_block(block)?;
        self.apply_block(block)
    }

    // Unchecked application, shared by genesis and validated blocks.
    fn apply_block(&self, block: &Block) -> Result<(), ChainError> {
        // all store reads happen before the first write
        let mut fresh: Vec<Utxo> = Vec::new();
        let mut spent: Vec<Utxo> = Vec::new();
        for tx in &block.transactions {
            let tx_hash = hex::encode(hash_transaction(tx));
            for (i, output) in tx.outputs.iter().enumerate() {
                fresh.push(Utxo {
                    hash: tx_hash.clone(),
                    out_index: i as u32,
                    amount: output.amount,
                    spent: false,
                });
            }
            for input in &tx.inputs {
                let key = utxo_key(
                    &hex::encode(&input.previous_tx_hash),
                    input.previous_out_index,
                );
                let mut utxo = self.utxo_store.get(&key)?;
                utxo.spent = true;
                spent.push(utxo);
            }
        }

        let header = block.header.clone().expect("block has no header");
        let height = header.height;
        self.headers.write().add(header);
        for tx in &block.transactions {
            self.tx_store.put(tx)?;
        }
        for utxo in fresh.iter().chain(spent.iter()) {
            self.utxo_store.put(utxo)?;
        }
        self.block_store.put(block)?;

        debug!(height, hash = %hex::encode(hash_block(block)), "applied block");
        Ok(())
    }

    pub fn validate_block(&self, block: &Block) -> Result<(), ChainError> {
        if !verify_block(block) {
            return Err(ChainError::InvalidBlockSignature);
        }

        let tip = self.get_block_by_height(self.height())?;
        let tip_hash = hash_block(&tip);
        let header = block.header.as_ref().expect("block has no header");
        if tip_hash != header.previous_hash {
            return Err(ChainError::InvalidPreviousHash {
                expected: hex::encode(&tip_hash),
                got: hex::encode(&header.previous_hash),
            });
        }

        for tx in &block.transactions {
            self.validate_transaction(tx)?;
        }
        Ok(())
    }

    pub fn validate_transaction(&self, tx: &Transaction) -> Result<(), ChainError> {
        if !verify_transaction(tx) {
            return Err(ChainError::InvalidTxSignature);
        }

        let mut sum_inputs: i64 = 0;
        for input in &tx.inputs {
            let prev_hash = hex::encode(&input.previous_tx_hash);
            let key = utxo_key(&prev_hash, input.previous_out_index);
            let utxo = self.utxo_store.get(&key)?;
            if utxo.spent {
                return Err(ChainError::AlreadySpent(key));
            }
            self.check_utxo_owner(input, &prev_hash, &key)?;
            sum_inputs += utxo.amount;
        }

        let sum_outputs: i64 = tx.outputs.iter().map(|output| output.amount).sum();
        if sum_inputs < sum_outputs {
            return Err(ChainError::InsufficientBalance {
                inputs: sum_inputs,
                outputs: sum_outputs,
            });
        }
        Ok(())
    }

    // The spending key's address must match the output that minted the utxo.
    fn check_utxo_owner(
        &self,
        input: &TxInput,
        prev_hash: &str,
        key: &str,
    ) -> Result<(), ChainError> {
        let prev_tx = self.tx_store.get(prev_hash)?;
        let output: &TxOutput = prev_tx
            .outputs
            .get(input.previous_out_index as usize)
            .ok_or_else(|| StoreError::UtxoNotFound(key.to_string()))?;
        let spender =
            PublicKey::from_bytes(&input.public_key).map_err(|_| ChainError::InvalidTxSignature)?;
        if output.address != spender.address().bytes() {
            return Err(ChainError::UtxoOwnerMismatch(key.to_string()));
        }
        Ok(())
    }

    pub fn get_block_by_hash(&self, hash: &[u8]) -> Result<Block, ChainError> {
        Ok(self.block_store.get(&hex::encode(hash))?)
    }

    pub fn get_block_by_height(&self, height: i32) -> Result<Block, ChainError> {
        let hash = {
            let headers = self.headers.read();
            if height > headers.height() {
                return Err(ChainError::HeightTooHigh {
                    requested: height,
                    height: headers.height(),
                });
            }
            hash_header(headers.get(height as usize))
        };
        self.get_block_by_hash(&hash)
    }
}

// Height 0: one transaction minting the initial output to the genesis
// key's address. Validation never runs on it.
fn genesis_block() -> Block {
    let key = &*GENESIS_KEY;
    let tx = Transaction {
        version: 1,
        inputs: vec![],
        outputs: vec![TxOutput {
            amount: GENESIS_OUTPUT_AMOUNT,
            address: key.public().address().bytes().to_vec(),
        }],
    };
    let mut block = Block {
        header: Some(Header {
            version: 1,
            height: 0,
            previous_hash: vec![],
            root_hash: vec![],
            timestamp: 0,
        }),
        transactions: vec![tx],
        public_key: vec![],
        signature: vec![],
    };
    sign_block(key, &mut block);
    block
}
