use std::collections::HashMap;

use ledger_core::hash_transaction;
use ledger_proto::Transaction;
use parking_lot::RwLock;

#[derive(Default)]
pub struct Mempool {
    txs: RwLock<HashMap<String, Transaction>>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, tx: &Transaction) -> bool {
        let hash = hex::encode(hash_transaction(tx));
        self.txs.read().contains_key(&hash)
    }

    // true only for the first insert; drives the gossip fan-out
    pub fn add(&self, tx: Transaction) -> bool {
        let hash = hex::encode(hash_transaction(&tx));
        let mut txs = self.txs.write();
        if txs.contains_key(&hash) {
            return false;
        }
        txs.insert(hash, tx);
        true
    }

    pub fn len(&self) -> usize {
        self.txs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.read().is_empty()
    }

    // ordering of the drain is unspecified
    pub fn clear(&self) -> Vec<Transaction> {
        let mut txs = self.txs.write();
        txs.drain().map(|(_, tx)| tx).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_proto::TxOutput;
    use std::sync::Arc;
    use std::thread;

    fn tx(amount: i64) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![],
            outputs: vec![TxOutput {
                amount,
                address: vec![1u8; 20],
            }],
        }
    }

    #[test]
    fn add_deduplicates() {
        let pool = Mempool::new();
        assert!(!pool.has(&tx(1)));
        assert!(pool.add(tx(1)));
        assert!(pool.has(&tx(1)));
        assert!(!pool.add(tx(1)));
        assert_eq!(pool.len(), 1);

        assert!(pool.add(tx(2)));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn clear_drains_everything_once() {
        let pool = Mempool::new();
        for amount in 0..10 {
            assert!(pool.add(tx(amount)));
        }

        let mut drained = pool.clear();
        assert_eq!(drained.len(), 10);
        assert!(pool.is_empty());
        assert!(pool.clear().is_empty());

        drained.sort_by_key(|t| t.outputs[0].amount);
        let amounts: Vec<i64> = drained.iter().map(|t| t.outputs[0].amount).collect();
        assert_eq!(amounts, (0..10).collect::<Vec<i64>>());
    }

    #[test]
    fn concurrent_add_admits_exactly_once() {
        let pool = Arc::new(Mempool::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(thread::spawn(move || pool.add(tx(7))));
        }

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&first| first)
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(pool.len(), 1);
    }
}
