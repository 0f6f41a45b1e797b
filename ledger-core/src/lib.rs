use ledger_crypto::{PrivateKey, PublicKey, Signature, PUBLIC_KEY_LEN, SIGNATURE_LEN};
use ledger_proto::{Block, Header, Transaction};
use prost::Message;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub const HASH_LEN: usize = 32;

pub fn hash_header(header: &Header) -> Vec<u8> {
    Sha256::digest(header.encode_to_vec()).to_vec()
}

// Blocks are identified by their header hash alone.
pub fn hash_block(block: &Block) -> Vec<u8> {
    hash_header(block.header.as_ref().expect("block has no header"))
}

pub fn hash_transaction(tx: &Transaction) -> Vec<u8> {
    Sha256::digest(tx.encode_to_vec()).to_vec()
}

pub fn sign_block(private_key: &PrivateKey, block: &mut Block) -> Signature {
    if !block.transactions.is_empty() {
        let root = merkle_root(&transaction_hashes(&block.transactions));
        block
            .header
            .as_mut()
            .expect("block has no header")
            .root_hash = root;
    }

    let hash = hash_block(block);
    let signature = private_key.sign(&hash);
    block.public_key = private_key.public().bytes().to_vec();
    block.signature = signature.bytes().to_vec();

    signature
}

pub fn verify_block(block: &Block) -> bool {
    if block.public_key.len() != PUBLIC_KEY_LEN {
        return false;
    }
    if block.signature.len() != SIGNATURE_LEN {
        return false;
    }

    if !block.transactions.is_empty() {
        let Some(header) = block.header.as_ref() else {
            return false;
        };
        if header.root_hash != merkle_root(&transaction_hashes(&block.transactions)) {
            return false;
        }
    }

    let Ok(signature) = Signature::from_bytes(&block.signature) else {
        return false;
    };
    let Ok(public_key) = PublicKey::from_bytes(&block.public_key) else {
        return false;
    };

    signature.verify(&public_key, &hash_block(block))
}

// The caller assigns the returned bytes into the inputs it controls;
// signatures must be empty at signing time.
pub fn sign_transaction(private_key: &PrivateKey, tx: &Transaction) -> Signature {
    private_key.sign(&hash_transaction(tx))
}

pub fn verify_transaction(tx: &Transaction) -> bool {
    // each input verifies against the hash with its own signature blanked;
    // a local copy keeps the shared value untouched
    let mut scratch = tx.clone();
    for i in 0..tx.inputs.len() {
        let input = &tx.inputs[i];
        let Ok(signature) = Signature::from_bytes(&input.signature) else {
            return false;
        };
        let Ok(public_key) = PublicKey::from_bytes(&input.public_key) else {
            return false;
        };

        let saved = std::mem::take(&mut scratch.inputs[i].signature);
        let hash = hash_transaction(&scratch);
        scratch.inputs[i].signature = saved;

        if !signature.verify(&public_key, &hash) {
            return false;
        }
    }
    true
}

pub fn transaction_hashes(transactions: &[Transaction]) -> Vec<Vec<u8>> {
    transactions.iter().map(hash_transaction).collect()
}

pub fn merkle_root(hashes: &[Vec<u8>]) -> Vec<u8> {
    if hashes.is_empty() {
        return Vec::new();
    }
    let mut level = hashes.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for pair in level.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(&pair[0]);
            // an odd level duplicates its last hash
            hasher.update(pair.get(1).unwrap_or(&pair[0]));
            next.push(hasher.finalize().to_vec());
        }
        level = next;
    }
    level.swap_remove(0)
}

pub fn now_unix_nano() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos() as i64
}

pub fn random_hash() -> Vec<u8> {
    let mut hash = vec![0u8; HASH_LEN];
    rand::thread_rng().fill_bytes(&mut hash);
    hash
}
