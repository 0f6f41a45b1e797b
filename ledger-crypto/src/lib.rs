use std::fmt;

use anyhow::{anyhow, Result};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

pub const PRIVATE_KEY_LEN: usize = 64;
pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;
pub const SEED_LEN: usize = 32;
pub const ADDRESS_LEN: usize = 20;

// Bad seed material panics: construction-time misuse is a programmer bug.
#[derive(Clone)]
pub struct PrivateKey {
    signing: SigningKey,
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PrivateKey")
            .field(&self.public().address())
            .finish()
    }
}

impl PrivateKey {
    pub fn generate() -> Self {
        let mut csprng = OsRng;
        Self {
            signing: SigningKey::generate(&mut csprng),
        }
    }

    pub fn from_seed(seed: &[u8]) -> Self {
        let seed: [u8; SEED_LEN] = seed.try_into().expect("seed must be 32 bytes");
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    pub fn from_string(s: &str) -> Self {
        let seed = hex::decode(s).expect("seed must be valid hex");
        Self::from_seed(&seed)
    }

    pub fn bytes(&self) -> [u8; PRIVATE_KEY_LEN] {
        self.signing.to_keypair_bytes()
    }

    pub fn sign(&self, msg: &[u8]) -> Signature {
        Signature {
            inner: self.signing.sign(msg),
        }
    }

    pub fn public(&self) -> PublicKey {
        PublicKey {
            inner: self.signing.verifying_key(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        let arr: [u8; PUBLIC_KEY_LEN] =
            b.try_into().map_err(|_| anyhow!("public key must be 32 bytes"))?;
        let inner =
            VerifyingKey::from_bytes(&arr).map_err(|_| anyhow!("invalid public key bytes"))?;
        Ok(Self { inner })
    }

    pub fn bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.inner.to_bytes()
    }

    pub fn address(&self) -> Address {
        let bytes = self.inner.to_bytes();
        let mut value = [0u8; ADDRESS_LEN];
        value.copy_from_slice(&bytes[PUBLIC_KEY_LEN - ADDRESS_LEN..]);
        Address { value }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    inner: ed25519_dalek::Signature,
}

impl Signature {
    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        let arr: [u8; SIGNATURE_LEN] =
            b.try_into().map_err(|_| anyhow!("signature must be 64 bytes"))?;
        Ok(Self {
            inner: ed25519_dalek::Signature::from_bytes(&arr),
        })
    }

    pub fn bytes(&self) -> [u8; SIGNATURE_LEN] {
        self.inner.to_bytes()
    }

    pub fn verify(&self, public_key: &PublicKey, msg: &[u8]) -> bool {
        public_key.inner.verify(msg, &self.inner).is_ok()
    }
}

/// The trailing 20 bytes of an Ed25519 public key, rendered as lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    value: [u8; ADDRESS_LEN],
}

impl Address {
    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        let value: [u8; ADDRESS_LEN] =
            b.try_into().map_err(|_| anyhow!("address must be 20 bytes"))?;
        Ok(Self { value })
    }

    pub fn bytes(&self) -> [u8; ADDRESS_LEN] {
        self.value
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.value))
    }
}
