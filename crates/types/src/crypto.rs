//! ECDSA (secp256k1) keys and signatures.
//!
//! Signing and verification are delegated to the Radix vendor crypto; this
//! module only wraps the raw compressed-point and recoverable-signature bytes
//! in SBOR-encodable newtypes so they can live inside substates and
//! transaction envelopes.

use crate::Hash;
use radix_common::crypto::{
    verify_secp256k1, Hash as RadixHash, Secp256k1PrivateKey, Secp256k1PublicKey,
    Secp256k1Signature,
};
use sbor::prelude::*;
use std::fmt;
use std::sync::Arc;

/// Errors raised while deriving key material.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Scalar is zero or outside the curve order.
    #[error("Invalid secp256k1 private key")]
    InvalidPrivateKey,
}

/// A secp256k1 signing key pair.
#[derive(Clone)]
pub struct KeyPair {
    private_key: Arc<Secp256k1PrivateKey>,
    public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        loop {
            let mut bytes = [0u8; 32];
            rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
            if let Ok(key) = Self::from_private_key_bytes(&bytes) {
                return key;
            }
        }
    }

    /// Deterministic keypair from a small integer seed (tests, genesis fixtures).
    pub fn from_seed(seed: u64) -> Result<Self, CryptoError> {
        let private_key =
            Secp256k1PrivateKey::from_u64(seed).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self::from_private_key(private_key))
    }

    /// Keypair from a 32-byte big-endian scalar.
    pub fn from_private_key_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let private_key =
            Secp256k1PrivateKey::from_bytes(bytes).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self::from_private_key(private_key))
    }

    fn from_private_key(private_key: Secp256k1PrivateKey) -> Self {
        let public_key = PublicKey(private_key.public_key().0);
        Self {
            private_key: Arc::new(private_key),
            public_key,
        }
    }

    /// Sign a 32-byte digest.
    pub fn sign(&self, hash: &Hash) -> Signature {
        let signature = self.private_key.sign(&RadixHash(*hash.as_bytes()));
        Signature(signature.0)
    }

    /// The compressed public key.
    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

/// A compressed secp256k1 public key (33 bytes).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
#[sbor(transparent)]
pub struct PublicKey(pub [u8; 33]);

impl PublicKey {
    /// Size of a compressed point in bytes.
    pub const BYTES: usize = 33;

    /// Verify a signature over a digest.
    pub fn verify(&self, hash: &Hash, signature: &Signature) -> bool {
        verify_secp256k1(
            &RadixHash(*hash.as_bytes()),
            &Secp256k1PublicKey(self.0),
            &Secp256k1Signature(signature.0),
        )
    }

    /// Raw compressed bytes.
    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    /// Hex encoding of the compressed point.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "PublicKey({}..)", &hex[..12])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A recoverable ECDSA signature (65 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, BasicSbor)]
#[sbor(transparent)]
pub struct Signature(pub [u8; 65]);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", hex::encode(&self.0[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let key = KeyPair::from_seed(7).unwrap();
        let hash = Hash::from_bytes(b"payload");
        let signature = key.sign(&hash);

        assert!(key.public_key().verify(&hash, &signature));
        assert!(!key
            .public_key()
            .verify(&Hash::from_bytes(b"other"), &signature));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let alice = KeyPair::from_seed(1).unwrap();
        let bob = KeyPair::from_seed(2).unwrap();
        let hash = Hash::from_bytes(b"payload");

        assert!(!bob.public_key().verify(&hash, &alice.sign(&hash)));
    }

    #[test]
    fn test_seeded_keys_deterministic() {
        let a = KeyPair::from_seed(42).unwrap();
        let b = KeyPair::from_seed(42).unwrap();
        assert_eq!(a.public_key(), b.public_key());
        assert!(KeyPair::from_seed(0).is_err());
    }
}
