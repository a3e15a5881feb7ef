//! Transactions and their wire format.
//!
//! # Wire Format
//!
//! ```text
//! SBOR( TxnEnvelope {
//!     body: TxnBody { instructions, message },
//!     signature: Option<TxnSignature { public_key, signature }>,
//! })
//! ```
//!
//! The signature covers `Blake3(SBOR(body))`. The transaction id is
//! `Blake3(bytes)` over the whole envelope, so the same body signed by two
//! keys yields two distinct transactions.

use crate::{Hash, Instruction, KeyPair, PublicKey, Signature};
use sbor::prelude::*;

/// Unsigned part of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct TxnBody {
    /// Instruction stream, ending in `TxnEnd`.
    pub instructions: Vec<Instruction>,
    /// Optional UTF-8 message.
    pub message: Option<String>,
}

impl TxnBody {
    /// Digest the signer signs.
    pub fn hash_to_sign(&self) -> Hash {
        Hash::of_encoded(self)
    }
}

/// Signature block of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct TxnSignature {
    /// Claimed signer.
    pub public_key: PublicKey,
    /// Signature over the body hash.
    pub signature: Signature,
}

/// Everything that is serialized.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct TxnEnvelope {
    /// Body.
    pub body: TxnBody,
    /// Optional signature.
    pub signature: Option<TxnSignature>,
}

/// Errors decoding raw transaction bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxnDecodeError {
    /// Bytes are not a valid envelope.
    #[error("SBOR decode error: {0}")]
    SborDecode(String),
}

/// A transaction: raw bytes plus the decoded envelope and derived id.
///
/// Immutable once built; the id is always the hash of exactly the bytes held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Txn {
    bytes: Vec<u8>,
    id: Hash,
    envelope: TxnEnvelope,
}

impl Txn {
    /// Serialize an envelope into a transaction.
    pub fn from_envelope(envelope: TxnEnvelope) -> Self {
        let bytes =
            sbor::basic_encode(&envelope).expect("TxnEnvelope serialization should never fail");
        let id = Hash::from_bytes(&bytes);
        Self {
            bytes,
            id,
            envelope,
        }
    }

    /// Build and sign a body.
    pub fn sign(body: TxnBody, key: &KeyPair) -> Self {
        let signature = key.sign(&body.hash_to_sign());
        Self::from_envelope(TxnEnvelope {
            body,
            signature: Some(TxnSignature {
                public_key: key.public_key(),
                signature,
            }),
        })
    }

    /// Build an unsigned transaction.
    pub fn unsigned(body: TxnBody) -> Self {
        Self::from_envelope(TxnEnvelope {
            body,
            signature: None,
        })
    }

    /// Decode raw bytes. Performs no semantic validation.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, TxnDecodeError> {
        let envelope: TxnEnvelope = sbor::basic_decode(&bytes)
            .map_err(|e| TxnDecodeError::SborDecode(format!("{:?}", e)))?;
        let id = Hash::from_bytes(&bytes);
        Ok(Self {
            bytes,
            id,
            envelope,
        })
    }

    /// Transaction id.
    pub fn id(&self) -> Hash {
        self.id
    }

    /// Raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Instruction stream.
    pub fn instructions(&self) -> &[Instruction] {
        &self.envelope.body.instructions
    }

    /// Message, if any.
    pub fn message(&self) -> Option<&str> {
        self.envelope.body.message.as_deref()
    }

    /// Signature block, if any.
    pub fn signature(&self) -> Option<&TxnSignature> {
        self.envelope.signature.as_ref()
    }

    /// Body.
    pub fn body(&self) -> &TxnBody {
        &self.envelope.body
    }
}
