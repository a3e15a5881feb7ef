//! Transaction parsing against a rule set.

use crate::error::TxnParseError;
use crate::procedure::ProcedureRegistry;
use stratum_types::{Instruction, PublicKey, Txn};

/// A transaction whose framing, message and signature have been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTxn {
    /// The transaction.
    pub txn: Txn,
    /// Verified signer.
    pub signer: Option<PublicKey>,
}

/// Checks everything about a transaction that does not depend on state.
pub struct TxnParser<'r> {
    registry: &'r ProcedureRegistry,
    max_message_len: usize,
}

impl<'r> TxnParser<'r> {
    /// Parser for a registry's enabled kinds.
    pub fn new(registry: &'r ProcedureRegistry, max_message_len: usize) -> Self {
        Self {
            registry,
            max_message_len,
        }
    }

    /// Decode and parse raw bytes.
    pub fn parse_bytes(&self, bytes: Vec<u8>) -> Result<ParsedTxn, TxnParseError> {
        self.parse(Txn::from_bytes(bytes)?)
    }

    /// Parse a decoded transaction.
    pub fn parse(&self, txn: Txn) -> Result<ParsedTxn, TxnParseError> {
        let instructions = txn.instructions();
        let ends = instructions
            .iter()
            .filter(|i| matches!(i, Instruction::TxnEnd))
            .count();
        if ends != 1 || !matches!(instructions.last(), Some(Instruction::TxnEnd)) {
            return Err(TxnParseError::BadTermination);
        }

        if let Some(message) = txn.message() {
            if message.len() > self.max_message_len {
                return Err(TxnParseError::MessageTooLong {
                    len: message.len(),
                    max: self.max_message_len,
                });
            }
        }

        for substate in instructions.iter().filter_map(Instruction::substate) {
            if !self.registry.is_enabled(substate.kind()) {
                return Err(TxnParseError::UnsupportedSubstate(substate.kind().name()));
            }
        }

        let signer = match txn.signature() {
            Some(signature) => {
                let hash = txn.body().hash_to_sign();
                if !signature.public_key.verify(&hash, &signature.signature) {
                    return Err(TxnParseError::InvalidSignature);
                }
                Some(signature.public_key)
            }
            None => None,
        };

        Ok(ParsedTxn { txn, signer })
    }
}
