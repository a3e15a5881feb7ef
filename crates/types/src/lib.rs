//! Core types for the stratum ledger engine.
//!
//! This crate provides the data model every other crate builds on:
//!
//! - **Primitives**: [`Hash`], secp256k1 [`KeyPair`] / [`PublicKey`] / [`Signature`]
//! - **Addresses**: [`REAddr`] for resources, accounts and the system
//! - **Substates**: [`Substate`], [`SubstateKind`], [`SubstateId`], [`SubstateRef`]
//! - **Transactions**: [`Instruction`], [`Txn`] and its wire envelope
//! - **Actions**: [`TxAction`], the high-level intents transactions encode
//! - **Metadata**: [`LedgerMetadata`], [`ValidatorSet`], [`PermissionLevel`]
//!
//! # Design Philosophy
//!
//! This crate is self-contained. It does not depend on any other workspace
//! crate, and nothing here knows about rules: which transitions are legal is
//! decided by the engine's procedure registry.

#![warn(missing_docs)]

mod action;
mod addr;
mod crypto;
mod hash;
mod instruction;
mod metadata;
mod substate;
mod transaction;
mod validator;

pub use action::TxAction;
pub use addr::{is_valid_symbol, REAddr, HASHED_KEY_BYTES, MAX_SYMBOL_LEN};
pub use crypto::{CryptoError, KeyPair, PublicKey, Signature};
pub use hash::{Hash, HexError};
pub use instruction::{Instruction, Spin};
pub use metadata::{LedgerMetadata, PermissionLevel};
pub use substate::{
    EpochData, PreparedUnstake, RoundData, StakeOwnership, Substate, SubstateId, SubstateKind,
    SubstateRef, TokenResource, TokenResourceMetadata, Tokens, UnclaimedAddr,
    ValidatorMetadata, ValidatorRegistered, ValidatorSystemMetadata,
};
pub use transaction::{Txn, TxnBody, TxnDecodeError, TxnEnvelope, TxnSignature};
pub use validator::{ValidatorSet, ValidatorStake};
