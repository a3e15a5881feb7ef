//! High-level actions.
//!
//! The same type is used as input to the transaction builder and as the
//! decoded output of execution, so a built transaction can be checked
//! against the actions it was built from.

use crate::{Hash, PublicKey, REAddr};
use sbor::prelude::*;

/// A high-level ledger intent.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub enum TxAction {
    /// Bootstrap the system epoch/round state.
    CreateSystem {
        /// Genesis timestamp.
        timestamp: u64,
    },
    /// Create a token with a fixed supply minted to `to`.
    CreateFixedToken {
        /// Resource address being claimed.
        resource: REAddr,
        /// Receiving account.
        to: REAddr,
        /// Symbol.
        symbol: String,
        /// Display name.
        name: String,
        /// Description.
        description: String,
        /// Icon URL.
        icon_url: String,
        /// Info URL.
        url: String,
        /// Total supply.
        supply: u128,
    },
    /// Create a token whose owner may mint and burn.
    CreateMutableToken {
        /// Resource address being claimed.
        resource: REAddr,
        /// Owner key (`None` for system tokens).
        owner: Option<PublicKey>,
        /// Symbol.
        symbol: String,
        /// Display name.
        name: String,
        /// Description.
        description: String,
        /// Icon URL.
        icon_url: String,
        /// Info URL.
        url: String,
    },
    /// Mint new units of a mutable token.
    MintTokens {
        /// Resource.
        resource: REAddr,
        /// Receiving account.
        to: REAddr,
        /// Amount.
        amount: u128,
    },
    /// Move tokens between accounts.
    TransferTokens {
        /// Resource.
        resource: REAddr,
        /// Sending account.
        from: REAddr,
        /// Receiving account.
        to: REAddr,
        /// Amount.
        amount: u128,
    },
    /// Destroy tokens of a mutable resource.
    BurnTokens {
        /// Resource.
        resource: REAddr,
        /// Account whose tokens are burned.
        from: REAddr,
        /// Amount.
        amount: u128,
    },
    /// Delegate native tokens to a validator.
    StakeTokens {
        /// Delegating account.
        from: REAddr,
        /// Validator.
        validator: PublicKey,
        /// Amount.
        amount: u128,
    },
    /// Withdraw stake; tokens return at the next epoch.
    UnstakeTokens {
        /// Delegating account.
        account: REAddr,
        /// Validator.
        validator: PublicKey,
        /// Amount.
        amount: u128,
    },
    /// Mark a validator as registered.
    RegisterValidator {
        /// Validator.
        validator: PublicKey,
    },
    /// Mark a validator as unregistered.
    UnregisterValidator {
        /// Validator.
        validator: PublicKey,
    },
    /// Change a validator's display metadata.
    UpdateValidatorMetadata {
        /// Validator.
        validator: PublicKey,
        /// Display name.
        name: String,
        /// Info URL.
        url: String,
    },
    /// Report validator system data (fork readiness vote).
    UpdateValidatorSystemMetadata {
        /// Validator.
        validator: PublicKey,
        /// Reported data.
        data: Hash,
    },
    /// Advance the round.
    NextRound {
        /// New round number.
        round: u64,
        /// Proposer timestamp.
        timestamp: u64,
    },
    /// Close the current epoch.
    NextEpoch {
        /// Proposer timestamp.
        timestamp: u64,
    },
    /// Pay a transaction fee in native tokens.
    PayFee {
        /// Paying account.
        from: REAddr,
        /// Amount.
        amount: u128,
    },
}

impl TxAction {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            TxAction::CreateSystem { .. } => "CreateSystem",
            TxAction::CreateFixedToken { .. } => "CreateFixedToken",
            TxAction::CreateMutableToken { .. } => "CreateMutableToken",
            TxAction::MintTokens { .. } => "MintTokens",
            TxAction::TransferTokens { .. } => "TransferTokens",
            TxAction::BurnTokens { .. } => "BurnTokens",
            TxAction::StakeTokens { .. } => "StakeTokens",
            TxAction::UnstakeTokens { .. } => "UnstakeTokens",
            TxAction::RegisterValidator { .. } => "RegisterValidator",
            TxAction::UnregisterValidator { .. } => "UnregisterValidator",
            TxAction::UpdateValidatorMetadata { .. } => "UpdateValidatorMetadata",
            TxAction::UpdateValidatorSystemMetadata { .. } => "UpdateValidatorSystemMetadata",
            TxAction::NextRound { .. } => "NextRound",
            TxAction::NextEpoch { .. } => "NextEpoch",
            TxAction::PayFee { .. } => "PayFee",
        }
    }
}
