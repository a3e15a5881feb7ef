//! Substates: the immutable facts that make up ledger state.
//!
//! Every substate has a [`SubstateKind`] tag used for procedure dispatch and
//! index lookups, and an *index key* (the bytes it is looked up by). Kinds
//! that can be proven absent without ever being created (resource addresses,
//! per-validator fields) additionally have a *virtual id* derived only from
//! the kind tag and the index key.
//!
//! ```text
//!   (virtual / absent) ──SpinUp──► Up ──SpinDown──► Down (gone from live set)
//!           │
//!           └──VirtualSpinDown──► Down
//! ```

use crate::{Hash, PublicKey, REAddr};
use sbor::prelude::*;
use std::fmt;

/// Kind tag of a substate. The numeric values are part of the ledger format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub enum SubstateKind {
    /// A resource address that has not been claimed yet (virtual only).
    UnclaimedAddr,
    /// Token resource definition.
    TokenResource,
    /// Descriptive metadata of a token resource.
    TokenResourceMetadata,
    /// A fungible token balance held by an account.
    Tokens,
    /// Stake delegated to a validator.
    StakeOwnership,
    /// Stake waiting for the next epoch to be returned as tokens.
    PreparedUnstake,
    /// Whether a validator accepts delegation / participates in elections.
    ValidatorRegistered,
    /// Validator display metadata.
    ValidatorMetadata,
    /// Validator-reported system data (the fork it is ready for).
    ValidatorSystemMetadata,
    /// Current epoch.
    EpochData,
    /// Current round within the epoch.
    RoundData,
}

impl SubstateKind {
    /// All kinds, in tag order.
    pub const ALL: [SubstateKind; 11] = [
        SubstateKind::UnclaimedAddr,
        SubstateKind::TokenResource,
        SubstateKind::TokenResourceMetadata,
        SubstateKind::Tokens,
        SubstateKind::StakeOwnership,
        SubstateKind::PreparedUnstake,
        SubstateKind::ValidatorRegistered,
        SubstateKind::ValidatorMetadata,
        SubstateKind::ValidatorSystemMetadata,
        SubstateKind::EpochData,
        SubstateKind::RoundData,
    ];

    /// Stable one-byte tag.
    pub fn tag(&self) -> u8 {
        match self {
            SubstateKind::UnclaimedAddr => 1,
            SubstateKind::TokenResource => 2,
            SubstateKind::TokenResourceMetadata => 3,
            SubstateKind::Tokens => 4,
            SubstateKind::StakeOwnership => 5,
            SubstateKind::PreparedUnstake => 6,
            SubstateKind::ValidatorRegistered => 7,
            SubstateKind::ValidatorMetadata => 8,
            SubstateKind::ValidatorSystemMetadata => 9,
            SubstateKind::EpochData => 10,
            SubstateKind::RoundData => 11,
        }
    }

    /// Inverse of [`SubstateKind::tag`].
    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.tag() == tag)
    }

    /// Human-readable name, used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            SubstateKind::UnclaimedAddr => "UnclaimedAddr",
            SubstateKind::TokenResource => "TokenResource",
            SubstateKind::TokenResourceMetadata => "TokenResourceMetadata",
            SubstateKind::Tokens => "Tokens",
            SubstateKind::StakeOwnership => "StakeOwnership",
            SubstateKind::PreparedUnstake => "PreparedUnstake",
            SubstateKind::ValidatorRegistered => "ValidatorRegistered",
            SubstateKind::ValidatorMetadata => "ValidatorMetadata",
            SubstateKind::ValidatorSystemMetadata => "ValidatorSystemMetadata",
            SubstateKind::EpochData => "EpochData",
            SubstateKind::RoundData => "RoundData",
        }
    }
}

impl fmt::Display for SubstateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A resource address that is still free to claim.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct UnclaimedAddr {
    /// The address.
    pub addr: REAddr,
    /// Symbol the claimer intends to use; part of the ownership proof.
    pub symbol: String,
}

/// Token resource definition.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct TokenResource {
    /// Resource address.
    pub addr: REAddr,
    /// Smallest divisible unit. Only 1 is currently accepted.
    pub granularity: u128,
    /// Whether supply can change after creation.
    pub is_mutable: bool,
    /// Key allowed to mint and burn. `None` means system-controlled.
    pub owner: Option<PublicKey>,
}

/// Descriptive metadata of a token resource.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct TokenResourceMetadata {
    /// Resource address.
    pub addr: REAddr,
    /// Symbol.
    pub symbol: String,
    /// Display name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Icon URL.
    pub icon_url: String,
    /// Info URL.
    pub url: String,
}

/// A token balance.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Tokens {
    /// Holding account.
    pub holder: REAddr,
    /// Resource address.
    pub resource: REAddr,
    /// Amount, in granularity units.
    pub amount: u128,
}

/// Stake delegated by `owner` to `validator`.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct StakeOwnership {
    /// Validator key.
    pub validator: PublicKey,
    /// Delegating account.
    pub owner: REAddr,
    /// Staked native amount.
    pub amount: u128,
}

/// Unstaked amount returned to `owner` at the next epoch change.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct PreparedUnstake {
    /// Validator the stake is withdrawn from.
    pub validator: PublicKey,
    /// Account receiving the tokens.
    pub owner: REAddr,
    /// Amount.
    pub amount: u128,
}

/// Validator registration flag.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ValidatorRegistered {
    /// Validator key.
    pub validator: PublicKey,
    /// Registered flag.
    pub registered: bool,
}

/// Validator display metadata.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ValidatorMetadata {
    /// Validator key.
    pub validator: PublicKey,
    /// Display name.
    pub name: String,
    /// Info URL.
    pub url: String,
}

/// Validator system metadata. `data` is the hash of the fork the validator
/// signals readiness for, or zero.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ValidatorSystemMetadata {
    /// Validator key.
    pub validator: PublicKey,
    /// Reported data.
    pub data: Hash,
}

/// Current epoch.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct EpochData {
    /// Epoch number.
    pub epoch: u64,
}

/// Current round.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct RoundData {
    /// Round number within the epoch.
    pub round: u64,
    /// Proposer timestamp (milliseconds).
    pub timestamp: u64,
}

/// A substate, with its typed payload.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub enum Substate {
    /// See [`UnclaimedAddr`].
    UnclaimedAddr(UnclaimedAddr),
    /// See [`TokenResource`].
    TokenResource(TokenResource),
    /// See [`TokenResourceMetadata`].
    TokenResourceMetadata(TokenResourceMetadata),
    /// See [`Tokens`].
    Tokens(Tokens),
    /// See [`StakeOwnership`].
    StakeOwnership(StakeOwnership),
    /// See [`PreparedUnstake`].
    PreparedUnstake(PreparedUnstake),
    /// See [`ValidatorRegistered`].
    ValidatorRegistered(ValidatorRegistered),
    /// See [`ValidatorMetadata`].
    ValidatorMetadata(ValidatorMetadata),
    /// See [`ValidatorSystemMetadata`].
    ValidatorSystemMetadata(ValidatorSystemMetadata),
    /// See [`EpochData`].
    EpochData(EpochData),
    /// See [`RoundData`].
    RoundData(RoundData),
}

impl Substate {
    /// Kind tag.
    pub fn kind(&self) -> SubstateKind {
        match self {
            Substate::UnclaimedAddr(_) => SubstateKind::UnclaimedAddr,
            Substate::TokenResource(_) => SubstateKind::TokenResource,
            Substate::TokenResourceMetadata(_) => SubstateKind::TokenResourceMetadata,
            Substate::Tokens(_) => SubstateKind::Tokens,
            Substate::StakeOwnership(_) => SubstateKind::StakeOwnership,
            Substate::PreparedUnstake(_) => SubstateKind::PreparedUnstake,
            Substate::ValidatorRegistered(_) => SubstateKind::ValidatorRegistered,
            Substate::ValidatorMetadata(_) => SubstateKind::ValidatorMetadata,
            Substate::ValidatorSystemMetadata(_) => SubstateKind::ValidatorSystemMetadata,
            Substate::EpochData(_) => SubstateKind::EpochData,
            Substate::RoundData(_) => SubstateKind::RoundData,
        }
    }

    /// Bytes this substate is indexed by. Prefix scans over these bytes are
    /// how owners' balances, stakes and per-validator fields are found.
    ///
    /// | kind | key |
    /// |------|-----|
    /// | UnclaimedAddr, TokenResource, TokenResourceMetadata | addr |
    /// | Tokens | holder ‖ resource |
    /// | StakeOwnership, PreparedUnstake | owner ‖ validator |
    /// | Validator* | validator |
    /// | EpochData, RoundData | (empty) |
    pub fn index_key(&self) -> Vec<u8> {
        match self {
            Substate::UnclaimedAddr(s) => s.addr.to_bytes(),
            Substate::TokenResource(s) => s.addr.to_bytes(),
            Substate::TokenResourceMetadata(s) => s.addr.to_bytes(),
            Substate::Tokens(s) => [s.holder.to_bytes(), s.resource.to_bytes()].concat(),
            Substate::StakeOwnership(s) => {
                [s.owner.to_bytes(), s.validator.as_bytes().to_vec()].concat()
            }
            Substate::PreparedUnstake(s) => {
                [s.owner.to_bytes(), s.validator.as_bytes().to_vec()].concat()
            }
            Substate::ValidatorRegistered(s) => s.validator.as_bytes().to_vec(),
            Substate::ValidatorMetadata(s) => s.validator.as_bytes().to_vec(),
            Substate::ValidatorSystemMetadata(s) => s.validator.as_bytes().to_vec(),
            Substate::EpochData(_) | Substate::RoundData(_) => Vec::new(),
        }
    }

    /// The id this substate has when spun down virtually.
    pub fn virtual_id(&self) -> SubstateId {
        SubstateId::virtual_of(self.kind(), &self.index_key())
    }

    /// The resource address named by a resource-keyed substate.
    pub fn resource_addr(&self) -> Option<REAddr> {
        match self {
            Substate::UnclaimedAddr(s) => Some(s.addr),
            Substate::TokenResource(s) => Some(s.addr),
            Substate::TokenResourceMetadata(s) => Some(s.addr),
            _ => None,
        }
    }

    /// Canonical payload encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        sbor::basic_encode(self).expect("Substate serialization should never fail")
    }
}

/// Identifies a substate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub enum SubstateId {
    /// The `index`-th substate spun up by transaction `txn_id`.
    Txn {
        /// Creating transaction.
        txn_id: Hash,
        /// Position among the transaction's `SpinUp` instructions.
        index: u32,
    },
    /// Deterministic id of a virtual substate.
    Virtual(Hash),
}

impl SubstateId {
    /// Id of the `index`-th up in a transaction.
    pub fn of_txn(txn_id: Hash, index: u32) -> Self {
        SubstateId::Txn { txn_id, index }
    }

    /// Virtual id for a kind and index key.
    pub fn virtual_of(kind: SubstateKind, key: &[u8]) -> Self {
        SubstateId::Virtual(Hash::from_parts(&[b"virtual", &[kind.tag()], key]))
    }

    /// Whether this id names a virtual substate.
    pub fn is_virtual(&self) -> bool {
        matches!(self, SubstateId::Virtual(_))
    }
}

impl fmt::Display for SubstateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubstateId::Txn { txn_id, index } => write!(f, "{}:{}", txn_id, index),
            SubstateId::Virtual(hash) => write!(f, "virtual:{}", hash),
        }
    }
}

/// The target of a down instruction, after lookup.
///
/// A `Virtual` target was never materialized: spinning it down proves the
/// absence of something (an unclaimed address, an unset validator field).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubstateRef {
    /// A substate that exists in the live set.
    Materialized(SubstateId, Substate),
    /// A substate that was never spun up.
    Virtual(Substate),
}

impl SubstateRef {
    /// The substate value.
    pub fn substate(&self) -> &Substate {
        match self {
            SubstateRef::Materialized(_, substate) | SubstateRef::Virtual(substate) => substate,
        }
    }

    /// Id of the downed substate.
    pub fn id(&self) -> SubstateId {
        match self {
            SubstateRef::Materialized(id, _) => *id,
            SubstateRef::Virtual(substate) => substate.virtual_id(),
        }
    }
}
