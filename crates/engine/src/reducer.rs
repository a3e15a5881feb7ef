//! Reducer states carried across instructions within one particle group.

use std::collections::VecDeque;
use stratum_types::{
    PreparedUnstake, PublicKey, REAddr, RoundData, Substate, SubstateKind, TokenResource, TxAction,
};

/// Dispatch tag of a [`ReducerState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReducerStateKind {
    /// See [`TokenBucket`].
    TokenBucket,
    /// See [`AddrClaimed`].
    AddrClaimed,
    /// See [`ResourceCreated`].
    ResourceCreated,
    /// Epoch state created at genesis; waiting for the first round.
    SystemCreated,
    /// See [`StakeBucket`].
    StakeBucket,
    /// A per-validator field of the given kind was spun down.
    ValidatorUpdate(SubstateKind),
    /// Round state spun down; a round or epoch change is in progress.
    RoundClosing,
    /// See [`EpochClosing`].
    EpochClosing,
    /// New epoch state created; waiting for round zero.
    EpochOpened,
}

/// Tokens taken out of one holder's balances, not yet fully spent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBucket {
    /// Account the inputs came from.
    pub holder: REAddr,
    /// Resource of every input.
    pub resource: REAddr,
    /// Input total minus outputs so far.
    pub balance: u128,
    /// Decoded outputs (transfers, stakes) in instruction order.
    pub actions: Vec<TxAction>,
}

/// A resource address was claimed by virtual down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrClaimed {
    /// Address.
    pub addr: REAddr,
    /// Symbol used in the claim.
    pub symbol: String,
}

/// Resource definition created; waiting for supply (fixed) and metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceCreated {
    /// Definition.
    pub resource: TokenResource,
    /// Symbol used in the claim.
    pub symbol: String,
    /// Fixed supply and its recipient, once minted.
    pub supply: Option<(REAddr, u128)>,
}

/// Stake taken out of one owner's delegation to one validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeBucket {
    /// Delegating account.
    pub owner: REAddr,
    /// Validator.
    pub validator: PublicKey,
    /// Input total minus outputs so far.
    pub balance: u128,
    /// Amount moved to prepared unstakes.
    pub unstaked: u128,
}

/// Epoch state spun down; prepared unstakes are being refunded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochClosing {
    /// Round state that was closed.
    pub closed_round: RoundData,
    /// Epoch being closed.
    pub epoch: u64,
    /// Unstakes spun down whose refund has not been spun up yet.
    pub pending_refunds: VecDeque<PreparedUnstake>,
}

/// Transient accumulator of one particle group reduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReducerState {
    /// See [`TokenBucket`].
    TokenBucket(TokenBucket),
    /// See [`AddrClaimed`].
    AddrClaimed(AddrClaimed),
    /// See [`ResourceCreated`].
    ResourceCreated(ResourceCreated),
    /// Genesis epoch state created.
    SystemCreated,
    /// See [`StakeBucket`].
    StakeBucket(StakeBucket),
    /// Previous value of a validator field.
    ValidatorUpdate(Substate),
    /// Previous round state.
    RoundClosing(RoundData),
    /// See [`EpochClosing`].
    EpochClosing(EpochClosing),
    /// New epoch number.
    EpochOpened(u64),
}

impl ReducerState {
    /// Dispatch tag.
    pub fn kind(&self) -> ReducerStateKind {
        match self {
            ReducerState::TokenBucket(_) => ReducerStateKind::TokenBucket,
            ReducerState::AddrClaimed(_) => ReducerStateKind::AddrClaimed,
            ReducerState::ResourceCreated(_) => ReducerStateKind::ResourceCreated,
            ReducerState::SystemCreated => ReducerStateKind::SystemCreated,
            ReducerState::StakeBucket(_) => ReducerStateKind::StakeBucket,
            ReducerState::ValidatorUpdate(prev) => ReducerStateKind::ValidatorUpdate(prev.kind()),
            ReducerState::RoundClosing(_) => ReducerStateKind::RoundClosing,
            ReducerState::EpochClosing(_) => ReducerStateKind::EpochClosing,
            ReducerState::EpochOpened(_) => ReducerStateKind::EpochOpened,
        }
    }
}
