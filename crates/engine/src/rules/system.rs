//! Epoch and round state.
//!
//! ```text
//! genesis:    AddrClaimed(System) ─► Up EpochData(0) ─► Up RoundData(0)
//! next round: Down RoundData ─► Up RoundData(r' > r, r' <= max_rounds)
//! next epoch: Down RoundData ─► Down EpochData(e)
//!               ─► (Down PreparedUnstake ─► Up Tokens refund)*
//!               ─► Up EpochData(e + 1) ─► Up RoundData(0)
//! ```
//!
//! Every procedure here requires `System` level.

use super::{unexpected_input, unexpected_state};
use crate::error::{ProcedureError, RegistryError};
use crate::procedure::{
    fixed_level, no_auth, FnProcedure, ProcedureContext, ProcedureInput, ProcedureKey,
    RegistryBuilder, ReducerResult, RuleModule, SpinOp, SubstateDefinition,
};
use crate::reducer::{EpochClosing, ReducerState, ReducerStateKind};
use std::collections::VecDeque;
use stratum_storage::SubstateIndex;
use stratum_types::{PermissionLevel, REAddr, RoundData, Substate, SubstateKind, TxAction};

/// Registers epoch/round state and the system transitions.
#[derive(Debug, Clone, Copy)]
pub struct SystemModule {
    max_rounds: u64,
}

impl SystemModule {
    /// Module allowing rounds up to `max_rounds` within an epoch.
    pub fn new(max_rounds: u64) -> Self {
        Self { max_rounds }
    }
}

impl RuleModule for SystemModule {
    fn name(&self) -> &'static str {
        "system"
    }

    fn register(&self, builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
        let system = PermissionLevel::System;
        let max_rounds = self.max_rounds;

        builder.substate(SubstateDefinition::new(SubstateKind::EpochData, |_| Ok(())))?;
        builder.substate(SubstateDefinition::new(SubstateKind::RoundData, |_| Ok(())))?;

        builder.procedure(
            ProcedureKey::from_state(
                ReducerStateKind::AddrClaimed,
                SpinOp::Up(SubstateKind::EpochData),
            ),
            FnProcedure::new(fixed_level(system), no_auth, create_epoch),
        )?;
        builder.procedure(
            ProcedureKey::from_state(
                ReducerStateKind::SystemCreated,
                SpinOp::Up(SubstateKind::RoundData),
            ),
            FnProcedure::new(fixed_level(system), no_auth, create_round),
        )?;
        builder.procedure(
            ProcedureKey::start(SpinOp::Down(SubstateKind::RoundData)),
            FnProcedure::new(fixed_level(system), no_auth, close_round),
        )?;
        builder.procedure(
            ProcedureKey::from_state(
                ReducerStateKind::RoundClosing,
                SpinOp::Up(SubstateKind::RoundData),
            ),
            FnProcedure::new(
                fixed_level(system),
                no_auth,
                move |state: Option<ReducerState>,
                      input: &ProcedureInput<'_>,
                      _: &ProcedureContext<'_>| next_round(state, input, max_rounds),
            ),
        )?;
        builder.procedure(
            ProcedureKey::from_state(
                ReducerStateKind::RoundClosing,
                SpinOp::Down(SubstateKind::EpochData),
            ),
            FnProcedure::new(fixed_level(system), no_auth, close_epoch),
        )?;
        builder.procedure(
            ProcedureKey::from_state(
                ReducerStateKind::EpochClosing,
                SpinOp::Down(SubstateKind::PreparedUnstake),
            ),
            FnProcedure::new(fixed_level(system), no_auth, queue_refund),
        )?;
        builder.procedure(
            ProcedureKey::from_state(
                ReducerStateKind::EpochClosing,
                SpinOp::Up(SubstateKind::Tokens),
            ),
            FnProcedure::new(fixed_level(system), no_auth, refund),
        )?;
        builder.procedure(
            ProcedureKey::from_state(
                ReducerStateKind::EpochClosing,
                SpinOp::Up(SubstateKind::EpochData),
            ),
            FnProcedure::new(fixed_level(system), no_auth, open_epoch),
        )?;
        builder.procedure(
            ProcedureKey::from_state(
                ReducerStateKind::EpochOpened,
                SpinOp::Up(SubstateKind::RoundData),
            ),
            FnProcedure::new(fixed_level(system), no_auth, first_round),
        )?;
        Ok(())
    }
}

fn round(input: &ProcedureInput<'_>) -> Result<RoundData, ProcedureError> {
    match input.substate() {
        Some(Substate::RoundData(round)) => Ok(round.clone()),
        _ => Err(unexpected_input(SubstateKind::RoundData)),
    }
}

fn epoch(input: &ProcedureInput<'_>) -> Result<u64, ProcedureError> {
    match input.substate() {
        Some(Substate::EpochData(epoch)) => Ok(epoch.epoch),
        _ => Err(unexpected_input(SubstateKind::EpochData)),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Genesis
// ═══════════════════════════════════════════════════════════════════════

fn create_epoch(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    let Some(ReducerState::AddrClaimed(claimed)) = state else {
        return Err(unexpected_state(state));
    };
    if claimed.addr != REAddr::System {
        return Err(ProcedureError::new(
            "Epoch state can only follow a claim of the system address",
        ));
    }
    if epoch(input)? != 0 {
        return Err(ProcedureError::new("System must start at epoch 0"));
    }
    Ok(ReducerResult::Incomplete(ReducerState::SystemCreated))
}

fn create_round(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    let Some(ReducerState::SystemCreated) = state else {
        return Err(unexpected_state(state));
    };
    let round = round(input)?;
    if round.round != 0 {
        return Err(ProcedureError::new("System must start at round 0"));
    }
    Ok(ReducerResult::Complete(vec![TxAction::CreateSystem {
        timestamp: round.timestamp,
    }]))
}

// ═══════════════════════════════════════════════════════════════════════
// Rounds
// ═══════════════════════════════════════════════════════════════════════

fn close_round(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    if state.is_some() {
        return Err(unexpected_state(state));
    }
    Ok(ReducerResult::Incomplete(ReducerState::RoundClosing(round(
        input,
    )?)))
}

fn next_round(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    max_rounds: u64,
) -> Result<ReducerResult, ProcedureError> {
    let Some(ReducerState::RoundClosing(previous)) = state else {
        return Err(unexpected_state(state));
    };
    let next = round(input)?;
    if next.round <= previous.round {
        return Err(ProcedureError(format!(
            "Round must advance: {} -> {}",
            previous.round, next.round
        )));
    }
    if next.round > max_rounds {
        return Err(ProcedureError(format!(
            "Round {} exceeds max rounds {}",
            next.round, max_rounds
        )));
    }
    if next.timestamp < previous.timestamp {
        return Err(ProcedureError::new("Timestamp must not go backwards"));
    }
    Ok(ReducerResult::Complete(vec![TxAction::NextRound {
        round: next.round,
        timestamp: next.timestamp,
    }]))
}

// ═══════════════════════════════════════════════════════════════════════
// Epochs
// ═══════════════════════════════════════════════════════════════════════

fn close_epoch(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    let Some(ReducerState::RoundClosing(closed_round)) = state else {
        return Err(unexpected_state(state));
    };
    Ok(ReducerResult::Incomplete(ReducerState::EpochClosing(
        EpochClosing {
            closed_round,
            epoch: epoch(input)?,
            pending_refunds: VecDeque::new(),
        },
    )))
}

fn queue_refund(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    let Some(ReducerState::EpochClosing(mut closing)) = state else {
        return Err(unexpected_state(state));
    };
    let Some(Substate::PreparedUnstake(unstake)) = input.substate() else {
        return Err(unexpected_input(SubstateKind::PreparedUnstake));
    };
    closing.pending_refunds.push_back(unstake.clone());
    Ok(ReducerResult::Incomplete(ReducerState::EpochClosing(closing)))
}

fn refund(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    let Some(ReducerState::EpochClosing(mut closing)) = state else {
        return Err(unexpected_state(state));
    };
    let Some(Substate::Tokens(tokens)) = input.substate() else {
        return Err(unexpected_input(SubstateKind::Tokens));
    };
    let unstake = closing
        .pending_refunds
        .pop_front()
        .ok_or_else(|| ProcedureError::new("Refund without a prepared unstake"))?;
    if tokens.holder != unstake.owner
        || !tokens.resource.is_native()
        || tokens.amount != unstake.amount
    {
        return Err(ProcedureError::new(
            "Refund must return the exact unstaked amount to its owner",
        ));
    }
    Ok(ReducerResult::Incomplete(ReducerState::EpochClosing(closing)))
}

fn open_epoch(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    ctx: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    let Some(ReducerState::EpochClosing(closing)) = state else {
        return Err(unexpected_state(state));
    };
    if !closing.pending_refunds.is_empty() {
        return Err(ProcedureError::new("Prepared unstakes not refunded"));
    }
    let remaining = ctx
        .reader
        .open_indexed_cursor(&SubstateIndex::of_kind(SubstateKind::PreparedUnstake))
        .next();
    if remaining.is_some() {
        return Err(ProcedureError::new(
            "All prepared unstakes must be refunded at epoch change",
        ));
    }
    let next = epoch(input)?;
    if next != closing.epoch + 1 {
        return Err(ProcedureError(format!(
            "Epoch must advance by one: {} -> {}",
            closing.epoch, next
        )));
    }
    Ok(ReducerResult::Incomplete(ReducerState::EpochOpened(next)))
}

fn first_round(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    let Some(ReducerState::EpochOpened(_)) = state else {
        return Err(unexpected_state(state));
    };
    let round = round(input)?;
    if round.round != 0 {
        return Err(ProcedureError::new("Epoch must start at round 0"));
    }
    Ok(ReducerResult::Complete(vec![TxAction::NextEpoch {
        timestamp: round.timestamp,
    }]))
}
