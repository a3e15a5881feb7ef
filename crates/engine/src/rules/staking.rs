//! Delegated stake.
//!
//! Staking spends native tokens from a token bucket into a `StakeOwnership`.
//! Unstaking opens a stake bucket and moves some of it into a
//! `PreparedUnstake`, which the next epoch change refunds.

use super::{
    check_account, check_amount, is_registered, require_account_signer, unexpected_input,
    unexpected_state,
};
use crate::error::{AuthorizationError, ProcedureError, RegistryError};
use crate::procedure::{
    fixed_level, no_auth, FnProcedure, ProcedureContext, ProcedureInput, ProcedureKey,
    RegistryBuilder, ReducerResult, RuleModule, SpinOp, SubstateDefinition,
};
use crate::reducer::{ReducerState, ReducerStateKind, StakeBucket};
use stratum_types::{PermissionLevel, Substate, SubstateKind, TxAction};

/// Registers stake ownership, prepared unstakes and their procedures.
#[derive(Debug, Clone, Copy)]
pub struct StakingModule {
    min_stake: u128,
}

impl StakingModule {
    /// Module requiring every stake to be at least `min_stake`.
    pub fn new(min_stake: u128) -> Self {
        Self { min_stake }
    }
}

impl RuleModule for StakingModule {
    fn name(&self) -> &'static str {
        "staking"
    }

    fn register(&self, builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
        let user = PermissionLevel::User;
        let min_stake = self.min_stake;

        builder.substate(SubstateDefinition::new(
            SubstateKind::StakeOwnership,
            check_stake,
        ))?;
        builder.substate(SubstateDefinition::new(
            SubstateKind::PreparedUnstake,
            check_stake,
        ))?;

        builder.procedure(
            ProcedureKey::from_state(
                ReducerStateKind::TokenBucket,
                SpinOp::Up(SubstateKind::StakeOwnership),
            ),
            FnProcedure::new(
                fixed_level(user),
                no_auth,
                move |state: Option<ReducerState>,
                      input: &ProcedureInput<'_>,
                      ctx: &ProcedureContext<'_>| stake(state, input, ctx, min_stake),
            ),
        )?;

        builder.procedure(
            ProcedureKey::start(SpinOp::Down(SubstateKind::StakeOwnership)),
            FnProcedure::new(fixed_level(user), authorize_owner, open_stake_bucket),
        )?;
        builder.procedure(
            ProcedureKey::from_state(
                ReducerStateKind::StakeBucket,
                SpinOp::Down(SubstateKind::StakeOwnership),
            ),
            FnProcedure::new(fixed_level(user), authorize_owner, add_to_stake_bucket),
        )?;
        builder.procedure(
            ProcedureKey::from_state(
                ReducerStateKind::StakeBucket,
                SpinOp::Up(SubstateKind::StakeOwnership),
            ),
            FnProcedure::new(fixed_level(user), no_auth, keep_stake),
        )?;
        builder.procedure(
            ProcedureKey::from_state(
                ReducerStateKind::StakeBucket,
                SpinOp::Up(SubstateKind::PreparedUnstake),
            ),
            FnProcedure::new(fixed_level(user), no_auth, prepare_unstake),
        )?;
        builder.procedure(
            ProcedureKey::End(ReducerStateKind::StakeBucket),
            FnProcedure::new(fixed_level(user), no_auth, close_stake_bucket),
        )?;
        Ok(())
    }
}

fn check_stake(substate: &Substate) -> Result<(), String> {
    match substate {
        Substate::StakeOwnership(stake) => {
            check_amount(stake.amount)?;
            check_account("owner", &stake.owner)
        }
        Substate::PreparedUnstake(unstake) => {
            check_amount(unstake.amount)?;
            check_account("owner", &unstake.owner)
        }
        _ => Err("not a stake substate".to_string()),
    }
}

fn stake(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    ctx: &ProcedureContext<'_>,
    min_stake: u128,
) -> Result<ReducerResult, ProcedureError> {
    let Some(ReducerState::TokenBucket(mut bucket)) = state else {
        return Err(unexpected_state(state));
    };
    let Some(Substate::StakeOwnership(stake)) = input.substate() else {
        return Err(unexpected_input(SubstateKind::StakeOwnership));
    };
    if !bucket.resource.is_native() {
        return Err(ProcedureError::new("Only native tokens can be staked"));
    }
    if stake.owner != bucket.holder {
        return Err(ProcedureError::new("Stake owner must be the token holder"));
    }
    if stake.amount < min_stake {
        return Err(ProcedureError(format!(
            "Stake {} below minimum {}",
            stake.amount, min_stake
        )));
    }
    if stake.amount > bucket.balance {
        return Err(ProcedureError(format!(
            "Stake {} exceeds remaining input {}",
            stake.amount, bucket.balance
        )));
    }
    if !is_registered(ctx, &stake.validator) {
        return Err(ProcedureError(format!(
            "Validator {} is not registered",
            stake.validator
        )));
    }
    bucket.balance -= stake.amount;
    bucket.actions.push(TxAction::StakeTokens {
        from: bucket.holder,
        validator: stake.validator,
        amount: stake.amount,
    });
    Ok(ReducerResult::Incomplete(ReducerState::TokenBucket(bucket)))
}

fn authorize_owner(
    input: &ProcedureInput<'_>,
    _: Option<&ReducerState>,
    ctx: &ProcedureContext<'_>,
) -> Result<(), AuthorizationError> {
    match input.substate() {
        Some(Substate::StakeOwnership(stake)) => require_account_signer(ctx, &stake.owner),
        _ => Err(AuthorizationError("Expected a stake".to_string())),
    }
}

fn open_stake_bucket(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    if state.is_some() {
        return Err(unexpected_state(state));
    }
    let Some(Substate::StakeOwnership(stake)) = input.substate() else {
        return Err(unexpected_input(SubstateKind::StakeOwnership));
    };
    Ok(ReducerResult::Incomplete(ReducerState::StakeBucket(
        StakeBucket {
            owner: stake.owner,
            validator: stake.validator,
            balance: stake.amount,
            unstaked: 0,
        },
    )))
}

fn add_to_stake_bucket(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    let Some(ReducerState::StakeBucket(mut bucket)) = state else {
        return Err(unexpected_state(state));
    };
    let Some(Substate::StakeOwnership(stake)) = input.substate() else {
        return Err(unexpected_input(SubstateKind::StakeOwnership));
    };
    if stake.owner != bucket.owner || stake.validator != bucket.validator {
        return Err(ProcedureError::new(
            "All stakes of a group must share owner and validator",
        ));
    }
    bucket.balance = bucket
        .balance
        .checked_add(stake.amount)
        .ok_or_else(|| ProcedureError::new("Stake total overflows"))?;
    Ok(ReducerResult::Incomplete(ReducerState::StakeBucket(bucket)))
}

fn take_from_stake_bucket(
    bucket: &mut StakeBucket,
    owner: &stratum_types::REAddr,
    validator: &stratum_types::PublicKey,
    amount: u128,
) -> Result<(), ProcedureError> {
    if owner != &bucket.owner || validator != &bucket.validator {
        return Err(ProcedureError::new(
            "Output must keep the owner and validator of the input",
        ));
    }
    if amount > bucket.balance {
        return Err(ProcedureError(format!(
            "Output {} exceeds remaining stake {}",
            amount, bucket.balance
        )));
    }
    bucket.balance -= amount;
    Ok(())
}

fn keep_stake(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    let Some(ReducerState::StakeBucket(mut bucket)) = state else {
        return Err(unexpected_state(state));
    };
    let Some(Substate::StakeOwnership(stake)) = input.substate() else {
        return Err(unexpected_input(SubstateKind::StakeOwnership));
    };
    take_from_stake_bucket(&mut bucket, &stake.owner, &stake.validator, stake.amount)?;
    Ok(ReducerResult::Incomplete(ReducerState::StakeBucket(bucket)))
}

fn prepare_unstake(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    let Some(ReducerState::StakeBucket(mut bucket)) = state else {
        return Err(unexpected_state(state));
    };
    let Some(Substate::PreparedUnstake(unstake)) = input.substate() else {
        return Err(unexpected_input(SubstateKind::PreparedUnstake));
    };
    take_from_stake_bucket(
        &mut bucket,
        &unstake.owner,
        &unstake.validator,
        unstake.amount,
    )?;
    bucket.unstaked += unstake.amount;
    Ok(ReducerResult::Incomplete(ReducerState::StakeBucket(bucket)))
}

fn close_stake_bucket(
    state: Option<ReducerState>,
    _: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    let Some(ReducerState::StakeBucket(bucket)) = state else {
        return Err(unexpected_state(state));
    };
    if bucket.balance != 0 {
        return Err(ProcedureError(format!(
            "{} staked tokens unaccounted for",
            bucket.balance
        )));
    }
    if bucket.unstaked == 0 {
        return Err(ProcedureError::new("Nothing unstaked"));
    }
    Ok(ReducerResult::Complete(vec![TxAction::UnstakeTokens {
        account: bucket.owner,
        validator: bucket.validator,
        amount: bucket.unstaked,
    }]))
}
