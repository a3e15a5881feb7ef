//! Token balances: transfers, fees, burns and mints.
//!
//! ```text
//! Down Tokens ─► TokenBucket ─┬─► Down Tokens (same holder/resource) ─► TokenBucket
//!                             ├─► Up Tokens (change or transfer)     ─► TokenBucket
//!                             └─► end: leftover native → PayFee, other → BurnTokens
//!
//! Up Tokens (no open state) ─► MintTokens
//! ```

use super::{
    check_account, check_amount, live_supply, load_resource, require_account_signer,
    unexpected_input, unexpected_state,
};
use crate::error::{AuthorizationError, ProcedureError, RegistryError};
use crate::procedure::{
    fixed_level, no_auth, FnProcedure, ProcedureContext, ProcedureInput, ProcedureKey,
    RegistryBuilder, ReducerResult, RuleModule, SpinOp, SubstateDefinition,
};
use crate::reducer::{ReducerState, ReducerStateKind, TokenBucket};
use stratum_types::{PermissionLevel, Substate, SubstateKind, Tokens, TxAction};

/// Registers the `Tokens` kind and the token bucket and mint procedures.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokensModule;

impl RuleModule for TokensModule {
    fn name(&self) -> &'static str {
        "tokens"
    }

    fn register(&self, builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
        let user = PermissionLevel::User;
        builder.substate(SubstateDefinition::new(SubstateKind::Tokens, check_tokens))?;

        builder.procedure(
            ProcedureKey::start(SpinOp::Down(SubstateKind::Tokens)),
            FnProcedure::new(fixed_level(user), authorize_spend, open_bucket),
        )?;
        builder.procedure(
            ProcedureKey::from_state(
                ReducerStateKind::TokenBucket,
                SpinOp::Down(SubstateKind::Tokens),
            ),
            FnProcedure::new(fixed_level(user), authorize_spend, add_to_bucket),
        )?;
        builder.procedure(
            ProcedureKey::from_state(
                ReducerStateKind::TokenBucket,
                SpinOp::Up(SubstateKind::Tokens),
            ),
            FnProcedure::new(fixed_level(user), no_auth, spend_from_bucket),
        )?;
        builder.procedure(
            ProcedureKey::End(ReducerStateKind::TokenBucket),
            FnProcedure::new(fixed_level(user), authorize_leftover, close_bucket),
        )?;
        builder.procedure(
            ProcedureKey::start(SpinOp::Up(SubstateKind::Tokens)),
            FnProcedure::new(mint_level, authorize_mint, mint),
        )?;
        Ok(())
    }
}

fn check_tokens(substate: &Substate) -> Result<(), String> {
    let Substate::Tokens(tokens) = substate else {
        return Err("not a Tokens substate".to_string());
    };
    check_amount(tokens.amount)?;
    check_account("holder", &tokens.holder)?;
    if !tokens.resource.is_resource() {
        return Err("resource must be a resource address".to_string());
    }
    Ok(())
}

fn tokens<'a>(input: &ProcedureInput<'a>) -> Result<&'a Tokens, ProcedureError> {
    match input.substate() {
        Some(Substate::Tokens(tokens)) => Ok(tokens),
        _ => Err(unexpected_input(SubstateKind::Tokens)),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Token bucket
// ═══════════════════════════════════════════════════════════════════════

fn authorize_spend(
    input: &ProcedureInput<'_>,
    _: Option<&ReducerState>,
    ctx: &ProcedureContext<'_>,
) -> Result<(), AuthorizationError> {
    let tokens = tokens(input).map_err(|e| AuthorizationError(e.0))?;
    require_account_signer(ctx, &tokens.holder)
}

fn open_bucket(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    if state.is_some() {
        return Err(unexpected_state(state));
    }
    let tokens = tokens(input)?;
    Ok(ReducerResult::Incomplete(ReducerState::TokenBucket(
        TokenBucket {
            holder: tokens.holder,
            resource: tokens.resource,
            balance: tokens.amount,
            actions: Vec::new(),
        },
    )))
}

fn add_to_bucket(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    let Some(ReducerState::TokenBucket(mut bucket)) = state else {
        return Err(unexpected_state(state));
    };
    let tokens = tokens(input)?;
    if tokens.holder != bucket.holder || tokens.resource != bucket.resource {
        return Err(ProcedureError::new(
            "All inputs of a group must share holder and resource",
        ));
    }
    bucket.balance = bucket
        .balance
        .checked_add(tokens.amount)
        .ok_or_else(|| ProcedureError::new("Input total overflows"))?;
    Ok(ReducerResult::Incomplete(ReducerState::TokenBucket(bucket)))
}

fn spend_from_bucket(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    let Some(ReducerState::TokenBucket(mut bucket)) = state else {
        return Err(unexpected_state(state));
    };
    let tokens = tokens(input)?;
    if tokens.resource != bucket.resource {
        return Err(ProcedureError::new("Output resource does not match input"));
    }
    if tokens.amount > bucket.balance {
        return Err(ProcedureError(format!(
            "Output {} exceeds remaining input {}",
            tokens.amount, bucket.balance
        )));
    }
    bucket.balance -= tokens.amount;
    if tokens.holder != bucket.holder {
        bucket.actions.push(TxAction::TransferTokens {
            resource: bucket.resource,
            from: bucket.holder,
            to: tokens.holder,
            amount: tokens.amount,
        });
    }
    Ok(ReducerResult::Incomplete(ReducerState::TokenBucket(bucket)))
}

fn authorize_leftover(
    _: &ProcedureInput<'_>,
    state: Option<&ReducerState>,
    ctx: &ProcedureContext<'_>,
) -> Result<(), AuthorizationError> {
    let Some(ReducerState::TokenBucket(bucket)) = state else {
        return Ok(());
    };
    if bucket.balance == 0 || bucket.resource.is_native() {
        return Ok(());
    }
    let owner = load_resource(ctx, &bucket.resource)
        .and_then(|resource| resource.owner)
        .ok_or_else(|| AuthorizationError("Burning requires a resource owner".to_string()))?;
    ctx.require_signer(&owner, "Burning")
}

fn close_bucket(
    state: Option<ReducerState>,
    _: &ProcedureInput<'_>,
    ctx: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    let Some(ReducerState::TokenBucket(mut bucket)) = state else {
        return Err(unexpected_state(state));
    };
    if bucket.balance > 0 {
        if bucket.resource.is_native() {
            bucket.actions.push(TxAction::PayFee {
                from: bucket.holder,
                amount: bucket.balance,
            });
        } else {
            let mutable = load_resource(ctx, &bucket.resource).is_some_and(|r| r.is_mutable);
            if !mutable {
                return Err(ProcedureError::new("Cannot burn a fixed-supply token"));
            }
            bucket.actions.push(TxAction::BurnTokens {
                resource: bucket.resource,
                from: bucket.holder,
                amount: bucket.balance,
            });
        }
    }
    Ok(ReducerResult::Complete(bucket.actions))
}

// ═══════════════════════════════════════════════════════════════════════
// Mint
// ═══════════════════════════════════════════════════════════════════════

fn mint_level(input: &ProcedureInput<'_>, ctx: &ProcedureContext<'_>) -> PermissionLevel {
    let owned = tokens(input)
        .ok()
        .and_then(|tokens| load_resource(ctx, &tokens.resource))
        .is_some_and(|resource| resource.owner.is_some());
    if owned {
        PermissionLevel::User
    } else {
        PermissionLevel::System
    }
}

fn authorize_mint(
    input: &ProcedureInput<'_>,
    _: Option<&ReducerState>,
    ctx: &ProcedureContext<'_>,
) -> Result<(), AuthorizationError> {
    let tokens = tokens(input).map_err(|e| AuthorizationError(e.0))?;
    let owner = load_resource(ctx, &tokens.resource)
        .and_then(|resource| resource.owner)
        .ok_or_else(|| AuthorizationError("Minting requires a resource owner".to_string()))?;
    ctx.require_signer(&owner, "Minting")
}

fn mint(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    ctx: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    if state.is_some() {
        return Err(unexpected_state(state));
    }
    let tokens = tokens(input)?;
    let resource = load_resource(ctx, &tokens.resource)
        .ok_or_else(|| ProcedureError(format!("Unknown resource {}", tokens.resource)))?;
    if !resource.is_mutable {
        return Err(ProcedureError::new("Cannot mint a fixed-supply token"));
    }
    if live_supply(ctx, &tokens.resource)
        .and_then(|supply| supply.checked_add(tokens.amount))
        .is_none()
    {
        return Err(ProcedureError(format!(
            "Minting {} overflows the supply of {}",
            tokens.amount, tokens.resource
        )));
    }
    Ok(ReducerResult::Complete(vec![TxAction::MintTokens {
        resource: tokens.resource,
        to: tokens.holder,
        amount: tokens.amount,
    }]))
}
