//! Token resource creation.
//!
//! ```text
//! VirtualDown UnclaimedAddr ─► AddrClaimed ─► Up TokenResource ─► ResourceCreated
//!     ResourceCreated ─► Up Tokens (fixed supply only) ─► ResourceCreated
//!     ResourceCreated ─► Up TokenResourceMetadata ─► CreateFixedToken | CreateMutableToken
//! ```
//!
//! `AddrClaimed` for the system address continues in the system module.

use super::{check_string, is_virtual_down, unexpected_input, unexpected_state};
use crate::error::{AuthorizationError, ProcedureError, RegistryError};
use crate::procedure::{
    fixed_level, no_auth, FnProcedure, ProcedureContext, ProcedureInput, ProcedureKey,
    RegistryBuilder, ReducerResult, RuleModule, SpinOp, SubstateDefinition,
};
use crate::reducer::{AddrClaimed, ReducerState, ReducerStateKind, ResourceCreated};
use stratum_types::{is_valid_symbol, PermissionLevel, REAddr, Substate, SubstateKind, TxAction};

/// Registers resource definitions and the creation flow.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResourceModule;

impl RuleModule for ResourceModule {
    fn name(&self) -> &'static str {
        "resources"
    }

    fn register(&self, builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
        let user = PermissionLevel::User;

        builder.substate(
            SubstateDefinition::new(SubstateKind::UnclaimedAddr, |_| {
                Err("unclaimed addresses only exist virtually".to_string())
            })
            .with_virtual(|substate| {
                matches!(substate, Substate::UnclaimedAddr(u)
                    if !u.addr.is_account() && is_valid_symbol(&u.symbol))
            }),
        )?;
        builder.substate(SubstateDefinition::new(
            SubstateKind::TokenResource,
            check_resource,
        ))?;
        builder.substate(SubstateDefinition::new(
            SubstateKind::TokenResourceMetadata,
            check_metadata,
        ))?;

        builder.procedure(
            ProcedureKey::start(SpinOp::Down(SubstateKind::UnclaimedAddr)),
            FnProcedure::new(claim_level, authorize_claim, claim),
        )?;
        builder.procedure(
            ProcedureKey::from_state(
                ReducerStateKind::AddrClaimed,
                SpinOp::Up(SubstateKind::TokenResource),
            ),
            FnProcedure::new(fixed_level(user), no_auth, define_resource),
        )?;
        builder.procedure(
            ProcedureKey::from_state(
                ReducerStateKind::ResourceCreated,
                SpinOp::Up(SubstateKind::Tokens),
            ),
            FnProcedure::new(fixed_level(user), no_auth, issue_supply),
        )?;
        builder.procedure(
            ProcedureKey::from_state(
                ReducerStateKind::ResourceCreated,
                SpinOp::Up(SubstateKind::TokenResourceMetadata),
            ),
            FnProcedure::new(fixed_level(user), no_auth, describe_resource),
        )?;
        Ok(())
    }
}

fn check_resource(substate: &Substate) -> Result<(), String> {
    let Substate::TokenResource(resource) = substate else {
        return Err("not a TokenResource substate".to_string());
    };
    if !resource.addr.is_resource() {
        return Err("addr must be a resource address".to_string());
    }
    if resource.granularity != 1 {
        return Err(format!("granularity {} not supported", resource.granularity));
    }
    if !resource.is_mutable && resource.owner.is_some() {
        return Err("fixed-supply tokens cannot have an owner".to_string());
    }
    Ok(())
}

fn check_metadata(substate: &Substate) -> Result<(), String> {
    let Substate::TokenResourceMetadata(metadata) = substate else {
        return Err("not a TokenResourceMetadata substate".to_string());
    };
    if !is_valid_symbol(&metadata.symbol) {
        return Err(format!("invalid symbol {:?}", metadata.symbol));
    }
    check_string("name", &metadata.name)?;
    check_string("description", &metadata.description)?;
    check_string("icon_url", &metadata.icon_url)?;
    check_string("url", &metadata.url)
}

fn claimed_addr(input: &ProcedureInput<'_>) -> Option<(REAddr, String)> {
    match input.substate() {
        Some(Substate::UnclaimedAddr(unclaimed)) => {
            Some((unclaimed.addr, unclaimed.symbol.clone()))
        }
        _ => None,
    }
}

fn claim_level(input: &ProcedureInput<'_>, _: &ProcedureContext<'_>) -> PermissionLevel {
    match claimed_addr(input) {
        Some((REAddr::HashedKey(_), _)) => PermissionLevel::User,
        _ => PermissionLevel::System,
    }
}

fn authorize_claim(
    input: &ProcedureInput<'_>,
    _: Option<&ReducerState>,
    ctx: &ProcedureContext<'_>,
) -> Result<(), AuthorizationError> {
    let (addr, symbol) = claimed_addr(input)
        .ok_or_else(|| AuthorizationError("Expected an unclaimed address".to_string()))?;
    let signer = ctx
        .signer
        .ok_or_else(|| AuthorizationError("Claiming an address requires a signature".to_string()))?;
    if !addr.allows_create_with(&signer, &symbol) {
        return Err(AuthorizationError(format!(
            "Key does not own address {} for symbol {}",
            addr, symbol
        )));
    }
    Ok(())
}

fn claim(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    if state.is_some() {
        return Err(unexpected_state(state));
    }
    if !is_virtual_down(input) {
        return Err(ProcedureError::new("Addresses can only be claimed virtually"));
    }
    let (addr, symbol) =
        claimed_addr(input).ok_or_else(|| unexpected_input(SubstateKind::UnclaimedAddr))?;
    Ok(ReducerResult::Incomplete(ReducerState::AddrClaimed(
        AddrClaimed { addr, symbol },
    )))
}

fn define_resource(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    let Some(ReducerState::AddrClaimed(claimed)) = state else {
        return Err(unexpected_state(state));
    };
    let Some(Substate::TokenResource(resource)) = input.substate() else {
        return Err(unexpected_input(SubstateKind::TokenResource));
    };
    if resource.addr != claimed.addr {
        return Err(ProcedureError(format!(
            "Resource {} does not match claimed address {}",
            resource.addr, claimed.addr
        )));
    }
    Ok(ReducerResult::Incomplete(ReducerState::ResourceCreated(
        ResourceCreated {
            resource: resource.clone(),
            symbol: claimed.symbol,
            supply: None,
        },
    )))
}

fn issue_supply(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    let Some(ReducerState::ResourceCreated(mut created)) = state else {
        return Err(unexpected_state(state));
    };
    let Some(Substate::Tokens(tokens)) = input.substate() else {
        return Err(unexpected_input(SubstateKind::Tokens));
    };
    if created.resource.is_mutable {
        return Err(ProcedureError::new(
            "Mutable tokens are minted after creation, not issued with it",
        ));
    }
    if created.supply.is_some() {
        return Err(ProcedureError::new("Supply already issued"));
    }
    if tokens.resource != created.resource.addr {
        return Err(ProcedureError::new("Supply must be of the created resource"));
    }
    created.supply = Some((tokens.holder, tokens.amount));
    Ok(ReducerResult::Incomplete(ReducerState::ResourceCreated(
        created,
    )))
}

fn describe_resource(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    let Some(ReducerState::ResourceCreated(created)) = state else {
        return Err(unexpected_state(state));
    };
    let Some(Substate::TokenResourceMetadata(metadata)) = input.substate() else {
        return Err(unexpected_input(SubstateKind::TokenResourceMetadata));
    };
    if metadata.addr != created.resource.addr || metadata.symbol != created.symbol {
        return Err(ProcedureError::new(
            "Metadata must name the claimed address and symbol",
        ));
    }

    let action = if created.resource.is_mutable {
        TxAction::CreateMutableToken {
            resource: created.resource.addr,
            owner: created.resource.owner,
            symbol: metadata.symbol.clone(),
            name: metadata.name.clone(),
            description: metadata.description.clone(),
            icon_url: metadata.icon_url.clone(),
            url: metadata.url.clone(),
        }
    } else {
        let (to, supply) = created
            .supply
            .ok_or_else(|| ProcedureError::new("Fixed-supply token created without supply"))?;
        TxAction::CreateFixedToken {
            resource: created.resource.addr,
            to,
            symbol: metadata.symbol.clone(),
            name: metadata.name.clone(),
            description: metadata.description.clone(),
            icon_url: metadata.icon_url.clone(),
            url: metadata.url.clone(),
            supply,
        }
    };
    Ok(ReducerResult::Complete(vec![action]))
}
