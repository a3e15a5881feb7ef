//! Per-validator fields.
//!
//! Every field follows the same shape: spin the current value down (virtually
//! if it was never set) and spin the new value up, signed by the validator.

use super::{check_string, unexpected_input, unexpected_state};
use crate::error::{AuthorizationError, ProcedureError, RegistryError};
use crate::procedure::{
    fixed_level, no_auth, FnProcedure, ProcedureContext, ProcedureInput, ProcedureKey,
    RegistryBuilder, ReducerResult, RuleModule, SpinOp, SubstateDefinition,
};
use crate::reducer::{ReducerState, ReducerStateKind};
use stratum_types::{PermissionLevel, PublicKey, Substate, SubstateKind, TxAction};

/// Registers validator registration and system metadata (fork votes).
#[derive(Debug, Default, Clone, Copy)]
pub struct ValidatorModule;

impl RuleModule for ValidatorModule {
    fn name(&self) -> &'static str {
        "validators"
    }

    fn register(&self, builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
        builder.substate(
            SubstateDefinition::new(SubstateKind::ValidatorRegistered, |_| Ok(()))
                .with_virtual(|s| matches!(s, Substate::ValidatorRegistered(r) if !r.registered)),
        )?;
        builder.substate(
            SubstateDefinition::new(SubstateKind::ValidatorSystemMetadata, |_| Ok(()))
                .with_virtual(
                    |s| matches!(s, Substate::ValidatorSystemMetadata(m) if m.data.is_zero()),
                ),
        )?;
        register_field(builder, SubstateKind::ValidatorRegistered)?;
        register_field(builder, SubstateKind::ValidatorSystemMetadata)
    }
}

/// Registers validator display metadata updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct ValidatorMetadataModule;

impl RuleModule for ValidatorMetadataModule {
    fn name(&self) -> &'static str {
        "validator-metadata"
    }

    fn register(&self, builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
        builder.substate(
            SubstateDefinition::new(SubstateKind::ValidatorMetadata, check_metadata).with_virtual(
                |s| matches!(s, Substate::ValidatorMetadata(m) if m.name.is_empty() && m.url.is_empty()),
            ),
        )?;
        register_field(builder, SubstateKind::ValidatorMetadata)
    }
}

fn check_metadata(substate: &Substate) -> Result<(), String> {
    let Substate::ValidatorMetadata(metadata) = substate else {
        return Err("not a ValidatorMetadata substate".to_string());
    };
    check_string("name", &metadata.name)?;
    check_string("url", &metadata.url)
}

fn register_field(builder: &mut RegistryBuilder, kind: SubstateKind) -> Result<(), RegistryError> {
    let user = PermissionLevel::User;
    builder.procedure(
        ProcedureKey::start(SpinOp::Down(kind)),
        FnProcedure::new(fixed_level(user), authorize_validator, open_update),
    )?;
    builder.procedure(
        ProcedureKey::from_state(ReducerStateKind::ValidatorUpdate(kind), SpinOp::Up(kind)),
        FnProcedure::new(fixed_level(user), no_auth, apply_update),
    )
}

fn validator_of(substate: &Substate) -> Option<PublicKey> {
    match substate {
        Substate::ValidatorRegistered(s) => Some(s.validator),
        Substate::ValidatorMetadata(s) => Some(s.validator),
        Substate::ValidatorSystemMetadata(s) => Some(s.validator),
        _ => None,
    }
}

fn authorize_validator(
    input: &ProcedureInput<'_>,
    _: Option<&ReducerState>,
    ctx: &ProcedureContext<'_>,
) -> Result<(), AuthorizationError> {
    let validator = input
        .substate()
        .and_then(validator_of)
        .ok_or_else(|| AuthorizationError("Expected a validator field".to_string()))?;
    ctx.require_signer(&validator, "Updating a validator")
}

fn open_update(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    if state.is_some() {
        return Err(unexpected_state(state));
    }
    let previous = input
        .substate()
        .filter(|s| validator_of(s).is_some())
        .ok_or_else(|| ProcedureError::new("Expected a validator field"))?;
    Ok(ReducerResult::Incomplete(ReducerState::ValidatorUpdate(
        previous.clone(),
    )))
}

fn apply_update(
    state: Option<ReducerState>,
    input: &ProcedureInput<'_>,
    _: &ProcedureContext<'_>,
) -> Result<ReducerResult, ProcedureError> {
    let Some(ReducerState::ValidatorUpdate(previous)) = state else {
        return Err(unexpected_state(state));
    };
    let next = input
        .substate()
        .ok_or_else(|| unexpected_input(previous.kind()))?;
    if validator_of(next) != validator_of(&previous) {
        return Err(ProcedureError::new("Cannot change another validator's field"));
    }

    let action = match (&previous, next) {
        (Substate::ValidatorRegistered(prev), Substate::ValidatorRegistered(next)) => {
            match (prev.registered, next.registered) {
                (false, true) => TxAction::RegisterValidator {
                    validator: next.validator,
                },
                (true, false) => TxAction::UnregisterValidator {
                    validator: next.validator,
                },
                (true, true) => return Err(ProcedureError::new("Validator already registered")),
                (false, false) => return Err(ProcedureError::new("Validator not registered")),
            }
        }
        (Substate::ValidatorMetadata(_), Substate::ValidatorMetadata(next)) => {
            TxAction::UpdateValidatorMetadata {
                validator: next.validator,
                name: next.name.clone(),
                url: next.url.clone(),
            }
        }
        (Substate::ValidatorSystemMetadata(_), Substate::ValidatorSystemMetadata(next)) => {
            TxAction::UpdateValidatorSystemMetadata {
                validator: next.validator,
                data: next.data,
            }
        }
        _ => return Err(unexpected_input(previous.kind())),
    };
    Ok(ReducerResult::Complete(vec![action]))
}
