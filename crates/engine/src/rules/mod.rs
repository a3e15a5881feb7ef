//! Rule modules.
//!
//! Each module registers the substate kinds it owns and the procedures that
//! move them. A rule set is the registry built from a version's module list:
//!
//! | Module | Kinds | Flows |
//! |--------|-------|-------|
//! | [`SystemModule`] | EpochData, RoundData | genesis, next round, next epoch (with unstake refunds) |
//! | [`ResourceModule`] | UnclaimedAddr, TokenResource, TokenResourceMetadata | fixed and mutable token creation |
//! | [`TokensModule`] | Tokens | token bucket (transfer, fee, burn), mint |
//! | [`StakingModule`] | StakeOwnership, PreparedUnstake | stake from a token bucket, unstake |
//! | [`ValidatorModule`] | ValidatorRegistered, ValidatorSystemMetadata | registration, fork votes |
//! | [`ValidatorMetadataModule`] | ValidatorMetadata | display metadata (V2) |

mod resources;
mod staking;
mod system;
mod tokens;
mod validators;

pub use resources::ResourceModule;
pub use staking::StakingModule;
pub use system::SystemModule;
pub use tokens::TokensModule;
pub use validators::{ValidatorMetadataModule, ValidatorModule};

use crate::error::{AuthorizationError, ProcedureError};
use crate::procedure::{ProcedureContext, ProcedureInput};
use crate::reducer::ReducerState;
use stratum_storage::SubstateIndex;
use stratum_types::{PublicKey, REAddr, Substate, SubstateKind, TokenResource};

/// Longest accepted free-text field (names, descriptions, URLs).
pub const MAX_STRING_LEN: usize = 255;

pub(crate) fn check_string(field: &str, value: &str) -> Result<(), String> {
    if value.len() > MAX_STRING_LEN {
        return Err(format!("{} longer than {} bytes", field, MAX_STRING_LEN));
    }
    Ok(())
}

pub(crate) fn check_amount(amount: u128) -> Result<(), String> {
    if amount == 0 {
        return Err("amount must be positive".to_string());
    }
    Ok(())
}

pub(crate) fn check_account(field: &str, addr: &REAddr) -> Result<(), String> {
    if !addr.is_account() {
        return Err(format!("{} must be an account address", field));
    }
    Ok(())
}

pub(crate) fn unexpected_state(state: Option<ReducerState>) -> ProcedureError {
    ProcedureError(format!("Unexpected reducer state {:?}", state.map(|s| s.kind())))
}

pub(crate) fn unexpected_input(expected: SubstateKind) -> ProcedureError {
    ProcedureError(format!("Expected a {} substate", expected))
}

/// Require the signer to control `account`.
pub(crate) fn require_account_signer(
    ctx: &ProcedureContext<'_>,
    account: &REAddr,
) -> Result<(), AuthorizationError> {
    let key = account
        .account_key()
        .ok_or_else(|| AuthorizationError(format!("{} is not an account", account)))?;
    ctx.require_signer(&key, "Spending from this account")
}

/// Load the definition of a resource.
pub(crate) fn load_resource(ctx: &ProcedureContext<'_>, addr: &REAddr) -> Option<TokenResource> {
    match ctx.reader.load_by_address(addr) {
        Some(Substate::TokenResource(resource)) => Some(resource),
        _ => None,
    }
}

/// Live supply of a resource. Native supply includes staked and unstaking
/// amounts. `None` if the sum does not fit in a `u128`.
pub(crate) fn live_supply(ctx: &ProcedureContext<'_>, resource: &REAddr) -> Option<u128> {
    let mut kinds = vec![SubstateKind::Tokens];
    if resource.is_native() {
        kinds.extend([SubstateKind::StakeOwnership, SubstateKind::PreparedUnstake]);
    }
    kinds
        .into_iter()
        .flat_map(|kind| ctx.reader.open_indexed_cursor(&SubstateIndex::of_kind(kind)))
        .map(|(_, substate)| match substate {
            Substate::Tokens(t) if t.resource == *resource => t.amount,
            Substate::StakeOwnership(s) => s.amount,
            Substate::PreparedUnstake(s) => s.amount,
            _ => 0,
        })
        .try_fold(0u128, |total, amount| total.checked_add(amount))
}

/// Whether a validator's registration flag is set.
pub(crate) fn is_registered(ctx: &ProcedureContext<'_>, validator: &PublicKey) -> bool {
    ctx.reader
        .open_indexed_cursor(&SubstateIndex::with_prefix(
            SubstateKind::ValidatorRegistered,
            validator.as_bytes().to_vec(),
        ))
        .any(|(_, substate)| {
            matches!(substate, Substate::ValidatorRegistered(r) if r.validator == *validator && r.registered)
        })
}

/// Whether the input is a virtual down.
pub(crate) fn is_virtual_down(input: &ProcedureInput<'_>) -> bool {
    matches!(
        input,
        ProcedureInput::Down(stratum_types::SubstateRef::Virtual(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_helpers() {
        assert!(check_amount(0).is_err());
        assert!(check_amount(1).is_ok());
        assert!(check_string("name", &"x".repeat(MAX_STRING_LEN)).is_ok());
        assert!(check_string("name", &"x".repeat(MAX_STRING_LEN + 1)).is_err());
        assert!(check_account("holder", &REAddr::Native).is_err());
    }
}
