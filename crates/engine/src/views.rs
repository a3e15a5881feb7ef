//! Application views aggregated from the live substate set.
//!
//! Views are pure reads. Every map is ordered, so two nodes with the same
//! state render identical views.

use std::collections::BTreeMap;
use stratum_storage::{SubstateIndex, SubstateReader};
use stratum_types::{Hash, PublicKey, REAddr, Substate, SubstateKind};

/// Which view to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputedView {
    /// Balance per account and resource.
    Balances,
    /// Supply per resource. Native supply includes staked and unstaking tokens.
    TotalSupply,
    /// Registration, stake, metadata and fork vote per validator.
    Validators,
    /// Current epoch and round.
    System,
    /// Stake per delegator and validator.
    Stakes,
}

/// Per-validator view entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidatorInfo {
    /// Registration flag.
    pub registered: bool,
    /// Total delegated stake.
    pub stake: u128,
    /// Display name.
    pub name: String,
    /// Info URL.
    pub url: String,
    /// Reported fork hash (zero when none).
    pub fork_vote: Hash,
}

/// Current system position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemInfo {
    /// Epoch.
    pub epoch: u64,
    /// Round within the epoch.
    pub round: u64,
    /// Timestamp of the round.
    pub timestamp: u64,
}

/// Per-delegation view entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StakeInfo {
    /// Currently staked.
    pub staked: u128,
    /// Waiting to be refunded at the next epoch.
    pub unstaking: u128,
}

/// A computed view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputedState {
    /// Holder → resource → amount.
    Balances(BTreeMap<REAddr, BTreeMap<REAddr, u128>>),
    /// Resource → supply.
    TotalSupply(BTreeMap<REAddr, u128>),
    /// Validator → info.
    Validators(BTreeMap<PublicKey, ValidatorInfo>),
    /// `None` before genesis.
    System(Option<SystemInfo>),
    /// (delegator, validator) → stake.
    Stakes(BTreeMap<(REAddr, PublicKey), StakeInfo>),
}

impl ComputedState {
    /// Balance of `holder` in `resource`, for a [`ComputedState::Balances`] view.
    pub fn balance(&self, holder: &REAddr, resource: &REAddr) -> Option<u128> {
        match self {
            ComputedState::Balances(balances) => Some(
                balances
                    .get(holder)
                    .and_then(|resources| resources.get(resource))
                    .copied()
                    .unwrap_or(0),
            ),
            _ => None,
        }
    }

    /// Supply of `resource`, for a [`ComputedState::TotalSupply`] view.
    pub fn supply(&self, resource: &REAddr) -> Option<u128> {
        match self {
            ComputedState::TotalSupply(supply) => Some(supply.get(resource).copied().unwrap_or(0)),
            _ => None,
        }
    }
}

fn scan(reader: &dyn SubstateReader, kind: SubstateKind) -> impl Iterator<Item = Substate> {
    reader
        .open_indexed_cursor(&SubstateIndex::of_kind(kind))
        .map(|(_, substate)| substate)
}

/// Compute a view over `reader`.
pub fn compute(reader: &dyn SubstateReader, view: ComputedView) -> ComputedState {
    match view {
        ComputedView::Balances => {
            let mut balances: BTreeMap<REAddr, BTreeMap<REAddr, u128>> = BTreeMap::new();
            for substate in scan(reader, SubstateKind::Tokens) {
                if let Substate::Tokens(tokens) = substate {
                    let balance = balances
                        .entry(tokens.holder)
                        .or_default()
                        .entry(tokens.resource)
                        .or_default();
                    *balance = balance.saturating_add(tokens.amount);
                }
            }
            ComputedState::Balances(balances)
        }

        ComputedView::TotalSupply => {
            let mut supply: BTreeMap<REAddr, u128> = BTreeMap::new();
            for substate in scan(reader, SubstateKind::Tokens) {
                if let Substate::Tokens(tokens) = substate {
                    let total = supply.entry(tokens.resource).or_default();
                    *total = total.saturating_add(tokens.amount);
                }
            }
            let locked: u128 = scan(reader, SubstateKind::StakeOwnership)
                .chain(scan(reader, SubstateKind::PreparedUnstake))
                .map(|substate| match substate {
                    Substate::StakeOwnership(s) => s.amount,
                    Substate::PreparedUnstake(s) => s.amount,
                    _ => 0,
                })
                .fold(0, u128::saturating_add);
            if locked > 0 {
                let native = supply.entry(REAddr::Native).or_default();
                *native = native.saturating_add(locked);
            }
            ComputedState::TotalSupply(supply)
        }

        ComputedView::Validators => {
            let mut validators: BTreeMap<PublicKey, ValidatorInfo> = BTreeMap::new();
            for substate in scan(reader, SubstateKind::ValidatorRegistered) {
                if let Substate::ValidatorRegistered(r) = substate {
                    validators.entry(r.validator).or_default().registered = r.registered;
                }
            }
            for substate in scan(reader, SubstateKind::ValidatorMetadata) {
                if let Substate::ValidatorMetadata(m) = substate {
                    let info = validators.entry(m.validator).or_default();
                    info.name = m.name;
                    info.url = m.url;
                }
            }
            for substate in scan(reader, SubstateKind::ValidatorSystemMetadata) {
                if let Substate::ValidatorSystemMetadata(m) = substate {
                    validators.entry(m.validator).or_default().fork_vote = m.data;
                }
            }
            for substate in scan(reader, SubstateKind::StakeOwnership) {
                if let Substate::StakeOwnership(s) = substate {
                    let info = validators.entry(s.validator).or_default();
                    info.stake = info.stake.saturating_add(s.amount);
                }
            }
            ComputedState::Validators(validators)
        }

        ComputedView::System => {
            let epoch = scan(reader, SubstateKind::EpochData).find_map(|s| match s {
                Substate::EpochData(e) => Some(e.epoch),
                _ => None,
            });
            let round = scan(reader, SubstateKind::RoundData).find_map(|s| match s {
                Substate::RoundData(r) => Some(r),
                _ => None,
            });
            ComputedState::System(epoch.zip(round).map(|(epoch, round)| SystemInfo {
                epoch,
                round: round.round,
                timestamp: round.timestamp,
            }))
        }

        ComputedView::Stakes => {
            let mut stakes: BTreeMap<(REAddr, PublicKey), StakeInfo> = BTreeMap::new();
            for substate in scan(reader, SubstateKind::StakeOwnership) {
                if let Substate::StakeOwnership(s) = substate {
                    let info = stakes.entry((s.owner, s.validator)).or_default();
                    info.staked = info.staked.saturating_add(s.amount);
                }
            }
            for substate in scan(reader, SubstateKind::PreparedUnstake) {
                if let Substate::PreparedUnstake(s) = substate {
                    let info = stakes.entry((s.owner, s.validator)).or_default();
                    info.unstaking = info.unstaking.saturating_add(s.amount);
                }
            }
            ComputedState::Stakes(stakes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_storage::test_helpers::{account, native_tokens, txn_substate_id, MapReader};
    use stratum_types::{EpochData, KeyPair, PreparedUnstake, RoundData, StakeOwnership};

    fn state() -> MapReader {
        let validator = KeyPair::from_seed(7).unwrap().public_key();
        MapReader::with(vec![
            (txn_substate_id(1, 0), native_tokens(1, 60)),
            (txn_substate_id(1, 1), native_tokens(1, 15)),
            (txn_substate_id(1, 2), native_tokens(2, 40)),
            (
                txn_substate_id(1, 3),
                Substate::StakeOwnership(StakeOwnership {
                    validator,
                    owner: account(1),
                    amount: 20,
                }),
            ),
            (
                txn_substate_id(1, 4),
                Substate::PreparedUnstake(PreparedUnstake {
                    validator,
                    owner: account(1),
                    amount: 5,
                }),
            ),
            (txn_substate_id(1, 5), Substate::EpochData(EpochData { epoch: 3 })),
            (
                txn_substate_id(1, 6),
                Substate::RoundData(RoundData {
                    round: 9,
                    timestamp: 1000,
                }),
            ),
        ])
    }

    #[test]
    fn test_balances_sum_per_holder() {
        let balances = compute(&state(), ComputedView::Balances);
        assert_eq!(balances.balance(&account(1), &REAddr::Native), Some(75));
        assert_eq!(balances.balance(&account(2), &REAddr::Native), Some(40));
        assert_eq!(balances.balance(&account(3), &REAddr::Native), Some(0));
        assert_eq!(balances.supply(&REAddr::Native), None);
    }

    #[test]
    fn test_native_supply_counts_stake() {
        let supply = compute(&state(), ComputedView::TotalSupply);
        assert_eq!(supply.supply(&REAddr::Native), Some(140));
    }

    #[test]
    fn test_oversized_totals_saturate() {
        let reader = MapReader::with(vec![
            (txn_substate_id(1, 0), native_tokens(1, u128::MAX)),
            (txn_substate_id(1, 1), native_tokens(1, u128::MAX - 1)),
        ]);
        let balances = compute(&reader, ComputedView::Balances);
        assert_eq!(balances.balance(&account(1), &REAddr::Native), Some(u128::MAX));
        let supply = compute(&reader, ComputedView::TotalSupply);
        assert_eq!(supply.supply(&REAddr::Native), Some(u128::MAX));
    }

    #[test]
    fn test_stakes_and_validators() {
        let validator = KeyPair::from_seed(7).unwrap().public_key();
        let ComputedState::Stakes(stakes) = compute(&state(), ComputedView::Stakes) else {
            panic!("wrong view");
        };
        assert_eq!(
            stakes.get(&(account(1), validator)),
            Some(&StakeInfo {
                staked: 20,
                unstaking: 5
            })
        );

        let ComputedState::Validators(validators) = compute(&state(), ComputedView::Validators)
        else {
            panic!("wrong view");
        };
        assert_eq!(validators[&validator].stake, 20);
        assert!(!validators[&validator].registered);
    }

    #[test]
    fn test_system_view() {
        assert_eq!(
            compute(&state(), ComputedView::System),
            ComputedState::System(Some(SystemInfo {
                epoch: 3,
                round: 9,
                timestamp: 1000
            }))
        );
        assert_eq!(
            compute(&MapReader::default(), ComputedView::System),
            ComputedState::System(None)
        );
    }
}
