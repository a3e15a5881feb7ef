//! Genesis bootstrapping.
//!
//! Genesis is a single unsigned transaction executed at `System` level. Its
//! groups run in a fixed order:
//!
//! ```text
//! CreateSystem ─► CreateMutableToken(native) ─► MintTokens* ─► RegisterValidator*
//!              ─► (MintTokens ─► StakeTokens)*   per genesis stake
//! ```

use crate::builder::{TxBuilder, TxnConstructionRequest};
use crate::error::TxBuilderError;
use crate::rule_set::RERules;
use stratum_storage::SubstateReader;
use stratum_types::{PublicKey, REAddr, Txn, TxAction};

/// Symbol of the native token.
pub const NATIVE_SYMBOL: &str = "xrd";

/// A validator present at genesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisValidator {
    /// Validator key.
    pub key: PublicKey,
    /// Initial delegations: (delegator account, amount).
    pub stakes: Vec<(REAddr, u128)>,
}

/// Configuration for genesis bootstrapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisConfig {
    /// Timestamp of round zero (milliseconds since Unix epoch).
    pub timestamp: u64,

    /// Native token display name.
    pub native_name: String,

    /// Native token description.
    pub native_description: String,

    /// Native token icon URL.
    pub native_icon_url: String,

    /// Native token info URL.
    pub native_url: String,

    /// Initial native balances.
    pub balances: Vec<(REAddr, u128)>,

    /// Genesis validators.
    pub validators: Vec<GenesisValidator>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self::test_minimal()
    }
}

impl GenesisConfig {
    /// Create a minimal test configuration: no balances, no validators.
    pub fn test_minimal() -> Self {
        Self {
            timestamp: 1,
            native_name: "Radix".to_string(),
            native_description: "Native token".to_string(),
            native_icon_url: String::new(),
            native_url: String::new(),
            balances: Vec::new(),
            validators: Vec::new(),
        }
    }

    /// Add an initial balance.
    pub fn with_balance(mut self, account: REAddr, amount: u128) -> Self {
        self.balances.push((account, amount));
        self
    }

    /// Add a validator with its initial delegations.
    pub fn with_validator(mut self, key: PublicKey, stakes: Vec<(REAddr, u128)>) -> Self {
        self.validators.push(GenesisValidator { key, stakes });
        self
    }

    /// The genesis actions, in execution order.
    pub fn actions(&self) -> Vec<TxAction> {
        let mut actions = vec![
            TxAction::CreateSystem {
                timestamp: self.timestamp,
            },
            TxAction::CreateMutableToken {
                resource: REAddr::Native,
                owner: None,
                symbol: NATIVE_SYMBOL.to_string(),
                name: self.native_name.clone(),
                description: self.native_description.clone(),
                icon_url: self.native_icon_url.clone(),
                url: self.native_url.clone(),
            },
        ];

        actions.extend(self.balances.iter().map(|(to, amount)| TxAction::MintTokens {
            resource: REAddr::Native,
            to: *to,
            amount: *amount,
        }));

        actions.extend(
            self.validators
                .iter()
                .map(|validator| TxAction::RegisterValidator {
                    validator: validator.key,
                }),
        );

        for validator in &self.validators {
            for (owner, amount) in &validator.stakes {
                actions.push(TxAction::MintTokens {
                    resource: REAddr::Native,
                    to: *owner,
                    amount: *amount,
                });
                actions.push(TxAction::StakeTokens {
                    from: *owner,
                    validator: validator.key,
                    amount: *amount,
                });
            }
        }
        actions
    }

    /// Build the unsigned genesis transaction.
    pub fn build_txn(
        &self,
        reader: &dyn SubstateReader,
        rules: &RERules,
    ) -> Result<Txn, TxBuilderError> {
        let request = TxnConstructionRequest {
            actions: self.actions(),
            fee_payer: None,
            message: None,
        };
        TxBuilder::from_request(reader, rules, &request)?.build_without_signature()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RulesConfig;
    use crate::constraint_machine::ExecutionContext;
    use crate::meter::NoopMeter;
    use crate::rule_set::RulesVersion;
    use stratum_storage::test_helpers::{account, MapReader};
    use stratum_types::{KeyPair, PermissionLevel};

    #[test]
    fn test_action_order() {
        let validator = KeyPair::from_seed(9).unwrap().public_key();
        let config = GenesisConfig::test_minimal()
            .with_balance(account(1), 1000)
            .with_validator(validator, vec![(account(2), 50)]);
        let names: Vec<_> = config.actions().iter().map(TxAction::name).collect();
        assert_eq!(
            names,
            vec![
                "CreateSystem",
                "CreateMutableToken",
                "MintTokens",
                "RegisterValidator",
                "MintTokens",
                "StakeTokens",
            ]
        );
    }

    #[test]
    fn test_genesis_txn_verifies_at_system_level() {
        let rules = RERules::new(RulesVersion::V1, RulesConfig::default()).unwrap();
        let reader = MapReader::default();
        let validator = KeyPair::from_seed(9).unwrap().public_key();
        let config = GenesisConfig::test_minimal()
            .with_balance(account(1), 1000)
            .with_validator(validator, vec![(account(2), 50)]);

        let txn = config.build_txn(&reader, &rules).unwrap();
        assert!(txn.signature().is_none());

        let mut meter = NoopMeter;
        let mut ctx = ExecutionContext {
            level: PermissionLevel::System,
            signer: None,
            meter: &mut meter,
        };
        let output = rules
            .constraint_machine()
            .verify(&reader, txn.id(), txn.instructions(), &mut ctx)
            .unwrap();
        assert_eq!(output.actions, config.actions());

        let mut user = ExecutionContext {
            level: PermissionLevel::User,
            signer: None,
            meter: &mut meter,
        };
        assert!(rules
            .constraint_machine()
            .verify(&reader, txn.id(), txn.instructions(), &mut user)
            .is_err());
    }
}
