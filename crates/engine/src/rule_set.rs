//! Versioned rule sets.

use crate::config::RulesConfig;
use crate::constraint_machine::ConstraintMachine;
use crate::error::RegistryError;
use crate::meter::BatchMeter;
use crate::parser::TxnParser;
use crate::procedure::{ProcedureRegistry, RegistryBuilder, RuleModule};
use crate::rules::{
    ResourceModule, StakingModule, SystemModule, TokensModule, ValidatorMetadataModule,
    ValidatorModule,
};
use crate::verifier::{BatchVerifier, EpochProofVerifier};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Rule set generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RulesVersion {
    /// Tokens, staking, validator registration and fork votes.
    V1,
    /// V1 plus validator display metadata and a larger validator set.
    V2,
}

impl RulesVersion {
    /// Stable tag, part of the fork hash.
    pub fn tag(&self) -> u8 {
        match self {
            RulesVersion::V1 => 1,
            RulesVersion::V2 => 2,
        }
    }

    /// Upper bound on the configured validator set size.
    pub fn max_validators_cap(&self) -> u32 {
        match self {
            RulesVersion::V1 => 100,
            RulesVersion::V2 => 1000,
        }
    }

    fn modules(&self, config: &RulesConfig) -> Vec<Box<dyn RuleModule>> {
        let mut modules: Vec<Box<dyn RuleModule>> = vec![
            Box::new(SystemModule::new(config.max_rounds)),
            Box::new(ResourceModule),
            Box::new(TokensModule),
            Box::new(StakingModule::new(config.min_stake as u128)),
            Box::new(ValidatorModule),
        ];
        if *self >= RulesVersion::V2 {
            modules.push(Box::new(ValidatorMetadataModule));
        }
        modules
    }
}

/// An immutable rule set: procedures, limits and batch verifiers.
///
/// Cloning is cheap; the registry and verifiers are shared.
#[derive(Clone)]
pub struct RERules {
    version: RulesVersion,
    config: RulesConfig,
    registry: Arc<ProcedureRegistry>,
    verifiers: Vec<Arc<dyn BatchVerifier>>,
}

impl RERules {
    /// Build the rule set of `version` under `config`.
    ///
    /// The verifier chain starts with the [`EpochProofVerifier`]; further
    /// verifiers are appended with [`RERules::with_verifier`].
    pub fn new(version: RulesVersion, mut config: RulesConfig) -> Result<Self, RegistryError> {
        config.max_validators = config.max_validators.min(version.max_validators_cap());

        let mut builder = RegistryBuilder::new();
        for module in version.modules(&config) {
            builder = builder.module(module.as_ref())?;
            debug!(module = module.name(), "Registered rule module");
        }
        let registry = builder.build();
        debug!(?version, procedures = registry.procedure_count(), "Built rule set");

        Ok(Self {
            version,
            verifiers: vec![Arc::new(EpochProofVerifier::new(config.max_validators))],
            config,
            registry: Arc::new(registry),
        })
    }

    /// Append a verifier to the chain.
    pub fn with_verifier(mut self, verifier: Arc<dyn BatchVerifier>) -> Self {
        self.verifiers.push(verifier);
        self
    }

    /// Version.
    pub fn version(&self) -> RulesVersion {
        self.version
    }

    /// Effective limits.
    pub fn config(&self) -> &RulesConfig {
        &self.config
    }

    /// Procedure table.
    pub fn registry(&self) -> &ProcedureRegistry {
        &self.registry
    }

    /// Batch verifiers, in invocation order.
    pub fn verifiers(&self) -> &[Arc<dyn BatchVerifier>] {
        &self.verifiers
    }

    /// Parser for transactions under these rules.
    pub fn parser(&self) -> TxnParser<'_> {
        TxnParser::new(&self.registry, self.config.max_message_len)
    }

    /// Constraint machine over these rules.
    pub fn constraint_machine(&self) -> ConstraintMachine<'_> {
        ConstraintMachine::new(&self.registry)
    }

    /// Fresh meter for one batch.
    pub fn meter(&self) -> BatchMeter {
        BatchMeter::new(&self.config)
    }
}

impl fmt::Debug for RERules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RERules")
            .field("version", &self.version)
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field(
                "verifiers",
                &self.verifiers.iter().map(|v| v.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_types::SubstateKind;

    #[test]
    fn test_v1_lacks_validator_metadata() {
        let v1 = RERules::new(RulesVersion::V1, RulesConfig::default()).unwrap();
        let v2 = RERules::new(RulesVersion::V2, RulesConfig::default()).unwrap();

        assert!(!v1.registry().is_enabled(SubstateKind::ValidatorMetadata));
        assert!(v2.registry().is_enabled(SubstateKind::ValidatorMetadata));
        assert!(v2.registry().procedure_count() > v1.registry().procedure_count());

        for kind in SubstateKind::ALL {
            if kind != SubstateKind::ValidatorMetadata {
                assert!(v1.registry().is_enabled(kind), "{} missing from V1", kind);
            }
        }
    }

    #[test]
    fn test_validator_cap_per_version() {
        let config = RulesConfig {
            max_validators: 500,
            ..RulesConfig::default()
        };
        let v1 = RERules::new(RulesVersion::V1, config.clone()).unwrap();
        let v2 = RERules::new(RulesVersion::V2, config).unwrap();
        assert_eq!(v1.config().max_validators, 100);
        assert_eq!(v2.config().max_validators, 500);
    }

    #[test]
    fn test_base_verifier_first() {
        let rules = RERules::new(RulesVersion::V1, RulesConfig::default()).unwrap();
        let names: Vec<_> = rules.verifiers().iter().map(|v| v.name()).collect();
        assert_eq!(names, vec!["epoch-proof"]);
    }
}
