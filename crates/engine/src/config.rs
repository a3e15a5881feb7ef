//! Engine and rule-set configuration.
//!
//! Both are plain `serde` structs loaded from TOML. Every field has a
//! default, so an empty file is a valid configuration:
//!
//! ```toml
//! batch_atomicity = "per_transaction"
//!
//! [rules]
//! max_rounds = 1500
//! max_sigs_per_round = 50
//!
//! [rules.fees]
//! base_fee = 10
//! per_up_substate_fee = 2
//!
//! [fork_overrides.betanet-v2]
//! epoch = 45
//! ```

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Fee schedule, in native token units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct FeeTable {
    /// Flat fee per user transaction.
    #[serde(default)]
    pub base_fee: u64,

    /// Fee per substate a user transaction spins up.
    #[serde(default)]
    pub per_up_substate_fee: u64,
}

impl FeeTable {
    /// Whether no fee is ever owed.
    pub fn is_free(&self) -> bool {
        self.base_fee == 0 && self.per_up_substate_fee == 0
    }

    /// Fee owed for a transaction creating `up_substates` substates.
    pub fn fee_for(&self, up_substates: u64) -> u128 {
        self.base_fee as u128 + self.per_up_substate_fee as u128 * up_substates as u128
    }
}

/// Limits of one rule set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RulesConfig {
    /// Highest round number allowed within an epoch.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u64,

    /// Signed transactions allowed per executed batch.
    #[serde(default = "default_max_sigs_per_round")]
    pub max_sigs_per_round: u32,

    /// Size of the validator set elected at each epoch change.
    #[serde(default = "default_max_validators")]
    pub max_validators: u32,

    /// Minimum amount per stake.
    #[serde(default = "default_min_stake")]
    pub min_stake: u64,

    /// Maximum transaction message length, in bytes.
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,

    /// Fee schedule.
    #[serde(default)]
    pub fees: FeeTable,
}

fn default_max_rounds() -> u64 {
    10_000
}

fn default_max_sigs_per_round() -> u32 {
    50
}

fn default_max_validators() -> u32 {
    100
}

fn default_min_stake() -> u64 {
    1
}

fn default_max_message_len() -> usize {
    255
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            max_sigs_per_round: default_max_sigs_per_round(),
            max_validators: default_max_validators(),
            min_stake: default_min_stake(),
            max_message_len: default_max_message_len(),
            fees: FeeTable::default(),
        }
    }
}

/// What happens to earlier transactions when one transaction in a batch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchAtomicity {
    /// The first failure discards the whole batch.
    #[default]
    AllOrNothing,
    /// Failing transactions are reported and skipped; the rest commit.
    PerTransaction,
}

/// Per-fork override of activation and limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct ForkOverride {
    /// Replaces the activation epoch (fixed forks) or minimum epoch (candidates).
    #[serde(default)]
    pub epoch: Option<u64>,

    /// Replaces the fork's `max_rounds`.
    #[serde(default)]
    pub max_rounds: Option<u64>,
}

/// Orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct EngineConfig {
    /// Failure policy within a batch.
    #[serde(default)]
    pub batch_atomicity: BatchAtomicity,

    /// Base limits used by rule sets built from this configuration.
    #[serde(default)]
    pub rules: RulesConfig,

    /// Overrides keyed by fork name.
    #[serde(default)]
    pub fork_overrides: BTreeMap<String, ForkOverride>,
}

impl EngineConfig {
    /// Parse configuration from a TOML string.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Same configuration with a different atomicity policy.
    pub fn with_batch_atomicity(mut self, batch_atomicity: BatchAtomicity) -> Self {
        self.batch_atomicity = batch_atomicity;
        self
    }
}
