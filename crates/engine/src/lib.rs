//! Deterministic substate state-transition engine.
//!
//! Ledger state is a set of typed substates, each `Up` (live) or `Down`
//! (consumed). A transaction is a stream of spin instructions in particle
//! groups; the engine accepts it only if every transition is licensed by a
//! procedure of the active rule set.
//!
//! # Architecture
//!
//! ```text
//!                ┌──────────────────────── Engine ────────────────────────┐
//!  Vec<Txn> ───► │ TxnParser ─► ConstraintMachine ─► SubstateOverlay      │
//!                │                    │                    │              │
//!                │            ProcedureRegistry      verifier chain       │
//!                │            (RERules of fork)     (EpochProof, Votes)   │
//!                └────────────────────────────────────────┬───────────────┘
//!                                                         │ CommitBatch
//!                                                         ▼
//!                                                    EngineStore
//! ```
//!
//! - [`RERules`] is an immutable rule set: a [`ProcedureRegistry`] built
//!   from rule modules, limits and a batch verifier chain.
//! - [`ConstraintMachine`] checks one transaction against a reader, without
//!   mutating it, and returns its state updates and decoded actions.
//! - [`TxBuilder`] compiles [`TxAction`](stratum_types::TxAction)s into
//!   instructions against current state.
//! - [`Forks`] holds one rule set per fork and decides activation at epoch
//!   boundaries.
//! - [`Engine`] runs batches, applies the [`BatchAtomicity`] policy and
//!   commits through [`EngineStore`](stratum_storage::EngineStore).
//!
//! # Example
//!
//! ```ignore
//! use stratum_engine::{Engine, EngineConfig, ForkConfig, GenesisConfig, RulesVersion};
//! use stratum_storage_memory::InMemoryEngineStore;
//!
//! let store = Arc::new(InMemoryEngineStore::new());
//! let mut engine = Engine::from_config(
//!     store,
//!     vec![ForkConfig::fixed("olympia", RulesVersion::V1, 0)],
//!     EngineConfig::default(),
//! )?;
//! engine.run_genesis(&GenesisConfig::test_minimal().with_balance(alice, 1_000))?;
//!
//! let request = TxnConstructionRequest::new()
//!     .action(TxAction::TransferTokens { resource: REAddr::Native, from: alice, to: bob, amount: 40 })
//!     .fee_payer(alice);
//! let txn = engine.construct(&request)?.sign_and_build(&alice_key)?;
//! let outcome = engine.execute(vec![txn], None, PermissionLevel::User)?;
//! ```

#![warn(missing_docs)]

mod builder;
mod config;
mod constraint_machine;
mod engine;
mod error;
mod forks;
mod genesis;
mod meter;
mod parser;
mod procedure;
mod reducer;
mod result;
mod rule_set;
pub mod rules;
mod verifier;
mod views;

pub use builder::{TxBuilder, TxnConstructionRequest, SYSTEM_SYMBOL};
pub use config::{BatchAtomicity, EngineConfig, FeeTable, ForkOverride, RulesConfig};
pub use constraint_machine::{CmOutput, ConstraintMachine, ExecutionContext};
pub use engine::Engine;
pub use error::{
    AuthorizationError, CmError, CmErrorCode, ConfigError, EngineError, ForkConfigError,
    MetadataError, MeterError, ProcedureError, RegistryError, TxBuilderError, TxnError,
    TxnParseError,
};
pub use forks::{
    fork_hash, has_required_stake, CandidateForkConfig, FixedEpochForkConfig, ForkConfig,
    ForkSchedule, Forks, STAKE_THRESHOLD_DENOMINATOR,
};
pub use genesis::{GenesisConfig, GenesisValidator, NATIVE_SYMBOL};
pub use meter::{BatchMeter, Meter, NoopMeter, TxnUsage};
pub use parser::{ParsedTxn, TxnParser};
pub use procedure::{
    fixed_level, no_auth, FnProcedure, Procedure, ProcedureContext, ProcedureInput, ProcedureKey,
    ProcedureRegistry, ReducerResult, RegistryBuilder, RuleModule, SpinOp, SubstateDefinition,
};
pub use reducer::{
    AddrClaimed, EpochClosing, ReducerState, ReducerStateKind, ResourceCreated, StakeBucket,
    TokenBucket,
};
pub use result::{BatchOutcome, REProcessedTxn, RejectedTxn};
pub use rule_set::{RERules, RulesVersion};
pub use verifier::{
    compute_validator_set, run_verifiers, BatchContext, BatchVerifier, EpochProofVerifier,
    ForkVotesVerifier,
};
pub use views::{compute, ComputedState, ComputedView, StakeInfo, SystemInfo, ValidatorInfo};
