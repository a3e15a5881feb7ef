//! Error types.
//!
//! ```text
//! EngineError
//!  ├─ Transaction { index, txn_id, TxnError }   one transaction rejected
//!  │    ├─ Parse(TxnParseError)                 malformed bytes / signature
//!  │    └─ Constraint(CmError)                  rule violation, with code + instruction index
//!  ├─ Metadata(MetadataError)                   batch verifier rejected the proof
//!  ├─ Builder(TxBuilderError)                   construction failed (genesis)
//!  └─ UnknownFork                               store records a fork we do not know
//!
//! Startup-only: RegistryError, ForkConfigError, ConfigError.
//! ```

use std::fmt;
use stratum_types::{Hash, SubstateId, TxnDecodeError};
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════
// Constraint machine
// ═══════════════════════════════════════════════════════════════════════

/// Stable code of a constraint violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmErrorCode {
    /// Down of an id that is not currently `Up` (absent or already consumed).
    MissingSubstate,
    /// Virtual down of an id that was already claimed.
    VirtualSubstateAlreadyDown,
    /// Up of an id that already exists.
    SubstateAlreadyExists,
    /// Local down of an index that was not spun up earlier, or was already consumed.
    LocalSubstateNotFound,
    /// Virtual down of a substate that cannot exist virtually.
    InvalidVirtualSubstate,
    /// Substate failed its kind's static validity check.
    StaticCheckFailed,
    /// No procedure registered for the transition.
    MissingProcedure,
    /// Context permission level below the procedure's requirement.
    PermissionLevelError,
    /// Signer does not hold the required authority.
    AuthorizationError,
    /// Procedure rejected the transition.
    ProcedureError,
    /// Group ended with a reducer state that has no finalizer.
    UnterminatedReducer,
    /// Stream ended inside a particle group.
    MissingParticleGroupEnd,
    /// Particle group with no instructions.
    EmptyParticleGroup,
    /// Resource meter aborted execution.
    Meter,
}

impl fmt::Display for CmErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A constraint violation. Aborts the whole transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code} at instruction {instruction_index}: {message}")]
pub struct CmError {
    /// Stable code.
    pub code: CmErrorCode,
    /// Index of the offending instruction.
    pub instruction_index: usize,
    /// Substate involved, when there is one.
    pub substate_id: Option<SubstateId>,
    /// Detail.
    pub message: String,
}

impl CmError {
    /// Create an error without a substate reference.
    pub fn new(code: CmErrorCode, instruction_index: usize, message: impl Into<String>) -> Self {
        Self {
            code,
            instruction_index,
            substate_id: None,
            message: message.into(),
        }
    }

    /// Attach the substate involved.
    pub fn with_substate(mut self, id: SubstateId) -> Self {
        self.substate_id = Some(id);
        self
    }
}

/// Failure raised by a procedure's authorization check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct AuthorizationError(pub String);

/// Failure raised by a procedure's reduction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ProcedureError(pub String);

impl ProcedureError {
    /// Convenience constructor.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Resource meter breach.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MeterError {
    /// Too many signed transactions in one round.
    #[error("Too many signatures in round: limit {limit}")]
    TooManySignatures {
        /// Configured limit.
        limit: u32,
    },

    /// Fee paid does not cover the fee owed.
    #[error("Insufficient fee: required {required}, paid {paid}")]
    InsufficientFee {
        /// Fee owed.
        required: u128,
        /// Fee paid.
        paid: u128,
    },
}

// ═══════════════════════════════════════════════════════════════════════
// Parsing
// ═══════════════════════════════════════════════════════════════════════

/// Errors parsing a transaction against a rule set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxnParseError {
    /// Bytes could not be decoded.
    #[error(transparent)]
    Decode(#[from] TxnDecodeError),

    /// Stream does not end with `TxnEnd`, or has instructions after it.
    #[error("Instruction stream must end with exactly one TxnEnd")]
    BadTermination,

    /// Message exceeds the configured limit.
    #[error("Message too long: {len} > {max}")]
    MessageTooLong {
        /// Message length in bytes.
        len: usize,
        /// Limit.
        max: usize,
    },

    /// Signature does not verify against the claimed key.
    #[error("Invalid signature")]
    InvalidSignature,

    /// A substate kind not supported by the active rules.
    #[error("Substate kind {0} is not supported by the active rules")]
    UnsupportedSubstate(&'static str),
}

// ═══════════════════════════════════════════════════════════════════════
// Building
// ═══════════════════════════════════════════════════════════════════════

/// Errors constructing a transaction. Nothing is ever partially applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxBuilderError {
    /// Not enough fungible input to cover the requested amount.
    #[error("{0}")]
    NotEnoughBalance(String),

    /// Requested amount is zero.
    #[error("{0}")]
    ZeroAmount(String),

    /// Resource address or identity already taken.
    #[error("{0}")]
    NotAvailable(String),

    /// Action is not valid against current state.
    #[error("{0}")]
    InvalidAction(String),

    /// A substate kind not supported by the active rules.
    #[error("Substate kind {0} is not supported by the active rules")]
    UnsupportedSubstate(&'static str),

    /// Message exceeds the configured limit.
    #[error("Message too long: {len} > {max}")]
    MessageTooLong {
        /// Message length in bytes.
        len: usize,
        /// Limit.
        max: usize,
    },

    /// `build` called with an open particle group.
    #[error("Particle group not closed")]
    UnclosedParticleGroup,
}

// ═══════════════════════════════════════════════════════════════════════
// Batch level
// ═══════════════════════════════════════════════════════════════════════

/// Post-batch metadata verification failure. Fatal to the batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    /// Batch closed an epoch other than the one the proof claims.
    #[error("Epoch mismatch: proof for epoch {claimed}, batch ended epoch {actual}")]
    EpochMismatch {
        /// Epoch in the proof.
        claimed: u64,
        /// Epoch ended by the batch.
        actual: u64,
    },

    /// Proof claims a next validator set for a batch that does not end an epoch.
    #[error("Next validator set supplied but batch does not end an epoch")]
    UnexpectedValidatorSet,

    /// Proof's next validator set differs from the computed one.
    #[error("Next validator set does not match ledger state")]
    ValidatorSetMismatch,

    /// Proof's next fork differs from the computed one.
    #[error("Next fork mismatch: proof {claimed:?}, computed {computed:?}")]
    ForkHashMismatch {
        /// Fork in the proof.
        claimed: Option<Hash>,
        /// Fork computed from votes.
        computed: Option<Hash>,
    },

    /// A verifier changed metadata produced earlier in the chain.
    #[error("Unexpected modification of base metadata")]
    BaseMetadataModified,
}

/// Why a single transaction was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxnError {
    /// Malformed transaction.
    #[error("parse: {0}")]
    Parse(#[from] TxnParseError),

    /// Rule violation.
    #[error("constraint: {0}")]
    Constraint(#[from] CmError),
}

/// Orchestrator errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A transaction was rejected; the batch was discarded.
    #[error("transaction {index} ({txn_id}) rejected: {source}")]
    Transaction {
        /// Position in the batch.
        index: usize,
        /// Transaction id.
        txn_id: Hash,
        /// Cause.
        source: TxnError,
    },

    /// A raw blob could not be decoded.
    #[error("transaction {index} undecodable: {source}")]
    Undecodable {
        /// Position in the batch.
        index: usize,
        /// Cause.
        source: TxnDecodeError,
    },

    /// Batch verification failed.
    #[error("metadata verification failed: {0}")]
    Metadata(#[from] MetadataError),

    /// Transaction construction failed.
    #[error("construction failed: {0}")]
    Builder(#[from] TxBuilderError),

    /// The store records a fork that is not configured.
    #[error("unknown fork {0}")]
    UnknownFork(Hash),

    /// Genesis already ran.
    #[error("genesis already executed")]
    GenesisAlreadyExecuted,

    /// The fork schedule is invalid.
    #[error("fork configuration: {0}")]
    ForkConfig(#[from] ForkConfigError),
}

// ═══════════════════════════════════════════════════════════════════════
// Startup
// ═══════════════════════════════════════════════════════════════════════

/// Procedure registry construction failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Two modules registered the same procedure key.
    #[error("Conflicting procedure registration for {0}")]
    DuplicateProcedure(String),

    /// Two modules defined the same substate kind.
    #[error("Conflicting definition for substate kind {0}")]
    DuplicateSubstateDefinition(&'static str),
}

/// Fork list validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForkConfigError {
    /// No forks configured.
    #[error("At least one fork must be configured")]
    Empty,

    /// First fork must be fixed at epoch 0.
    #[error("First fork must be a fixed-epoch fork at epoch 0")]
    BadGenesisFork,

    /// Duplicate fork name.
    #[error("Duplicate fork name: {0}")]
    DuplicateName(String),

    /// Duplicate fork hash.
    #[error("Duplicate fork hash: {0}")]
    DuplicateHash(Hash),

    /// Fork epochs are not strictly increasing.
    #[error("Fork {0} does not activate strictly after its predecessor")]
    NonIncreasingEpoch(String),

    /// Candidate fork not in last position.
    #[error("Candidate fork {0} must be the last fork")]
    CandidateNotLast(String),

    /// Candidate threshold outside 1..=10000.
    #[error("Candidate fork {name} has invalid required stake {required_stake}")]
    InvalidThreshold {
        /// Fork name.
        name: String,
        /// Threshold in parts per ten thousand.
        required_stake: u16,
    },

    /// Rule set could not be built.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Configuration loading failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
