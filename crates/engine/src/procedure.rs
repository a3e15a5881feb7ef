//! Procedures and the registry that dispatches to them.
//!
//! A procedure is the validation, authorization and reduction logic for one
//! [`ProcedureKey`]: either a transition `(open reducer state, spin op)` or
//! the finalizer of a reducer state at group end.
//!
//! ```text
//!   key ──► permission_level ──► meter ──► authorize (skipped at System) ──► reduce
//! ```
//!
//! The registry is assembled once per rule set from [`RuleModule`]s and never
//! mutated afterwards. Two modules claiming the same key is a startup error.

use crate::error::{AuthorizationError, ProcedureError, RegistryError};
use crate::reducer::{ReducerState, ReducerStateKind};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use stratum_storage::SubstateReader;
use stratum_types::{PermissionLevel, PublicKey, Substate, SubstateKind, SubstateRef, TxAction};

// ═══════════════════════════════════════════════════════════════════════
// Keys
// ═══════════════════════════════════════════════════════════════════════

/// The spin operation half of a transition key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SpinOp {
    /// `SpinUp` of a kind.
    Up(SubstateKind),
    /// `SpinDown` / `LocalSpinDown` / `VirtualSpinDown` of a kind.
    Down(SubstateKind),
}

/// Identifies a procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProcedureKey {
    /// Transition from the open reducer state (or none) via a spin op.
    Transition {
        /// Open reducer state, if any.
        input: Option<ReducerStateKind>,
        /// Spin operation.
        op: SpinOp,
    },
    /// Group-end finalizer of a reducer state.
    End(ReducerStateKind),
}

impl ProcedureKey {
    /// Transition key.
    pub fn transition(input: Option<ReducerStateKind>, op: SpinOp) -> Self {
        ProcedureKey::Transition { input, op }
    }

    /// Transition key with no open reducer state.
    pub fn start(op: SpinOp) -> Self {
        ProcedureKey::Transition { input: None, op }
    }

    /// Transition key from an open reducer state.
    pub fn from_state(input: ReducerStateKind, op: SpinOp) -> Self {
        ProcedureKey::Transition {
            input: Some(input),
            op,
        }
    }
}

impl fmt::Display for ProcedureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcedureKey::Transition { input: None, op } => write!(f, "(none, {:?})", op),
            ProcedureKey::Transition {
                input: Some(state),
                op,
            } => write!(f, "({:?}, {:?})", state, op),
            ProcedureKey::End(state) => write!(f, "end({:?})", state),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Procedure interface
// ═══════════════════════════════════════════════════════════════════════

/// What a procedure is invoked on.
#[derive(Debug, Clone, Copy)]
pub enum ProcedureInput<'a> {
    /// A substate being spun up.
    Up(&'a Substate),
    /// A substate being spun down.
    Down(&'a SubstateRef),
    /// Group end.
    End,
}

impl<'a> ProcedureInput<'a> {
    /// The substate involved, if any.
    pub fn substate(&self) -> Option<&'a Substate> {
        match *self {
            ProcedureInput::Up(substate) => Some(substate),
            ProcedureInput::Down(substate_ref) => Some(substate_ref.substate()),
            ProcedureInput::End => None,
        }
    }
}

/// Execution context handed to every procedure call.
pub struct ProcedureContext<'a> {
    /// Level the transaction executes at.
    pub level: PermissionLevel,
    /// Verified signer, if the transaction is signed.
    pub signer: Option<PublicKey>,
    /// State as of the current instruction, including this transaction's effects.
    pub reader: &'a dyn SubstateReader,
}

impl ProcedureContext<'_> {
    /// Require the signer to be `key`.
    pub fn require_signer(&self, key: &PublicKey, what: &str) -> Result<(), AuthorizationError> {
        match self.signer {
            Some(signer) if signer == *key => Ok(()),
            Some(_) => Err(AuthorizationError(format!("{} requires a different key", what))),
            None => Err(AuthorizationError(format!("{} requires a signature", what))),
        }
    }
}

/// Outcome of a reduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReducerResult {
    /// More instructions are needed.
    Incomplete(ReducerState),
    /// The reduction finished, decoding into these actions.
    Complete(Vec<TxAction>),
}

/// Validation, authorization and reduction logic for one key.
pub trait Procedure: Send + Sync {
    /// Minimum level required to invoke this procedure.
    fn permission_level(&self, input: &ProcedureInput<'_>, ctx: &ProcedureContext<'_>)
        -> PermissionLevel;

    /// Check the signer's authority. Not called at `System` level.
    fn authorize(
        &self,
        input: &ProcedureInput<'_>,
        state: Option<&ReducerState>,
        ctx: &ProcedureContext<'_>,
    ) -> Result<(), AuthorizationError>;

    /// Fold the input into the reducer state.
    fn reduce(
        &self,
        state: Option<ReducerState>,
        input: &ProcedureInput<'_>,
        ctx: &ProcedureContext<'_>,
    ) -> Result<ReducerResult, ProcedureError>;
}

/// A procedure assembled from three closures.
pub struct FnProcedure<L, A, R> {
    level: L,
    authorize: A,
    reduce: R,
}

impl<L, A, R> FnProcedure<L, A, R>
where
    L: Fn(&ProcedureInput<'_>, &ProcedureContext<'_>) -> PermissionLevel + Send + Sync + 'static,
    A: Fn(&ProcedureInput<'_>, Option<&ReducerState>, &ProcedureContext<'_>) -> Result<(), AuthorizationError>
        + Send
        + Sync
        + 'static,
    R: Fn(
            Option<ReducerState>,
            &ProcedureInput<'_>,
            &ProcedureContext<'_>,
        ) -> Result<ReducerResult, ProcedureError>
        + Send
        + Sync
        + 'static,
{
    /// Build a procedure.
    pub fn new(level: L, authorize: A, reduce: R) -> Arc<dyn Procedure> {
        Arc::new(Self {
            level,
            authorize,
            reduce,
        })
    }
}

impl<L, A, R> Procedure for FnProcedure<L, A, R>
where
    L: Fn(&ProcedureInput<'_>, &ProcedureContext<'_>) -> PermissionLevel + Send + Sync,
    A: Fn(&ProcedureInput<'_>, Option<&ReducerState>, &ProcedureContext<'_>) -> Result<(), AuthorizationError>
        + Send
        + Sync,
    R: Fn(
            Option<ReducerState>,
            &ProcedureInput<'_>,
            &ProcedureContext<'_>,
        ) -> Result<ReducerResult, ProcedureError>
        + Send
        + Sync,
{
    fn permission_level(
        &self,
        input: &ProcedureInput<'_>,
        ctx: &ProcedureContext<'_>,
    ) -> PermissionLevel {
        (self.level)(input, ctx)
    }

    fn authorize(
        &self,
        input: &ProcedureInput<'_>,
        state: Option<&ReducerState>,
        ctx: &ProcedureContext<'_>,
    ) -> Result<(), AuthorizationError> {
        (self.authorize)(input, state, ctx)
    }

    fn reduce(
        &self,
        state: Option<ReducerState>,
        input: &ProcedureInput<'_>,
        ctx: &ProcedureContext<'_>,
    ) -> Result<ReducerResult, ProcedureError> {
        (self.reduce)(state, input, ctx)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Substate definitions
// ═══════════════════════════════════════════════════════════════════════

type StaticCheck = Box<dyn Fn(&Substate) -> Result<(), String> + Send + Sync>;
type VirtualCheck = Box<dyn Fn(&Substate) -> bool + Send + Sync>;

/// Per-kind rules: static validity and whether the kind can exist virtually.
pub struct SubstateDefinition {
    kind: SubstateKind,
    static_check: StaticCheck,
    virtual_check: Option<VirtualCheck>,
}

impl SubstateDefinition {
    /// A kind that is only ever materialized.
    pub fn new<F>(kind: SubstateKind, static_check: F) -> Self
    where
        F: Fn(&Substate) -> Result<(), String> + Send + Sync + 'static,
    {
        Self {
            kind,
            static_check: Box::new(static_check),
            virtual_check: None,
        }
    }

    /// Allow virtual downs of substates accepted by `check`.
    pub fn with_virtual<F>(mut self, check: F) -> Self
    where
        F: Fn(&Substate) -> bool + Send + Sync + 'static,
    {
        self.virtual_check = Some(Box::new(check));
        self
    }

    /// Kind defined.
    pub fn kind(&self) -> SubstateKind {
        self.kind
    }

    /// Static validity of a substate being spun up.
    pub fn check(&self, substate: &Substate) -> Result<(), String> {
        (self.static_check)(substate)
    }

    /// Whether a substate may be spun down without being materialized.
    pub fn is_valid_virtual(&self, substate: &Substate) -> bool {
        self.virtual_check
            .as_ref()
            .is_some_and(|check| check(substate))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// A set of related substate definitions and procedures.
pub trait RuleModule {
    /// Module name, for logs.
    fn name(&self) -> &'static str;

    /// Register everything this module provides.
    fn register(&self, builder: &mut RegistryBuilder) -> Result<(), RegistryError>;
}

/// Collects registrations and rejects conflicts.
#[derive(Default)]
pub struct RegistryBuilder {
    procedures: HashMap<ProcedureKey, Arc<dyn Procedure>>,
    definitions: BTreeMap<SubstateKind, SubstateDefinition>,
}

impl RegistryBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a substate kind.
    pub fn substate(&mut self, definition: SubstateDefinition) -> Result<(), RegistryError> {
        let kind = definition.kind();
        if self.definitions.contains_key(&kind) {
            return Err(RegistryError::DuplicateSubstateDefinition(kind.name()));
        }
        self.definitions.insert(kind, definition);
        Ok(())
    }

    /// Register a procedure.
    pub fn procedure(
        &mut self,
        key: ProcedureKey,
        procedure: Arc<dyn Procedure>,
    ) -> Result<(), RegistryError> {
        if self.procedures.contains_key(&key) {
            return Err(RegistryError::DuplicateProcedure(key.to_string()));
        }
        self.procedures.insert(key, procedure);
        Ok(())
    }

    /// Load a module.
    pub fn module(mut self, module: &dyn RuleModule) -> Result<Self, RegistryError> {
        module.register(&mut self)?;
        Ok(self)
    }

    /// Freeze the registry.
    pub fn build(self) -> ProcedureRegistry {
        ProcedureRegistry {
            procedures: self.procedures,
            definitions: self.definitions,
        }
    }
}

/// Immutable procedure table of one rule set.
pub struct ProcedureRegistry {
    procedures: HashMap<ProcedureKey, Arc<dyn Procedure>>,
    definitions: BTreeMap<SubstateKind, SubstateDefinition>,
}

impl ProcedureRegistry {
    /// Procedure for a key.
    pub fn get(&self, key: &ProcedureKey) -> Option<&Arc<dyn Procedure>> {
        self.procedures.get(key)
    }

    /// Definition of a kind, if the kind is enabled.
    pub fn definition(&self, kind: SubstateKind) -> Option<&SubstateDefinition> {
        self.definitions.get(&kind)
    }

    /// Whether the rule set knows a substate kind.
    pub fn is_enabled(&self, kind: SubstateKind) -> bool {
        self.definitions.contains_key(&kind)
    }

    /// Enabled kinds in tag order.
    pub fn enabled_kinds(&self) -> impl Iterator<Item = SubstateKind> + '_ {
        self.definitions.keys().copied()
    }

    /// Number of registered procedures.
    pub fn procedure_count(&self) -> usize {
        self.procedures.len()
    }
}

impl fmt::Debug for ProcedureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcedureRegistry")
            .field("procedures", &self.procedures.len())
            .field("kinds", &self.definitions.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Closure helpers
// ═══════════════════════════════════════════════════════════════════════

/// Permission function returning a constant level.
pub fn fixed_level(
    level: PermissionLevel,
) -> impl Fn(&ProcedureInput<'_>, &ProcedureContext<'_>) -> PermissionLevel + Send + Sync + 'static
{
    move |_, _| level
}

/// Authorization function that accepts everything.
pub fn no_auth(
    _: &ProcedureInput<'_>,
    _: Option<&ReducerState>,
    _: &ProcedureContext<'_>,
) -> Result<(), AuthorizationError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyModule;

    impl RuleModule for DummyModule {
        fn name(&self) -> &'static str {
            "dummy"
        }

        fn register(&self, builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
            builder.substate(SubstateDefinition::new(SubstateKind::EpochData, |_| Ok(())))?;
            builder.procedure(
                ProcedureKey::start(SpinOp::Up(SubstateKind::EpochData)),
                FnProcedure::new(
                    fixed_level(PermissionLevel::System),
                    no_auth,
                    |_, _, _| Ok(ReducerResult::Complete(vec![])),
                ),
            )
        }
    }

    #[test]
    fn test_registry_lookup() {
        let registry = RegistryBuilder::new().module(&DummyModule).unwrap().build();

        assert!(registry.is_enabled(SubstateKind::EpochData));
        assert!(!registry.is_enabled(SubstateKind::Tokens));
        assert!(registry
            .get(&ProcedureKey::start(SpinOp::Up(SubstateKind::EpochData)))
            .is_some());
        assert!(registry
            .get(&ProcedureKey::start(SpinOp::Down(SubstateKind::EpochData)))
            .is_none());
        assert_eq!(registry.procedure_count(), 1);
    }

    #[test]
    fn test_conflicting_modules_rejected() {
        let result = RegistryBuilder::new()
            .module(&DummyModule)
            .and_then(|b| b.module(&DummyModule));
        assert!(matches!(
            result,
            Err(RegistryError::DuplicateSubstateDefinition("EpochData"))
        ));
    }

    #[test]
    fn test_virtual_check_defaults_to_rejecting() {
        let def = SubstateDefinition::new(SubstateKind::EpochData, |_| Ok(()));
        let epoch = Substate::EpochData(stratum_types::EpochData { epoch: 0 });
        assert!(!def.is_valid_virtual(&epoch));

        let def = def.with_virtual(|_| true);
        assert!(def.is_valid_virtual(&epoch));
    }
}
