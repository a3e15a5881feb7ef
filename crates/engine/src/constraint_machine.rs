//! The constraint machine: validates one transaction's instruction stream.
//!
//! Instructions are processed in order against a transaction-local overlay,
//! so later instructions observe earlier ones:
//!
//! ```text
//! for each instruction:
//!   SpinUp / *SpinDown ──► spin check ──► registry[(open state, op)]
//!                                           ├─ level check
//!                                           ├─ meter
//!                                           ├─ authorize (skipped at System)
//!                                           └─ reduce ──► Incomplete(state) | Complete(actions)
//!   ParticleGroupEnd ──► finalize open state via End(kind)
//!   TxnEnd          ──► meter signature boundary
//! ```
//!
//! The first violation aborts the transaction; nothing is written.

use crate::error::{CmError, CmErrorCode};
use crate::meter::{Meter, TxnUsage};
use crate::procedure::{
    ProcedureContext, ProcedureInput, ProcedureKey, ProcedureRegistry, ReducerResult, SpinOp,
};
use crate::reducer::ReducerState;
use stratum_storage::{StateUpdate, SubstateOverlay, SubstateReader};
use stratum_types::{
    Hash, Instruction, PermissionLevel, PublicKey, Substate, SubstateId, SubstateRef, TxAction,
};
use tracing::trace;

/// Per-transaction execution inputs, passed explicitly by reference.
pub struct ExecutionContext<'a> {
    /// Level the transaction executes at.
    pub level: PermissionLevel,
    /// Verified signer.
    pub signer: Option<PublicKey>,
    /// Meter shared by the batch.
    pub meter: &'a mut dyn Meter,
}

/// Result of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CmOutput {
    /// Spin changes in instruction order.
    pub updates: Vec<StateUpdate>,
    /// Decoded actions in group order.
    pub actions: Vec<TxAction>,
    /// Native tokens paid as fee.
    pub fee_paid: u128,
}

/// Validates instruction streams against one procedure registry.
pub struct ConstraintMachine<'r> {
    registry: &'r ProcedureRegistry,
}

/// Mutable state of one verification run.
struct Run<'a> {
    overlay: SubstateOverlay<'a>,
    txn_id: Hash,
    up_index: u32,
    /// Values spun up by this transaction, by up index. `None` once consumed.
    local_ups: Vec<Option<Substate>>,
    state: Option<ReducerState>,
    group_len: usize,
    output: CmOutput,
}

impl<'r> ConstraintMachine<'r> {
    /// Machine over a registry.
    pub fn new(registry: &'r ProcedureRegistry) -> Self {
        Self { registry }
    }

    /// Verify a transaction's instructions against `reader`.
    ///
    /// `reader` must already contain the effects of earlier transactions in
    /// the batch. Returns the updates to stage; the reader is not modified.
    pub fn verify(
        &self,
        reader: &dyn SubstateReader,
        txn_id: Hash,
        instructions: &[Instruction],
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<CmOutput, CmError> {
        let mut run = Run {
            overlay: SubstateOverlay::new(reader),
            txn_id,
            up_index: 0,
            local_ups: Vec::new(),
            state: None,
            group_len: 0,
            output: CmOutput::default(),
        };

        for (index, instruction) in instructions.iter().enumerate() {
            trace!(index, instruction = instruction.name(), "Constraint machine step");
            match instruction {
                Instruction::SpinUp(substate) => self.spin_up(&mut run, index, substate, ctx)?,
                Instruction::SpinDown(id) => {
                    let target = self.load_remote(&run, index, id)?;
                    self.spin_down(&mut run, index, target, ctx)?
                }
                Instruction::LocalSpinDown(up_index) => {
                    let target = self.load_local(&run, index, *up_index)?;
                    self.spin_down(&mut run, index, target, ctx)?
                }
                Instruction::VirtualSpinDown(substate) => {
                    let target = self.load_virtual(&run, index, substate)?;
                    self.spin_down(&mut run, index, target, ctx)?
                }
                Instruction::ParticleGroupEnd => self.end_group(&mut run, index, ctx)?,
                Instruction::TxnEnd => self.end_txn(&mut run, index, ctx)?,
            }
        }

        Ok(run.output)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Spin checks
    // ═══════════════════════════════════════════════════════════════════

    fn spin_up(
        &self,
        run: &mut Run<'_>,
        index: usize,
        substate: &Substate,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), CmError> {
        let definition = self.registry.definition(substate.kind()).ok_or_else(|| {
            CmError::new(
                CmErrorCode::StaticCheckFailed,
                index,
                format!("{} is not enabled", substate.kind()),
            )
        })?;
        definition
            .check(substate)
            .map_err(|message| CmError::new(CmErrorCode::StaticCheckFailed, index, message))?;

        let id = SubstateId::of_txn(run.txn_id, run.up_index);
        if run.overlay.load_up_substate(&id).is_some() || run.overlay.is_virtual_down(&id) {
            return Err(CmError::new(
                CmErrorCode::SubstateAlreadyExists,
                index,
                "Substate already exists",
            )
            .with_substate(id));
        }

        let input = ProcedureInput::Up(substate);
        self.invoke(run, index, SpinOp::Up(substate.kind()), &input, ctx)?;

        let update = StateUpdate::up(id, substate.clone());
        run.overlay.apply(std::slice::from_ref(&update));
        run.output.updates.push(update);
        run.local_ups.push(Some(substate.clone()));
        run.up_index += 1;
        run.group_len += 1;
        Ok(())
    }

    fn load_remote(&self, run: &Run<'_>, index: usize, id: &SubstateId) -> Result<SubstateRef, CmError> {
        let missing = || {
            CmError::new(CmErrorCode::MissingSubstate, index, "Substate is not up").with_substate(*id)
        };
        if id.is_virtual() {
            return Err(missing());
        }
        let substate = run.overlay.load_up_substate(id).ok_or_else(missing)?;
        Ok(SubstateRef::Materialized(*id, substate))
    }

    fn load_local(&self, run: &Run<'_>, index: usize, up_index: u32) -> Result<SubstateRef, CmError> {
        let id = SubstateId::of_txn(run.txn_id, up_index);
        let substate = run
            .local_ups
            .get(up_index as usize)
            .and_then(Option::clone)
            .ok_or_else(|| {
                CmError::new(
                    CmErrorCode::LocalSubstateNotFound,
                    index,
                    format!("No live local substate at index {}", up_index),
                )
                .with_substate(id)
            })?;
        Ok(SubstateRef::Materialized(id, substate))
    }

    fn load_virtual(&self, run: &Run<'_>, index: usize, substate: &Substate) -> Result<SubstateRef, CmError> {
        let id = substate.virtual_id();
        let valid = self
            .registry
            .definition(substate.kind())
            .is_some_and(|definition| definition.is_valid_virtual(substate));
        if !valid {
            return Err(CmError::new(
                CmErrorCode::InvalidVirtualSubstate,
                index,
                format!("{} cannot be spun down virtually", substate.kind()),
            )
            .with_substate(id));
        }
        if run.overlay.is_virtual_down(&id) {
            return Err(CmError::new(
                CmErrorCode::VirtualSubstateAlreadyDown,
                index,
                "Virtual substate already down",
            )
            .with_substate(id));
        }
        Ok(SubstateRef::Virtual(substate.clone()))
    }

    fn spin_down(
        &self,
        run: &mut Run<'_>,
        index: usize,
        target: SubstateRef,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), CmError> {
        let input = ProcedureInput::Down(&target);
        self.invoke(run, index, SpinOp::Down(target.substate().kind()), &input, ctx)?;

        let id = target.id();
        if let SubstateId::Txn { txn_id, index: up } = id {
            if txn_id == run.txn_id {
                if let Some(slot) = run.local_ups.get_mut(up as usize) {
                    *slot = None;
                }
            }
        }
        let update = StateUpdate::down(id, target.substate().clone());
        run.overlay.apply(std::slice::from_ref(&update));
        run.output.updates.push(update);
        run.group_len += 1;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Procedure invocation
    // ═══════════════════════════════════════════════════════════════════

    fn invoke(
        &self,
        run: &mut Run<'_>,
        index: usize,
        op: SpinOp,
        input: &ProcedureInput<'_>,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), CmError> {
        let key = ProcedureKey::transition(run.state.as_ref().map(ReducerState::kind), op);
        let result = self.call(run, index, key, input, ctx)?;
        self.absorb(run, result);
        Ok(())
    }

    fn call(
        &self,
        run: &mut Run<'_>,
        index: usize,
        key: ProcedureKey,
        input: &ProcedureInput<'_>,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<ReducerResult, CmError> {
        let procedure = self.registry.get(&key).ok_or_else(|| {
            CmError::new(
                CmErrorCode::MissingProcedure,
                index,
                format!("No procedure for {}", key),
            )
        })?;

        let procedure_ctx = ProcedureContext {
            level: ctx.level,
            signer: ctx.signer,
            reader: &run.overlay,
        };

        let required = procedure.permission_level(input, &procedure_ctx);
        if ctx.level < required {
            return Err(CmError::new(
                CmErrorCode::PermissionLevelError,
                index,
                format!("{} requires {:?}, executing at {:?}", key, required, ctx.level),
            ));
        }

        let metered = if required == PermissionLevel::User {
            ctx.meter.on_user_procedure(&key)
        } else {
            ctx.meter.on_super_user_procedure(&key)
        };
        metered.map_err(|e| CmError::new(CmErrorCode::Meter, index, e.to_string()))?;

        if ctx.level != PermissionLevel::System {
            procedure
                .authorize(input, run.state.as_ref(), &procedure_ctx)
                .map_err(|e| CmError::new(CmErrorCode::AuthorizationError, index, e.0))?;
        }

        procedure
            .reduce(run.state.take(), input, &procedure_ctx)
            .map_err(|e| CmError::new(CmErrorCode::ProcedureError, index, e.0))
    }

    fn absorb(&self, run: &mut Run<'_>, result: ReducerResult) {
        match result {
            ReducerResult::Incomplete(state) => run.state = Some(state),
            ReducerResult::Complete(actions) => {
                for action in &actions {
                    if let TxAction::PayFee { amount, .. } = action {
                        run.output.fee_paid += amount;
                    }
                }
                run.output.actions.extend(actions);
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Boundaries
    // ═══════════════════════════════════════════════════════════════════

    fn end_group(
        &self,
        run: &mut Run<'_>,
        index: usize,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), CmError> {
        if run.group_len == 0 {
            return Err(CmError::new(
                CmErrorCode::EmptyParticleGroup,
                index,
                "Particle group is empty",
            ));
        }
        run.group_len = 0;

        let Some(state) = run.state.as_ref() else {
            return Ok(());
        };
        let key = ProcedureKey::End(state.kind());
        if self.registry.get(&key).is_none() {
            return Err(CmError::new(
                CmErrorCode::UnterminatedReducer,
                index,
                format!("Group ended in state {:?}", state.kind()),
            ));
        }

        match self.call(run, index, key, &ProcedureInput::End, ctx)? {
            ReducerResult::Complete(actions) => {
                self.absorb(run, ReducerResult::Complete(actions));
                Ok(())
            }
            ReducerResult::Incomplete(state) => Err(CmError::new(
                CmErrorCode::UnterminatedReducer,
                index,
                format!("Finalizer left state {:?} open", state.kind()),
            )),
        }
    }

    fn end_txn(
        &self,
        run: &mut Run<'_>,
        index: usize,
        ctx: &mut ExecutionContext<'_>,
    ) -> Result<(), CmError> {
        if run.group_len > 0 || run.state.is_some() {
            return Err(CmError::new(
                CmErrorCode::MissingParticleGroupEnd,
                index,
                "Transaction ended inside a particle group",
            ));
        }
        let usage = TxnUsage {
            level: ctx.level,
            signed: ctx.signer.is_some(),
            fee_paid: run.output.fee_paid,
        };
        ctx.meter
            .on_sig_instruction(&usage)
            .map_err(|e| CmError::new(CmErrorCode::Meter, index, e.to_string()))
    }
}
