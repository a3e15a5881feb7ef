//! Low-level instructions a transaction is made of.

use crate::{Substate, SubstateId};
use sbor::prelude::*;

/// One step of a transaction's instruction stream.
///
/// Runs of spin instructions terminated by [`Instruction::ParticleGroupEnd`]
/// form particle groups, the atomic unit of reduction. A stream ends with
/// exactly one [`Instruction::TxnEnd`].
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub enum Instruction {
    /// Create a substate.
    SpinUp(Substate),
    /// Consume a substate from the live set.
    SpinDown(SubstateId),
    /// Consume the `n`-th substate spun up earlier in the same transaction.
    LocalSpinDown(u32),
    /// Consume a substate that was never materialized.
    VirtualSpinDown(Substate),
    /// Close the current particle group.
    ParticleGroupEnd,
    /// Signature boundary; must be the last instruction.
    TxnEnd,
}

impl Instruction {
    /// Short name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Instruction::SpinUp(_) => "SpinUp",
            Instruction::SpinDown(_) => "SpinDown",
            Instruction::LocalSpinDown(_) => "LocalSpinDown",
            Instruction::VirtualSpinDown(_) => "VirtualSpinDown",
            Instruction::ParticleGroupEnd => "ParticleGroupEnd",
            Instruction::TxnEnd => "TxnEnd",
        }
    }

    /// The substate carried inline, if any.
    pub fn substate(&self) -> Option<&Substate> {
        match self {
            Instruction::SpinUp(s) | Instruction::VirtualSpinDown(s) => Some(s),
            _ => None,
        }
    }
}

/// Lifecycle flag of a substate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub enum Spin {
    /// Created and live.
    Up,
    /// Consumed.
    Down,
}
