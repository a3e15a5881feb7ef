//! Resource metering hooks.
//!
//! The constraint machine calls the meter before every procedure and at every
//! signature boundary (`TxnEnd`). A meter aborts execution by returning an
//! error; there is no other cancellation mechanism.

use crate::config::RulesConfig;
use crate::error::MeterError;
use crate::procedure::{ProcedureKey, SpinOp};
use stratum_types::PermissionLevel;
use tracing::trace;

/// Per-transaction facts available at the signature boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnUsage {
    /// Level the transaction executed at.
    pub level: PermissionLevel,
    /// Whether the transaction carries a signature.
    pub signed: bool,
    /// Native tokens paid as fee by the transaction.
    pub fee_paid: u128,
}

/// Resource usage accounting.
pub trait Meter {
    /// Called before a procedure requiring `User` level.
    fn on_user_procedure(&mut self, _key: &ProcedureKey) -> Result<(), MeterError> {
        Ok(())
    }

    /// Called before a procedure requiring `Supervisor` or `System` level.
    fn on_super_user_procedure(&mut self, _key: &ProcedureKey) -> Result<(), MeterError> {
        Ok(())
    }

    /// Called at the signature boundary of every transaction.
    fn on_sig_instruction(&mut self, _usage: &TxnUsage) -> Result<(), MeterError> {
        Ok(())
    }
}

/// A meter that never aborts.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMeter;

impl Meter for NoopMeter {}

/// Meter enforcing the fee table and the per-batch signature limit.
///
/// One instance lives for one batch. Fee charges accumulate per transaction
/// and reset at each signature boundary. A transaction's signature only
/// counts against the batch limit once the caller commits it.
#[derive(Debug, Clone)]
pub struct BatchMeter {
    base_fee: u128,
    per_up_fee: u128,
    max_sigs: u32,
    sigs: u32,
    pending_sigs: u32,
    charged: u128,
}

impl BatchMeter {
    /// Meter for one batch under `config`.
    pub fn new(config: &RulesConfig) -> Self {
        Self {
            base_fee: config.fees.base_fee as u128,
            per_up_fee: config.fees.per_up_substate_fee as u128,
            max_sigs: config.max_sigs_per_round,
            sigs: 0,
            pending_sigs: 0,
            charged: 0,
        }
    }

    /// Signatures counted so far, including the current transaction's.
    pub fn signatures(&self) -> u32 {
        self.sigs + self.pending_sigs
    }

    /// Fee charged so far to the current transaction, excluding the base fee.
    pub fn charged(&self) -> u128 {
        self.charged
    }

    /// Keep the current transaction's signature in the batch count.
    pub fn commit_txn(&mut self) {
        self.sigs += std::mem::take(&mut self.pending_sigs);
        self.charged = 0;
    }

    /// Forget the charges and signature of an aborted transaction.
    pub fn reset_txn(&mut self) {
        self.pending_sigs = 0;
        self.charged = 0;
    }
}

impl Meter for BatchMeter {
    fn on_user_procedure(&mut self, key: &ProcedureKey) -> Result<(), MeterError> {
        if let ProcedureKey::Transition {
            op: SpinOp::Up(_), ..
        } = key
        {
            self.charged = self.charged.saturating_add(self.per_up_fee);
        }
        Ok(())
    }

    fn on_sig_instruction(&mut self, usage: &TxnUsage) -> Result<(), MeterError> {
        let charged = std::mem::take(&mut self.charged);

        if usage.level == PermissionLevel::User {
            let required = self.base_fee.saturating_add(charged);
            if usage.fee_paid < required {
                return Err(MeterError::InsufficientFee {
                    required,
                    paid: usage.fee_paid,
                });
            }
        }

        if usage.signed {
            if self.signatures() >= self.max_sigs {
                return Err(MeterError::TooManySignatures {
                    limit: self.max_sigs,
                });
            }
            self.pending_sigs += 1;
        }

        trace!(charged, fee_paid = usage.fee_paid, sigs = self.signatures(), "Metered transaction");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeeTable;
    use stratum_types::SubstateKind;

    fn config(base_fee: u64, per_up_substate_fee: u64, max_sigs: u32) -> RulesConfig {
        RulesConfig {
            max_sigs_per_round: max_sigs,
            fees: FeeTable {
                base_fee,
                per_up_substate_fee,
            },
            ..RulesConfig::default()
        }
    }

    fn user(fee_paid: u128) -> TxnUsage {
        TxnUsage {
            level: PermissionLevel::User,
            signed: true,
            fee_paid,
        }
    }

    #[test]
    fn test_fee_accumulates_per_up() {
        let mut meter = BatchMeter::new(&config(10, 2, 50));
        let up = ProcedureKey::start(SpinOp::Up(SubstateKind::Tokens));
        let down = ProcedureKey::start(SpinOp::Down(SubstateKind::Tokens));

        meter.on_user_procedure(&down).unwrap();
        meter.on_user_procedure(&up).unwrap();
        meter.on_user_procedure(&up).unwrap();
        assert_eq!(meter.charged(), 4);

        assert_eq!(
            meter.on_sig_instruction(&user(13)),
            Err(MeterError::InsufficientFee {
                required: 14,
                paid: 13
            })
        );
        // Charges reset at the boundary even on failure
        assert_eq!(meter.charged(), 0);
        meter.on_sig_instruction(&user(10)).unwrap();
    }

    #[test]
    fn test_system_level_is_free() {
        let mut meter = BatchMeter::new(&config(10, 2, 50));
        meter
            .on_sig_instruction(&TxnUsage {
                level: PermissionLevel::System,
                signed: false,
                fee_paid: 0,
            })
            .unwrap();
    }

    #[test]
    fn test_signature_limit() {
        let mut meter = BatchMeter::new(&config(0, 0, 2));
        meter.on_sig_instruction(&user(0)).unwrap();
        meter.on_sig_instruction(&user(0)).unwrap();
        assert_eq!(
            meter.on_sig_instruction(&user(0)),
            Err(MeterError::TooManySignatures { limit: 2 })
        );
        assert_eq!(meter.signatures(), 2);
    }

    #[test]
    fn test_aborted_transaction_frees_its_signature() {
        let mut meter = BatchMeter::new(&config(0, 0, 1));
        meter.on_sig_instruction(&user(0)).unwrap();
        meter.reset_txn();
        assert_eq!(meter.signatures(), 0);

        meter.on_sig_instruction(&user(0)).unwrap();
        meter.commit_txn();
        assert_eq!(meter.signatures(), 1);
        assert_eq!(
            meter.on_sig_instruction(&user(0)),
            Err(MeterError::TooManySignatures { limit: 1 })
        );
    }

    #[test]
    fn test_underpaid_transaction_takes_no_signature_slot() {
        let mut meter = BatchMeter::new(&config(5, 0, 1));
        assert!(matches!(
            meter.on_sig_instruction(&user(0)),
            Err(MeterError::InsufficientFee { .. })
        ));
        assert_eq!(meter.signatures(), 0);
        meter.on_sig_instruction(&user(5)).unwrap();
    }

    #[test]
    fn test_noop_meter_accepts_everything() {
        let mut meter = NoopMeter;
        let key = ProcedureKey::start(SpinOp::Up(SubstateKind::Tokens));
        assert!(meter.on_user_procedure(&key).is_ok());
        assert!(meter.on_super_user_procedure(&key).is_ok());
        assert!(meter.on_sig_instruction(&user(0)).is_ok());
    }
}
