//! Transaction construction from high-level actions.
//!
//! The builder reads live substates through a [`SubstateReader`] and never
//! writes. Substates it creates or consumes while building are tracked
//! locally, so several actions in one transaction can chain: the change of a
//! first transfer funds the second one through a `LocalSpinDown`.
//!
//! ```ignore
//! let txn = TxBuilder::new(&store, &rules)
//!     .action(&TxAction::TransferTokens { resource, from, to, amount: 40 })?
//!     .sign_and_build(&key)?;
//! ```

use crate::error::TxBuilderError;
use crate::rule_set::RERules;
use std::collections::BTreeSet;
use stratum_storage::{SubstateIndex, SubstateReader};
use stratum_types::{
    is_valid_symbol, EpochData, Hash, Instruction, KeyPair, PreparedUnstake, PublicKey, REAddr,
    RoundData, StakeOwnership, Substate, SubstateId, SubstateKind, TokenResource,
    TokenResourceMetadata, Tokens, Txn, TxnBody, TxAction, UnclaimedAddr, ValidatorMetadata,
    ValidatorRegistered, ValidatorSystemMetadata,
};
use tracing::debug;

/// Symbol under which the system address is claimed at genesis.
pub const SYSTEM_SYMBOL: &str = "system";

/// A request to build a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxnConstructionRequest {
    /// Actions, each compiled into its own particle group.
    pub actions: Vec<TxAction>,
    /// Account paying the fee owed under the active fee table.
    pub fee_payer: Option<REAddr>,
    /// Free-text message.
    pub message: Option<String>,
}

impl TxnConstructionRequest {
    /// Empty request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action.
    pub fn action(mut self, action: TxAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Pay the fee from `payer`.
    pub fn fee_payer(mut self, payer: REAddr) -> Self {
        self.fee_payer = Some(payer);
        self
    }

    /// Attach a message.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Where a live substate the builder can consume comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    /// Spun up earlier in the transaction being built.
    Local(u32),
    /// Committed (or staged) in the reader.
    Remote(SubstateId),
}

/// Builder state to roll back to when an action is rejected.
struct Checkpoint {
    instructions: usize,
    local_ups: Vec<Option<Substate>>,
    remote_downs: BTreeSet<SubstateId>,
    virtual_downs: BTreeSet<SubstateId>,
}

/// Accumulates instructions for one transaction.
pub struct TxBuilder<'a> {
    reader: &'a dyn SubstateReader,
    rules: &'a RERules,
    instructions: Vec<Instruction>,
    local_ups: Vec<Option<Substate>>,
    remote_downs: BTreeSet<SubstateId>,
    virtual_downs: BTreeSet<SubstateId>,
    group_len: usize,
    message: Option<String>,
}

impl<'a> TxBuilder<'a> {
    /// Builder reading from `reader` under `rules`.
    pub fn new(reader: &'a dyn SubstateReader, rules: &'a RERules) -> Self {
        Self {
            reader,
            rules,
            instructions: Vec::new(),
            local_ups: Vec::new(),
            remote_downs: BTreeSet::new(),
            virtual_downs: BTreeSet::new(),
            group_len: 0,
            message: None,
        }
    }

    /// Compile a whole request, including its fee group.
    pub fn from_request(
        reader: &'a dyn SubstateReader,
        rules: &'a RERules,
        request: &TxnConstructionRequest,
    ) -> Result<Self, TxBuilderError> {
        let mut builder = Self::new(reader, rules);
        for action in &request.actions {
            builder.action(action)?;
        }

        if let Some(payer) = request.fee_payer {
            let fees = rules.config().fees;
            // The fee group adds at most one change substate.
            let fee = fees.fee_for(builder.up_count() as u64 + 1);
            if fee > 0 {
                builder.action(&TxAction::PayFee {
                    from: payer,
                    amount: fee,
                })?;
            }
        }

        if let Some(message) = &request.message {
            builder.message(message.clone());
        }
        debug!(
            actions = request.actions.len(),
            instructions = builder.instructions.len(),
            "Constructed transaction"
        );
        Ok(builder)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Low-level instructions
    // ═══════════════════════════════════════════════════════════════════

    /// Spin up a new substate.
    pub fn up(&mut self, substate: Substate) -> &mut Self {
        self.local_ups.push(Some(substate.clone()));
        self.instructions.push(Instruction::SpinUp(substate));
        self.group_len += 1;
        self
    }

    /// Spin down a live substate by id.
    pub fn down(&mut self, id: SubstateId) -> &mut Self {
        self.remote_downs.insert(id);
        self.instructions.push(Instruction::SpinDown(id));
        self.group_len += 1;
        self
    }

    /// Spin down the `index`-th substate spun up by this transaction.
    pub fn local_down(&mut self, index: u32) -> Result<&mut Self, TxBuilderError> {
        let slot = self
            .local_ups
            .get_mut(index as usize)
            .filter(|slot| slot.is_some())
            .ok_or_else(|| {
                TxBuilderError::InvalidAction(format!("No live local substate at index {}", index))
            })?;
        *slot = None;
        self.instructions.push(Instruction::LocalSpinDown(index));
        self.group_len += 1;
        Ok(self)
    }

    /// Spin down a substate that was never materialized.
    pub fn virtual_down(&mut self, substate: Substate) -> &mut Self {
        self.virtual_downs.insert(substate.virtual_id());
        self.instructions.push(Instruction::VirtualSpinDown(substate));
        self.group_len += 1;
        self
    }

    /// Close the current particle group. Does nothing if the group is empty.
    pub fn end(&mut self) -> &mut Self {
        if self.group_len > 0 {
            self.instructions.push(Instruction::ParticleGroupEnd);
            self.group_len = 0;
        }
        self
    }

    /// Set the message.
    pub fn message(&mut self, message: impl Into<String>) -> &mut Self {
        self.message = Some(message.into());
        self
    }

    /// Number of `SpinUp` instructions so far.
    pub fn up_count(&self) -> usize {
        self.local_ups.len()
    }

    /// Instructions so far.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    // ═══════════════════════════════════════════════════════════════════
    // Finishing
    // ═══════════════════════════════════════════════════════════════════

    fn into_body(self) -> Result<TxnBody, TxBuilderError> {
        if self.group_len > 0 {
            return Err(TxBuilderError::UnclosedParticleGroup);
        }
        let max = self.rules.config().max_message_len;
        if let Some(message) = &self.message {
            if message.len() > max {
                return Err(TxBuilderError::MessageTooLong {
                    len: message.len(),
                    max,
                });
            }
        }
        let mut instructions = self.instructions;
        instructions.push(Instruction::TxnEnd);
        Ok(TxnBody {
            instructions,
            message: self.message,
        })
    }

    /// Finish without a signature (system transactions).
    pub fn build_without_signature(self) -> Result<Txn, TxBuilderError> {
        Ok(Txn::unsigned(self.into_body()?))
    }

    /// Finish and sign.
    pub fn sign_and_build(self, key: &KeyPair) -> Result<Txn, TxBuilderError> {
        Ok(Txn::sign(self.into_body()?, key))
    }

    // ═══════════════════════════════════════════════════════════════════
    // Substate selection
    // ═══════════════════════════════════════════════════════════════════

    /// Live substates under `index`: this transaction's ups first, then the
    /// reader's in index order, minus anything already consumed.
    fn live(&self, index: &SubstateIndex) -> Vec<(Source, Substate)> {
        let mut live: Vec<(Source, Substate)> = self
            .local_ups
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                slot.as_ref()
                    .filter(|substate| index.matches(substate))
                    .map(|substate| (Source::Local(i as u32), substate.clone()))
            })
            .collect();
        live.extend(
            self.reader
                .open_indexed_cursor(index)
                .filter(|(id, _)| !self.remote_downs.contains(id))
                .map(|(id, substate)| (Source::Remote(id), substate)),
        );
        live
    }

    fn down_source(&mut self, source: Source) -> Result<(), TxBuilderError> {
        match source {
            Source::Local(index) => {
                self.local_down(index)?;
            }
            Source::Remote(id) => {
                self.down(id);
            }
        }
        Ok(())
    }

    fn is_virtual_down(&self, id: &SubstateId) -> bool {
        self.virtual_downs.contains(id) || self.reader.is_virtual_down(id)
    }

    fn require_enabled(&self, kind: SubstateKind) -> Result<(), TxBuilderError> {
        if !self.rules.registry().is_enabled(kind) {
            return Err(TxBuilderError::UnsupportedSubstate(kind.name()));
        }
        Ok(())
    }

    /// Consume `holder`'s balances of `resource` until `amount` is covered.
    /// Returns the remainder to give back.
    fn down_fungible(
        &mut self,
        holder: REAddr,
        resource: REAddr,
        amount: u128,
        not_enough: &str,
    ) -> Result<u128, TxBuilderError> {
        let index = SubstateIndex::with_prefix(
            SubstateKind::Tokens,
            [holder.to_bytes(), resource.to_bytes()].concat(),
        );
        let mut covered: u128 = 0;
        let mut selected = Vec::new();
        for (source, substate) in self.live(&index) {
            if covered >= amount {
                break;
            }
            if let Substate::Tokens(tokens) = &substate {
                if tokens.holder == holder && tokens.resource == resource {
                    covered = covered.saturating_add(tokens.amount);
                    selected.push(source);
                }
            }
        }
        if covered < amount {
            return Err(TxBuilderError::NotEnoughBalance(not_enough.to_string()));
        }
        for source in selected {
            self.down_source(source)?;
        }
        Ok(covered - amount)
    }

    /// Consume `owner`'s stake with `validator` until `amount` is covered.
    fn down_stake(
        &mut self,
        owner: REAddr,
        validator: PublicKey,
        amount: u128,
    ) -> Result<u128, TxBuilderError> {
        let index = SubstateIndex::with_prefix(
            SubstateKind::StakeOwnership,
            [owner.to_bytes(), validator.as_bytes().to_vec()].concat(),
        );
        let mut covered: u128 = 0;
        let mut selected = Vec::new();
        for (source, substate) in self.live(&index) {
            if covered >= amount {
                break;
            }
            if let Substate::StakeOwnership(stake) = &substate {
                if stake.owner == owner && stake.validator == validator {
                    covered = covered.saturating_add(stake.amount);
                    selected.push(source);
                }
            }
        }
        if covered < amount {
            return Err(TxBuilderError::NotEnoughBalance(
                "Not enough stake for unstake.".to_string(),
            ));
        }
        for source in selected {
            self.down_source(source)?;
        }
        Ok(covered - amount)
    }

    /// Consume the current value of a per-validator field, falling back to
    /// the virtual `default` when it was never set.
    fn down_field(&mut self, default: Substate) -> Result<Substate, TxBuilderError> {
        let kind = default.kind();
        self.require_enabled(kind)?;
        let key = default.index_key();
        let current = self
            .live(&SubstateIndex::with_prefix(kind, key.clone()))
            .into_iter()
            .find(|(_, substate)| substate.index_key() == key);

        match current {
            Some((source, substate)) => {
                self.down_source(source)?;
                Ok(substate)
            }
            None if self.is_virtual_down(&default.virtual_id()) => Err(
                TxBuilderError::NotAvailable(format!("{} not available", kind)),
            ),
            None => {
                self.virtual_down(default.clone());
                Ok(default)
            }
        }
    }

    /// Consume the single live substate of a system kind.
    fn down_singleton(&mut self, kind: SubstateKind) -> Result<Substate, TxBuilderError> {
        let (source, substate) = self
            .live(&SubstateIndex::of_kind(kind))
            .into_iter()
            .next()
            .ok_or_else(|| TxBuilderError::InvalidAction(format!("No live {} substate", kind)))?;
        self.down_source(source)?;
        Ok(substate)
    }

    fn claim(&mut self, addr: REAddr, symbol: &str) -> Result<(), TxBuilderError> {
        if !is_valid_symbol(symbol) {
            return Err(TxBuilderError::InvalidAction(format!(
                "Invalid symbol {:?}",
                symbol
            )));
        }
        let unclaimed = Substate::UnclaimedAddr(UnclaimedAddr {
            addr,
            symbol: symbol.to_string(),
        });
        if self.is_virtual_down(&unclaimed.virtual_id()) {
            return Err(TxBuilderError::NotAvailable("RRI not available".to_string()));
        }
        self.virtual_down(unclaimed);
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════
    // Actions
    // ═══════════════════════════════════════════════════════════════════

    /// Compile one action into its own particle group. A rejected action
    /// leaves the builder as it was.
    pub fn action(&mut self, action: &TxAction) -> Result<&mut Self, TxBuilderError> {
        if self.group_len > 0 {
            return Err(TxBuilderError::UnclosedParticleGroup);
        }
        let checkpoint = self.checkpoint();
        if let Err(err) = self.compile(action) {
            self.restore(checkpoint);
            return Err(err);
        }
        Ok(self.end())
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            instructions: self.instructions.len(),
            local_ups: self.local_ups.clone(),
            remote_downs: self.remote_downs.clone(),
            virtual_downs: self.virtual_downs.clone(),
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        self.instructions.truncate(checkpoint.instructions);
        self.local_ups = checkpoint.local_ups;
        self.remote_downs = checkpoint.remote_downs;
        self.virtual_downs = checkpoint.virtual_downs;
        self.group_len = 0;
    }

    fn compile(&mut self, action: &TxAction) -> Result<(), TxBuilderError> {
        match action {
            TxAction::CreateSystem { timestamp } => {
                self.claim(REAddr::System, SYSTEM_SYMBOL)?;
                self.up(Substate::EpochData(EpochData { epoch: 0 }));
                self.up(Substate::RoundData(RoundData {
                    round: 0,
                    timestamp: *timestamp,
                }));
            }

            TxAction::CreateFixedToken {
                resource,
                to,
                symbol,
                name,
                description,
                icon_url,
                url,
                supply,
            } => {
                if *supply == 0 {
                    return Err(TxBuilderError::ZeroAmount(
                        "Supply can't be zero.".to_string(),
                    ));
                }
                self.claim(*resource, symbol)?;
                self.up(Substate::TokenResource(TokenResource {
                    addr: *resource,
                    granularity: 1,
                    is_mutable: false,
                    owner: None,
                }));
                self.up(Substate::Tokens(Tokens {
                    holder: *to,
                    resource: *resource,
                    amount: *supply,
                }));
                self.up(Substate::TokenResourceMetadata(TokenResourceMetadata {
                    addr: *resource,
                    symbol: symbol.clone(),
                    name: name.clone(),
                    description: description.clone(),
                    icon_url: icon_url.clone(),
                    url: url.clone(),
                }));
            }

            TxAction::CreateMutableToken {
                resource,
                owner,
                symbol,
                name,
                description,
                icon_url,
                url,
            } => {
                self.claim(*resource, symbol)?;
                self.up(Substate::TokenResource(TokenResource {
                    addr: *resource,
                    granularity: 1,
                    is_mutable: true,
                    owner: *owner,
                }));
                self.up(Substate::TokenResourceMetadata(TokenResourceMetadata {
                    addr: *resource,
                    symbol: symbol.clone(),
                    name: name.clone(),
                    description: description.clone(),
                    icon_url: icon_url.clone(),
                    url: url.clone(),
                }));
            }

            TxAction::MintTokens {
                resource,
                to,
                amount,
            } => {
                if *amount == 0 {
                    return Err(TxBuilderError::ZeroAmount(
                        "Mint amount can't be zero.".to_string(),
                    ));
                }
                self.up(Substate::Tokens(Tokens {
                    holder: *to,
                    resource: *resource,
                    amount: *amount,
                }));
            }

            TxAction::TransferTokens {
                resource,
                from,
                to,
                amount,
            } => {
                if *amount == 0 {
                    return Err(TxBuilderError::ZeroAmount(
                        "Transfer amount can't be zero.".to_string(),
                    ));
                }
                if from == to {
                    return Err(TxBuilderError::InvalidAction(
                        "Cannot transfer to the sending account.".to_string(),
                    ));
                }
                let remainder =
                    self.down_fungible(*from, *resource, *amount, "Not enough balance for transfer.")?;
                self.up(Substate::Tokens(Tokens {
                    holder: *to,
                    resource: *resource,
                    amount: *amount,
                }));
                self.change(*from, *resource, remainder);
            }

            TxAction::BurnTokens {
                resource,
                from,
                amount,
            } => {
                if *amount == 0 {
                    return Err(TxBuilderError::ZeroAmount(
                        "Burn amount can't be zero.".to_string(),
                    ));
                }
                let remainder =
                    self.down_fungible(*from, *resource, *amount, "Not enough balance for burn.")?;
                self.change(*from, *resource, remainder);
            }

            TxAction::StakeTokens {
                from,
                validator,
                amount,
            } => {
                if *amount == 0 {
                    return Err(TxBuilderError::ZeroAmount(
                        "Stake amount can't be zero.".to_string(),
                    ));
                }
                let remainder = self.down_fungible(
                    *from,
                    REAddr::Native,
                    *amount,
                    "Not enough balance for staking.",
                )?;
                self.up(Substate::StakeOwnership(StakeOwnership {
                    validator: *validator,
                    owner: *from,
                    amount: *amount,
                }));
                self.change(*from, REAddr::Native, remainder);
            }

            TxAction::UnstakeTokens {
                account,
                validator,
                amount,
            } => {
                if *amount == 0 {
                    return Err(TxBuilderError::ZeroAmount(
                        "Unstake amount can't be zero.".to_string(),
                    ));
                }
                let remainder = self.down_stake(*account, *validator, *amount)?;
                self.up(Substate::PreparedUnstake(PreparedUnstake {
                    validator: *validator,
                    owner: *account,
                    amount: *amount,
                }));
                if remainder > 0 {
                    self.up(Substate::StakeOwnership(StakeOwnership {
                        validator: *validator,
                        owner: *account,
                        amount: remainder,
                    }));
                }
            }

            TxAction::RegisterValidator { validator } => {
                self.set_registered(*validator, true)?;
            }

            TxAction::UnregisterValidator { validator } => {
                self.set_registered(*validator, false)?;
            }

            TxAction::UpdateValidatorMetadata {
                validator,
                name,
                url,
            } => {
                self.down_field(Substate::ValidatorMetadata(ValidatorMetadata {
                    validator: *validator,
                    name: String::new(),
                    url: String::new(),
                }))?;
                self.up(Substate::ValidatorMetadata(ValidatorMetadata {
                    validator: *validator,
                    name: name.clone(),
                    url: url.clone(),
                }));
            }

            TxAction::UpdateValidatorSystemMetadata { validator, data } => {
                self.down_field(Substate::ValidatorSystemMetadata(ValidatorSystemMetadata {
                    validator: *validator,
                    data: Hash::ZERO,
                }))?;
                self.up(Substate::ValidatorSystemMetadata(ValidatorSystemMetadata {
                    validator: *validator,
                    data: *data,
                }));
            }

            TxAction::NextRound { round, timestamp } => {
                self.down_singleton(SubstateKind::RoundData)?;
                self.up(Substate::RoundData(RoundData {
                    round: *round,
                    timestamp: *timestamp,
                }));
            }

            TxAction::NextEpoch { timestamp } => self.next_epoch(*timestamp)?,

            TxAction::PayFee { from, amount } => {
                if *amount == 0 {
                    return Err(TxBuilderError::ZeroAmount(
                        "Fee amount can't be zero.".to_string(),
                    ));
                }
                let remainder =
                    self.down_fungible(*from, REAddr::Native, *amount, "Not enough balance for fee.")?;
                self.change(*from, REAddr::Native, remainder);
            }
        }
        Ok(())
    }

    fn change(&mut self, holder: REAddr, resource: REAddr, remainder: u128) {
        if remainder > 0 {
            self.up(Substate::Tokens(Tokens {
                holder,
                resource,
                amount: remainder,
            }));
        }
    }

    fn set_registered(&mut self, validator: PublicKey, registered: bool) -> Result<(), TxBuilderError> {
        let current = self.down_field(Substate::ValidatorRegistered(ValidatorRegistered {
            validator,
            registered: false,
        }))?;
        if matches!(&current, Substate::ValidatorRegistered(r) if r.registered == registered) {
            return Err(TxBuilderError::NotAvailable(if registered {
                "Validator already registered".to_string()
            } else {
                "Validator not registered".to_string()
            }));
        }
        self.up(Substate::ValidatorRegistered(ValidatorRegistered {
            validator,
            registered,
        }));
        Ok(())
    }

    fn next_epoch(&mut self, timestamp: u64) -> Result<(), TxBuilderError> {
        self.down_singleton(SubstateKind::RoundData)?;
        let Substate::EpochData(current) = self.down_singleton(SubstateKind::EpochData)? else {
            return Err(TxBuilderError::InvalidAction(
                "Malformed epoch state".to_string(),
            ));
        };

        for (source, substate) in self.live(&SubstateIndex::of_kind(SubstateKind::PreparedUnstake)) {
            let Substate::PreparedUnstake(unstake) = substate else {
                continue;
            };
            self.down_source(source)?;
            self.up(Substate::Tokens(Tokens {
                holder: unstake.owner,
                resource: REAddr::Native,
                amount: unstake.amount,
            }));
        }

        self.up(Substate::EpochData(EpochData {
            epoch: current.epoch + 1,
        }));
        self.up(Substate::RoundData(RoundData {
            round: 0,
            timestamp,
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeeTable, RulesConfig};
    use crate::constraint_machine::{CmOutput, ExecutionContext};
    use crate::error::CmError;
    use crate::meter::BatchMeter;
    use crate::rule_set::RulesVersion;
    use stratum_storage::test_helpers::{account, native_tokens, txn_substate_id, MapReader};
    use stratum_types::PermissionLevel;

    fn rules() -> RERules {
        RERules::new(RulesVersion::V1, RulesConfig::default()).unwrap()
    }

    fn key(seed: u64) -> KeyPair {
        KeyPair::from_seed(seed).unwrap()
    }

    fn funded(amounts: &[u128]) -> MapReader {
        let mut ups: Vec<_> = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| (txn_substate_id(1, i as u32), native_tokens(1, *amount)))
            .collect();
        ups.push((
            txn_substate_id(2, 0),
            Substate::TokenResource(TokenResource {
                addr: REAddr::Native,
                granularity: 1,
                is_mutable: true,
                owner: None,
            }),
        ));
        MapReader::with(ups)
    }

    fn execute(rules: &RERules, reader: &dyn SubstateReader, txn: &Txn) -> Result<CmOutput, CmError> {
        let parsed = rules.parser().parse(txn.clone()).unwrap();
        let mut meter = BatchMeter::new(rules.config());
        let mut ctx = ExecutionContext {
            level: PermissionLevel::User,
            signer: parsed.signer,
            meter: &mut meter,
        };
        rules
            .constraint_machine()
            .verify(reader, txn.id(), txn.instructions(), &mut ctx)
    }

    fn transfer(amount: u128) -> TxAction {
        TxAction::TransferTokens {
            resource: REAddr::Native,
            from: account(1),
            to: account(2),
            amount,
        }
    }

    #[test]
    fn test_transfer_with_remainder() {
        let rules = rules();
        let reader = funded(&[100]);
        let mut builder = TxBuilder::new(&reader, &rules);
        builder.action(&transfer(40)).unwrap();

        assert_eq!(
            builder.instructions(),
            &[
                Instruction::SpinDown(txn_substate_id(1, 0)),
                Instruction::SpinUp(native_tokens(2, 40)),
                Instruction::SpinUp(native_tokens(1, 60)),
                Instruction::ParticleGroupEnd,
            ]
        );
    }

    #[test]
    fn test_exact_amount_has_no_remainder() {
        let rules = rules();
        let reader = funded(&[30, 10]);
        let mut builder = TxBuilder::new(&reader, &rules);
        builder.action(&transfer(40)).unwrap();
        assert_eq!(builder.up_count(), 1);
    }

    #[test]
    fn test_zero_amounts_rejected_before_emitting() {
        let rules = rules();
        let reader = funded(&[100]);
        let validator = key(5).public_key();
        let cases = [
            (transfer(0), "Transfer amount can't be zero."),
            (
                TxAction::StakeTokens {
                    from: account(1),
                    validator,
                    amount: 0,
                },
                "Stake amount can't be zero.",
            ),
            (
                TxAction::UnstakeTokens {
                    account: account(1),
                    validator,
                    amount: 0,
                },
                "Unstake amount can't be zero.",
            ),
        ];
        for (action, message) in cases {
            let mut builder = TxBuilder::new(&reader, &rules);
            assert_eq!(
                builder.action(&action).err(),
                Some(TxBuilderError::ZeroAmount(message.to_string()))
            );
            assert!(builder.instructions().is_empty());
        }
    }

    #[test]
    fn test_not_enough_balance() {
        let rules = rules();
        let reader = funded(&[30, 10]);
        let mut builder = TxBuilder::new(&reader, &rules);
        assert_eq!(
            builder.action(&transfer(41)).err(),
            Some(TxBuilderError::NotEnoughBalance(
                "Not enough balance for transfer.".to_string()
            ))
        );
        assert!(builder.instructions().is_empty());
    }

    #[test]
    fn test_second_transfer_spends_local_remainder() {
        let rules = rules();
        let reader = funded(&[100]);
        let mut builder = TxBuilder::new(&reader, &rules);
        builder.action(&transfer(40)).unwrap();
        builder.action(&transfer(50)).unwrap();

        assert_eq!(builder.instructions()[4], Instruction::LocalSpinDown(1));
        let txn = builder.sign_and_build(&key(1)).unwrap();
        let output = execute(&rules, &reader, &txn).unwrap();
        assert_eq!(output.actions, vec![transfer(40), transfer(50)]);

        let builder = {
            let mut builder = TxBuilder::new(&reader, &rules);
            builder.action(&transfer(40)).unwrap();
            builder.action(&transfer(61)).map(|_| ()).unwrap_err()
        };
        assert!(matches!(builder, TxBuilderError::NotEnoughBalance(_)));
    }

    #[test]
    fn test_round_trip_decodes_same_action() {
        let rules = rules();
        let reader = funded(&[100]);
        let mut builder = TxBuilder::new(&reader, &rules);
        builder.action(&transfer(40)).unwrap();
        let txn = builder.sign_and_build(&key(1)).unwrap();

        let output = execute(&rules, &reader, &txn).unwrap();
        assert_eq!(output.actions, vec![transfer(40)]);
    }

    #[test]
    fn test_resource_claimed_twice_in_one_txn() {
        let rules = rules();
        let reader = MapReader::default();
        let owner = key(1).public_key();
        let resource = REAddr::of_hashed_key(&owner, "gold");
        let create = TxAction::CreateFixedToken {
            resource,
            to: account(1),
            symbol: "gold".to_string(),
            name: "Gold".to_string(),
            description: String::new(),
            icon_url: String::new(),
            url: String::new(),
            supply: 1000,
        };

        let mut builder = TxBuilder::new(&reader, &rules);
        builder.action(&create).unwrap();
        assert_eq!(
            builder.action(&create).err(),
            Some(TxBuilderError::NotAvailable("RRI not available".to_string()))
        );
    }

    #[test]
    fn test_fee_group_covers_fee_table() {
        let config = RulesConfig {
            fees: FeeTable {
                base_fee: 5,
                per_up_substate_fee: 1,
            },
            ..RulesConfig::default()
        };
        let rules = RERules::new(RulesVersion::V1, config).unwrap();
        let reader = funded(&[100]);
        let request = TxnConstructionRequest::new()
            .action(transfer(40))
            .fee_payer(account(1));

        let txn = TxBuilder::from_request(&reader, &rules, &request)
            .unwrap()
            .sign_and_build(&key(1))
            .unwrap();
        let output = execute(&rules, &reader, &txn).unwrap();
        // Two transfer ups plus the fee change: 5 + 3
        assert_eq!(output.fee_paid, 8);
        assert_eq!(
            output.actions.last(),
            Some(&TxAction::PayFee {
                from: account(1),
                amount: 8
            })
        );
    }

    #[test]
    fn test_validator_metadata_needs_v2() {
        let reader = MapReader::default();
        let action = TxAction::UpdateValidatorMetadata {
            validator: key(3).public_key(),
            name: "node".to_string(),
            url: "https://node.example".to_string(),
        };

        let v1 = rules();
        let mut builder = TxBuilder::new(&reader, &v1);
        assert_eq!(
            builder.action(&action).err(),
            Some(TxBuilderError::UnsupportedSubstate("ValidatorMetadata"))
        );

        let v2 = RERules::new(RulesVersion::V2, RulesConfig::default()).unwrap();
        let mut builder = TxBuilder::new(&reader, &v2);
        builder.action(&action).unwrap();
        let txn = builder.sign_and_build(&key(3)).unwrap();
        assert_eq!(execute(&v2, &reader, &txn).unwrap().actions, vec![action]);
    }

    #[test]
    fn test_register_twice_rejected() {
        let rules = rules();
        let reader = MapReader::default();
        let validator = key(3).public_key();
        let mut builder = TxBuilder::new(&reader, &rules);
        builder
            .action(&TxAction::RegisterValidator { validator })
            .unwrap();
        let before = builder.instructions().to_vec();
        assert_eq!(
            builder
                .action(&TxAction::RegisterValidator { validator })
                .err(),
            Some(TxBuilderError::NotAvailable(
                "Validator already registered".to_string()
            ))
        );
        assert_eq!(builder.instructions(), before.as_slice());
    }

    #[test]
    fn test_self_transfer_rejected() {
        let rules = rules();
        let reader = funded(&[100]);
        let mut builder = TxBuilder::new(&reader, &rules);
        let action = TxAction::TransferTokens {
            resource: REAddr::Native,
            from: account(1),
            to: account(1),
            amount: 10,
        };
        assert_eq!(
            builder.action(&action).err(),
            Some(TxBuilderError::InvalidAction(
                "Cannot transfer to the sending account.".to_string()
            ))
        );
        assert!(builder.instructions().is_empty());
    }

    #[test]
    fn test_rejected_action_leaves_builder_usable() {
        let rules = rules();
        let reader = funded(&[100]);
        let mut builder = TxBuilder::new(&reader, &rules);
        assert_eq!(
            builder
                .action(&TxAction::UnregisterValidator {
                    validator: key(3).public_key(),
                })
                .err(),
            Some(TxBuilderError::NotAvailable(
                "Validator not registered".to_string()
            ))
        );
        assert!(builder.instructions().is_empty());

        builder.action(&transfer(40)).unwrap();
        let txn = builder.sign_and_build(&key(1)).unwrap();
        execute(&rules, &reader, &txn).unwrap();
    }

    #[test]
    fn test_message_limit() {
        let rules = rules();
        let reader = MapReader::default();
        let mut builder = TxBuilder::new(&reader, &rules);
        builder.message("x".repeat(300));
        assert_eq!(
            builder.build_without_signature().err(),
            Some(TxBuilderError::MessageTooLong { len: 300, max: 255 })
        );
    }

    #[test]
    fn test_unclosed_group() {
        let rules = rules();
        let reader = MapReader::default();
        let mut builder = TxBuilder::new(&reader, &rules);
        builder.up(native_tokens(1, 5));
        assert_eq!(
            builder.build_without_signature().err(),
            Some(TxBuilderError::UnclosedParticleGroup)
        );
    }
}
