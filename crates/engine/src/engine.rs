//! The batch orchestrator.
//!
//! ```text
//! Vec<Txn> ──► parse ──► ConstraintMachine ──► SubstateOverlay ──► next txn
//!                                                    │
//!            Option<LedgerMetadata> ──► verifiers ◄──┘
//!                                          │
//!                                   CommitBatch ──► EngineStore::commit
//!                                          │
//!                                   next fork? ──► switch rule set
//! ```
//!
//! The engine executes one batch at a time. Every transaction of a batch
//! reads through the same overlay, so it sees the effects of the
//! transactions before it. Nothing reaches the store until the whole batch,
//! verifiers included, has succeeded.

use crate::builder::{TxBuilder, TxnConstructionRequest};
use crate::config::{BatchAtomicity, EngineConfig};
use crate::constraint_machine::{ConstraintMachine, ExecutionContext};
use crate::error::{EngineError, TxBuilderError, TxnError, TxnParseError};
use crate::forks::{ForkConfig, Forks};
use crate::genesis::GenesisConfig;
use crate::meter::Meter;
use crate::parser::{ParsedTxn, TxnParser};
use crate::result::{BatchOutcome, REProcessedTxn, RejectedTxn};
use crate::rule_set::RERules;
use crate::verifier::{run_verifiers, BatchContext};
use crate::views::{self, ComputedState, ComputedView};
use std::sync::Arc;
use std::time::Instant;
use stratum_storage::{
    CommitBatch, CommittedTxn, EngineStore, SubstateIndex, SubstateOverlay, SubstateReader,
};
use stratum_types::{Hash, LedgerMetadata, PermissionLevel, SubstateKind, Txn};
use tracing::{debug, info, instrument, Level};

/// Executes batches against an [`EngineStore`] under the active fork's rules.
pub struct Engine<S: EngineStore> {
    store: Arc<S>,
    forks: Forks,
    current_fork: Hash,
    rules: Arc<RERules>,
    config: EngineConfig,
}

impl<S: EngineStore> Engine<S> {
    /// Create an engine over `store`.
    ///
    /// Resumes the fork recorded in the store, or records the genesis fork
    /// when the store has none.
    pub fn new(store: Arc<S>, forks: Forks, config: EngineConfig) -> Result<Self, EngineError> {
        let (current_fork, rules) = match store.current_fork_hash() {
            Some(hash) => {
                let (fork, rules) = forks.get(&hash).ok_or(EngineError::UnknownFork(hash))?;
                info!(fork = fork.name(), %hash, "Resuming fork");
                (hash, Arc::clone(rules))
            }
            None => {
                let (fork, rules) = forks.genesis();
                let hash = fork.hash();
                store.store_current_fork_hash(hash);
                info!(fork = fork.name(), %hash, "Starting at genesis fork");
                (hash, Arc::clone(rules))
            }
        };

        Ok(Self {
            store,
            forks,
            current_fork,
            rules,
            config,
        })
    }

    /// Validate `forks` under `config` and create an engine.
    pub fn from_config(
        store: Arc<S>,
        forks: Vec<ForkConfig>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let forks = Forks::from_config(forks, &config)?;
        Self::new(store, forks, config)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Hash of the active fork.
    pub fn current_fork(&self) -> Hash {
        self.current_fork
    }

    /// Rule set of the active fork.
    pub fn rules(&self) -> &Arc<RERules> {
        &self.rules
    }

    /// All configured forks.
    pub fn forks(&self) -> &Forks {
        &self.forks
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ═══════════════════════════════════════════════════════════════════
    // Execution
    // ═══════════════════════════════════════════════════════════════════

    /// Execute a batch of decoded transactions.
    ///
    /// `metadata` is the batch's proof; when present the verifier chain runs
    /// over it after the last transaction. A transaction failure is handled
    /// according to the configured [`BatchAtomicity`]; a verifier failure
    /// always discards the batch.
    #[instrument(level = Level::DEBUG, skip_all, fields(
        txn_count = txns.len(),
        latency_us = tracing::field::Empty,
    ))]
    pub fn execute(
        &mut self,
        txns: Vec<Txn>,
        metadata: Option<LedgerMetadata>,
        level: PermissionLevel,
    ) -> Result<BatchOutcome, EngineError> {
        let start = Instant::now();
        let candidates = txns.into_iter().enumerate().collect();
        let outcome = self.run_batch(
            candidates,
            Vec::new(),
            metadata,
            level,
            self.config.batch_atomicity,
        )?;
        tracing::Span::current().record("latency_us", start.elapsed().as_micros() as u64);
        Ok(outcome)
    }

    /// Execute a batch of opaque transaction blobs.
    ///
    /// Blobs that do not decode count as failed transactions; their rejection
    /// id is the hash of the raw bytes.
    #[instrument(level = Level::DEBUG, skip_all, fields(
        txn_count = blobs.len(),
        latency_us = tracing::field::Empty,
    ))]
    pub fn execute_raw(
        &mut self,
        blobs: Vec<Vec<u8>>,
        metadata: Option<LedgerMetadata>,
        level: PermissionLevel,
    ) -> Result<BatchOutcome, EngineError> {
        let start = Instant::now();
        let atomicity = self.config.batch_atomicity;
        let mut candidates = Vec::with_capacity(blobs.len());
        let mut rejected = Vec::new();

        for (index, bytes) in blobs.into_iter().enumerate() {
            let txn_id = Hash::from_bytes(&bytes);
            match Txn::from_bytes(bytes) {
                Ok(txn) => candidates.push((index, txn)),
                Err(source) => match atomicity {
                    BatchAtomicity::AllOrNothing => {
                        debug!(index, %txn_id, error = %source, "Undecodable transaction");
                        return Err(EngineError::Undecodable { index, source });
                    }
                    BatchAtomicity::PerTransaction => {
                        debug!(index, %txn_id, error = %source, "Skipping undecodable transaction");
                        rejected.push(RejectedTxn {
                            index,
                            txn_id,
                            error: TxnError::Parse(TxnParseError::Decode(source)),
                        });
                    }
                },
            }
        }

        let outcome = self.run_batch(candidates, rejected, metadata, level, atomicity)?;
        tracing::Span::current().record("latency_us", start.elapsed().as_micros() as u64);
        Ok(outcome)
    }

    /// Build and execute the genesis transaction at `System` level.
    #[instrument(level = Level::DEBUG, skip_all, fields(latency_us = tracing::field::Empty))]
    pub fn run_genesis(&mut self, genesis: &GenesisConfig) -> Result<BatchOutcome, EngineError> {
        let start = Instant::now();
        let epoch_index = SubstateIndex::of_kind(SubstateKind::EpochData);
        if self.store.open_indexed_cursor(&epoch_index).next().is_some() {
            return Err(EngineError::GenesisAlreadyExecuted);
        }

        let txn = genesis.build_txn(self.store.as_ref(), &self.rules)?;
        let txn_id = txn.id();
        let outcome = self.run_batch(
            vec![(0, txn)],
            Vec::new(),
            None,
            PermissionLevel::System,
            BatchAtomicity::AllOrNothing,
        )?;

        info!(
            %txn_id,
            balances = genesis.balances.len(),
            validators = genesis.validators.len(),
            "Genesis executed"
        );
        tracing::Span::current().record("latency_us", start.elapsed().as_micros() as u64);
        Ok(outcome)
    }

    fn run_batch(
        &mut self,
        txns: Vec<(usize, Txn)>,
        mut rejected: Vec<RejectedTxn>,
        metadata: Option<LedgerMetadata>,
        level: PermissionLevel,
        atomicity: BatchAtomicity,
    ) -> Result<BatchOutcome, EngineError> {
        let store = Arc::clone(&self.store);
        let rules = Arc::clone(&self.rules);
        let parser = rules.parser();
        let cm = rules.constraint_machine();
        let mut meter = rules.meter();
        let mut overlay = SubstateOverlay::new(store.as_ref());
        let mut processed = Vec::with_capacity(txns.len());

        for (index, txn) in txns {
            let txn_id = txn.id();
            match execute_txn(&parser, &cm, &overlay, txn, level, &mut meter) {
                Ok(result) => {
                    meter.commit_txn();
                    overlay.apply(&result.updates);
                    debug!(
                        index,
                        %txn_id,
                        actions = result.actions.len(),
                        fee_paid = result.fee_paid as u64,
                        "Transaction executed"
                    );
                    processed.push(result);
                }
                Err(error) => {
                    meter.reset_txn();
                    match atomicity {
                        BatchAtomicity::AllOrNothing => {
                            debug!(index, %txn_id, error = %error, "Transaction rejected, discarding batch");
                            return Err(EngineError::Transaction {
                                index,
                                txn_id,
                                source: error,
                            });
                        }
                        BatchAtomicity::PerTransaction => {
                            debug!(index, %txn_id, error = %error, "Transaction rejected, skipping");
                            rejected.push(RejectedTxn {
                                index,
                                txn_id,
                                error,
                            });
                        }
                    }
                }
            }
        }
        rejected.sort_by_key(|rejected| rejected.index);

        let verified = match metadata {
            Some(metadata) => {
                let ctx = BatchContext {
                    reader: &overlay,
                    processed: &processed,
                    current_fork: self.current_fork,
                };
                Some(run_verifiers(rules.verifiers(), &ctx, metadata)?)
            }
            None => None,
        };

        let next_fork = verified.as_ref().and_then(|metadata| metadata.next_fork_hash);
        let next_rules = match next_fork {
            Some(hash) => {
                let (_, rules) = self
                    .forks
                    .get(&hash)
                    .ok_or(EngineError::UnknownFork(hash))?;
                Some(Arc::clone(rules))
            }
            None => None,
        };
        drop(overlay);

        let batch = CommitBatch {
            txns: processed
                .iter()
                .map(|txn| CommittedTxn {
                    txn_id: txn.txn_id(),
                    updates: txn.updates.clone(),
                })
                .collect(),
            metadata: verified.clone(),
            fork_hash: next_fork,
        };
        if !batch.is_empty() {
            store.commit(batch);
        }

        if let (Some(hash), Some(next_rules)) = (next_fork, next_rules) {
            info!(
                from = %self.current_fork,
                to = %hash,
                version = ?next_rules.version(),
                "Switched fork"
            );
            self.current_fork = hash;
            self.rules = next_rules;
        }

        Ok(BatchOutcome {
            processed,
            rejected,
            metadata: verified,
            fork_switched: next_fork,
        })
    }

    // ═══════════════════════════════════════════════════════════════════
    // Construction and views
    // ═══════════════════════════════════════════════════════════════════

    /// Compile a request against committed state under the active rules.
    pub fn construct(
        &self,
        request: &TxnConstructionRequest,
    ) -> Result<TxBuilder<'_>, TxBuilderError> {
        TxBuilder::from_request(self.store.as_ref(), &self.rules, request)
    }

    /// Aggregate committed state into a view.
    pub fn computed_state(&self, view: ComputedView) -> ComputedState {
        views::compute(self.store.as_ref(), view)
    }

    /// Metadata of the last committed batch that carried a proof.
    pub fn last_metadata(&self) -> Option<LedgerMetadata> {
        self.store.last_metadata()
    }
}

fn execute_txn(
    parser: &TxnParser<'_>,
    cm: &ConstraintMachine<'_>,
    reader: &dyn SubstateReader,
    txn: Txn,
    level: PermissionLevel,
    meter: &mut dyn Meter,
) -> Result<REProcessedTxn, TxnError> {
    let ParsedTxn { txn, signer } = parser.parse(txn)?;
    let mut ctx = ExecutionContext {
        level,
        signer,
        meter,
    };
    let output = cm.verify(reader, txn.id(), txn.instructions(), &mut ctx)?;
    Ok(REProcessedTxn {
        txn,
        signer,
        updates: output.updates,
        actions: output.actions,
        fee_paid: output.fee_paid,
    })
}
