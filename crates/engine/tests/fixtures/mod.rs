//! Test fixtures for engine integration tests.
//!
//! Provides deterministic keys and a ledger bootstrapped through genesis on
//! the in-memory store.

#![allow(dead_code)]

use std::sync::Arc;
use stratum_engine::{
    BatchOutcome, ComputedState, ComputedView, Engine, EngineConfig, EngineError, ForkConfig,
    GenesisConfig, RulesVersion, SystemInfo, TxnConstructionRequest,
};
use stratum_storage_memory::InMemoryEngineStore;
use stratum_types::{KeyPair, LedgerMetadata, PermissionLevel, PublicKey, REAddr, Txn, TxAction};

/// Deterministic key for `seed`.
pub fn key(seed: u64) -> KeyPair {
    KeyPair::from_seed(seed).unwrap()
}

/// Public key for `seed`.
pub fn public_key(seed: u64) -> PublicKey {
    key(seed).public_key()
}

/// Account address controlled by `key(seed)`.
pub fn account(seed: u64) -> REAddr {
    REAddr::of_account(public_key(seed))
}

/// Native transfer between two seeded accounts.
pub fn transfer(from: u64, to: u64, amount: u128) -> TxAction {
    TxAction::TransferTokens {
        resource: REAddr::Native,
        from: account(from),
        to: account(to),
        amount,
    }
}

/// Single-fork schedule used when a test does not care about forks.
pub fn single_fork() -> Vec<ForkConfig> {
    vec![ForkConfig::fixed("olympia", RulesVersion::V1, 0)]
}

/// An engine over a fresh in-memory store, past genesis.
pub struct TestLedger {
    pub engine: Engine<InMemoryEngineStore>,
}

impl TestLedger {
    /// Ledger where `account(seed)` holds each listed native balance.
    pub fn new(balances: &[(u64, u128)]) -> Self {
        let genesis = balances
            .iter()
            .fold(GenesisConfig::test_minimal(), |genesis, (seed, amount)| {
                genesis.with_balance(account(*seed), *amount)
            });
        Self::with(single_fork(), EngineConfig::default(), &genesis)
    }

    /// Ledger with explicit forks, configuration and genesis.
    pub fn with(forks: Vec<ForkConfig>, config: EngineConfig, genesis: &GenesisConfig) -> Self {
        let store = Arc::new(InMemoryEngineStore::new());
        let mut engine = Engine::from_config(store, forks, config).unwrap();
        engine.run_genesis(genesis).unwrap();
        Self { engine }
    }

    /// The shared store.
    pub fn store(&self) -> Arc<InMemoryEngineStore> {
        Arc::clone(self.engine.store())
    }

    /// Native balance of `account(seed)`.
    pub fn balance(&self, seed: u64) -> u128 {
        self.balance_of(account(seed), REAddr::Native)
    }

    /// Balance of `holder` in `resource`.
    pub fn balance_of(&self, holder: REAddr, resource: REAddr) -> u128 {
        self.engine
            .computed_state(ComputedView::Balances)
            .balance(&holder, &resource)
            .unwrap()
    }

    /// Total supply of `resource`.
    pub fn supply(&self, resource: REAddr) -> u128 {
        self.engine
            .computed_state(ComputedView::TotalSupply)
            .supply(&resource)
            .unwrap()
    }

    /// Current epoch, round and timestamp.
    pub fn system(&self) -> SystemInfo {
        match self.engine.computed_state(ComputedView::System) {
            ComputedState::System(Some(info)) => info,
            other => panic!("no system state: {:?}", other),
        }
    }

    /// Compile `request` and sign it with `key(signer)`.
    pub fn sign_request(&self, request: TxnConstructionRequest, signer: u64) -> Txn {
        self.engine
            .construct(&request)
            .unwrap()
            .sign_and_build(&key(signer))
            .unwrap()
    }

    /// Compile a single action and sign it with `key(signer)`.
    pub fn sign(&self, action: TxAction, signer: u64) -> Txn {
        self.sign_request(TxnConstructionRequest::new().action(action), signer)
    }

    /// Execute user transactions without a proof.
    pub fn submit(&mut self, txns: Vec<Txn>) -> Result<BatchOutcome, EngineError> {
        self.engine.execute(txns, None, PermissionLevel::User)
    }

    /// Close the current epoch with a system transaction and its proof.
    pub fn next_epoch(&mut self) -> Result<BatchOutcome, EngineError> {
        let system = self.system();
        let metadata = LedgerMetadata::new(system.epoch, system.round, system.timestamp + 1);
        self.next_epoch_with(Some(metadata))
    }

    /// Close the current epoch with an explicit (possibly absent) proof.
    pub fn next_epoch_with(
        &mut self,
        metadata: Option<LedgerMetadata>,
    ) -> Result<BatchOutcome, EngineError> {
        let timestamp = self.system().timestamp + 1;
        let txn = self
            .engine
            .construct(&TxnConstructionRequest::new().action(TxAction::NextEpoch { timestamp }))
            .unwrap()
            .build_without_signature()
            .unwrap();
        self.engine
            .execute(vec![txn], metadata, PermissionLevel::System)
    }
}
