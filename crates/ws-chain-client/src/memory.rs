//! In-process guestbook contract.
//!
//! Implements the `getAllWaves` / `wave` / `NewWave` surface against a vector
//! held in memory. Used by `wavesync --local` and by the test suites, which
//! drive mining, reverts, and read stalls by hand.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;
use ws_api_types::{ContractAddress, MinedReceipt, TxHash, WalletAddress, WaveError, WaveRecord};

use crate::{ContractGateway, GatewayFactory, Listener, SubscriptionHandle, WaveSink, hex_lower};

const GENESIS_TIMESTAMP: u64 = 1_700_000_000;
const BLOCK_TIME_SECS: u64 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningMode {
    /// Every accepted transaction is mined into its own block on submission.
    Instant,
    /// Pending transactions wait for `MemoryChain::mine`.
    Manual,
}

#[derive(Debug, Clone)]
struct PendingWave {
    tx_hash: TxHash,
    from: WalletAddress,
    message: String,
    revert_reason: Option<String>,
}

#[derive(Debug, Clone)]
enum Outcome {
    Mined(MinedReceipt),
    Reverted(String),
}

struct ChainState {
    waves: Vec<WaveRecord>,
    pending: Vec<PendingWave>,
    outcomes: HashMap<TxHash, Outcome>,
    listeners: HashMap<Uuid, Arc<Listener>>,
    block_number: u64,
    clock: u64,
    nonce: u64,
    mining: MiningMode,
    reject_signatures: bool,
    revert_next: Option<String>,
    read_failure: Option<String>,
}

struct ChainInner {
    contract: ContractAddress,
    state: Mutex<ChainState>,
    height: watch::Sender<u64>,
    reads_open: watch::Sender<bool>,
}

/// Shared handle to one in-memory contract. Clones see the same chain.
#[derive(Clone)]
pub struct MemoryChain {
    inner: Arc<ChainInner>,
}

impl MemoryChain {
    pub fn new(contract: ContractAddress, mining: MiningMode) -> Self {
        let (height, _) = watch::channel(0);
        let (reads_open, _) = watch::channel(true);
        Self {
            inner: Arc::new(ChainInner {
                contract,
                state: Mutex::new(ChainState {
                    waves: Vec::new(),
                    pending: Vec::new(),
                    outcomes: HashMap::new(),
                    listeners: HashMap::new(),
                    block_number: 0,
                    clock: GENESIS_TIMESTAMP,
                    nonce: 0,
                    mining,
                    reject_signatures: false,
                    revert_next: None,
                    read_failure: None,
                }),
                height,
                reads_open,
            }),
        }
    }

    pub fn gateway(&self, signer: Option<WalletAddress>) -> MemoryGateway {
        MemoryGateway {
            chain: self.clone(),
            signer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChainState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Contract storage as `getAllWaves()` would return it.
    pub fn waves(&self) -> Vec<WaveRecord> {
        self.lock().waves.clone()
    }

    pub fn block_number(&self) -> u64 {
        self.lock().block_number
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn listener_count(&self) -> usize {
        self.lock()
            .listeners
            .values()
            .filter(|listener| listener.is_active())
            .count()
    }

    /// Makes the wallet decline every signature request until reset.
    pub fn set_reject_signatures(&self, reject: bool) {
        self.lock().reject_signatures = reject;
    }

    /// The next submitted transaction reverts with `reason` when mined.
    pub fn revert_next(&self, reason: impl Into<String>) {
        self.lock().revert_next = Some(reason.into());
    }

    /// Makes `getAllWaves()` fail with a network error until cleared.
    pub fn fail_reads(&self, reason: Option<String>) {
        self.lock().read_failure = reason;
    }

    /// Stalls `getAllWaves()` calls until `resume_reads`.
    pub fn pause_reads(&self) {
        self.inner.reads_open.send_replace(false);
    }

    pub fn resume_reads(&self) {
        self.inner.reads_open.send_replace(true);
    }

    /// Mines a wave sent by some other account, emitting `NewWave`.
    pub fn emit_external(&self, from: WalletAddress, message: impl Into<String>) -> WaveRecord {
        let (record, listeners) = {
            let mut state = self.lock();
            state.block_number += 1;
            state.clock += BLOCK_TIME_SECS;
            let record = WaveRecord {
                address: from,
                timestamp: state.clock,
                message: message.into(),
            };
            state.waves.push(record.clone());
            (record, active_listeners(&state))
        };
        deliver_all(&listeners, std::slice::from_ref(&record));
        self.bump_height();
        record
    }

    /// Delivers `record` to subscribers without touching storage, as a
    /// redelivered or replayed log entry would arrive.
    pub fn replay_event(&self, record: WaveRecord) {
        let listeners = active_listeners(&self.lock());
        deliver_all(&listeners, &[record]);
    }

    /// Mines all pending transactions into one block. Returns the mined waves.
    pub fn mine(&self) -> Vec<WaveRecord> {
        let (mined, listeners) = {
            let mut state = self.lock();
            if state.pending.is_empty() {
                return Vec::new();
            }
            let mined = mine_pending(&mut state);
            (mined, active_listeners(&state))
        };
        deliver_all(&listeners, &mined);
        self.bump_height();
        mined
    }

    fn bump_height(&self) {
        self.inner.height.send_modify(|height| *height += 1);
    }

    fn submit(&self, from: &WalletAddress, message: &str) -> Result<TxHash, WaveError> {
        let (mine_now, tx_hash) = {
            let mut state = self.lock();
            if state.reject_signatures {
                return Err(WaveError::UserRejected);
            }
            state.nonce += 1;
            let tx_hash = derive_tx_hash(from, state.nonce, message);
            let revert_reason = state.revert_next.take();
            state.pending.push(PendingWave {
                tx_hash: tx_hash.clone(),
                from: from.clone(),
                message: message.to_owned(),
                revert_reason,
            });
            debug!(%tx_hash, %from, "memory chain accepted transaction");
            (state.mining == MiningMode::Instant, tx_hash)
        };

        if mine_now {
            self.mine();
        }
        Ok(tx_hash)
    }

    fn outcome(&self, tx_hash: &TxHash) -> Option<Result<MinedReceipt, WaveError>> {
        let state = self.lock();
        match state.outcomes.get(tx_hash) {
            Some(Outcome::Mined(receipt)) => Some(Ok(receipt.clone())),
            Some(Outcome::Reverted(reason)) => Some(Err(WaveError::TransactionReverted(reason.clone()))),
            None if state.pending.iter().any(|pending| &pending.tx_hash == tx_hash) => None,
            None => Some(Err(WaveError::NetworkError(format!("unknown transaction {tx_hash}")))),
        }
    }
}

impl GatewayFactory for MemoryChain {
    fn build(&self, signer: Option<&WalletAddress>) -> Result<Arc<dyn ContractGateway>, WaveError> {
        Ok(Arc::new(self.gateway(signer.cloned())))
    }
}

fn mine_pending(state: &mut ChainState) -> Vec<WaveRecord> {
    state.block_number += 1;
    state.clock += BLOCK_TIME_SECS;
    let block_number = state.block_number;
    let timestamp = state.clock;

    let mut mined = Vec::new();
    for pending in std::mem::take(&mut state.pending) {
        if let Some(reason) = pending.revert_reason {
            state.outcomes.insert(pending.tx_hash, Outcome::Reverted(reason));
            continue;
        }
        let record = WaveRecord {
            address: pending.from,
            timestamp,
            message: pending.message,
        };
        state.waves.push(record.clone());
        state.outcomes.insert(
            pending.tx_hash.clone(),
            Outcome::Mined(MinedReceipt {
                tx_hash: pending.tx_hash,
                block_number,
            }),
        );
        mined.push(record);
    }
    info!(block_number, waves = mined.len(), "memory chain mined block");
    mined
}

fn active_listeners(state: &ChainState) -> Vec<Arc<Listener>> {
    state.listeners.values().cloned().collect()
}

fn deliver_all(listeners: &[Arc<Listener>], records: &[WaveRecord]) {
    for record in records {
        for listener in listeners {
            listener.deliver(record.clone());
        }
    }
}

fn derive_tx_hash(from: &WalletAddress, nonce: u64, message: &str) -> TxHash {
    let payload = format!("{from}:{nonce}:{message}");
    let digest = Sha256::digest(payload.as_bytes());
    TxHash(format!("0x{}", hex_lower(&digest)))
}

/// `MemoryChain` seen through one signer.
pub struct MemoryGateway {
    chain: MemoryChain,
    signer: Option<WalletAddress>,
}

#[async_trait]
impl ContractGateway for MemoryGateway {
    fn contract(&self) -> &ContractAddress {
        &self.chain.inner.contract
    }

    fn signer(&self) -> Option<&WalletAddress> {
        self.signer.as_ref()
    }

    async fn fetch_history(&self) -> Result<Vec<WaveRecord>, WaveError> {
        let mut reads_open = self.chain.inner.reads_open.subscribe();
        loop {
            let open = *reads_open.borrow_and_update();
            if open {
                break;
            }
            reads_open
                .changed()
                .await
                .map_err(|_| WaveError::network("memory chain dropped"))?;
        }

        let state = self.chain.lock();
        if let Some(reason) = &state.read_failure {
            return Err(WaveError::NetworkError(reason.clone()));
        }
        Ok(state.waves.clone())
    }

    async fn submit_wave(&self, message: &str, _gas_limit: u64) -> Result<TxHash, WaveError> {
        let Some(from) = self.signer.as_ref() else {
            return Err(WaveError::NotConnected);
        };
        self.chain.submit(from, message)
    }

    async fn await_mined(&self, handle: &TxHash) -> Result<MinedReceipt, WaveError> {
        let mut height = self.chain.inner.height.subscribe();
        loop {
            if let Some(outcome) = self.chain.outcome(handle) {
                return outcome;
            }
            height
                .changed()
                .await
                .map_err(|_| WaveError::network("memory chain dropped"))?;
        }
    }

    fn subscribe(&self, sink: WaveSink) -> Result<SubscriptionHandle, WaveError> {
        let handle = SubscriptionHandle::new();
        self.chain
            .lock()
            .listeners
            .insert(handle.id, Arc::new(Listener::new(sink)));
        debug!(%handle, "memory chain subscription opened");
        Ok(handle)
    }

    fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), WaveError> {
        let removed = self.chain.lock().listeners.remove(&handle.id);
        if let Some(listener) = removed {
            listener.silence();
            debug!(%handle, "memory chain subscription closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chain(mining: MiningMode) -> MemoryChain {
        MemoryChain::new(ContractAddress::new("0xc0ffee"), mining)
    }

    #[tokio::test]
    async fn instant_mining_appends_to_history() -> anyhow::Result<()> {
        let chain = chain(MiningMode::Instant);
        let gateway = chain.gateway(Some(WalletAddress::new("0xA11CE")));

        let handle = gateway.submit_wave("hello", 300_000).await?;
        let receipt = gateway.await_mined(&handle).await?;

        assert_eq!(receipt.tx_hash, handle);
        assert_eq!(receipt.block_number, 1);
        let history = gateway.fetch_history().await?;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].address, WalletAddress::new("0xa11ce"));
        assert_eq!(history[0].message, "hello");
        Ok(())
    }

    #[tokio::test]
    async fn manual_mining_resolves_waiting_receipt() -> anyhow::Result<()> {
        let chain = chain(MiningMode::Manual);
        let gateway = Arc::new(chain.gateway(Some(WalletAddress::new("0xa"))));

        let handle = gateway.submit_wave("gm", 1).await?;
        let waiter = {
            let gateway = Arc::clone(&gateway);
            let handle = handle.clone();
            tokio::spawn(async move { gateway.await_mined(&handle).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(chain.pending_count(), 1);

        chain.mine();
        let receipt = waiter.await??;
        assert_eq!(receipt.tx_hash, handle);
        assert_eq!(chain.pending_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn reverted_transaction_reports_reason() -> anyhow::Result<()> {
        let chain = chain(MiningMode::Instant);
        chain.revert_next("out of gas");
        let gateway = chain.gateway(Some(WalletAddress::new("0xa")));

        let handle = gateway.submit_wave("boom", 1).await?;
        let result = gateway.await_mined(&handle).await;

        assert_eq!(result, Err(WaveError::TransactionReverted("out of gas".to_owned())));
        assert!(chain.waves().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn read_only_gateway_cannot_submit() {
        let chain = chain(MiningMode::Instant);
        let gateway = chain.gateway(None);
        assert_eq!(gateway.submit_wave("hi", 1).await, Err(WaveError::NotConnected));
    }

    #[tokio::test]
    async fn declined_signature_is_user_rejected() {
        let chain = chain(MiningMode::Instant);
        chain.set_reject_signatures(true);
        let gateway = chain.gateway(Some(WalletAddress::new("0xa")));
        assert_eq!(gateway.submit_wave("hi", 1).await, Err(WaveError::UserRejected));
        assert_eq!(chain.pending_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribed_sink_receives_nothing() -> anyhow::Result<()> {
        let chain = chain(MiningMode::Instant);
        let gateway = chain.gateway(None);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);

        let handle = gateway.subscribe(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))?;
        chain.emit_external(WalletAddress::new("0xb"), "one");
        gateway.unsubscribe(&handle)?;
        chain.emit_external(WalletAddress::new("0xb"), "two");

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(chain.listener_count(), 0);
        Ok(())
    }
}
