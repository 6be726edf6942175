use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, warn};
use ws_api_types::{
    MinedReceipt, TransactionState, TxHash, WalletAddress, WalletState, WaveError, WaveRecord,
};
use ws_chain_client::{ContractGateway, GatewayFactory, SubscriptionHandle, WaveSink};
use ws_store::WaveStore;
use ws_wallet::{WalletProvider, WalletSession};

use crate::config::SyncConfig;
use crate::lifecycle::{InvalidTransition, TransactionLifecycle};
use crate::observer::{Notice, SyncObserver};

/// Gateway plus the live subscription opened through it.
struct Binding {
    gateway: Arc<dyn ContractGateway>,
    subscription: Option<SubscriptionHandle>,
}

impl Binding {
    fn release(self) {
        let Some(subscription) = self.subscription else {
            return;
        };
        match self.gateway.unsubscribe(&subscription) {
            Ok(()) => debug!(%subscription, "wave subscription closed"),
            Err(err) => warn!(%subscription, error = %err, "failed to close wave subscription"),
        }
    }
}

#[derive(Default)]
struct SyncState {
    store: WaveStore,
    lifecycle: TransactionLifecycle,
    binding: Option<Binding>,
    /// Id of the current open/close cycle; `None` while closed.
    open_session: Option<u64>,
    sessions_started: u64,
    /// Bumped on every store change; stamps wave notices.
    waves_version: u64,
}

impl SyncState {
    fn waves_notice(&mut self) -> Notice {
        self.waves_version += 1;
        Notice::Waves {
            version: self.waves_version,
            waves: self.store.all().to_vec(),
        }
    }
}

struct Shared {
    state: Mutex<SyncState>,
    observers: RwLock<Vec<Arc<dyn SyncObserver>>>,
    /// Version of the last wave notice handed to observers.
    waves_delivered: Mutex<u64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, notices: Vec<Notice>) {
        if notices.is_empty() {
            return;
        }
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for notice in &notices {
            // held across dispatch so wave notices reach observers in version order
            let _delivered = match notice {
                Notice::Waves { version, .. } => {
                    let mut delivered = self
                        .waves_delivered
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    if *version <= *delivered {
                        debug!(version, delivered = *delivered, "dropping stale wave snapshot");
                        continue;
                    }
                    *delivered = *version;
                    Some(delivered)
                }
                _ => None,
            };
            for observer in &observers {
                notice.dispatch(observer.as_ref());
            }
        }
    }

    fn accept_live(&self, session_id: u64, record: WaveRecord) {
        let notice = {
            let mut state = self.lock();
            if state.open_session != Some(session_id) {
                debug!(address = %record.address, "discarding live wave after teardown");
                return;
            }
            if !state.store.append(record) {
                return;
            }
            state.waves_notice()
        };
        self.notify(vec![notice]);
    }
}

/// Wires wallet, contract gateway, wave store, and transaction lifecycle together.
///
/// `open` loads history and starts the live subscription, `close` tears it down.
/// Both may be called any number of times; results of calls still outstanding
/// when `close` runs are dropped.
pub struct SyncController {
    shared: Arc<Shared>,
    session: WalletSession,
    factory: Arc<dyn GatewayFactory>,
    config: SyncConfig,
}

impl SyncController {
    pub fn new(
        provider: Option<Arc<dyn WalletProvider>>,
        factory: Arc<dyn GatewayFactory>,
        config: SyncConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SyncState::default()),
                observers: RwLock::new(Vec::new()),
                waves_delivered: Mutex::new(0),
            }),
            session: WalletSession::new(provider),
            factory,
            config,
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn SyncObserver>) {
        self.shared
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    // ── Read accessors ──

    pub fn wallet_state(&self) -> WalletState {
        self.session.state()
    }

    pub fn waves(&self) -> Vec<WaveRecord> {
        self.shared.lock().store.all().to_vec()
    }

    pub fn total_waves(&self) -> usize {
        self.shared.lock().store.size()
    }

    pub fn transaction_state(&self) -> TransactionState {
        self.shared.lock().lifecycle.state().clone()
    }

    /// True while a submission is in flight.
    pub fn is_busy(&self) -> bool {
        self.shared.lock().lifecycle.in_flight()
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().open_session.is_some()
    }

    // ── Lifecycle ──

    /// Subscribes to live waves, then probes the wallet and loads history
    /// concurrently. A no-op when already open.
    pub async fn open(&self) {
        let session_id = {
            let mut state = self.shared.lock();
            if state.open_session.is_some() {
                debug!("sync controller already open");
                return;
            }
            state.sessions_started += 1;
            let session_id = state.sessions_started;
            state.open_session = Some(session_id);
            session_id
        };
        info!(session_id, "opening sync controller");

        let signer = self.session.state().address().cloned();
        self.bind(session_id, signer.as_ref());

        let (existing, _) = tokio::join!(
            self.session.check_existing(),
            self.refresh_history(session_id)
        );

        // check_existing never downgrades the session; report what it holds now
        let wallet = self.session.state();
        let mut notices = vec![Notice::Wallet(wallet.clone())];
        if let Some(diagnostic) = existing.diagnostic {
            notices.push(Notice::Diagnostic(diagnostic));
        }
        self.shared.notify(notices);

        if let WalletState::Connected(account) = wallet {
            if signer.as_ref() != Some(&account) {
                self.bind(session_id, Some(&account));
            }
        }
    }

    /// Closes the live subscription. Safe to call when never opened or already closed.
    pub fn close(&self) {
        let binding = {
            let mut state = self.shared.lock();
            let Some(session_id) = state.open_session.take() else {
                return;
            };
            debug!(session_id, "closing sync controller");
            state.binding.take()
        };
        if let Some(binding) = binding {
            binding.release();
        }
        info!("sync controller closed");
    }

    // ── Commands ──

    /// Prompts the wallet. On a new account the gateway is rebuilt for it and
    /// history is reloaded.
    pub async fn connect(&self) -> Result<WalletAddress, WaveError> {
        let previous = self.session.state();
        let account = match self.session.request_connect().await {
            Ok(account) => account,
            Err(err) => {
                warn!(error = %err, "wallet connection failed");
                self.shared.notify(vec![Notice::Diagnostic(err.clone())]);
                return Err(err);
            }
        };

        self.shared
            .notify(vec![Notice::Wallet(WalletState::Connected(account.clone()))]);

        if previous.address() != Some(&account) {
            let session_id = self.shared.lock().open_session;
            if let Some(session_id) = session_id {
                self.bind(session_id, Some(&account));
                // failures were already reported as diagnostics
                let _ = self.refresh_history(session_id).await;
            }
        }
        Ok(account)
    }

    /// Forgets the authorized account and falls back to a read-only gateway.
    pub fn disconnect(&self) {
        self.session.disconnect();
        self.shared
            .notify(vec![Notice::Wallet(WalletState::Disconnected)]);
        let session_id = self.shared.lock().open_session;
        if let Some(session_id) = session_id {
            self.bind(session_id, None);
        }
    }

    /// Re-reads the full history and merges it into the store. A failure leaves
    /// the store unchanged and is reported both here and as a diagnostic.
    /// Refused with `Closed` unless the controller is open.
    pub async fn refresh(&self) -> Result<(), WaveError> {
        let Some(session_id) = self.shared.lock().open_session else {
            return Err(WaveError::Closed);
        };
        self.refresh_history(session_id).await
    }

    /// Sends one wave and drives it to `Settled` or `Failed`.
    ///
    /// Refused with `AlreadyInFlight` while another submission is in flight,
    /// `Closed` before `open`, and `NotConnected` without a wallet account.
    /// Once mined, history is re-read and merged; the wave becomes visible
    /// through that read or through the live event, whichever lands first.
    pub async fn submit(&self, message: &str) -> Result<MinedReceipt, WaveError> {
        let (gateway, session_id, started) = {
            let mut state = self.shared.lock();
            if state.lifecycle.in_flight() {
                return Err(WaveError::AlreadyInFlight);
            }
            if message.trim().is_empty() {
                return Err(WaveError::SubmissionError("message cannot be empty".to_owned()));
            }
            let Some(session_id) = state.open_session else {
                return Err(WaveError::Closed);
            };
            let gateway = match &state.binding {
                Some(binding) if binding.gateway.signer().is_some() => Arc::clone(&binding.gateway),
                _ => return Err(WaveError::NotConnected),
            };
            state.lifecycle.begin()?;
            (gateway, session_id, state.lifecycle.state().clone())
        };
        self.shared.notify(vec![Notice::Transaction(started)]);

        let handle = match gateway.submit_wave(message, self.config.gas_limit).await {
            Ok(handle) => handle,
            Err(err) => return Err(self.fail_transaction(err)),
        };
        info!(%handle, "wave submitted, waiting to be mined");
        self.transition(|lifecycle| lifecycle.submitted(handle.clone()));

        let receipt = match self.await_receipt(gateway.as_ref(), &handle).await {
            Ok(receipt) => receipt,
            Err(err) => return Err(self.fail_transaction(err)),
        };
        info!(%handle, block_number = receipt.block_number, "wave mined");
        self.transition(|lifecycle| lifecycle.mined(receipt.clone()));

        if let Err(err) = self.refresh_history(session_id).await {
            warn!(%handle, error = %err, "settlement refresh failed; relying on live events");
        }
        self.transition(|lifecycle| lifecycle.settle());
        info!(%handle, "wave settled");

        Ok(receipt)
    }

    // ── Internals ──

    async fn await_receipt(
        &self,
        gateway: &dyn ContractGateway,
        handle: &TxHash,
    ) -> Result<MinedReceipt, WaveError> {
        match self.config.mined_timeout {
            Some(limit) => tokio::time::timeout(limit, gateway.await_mined(handle))
                .await
                .map_err(|_| {
                    WaveError::NetworkError(format!("transaction {handle} not mined within {limit:?}"))
                })?,
            None => gateway.await_mined(handle).await,
        }
    }

    /// Builds a gateway for `signer`, subscribes through it, and swaps it in.
    /// The replaced binding is released after the new one is live, so no
    /// event falls between the two subscriptions.
    fn bind(&self, session_id: u64, signer: Option<&WalletAddress>) {
        let gateway = match self.factory.build(signer) {
            Ok(gateway) => gateway,
            Err(err) => {
                warn!(error = %err, "failed to build contract gateway");
                self.shared.notify(vec![Notice::Diagnostic(err)]);
                return;
            }
        };

        let subscription = match gateway.subscribe(live_sink(&self.shared, session_id)) {
            Ok(subscription) => {
                debug!(%subscription, contract = %gateway.contract(), "wave subscription opened");
                Some(subscription)
            }
            Err(err) => {
                warn!(error = %err, "failed to subscribe to NewWave events");
                self.shared.notify(vec![Notice::Diagnostic(err)]);
                None
            }
        };

        let binding = Binding {
            gateway,
            subscription,
        };
        let stale = {
            let mut state = self.shared.lock();
            if state.open_session == Some(session_id) {
                state.binding.replace(binding)
            } else {
                Some(binding)
            }
        };
        if let Some(stale) = stale {
            stale.release();
        }
    }

    async fn refresh_history(&self, session_id: u64) -> Result<(), WaveError> {
        let gateway = {
            let state = self.shared.lock();
            if state.open_session != Some(session_id) {
                return Ok(());
            }
            match &state.binding {
                Some(binding) => Arc::clone(&binding.gateway),
                None => {
                    return Err(WaveError::ContractCallError(
                        "no contract gateway bound".to_owned(),
                    ));
                }
            }
        };

        let history = match gateway.fetch_history().await {
            Ok(history) => history,
            Err(err) => {
                warn!(error = %err, "failed to load wave history");
                self.shared.notify(vec![Notice::Diagnostic(err.clone())]);
                return Err(err);
            }
        };

        let (total, notice) = {
            let mut state = self.shared.lock();
            if state.open_session != Some(session_id) {
                debug!("discarding wave history after teardown");
                return Ok(());
            }
            reconcile(&mut state.store, history);
            (state.store.size(), state.waves_notice())
        };
        info!(waves = total, "wave history loaded");
        self.shared.notify(vec![notice]);
        Ok(())
    }

    fn transition<F>(&self, apply: F)
    where
        F: FnOnce(&mut TransactionLifecycle) -> Result<(), InvalidTransition>,
    {
        let snapshot = {
            let mut state = self.shared.lock();
            if let Err(err) = apply(&mut state.lifecycle) {
                warn!(error = %err, "ignored transaction transition");
                return;
            }
            state.lifecycle.state().clone()
        };
        self.shared.notify(vec![Notice::Transaction(snapshot)]);
    }

    fn fail_transaction(&self, err: WaveError) -> WaveError {
        warn!(error = %err, "wave transaction failed");
        let failure = err.clone();
        self.transition(move |lifecycle| lifecycle.fail(failure));
        err
    }
}

impl Drop for SyncController {
    fn drop(&mut self) {
        self.close();
    }
}

fn live_sink(shared: &Arc<Shared>, session_id: u64) -> WaveSink {
    let shared = Arc::downgrade(shared);
    Arc::new(move |record| {
        if let Some(shared) = shared.upgrade() {
            shared.accept_live(session_id, record);
        }
    })
}

/// Puts `history` in chain order, then re-adds whatever the store already held
/// (live events that beat the read). The store never shrinks.
fn reconcile(store: &mut WaveStore, history: Vec<WaveRecord>) {
    let carried = store.all().to_vec();
    store.replace_all(history);
    for record in carried {
        store.append(record);
    }
}
