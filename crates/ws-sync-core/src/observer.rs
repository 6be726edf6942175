use ws_api_types::{TransactionState, WalletState, WaveError, WaveRecord};

/// Presentation-side hooks. Every method defaults to a no-op.
///
/// Calls arrive after the controller has released its own lock, but a wave
/// notification may be delivered from inside a subscription callback, so an
/// observer must not call `SyncController::close` from `on_waves`.
///
/// `on_waves` calls are serialized and never go back to an older store
/// snapshot; an observer must not trigger another wave notification from
/// inside `on_waves`.
pub trait SyncObserver: Send + Sync {
    fn on_waves(&self, _waves: &[WaveRecord]) {}

    fn on_wallet(&self, _wallet: &WalletState) {}

    fn on_transaction(&self, _transaction: &TransactionState) {}

    /// One-shot report of a failure that is not kept as state.
    fn on_diagnostic(&self, _error: &WaveError) {}
}

pub(crate) enum Notice {
    /// Store snapshot; `version` grows with every store change.
    Waves { version: u64, waves: Vec<WaveRecord> },
    Wallet(WalletState),
    Transaction(TransactionState),
    Diagnostic(WaveError),
}

impl Notice {
    pub(crate) fn dispatch(&self, observer: &dyn SyncObserver) {
        match self {
            Notice::Waves { waves, .. } => observer.on_waves(waves),
            Notice::Wallet(wallet) => observer.on_wallet(wallet),
            Notice::Transaction(transaction) => observer.on_transaction(transaction),
            Notice::Diagnostic(error) => observer.on_diagnostic(error),
        }
    }
}
