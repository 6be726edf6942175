use anyhow::Context;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};
use ws_api_types::{TransactionState, TxPhase, WalletState, WaveError, WaveRecord};
use ws_sync_core::{SyncController, SyncObserver};

/// Mirrors controller notifications into the log.
pub(crate) struct LogObserver;

impl SyncObserver for LogObserver {
    fn on_wallet(&self, wallet: &WalletState) {
        match wallet {
            WalletState::Connected(account) => info!(%account, "wallet connected"),
            WalletState::Disconnected => info!("wallet disconnected"),
        }
    }

    fn on_transaction(&self, transaction: &TransactionState) {
        match (&transaction.phase, &transaction.handle) {
            (TxPhase::Submitted, Some(handle)) => info!(%handle, "mining..."),
            (TxPhase::Mined, Some(handle)) => info!(%handle, "mined"),
            (TxPhase::Failed, _) => {
                if let Some(error) = &transaction.error {
                    warn!(%error, "wave failed");
                }
            }
            (phase, _) => info!(%phase, "transaction"),
        }
    }

    fn on_diagnostic(&self, error: &WaveError) {
        warn!(%error, "sync diagnostic");
    }
}

/// Prints each wave once. A history merge can reorder the snapshot, so
/// printed waves are tracked by value rather than by position.
#[derive(Default)]
struct TailPrinter {
    printed: Mutex<HashSet<WaveRecord>>,
}

impl TailPrinter {
    fn fresh(&self, waves: &[WaveRecord]) -> Vec<WaveRecord> {
        let mut printed = self.printed.lock().unwrap_or_else(PoisonError::into_inner);
        waves
            .iter()
            .filter(|wave| printed.insert((*wave).clone()))
            .cloned()
            .collect()
    }
}

impl SyncObserver for TailPrinter {
    fn on_waves(&self, waves: &[WaveRecord]) {
        for wave in self.fresh(waves) {
            print_wave(&wave);
        }
    }
}

pub(crate) fn list(controller: &SyncController) -> anyhow::Result<()> {
    for wave in controller.waves() {
        print_wave(&wave);
    }
    println!("Visitors have waved {} times!", controller.total_waves());
    Ok(())
}

pub(crate) async fn wave(controller: &SyncController, message: &str) -> anyhow::Result<()> {
    if !controller.wallet_state().is_connected() {
        controller
            .connect()
            .await
            .context("wallet connection failed")?;
    }

    let receipt = controller.submit(message).await.context("wave failed")?;
    println!("Mined {} in block {}", receipt.tx_hash, receipt.block_number);
    list(controller)
}

pub(crate) async fn watch(controller: &SyncController) -> anyhow::Result<()> {
    let printer = Arc::new(TailPrinter::default());
    printer.on_waves(&controller.waves());
    controller.add_observer(printer);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    println!("Visitors have waved {} times!", controller.total_waves());
    Ok(())
}

fn print_wave(wave: &WaveRecord) {
    println!("[{}] {}: {}", wave.timestamp, wave.address, wave.message);
}
