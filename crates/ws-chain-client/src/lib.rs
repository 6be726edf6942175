use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;
use ws_api_types::{ContractAddress, MinedReceipt, TxHash, WalletAddress, WaveError, WaveRecord};

mod memory;

pub use memory::{MemoryChain, MemoryGateway, MiningMode};

/// Callback fed with every `NewWave` event a subscription observes.
pub type WaveSink = Arc<dyn Fn(WaveRecord) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub id: Uuid,
}

impl SubscriptionHandle {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }
}

impl Default for SubscriptionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.id)
    }
}

/// Delivery slot for one subscription.
///
/// `deliver` holds the slot lock for the duration of the callback and `silence`
/// takes the same lock, so once `silence` returns the sink is never invoked again,
/// even if an event was being delivered concurrently. A sink must not silence
/// its own listener.
pub struct Listener {
    slot: Mutex<Option<WaveSink>>,
}

impl Listener {
    pub fn new(sink: WaveSink) -> Self {
        Self {
            slot: Mutex::new(Some(sink)),
        }
    }

    pub fn deliver(&self, record: WaveRecord) -> bool {
        let guard = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(sink) => {
                sink(record);
                true
            }
            None => false,
        }
    }

    pub fn silence(&self) {
        let mut guard = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        guard.take();
    }

    pub fn is_active(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Capability over the guestbook contract, bound to one signer (or none, read-only).
///
/// Implementations hold no state the caller depends on; they are rebuilt whenever
/// the authorized account changes.
#[async_trait]
pub trait ContractGateway: Send + Sync {
    fn contract(&self) -> &ContractAddress;

    fn signer(&self) -> Option<&WalletAddress>;

    /// `getAllWaves()`, in the order the chain returns it.
    async fn fetch_history(&self) -> Result<Vec<WaveRecord>, WaveError>;

    /// `wave(message, { gasLimit })`. Returns as soon as the transaction is accepted
    /// for inclusion; does not wait for mining.
    async fn submit_wave(&self, message: &str, gas_limit: u64) -> Result<TxHash, WaveError>;

    async fn await_mined(&self, handle: &TxHash) -> Result<MinedReceipt, WaveError>;

    /// Registers `sink` for `NewWave` events.
    fn subscribe(&self, sink: WaveSink) -> Result<SubscriptionHandle, WaveError>;

    /// After this returns, the sink registered under `handle` is never called again.
    fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), WaveError>;
}

/// Builds gateways for the current signer.
pub trait GatewayFactory: Send + Sync {
    fn build(&self, signer: Option<&WalletAddress>) -> Result<Arc<dyn ContractGateway>, WaveError>;
}

pub(crate) fn hex_lower(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn silenced_listener_drops_late_events() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let listener = Listener::new(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(listener.deliver(WaveRecord::new("0xa", 1, "first")));
        listener.silence();
        assert!(!listener.deliver(WaveRecord::new("0xa", 2, "late")));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!listener.is_active());
    }

    #[test]
    fn subscription_handles_are_unique() {
        assert_ne!(SubscriptionHandle::new(), SubscriptionHandle::new());
    }
}
