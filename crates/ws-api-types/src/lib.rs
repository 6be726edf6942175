use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Chain account identifier.
///
/// Stored lowercased so that a checksummed address coming back from a contract
/// read compares equal to the lowercase form wallets hand out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for WalletAddress {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for WalletAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub struct ContractAddress(String);

impl ContractAddress {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ContractAddress {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<ContractAddress> for String {
    fn from(value: ContractAddress) -> Self {
        value.0
    }
}

impl fmt::Display for ContractAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference to a submitted transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One guestbook entry. Two records with the same triple are the same wave.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WaveRecord {
    pub address: WalletAddress,
    /// Block timestamp, seconds since the unix epoch.
    pub timestamp: u64,
    pub message: String,
}

impl WaveRecord {
    pub fn new(address: impl Into<WalletAddress>, timestamp: u64, message: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timestamp,
            message: message.into(),
        }
    }
}

// ── Contract ABI rows ──

/// Element of `getAllWaves()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveRow {
    pub waver: String,
    pub timestamp: u64,
    pub message: String,
}

impl From<WaveRow> for WaveRecord {
    fn from(row: WaveRow) -> Self {
        WaveRecord::new(row.waver, row.timestamp, row.message)
    }
}

/// Payload of the `NewWave(from, timestamp, message)` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWaveEvent {
    pub from: String,
    pub timestamp: u64,
    pub message: String,
    #[serde(default)]
    pub block_number: Option<u64>,
}

impl From<NewWaveEvent> for WaveRecord {
    fn from(event: NewWaveEvent) -> Self {
        WaveRecord::new(event.from, event.timestamp, event.message)
    }
}

// ── Session and transaction state ──

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WalletState {
    #[default]
    Disconnected,
    Connected(WalletAddress),
}

impl WalletState {
    pub fn address(&self) -> Option<&WalletAddress> {
        match self {
            WalletState::Disconnected => None,
            WalletState::Connected(address) => Some(address),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, WalletState::Connected(_))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxPhase {
    #[default]
    Idle,
    /// The wallet was asked to sign; no handle yet.
    Signing,
    Submitted,
    Mined,
    Settled,
    Failed,
}

impl TxPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, TxPhase::Settled | TxPhase::Failed)
    }

    /// Whether a new submission may start from this phase.
    pub fn accepts_submit(self) -> bool {
        matches!(self, TxPhase::Idle | TxPhase::Settled | TxPhase::Failed)
    }
}

impl fmt::Display for TxPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TxPhase::Idle => "idle",
            TxPhase::Signing => "signing",
            TxPhase::Submitted => "submitted",
            TxPhase::Mined => "mined",
            TxPhase::Settled => "settled",
            TxPhase::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinedReceipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionState {
    pub phase: TxPhase,
    pub handle: Option<TxHash>,
    pub receipt: Option<MinedReceipt>,
    pub error: Option<WaveError>,
}

// ── Errors ──

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaveError {
    #[error("no wallet provider available")]
    ProviderMissing,

    #[error("request rejected by the user")]
    UserRejected,

    #[error("no wallet account is connected")]
    NotConnected,

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("contract call failed: {0}")]
    ContractCallError(String),

    #[error("transaction submission failed: {0}")]
    SubmissionError(String),

    #[error("transaction reverted: {0}")]
    TransactionReverted(String),

    #[error("another transaction is already in flight")]
    AlreadyInFlight,

    /// The sync controller is not open.
    #[error("sync controller is closed")]
    Closed,
}

impl WaveError {
    pub fn network(err: impl fmt::Display) -> Self {
        WaveError::NetworkError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksummed_and_lowercase_addresses_compare_equal() {
        let checksummed = WalletAddress::new("0x30710ef7e2369F8332Fb7600b4F2b3C16daBC72F");
        let lower = WalletAddress::new("0x30710ef7e2369f8332fb7600b4f2b3c16dabc72f");
        assert_eq!(checksummed, lower);

        let from_history = WaveRecord::from(WaveRow {
            waver: "0xAbC".to_owned(),
            timestamp: 10,
            message: "hi".to_owned(),
        });
        let from_event = WaveRecord::from(NewWaveEvent {
            from: "0xabc".to_owned(),
            timestamp: 10,
            message: "hi".to_owned(),
            block_number: Some(3),
        });
        assert_eq!(from_history, from_event);
    }

    #[test]
    fn deserialized_address_is_normalized() -> Result<(), serde_json::Error> {
        let address: WalletAddress = serde_json::from_str("\"0xDEADbeef\"")?;
        assert_eq!(address.as_str(), "0xdeadbeef");
        Ok(())
    }

    #[test]
    fn only_idle_and_terminal_phases_accept_submit() {
        assert!(TxPhase::Idle.accepts_submit());
        assert!(TxPhase::Settled.accepts_submit());
        assert!(TxPhase::Failed.accepts_submit());
        assert!(!TxPhase::Signing.accepts_submit());
        assert!(!TxPhase::Submitted.accepts_submit());
        assert!(!TxPhase::Mined.accepts_submit());
    }
}
