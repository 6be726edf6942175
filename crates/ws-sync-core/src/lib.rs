//! Client-side reconciliation of the wave log.
//!
//! `SyncController` merges the bulk history read, the live `NewWave`
//! subscription, and the user's own writes into one deduplicated `WaveStore`,
//! and runs each write through a `TransactionLifecycle`.

mod config;
mod controller;
mod lifecycle;
mod observer;

pub use config::{DEFAULT_GAS_LIMIT, SyncConfig};
pub use controller::SyncController;
pub use lifecycle::{InvalidTransition, TransactionLifecycle};
pub use observer::SyncObserver;
