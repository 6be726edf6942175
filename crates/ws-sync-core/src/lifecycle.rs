//! Transaction state machine.
//!
//! `Idle -> Signing -> Submitted -> Mined -> Settled`, with `Failed` reachable
//! from every non-terminal phase. `Settled` and `Failed` accept a new submission
//! the same way `Idle` does.

use thiserror::Error;
use ws_api_types::{MinedReceipt, TransactionState, TxHash, TxPhase, WaveError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot move transaction from {from} to {to}")]
pub struct InvalidTransition {
    pub from: TxPhase,
    pub to: TxPhase,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionLifecycle {
    state: TransactionState,
}

impl TransactionLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &TransactionState {
        &self.state
    }

    pub fn phase(&self) -> TxPhase {
        self.state.phase
    }

    /// True while a transaction is between `Signing` and `Mined`.
    pub fn in_flight(&self) -> bool {
        !self.state.phase.accepts_submit()
    }

    /// Starts a new submission. Refused, with the current state untouched,
    /// while another one is in flight.
    pub fn begin(&mut self) -> Result<(), WaveError> {
        if self.in_flight() {
            return Err(WaveError::AlreadyInFlight);
        }
        self.state = TransactionState {
            phase: TxPhase::Signing,
            ..TransactionState::default()
        };
        Ok(())
    }

    pub fn submitted(&mut self, handle: TxHash) -> Result<(), InvalidTransition> {
        self.expect(TxPhase::Signing, TxPhase::Submitted)?;
        self.state.phase = TxPhase::Submitted;
        self.state.handle = Some(handle);
        Ok(())
    }

    pub fn mined(&mut self, receipt: MinedReceipt) -> Result<(), InvalidTransition> {
        self.expect(TxPhase::Submitted, TxPhase::Mined)?;
        self.state.phase = TxPhase::Mined;
        self.state.receipt = Some(receipt);
        Ok(())
    }

    pub fn settle(&mut self) -> Result<(), InvalidTransition> {
        self.expect(TxPhase::Mined, TxPhase::Settled)?;
        self.state.phase = TxPhase::Settled;
        Ok(())
    }

    pub fn fail(&mut self, error: WaveError) -> Result<(), InvalidTransition> {
        if self.state.phase.is_terminal() || self.state.phase == TxPhase::Idle {
            return Err(InvalidTransition {
                from: self.state.phase,
                to: TxPhase::Failed,
            });
        }
        self.state.phase = TxPhase::Failed;
        self.state.error = Some(error);
        Ok(())
    }

    fn expect(&self, from: TxPhase, to: TxPhase) -> Result<(), InvalidTransition> {
        if self.state.phase == from {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self.state.phase,
                to,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(hash: &str) -> MinedReceipt {
        MinedReceipt {
            tx_hash: TxHash(hash.to_owned()),
            block_number: 7,
        }
    }

    #[test]
    fn happy_path_reaches_settled() -> anyhow::Result<()> {
        let mut lifecycle = TransactionLifecycle::new();
        lifecycle.begin()?;
        lifecycle.submitted(TxHash("0x1".to_owned()))?;
        lifecycle.mined(receipt("0x1"))?;
        lifecycle.settle()?;

        let state = lifecycle.state();
        assert_eq!(state.phase, TxPhase::Settled);
        assert_eq!(state.handle, Some(TxHash("0x1".to_owned())));
        assert_eq!(state.receipt, Some(receipt("0x1")));
        assert_eq!(state.error, None);
        Ok(())
    }

    #[test]
    fn begin_is_refused_while_in_flight() -> anyhow::Result<()> {
        let mut lifecycle = TransactionLifecycle::new();
        lifecycle.begin()?;
        lifecycle.submitted(TxHash("0x1".to_owned()))?;
        let before = lifecycle.state().clone();

        assert_eq!(lifecycle.begin(), Err(WaveError::AlreadyInFlight));
        assert_eq!(lifecycle.state(), &before);

        lifecycle.mined(receipt("0x1"))?;
        assert_eq!(lifecycle.begin(), Err(WaveError::AlreadyInFlight));
        assert_eq!(lifecycle.phase(), TxPhase::Mined);
        Ok(())
    }

    #[test]
    fn failed_accepts_a_fresh_submission() -> anyhow::Result<()> {
        let mut lifecycle = TransactionLifecycle::new();
        lifecycle.begin()?;
        lifecycle.fail(WaveError::UserRejected)?;
        assert_eq!(lifecycle.state().error, Some(WaveError::UserRejected));

        lifecycle.begin()?;
        assert_eq!(lifecycle.phase(), TxPhase::Signing);
        assert_eq!(lifecycle.state().error, None);
        Ok(())
    }

    #[test]
    fn out_of_order_transitions_are_rejected() {
        let mut lifecycle = TransactionLifecycle::new();
        assert_eq!(
            lifecycle.settle(),
            Err(InvalidTransition {
                from: TxPhase::Idle,
                to: TxPhase::Settled,
            })
        );
        assert!(lifecycle.fail(WaveError::UserRejected).is_err());
        assert_eq!(lifecycle.phase(), TxPhase::Idle);
    }
}
