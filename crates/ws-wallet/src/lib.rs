use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};
use ws_api_types::{WalletAddress, WalletState, WaveError};

/// Account methods of the injected wallet provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountsMethod {
    /// Already-authorized accounts, never prompts.
    Accounts,
    /// Prompts the user for access.
    RequestAccounts,
}

impl AccountsMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountsMethod::Accounts => "eth_accounts",
            AccountsMethod::RequestAccounts => "eth_requestAccounts",
        }
    }
}

impl fmt::Display for AccountsMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wallet provider capability, handed to the session instead of being looked up globally.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    async fn request(&self, method: AccountsMethod) -> Result<Vec<WalletAddress>, WaveError>;
}

/// Outcome of a silent account probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionProbe {
    pub state: WalletState,
    /// Set when the probe could not ask the provider at all or the provider failed.
    pub diagnostic: Option<WaveError>,
}

/// Tracks which account, if any, is authorized.
pub struct WalletSession {
    provider: Option<Arc<dyn WalletProvider>>,
    state: RwLock<WalletState>,
}

impl WalletSession {
    pub fn new(provider: Option<Arc<dyn WalletProvider>>) -> Self {
        Self {
            provider,
            state: RwLock::new(WalletState::Disconnected),
        }
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn state(&self) -> WalletState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Asks for already-authorized accounts without prompting. Never fails;
    /// problems come back as `Disconnected` with a diagnostic.
    pub async fn check_existing(&self) -> SessionProbe {
        let Some(provider) = &self.provider else {
            warn!("no wallet provider found; install a wallet and try again");
            return SessionProbe {
                state: WalletState::Disconnected,
                diagnostic: Some(WaveError::ProviderMissing),
            };
        };

        match provider.request(AccountsMethod::Accounts).await {
            Ok(accounts) => match accounts.into_iter().next() {
                Some(account) => {
                    info!(%account, "found authorized account");
                    let state = WalletState::Connected(account);
                    self.set_state(state.clone());
                    SessionProbe {
                        state,
                        diagnostic: None,
                    }
                }
                None => {
                    info!("no authorized account found");
                    SessionProbe {
                        state: WalletState::Disconnected,
                        diagnostic: None,
                    }
                }
            },
            Err(err) => {
                warn!(error = %err, "eth_accounts failed");
                SessionProbe {
                    state: WalletState::Disconnected,
                    diagnostic: Some(err),
                }
            }
        }
    }

    /// Prompts the provider for account access.
    pub async fn request_connect(&self) -> Result<WalletAddress, WaveError> {
        let provider = self.provider.as_ref().ok_or(WaveError::ProviderMissing)?;

        let accounts = provider.request(AccountsMethod::RequestAccounts).await?;
        let account = accounts.into_iter().next().ok_or(WaveError::UserRejected)?;

        info!(%account, "wallet connected");
        self.set_state(WalletState::Connected(account.clone()));
        Ok(account)
    }

    pub fn disconnect(&self) {
        self.set_state(WalletState::Disconnected);
    }

    fn set_state(&self, state: WalletState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// Provider with a fixed account list, for local runs and tests.
pub struct StaticWalletProvider {
    accounts: Vec<WalletAddress>,
    authorized: AtomicBool,
    approve: AtomicBool,
}

impl StaticWalletProvider {
    /// Accounts must be requested before `eth_accounts` reports them.
    pub fn new(accounts: Vec<WalletAddress>) -> Self {
        Self {
            accounts,
            authorized: AtomicBool::new(false),
            approve: AtomicBool::new(true),
        }
    }

    pub fn preauthorized(accounts: Vec<WalletAddress>) -> Self {
        let provider = Self::new(accounts);
        provider.authorized.store(true, Ordering::SeqCst);
        provider
    }

    /// Whether the simulated user approves `eth_requestAccounts` prompts.
    pub fn set_approve(&self, approve: bool) {
        self.approve.store(approve, Ordering::SeqCst);
    }

    pub fn revoke(&self) {
        self.authorized.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl WalletProvider for StaticWalletProvider {
    async fn request(&self, method: AccountsMethod) -> Result<Vec<WalletAddress>, WaveError> {
        match method {
            AccountsMethod::Accounts => {
                if self.authorized.load(Ordering::SeqCst) {
                    Ok(self.accounts.clone())
                } else {
                    Ok(Vec::new())
                }
            }
            AccountsMethod::RequestAccounts => {
                if !self.approve.load(Ordering::SeqCst) {
                    return Err(WaveError::UserRejected);
                }
                self.authorized.store(true, Ordering::SeqCst);
                Ok(self.accounts.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> WalletAddress {
        WalletAddress::new("0xA11CE")
    }

    #[tokio::test]
    async fn missing_provider_probes_as_disconnected() {
        let session = WalletSession::new(None);

        let probe = session.check_existing().await;

        assert_eq!(probe.state, WalletState::Disconnected);
        assert_eq!(probe.diagnostic, Some(WaveError::ProviderMissing));
        assert_eq!(session.request_connect().await, Err(WaveError::ProviderMissing));
    }

    #[tokio::test]
    async fn preauthorized_account_connects_silently() {
        let provider = Arc::new(StaticWalletProvider::preauthorized(vec![alice()]));
        let session = WalletSession::new(Some(provider));

        let probe = session.check_existing().await;

        assert_eq!(probe.state, WalletState::Connected(alice()));
        assert_eq!(probe.diagnostic, None);
        assert_eq!(session.state(), WalletState::Connected(alice()));
    }

    #[tokio::test]
    async fn unauthorized_account_needs_a_prompt() -> anyhow::Result<()> {
        let provider = Arc::new(StaticWalletProvider::new(vec![alice()]));
        let session = WalletSession::new(Some(provider));

        let probe = session.check_existing().await;
        assert_eq!(probe.state, WalletState::Disconnected);
        assert_eq!(probe.diagnostic, None);

        let account = session.request_connect().await?;
        assert_eq!(account, alice());
        assert_eq!(session.state(), WalletState::Connected(alice()));
        Ok(())
    }

    #[tokio::test]
    async fn declined_prompt_leaves_session_disconnected() {
        let provider = Arc::new(StaticWalletProvider::new(vec![alice()]));
        provider.set_approve(false);
        let session = WalletSession::new(Some(provider));

        assert_eq!(session.request_connect().await, Err(WaveError::UserRejected));
        assert_eq!(session.state(), WalletState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_resets_state() -> anyhow::Result<()> {
        let provider = Arc::new(StaticWalletProvider::new(vec![alice()]));
        let session = WalletSession::new(Some(provider));
        session.request_connect().await?;

        session.disconnect();

        assert!(!session.state().is_connected());
        Ok(())
    }

    #[test]
    fn method_names_match_provider_rpc() {
        assert_eq!(AccountsMethod::Accounts.as_str(), "eth_accounts");
        assert_eq!(AccountsMethod::RequestAccounts.to_string(), "eth_requestAccounts");
    }
}
