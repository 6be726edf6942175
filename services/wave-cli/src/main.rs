use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use ws_api_types::{ContractAddress, WalletAddress};
use ws_chain_client::{GatewayFactory, MemoryChain, MiningMode};
use ws_chain_relay::RelayFactory;
use ws_sync_core::{DEFAULT_GAS_LIMIT, SyncConfig, SyncController};
use ws_wallet::{StaticWalletProvider, WalletProvider};

mod commands;

const DEFAULT_CONTRACT: &str = "0x30710ef7e2369F8332Fb7600b4F2b3C16daBC72F";

#[derive(Parser, Debug)]
#[command(author, version, about = "Keeps a local, deduplicated view of the on-chain guestbook", long_about = None)]
struct Cli {
    /// Contract relay base URL.
    #[arg(long, env = "WAVESYNC_RELAY_URL")]
    relay_url: Option<String>,

    #[arg(long, env = "WAVESYNC_CONTRACT", default_value = DEFAULT_CONTRACT)]
    contract: String,

    /// Account the wallet authorizes. Without one there is no wallet provider.
    #[arg(long, env = "WAVESYNC_ACCOUNT")]
    account: Option<String>,

    #[arg(long, env = "WAVESYNC_GAS_LIMIT", default_value_t = DEFAULT_GAS_LIMIT)]
    gas_limit: u64,

    #[arg(long, env = "WAVESYNC_MINED_TIMEOUT_SECS")]
    mined_timeout_secs: Option<u64>,

    /// Event and receipt polling interval against the relay.
    #[arg(long, env = "WAVESYNC_POLL_MS", default_value_t = 2_000)]
    poll_ms: u64,

    /// Run against an in-process chain instead of the relay.
    #[arg(long)]
    local: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every wave.
    List,
    /// Send a wave and wait for it to settle.
    Wave { message: String },
    /// Print waves as they arrive until Ctrl-C.
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let controller = build_controller(&cli);
    controller.add_observer(Arc::new(commands::LogObserver));

    controller.open().await;
    let result = match cli.command {
        Command::List => commands::list(&controller),
        Command::Wave { message } => commands::wave(&controller, &message).await,
        Command::Watch => commands::watch(&controller).await,
    };
    controller.close();

    result
}

fn build_controller(cli: &Cli) -> SyncController {
    let contract = ContractAddress::new(&cli.contract);

    let factory: Arc<dyn GatewayFactory> = if cli.local {
        info!(%contract, "using in-process chain");
        Arc::new(MemoryChain::new(contract, MiningMode::Instant))
    } else {
        let relay = RelayFactory::new(cli.relay_url.clone(), contract)
            .with_poll_interval(Duration::from_millis(cli.poll_ms));
        info!(endpoint = relay.endpoint(), "using contract relay");
        Arc::new(relay)
    };

    let provider = cli.account.as_deref().map(|account| {
        Arc::new(StaticWalletProvider::new(vec![WalletAddress::new(account)])) as Arc<dyn WalletProvider>
    });

    let mut config = SyncConfig::default().with_gas_limit(cli.gas_limit);
    if let Some(secs) = cli.mined_timeout_secs {
        config = config.with_mined_timeout(Duration::from_secs(secs));
    }

    SyncController::new(provider, factory, config)
}
