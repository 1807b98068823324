//! Command-line harness for driving a wallet against live servers
//!
//! Useful for:
//! - Creating and restoring wallets
//! - Running sync rounds and following notifications
//! - Checking balances and handing out addresses
//! - Sending payments and paying payment requests

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use spv_core::{Address, PaymentOutput};
use spv_wallet_service::{
    AddressRole, DerivationScheme, FeePolicy, NetworkType, UnsignedTransaction, WalletConfig,
    WalletSession,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PASSPHRASE_ENV: &str = "SPV_WALLET_PASSPHRASE";

#[derive(Parser)]
#[command(name = "spv-harness")]
#[command(about = "SPV wallet harness", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Network override
    #[arg(short, long, global = true)]
    network: Option<NetworkType>,

    /// Server as host:port; repeat for several
    #[arg(short, long, global = true)]
    server: Vec<String>,

    /// Snapshot file override
    #[arg(short, long, global = true)]
    wallet: Option<PathBuf>,

    /// Snapshot passphrase (or set SPV_WALLET_PASSPHRASE)
    #[arg(short, long, global = true)]
    passphrase: Option<String>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file with defaults for the network
    InitConfig,

    /// Create a wallet from a fresh mnemonic
    Create {
        /// Mnemonic length
        #[arg(long, default_value = "24")]
        words: u32,

        /// Derivation scheme (bip44, bip44:<account> or legacy)
        #[arg(long, default_value = "bip44")]
        scheme: DerivationScheme,
    },

    /// Restore a wallet from an existing mnemonic
    Restore {
        /// Mnemonic phrase
        #[arg(long)]
        mnemonic: String,

        /// BIP-39 passphrase
        #[arg(long, default_value = "")]
        bip39_passphrase: String,

        /// Derivation scheme
        #[arg(long, default_value = "bip44")]
        scheme: DerivationScheme,
    },

    /// Track an account xpub without spending keys
    WatchOnly {
        /// Account extended public key
        #[arg(long)]
        xpub: String,

        /// Derivation scheme
        #[arg(long, default_value = "bip44")]
        scheme: DerivationScheme,
    },

    /// Run one sync round
    Sync,

    /// Sync, then follow server notifications until Ctrl-C
    Watch,

    /// Print the balance
    Balance,

    /// Hand out the next unused address
    Address {
        /// Change chain instead of receiving
        #[arg(long)]
        change: bool,
    },

    /// Pay an address
    Send {
        /// Recipient address
        #[arg(long)]
        to: String,

        /// Amount in base units
        #[arg(long)]
        amount: u64,

        /// economy, standard, priority or a rate in base units per byte
        #[arg(long)]
        fee: Option<String>,

        /// Build and print without broadcasting
        #[arg(long)]
        dry_run: bool,
    },

    /// Verify and pay a payment request file
    Pay {
        /// Encoded request
        #[arg(long)]
        request: PathBuf,

        /// Fee policy
        #[arg(long)]
        fee: Option<String>,

        /// Verify and build without broadcasting
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let config = load_config(&cli)?;
    match &cli.command {
        Commands::InitConfig => {
            let path = cli
                .config
                .clone()
                .or_else(WalletConfig::default_config_path)
                .context("no config directory; pass --config")?;
            config.save(&path)?;
            println!("Wrote {}", path.display());
        }
        Commands::Create { words, scheme } => {
            let phrase = spv_core::keys::generate_mnemonic(Some(*words))?;
            let session = WalletSession::from_mnemonic(&phrase, "", *scheme, config)?;
            let path = session.save(&passphrase(&cli)?)?;
            println!("Mnemonic (write it down): {phrase}");
            println!("Wallet saved to {}", path.display());
        }
        Commands::Restore {
            mnemonic,
            bip39_passphrase,
            scheme,
        } => {
            let mut session =
                WalletSession::from_mnemonic(mnemonic, bip39_passphrase, *scheme, config)?;
            run_sync(&mut session).await?;
            let path = session.save(&passphrase(&cli)?)?;
            print_balance(&session);
            println!("Wallet saved to {}", path.display());
        }
        Commands::WatchOnly { xpub, scheme } => {
            let mut session = WalletSession::watch_only(xpub, *scheme, config)?;
            run_sync(&mut session).await?;
            let path = session.save("")?;
            print_balance(&session);
            println!("Watch-only wallet saved to {}", path.display());
        }
        Commands::Sync => {
            let pass = passphrase(&cli)?;
            let mut session = WalletSession::open(&pass, config)?;
            run_sync(&mut session).await?;
            session.save(&pass)?;
            print_balance(&session);
        }
        Commands::Watch => {
            let pass = passphrase(&cli)?;
            let mut session = WalletSession::open(&pass, config)?;
            run_sync(&mut session).await?;
            session.save(&pass)?;

            let cancel = session.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            });
            info!("Watching for activity; Ctrl-C to stop");
            if let Err(e) = session.watch().await {
                if !session.cancel_token().is_cancelled() {
                    return Err(e.into());
                }
            }
            session.save(&pass)?;
            print_balance(&session);
        }
        Commands::Balance => {
            let session = WalletSession::open(&passphrase(&cli)?, config)?;
            print_balance(&session);
        }
        Commands::Address { change } => {
            let pass = passphrase(&cli)?;
            let mut session = WalletSession::open(&pass, config)?;
            let role = if *change {
                AddressRole::Change
            } else {
                AddressRole::Receiving
            };
            let address = session.get_next_address(role)?;
            session.save(&pass)?;
            println!("{address}");
        }
        Commands::Send {
            to,
            amount,
            fee,
            dry_run,
        } => {
            let pass = passphrase(&cli)?;
            let mut session = WalletSession::open(&pass, config)?;
            run_sync(&mut session).await?;
            let recipient = Address::decode(to, session.network())?;
            let unsigned = session.build_transaction(
                vec![PaymentOutput::to_address(&recipient, *amount)],
                parse_fee(fee.as_deref())?,
            )?;
            finish_payment(&mut session, &pass, &unsigned, *dry_run).await?;
        }
        Commands::Pay {
            request,
            fee,
            dry_run,
        } => {
            let pass = passphrase(&cli)?;
            let mut session = WalletSession::open(&pass, config)?;
            let bytes = std::fs::read(request)
                .with_context(|| format!("reading {}", request.display()))?;
            let verified = session.verify_payment_request(&bytes)?;
            println!("Recipient: {:?}", verified.recipient());
            println!("Memo: {}", verified.memo());
            println!("Total: {}", verified.total());

            run_sync(&mut session).await?;
            let unsigned = session.pay_request(&verified, parse_fee(fee.as_deref())?)?;
            finish_payment(&mut session, &pass, &unsigned, *dry_run).await?;
        }
    }

    Ok(())
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<WalletConfig> {
    let path = cli.config.clone().or_else(WalletConfig::default_config_path);
    let mut config = match path {
        Some(path) if path.exists() => WalletConfig::load(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        _ => WalletConfig::default(),
    };
    // Configured servers belong to the configured network
    if let Some(network) = cli.network.filter(|n| *n != config.network) {
        config.network = network;
        config.servers.clear();
    }
    if !cli.server.is_empty() {
        config.servers = cli.server.clone();
    }
    if let Some(wallet) = &cli.wallet {
        config.snapshot_path = Some(wallet.clone());
    }
    config.validate()?;
    Ok(config)
}

fn passphrase(cli: &Cli) -> anyhow::Result<String> {
    if let Some(pass) = &cli.passphrase {
        return Ok(pass.clone());
    }
    match std::env::var(PASSPHRASE_ENV) {
        Ok(pass) if !pass.is_empty() => Ok(pass),
        _ => bail!("no passphrase; pass --passphrase or set {PASSPHRASE_ENV}"),
    }
}

fn parse_fee(fee: Option<&str>) -> anyhow::Result<Option<FeePolicy>> {
    let Some(fee) = fee else {
        return Ok(None);
    };
    let policy = match fee {
        "economy" => FeePolicy::Economy,
        "standard" => FeePolicy::Standard,
        "priority" => FeePolicy::Priority,
        rate => FeePolicy::Custom(
            rate.parse()
                .with_context(|| format!("unknown fee policy {rate}"))?,
        ),
    };
    Ok(Some(policy))
}

async fn run_sync(session: &mut WalletSession) -> anyhow::Result<()> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));

    let progress = session.progress().clone();
    let pb_clone = pb.clone();
    let progress_task = tokio::spawn(async move {
        loop {
            let status = progress.status();
            pb_clone.set_message(format!(
                "{} | headers {} | verified {} | {} addresses pending",
                progress.stage().name(),
                status.headers_height,
                status.verified_height,
                status.pending_addresses
            ));
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    });

    let result = session.sync().await;
    progress_task.abort();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            pb.abandon_with_message("Sync failed");
            warn!("Sync failed: {}", e);
            return Err(e.into());
        }
    };
    pb.finish_with_message(format!(
        "Synced to {} ({} transactions verified)",
        report.headers_height, report.transactions_verified
    ));
    for fork in &report.reorgs {
        warn!(fork_height = fork, "Chain reorganized");
    }
    for warning in &report.warnings {
        warn!(?warning, "Sync warning");
    }
    if report.status.stalled {
        warn!("No server reachable; results may be stale");
    }
    Ok(())
}

async fn finish_payment(
    session: &mut WalletSession,
    pass: &str,
    unsigned: &UnsignedTransaction,
    dry_run: bool,
) -> anyhow::Result<()> {
    println!(
        "Spending {} in {} inputs, fee {} ({} per byte)",
        unsigned.input_value(),
        unsigned.inputs().len(),
        unsigned.fee(),
        unsigned.fee_rate()
    );
    if let Some(change) = unsigned.change() {
        println!("Change {} to {}", change.value, change.address.encode(session.network()));
    }
    if dry_run {
        return Ok(());
    }
    let txid = session.sign_and_broadcast(unsigned).await?;
    session.save(pass)?;
    println!("Broadcast {txid}");
    Ok(())
}

fn print_balance(session: &WalletSession) {
    let balance = session.get_balance();
    let status = session.sync_status();
    println!("Confirmed:               {}", balance.confirmed);
    println!("Unconfirmed:             {}", balance.unconfirmed);
    println!("Pending reverification:  {}", balance.pending_reverification);
    println!(
        "Headers {} | verified {}{}",
        status.headers_height,
        status.verified_height,
        if status.stalled { " | stalled" } else { "" }
    );
}
