use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vault_sync::config::VaultSyncConfig;
use vault_sync::gateway::rpc::JsonRpcChainClient;
use vault_sync::notify::TracingSink;
use vault_sync::tracker::{MutationIntent, TrackedTransaction};
use vault_sync::types::{display_ether, parse_address, short_address, PendingTransaction, TxStatus};
use vault_sync::VaultSession;

#[derive(Parser)]
#[command(author, version, about = "Sync client for the DeFi agent vault")]
struct Cli {
    #[arg(short, long, global = true, default_value = "config/vault-sync.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    GenerateConfig,
    /// Print vault metrics and the position of an account
    Status {
        #[arg(long)]
        account: Option<String>,
    },
    /// Report whether an address holds agent status
    Agent { address: String },
    /// Follow vault events until interrupted
    Watch,
    /// Deposit ETH, amount in ether
    DepositEth { amount: String },
    /// Deposit an ERC-20 token, amount in base units
    DepositErc20 { token: String, amount: String },
    /// Withdraw ETH, amount in ether (owner only)
    WithdrawEth { amount: String },
    /// Grant agent status (owner only)
    GrantAgent { address: String },
    /// Revoke agent status (owner only)
    RevokeAgent { address: String },
    /// Report harvested yield, amount in ether (agents only)
    Harvest { amount: String },
    /// Trigger a rebalance (agents only)
    Rebalance,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::GenerateConfig => generate_config(&cli.config)?,
        Commands::Status { account } => status(&cli.config, account).await?,
        Commands::Agent { address } => agent(&cli.config, &address).await?,
        Commands::Watch => watch(&cli.config).await?,
        Commands::DepositEth { amount } => {
            mutate(&cli.config, MutationIntent::DepositEth { amount }).await?
        }
        Commands::DepositErc20 { token, amount } => {
            mutate(&cli.config, MutationIntent::DepositErc20 { token, amount }).await?
        }
        Commands::WithdrawEth { amount } => {
            mutate(&cli.config, MutationIntent::WithdrawEth { amount }).await?
        }
        Commands::GrantAgent { address } => {
            mutate(&cli.config, MutationIntent::GrantAgent { agent: address }).await?
        }
        Commands::RevokeAgent { address } => {
            mutate(&cli.config, MutationIntent::RevokeAgent { agent: address }).await?
        }
        Commands::Harvest { amount } => {
            mutate(
                &cli.config,
                MutationIntent::AgentHarvest {
                    yield_amount: amount,
                },
            )
            .await?
        }
        Commands::Rebalance => mutate(&cli.config, MutationIntent::AgentRebalance).await?,
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<VaultSyncConfig> {
    let config = if path.exists() {
        VaultSyncConfig::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?
    } else {
        warn!(?path, "configuration file not found; using defaults");
        VaultSyncConfig::default()
    };
    config.validate()?;
    Ok(config.sanitized())
}

fn open_session(path: &Path) -> Result<(JsonRpcChainClient, VaultSession)> {
    let config = load_config(path)?;
    let client = JsonRpcChainClient::from_config(&config.chain, config.polling())?;
    let session = VaultSession::new(Arc::new(client.clone()), &config)?;
    session.notifier().attach(Arc::new(TracingSink));
    Ok((client, session))
}

fn generate_config(path: &Path) -> Result<()> {
    VaultSyncConfig::default().save(path)?;
    info!(?path, "wrote default configuration");
    Ok(())
}

async fn status(path: &Path, account: Option<String>) -> Result<()> {
    let (client, session) = open_session(path)?;
    if let Some(account) = account {
        session.set_account(Some(parse_address(&account)?));
    }
    match client.remote_chain_id().await {
        Ok(remote) if remote != session.context().chain_id => {
            warn!(remote, configured = session.context().chain_id, "endpoint serves a different chain");
        }
        Ok(_) => {}
        Err(error) => warn!(%error, "unable to query endpoint chain id"),
    }

    session.load().await;
    let snapshot = session.cache().snapshot();
    let vault = &snapshot.vault;
    let amount = |value: Option<alloy::primitives::U256>| {
        value.map(display_ether).unwrap_or_else(|| "unknown".to_string())
    };

    println!("vault            {}", session.gateway().contract());
    println!("total deposited  {} ETH", amount(vault.total_deposited));
    println!("yield harvested  {} ETH", amount(vault.total_yield_harvested));
    println!("fees collected   {} ETH", amount(vault.total_fees_collected));
    println!("estimated APY    {:.2}%", vault.estimated_apy_percent());
    println!(
        "owner            {}",
        vault
            .owner
            .map(|owner| owner.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    );
    for field in &vault.stale {
        println!("  stale: {field}");
    }

    let user = &snapshot.user;
    if let Some(account) = user.account {
        println!("account          {}", short_address(&account));
        println!("eth deposit      {} ETH", amount(user.eth_deposit));
        for (token, deposit) in &user.token_deposits {
            let value = deposit
                .map(|value| value.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            println!("  {}       {value}", short_address(token));
        }
        if vault.is_owner(Some(account)) {
            println!("role             owner");
        }
    }
    Ok(())
}

async fn agent(path: &Path, address: &str) -> Result<()> {
    let (_, session) = open_session(path)?;
    let address = parse_address(address)?;
    let is_agent = session.cache().get_agent_status(address).await?;
    println!("{} agent: {is_agent}", short_address(&address));
    Ok(())
}

async fn watch(path: &Path) -> Result<()> {
    let (_, session) = open_session(path)?;
    session.load().await;
    session.start_events().await?;
    info!(contract = %session.gateway().contract(), "watching vault events; press Ctrl-C to stop");

    signal::ctrl_c().await?;
    info!("shutdown signal received");
    session.shutdown().await?;
    Ok(())
}

async fn mutate(path: &Path, intent: MutationIntent) -> Result<()> {
    let (_, session) = open_session(path)?;
    let ctx = session.context();
    let tracked: TrackedTransaction = session.tracker().execute_mutation(&ctx, intent)?;
    let outcome = tracked.wait().await;
    report(&outcome);
    if outcome.status == TxStatus::Failed {
        anyhow::bail!("{} failed", outcome.kind);
    }
    Ok(())
}

fn report(tx: &PendingTransaction) {
    let hash = tx
        .hash
        .map(|hash| hash.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("{} {} [{:?}] tx {hash}", tx.kind, tx.args, tx.status);
    if let Some(failure) = &tx.failure {
        println!("  {}", failure.user_hint(tx.kind));
    }
}
