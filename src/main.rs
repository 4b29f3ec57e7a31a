//! PROSPECTOR — Autonomous Deployment Scheduler and Profit Ledger
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the ledger database, restores the sizing record from disk,
//! records the starting baseline, and runs the cycle→size→deploy loop
//! with graceful shutdown.

use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use prospector::chain::sim::SimChain;
use prospector::chain::{GameClient, PriceFeed};
use prospector::config;
use prospector::engine::scheduler::Scheduler;
use prospector::ledger::LedgerStore;
use prospector::storage;

const BANNER: &str = r#"
 ____  ____   ___  ____  ____  _____ ____ _____ ___  ____
|  _ \|  _ \ / _ \/ ___||  _ \| ____/ ___|_   _/ _ \|  _ \
| |_) | |_) | | | \___ \| |_) |  _|| |   | | || | | | |_) |
|  __/|  _ <| |_| |___) |  __/| |__| |___  | || |_| |  _ <
|_|   |_| \_\\___/|____/|_|   |_____\____| |_| \___/|_| \_\

  Autonomous Deployment Scheduler and Profit Ledger
  v0.1.0 — Autonomous Agent
"#;

/// Starting balances for the simulated chain used in dry-run mode.
const DRY_RUN_WALLET_BASE: Decimal = dec!(10);
const DRY_RUN_JACKPOT: Decimal = dec!(250);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = config::AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        poll_interval_secs = cfg.agent.poll_interval_secs,
        dry_run = cfg.chain.dry_run,
        "PROSPECTOR starting up"
    );

    // -- Persistent state ---------------------------------------------------

    let ledger = LedgerStore::connect(&cfg.ledger.database_url).await?;

    let restored_sizing = storage::load_sizing(Some(&cfg.ledger.sizing_state_path))?;
    if let Some(record) = &restored_sizing {
        info!(
            risk = %record.risk_parameter,
            cycle = record.cycle_id,
            "Resuming with restored fund sizing"
        );
    }

    // -- Chain client -------------------------------------------------------

    // The live RPC-backed client plugs in behind the same traits once its
    // wire layer lands; until then every run uses the simulated chain.
    // Resolve its secrets anyway so a misconfigured environment surfaces
    // at startup, not on the first live submission.
    if !cfg.chain.dry_run {
        for env_name in [&cfg.chain.rpc_url_env, &cfg.chain.keypair_path_env]
            .into_iter()
            .flatten()
        {
            match config::AppConfig::resolve_env(env_name) {
                Ok(_) => info!(env = %env_name, "Live-chain secret resolved"),
                Err(e) => warn!(env = %env_name, error = %e, "Live-chain secret missing"),
            }
        }
        warn!("Live chain client not yet wired — forcing dry-run");
    }
    let chain = Arc::new(SimChain::new(DRY_RUN_WALLET_BASE, DRY_RUN_JACKPOT));

    // -- Baseline -----------------------------------------------------------

    // The baseline is the total holdings value observed at first startup,
    // recorded once so lifetime profit survives restarts. set_baseline is
    // idempotent; later runs keep the original figure.
    let baseline = observed_holdings(chain.as_ref(), chain.as_ref()).await?;
    if ledger.set_baseline(baseline).await? {
        info!(baseline = %baseline, "Starting baseline captured");
    }

    // -- Scheduler ----------------------------------------------------------

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received.");
            flag.store(true, Ordering::Relaxed);
        }
    });

    let mut scheduler = Scheduler::new(
        chain.clone(),
        chain.clone(),
        chain,
        ledger,
        &cfg,
        restored_sizing,
        shutdown,
    )?;

    info!(
        interval_secs = cfg.agent.poll_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );
    scheduler.run().await?;

    // -- Final summary ------------------------------------------------------

    match scheduler.report().await {
        Ok(report) => info!(%report, "PROSPECTOR shut down cleanly."),
        Err(e) => error!(error = %e, "Could not produce final profit summary"),
    }

    Ok(())
}

/// Total holdings value observable right now, in base units.
async fn observed_holdings(
    client: &dyn GameClient,
    price_feed: &dyn PriceFeed,
) -> Result<Decimal> {
    let wallet = client.wallet().await?;
    let fund = client.fund_state().await?;
    let claimable = client.claimable().await?;
    let price = price_feed.price().await?;

    Ok(wallet.base
        + (wallet.reward_tokens + wallet.staked_reward_tokens) * price.in_base
        + fund.map(|f| f.balance).unwrap_or(Decimal::ZERO)
        + claimable.base
        + (claimable.reward_tokens + claimable.yield_tokens) * price.in_base)
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("prospector=info"));

    let json_logging = std::env::var("PROSPECTOR_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
