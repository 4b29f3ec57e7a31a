//! Round scheduler — the decision loop.
//!
//! One decision per detected cycle boundary: gate on the jackpot floor,
//! re-size the fund if the jackpot moved past the rescale bounds, make sure
//! a fund exists, catch the reward checkpoint up, gate on expected value,
//! then deploy. Maintenance runs between decisions. Past startup nothing is
//! fatal: a failed round is logged, backed off, and retried on the next
//! poll.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::chain::{
    check_fee_divergence, submit_with_retry, GameClient, PriceFeed, SubmitOutcome, SwapService,
};
use crate::config::AppConfig;
use crate::engine::accountant::Accountant;
use crate::engine::maintenance::MaintenanceRunner;
use crate::fund::FundManager;
use crate::ledger::inflight::InFlightTracker;
use crate::ledger::LedgerStore;
use crate::strategy::{EvConfig, Evaluator, TierTable};
use crate::types::{EventKind, LedgerEvent, PnlReport, SizingRecord};

/// What a single tick decided. Exposed for the integration harness.
#[derive(Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// No new cycle since the last tick.
    Idle,
    Deployed,
    /// This cycle's deploy had already landed (restart, duplicate poll).
    AlreadyDeployed,
    /// Jackpot below the configured floor; sat the cycle out.
    RiskGated,
    /// Expected value below the bar; fund stays open, no deploy.
    Unprofitable,
    /// Fund could not cover another cycle; closed, reopens next cycle.
    FundDepleted,
}

pub struct Scheduler {
    client: Arc<dyn GameClient>,
    price_feed: Arc<dyn PriceFeed>,
    ledger: LedgerStore,
    inflight: InFlightTracker,
    fund: FundManager,
    maintenance: MaintenanceRunner,
    evaluator: Option<Evaluator>,
    min_risk_parameter: Decimal,
    checkpoint_batch: u64,
    max_attempts: u32,
    expected_fee: Decimal,
    poll_interval: Duration,
    error_backoff: Duration,
    shutdown: Arc<AtomicBool>,
    last_cycle: Option<u64>,
    rounds: u64,
    deploys: u64,
}

impl Scheduler {
    pub fn new(
        client: Arc<dyn GameClient>,
        swapper: Arc<dyn SwapService>,
        price_feed: Arc<dyn PriceFeed>,
        ledger: LedgerStore,
        cfg: &AppConfig,
        restored_sizing: Option<SizingRecord>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        let tiers = TierTable::new(&cfg.strategy.tiers).context("Invalid tier table")?;
        let inflight = InFlightTracker::new(ledger.pool().clone());

        let fund = FundManager::new(
            client.clone(),
            ledger.clone(),
            tiers,
            cfg.fund.clone(),
            cfg.rescale.clone(),
            cfg.chain.max_attempts,
            cfg.chain.expected_fee,
            Some(cfg.ledger.sizing_state_path.clone()),
            restored_sizing,
        );

        let maintenance = MaintenanceRunner::new(
            client.clone(),
            swapper,
            price_feed.clone(),
            ledger.clone(),
            inflight.clone(),
            cfg.maintenance.clone(),
            cfg.chain.max_attempts,
            cfg.chain.expected_fee,
            cfg.chain.swap_slippage_bps,
        );

        let evaluator = cfg
            .strategy
            .profitability
            .enabled
            .then(|| Evaluator::new(EvConfig::from(&cfg.strategy.profitability)));

        Ok(Self {
            client,
            price_feed,
            ledger,
            inflight,
            fund,
            maintenance,
            evaluator,
            min_risk_parameter: cfg.strategy.min_risk_parameter,
            checkpoint_batch: cfg.chain.checkpoint_batch,
            max_attempts: cfg.chain.max_attempts,
            expected_fee: cfg.chain.expected_fee,
            poll_interval: Duration::from_secs(cfg.agent.poll_interval_secs),
            error_backoff: Duration::from_secs(cfg.agent.error_backoff_secs),
            shutdown,
            last_cycle: None,
            rounds: 0,
            deploys: 0,
        })
    }

    /// Main loop: poll, decide, maintain, sleep. Runs until shutdown.
    pub async fn run(&mut self) -> Result<()> {
        info!("Scheduler started");
        while !self.shutdown.load(Ordering::Relaxed) {
            match self.tick().await {
                Ok(outcome) => {
                    if outcome != TickOutcome::Idle {
                        info!(?outcome, "Round complete");
                    }
                    self.sleep_interruptible(self.poll_interval).await;
                }
                Err(e) => {
                    error!(error = %e, "Round failed — backing off");
                    self.sleep_interruptible(self.error_backoff).await;
                }
            }
        }
        info!(
            rounds = self.rounds,
            deploys = self.deploys,
            "Scheduler stopped"
        );
        Ok(())
    }

    /// One poll: run a round if the cycle advanced, then due maintenance.
    /// Maintenance runs even when the round fails — a broken round-state
    /// read must not starve claims, sweeps and snapshots.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        let outcome = match self.client.current_cycle().await {
            Ok(cycle) if self.last_cycle == Some(cycle) => Ok(TickOutcome::Idle),
            Ok(cycle) => self.run_round(cycle).await.map(|outcome| {
                // Only a completed round consumes the cycle; a failed one
                // is retried on the next poll.
                self.last_cycle = Some(cycle);
                self.rounds += 1;
                outcome
            }),
            Err(e) => Err(e.into()),
        };

        match self.client.fund_state().await {
            Ok(fund) => self.maintenance.run_due(fund).await,
            Err(e) => warn!(error = %e, "Fund state unavailable — skipping maintenance"),
        }

        outcome
    }

    async fn run_round(&mut self, cycle: u64) -> Result<TickOutcome> {
        let risk = self.client.risk_parameter().await?;

        // Jackpot floor. Nothing else runs for a gated cycle, including
        // checkpoint catch-up: paying to accrue rewards we are not earning
        // can wait for a cycle we actually play.
        if risk < self.min_risk_parameter {
            debug!(
                cycle,
                risk = %risk,
                floor = %self.min_risk_parameter,
                "Jackpot below floor — sitting this cycle out"
            );
            return Ok(TickOutcome::RiskGated);
        }

        // Rescale: the jackpot moved far enough from what the current
        // allocation was sized for. Close now; the reopen below re-sizes.
        if self.client.fund_state().await?.is_some() && self.fund.should_rescale(risk) {
            info!(cycle, risk = %risk, "Jackpot moved past rescale bounds — re-sizing fund");
            self.fund.close().await?;
        }

        let fund = match self.client.fund_state().await? {
            Some(fund) => fund,
            None => self
                .fund
                .open(risk, cycle)
                .await
                .context("Could not open fund for this cycle")?,
        };

        self.catch_up_checkpoint(cycle).await?;

        if let Some(evaluator) = &self.evaluator {
            let competition = self.client.cycle_commitment_total(cycle).await?;
            let price = self.price_feed.price().await?;
            let report = evaluator.evaluate(fund.per_cycle_cost, risk, competition, price.in_base);
            if !report.profitable {
                info!(
                    cycle,
                    ev = %report.expected_value,
                    share = %report.share,
                    "Expected value below bar — skipping deployment"
                );
                return Ok(TickOutcome::Unprofitable);
            }
        }

        // Can the fund cover another cycle? Close if not; re-sized fresh
        // capital comes in on the next cycle boundary.
        if fund.is_depleted() {
            info!(
                cycle,
                balance = %fund.balance,
                per_cycle = %fund.per_cycle_cost,
                "Fund cannot cover another cycle — closing"
            );
            self.fund.close().await?;
            return Ok(TickOutcome::FundDepleted);
        }

        let outcome = submit_with_retry("deploy", self.max_attempts, || self.client.deploy(cycle))
            .await
            .context("Deploy submission failed")?;

        match outcome {
            SubmitOutcome::Applied(sub) => {
                check_fee_divergence("deploy", sub.fee, self.expected_fee);
                let event = LedgerEvent::success(EventKind::Deploy)
                    .base(fund.per_cycle_cost)
                    .cycle(cycle)
                    .signed(sub.signature.clone())
                    .fee(sub.fee);
                if let Err(e) = self.ledger.append(&event).await {
                    error!(error = %e, cycle, "LEDGER WRITE FAILED for deploy");
                }
                if let Err(e) = self.inflight.record(cycle, fund.per_cycle_cost).await {
                    error!(error = %e, cycle, "Failed to record in-flight deployment");
                }
                self.deploys += 1;
                info!(cycle, amount = %fund.per_cycle_cost, "Capital deployed");
                Ok(TickOutcome::Deployed)
            }
            SubmitOutcome::AlreadyApplied => {
                debug!(cycle, "Cycle already deployed — nothing to record");
                Ok(TickOutcome::AlreadyDeployed)
            }
        }
    }

    /// Advance the reward checkpoint until it covers every completed cycle.
    /// Each submission is bounded by the configured batch size.
    async fn catch_up_checkpoint(&mut self, cycle: u64) -> Result<()> {
        let target = cycle.saturating_sub(1);
        loop {
            let checkpoint = self.client.checkpoint_cycle().await?;
            if checkpoint >= target {
                return Ok(());
            }
            debug!(checkpoint, target, "Advancing reward checkpoint");
            let outcome = submit_with_retry("advance_checkpoint", self.max_attempts, || {
                self.client.advance_checkpoint(self.checkpoint_batch)
            })
            .await
            .context("Checkpoint advance failed")?;
            match outcome {
                SubmitOutcome::Applied(sub) => {
                    check_fee_divergence("advance_checkpoint", sub.fee, self.expected_fee)
                }
                // Someone else caught it up for us.
                SubmitOutcome::AlreadyApplied => return Ok(()),
            }
        }
    }

    /// Point-in-time profit summary from the ledger and live balances.
    pub async fn report(&self) -> Result<PnlReport> {
        let totals = self.ledger.totals(None).await?;
        let in_flight = self.inflight.unresolved_total().await?;
        let fund = self.client.fund_state().await?;
        let claimable = self.client.claimable().await?;
        let wallet = self.client.wallet().await?;
        let price = self.price_feed.price().await?;
        let baseline = self.ledger.baseline().await?;
        Ok(Accountant::summarize(
            &totals,
            in_flight,
            fund.map(|f| f.balance).unwrap_or(Decimal::ZERO),
            &claimable,
            &wallet,
            price.in_base,
            baseline,
        ))
    }

    async fn sleep_interruptible(&self, total: Duration) {
        let mut remaining = total;
        while remaining > Duration::ZERO && !self.shutdown.load(Ordering::Relaxed) {
            let chunk = remaining.min(Duration::from_secs(1));
            tokio::time::sleep(chunk).await;
            remaining = remaining.saturating_sub(chunk);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
