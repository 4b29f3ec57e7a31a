//! In-memory simulated chain.
//!
//! Deterministic implementation of `GameClient`, `SwapService` and
//! `PriceFeed` used in dry-run mode and by the integration harness.
//! Rewards earned by a deploy become claimable only once the cycle has
//! ended *and* the checkpoint has been advanced past it, which reproduces
//! the real 1–2 cycle reward-visibility lag the in-flight tracker exists
//! for. A live RPC-backed client plugs in behind the same traits.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use super::{ChainError, ChainResult, GameClient, PriceFeed, SwapOutcome, SwapService};
use crate::types::{Claimable, FundSnapshot, PriceQuote, Submission, WalletHoldings};

#[derive(Debug, Clone)]
struct SimFund {
    balance: Decimal,
    per_cycle: Decimal,
}

#[derive(Debug)]
struct SimState {
    cycle: u64,
    risk_parameter: Decimal,
    checkpoint: u64,
    fund: Option<SimFund>,
    claimable: Claimable,
    wallet: WalletHoldings,
    /// Aggregate competitor commitments per cycle.
    commitments: HashMap<u64, Decimal>,
    /// Our own deploys awaiting checkpoint accrual.
    pending_deploys: HashMap<u64, Decimal>,
    price: PriceQuote,
}

/// Simulated chain with configurable economics.
pub struct SimChain {
    state: Mutex<SimState>,
    /// Flat fee charged per submission.
    fee: Decimal,
    /// Reward tokens credited per base unit deployed, once accrued.
    reward_per_base: Decimal,
    /// Fraction of deployed principal refunded as claimable base.
    principal_return_pct: Decimal,
}

impl SimChain {
    pub fn new(wallet_base: Decimal, risk_parameter: Decimal) -> Self {
        Self {
            state: Mutex::new(SimState {
                cycle: 1,
                risk_parameter,
                checkpoint: 0,
                fund: None,
                claimable: Claimable::default(),
                wallet: WalletHoldings {
                    base: wallet_base,
                    ..Default::default()
                },
                commitments: HashMap::new(),
                pending_deploys: HashMap::new(),
                price: PriceQuote {
                    in_base: dec!(0.02),
                    in_usd: dec!(4.00),
                },
            }),
            fee: dec!(0.000005),
            reward_per_base: dec!(0.4),
            principal_return_pct: dec!(0.95),
        }
    }

    fn receipt(&self) -> Submission {
        Submission {
            signature: format!("sim-{}", uuid::Uuid::new_v4()),
            fee: self.fee,
        }
    }

    // ---- scenario controls (used by dry-run setup and tests) --------------

    /// Move to the next cycle.
    pub fn advance_cycle(&self) {
        let mut s = self.state.lock().unwrap();
        s.cycle += 1;
        debug!(cycle = s.cycle, "Sim cycle advanced");
    }

    pub fn set_risk_parameter(&self, value: Decimal) {
        self.state.lock().unwrap().risk_parameter = value;
    }

    pub fn set_commitment(&self, cycle_id: u64, total: Decimal) {
        self.state
            .lock()
            .unwrap()
            .commitments
            .insert(cycle_id, total);
    }

    pub fn set_price(&self, price: PriceQuote) {
        self.state.lock().unwrap().price = price;
    }

    /// Directly drain the fund (models per-cycle burn while we were away).
    pub fn drain_fund(&self, amount: Decimal) {
        let mut s = self.state.lock().unwrap();
        if let Some(fund) = s.fund.as_mut() {
            fund.balance = (fund.balance - amount).max(Decimal::ZERO);
        }
    }
}

#[async_trait]
impl GameClient for SimChain {
    async fn current_cycle(&self) -> ChainResult<u64> {
        Ok(self.state.lock().unwrap().cycle)
    }

    async fn risk_parameter(&self) -> ChainResult<Decimal> {
        Ok(self.state.lock().unwrap().risk_parameter)
    }

    async fn fund_state(&self) -> ChainResult<Option<FundSnapshot>> {
        Ok(self.state.lock().unwrap().fund.as_ref().map(|f| FundSnapshot {
            balance: f.balance,
            per_cycle_cost: f.per_cycle,
        }))
    }

    async fn checkpoint_cycle(&self) -> ChainResult<u64> {
        Ok(self.state.lock().unwrap().checkpoint)
    }

    async fn claimable(&self) -> ChainResult<Claimable> {
        Ok(self.state.lock().unwrap().claimable)
    }

    async fn wallet(&self) -> ChainResult<WalletHoldings> {
        Ok(self.state.lock().unwrap().wallet)
    }

    async fn cycle_commitment_total(&self, cycle_id: u64) -> ChainResult<Decimal> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .commitments
            .get(&cycle_id)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn open_fund(&self, budget: Decimal, per_cycle: Decimal) -> ChainResult<Submission> {
        let mut s = self.state.lock().unwrap();
        if s.fund.is_some() {
            return Err(ChainError::AlreadyApplied("fund already open".into()));
        }
        if budget > s.wallet.base {
            return Err(ChainError::Precondition(format!(
                "budget {budget} exceeds wallet balance {}",
                s.wallet.base
            )));
        }
        s.wallet.base -= budget;
        s.fund = Some(SimFund {
            balance: budget,
            per_cycle,
        });
        Ok(self.receipt())
    }

    async fn close_fund(&self) -> ChainResult<Submission> {
        let mut s = self.state.lock().unwrap();
        match s.fund.take() {
            Some(fund) => {
                s.wallet.base += fund.balance;
                Ok(self.receipt())
            }
            None => Err(ChainError::AlreadyApplied("fund already closed".into())),
        }
    }

    async fn advance_checkpoint(&self, batch: u64) -> ChainResult<Submission> {
        let mut s = self.state.lock().unwrap();
        // Only completed cycles can be checkpointed.
        let target = s.cycle.saturating_sub(1);
        if s.checkpoint >= target {
            return Err(ChainError::AlreadyApplied("checkpoint up to date".into()));
        }
        let stop = target.min(s.checkpoint + batch);
        let (reward_per_base, principal_pct) = (self.reward_per_base, self.principal_return_pct);
        while s.checkpoint < stop {
            s.checkpoint += 1;
            let done = s.checkpoint;
            if let Some(amount) = s.pending_deploys.remove(&done) {
                s.claimable.reward_tokens += amount * reward_per_base;
                s.claimable.base += amount * principal_pct;
            }
        }
        Ok(self.receipt())
    }

    async fn deploy(&self, cycle_id: u64) -> ChainResult<Submission> {
        let mut s = self.state.lock().unwrap();
        if cycle_id != s.cycle {
            return Err(ChainError::InsufficientState(format!(
                "cycle {cycle_id} is not current (now {})",
                s.cycle
            )));
        }
        if s.pending_deploys.contains_key(&cycle_id) {
            return Err(ChainError::AlreadyApplied(format!(
                "cycle {cycle_id} already deployed"
            )));
        }
        let fund = s
            .fund
            .as_mut()
            .ok_or_else(|| ChainError::Precondition("no fund open".into()))?;
        if fund.per_cycle > fund.balance {
            return Err(ChainError::Precondition("fund depleted".into()));
        }
        let spent = fund.per_cycle;
        fund.balance -= spent;
        s.pending_deploys.insert(cycle_id, spent);
        *s.commitments.entry(cycle_id).or_default() += spent;
        Ok(self.receipt())
    }

    async fn claim_base(&self) -> ChainResult<Submission> {
        let mut s = self.state.lock().unwrap();
        if s.claimable.base <= Decimal::ZERO {
            return Err(ChainError::InsufficientState("nothing to claim".into()));
        }
        let amount = s.claimable.base;
        s.wallet.base += amount;
        s.claimable.base = Decimal::ZERO;
        Ok(self.receipt())
    }

    async fn claim_reward(&self) -> ChainResult<Submission> {
        let mut s = self.state.lock().unwrap();
        if s.claimable.reward_tokens <= Decimal::ZERO {
            return Err(ChainError::InsufficientState("nothing to claim".into()));
        }
        let amount = s.claimable.reward_tokens;
        s.wallet.reward_tokens += amount;
        s.claimable.reward_tokens = Decimal::ZERO;
        Ok(self.receipt())
    }

    async fn claim_yield(&self) -> ChainResult<Submission> {
        let mut s = self.state.lock().unwrap();
        if s.claimable.yield_tokens <= Decimal::ZERO {
            return Err(ChainError::InsufficientState("no yield accrued".into()));
        }
        let amount = s.claimable.yield_tokens;
        s.wallet.reward_tokens += amount;
        s.claimable.yield_tokens = Decimal::ZERO;
        Ok(self.receipt())
    }

    async fn stake(&self, amount: Decimal) -> ChainResult<Submission> {
        let mut s = self.state.lock().unwrap();
        if amount > s.wallet.reward_tokens {
            return Err(ChainError::Precondition(format!(
                "stake {amount} exceeds wallet reward balance {}",
                s.wallet.reward_tokens
            )));
        }
        s.wallet.reward_tokens -= amount;
        s.wallet.staked_reward_tokens += amount;
        Ok(self.receipt())
    }
}

#[async_trait]
impl SwapService for SimChain {
    async fn swap(&self, amount_in: Decimal, _max_slippage_bps: u32) -> ChainResult<SwapOutcome> {
        let mut s = self.state.lock().unwrap();
        if amount_in > s.wallet.reward_tokens {
            return Err(ChainError::Precondition(format!(
                "swap {amount_in} exceeds wallet reward balance {}",
                s.wallet.reward_tokens
            )));
        }
        let amount_out = amount_in * s.price.in_base;
        s.wallet.reward_tokens -= amount_in;
        s.wallet.base += amount_out;
        Ok(SwapOutcome {
            success: true,
            amount_out,
            signature: Some(format!("sim-swap-{}", uuid::Uuid::new_v4())),
        })
    }
}

#[async_trait]
impl PriceFeed for SimChain {
    async fn price(&self) -> ChainResult<PriceQuote> {
        Ok(self.state.lock().unwrap().price)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
