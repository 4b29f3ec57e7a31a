//! Shared types for the PROSPECTOR scheduler.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that chain, ledger, strategy,
//! and engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Ledger events
// ---------------------------------------------------------------------------

/// Kind of financial event recorded in the ledger.
///
/// String codes are stable: they are what lands in the `events` table,
/// so renaming a variant must not change its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Per-cycle capital commitment out of the automation fund.
    Deploy,
    /// Base-currency claim (principal refunds, base payouts).
    ClaimBase,
    /// Reward-token claim (mined/earned tokens).
    ClaimRewardToken,
    /// Staking yield claim.
    ClaimYield,
    /// Reward-token → base-currency conversion.
    Swap,
    Stake,
    Unstake,
    /// Capital moved into the automation fund.
    FundOpen,
    /// Fund closure; `base_amount` is the balance returned.
    FundClose,
    /// One-time starting-portfolio-value marker.
    Baseline,
}

impl EventKind {
    /// All known kinds (useful for iteration).
    pub const ALL: &'static [EventKind] = &[
        EventKind::Deploy,
        EventKind::ClaimBase,
        EventKind::ClaimRewardToken,
        EventKind::ClaimYield,
        EventKind::Swap,
        EventKind::Stake,
        EventKind::Unstake,
        EventKind::FundOpen,
        EventKind::FundClose,
        EventKind::Baseline,
    ];

    /// Stable string code used in the events table.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Deploy => "deploy",
            EventKind::ClaimBase => "claim_base",
            EventKind::ClaimRewardToken => "claim_reward_token",
            EventKind::ClaimYield => "claim_yield",
            EventKind::Swap => "swap",
            EventKind::Stake => "stake",
            EventKind::Unstake => "unstake",
            EventKind::FundOpen => "fund_open",
            EventKind::FundClose => "fund_close",
            EventKind::Baseline => "baseline",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown event kind: {s}"))
    }
}

/// Outcome of the remote operation behind an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    Success,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Success => "success",
            EventStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(EventStatus::Success),
            "failed" => Ok(EventStatus::Failed),
            _ => Err(anyhow::anyhow!("Unknown event status: {s}")),
        }
    }
}

/// Immutable append-only financial record.
///
/// Created exactly once per attempted remote operation and never mutated.
/// History is corrected by appending an offsetting event, never by update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    /// Transaction signature, when the remote call produced one.
    pub signature: Option<String>,
    pub cycle_id: Option<u64>,
    pub base_amount: Decimal,
    pub reward_token_amount: Decimal,
    pub status: EventStatus,
    pub notes: Option<String>,
    pub reward_token_price_usd: Option<Decimal>,
    /// Actual network fee returned by the submission, never an estimate.
    pub network_fee: Decimal,
    pub protocol_fee: Decimal,
}

impl LedgerEvent {
    /// A successful event with amounts to be filled in by the caller.
    pub fn success(kind: EventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            signature: None,
            cycle_id: None,
            base_amount: Decimal::ZERO,
            reward_token_amount: Decimal::ZERO,
            status: EventStatus::Success,
            notes: None,
            reward_token_price_usd: None,
            network_fee: Decimal::ZERO,
            protocol_fee: Decimal::ZERO,
        }
    }

    /// A failed-attempt marker (kept so failure frequency is auditable).
    pub fn failed(kind: EventKind, notes: impl Into<String>) -> Self {
        Self {
            status: EventStatus::Failed,
            notes: Some(notes.into()),
            ..Self::success(kind)
        }
    }

    pub fn base(mut self, amount: Decimal) -> Self {
        self.base_amount = amount;
        self
    }

    pub fn reward(mut self, amount: Decimal) -> Self {
        self.reward_token_amount = amount;
        self
    }

    pub fn cycle(mut self, cycle_id: u64) -> Self {
        self.cycle_id = Some(cycle_id);
        self
    }

    pub fn signed(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn fee(mut self, network_fee: Decimal) -> Self {
        self.network_fee = network_fee;
        self
    }

    pub fn priced(mut self, price_usd: Decimal) -> Self {
        self.reward_token_price_usd = Some(price_usd);
        self
    }

    pub fn note(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Per-kind ledger aggregates over successful events.
///
/// `deployed` is definitional: `Σ fund_open.base − Σ fund_close.base`.
/// No other event kind contributes to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub deployed: Decimal,
    pub claimed_base: Decimal,
    pub claimed_reward: Decimal,
    pub swapped_base: Decimal,
    pub swapped_reward: Decimal,
    pub staked: Decimal,
}

// ---------------------------------------------------------------------------
// In-flight deployments
// ---------------------------------------------------------------------------

/// Capital that has left the fund but is not yet visible in any external
/// claimable balance. Excluded from current-value maths until resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InFlightDeployment {
    pub id: i64,
    pub cycle_id: u64,
    pub base_amount: Decimal,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
}

// ---------------------------------------------------------------------------
// External state views (fetched, not stored)
// ---------------------------------------------------------------------------

/// Point-in-time view of the pooled automation fund.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundSnapshot {
    pub balance: Decimal,
    pub per_cycle_cost: Decimal,
}

impl FundSnapshot {
    /// Whole cycles the remaining balance still covers.
    pub fn remaining_cycles(&self) -> u64 {
        if self.per_cycle_cost <= Decimal::ZERO {
            return 0;
        }
        (self.balance / self.per_cycle_cost)
            .floor()
            .to_u64()
            .unwrap_or(0)
    }

    /// Depleted: the next cycle's cost exceeds what is left.
    pub fn is_depleted(&self) -> bool {
        self.per_cycle_cost > self.balance
    }
}

impl fmt::Display for FundSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fund {:.6} @ {:.6}/cycle ({} cycles left)",
            self.balance,
            self.per_cycle_cost,
            self.remaining_cycles()
        )
    }
}

/// Externally claimable balances, per claim lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Claimable {
    pub base: Decimal,
    pub reward_tokens: Decimal,
    pub yield_tokens: Decimal,
}

impl Claimable {
    pub fn is_empty(&self) -> bool {
        self.base <= Decimal::ZERO
            && self.reward_tokens <= Decimal::ZERO
            && self.yield_tokens <= Decimal::ZERO
    }
}

/// Wallet-level holdings outside the fund.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletHoldings {
    pub base: Decimal,
    pub reward_tokens: Decimal,
    pub staked_reward_tokens: Decimal,
}

/// Reward-token price quote. Only the numeric contract matters here;
/// acquisition is the feed's problem.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Reward token priced in base currency.
    pub in_base: Decimal,
    /// Reward token priced in USD (recorded for snapshots).
    pub in_usd: Decimal,
}

/// Receipt for a submitted remote operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub signature: String,
    /// Actual network fee charged, as reported by the submission call.
    pub fee: Decimal,
}

// ---------------------------------------------------------------------------
// Persistent process state
// ---------------------------------------------------------------------------

/// The risk-parameter value the current fund allocation was sized for.
///
/// Owned exclusively by the fund lifecycle manager: written on open/rescale,
/// cleared on closure, read once at process start. Lives in its own small
/// file, deliberately apart from the ledger database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingRecord {
    pub risk_parameter: Decimal,
    pub sized_at: DateTime<Utc>,
    pub cycle_id: u64,
}

// ---------------------------------------------------------------------------
// Profit & loss
// ---------------------------------------------------------------------------

/// Point-in-time profit/loss summary produced by the accountant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PnlReport {
    pub timestamp: DateTime<Utc>,
    /// `Σ fund_open − Σ fund_close` from the ledger.
    pub deployed: Decimal,
    /// Base already realized: claimed base + swap proceeds.
    pub realized_base: Decimal,
    /// Claimed reward tokens valued at the current price.
    pub claimed_reward_value: Decimal,
    pub fund_balance: Decimal,
    /// Claimable base plus claimable/yield reward tokens at current price.
    pub claimable_value: Decimal,
    /// claimed + swapped + fund balance + claimable. Excludes in-flight.
    pub current_value: Decimal,
    /// Unresolved deployments: spent, not yet externally visible.
    pub in_flight: Decimal,
    /// current value + in-flight − deployed.
    pub net_profit: Decimal,
    /// net profit / deployed × 100; 0 when nothing is deployed.
    pub roi_pct: Decimal,
    /// Wallet + fund + claimable, all at current price.
    pub holdings_value: Decimal,
    pub baseline: Option<Decimal>,
    /// holdings value − baseline, when a baseline was recorded.
    pub baseline_profit: Option<Decimal>,
}

impl fmt::Display for PnlReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deployed {:.6} | value {:.6} (+{:.6} in flight) | net {:.6} | roi {:.2}%",
            self.deployed, self.current_value, self.in_flight, self.net_profit, self.roi_pct
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
