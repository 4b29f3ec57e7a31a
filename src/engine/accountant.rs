//! Accountant — profit/loss summary over ledger aggregates.
//!
//! Pure arithmetic: ledger totals plus current external balances in,
//! `PnlReport` out. The one subtlety is in-flight capital — deployments
//! whose rewards are not yet externally visible. That capital has left the
//! fund (so it is absent from every balance we can observe) but has not
//! been claimed (so it is absent from claim totals too). It is carried as
//! its own line and excluded from the deployed-versus-value subtraction,
//! otherwise every deploy would report a phantom loss until its rewards
//! surface one or two cycles later.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::types::{Claimable, LedgerTotals, PnlReport, WalletHoldings};

pub struct Accountant;

impl Accountant {
    /// Build a point-in-time P&L summary.
    pub fn summarize(
        totals: &LedgerTotals,
        in_flight: Decimal,
        fund_balance: Decimal,
        claimable: &Claimable,
        wallet: &WalletHoldings,
        price_in_base: Decimal,
        baseline: Option<Decimal>,
    ) -> PnlReport {
        let realized_base = totals.claimed_base + totals.swapped_base;

        // Claimed reward tokens still held (not yet swapped away), at the
        // current price. Swapped tokens are already counted as base.
        let unswapped_reward = (totals.claimed_reward - totals.swapped_reward).max(Decimal::ZERO);
        let claimed_reward_value = unswapped_reward * price_in_base;

        let claimable_value = claimable.base
            + (claimable.reward_tokens + claimable.yield_tokens) * price_in_base;

        let current_value = realized_base + claimed_reward_value + fund_balance + claimable_value;

        // In-flight capital already left the fund; counting it inside
        // current_value would double-count it once the claim lands.
        let net_profit = current_value + in_flight - totals.deployed;

        let roi_pct = if totals.deployed > Decimal::ZERO {
            net_profit / totals.deployed * dec!(100)
        } else {
            Decimal::ZERO
        };

        let holdings_value = wallet.base
            + (wallet.reward_tokens + wallet.staked_reward_tokens) * price_in_base
            + fund_balance
            + claimable_value;

        PnlReport {
            timestamp: Utc::now(),
            deployed: totals.deployed,
            realized_base,
            claimed_reward_value,
            fund_balance,
            claimable_value,
            current_value,
            in_flight,
            net_profit,
            roi_pct,
            holdings_value,
            baseline,
            baseline_profit: baseline.map(|b| holdings_value - b),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
