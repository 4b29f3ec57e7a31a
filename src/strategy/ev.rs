//! Expected-value gate for per-cycle deployment.
//!
//! A deterministic, numerically precise calculation — not a simulation —
//! run once per cycle before deploying. The caller's share of the cycle's
//! reward pool is its cost over the total observed commitment; rewards are
//! haircut by the refining fee, converted at the current price, and offset
//! by the assumed partial return of principal.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::config::ProfitabilityConfig;

/// Evaluator constants. See `config::ProfitabilityConfig` for the TOML side.
#[derive(Debug, Clone)]
pub struct EvConfig {
    /// Fixed base reward pool per cycle, in reward tokens.
    pub base_reward_per_cycle: Decimal,
    /// Probability of the jackpot landing on any one cycle.
    pub jackpot_chance: Decimal,
    /// Refining fee haircut on gross rewards (0.10 = 10%).
    pub refining_fee_pct: Decimal,
    /// Assumed fraction of the per-cycle cost returned as principal.
    pub principal_return_pct: Decimal,
    /// Assumed share when observed competition is negligible.
    pub estimated_share: Decimal,
    /// Deploy only when expected value ≥ this (base units).
    pub min_expected_value: Decimal,
}

impl Default for EvConfig {
    fn default() -> Self {
        Self {
            base_reward_per_cycle: dec!(4),
            jackpot_chance: dec!(0.0002),
            refining_fee_pct: dec!(0.10),
            principal_return_pct: dec!(0.95),
            estimated_share: dec!(0.02),
            min_expected_value: Decimal::ZERO,
        }
    }
}

impl From<&ProfitabilityConfig> for EvConfig {
    fn from(cfg: &ProfitabilityConfig) -> Self {
        Self {
            base_reward_per_cycle: cfg.base_reward_per_cycle,
            jackpot_chance: cfg.jackpot_chance,
            refining_fee_pct: cfg.refining_fee_pct,
            principal_return_pct: cfg.principal_return_pct,
            estimated_share: cfg.estimated_share,
            min_expected_value: cfg.min_expected_value,
        }
    }
}

/// Full breakdown of one profitability evaluation.
#[derive(Debug, Clone)]
pub struct EvReport {
    /// Our deployment share of total observed commitment.
    pub share: Decimal,
    /// Expected reward tokens before the refining fee.
    pub gross_reward_tokens: Decimal,
    /// After the refining fee.
    pub net_reward_tokens: Decimal,
    /// Net rewards valued in base currency.
    pub reward_value: Decimal,
    /// Assumed partial return of the deployed principal.
    pub principal_return: Decimal,
    /// reward value + principal return − cost.
    pub expected_value: Decimal,
    pub profitable: bool,
}

pub struct Evaluator {
    config: EvConfig,
}

impl Evaluator {
    pub fn new(config: EvConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvConfig {
        &self.config
    }

    /// Evaluate one cycle's deployment.
    ///
    /// `observed_competition` is the aggregate commitment by everyone else
    /// this cycle; when it is not yet observable (cycle just started) the
    /// configured estimated share stands in.
    pub fn evaluate(
        &self,
        cost_per_cycle: Decimal,
        risk_parameter: Decimal,
        observed_competition: Decimal,
        price_in_base: Decimal,
    ) -> EvReport {
        let share = if observed_competition > Decimal::ZERO {
            cost_per_cycle / (cost_per_cycle + observed_competition)
        } else {
            self.config.estimated_share
        };

        let gross = self.config.base_reward_per_cycle * share
            + self.config.jackpot_chance * share * risk_parameter;
        let net = gross * (Decimal::ONE - self.config.refining_fee_pct);
        let reward_value = net * price_in_base;
        let principal_return = cost_per_cycle * self.config.principal_return_pct;
        let expected_value = reward_value + principal_return - cost_per_cycle;
        let profitable = expected_value >= self.config.min_expected_value;

        debug!(
            cost = %cost_per_cycle,
            share = %share,
            reward_value = %reward_value,
            ev = %expected_value,
            profitable,
            "Expected value evaluated"
        );

        EvReport {
            share,
            gross_reward_tokens: gross,
            net_reward_tokens: net,
            reward_value,
            principal_return,
            expected_value,
            profitable,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
