//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (wallet keys, endpoints) are referenced by env-var name in the
//! config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub chain: ChainConfig,
    pub fund: FundConfig,
    pub strategy: StrategyConfig,
    pub rescale: RescaleConfig,
    pub maintenance: MaintenanceConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// How often the loop re-polls the external cycle id.
    pub poll_interval_secs: u64,
    /// Backoff sleep after a failed cycle before the next poll.
    pub error_backoff_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChainConfig {
    /// Run against the in-memory simulated chain instead of a live endpoint.
    pub dry_run: bool,
    pub rpc_url_env: Option<String>,
    pub keypair_path_env: Option<String>,
    /// Max submission attempts for transient failures.
    pub max_attempts: u32,
    /// Rough per-submission fee expectation, compared against actual fees.
    /// Divergence is flagged for operator review, never reconciled.
    pub expected_fee: Decimal,
    /// Max checkpoint advances bundled into a single submission.
    pub checkpoint_batch: u64,
    /// Max swap slippage in basis points.
    pub swap_slippage_bps: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FundConfig {
    /// "percentage" (of wallet base balance) or "fixed".
    pub budget_mode: String,
    pub budget_pct: Decimal,
    pub fixed_budget: Decimal,
    /// Fail closed below this usable budget.
    pub min_budget: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    /// Cycles below this jackpot size are skipped outright.
    pub min_risk_parameter: Decimal,
    /// Tier table: jackpot threshold → target cycle count.
    pub tiers: Vec<TierConfig>,
    pub profitability: ProfitabilityConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TierConfig {
    pub threshold: Decimal,
    pub cycles: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProfitabilityConfig {
    pub enabled: bool,
    /// Deploy only when expected value ≥ this (base units).
    pub min_expected_value: Decimal,
    /// Fixed base reward pool per cycle, in reward tokens.
    pub base_reward_per_cycle: Decimal,
    /// Probability of the jackpot landing on any one cycle.
    pub jackpot_chance: Decimal,
    /// Refining fee haircut on gross rewards (0.10 = 10%).
    pub refining_fee_pct: Decimal,
    /// Assumed fraction of the per-cycle cost returned as principal.
    pub principal_return_pct: Decimal,
    /// Assumed deployment share when observed competition is negligible
    /// (cycle just started, nothing committed yet).
    pub estimated_share: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RescaleConfig {
    /// Relative jackpot growth that triggers a rescale (0.5 = +50%).
    pub grow_pct: Decimal,
    /// Relative jackpot shrink that triggers a rescale (0.4 = −40%).
    pub shrink_pct: Decimal,
    /// Minimum absolute jackpot move, same floor in both directions.
    pub min_abs_delta: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MaintenanceConfig {
    pub claim_interval_secs: u64,
    pub stake_interval_secs: u64,
    pub swap_interval_secs: u64,
    pub snapshot_interval_secs: u64,
    /// Skip all maintenance when fewer cycles than this remain in the fund,
    /// so maintenance never starves a time-sensitive deployment.
    pub min_cycles_for_maintenance: u64,
    /// Claim lanes below these floors are skipped (not worth the fee).
    pub min_claim_base: Decimal,
    pub min_claim_reward: Decimal,
    /// Wallet reward tokens below this are not staked or swapped.
    pub min_stake_amount: Decimal,
    pub min_swap_amount: Decimal,
    /// In-flight entries older than this are swept as resolved.
    pub inflight_max_age_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    /// SQLite URL, e.g. "sqlite://prospector.db?mode=rwc".
    pub database_url: String,
    /// Sizing-record file, kept apart from the ledger database so a ledger
    /// reset never erases rescale-trigger memory, and vice versa.
    pub sizing_state_path: String,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Cheap sanity checks that fail fast at startup rather than mid-loop.
    pub fn validate(&self) -> Result<()> {
        if self.strategy.tiers.is_empty() {
            anyhow::bail!("strategy.tiers must not be empty");
        }
        match self.fund.budget_mode.as_str() {
            "percentage" | "fixed" => {}
            other => anyhow::bail!("Unknown fund.budget_mode: {other}"),
        }
        if self.chain.max_attempts == 0 {
            anyhow::bail!("chain.max_attempts must be at least 1");
        }
        if self.chain.checkpoint_batch == 0 {
            anyhow::bail!("chain.checkpoint_batch must be at least 1");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_toml() -> &'static str {
        r#"
            [agent]
            name = "PROSPECTOR-001"
            poll_interval_secs = 5
            error_backoff_secs = 15

            [chain]
            dry_run = true
            max_attempts = 3
            expected_fee = "0.000005"
            checkpoint_batch = 4
            swap_slippage_bps = 100

            [fund]
            budget_mode = "percentage"
            budget_pct = "0.5"
            fixed_budget = "1.0"
            min_budget = "0.05"

            [strategy]
            min_risk_parameter = "50"
            tiers = [
                { threshold = "0", cycles = 100 },
                { threshold = "500", cycles = 50 },
                { threshold = "2000", cycles = 25 },
            ]

            [strategy.profitability]
            enabled = true
            min_expected_value = "0"
            base_reward_per_cycle = "4"
            jackpot_chance = "0.0002"
            refining_fee_pct = "0.10"
            principal_return_pct = "0.95"
            estimated_share = "0.02"

            [rescale]
            grow_pct = "0.5"
            shrink_pct = "0.4"
            min_abs_delta = "100"

            [maintenance]
            claim_interval_secs = 300
            stake_interval_secs = 900
            swap_interval_secs = 600
            snapshot_interval_secs = 300
            min_cycles_for_maintenance = 2
            min_claim_base = "0.001"
            min_claim_reward = "0.01"
            min_stake_amount = "0.05"
            min_swap_amount = "0.1"
            inflight_max_age_secs = 600

            [ledger]
            database_url = "sqlite::memory:"
            sizing_state_path = "sizing_state.json"
        "#
    }

    #[test]
    fn test_parse_sample_config() {
        let cfg: AppConfig = toml::from_str(sample_toml()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.agent.name, "PROSPECTOR-001");
        assert_eq!(cfg.strategy.tiers.len(), 3);
        assert_eq!(cfg.strategy.tiers[1].cycles, 50);
        assert_eq!(cfg.rescale.min_abs_delta, dec!(100));
        assert!(cfg.chain.dry_run);
    }

    #[test]
    fn test_validate_rejects_empty_tiers() {
        let mut cfg: AppConfig = toml::from_str(sample_toml()).unwrap();
        cfg.strategy.tiers.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_budget_mode() {
        let mut cfg: AppConfig = toml::from_str(sample_toml()).unwrap();
        cfg.fund.budget_mode = "all-in".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut cfg: AppConfig = toml::from_str(sample_toml()).unwrap();
        cfg.chain.max_attempts = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_resolve_env_reads_named_secret() {
        std::env::set_var("PROSPECTOR_TEST_RPC_URL", "wss://node.example");
        assert_eq!(
            AppConfig::resolve_env("PROSPECTOR_TEST_RPC_URL").unwrap(),
            "wss://node.example"
        );
        std::env::remove_var("PROSPECTOR_TEST_RPC_URL");
        assert!(AppConfig::resolve_env("PROSPECTOR_TEST_RPC_URL").is_err());
    }
}
