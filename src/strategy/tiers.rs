//! Jackpot-tier table for per-cycle sizing.
//!
//! A monotonic step function: the larger the observed jackpot, the fewer
//! cycles the budget is spread over, so each cycle's spend is larger. The
//! policy concentrates capital when the observed payoff is large and
//! conserves it when it is small.

use anyhow::Result;
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::TierConfig;

/// Table-driven jackpot → target-cycle-count mapping.
#[derive(Debug, Clone)]
pub struct TierTable {
    /// Sorted ascending by threshold; cycles non-increasing.
    tiers: Vec<(Decimal, u64)>,
}

impl TierTable {
    /// Build and validate a tier table from configuration.
    pub fn new(config: &[TierConfig]) -> Result<Self> {
        if config.is_empty() {
            anyhow::bail!("Tier table must have at least one tier");
        }
        let mut tiers: Vec<(Decimal, u64)> =
            config.iter().map(|t| (t.threshold, t.cycles)).collect();
        tiers.sort_by(|a, b| a.0.cmp(&b.0));

        for pair in tiers.windows(2) {
            if pair[1].1 > pair[0].1 {
                anyhow::bail!(
                    "Tier table not monotonic: threshold {} has {} cycles, above {} with {}",
                    pair[1].0,
                    pair[1].1,
                    pair[0].0,
                    pair[0].1
                );
            }
            if pair[1].0 == pair[0].0 {
                anyhow::bail!("Duplicate tier threshold: {}", pair[0].0);
            }
        }
        if tiers.iter().any(|(_, cycles)| *cycles == 0) {
            anyhow::bail!("Tier cycle counts must be positive");
        }
        Ok(Self { tiers })
    }

    /// Target cycle count for a jackpot size.
    ///
    /// A parameter landing exactly on a tier threshold takes the
    /// conservative side: the higher cycle count below the boundary.
    pub fn target_cycles(&self, risk_parameter: Decimal) -> u64 {
        let mut cycles = self.tiers[0].1;
        for (threshold, tier_cycles) in &self.tiers {
            if risk_parameter > *threshold {
                cycles = *tier_cycles;
            }
        }
        debug!(risk = %risk_parameter, cycles, "Tier selected");
        cycles
    }
}

/// Per-cycle spend: `budget / cycles`. Rounding beyond the external
/// system's minimum unit is left to the chain.
pub fn per_cycle_amount(budget: Decimal, cycles: u64) -> Decimal {
    if cycles == 0 {
        return Decimal::ZERO;
    }
    budget / Decimal::from(cycles)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn table() -> TierTable {
        TierTable::new(&[
            TierConfig {
                threshold: dec!(0),
                cycles: 100,
            },
            TierConfig {
                threshold: dec!(500),
                cycles: 50,
            },
            TierConfig {
                threshold: dec!(2000),
                cycles: 25,
            },
        ])
        .unwrap()
    }

    #[test]
    fn test_tier_selection() {
        let t = table();
        assert_eq!(t.target_cycles(dec!(250)), 100);
        assert_eq!(t.target_cycles(dec!(750)), 50);
        assert_eq!(t.target_cycles(dec!(5000)), 25);
    }

    #[test]
    fn test_exact_threshold_takes_conservative_side() {
        let t = table();
        assert_eq!(t.target_cycles(dec!(500)), 100);
        assert_eq!(t.target_cycles(dec!(2000)), 50);
    }

    #[test]
    fn test_monotonic_over_sweep() {
        let t = table();
        let mut prev = u64::MAX;
        for step in 0..400u32 {
            let risk = Decimal::from(step) * dec!(10);
            let cycles = t.target_cycles(risk);
            assert!(cycles <= prev, "cycles increased at risk {risk}");
            prev = cycles;
        }
    }

    #[test]
    fn test_unsorted_config_is_sorted() {
        let t = TierTable::new(&[
            TierConfig {
                threshold: dec!(500),
                cycles: 50,
            },
            TierConfig {
                threshold: dec!(0),
                cycles: 100,
            },
        ])
        .unwrap();
        assert_eq!(t.target_cycles(dec!(100)), 100);
        assert_eq!(t.target_cycles(dec!(600)), 50);
    }

    #[test]
    fn test_rejects_non_monotonic_table() {
        let result = TierTable::new(&[
            TierConfig {
                threshold: dec!(0),
                cycles: 50,
            },
            TierConfig {
                threshold: dec!(500),
                cycles: 100,
            },
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_empty_table() {
        assert!(TierTable::new(&[]).is_err());
    }

    #[test]
    fn test_rejects_zero_cycles() {
        let result = TierTable::new(&[TierConfig {
            threshold: dec!(0),
            cycles: 0,
        }]);
        assert!(result.is_err());
    }

    #[test]
    fn test_per_cycle_amount() {
        assert_eq!(per_cycle_amount(dec!(1.0), 100), dec!(0.01));
        assert_eq!(per_cycle_amount(dec!(1.0), 0), Decimal::ZERO);
    }
}
