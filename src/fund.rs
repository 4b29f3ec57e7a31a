//! Fund lifecycle manager.
//!
//! Creates, closes, and re-creates the pooled automation fund, and owns
//! the persistent sizing record that drives rescale decisions. Opening
//! fails closed (no ledger entry) when the usable budget is below the
//! floor; closing captures the fund balance *before* the irreversible
//! closure so the ledger always knows what came back.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::chain::{check_fee_divergence, submit_with_retry, GameClient, SubmitOutcome};
use crate::config::{FundConfig, RescaleConfig};
use crate::ledger::LedgerStore;
use crate::storage;
use crate::strategy::{per_cycle_amount, TierTable};
use crate::types::{EventKind, FundSnapshot, LedgerEvent, SizingRecord};

pub struct FundManager {
    client: Arc<dyn GameClient>,
    ledger: LedgerStore,
    tiers: TierTable,
    fund_cfg: FundConfig,
    rescale_cfg: RescaleConfig,
    max_attempts: u32,
    expected_fee: Decimal,
    sizing_path: Option<String>,
    /// In-memory copy of the persisted sizing record.
    sizing: Option<SizingRecord>,
}

impl FundManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn GameClient>,
        ledger: LedgerStore,
        tiers: TierTable,
        fund_cfg: FundConfig,
        rescale_cfg: RescaleConfig,
        max_attempts: u32,
        expected_fee: Decimal,
        sizing_path: Option<String>,
        restored_sizing: Option<SizingRecord>,
    ) -> Self {
        Self {
            client,
            ledger,
            tiers,
            fund_cfg,
            rescale_cfg,
            max_attempts,
            expected_fee,
            sizing_path,
            sizing: restored_sizing,
        }
    }

    /// The sizing record the current fund was opened with, if any.
    pub fn sizing(&self) -> Option<&SizingRecord> {
        self.sizing.as_ref()
    }

    /// Usable budget under the configured policy.
    async fn usable_budget(&self) -> Result<Decimal> {
        let wallet = self.client.wallet().await?;
        let budget = match self.fund_cfg.budget_mode.as_str() {
            "fixed" => self.fund_cfg.fixed_budget.min(wallet.base),
            // "percentage" (validated at config load)
            _ => wallet.base * self.fund_cfg.budget_pct,
        };
        Ok(budget)
    }

    /// Open a fund sized for the given jackpot.
    ///
    /// Fails closed — returns an error and writes nothing to the ledger —
    /// when the usable budget is below the configured floor.
    pub async fn open(&mut self, risk_parameter: Decimal, cycle_id: u64) -> Result<FundSnapshot> {
        let budget = self.usable_budget().await?;
        if budget < self.fund_cfg.min_budget {
            anyhow::bail!(
                "Usable budget {budget} below floor {} — not opening fund",
                self.fund_cfg.min_budget
            );
        }

        let cycles = self.tiers.target_cycles(risk_parameter);
        let per_cycle = per_cycle_amount(budget, cycles);

        let outcome = submit_with_retry("open_fund", self.max_attempts, || {
            self.client.open_fund(budget, per_cycle)
        })
        .await
        .context("Fund open submission failed")?;

        // An already-applied open means a fund exists; adopt its real state.
        let snapshot = match &outcome {
            SubmitOutcome::AlreadyApplied => self
                .client
                .fund_state()
                .await?
                .ok_or_else(|| anyhow::anyhow!("Open reported already-applied but no fund found"))?,
            SubmitOutcome::Applied(sub) => {
                check_fee_divergence("open_fund", sub.fee, self.expected_fee);
                let event = LedgerEvent::success(EventKind::FundOpen)
                    .base(budget)
                    .cycle(cycle_id)
                    .fee(sub.fee)
                    .signed(sub.signature.clone())
                    .note(format!("sized for jackpot {risk_parameter}, {cycles} cycles"));
                if let Err(e) = self.ledger.append(&event).await {
                    // The capital moved; an unrecorded open under-reports
                    // deployed. Loud, but the fund itself is fine.
                    error!(error = %e, budget = %budget, "LEDGER WRITE FAILED for fund_open");
                }
                FundSnapshot {
                    balance: budget,
                    per_cycle_cost: per_cycle,
                }
            }
        };

        let record = SizingRecord {
            risk_parameter,
            sized_at: Utc::now(),
            cycle_id,
        };
        storage::save_sizing(&record, self.sizing_path.as_deref())?;
        self.sizing = Some(record);

        info!(
            budget = %budget,
            per_cycle = %snapshot.per_cycle_cost,
            cycles,
            risk = %risk_parameter,
            "Fund opened"
        );
        Ok(snapshot)
    }

    /// Close the fund and record what came back.
    ///
    /// The balance is read before submission because closure is
    /// irreversible; an already-closed fund still clears sizing state.
    pub async fn close(&mut self) -> Result<Decimal> {
        let returned = match self.client.fund_state().await? {
            Some(fund) => fund.balance,
            None => {
                warn!("Close requested but no fund exists — clearing sizing only");
                self.clear_sizing()?;
                return Ok(Decimal::ZERO);
            }
        };

        let outcome = submit_with_retry("close_fund", self.max_attempts, || {
            self.client.close_fund()
        })
        .await
        .context("Fund close submission failed")?;

        if let SubmitOutcome::Applied(sub) = &outcome {
            check_fee_divergence("close_fund", sub.fee, self.expected_fee);
            let event = LedgerEvent::success(EventKind::FundClose)
                .base(returned)
                .fee(sub.fee)
                .signed(sub.signature.clone());
            if let Err(e) = self.ledger.append(&event).await {
                error!(error = %e, returned = %returned, "LEDGER WRITE FAILED for fund_close");
            }
        }

        self.clear_sizing()?;
        info!(returned = %returned, "Fund closed");
        Ok(returned)
    }

    fn clear_sizing(&mut self) -> Result<()> {
        storage::clear_sizing(self.sizing_path.as_deref())?;
        self.sizing = None;
        Ok(())
    }

    /// Whether the jackpot has moved far enough from the value the current
    /// allocation was sized for to warrant closing and re-opening.
    ///
    /// Hysteresis: no prior sizing (or a zero-sized record) never triggers.
    pub fn should_rescale(&self, current: Decimal) -> bool {
        let sized = match &self.sizing {
            Some(record) if record.risk_parameter > Decimal::ZERO => record.risk_parameter,
            _ => return false,
        };
        let delta = current - sized;
        let relative = delta / sized;

        let grew = relative >= self.rescale_cfg.grow_pct && delta >= self.rescale_cfg.min_abs_delta;
        let shrank =
            relative <= -self.rescale_cfg.shrink_pct && -delta >= self.rescale_cfg.min_abs_delta;
        grew || shrank
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::sim::SimChain;
    use crate::config::TierConfig;
    use rust_decimal_macros::dec;

    fn temp_sizing_path() -> String {
        let mut p = std::env::temp_dir();
        p.push(format!("prospector_fund_test_{}.json", uuid::Uuid::new_v4()));
        p.to_string_lossy().to_string()
    }

    fn tiers() -> TierTable {
        TierTable::new(&[
            TierConfig {
                threshold: dec!(0),
                cycles: 100,
            },
            TierConfig {
                threshold: dec!(500),
                cycles: 50,
            },
        ])
        .unwrap()
    }

    fn fund_cfg() -> FundConfig {
        FundConfig {
            budget_mode: "fixed".to_string(),
            budget_pct: dec!(0.5),
            fixed_budget: dec!(1.0),
            min_budget: dec!(0.05),
        }
    }

    fn rescale_cfg() -> RescaleConfig {
        RescaleConfig {
            grow_pct: dec!(0.5),
            shrink_pct: dec!(0.4),
            min_abs_delta: dec!(100),
        }
    }

    async fn manager(chain: Arc<SimChain>) -> (FundManager, LedgerStore, String) {
        let ledger = LedgerStore::in_memory().await.unwrap();
        let path = temp_sizing_path();
        let mgr = FundManager::new(
            chain,
            ledger.clone(),
            tiers(),
            fund_cfg(),
            rescale_cfg(),
            3,
            dec!(0.000005),
            Some(path.clone()),
            None,
        );
        (mgr, ledger, path)
    }

    #[tokio::test]
    async fn test_open_records_event_and_sizing() {
        let chain = Arc::new(SimChain::new(dec!(10), dec!(250)));
        let (mut mgr, ledger, path) = manager(chain.clone()).await;

        let fund = mgr.open(dec!(250), 1).await.unwrap();
        assert_eq!(fund.balance, dec!(1.0));
        assert_eq!(fund.per_cycle_cost, dec!(0.01)); // 1.0 / 100 cycles

        let totals = ledger.totals(None).await.unwrap();
        assert_eq!(totals.deployed, dec!(1.0));

        let sizing = mgr.sizing().unwrap();
        assert_eq!(sizing.risk_parameter, dec!(250));
        assert!(storage::load_sizing(Some(&path)).unwrap().is_some());

        storage::clear_sizing(Some(&path)).unwrap();
    }

    #[tokio::test]
    async fn test_open_fails_closed_below_floor() {
        let chain = Arc::new(SimChain::new(dec!(0.01), dec!(250)));
        let (mut mgr, ledger, path) = manager(chain).await;

        assert!(mgr.open(dec!(250), 1).await.is_err());
        // Fails closed: no ledger entry, no sizing record.
        let totals = ledger.totals(None).await.unwrap();
        assert_eq!(totals.deployed, Decimal::ZERO);
        assert!(mgr.sizing().is_none());
        assert!(storage::load_sizing(Some(&path)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_captures_balance_and_clears_sizing() {
        let chain = Arc::new(SimChain::new(dec!(10), dec!(250)));
        let (mut mgr, ledger, path) = manager(chain.clone()).await;

        mgr.open(dec!(250), 1).await.unwrap();
        chain.drain_fund(dec!(0.995)); // burned down to 0.005

        let returned = mgr.close().await.unwrap();
        assert_eq!(returned, dec!(0.005));

        let totals = ledger.totals(None).await.unwrap();
        assert_eq!(totals.deployed, dec!(0.995)); // 1.0 opened − 0.005 back
        assert!(mgr.sizing().is_none());
        assert!(storage::load_sizing(Some(&path)).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_without_fund_is_noop() {
        let chain = Arc::new(SimChain::new(dec!(10), dec!(250)));
        let (mut mgr, ledger, _path) = manager(chain).await;

        let returned = mgr.close().await.unwrap();
        assert_eq!(returned, Decimal::ZERO);
        let totals = ledger.totals(None).await.unwrap();
        assert_eq!(totals.deployed, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_should_rescale_hysteresis() {
        let chain = Arc::new(SimChain::new(dec!(10), dec!(250)));
        let (mut mgr, _ledger, path) = manager(chain).await;

        // No prior sizing: never rescale, whatever the jackpot does.
        assert!(!mgr.should_rescale(dec!(10000)));

        mgr.open(dec!(1000), 1).await.unwrap();
        // +50% and ≥100 absolute: trigger.
        assert!(mgr.should_rescale(dec!(1500)));
        // +40%: below the relative bar.
        assert!(!mgr.should_rescale(dec!(1400)));
        // −40% and ≥100 absolute: trigger.
        assert!(mgr.should_rescale(dec!(600)));
        // −30%: below the relative bar.
        assert!(!mgr.should_rescale(dec!(700)));

        storage::clear_sizing(Some(&path)).unwrap();
    }

    #[tokio::test]
    async fn test_rescale_absolute_floor() {
        let chain = Arc::new(SimChain::new(dec!(10), dec!(250)));
        let (mut mgr, _ledger, path) = manager(chain).await;

        // Sized for a tiny jackpot: +50% relative is only +50 absolute.
        mgr.open(dec!(100), 1).await.unwrap();
        assert!(!mgr.should_rescale(dec!(150)));
        // +200 absolute clears both bars.
        assert!(mgr.should_rescale(dec!(300)));

        storage::clear_sizing(Some(&path)).unwrap();
    }

    #[tokio::test]
    async fn test_zero_sized_record_never_triggers() {
        let chain = Arc::new(SimChain::new(dec!(10), dec!(250)));
        let ledger = LedgerStore::in_memory().await.unwrap();
        let mgr = FundManager::new(
            chain,
            ledger,
            tiers(),
            fund_cfg(),
            rescale_cfg(),
            3,
            dec!(0.000005),
            None,
            Some(SizingRecord {
                risk_parameter: Decimal::ZERO,
                sized_at: Utc::now(),
                cycle_id: 0,
            }),
        );
        assert!(!mgr.should_rescale(dec!(10000)));
    }
}
