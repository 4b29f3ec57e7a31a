//! Ledger persistence layer.
//!
//! The ledger is the single source of truth for every financial event the
//! scheduler causes: deployments, claims, swaps, stakes, fund open/close,
//! and the one-time baseline. Rows are append-only — corrections are new
//! events, never updates. Amounts are stored as canonical decimal text and
//! aggregated in Rust so `Decimal` precision survives the database.
//!
//! Concurrency discipline: exactly one writer (the scheduler loop). SQLite's
//! own transactional isolation covers read-only consumers; the pool is kept
//! at a single connection so in-memory test databases behave identically.

pub mod inflight;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use crate::types::{
    Claimable, EventKind, EventStatus, FundSnapshot, LedgerEvent, LedgerTotals, PriceQuote,
    WalletHoldings,
};

/// Durable, transactional record of every financial event.
#[derive(Clone)]
pub struct LedgerStore {
    pool: SqlitePool,
}

impl LedgerStore {
    /// Open (or create) the ledger database and run migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .with_context(|| format!("Failed to open ledger database: {url}"))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory ledger for tests.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        // raw_sql: the schema is several statements in one batch.
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id                      INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp               TEXT NOT NULL,
                kind                    TEXT NOT NULL,
                signature               TEXT,
                cycle_id                INTEGER,
                base_amount             TEXT NOT NULL,
                reward_token_amount     TEXT NOT NULL,
                status                  TEXT NOT NULL,
                notes                   TEXT,
                reward_token_price_usd  TEXT,
                network_fee             TEXT NOT NULL,
                protocol_fee            TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind, status);

            CREATE TABLE IF NOT EXISTS inflight (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                cycle_id    INTEGER NOT NULL,
                base_amount TEXT NOT NULL,
                timestamp   TEXT NOT NULL,
                resolved    INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS snapshots (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp        TEXT NOT NULL,
                fund_balance     TEXT NOT NULL,
                wallet_base      TEXT NOT NULL,
                wallet_reward    TEXT NOT NULL,
                staked_reward    TEXT NOT NULL,
                claimable_base   TEXT NOT NULL,
                claimable_reward TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS price_history (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp     TEXT NOT NULL,
                price_in_base TEXT NOT NULL,
                price_in_usd  TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Ledger migration failed")?;
        Ok(())
    }

    /// Append an event. The only write path for the events table.
    pub async fn append(&self, event: &LedgerEvent) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO events (
                timestamp, kind, signature, cycle_id, base_amount,
                reward_token_amount, status, notes, reward_token_price_usd,
                network_fee, protocol_fee
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.timestamp.to_rfc3339())
        .bind(event.kind.as_str())
        .bind(event.signature.as_deref())
        .bind(event.cycle_id.map(|c| c as i64))
        .bind(event.base_amount.to_string())
        .bind(event.reward_token_amount.to_string())
        .bind(event.status.as_str())
        .bind(event.notes.as_deref())
        .bind(event.reward_token_price_usd.map(|p| p.to_string()))
        .bind(event.network_fee.to_string())
        .bind(event.protocol_fee.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to append ledger event")?;

        let id = result.last_insert_rowid();
        debug!(
            id,
            kind = %event.kind,
            base = %event.base_amount,
            reward = %event.reward_token_amount,
            status = event.status.as_str(),
            "Ledger event appended"
        );
        Ok(id)
    }

    /// Record the starting portfolio value. Idempotent: returns false and
    /// changes nothing if a baseline already exists.
    pub async fn set_baseline(&self, amount: Decimal) -> Result<bool> {
        if let Some(existing) = self.baseline().await? {
            debug!(baseline = %existing, "Baseline already set — ignoring");
            return Ok(false);
        }
        self.append(&LedgerEvent::success(EventKind::Baseline).base(amount))
            .await?;
        info!(baseline = %amount, "Baseline recorded");
        Ok(true)
    }

    /// The recorded baseline, if any. First one wins.
    pub async fn baseline(&self) -> Result<Option<Decimal>> {
        let row = sqlx::query(
            "SELECT base_amount FROM events WHERE kind = ? AND status = ? ORDER BY id LIMIT 1",
        )
        .bind(EventKind::Baseline.as_str())
        .bind(EventStatus::Success.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| parse_decimal(&r, "base_amount")).transpose()
    }

    /// Per-kind aggregates over successful events, optionally bounded below
    /// in time. `deployed = Σ fund_open − Σ fund_close`; nothing else
    /// contributes to it.
    pub async fn totals(&self, since: Option<DateTime<Utc>>) -> Result<LedgerTotals> {
        let rows = match since {
            Some(ts) => {
                sqlx::query(
                    "SELECT kind, base_amount, reward_token_amount FROM events \
                     WHERE status = ? AND timestamp >= ?",
                )
                .bind(EventStatus::Success.as_str())
                .bind(ts.to_rfc3339())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT kind, base_amount, reward_token_amount FROM events WHERE status = ?",
                )
                .bind(EventStatus::Success.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut totals = LedgerTotals::default();
        for row in &rows {
            let kind: String = row.try_get("kind")?;
            let base = parse_decimal(row, "base_amount")?;
            let reward = parse_decimal(row, "reward_token_amount")?;
            match EventKind::from_str(&kind)? {
                EventKind::FundOpen => totals.deployed += base,
                EventKind::FundClose => totals.deployed -= base,
                EventKind::ClaimBase => totals.claimed_base += base,
                EventKind::ClaimRewardToken | EventKind::ClaimYield => {
                    totals.claimed_reward += reward
                }
                EventKind::Swap => {
                    totals.swapped_base += base;
                    totals.swapped_reward += reward;
                }
                EventKind::Stake => totals.staked += reward,
                EventKind::Unstake => totals.staked -= reward,
                EventKind::Deploy | EventKind::Baseline => {}
            }
        }
        Ok(totals)
    }

    /// Most recent events, newest first (read-only consumer surface).
    pub async fn recent_events(&self, limit: u32) -> Result<Vec<LedgerEvent>> {
        let rows = sqlx::query("SELECT * FROM events ORDER BY id DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_event).collect()
    }

    /// Periodic balance snapshot row.
    pub async fn record_snapshot(
        &self,
        fund: Option<FundSnapshot>,
        wallet: &WalletHoldings,
        claimable: &Claimable,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO snapshots (
                timestamp, fund_balance, wallet_base, wallet_reward,
                staked_reward, claimable_base, claimable_reward
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(fund.map(|f| f.balance).unwrap_or(Decimal::ZERO).to_string())
        .bind(wallet.base.to_string())
        .bind(wallet.reward_tokens.to_string())
        .bind(wallet.staked_reward_tokens.to_string())
        .bind(claimable.base.to_string())
        .bind(claimable.reward_tokens.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to record balance snapshot")?;
        Ok(())
    }

    /// Periodic price row.
    pub async fn record_price(&self, price: &PriceQuote) -> Result<()> {
        sqlx::query("INSERT INTO price_history (timestamp, price_in_base, price_in_usd) VALUES (?, ?, ?)")
            .bind(Utc::now().to_rfc3339())
            .bind(price.in_base.to_string())
            .bind(price.in_usd.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to record price")?;
        Ok(())
    }
}

fn parse_decimal(row: &SqliteRow, column: &str) -> Result<Decimal> {
    let text: String = row.try_get(column)?;
    Decimal::from_str(&text).with_context(|| format!("Bad decimal in column {column}: {text}"))
}

fn row_to_event(row: &SqliteRow) -> Result<LedgerEvent> {
    let timestamp: String = row.try_get("timestamp")?;
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let price: Option<String> = row.try_get("reward_token_price_usd")?;
    Ok(LedgerEvent {
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .context("Bad timestamp in events table")?
            .with_timezone(&Utc),
        kind: EventKind::from_str(&kind)?,
        signature: row.try_get("signature")?,
        cycle_id: row.try_get::<Option<i64>, _>("cycle_id")?.map(|c| c as u64),
        base_amount: parse_decimal(row, "base_amount")?,
        reward_token_amount: parse_decimal(row, "reward_token_amount")?,
        status: EventStatus::from_str(&status)?,
        notes: row.try_get("notes")?,
        reward_token_price_usd: price
            .map(|p| Decimal::from_str(&p).context("Bad price in events table"))
            .transpose()?,
        network_fee: parse_decimal(row, "network_fee")?,
        protocol_fee: parse_decimal(row, "protocol_fee")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn store() -> LedgerStore {
        LedgerStore::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let s = store().await;
        let ev = LedgerEvent::success(EventKind::Deploy)
            .base(dec!(0.01))
            .cycle(7)
            .signed("sig-7")
            .fee(dec!(0.000005));
        let id = s.append(&ev).await.unwrap();
        assert!(id > 0);

        let events = s.recent_events(10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Deploy);
        assert_eq!(events[0].base_amount, dec!(0.01));
        assert_eq!(events[0].cycle_id, Some(7));
        assert_eq!(events[0].signature.as_deref(), Some("sig-7"));
    }

    #[tokio::test]
    async fn test_deployed_is_open_minus_close() {
        let s = store().await;
        s.append(&LedgerEvent::success(EventKind::FundOpen).base(dec!(1.0)))
            .await
            .unwrap();
        s.append(&LedgerEvent::success(EventKind::FundOpen).base(dec!(0.5)))
            .await
            .unwrap();
        s.append(&LedgerEvent::success(EventKind::FundClose).base(dec!(0.2)))
            .await
            .unwrap();
        // Deploys must not move the deployed figure.
        s.append(&LedgerEvent::success(EventKind::Deploy).base(dec!(0.01)))
            .await
            .unwrap();

        let totals = s.totals(None).await.unwrap();
        assert_eq!(totals.deployed, dec!(1.3));
    }

    #[tokio::test]
    async fn test_failed_events_excluded_from_totals() {
        let s = store().await;
        s.append(&LedgerEvent::success(EventKind::ClaimBase).base(dec!(0.3)))
            .await
            .unwrap();
        s.append(&LedgerEvent::failed(EventKind::ClaimBase, "timeout").base(dec!(0.9)))
            .await
            .unwrap();

        let totals = s.totals(None).await.unwrap();
        assert_eq!(totals.claimed_base, dec!(0.3));
    }

    #[tokio::test]
    async fn test_claim_and_swap_totals() {
        let s = store().await;
        s.append(&LedgerEvent::success(EventKind::ClaimRewardToken).reward(dec!(2.5)))
            .await
            .unwrap();
        s.append(&LedgerEvent::success(EventKind::ClaimYield).reward(dec!(0.5)))
            .await
            .unwrap();
        s.append(
            &LedgerEvent::success(EventKind::Swap)
                .reward(dec!(1.0))
                .base(dec!(0.02)),
        )
        .await
        .unwrap();
        s.append(&LedgerEvent::success(EventKind::Stake).reward(dec!(1.5)))
            .await
            .unwrap();

        let totals = s.totals(None).await.unwrap();
        assert_eq!(totals.claimed_reward, dec!(3.0));
        assert_eq!(totals.swapped_reward, dec!(1.0));
        assert_eq!(totals.swapped_base, dec!(0.02));
        assert_eq!(totals.staked, dec!(1.5));
    }

    #[tokio::test]
    async fn test_baseline_is_idempotent() {
        let s = store().await;
        assert!(s.set_baseline(dec!(5.0)).await.unwrap());
        assert!(!s.set_baseline(dec!(9.0)).await.unwrap());
        assert_eq!(s.baseline().await.unwrap(), Some(dec!(5.0)));
    }

    #[tokio::test]
    async fn test_baseline_absent() {
        let s = store().await;
        assert_eq!(s.baseline().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_totals_since_filters_by_time() {
        let s = store().await;
        let mut old = LedgerEvent::success(EventKind::ClaimBase).base(dec!(1.0));
        old.timestamp = Utc::now() - chrono::Duration::hours(48);
        s.append(&old).await.unwrap();
        s.append(&LedgerEvent::success(EventKind::ClaimBase).base(dec!(0.25)))
            .await
            .unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(1);
        let totals = s.totals(Some(cutoff)).await.unwrap();
        assert_eq!(totals.claimed_base, dec!(0.25));
    }

    #[tokio::test]
    async fn test_snapshot_and_price_rows() {
        let s = store().await;
        s.record_snapshot(
            Some(FundSnapshot {
                balance: dec!(0.9),
                per_cycle_cost: dec!(0.01),
            }),
            &WalletHoldings::default(),
            &Claimable::default(),
        )
        .await
        .unwrap();
        s.record_price(&PriceQuote {
            in_base: dec!(0.02),
            in_usd: dec!(4.0),
        })
        .await
        .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snapshots")
            .fetch_one(s.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
