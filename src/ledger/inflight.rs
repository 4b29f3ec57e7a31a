//! In-flight deployment tracker.
//!
//! Short-lived overlay on the ledger recording capital that has been spent
//! but whose resulting reward has not yet become observable externally.
//! Rewards surface one or two cycles after the deploy that earned them, so
//! without this the profit maths would report a phantom loss in between.
//!
//! Resolution is monotonic: a resolved row is never resurrected. Rows
//! resolve when a claim runs for cycles the reward checkpoint has covered
//! (their capital is claimable or claimed, so it is observable again), or
//! when they exceed the age bound.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::types::InFlightDeployment;

#[derive(Clone)]
pub struct InFlightTracker {
    pool: SqlitePool,
}

impl InFlightTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a successful deployment whose reward is not yet visible.
    pub async fn record(&self, cycle_id: u64, amount: Decimal) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO inflight (cycle_id, base_amount, timestamp, resolved) VALUES (?, ?, ?, 0)",
        )
        .bind(cycle_id as i64)
        .bind(amount.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to record in-flight deployment")?;

        debug!(cycle_id, amount = %amount, "In-flight deployment recorded");
        Ok(result.last_insert_rowid())
    }

    /// Resolve every unresolved entry whose cycle the reward checkpoint has
    /// covered. Called after a claim pass; entries for cycles past the
    /// checkpoint stay in flight, their rewards are still invisible.
    pub async fn resolve_through(&self, checkpoint_cycle: u64) -> Result<u64> {
        let result =
            sqlx::query("UPDATE inflight SET resolved = 1 WHERE resolved = 0 AND cycle_id <= ?")
                .bind(checkpoint_cycle as i64)
                .execute(&self.pool)
                .await
                .context("Failed to resolve in-flight deployments")?;
        let n = result.rows_affected();
        if n > 0 {
            debug!(resolved = n, "In-flight deployments resolved by claim");
        }
        Ok(n)
    }

    /// Resolve entries older than `max_age` (reward visibility lag bound).
    pub async fn sweep_stale(&self, max_age: Duration) -> Result<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).context("In-flight age bound out of range")?;
        let result = sqlx::query("UPDATE inflight SET resolved = 1 WHERE resolved = 0 AND timestamp < ?")
            .bind(cutoff.to_rfc3339())
            .execute(&self.pool)
            .await
            .context("Failed to sweep stale in-flight deployments")?;
        let n = result.rows_affected();
        if n > 0 {
            debug!(swept = n, "Stale in-flight deployments swept");
        }
        Ok(n)
    }

    /// Sum of unresolved amounts: spent, but externally invisible capital.
    pub async fn unresolved_total(&self) -> Result<Decimal> {
        let rows = sqlx::query("SELECT base_amount FROM inflight WHERE resolved = 0")
            .fetch_all(&self.pool)
            .await?;
        let mut total = Decimal::ZERO;
        for row in &rows {
            let text: String = row.try_get("base_amount")?;
            total += Decimal::from_str(&text)
                .with_context(|| format!("Bad decimal in inflight table: {text}"))?;
        }
        Ok(total)
    }

    /// All entries, oldest first (diagnostics and tests).
    pub async fn all(&self) -> Result<Vec<InFlightDeployment>> {
        let rows = sqlx::query("SELECT * FROM inflight ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let timestamp: String = row.try_get("timestamp")?;
                let amount: String = row.try_get("base_amount")?;
                Ok(InFlightDeployment {
                    id: row.try_get("id")?,
                    cycle_id: row.try_get::<i64, _>("cycle_id")? as u64,
                    base_amount: Decimal::from_str(&amount)
                        .with_context(|| format!("Bad decimal in inflight table: {amount}"))?,
                    timestamp: DateTime::parse_from_rfc3339(&timestamp)
                        .context("Bad timestamp in inflight table")?
                        .with_timezone(&Utc),
                    resolved: row.try_get::<i64, _>("resolved")? != 0,
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
