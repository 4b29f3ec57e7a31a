//! Chain-facing interfaces.
//!
//! Defines the `GameClient`, `SwapService` and `PriceFeed` traits plus the
//! remote-failure taxonomy and the single retry wrapper every submission
//! goes through. Wire encoding and transport live behind these traits;
//! `sim` provides the in-memory implementation used in dry-run mode and
//! by the integration harness.

pub mod sim;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{Claimable, FundSnapshot, PriceQuote, Submission, WalletHoldings};

// ---------------------------------------------------------------------------
// Failure taxonomy
// ---------------------------------------------------------------------------

/// Classified remote-operation failure.
///
/// The scheduler reacts to the class, not the message: transient failures
/// are retried, already-applied conflicts are success-equivalent,
/// insufficient-state is skipped quietly, preconditions go to the operator.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Duplicate/already-processed submission. The intended effect is
    /// already on chain, so callers treat this as success.
    #[error("already applied: {0}")]
    AlreadyApplied(String),

    /// Network timeout, rate limit, node hiccup. Worth retrying.
    #[error("transient failure: {0}")]
    Transient(String),

    /// External state not ready yet (reward not accrued, checkpoint behind).
    /// Low severity; the next maintenance tick tries again.
    #[error("insufficient state: {0}")]
    InsufficientState(String),

    /// Operator-fixable precondition (missing account, empty budget).
    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("chain error: {0}")]
    Other(String),
}

impl ChainError {
    pub fn is_already_applied(&self) -> bool {
        matches!(self, ChainError::AlreadyApplied(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transient(_))
    }
}

pub type ChainResult<T> = Result<T, ChainError>;

/// Outcome of a retried submission: either a fresh receipt, or the
/// discovery that the operation had already landed.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Applied(Submission),
    AlreadyApplied,
}

impl SubmitOutcome {
    /// Signature of the fresh submission, if this attempt produced one.
    pub fn signature(&self) -> Option<&str> {
        match self {
            SubmitOutcome::Applied(sub) => Some(&sub.signature),
            SubmitOutcome::AlreadyApplied => None,
        }
    }

    /// Actual fee paid by this attempt (zero for an idempotent no-op).
    pub fn fee(&self) -> Decimal {
        match self {
            SubmitOutcome::Applied(sub) => sub.fee,
            SubmitOutcome::AlreadyApplied => Decimal::ZERO,
        }
    }
}

// ---------------------------------------------------------------------------
// Retry wrapper
// ---------------------------------------------------------------------------

/// Base delay between transient-failure retries; doubles per attempt.
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Run a submission with bounded retries and uniform error classification.
///
/// Every remote submission in the codebase goes through here rather than
/// hand-rolling retry at the call site. Transient failures are retried up
/// to `max_attempts` with exponential backoff; an already-applied conflict
/// short-circuits to success; anything else propagates immediately.
pub async fn submit_with_retry<F, Fut>(
    op_name: &str,
    max_attempts: u32,
    mut op: F,
) -> ChainResult<SubmitOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ChainResult<Submission>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(sub) => {
                debug!(op = op_name, attempt, signature = %sub.signature, "Submission confirmed");
                return Ok(SubmitOutcome::Applied(sub));
            }
            Err(e) if e.is_already_applied() => {
                info!(op = op_name, attempt, "Already applied — treating as success");
                return Ok(SubmitOutcome::AlreadyApplied);
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = Duration::from_millis(RETRY_BASE_DELAY_MS << (attempt - 1));
                warn!(
                    op = op_name,
                    attempt,
                    max_attempts,
                    error = %e,
                    backoff_ms = delay.as_millis() as u64,
                    "Transient failure — retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Flag a fee that diverges badly from the configured expectation.
///
/// The ledger records the actual fee; the expectation exists only so the
/// operator hears about drift instead of it being silently reconciled.
pub fn check_fee_divergence(op_name: &str, actual: Decimal, expected: Decimal) {
    if expected <= Decimal::ZERO {
        return;
    }
    if actual > expected * Decimal::from(3) {
        warn!(
            op = op_name,
            actual = %actual,
            expected = %expected,
            "Actual network fee diverges from configured expectation — review"
        );
    }
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Abstraction over the on-chain round/reward game.
///
/// Reads observe external state; writes return a `Submission` receipt with
/// the actual fee. Any write may fail with `ChainError::AlreadyApplied`,
/// which callers must treat as success.
#[async_trait]
pub trait GameClient: Send + Sync {
    /// Current cycle (round) id.
    async fn current_cycle(&self) -> ChainResult<u64>;

    /// Size of the rare large jackpot currently on offer.
    async fn risk_parameter(&self) -> ChainResult<Decimal>;

    /// The automation fund, if one is currently open.
    async fn fund_state(&self) -> ChainResult<Option<FundSnapshot>>;

    /// Highest cycle whose rewards have been accrued into claimable state.
    async fn checkpoint_cycle(&self) -> ChainResult<u64>;

    async fn claimable(&self) -> ChainResult<Claimable>;

    async fn wallet(&self) -> ChainResult<WalletHoldings>;

    /// Aggregate capital committed by all participants for a cycle.
    async fn cycle_commitment_total(&self, cycle_id: u64) -> ChainResult<Decimal>;

    /// Open the pooled fund with `budget`, spending `per_cycle` each cycle.
    async fn open_fund(&self, budget: Decimal, per_cycle: Decimal) -> ChainResult<Submission>;

    /// Close the fund, returning its remaining balance to the wallet.
    /// Irreversible; callers must capture the balance beforehand.
    async fn close_fund(&self) -> ChainResult<Submission>;

    /// Advance the reward checkpoint by at most `batch` cycles.
    async fn advance_checkpoint(&self, batch: u64) -> ChainResult<Submission>;

    /// Commit this cycle's capital from the fund.
    async fn deploy(&self, cycle_id: u64) -> ChainResult<Submission>;

    async fn claim_base(&self) -> ChainResult<Submission>;
    async fn claim_reward(&self) -> ChainResult<Submission>;
    async fn claim_yield(&self) -> ChainResult<Submission>;

    /// Stake idle wallet reward tokens.
    async fn stake(&self, amount: Decimal) -> ChainResult<Submission>;
}

/// Result of a reward-token → base swap.
#[derive(Debug, Clone)]
pub struct SwapOutcome {
    pub success: bool,
    pub amount_out: Decimal,
    pub signature: Option<String>,
}

/// Token-swap aggregation service, interface only.
#[async_trait]
pub trait SwapService: Send + Sync {
    async fn swap(&self, amount_in: Decimal, max_slippage_bps: u32) -> ChainResult<SwapOutcome>;
}

/// Price feed, interface only — just the numeric contract.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn price(&self) -> ChainResult<PriceQuote>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn receipt() -> Submission {
        Submission {
            signature: "sig".to_string(),
            fee: dec!(0.000005),
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let outcome = submit_with_retry("op", 3, || async { Ok(receipt()) })
            .await
            .unwrap();
        assert_eq!(outcome.signature(), Some("sig"));
        assert_eq!(outcome.fee(), dec!(0.000005));
    }

    #[tokio::test]
    async fn test_retry_already_applied_is_success() {
        let outcome = submit_with_retry("op", 3, || async {
            Err(ChainError::AlreadyApplied("dup".into()))
        })
        .await
        .unwrap();
        assert!(matches!(outcome, SubmitOutcome::AlreadyApplied));
        assert_eq!(outcome.fee(), Decimal::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_transient_then_success() {
        let calls = AtomicU32::new(0);
        let outcome = submit_with_retry("op", 3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ChainError::Transient("timeout".into()))
                } else {
                    Ok(receipt())
                }
            }
        })
        .await
        .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Applied(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let result = submit_with_retry("op", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ChainError::Transient("timeout".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_precondition_not_retried() {
        let calls = AtomicU32::new(0);
        let result = submit_with_retry("op", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ChainError::Precondition("no budget".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
