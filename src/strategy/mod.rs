//! Strategy engine — tier-driven cycle sizing and the expected-value gate.
//!
//! Both halves are pure: the tier table maps the observed jackpot size to a
//! per-cycle spend policy, and the evaluator decides whether the next
//! cycle's deployment clears the profitability bar. The scheduler consumes
//! each exactly once per cycle.

pub mod ev;
pub mod tiers;

pub use ev::{EvConfig, EvReport, Evaluator};
pub use tiers::{per_cycle_amount, TierTable};
