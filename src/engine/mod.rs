//! Engine — the control loop and its bookkeeping.
//!
//! `scheduler` drives one decision per detected cycle boundary,
//! `maintenance` runs the rate-limited claim/stake/swap/snapshot tasks
//! between cycles, and `accountant` turns ledger aggregates plus live
//! balances into a profit/loss summary.

pub mod accountant;
pub mod maintenance;
pub mod scheduler;
