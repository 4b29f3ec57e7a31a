//! PROSPECTOR — Autonomous Deployment Scheduler and Profit Ledger
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod chain;
pub mod config;
pub mod engine;
pub mod fund;
pub mod ledger;
pub mod storage;
pub mod strategy;
pub mod types;
